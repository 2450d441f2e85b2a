use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower_http::trace::TraceLayer;

use super::referrer::{check_referrer, EdgeResponse, PIXEL_GIF};

#[derive(Debug, Clone)]
pub struct EdgeState {
    /// Redirect target for mismatched referrers, without a trailing slash.
    pub token_server: String,
}

/// Every path is handled by the referrer check.
pub fn edge_router(token_server: impl Into<String>) -> Router {
    let state = Arc::new(EdgeState {
        token_server: token_server.into().trim_end_matches('/').to_string(),
    });
    Router::new()
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .fallback(referrer_handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(request_id_middleware))
}

async fn referrer_handler(State(state): State<Arc<EdgeState>>, req: Request) -> Response {
    // Opaque (non-ASCII) bytes are still a referer and must not read as empty.
    let referer = req
        .headers()
        .get(header::REFERER)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());
    let decision = check_referrer(req.uri().path(), referer.as_deref(), &state.token_server);
    into_http(decision)
}

fn into_http(decision: EdgeResponse) -> Response {
    match decision {
        EdgeResponse::Pixel => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, HeaderValue::from_static("image/gif")),
                (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
            ],
            Body::from(PIXEL_GIF),
        )
            .into_response(),
        EdgeResponse::Redirect(location) => match HeaderValue::from_bytes(location.as_bytes()) {
            Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
            Err(e) => {
                tracing::warn!(error = %e, "redirect location is not a valid header value");
                StatusCode::BAD_REQUEST.into_response()
            }
        },
        EdgeResponse::NotFound => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}
