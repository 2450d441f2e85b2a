use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the canarytokens backend, e.g. `https://canarytokens.org`.
    pub backend_url: String,
    /// Route prefix the awsinfra endpoints live under.
    /// Set via CANARY_API_ROUTE env var. Default: `/api`.
    pub api_route: String,
    /// Where the edge redirects requests whose referrer does not match.
    pub token_server: String,
    pub edge_port: u16,
    /// Per-request timeout for backend calls, in seconds.
    /// Set via CANARY_HTTP_TIMEOUT_SECS env var. Default: 30.
    pub http_timeout_secs: u64,
}

impl Config {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8082".into(),
            api_route: "/api".into(),
            token_server: "https://canarytokens.com".into(),
            edge_port: 8088,
            http_timeout_secs: 30,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    let defaults = Config::default();

    let backend_url = std::env::var("CANARY_BACKEND_URL")
        .map(|v| v.trim_end_matches('/').to_string())
        .unwrap_or(defaults.backend_url);

    let env_mode = std::env::var("CANARY_ENV")
        .or_else(|_| std::env::var("RUST_ENV"))
        .unwrap_or_default();
    if env_mode == "production" && !backend_url.starts_with("https://") {
        anyhow::bail!(
            "CANARY_BACKEND_URL must use https:// in production (got '{}')",
            backend_url
        );
    }

    url::Url::parse(&backend_url)
        .map_err(|e| anyhow::anyhow!("CANARY_BACKEND_URL is not a valid URL: {}", e))?;

    Ok(Config {
        backend_url,
        api_route: std::env::var("CANARY_API_ROUTE")
            .map(|v| normalize_route(&v))
            .unwrap_or(defaults.api_route),
        token_server: std::env::var("CANARY_TOKEN_SERVER")
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or(defaults.token_server),
        edge_port: std::env::var("CANARY_EDGE_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.edge_port),
        http_timeout_secs: std::env::var("CANARY_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.http_timeout_secs),
    })
}

/// `"secret/"` → `"/secret"`, `""` → `""`.
fn normalize_route(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}
