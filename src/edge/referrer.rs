//! Referrer check for cloned-site tokens.
//!
//! Requests arrive as `/<token>/<base64url(expected referrer)>/<filename>`.
//! A request from the expected site gets a transparent pixel; anything else is
//! redirected to the token server, which records the hit.

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;

/// 1×1 transparent GIF.
pub const PIXEL_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

const MICROSOFT_LOGIN_EXPECTED: &str = "microsoftonline.com";
const MICROSOFT_LOGIN_ORIGIN: &str = "login.microsoft.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeResponse {
    /// 200 with [`PIXEL_GIF`].
    Pixel,
    /// 302 to this location.
    Redirect(String),
    /// 404, empty body.
    NotFound,
}

/// Decide the response for `uri` given the request's `Referer` header.
pub fn check_referrer(uri: &str, referer: Option<&str>, token_server: &str) -> EdgeResponse {
    let segments: Vec<&str> = uri.split('/').collect();
    if segments.len() != 4 {
        return EdgeResponse::NotFound;
    }
    let (token_id, encoded, filename) = (segments[1], segments[2], segments[3]);

    let referer = referer.unwrap_or("");
    if referer.is_empty() {
        return EdgeResponse::Pixel;
    }

    let Some(expected) = decode_expected(encoded) else {
        tracing::debug!(token_id, "undecodable expected referrer");
        return redirect(token_server, token_id, filename, referer);
    };
    if expected.is_empty() {
        return EdgeResponse::Pixel;
    }

    let origin = referer_origin(referer);
    if origin.ends_with(&expected)
        || (expected == MICROSOFT_LOGIN_EXPECTED && origin.ends_with(MICROSOFT_LOGIN_ORIGIN))
    {
        return EdgeResponse::Pixel;
    }

    tracing::info!(token_id, %origin, expected = %expected, "referrer mismatch");
    redirect(token_server, token_id, filename, referer)
}

fn redirect(token_server: &str, token_id: &str, filename: &str, referer: &str) -> EdgeResponse {
    EdgeResponse::Redirect(format!(
        "{}/{}/{}?r={}",
        token_server, token_id, filename, referer
    ))
}

fn decode_expected(encoded: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .or_else(|_| URL_SAFE.decode(encoded))
        .ok()?;
    String::from_utf8(bytes).ok()
}

/// `https://a.example.com:8443/path?q` → `https://a.example.com:8443`.
/// Values that do not parse as URLs are compared as given.
fn referer_origin(referer: &str) -> String {
    match url::Url::parse(referer) {
        Ok(u) => match u.host_str() {
            Some(host) => match u.port() {
                Some(port) => format!("{}://{}:{}", u.scheme(), host, port),
                None => format!("{}://{}", u.scheme(), host),
            },
            None => referer.to_string(),
        },
        Err(_) => referer.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER: &str = "https://canarytokens.com";

    fn enc(s: &str) -> String {
        URL_SAFE_NO_PAD.encode(s)
    }

    #[test]
    fn test_wrong_segment_count_is_404() {
        for uri in ["/", "/tok", "/tok/abc", "/tok/abc/file.gif/extra", "tok/abc/file", ""] {
            assert_eq!(
                check_referrer(uri, Some("https://evil.example"), SERVER),
                EdgeResponse::NotFound,
                "uri {:?}",
                uri
            );
        }
    }

    #[test]
    fn test_matching_origin_gets_pixel() {
        let uri = format!("/tok123/{}/logo.gif", enc("example.com"));
        assert_eq!(
            check_referrer(&uri, Some("https://www.example.com/login"), SERVER),
            EdgeResponse::Pixel
        );
    }

    #[test]
    fn test_empty_expected_or_referer_gets_pixel() {
        let uri = format!("/tok123/{}/logo.gif", enc(""));
        assert_eq!(check_referrer(&uri, Some("https://anything.test/"), SERVER), EdgeResponse::Pixel);

        let uri = format!("/tok123/{}/logo.gif", enc("example.com"));
        assert_eq!(check_referrer(&uri, None, SERVER), EdgeResponse::Pixel);
        assert_eq!(check_referrer(&uri, Some(""), SERVER), EdgeResponse::Pixel);
    }

    #[test]
    fn test_microsoft_login_substitution() {
        let uri = format!("/tok123/{}/bg.png", enc("microsoftonline.com"));
        assert_eq!(
            check_referrer(&uri, Some("https://login.microsoft.com/x"), SERVER),
            EdgeResponse::Pixel
        );
    }

    #[test]
    fn test_mismatch_redirects_with_raw_referer() {
        let uri = format!("/tok123/{}/logo.gif", enc("example.com"));
        let referer = "https://phish.example.net/login?u=1";
        assert_eq!(
            check_referrer(&uri, Some(referer), SERVER),
            EdgeResponse::Redirect(format!("{}/tok123/logo.gif?r={}", SERVER, referer))
        );
    }

    #[test]
    fn test_path_does_not_count_toward_origin() {
        let uri = format!("/tok123/{}/logo.gif", enc("example.com"));
        let out = check_referrer(&uri, Some("https://evil.test/example.com"), SERVER);
        assert!(matches!(out, EdgeResponse::Redirect(_)));
    }

    #[test]
    fn test_padded_encoding_accepted() {
        let uri = format!("/tok123/{}/logo.gif", URL_SAFE.encode("example.co"));
        assert!(uri.ends_with("=/logo.gif"));
        assert_eq!(
            check_referrer(&uri, Some("https://example.co"), SERVER),
            EdgeResponse::Pixel
        );
    }

    #[test]
    fn test_undecodable_expected_redirects() {
        let out = check_referrer("/tok123/!!!/logo.gif", Some("https://example.com"), SERVER);
        assert!(matches!(out, EdgeResponse::Redirect(_)));
    }

    #[test]
    fn test_pixel_is_a_gif() {
        assert!(PIXEL_GIF.starts_with(b"GIF89a"));
        assert_eq!(PIXEL_GIF.len(), 43);
        assert_eq!(*PIXEL_GIF.last().unwrap(), 0x3b);
    }
}
