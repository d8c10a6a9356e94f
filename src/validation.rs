use axum::http::{HeaderMap, Method, StatusCode, header};
use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};

// =============================================================================
// Validation Constants
// =============================================================================

/// Maximum length for an endpoint path.
pub const MAX_PATH_LENGTH: usize = 2048;

/// Paths served by the gateway itself and never proxied.
pub const RESERVED_PATHS: &[&str] = &["/health", "/ready"];

/// Validate the request method. Only POST is proxied.
pub fn validate_method(method: &Method) -> GatewayResult<()> {
    if method == Method::POST {
        return Ok(());
    }

    Err(GatewayError::ClientInput {
        status: StatusCode::METHOD_NOT_ALLOWED,
        message: format!("Method {method} is not allowed. Use POST"),
    })
}

/// Validate an endpoint path.
///
/// Rules:
/// - Must start with `/` and be at most 2048 characters
/// - Must not contain `..` segments, empty segments, or control characters
/// - Must not be one of the gateway's own operational routes
pub fn validate_endpoint_path(path: &str) -> GatewayResult<()> {
    if !path.starts_with('/') {
        return Err(GatewayError::bad_request("Endpoint path must start with '/'"));
    }

    if path.len() > MAX_PATH_LENGTH {
        return Err(GatewayError::bad_request(format!(
            "Endpoint path cannot exceed {MAX_PATH_LENGTH} characters"
        )));
    }

    if let Some((i, c)) = path.char_indices().find(|(_, c)| c.is_control()) {
        return Err(GatewayError::bad_request(format!(
            "Endpoint path contains control character {:?} at position {i}",
            c
        )));
    }

    if path.len() > 1 {
        for segment in path.split('/').skip(1) {
            if segment.is_empty() {
                return Err(GatewayError::bad_request(
                    "Endpoint path cannot contain empty segments",
                ));
            }
            if segment == ".." || segment == "." {
                return Err(GatewayError::bad_request(
                    "Endpoint path cannot contain relative segments",
                ));
            }
        }
    }

    if RESERVED_PATHS.contains(&path) {
        return Err(GatewayError::bad_request(format!(
            "Endpoint path {path} is reserved"
        )));
    }

    Ok(())
}

/// Validate that the request declares a JSON body.
///
/// Accepts `application/json` with optional parameters (e.g. `charset=utf-8`),
/// case-insensitively.
pub fn validate_json_content_type(headers: &HeaderMap) -> GatewayResult<()> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let mime = content_type.split(';').next().unwrap_or_default().trim();
    if mime.eq_ignore_ascii_case("application/json") {
        return Ok(());
    }

    Err(GatewayError::ClientInput {
        status: StatusCode::UNSUPPORTED_MEDIA_TYPE,
        message: "Content-Type must be application/json".to_string(),
    })
}

/// Parse the request body as JSON.
pub fn validate_json_body(body: &[u8]) -> GatewayResult<Value> {
    if body.is_empty() {
        return Err(GatewayError::bad_request("Request body cannot be empty"));
    }

    serde_json::from_slice(body)
        .map_err(|e| GatewayError::bad_request(format!("Request body is not valid JSON: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn status_of(result: GatewayResult<()>) -> StatusCode {
        result.unwrap_err().status()
    }

    #[test]
    fn test_only_post_is_allowed() {
        assert!(validate_method(&Method::POST).is_ok());
        assert_eq!(status_of(validate_method(&Method::GET)), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(status_of(validate_method(&Method::PUT)), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn test_valid_endpoint_paths() {
        assert!(validate_endpoint_path("/predict_winner").is_ok());
        assert!(validate_endpoint_path("/lookup_player_stats").is_ok());
        assert!(validate_endpoint_path("/api/v1/teams").is_ok());
        assert!(validate_endpoint_path("/").is_ok());
    }

    #[test]
    fn test_invalid_endpoint_paths() {
        assert!(validate_endpoint_path("").is_err());
        assert!(validate_endpoint_path("predict").is_err());
        assert!(validate_endpoint_path("/a//b").is_err());
        assert!(validate_endpoint_path("/a/").is_err());
        assert!(validate_endpoint_path("/../etc/passwd").is_err());
        assert!(validate_endpoint_path("/a\nb").is_err());
        assert!(validate_endpoint_path(&format!("/{}", "a".repeat(MAX_PATH_LENGTH))).is_err());
    }

    #[test]
    fn test_reserved_paths_are_rejected() {
        assert!(validate_endpoint_path("/health").is_err());
        assert!(validate_endpoint_path("/ready").is_err());
        assert!(validate_endpoint_path("/health/deep").is_ok());
    }

    #[test]
    fn test_json_content_type() {
        let mut headers = HeaderMap::new();
        assert_eq!(status_of(validate_json_content_type(&headers)), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert!(validate_json_content_type(&headers).is_ok());

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("Application/JSON; charset=utf-8"));
        assert!(validate_json_content_type(&headers).is_ok());

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        assert_eq!(status_of(validate_json_content_type(&headers)), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test]
    fn test_json_body() {
        let value = validate_json_body(br#"{"playerName":"LeBron James"}"#).unwrap();
        assert_eq!(value["playerName"], "LeBron James");

        assert!(validate_json_body(b"[1, 2]").is_ok());
        assert!(validate_json_body(b"").is_err());
        assert!(validate_json_body(b"{not json").is_err());
    }
}
