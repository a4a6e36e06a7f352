//! Middleware for logging requests and responses.

use axum::{
    extract::Request,
    http::{HeaderMap, header::CONTENT_TYPE},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::Error;

/// Bodies longer than this many bytes are truncated at the `info` level.
pub const LOG_BODY_LENGTH_LIMIT: usize = 64;

/// Log the request and response for each request.
///
/// Both the request and response are logged at the `info` level.
/// If a body is longer than [LOG_BODY_LENGTH_LIMIT] bytes, it is
/// truncated and the full body is logged at the `debug` level.
/// Multipart and binary bodies (receipt images, CSV downloads) are never logged.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();

    if !is_loggable(&parts.headers) {
        tracing::info!(
            "Received request: {} {} (body not logged)",
            parts.method,
            parts.uri
        );
        let response = next.run(Request::from_parts(parts, body)).await;
        tracing::info!("Sending response: {}", response.status());
        return response;
    }

    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::error!("Could not read request body: {error}");
            return Error::MultipartError("could not read request body".to_owned()).into_response();
        }
    };
    log_body(
        &format!("Received request: {} {}", parts.method, parts.uri),
        &String::from_utf8_lossy(&body_bytes),
    );

    let response = next
        .run(Request::from_parts(parts, body_bytes.into()))
        .await;

    let (parts, body) = response.into_parts();
    if !is_loggable(&parts.headers) {
        tracing::info!("Sending response: {} (body not logged)", parts.status);
        return Response::from_parts(parts, body);
    }

    match axum::body::to_bytes(body, usize::MAX).await {
        Ok(body_bytes) => {
            log_body(
                &format!("Sending response: {}", parts.status),
                &String::from_utf8_lossy(&body_bytes),
            );
            Response::from_parts(parts, body_bytes.into())
        }
        Err(error) => {
            tracing::error!("Could not read response body: {error}");
            Response::from_parts(parts, axum::body::Body::empty())
        }
    }
}

fn is_loggable(headers: &HeaderMap) -> bool {
    match headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok()) {
        None => true,
        Some(content_type) => {
            content_type.starts_with("application/json") || content_type.starts_with("text/plain")
        }
    }
}

fn log_body(summary: &str, body: &str) {
    if body.len() > LOG_BODY_LENGTH_LIMIT {
        let cut = (0..=LOG_BODY_LENGTH_LIMIT)
            .rev()
            .find(|&index| body.is_char_boundary(index))
            .unwrap_or(0);
        tracing::info!("{summary}\nbody: {}...", &body[..cut]);
        tracing::debug!("Full body: {body:?}");
    } else {
        tracing::info!("{summary}\nbody: {body:?}");
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, HeaderValue, header::CONTENT_TYPE};

    use super::is_loggable;

    fn headers_with(content_type: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers
    }

    #[test]
    fn json_is_logged() {
        assert!(is_loggable(&headers_with("application/json")));
        assert!(is_loggable(&HeaderMap::new()));
    }

    #[test]
    fn uploads_and_downloads_are_not_logged() {
        assert!(!is_loggable(&headers_with(
            "multipart/form-data; boundary=abc"
        )));
        assert!(!is_loggable(&headers_with("text/csv; charset=utf-8")));
        assert!(!is_loggable(&headers_with("image/jpeg")));
    }
}
