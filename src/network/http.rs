//! Conversion between hyper messages and proxy messages

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Request, Response, StatusCode};
use serde_json::json;
use tracing::debug;

use crate::config::LimitsConfig;
use crate::message::{is_hop_by_hop, HttpRequest, HttpResponse};
use crate::{ProxyError, Result};

/// Reads inbound requests and writes outbound responses
pub struct HttpHandler;

impl HttpHandler {
    /// Read an inbound request into an [`HttpRequest`]
    ///
    /// # Errors
    ///
    /// Returns `DataTooLarge` for oversized bodies, `Other` for too many
    /// headers or an unreadable body
    pub async fn read_request<B>(request: Request<B>, limits: &LimitsConfig) -> Result<HttpRequest>
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        Self::validate_request(&request, limits)?;

        let (parts, body) = request.into_parts();

        let path = parts
            .uri
            .path_and_query()
            .map_or_else(|| "/".to_string(), ToString::to_string);

        let headers = parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let body = Self::read_body(body, limits.max_request_size).await?;

        Ok(HttpRequest {
            method: parts.method.to_string(),
            path,
            headers,
            body: body.to_vec(),
        })
    }

    /// Check declared size and header count before reading the body
    ///
    /// # Errors
    ///
    /// Returns error if request is invalid or too large
    pub fn validate_request<B>(request: &Request<B>, limits: &LimitsConfig) -> Result<()> {
        if let Some(length) = request
            .headers()
            .get(hyper::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok())
        {
            if length > limits.max_request_size {
                return Err(ProxyError::DataTooLarge {
                    size: length,
                    limit: limits.max_request_size,
                });
            }
        }

        let header_count = request.headers().len();
        if header_count > limits.max_headers {
            return Err(ProxyError::Other(format!(
                "Too many headers: {header_count} > {}",
                limits.max_headers
            )));
        }

        Ok(())
    }

    /// Read request body with size limit
    ///
    /// # Errors
    ///
    /// Returns error if body is too large or read fails
    pub async fn read_body<B>(body: B, max_size: usize) -> Result<Bytes>
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        let bytes = body
            .collect()
            .await
            .map_err(|e| ProxyError::Other(format!("Failed to read body: {e}")))?
            .to_bytes();

        if bytes.len() > max_size {
            return Err(ProxyError::DataTooLarge {
                size: bytes.len(),
                limit: max_size,
            });
        }

        Ok(bytes)
    }

    /// Build the hyper response sent to the client
    ///
    /// Headers that cannot be represented are dropped; hyper sets
    /// `content-length` from the body.
    #[must_use]
    pub fn into_response(response: HttpResponse) -> Response<Full<Bytes>> {
        let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
        let mut http_response = Response::new(Full::new(Bytes::from(response.body)));
        *http_response.status_mut() = status;

        let headers = http_response.headers_mut();
        for (name, value) in &response.headers {
            if is_hop_by_hop(name) || name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => debug!("Dropping invalid response header '{name}'"),
            }
        }

        http_response
    }

    /// Create an error response
    #[must_use]
    pub fn error_response(error: &ProxyError) -> HttpResponse {
        HttpResponse::json(
            error.status(),
            &json!({
                "error": error.kind(),
                "message": error.to_string(),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Empty;

    fn limits() -> LimitsConfig {
        LimitsConfig {
            max_request_size: 16,
            max_headers: 2,
            ..LimitsConfig::default()
        }
    }

    #[tokio::test]
    async fn test_read_request() {
        let request = Request::builder()
            .method("POST")
            .uri("/inventory/managedObjects?pageSize=5")
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(r#"{"a":1}"#)))
            .unwrap();

        let request = HttpHandler::read_request(request, &limits()).await.unwrap();

        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/inventory/managedObjects?pageSize=5");
        assert_eq!(request.header("Content-Type"), Some("application/json"));
        assert_eq!(request.body, br#"{"a":1}"#);
    }

    #[test]
    fn test_validate_request_too_large() {
        let request = Request::builder()
            .method("POST")
            .uri("/test")
            .header(hyper::header::CONTENT_LENGTH, "10000")
            .body(Empty::<Bytes>::new())
            .unwrap();

        let err = HttpHandler::validate_request(&request, &limits()).unwrap_err();
        assert_eq!(err.status(), 413);
    }

    #[test]
    fn test_validate_request_too_many_headers() {
        let request = Request::builder()
            .uri("/test")
            .header("a", "1")
            .header("b", "2")
            .header("c", "3")
            .body(Empty::<Bytes>::new())
            .unwrap();

        assert!(HttpHandler::validate_request(&request, &limits()).is_err());
    }

    #[tokio::test]
    async fn test_read_body_too_large() {
        let body = Full::new(Bytes::from("test data that is too long"));

        let result = HttpHandler::read_body(body, 5).await;
        assert!(matches!(result, Err(ProxyError::DataTooLarge { .. })));
    }

    #[test]
    fn test_into_response_filters_headers() {
        let response = HttpResponse::new(201)
            .with_header("Content-Type", "application/json")
            .with_header("Transfer-Encoding", "chunked")
            .with_header("Content-Length", "999")
            .with_header("bad header", "x")
            .with_header("set-cookie", "a=1")
            .with_header("set-cookie", "b=2")
            .with_body("{}");

        let response = HttpHandler::into_response(response);

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["content-type"], "application/json");
        assert!(response.headers().get("transfer-encoding").is_none());
        assert!(response.headers().get("content-length").is_none());
        assert_eq!(response.headers().get_all("set-cookie").iter().count(), 2);
    }

    #[test]
    fn test_error_response() {
        let error = ProxyError::MatchMiss("GET /x".to_string());
        let response = HttpHandler::error_response(&error);

        assert_eq!(response.status, 404);
        assert_eq!(response.json_body().unwrap()["error"], "MatchMiss");
    }
}
