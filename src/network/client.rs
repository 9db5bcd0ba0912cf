//! HTTP client for forwarding requests to the backend

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, Uri};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, warn};

use crate::message::{is_hop_by_hop, join_url, HttpRequest, HttpResponse};
use crate::{ProxyError, Result};

/// Pooled HTTP/HTTPS client
pub type HttpsClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Forwards live requests to the backend
///
/// Requests are sent once; failures are never retried so recorded timing
/// matches what the client saw.
pub struct UpstreamClient {
    client: HttpsClient,
    base_url: String,
    timeout: Duration,
    max_response_size: usize,
}

impl UpstreamClient {
    /// Create a new upstream client
    #[must_use]
    pub fn new(base_url: &str, timeout: Duration, max_response_size: usize) -> Self {
        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(Some(timeout));

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build(https_connector);

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            max_response_size,
        }
    }

    /// Forward a request to the backend
    ///
    /// # Errors
    ///
    /// Returns `Upstream` if the request cannot be built, sent or read,
    /// with `timeout` set when the deadline elapsed, and `DataTooLarge`
    /// for oversized responses
    pub async fn forward(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let uri = build_uri(&self.base_url, &request.path)?;

        debug!("Forwarding {} to {}", request.method, uri);

        let method = request.method.parse::<Method>().map_err(|e| {
            upstream_error(format!("Invalid HTTP method '{}': {e}", request.method))
        })?;

        let mut request_builder = Request::builder().method(method).uri(uri);

        for (name, value) in forwarded_headers(&request.headers) {
            request_builder = request_builder.header(name, value);
        }

        let http_request = request_builder
            .body(Full::new(Bytes::copy_from_slice(&request.body)))
            .map_err(|e| upstream_error(format!("Failed to build request: {e}")))?;

        let exchange = async {
            let response = self.client.request(http_request).await.map_err(|e| {
                warn!("Upstream request failed: {e}");
                upstream_error(format!("Request failed: {e}"))
            })?;

            let status = response.status().as_u16();
            let headers: Vec<(String, String)> = response
                .headers()
                .iter()
                .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
                .map(|(name, value)| {
                    (
                        name.to_string(),
                        String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    )
                })
                .collect();

            let body_bytes = response
                .into_body()
                .collect()
                .await
                .map_err(|e| upstream_error(format!("Failed to read response body: {e}")))?
                .to_bytes();

            if body_bytes.len() > self.max_response_size {
                return Err(ProxyError::DataTooLarge {
                    size: body_bytes.len(),
                    limit: self.max_response_size,
                });
            }

            Ok(HttpResponse {
                status,
                headers,
                body: body_bytes.to_vec(),
            })
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Upstream request timed out after {}ms: {} {}",
                    self.timeout.as_millis(),
                    request.method,
                    request.path
                );
                Err(ProxyError::Upstream {
                    message: format!("No response within {}ms", self.timeout.as_millis()),
                    timeout: true,
                })
            }
        }
    }
}

fn upstream_error(message: String) -> ProxyError {
    ProxyError::Upstream {
        message,
        timeout: false,
    }
}

/// Headers passed on to the backend
fn forwarded_headers(headers: &[(String, String)]) -> impl Iterator<Item = (&str, &str)> {
    headers
        .iter()
        .filter(|(name, _)| {
            !is_hop_by_hop(name)
                && !name.eq_ignore_ascii_case("host")
                && !name.eq_ignore_ascii_case("content-length")
        })
        .map(|(name, value)| (name.as_str(), value.as_str()))
}

/// Build the backend URI for a proxied path
fn build_uri(base_url: &str, path: &str) -> Result<Uri> {
    let uri = join_url(base_url, path);
    uri.parse::<Uri>()
        .map_err(|e| upstream_error(format!("Invalid URI '{uri}': {e}")))
}
