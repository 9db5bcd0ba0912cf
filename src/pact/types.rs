//! Persisted pact structures

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::AuthInfo;
use crate::message::{is_hop_by_hop, HttpRequest, HttpResponse};

/// Header map with lower-cased names
pub type Headers = BTreeMap<String, String>;

/// Query parameters ignored by default when matching
pub const DEFAULT_IGNORED_URL_PARAMETERS: &[&str] =
    &["_", "nocache", "dateFrom", "dateTo", "withTotalPages"];

/// A named, ordered collection of recorded exchanges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pact {
    /// Unique identifier
    pub id: String,
    /// Metadata
    pub info: Info,
    /// Exchanges in recording order
    #[serde(default)]
    pub records: Vec<Record>,
}

impl Pact {
    /// Create a pact with no records
    #[must_use]
    pub fn new(id: &str, info: Info) -> Self {
        Self {
            id: id.to_string(),
            info,
            records: Vec::new(),
        }
    }

    /// Number of records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the pact has no records
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Pact metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Info {
    /// Base URL the pact was recorded against
    pub base_url: String,
    /// Tenant the pact was recorded for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    /// Backend version tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Matching options
    #[serde(default)]
    pub request_matching: RequestMatching,
}

/// Request normalization options stored with a pact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestMatching {
    /// Query parameters dropped before comparison
    #[serde(alias = "ignore_url_parameters")]
    pub ignore_url_parameters: Vec<String>,
    /// Headers never compared
    #[serde(alias = "ignore_headers")]
    pub ignore_headers: Vec<String>,
    /// Compare headers at all
    #[serde(alias = "match_headers")]
    pub match_headers: bool,
    /// Compare URLs relative to the base URL
    #[serde(alias = "base_url_relative")]
    pub base_url_relative: bool,
}

impl Default for RequestMatching {
    fn default() -> Self {
        Self {
            ignore_url_parameters: DEFAULT_IGNORED_URL_PARAMETERS
                .iter()
                .map(ToString::to_string)
                .collect(),
            ignore_headers: Vec::new(),
            match_headers: false,
            base_url_relative: true,
        }
    }
}

/// How a body that is not plain JSON or text is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    /// Standard base64
    Base64,
}

/// One captured request/response pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Captured request
    pub request: RecordRequest,
    /// Captured response
    pub response: RecordResponse,
    /// Identity the request was made with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthInfo>,
    /// When the exchange was recorded
    pub created_at: DateTime<Utc>,
}

impl Record {
    /// Capture a live exchange
    #[must_use]
    pub fn capture(base_url: &str, request: &HttpRequest, response: &HttpResponse) -> Self {
        let request_headers = to_header_map(&request.headers);
        let (request_body, request_encoding, request_text) =
            encode_body(&request.body, &request_headers);
        let response_headers = to_header_map(&response.headers);
        let (response_body, response_encoding, response_text) =
            encode_body(&response.body, &response_headers);

        Self {
            request: RecordRequest {
                method: request.method.to_uppercase(),
                url: request.url(base_url),
                headers: request_headers,
                body: request_body,
                body_encoding: request_encoding,
                body_text: request_text,
                body_schema: None,
            },
            response: RecordResponse {
                status: response.status,
                status_text: status_text(response.status),
                headers: response_headers,
                body: response_body,
                body_encoding: response_encoding,
                body_text: response_text,
                body_schema: None,
            },
            auth: crate::auth::identify(&request.headers),
            created_at: Utc::now(),
        }
    }
}

/// Request half of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordRequest {
    /// HTTP method
    pub method: String,
    /// Absolute URL
    pub url: String,
    /// Headers
    #[serde(default)]
    pub headers: Headers,
    /// Body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Body encoding when not JSON or text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_encoding: Option<BodyEncoding>,
    /// JSON body exactly as sent, while `body` still matches it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_text: Option<String>,
    /// JSON schema describing the body
    #[serde(rename = "$body", default, skip_serializing_if = "Option::is_none")]
    pub body_schema: Option<Value>,
}

impl RecordRequest {
    /// Raw body bytes
    #[must_use]
    pub fn body_bytes(&self) -> Vec<u8> {
        decode_body(self.body.as_ref(), self.body_encoding, self.body_text.as_deref(), &self.headers)
    }
}

/// Response half of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordResponse {
    /// HTTP status code
    pub status: u16,
    /// Reason phrase
    #[serde(default)]
    pub status_text: String,
    /// Headers
    #[serde(default)]
    pub headers: Headers,
    /// Body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Body encoding when not JSON or text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_encoding: Option<BodyEncoding>,
    /// JSON body exactly as sent, while `body` still matches it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_text: Option<String>,
    /// JSON schema describing the body
    #[serde(rename = "$body", default, skip_serializing_if = "Option::is_none")]
    pub body_schema: Option<Value>,
}

impl RecordResponse {
    /// Raw body bytes
    #[must_use]
    pub fn body_bytes(&self) -> Vec<u8> {
        decode_body(self.body.as_ref(), self.body_encoding, self.body_text.as_deref(), &self.headers)
    }

    /// Rebuild the HTTP response served during replay
    #[must_use]
    pub fn to_http(&self) -> HttpResponse {
        let headers = self
            .headers
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name) && name.as_str() != "content-length")
            .flat_map(|(name, value)| {
                let values: Vec<&str> = if name == "set-cookie" {
                    value.split('\n').collect()
                } else {
                    vec![value.as_str()]
                };
                values
                    .into_iter()
                    .map(move |value| (name.clone(), value.to_string()))
            })
            .collect();

        HttpResponse {
            status: self.status,
            headers,
            body: self.body_bytes(),
        }
    }
}

/// Canonical reason phrase for a status code
#[must_use]
pub fn status_text(status: u16) -> String {
    hyper::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or_default()
        .to_string()
}

/// Collapse a header list into a lower-cased map
///
/// Repeated headers are joined with `", "`, except `set-cookie`, whose
/// values may contain commas and are joined with newlines instead.
#[must_use]
pub fn to_header_map(headers: &[(String, String)]) -> Headers {
    let mut map = Headers::new();
    for (name, value) in headers {
        let name = name.to_ascii_lowercase();
        let separator = if name == "set-cookie" { "\n" } else { ", " };
        map.entry(name)
            .and_modify(|existing: &mut String| {
                existing.push_str(separator);
                existing.push_str(value);
            })
            .or_insert_with(|| value.clone());
    }
    map
}

fn is_json(headers: &Headers) -> bool {
    headers
        .get("content-type")
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"))
}

/// Parsed body, its encoding and the original JSON text when re-serializing
/// the parsed value would not reproduce it
fn encode_body(
    bytes: &[u8],
    headers: &Headers,
) -> (Option<Value>, Option<BodyEncoding>, Option<String>) {
    if bytes.is_empty() {
        return (None, None, None);
    }

    if is_json(headers) {
        if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
            let text = serde_json::to_vec(&value)
                .ok()
                .filter(|compact| compact.as_slice() != bytes)
                .and_then(|_| std::str::from_utf8(bytes).ok())
                .map(ToString::to_string);
            return (Some(value), None, text);
        }
    }

    match std::str::from_utf8(bytes) {
        Ok(text) => (Some(Value::String(text.to_string())), None, None),
        Err(_) => (
            Some(Value::String(STANDARD.encode(bytes))),
            Some(BodyEncoding::Base64),
            None,
        ),
    }
}

fn decode_body(
    body: Option<&Value>,
    encoding: Option<BodyEncoding>,
    text: Option<&str>,
    headers: &Headers,
) -> Vec<u8> {
    let Some(body) = body else {
        return Vec::new();
    };
    if let (Some(text), None) = (text, encoding) {
        return text.as_bytes().to_vec();
    }

    match (body, encoding) {
        (Value::String(encoded), Some(BodyEncoding::Base64)) => {
            STANDARD.decode(encoded).unwrap_or_default()
        }
        (Value::String(text), None) if !is_json(headers) => text.clone().into_bytes(),
        (value, _) => serde_json::to_vec(value).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_response(body: &str) -> HttpResponse {
        HttpResponse {
            status: 200,
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("Content-Length".to_string(), body.len().to_string()),
            ],
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_capture_json_exchange() {
        let request = HttpRequest::new("get", "/inventory/managedObjects?pageSize=5");
        let response = json_response(r#"{"managedObjects":[]}"#);

        let record = Record::capture("https://tenant.example.com", &request, &response);

        assert_eq!(record.request.method, "GET");
        assert_eq!(
            record.request.url,
            "https://tenant.example.com/inventory/managedObjects?pageSize=5"
        );
        assert_eq!(record.response.status_text, "OK");
        assert_eq!(
            record.response.body,
            Some(serde_json::json!({"managedObjects": []}))
        );
        assert!(record.request.body.is_none());
    }

    #[test]
    fn test_replay_drops_length_header() {
        let response = json_response(r#"{"a":1}"#);
        let record = Record::capture("http://x", &HttpRequest::new("GET", "/"), &response);

        let replayed = record.response.to_http();
        assert_eq!(replayed.body, br#"{"a":1}"#);
        assert!(replayed.header("content-length").is_none());
        assert_eq!(replayed.header("content-type"), Some("application/json"));
    }

    #[test]
    fn test_text_and_binary_bodies() {
        let text = HttpResponse {
            status: 200,
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            body: b"123".to_vec(),
        };
        let record = Record::capture("http://x", &HttpRequest::new("GET", "/"), &text);
        assert_eq!(record.response.body, Some(Value::String("123".to_string())));
        assert_eq!(record.response.body_bytes(), b"123");

        let binary = HttpResponse {
            status: 200,
            headers: vec![],
            body: vec![0xff, 0x00, 0xfe],
        };
        let record = Record::capture("http://x", &HttpRequest::new("GET", "/"), &binary);
        assert_eq!(record.response.body_encoding, Some(BodyEncoding::Base64));
        assert_eq!(record.response.body_bytes(), vec![0xff, 0x00, 0xfe]);
    }

    #[test]
    fn test_repeated_headers_joined() {
        let headers = vec![
            ("Accept".to_string(), "text/html".to_string()),
            ("accept".to_string(), "application/json".to_string()),
        ];
        let map = to_header_map(&headers);
        assert_eq!(map["accept"], "text/html, application/json");
    }

    #[test]
    fn test_json_layout_preserved() {
        let body = "{\"zeta\": 1,\n  \"alpha\": [2, 3]}";
        let record = Record::capture("http://x", &HttpRequest::new("GET", "/"), &json_response(body));

        assert_eq!(record.response.body_text.as_deref(), Some(body));
        assert_eq!(record.response.to_http().body, body.as_bytes());

        let compact = r#"{"zeta":1,"alpha":[2,3]}"#;
        let record = Record::capture("http://x", &HttpRequest::new("GET", "/"), &json_response(compact));
        assert!(record.response.body_text.is_none());
        assert_eq!(record.response.to_http().body, compact.as_bytes());
    }

    #[test]
    fn test_set_cookie_kept_separate() {
        let response = HttpResponse::new(200)
            .with_header("Set-Cookie", "a=1; Expires=Wed, 21 Oct 2026 07:28:00 GMT")
            .with_header("Set-Cookie", "b=2");
        let record = Record::capture("http://x", &HttpRequest::new("GET", "/"), &response);

        let cookies: Vec<_> = record
            .response
            .to_http()
            .headers
            .into_iter()
            .filter(|(name, _)| name == "set-cookie")
            .map(|(_, value)| value)
            .collect();
        assert_eq!(
            cookies,
            vec!["a=1; Expires=Wed, 21 Oct 2026 07:28:00 GMT".to_string(), "b=2".to_string()]
        );
    }

    #[test]
    fn test_persisted_shape() {
        let request = HttpRequest::new("POST", "/event/events")
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"type":"c8y_Test"}"#);
        let record = Record::capture("http://x", &request, &json_response("{}"));
        let pact = Pact {
            id: "events".to_string(),
            info: Info {
                base_url: "http://x".to_string(),
                tenant: Some("t1".to_string()),
                version: None,
                request_matching: RequestMatching::default(),
            },
            records: vec![record],
        };

        let json = serde_json::to_value(&pact).unwrap();
        assert_eq!(json["info"]["baseUrl"], "http://x");
        assert!(json["info"]["requestMatching"]["ignoreUrlParameters"].is_array());
        assert_eq!(json["records"][0]["request"]["body"]["type"], "c8y_Test");
        assert_eq!(json["records"][0]["response"]["statusText"], "OK");
        assert!(json["info"].get("version").is_none());

        let back: Pact = serde_json::from_value(json).unwrap();
        assert_eq!(back, pact);
    }
}
