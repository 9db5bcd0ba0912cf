//! Responses generated by the proxy itself

use serde_json::{json, Value};

use crate::fingerprint::MatchKey;
use crate::message::{HttpRequest, HttpResponse};
use crate::schema::ValidationError;

/// Header telling whether a replayed record was served before
pub const REPLAY_HEADER: &str = "x-pact-replay";

/// Header carrying the index of the replayed record
pub const RECORD_HEADER: &str = "x-pact-record";

/// Builds the response for requests without a matching record
pub trait NotFoundResponder: Send + Sync {
    /// Response for an unmatched request
    fn respond(&self, request: &HttpRequest, key: &MatchKey, pact: Option<&str>) -> HttpResponse;
}

/// 404 with a JSON diagnostic
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNotFound;

impl NotFoundResponder for DefaultNotFound {
    fn respond(&self, request: &HttpRequest, key: &MatchKey, pact: Option<&str>) -> HttpResponse {
        HttpResponse::json(
            404,
            &json!({
                "error": "MatchMiss",
                "message": format!("No recording found for {key}"),
                "method": request.method,
                "url": request.path,
                "key": key.to_string(),
                "pact": pact,
            }),
        )
    }
}

/// 422 describing why a live request broke the recorded contract
#[must_use]
pub fn validation_response(key: &MatchKey, error: &ValidationError) -> HttpResponse {
    let first = error.first();
    let violations: Vec<Value> = error
        .violations
        .iter()
        .map(|v| {
            json!({
                "path": v.path,
                "keyword": v.keyword,
                "message": v.message,
            })
        })
        .collect();

    HttpResponse::json(
        422,
        &json!({
            "error": "ValidationError",
            "url": key.to_string(),
            "path": first.map(|v| v.path.as_str()),
            "message": first.map_or_else(|| error.to_string(), |v| v.message.clone()),
            "expected": first.and_then(|v| v.expected.clone()),
            "actual": first.and_then(|v| v.actual.clone()),
            "violations": violations,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pact::RequestMatching;
    use crate::schema::Violation;

    #[test]
    fn test_default_not_found() {
        let request = HttpRequest::new("GET", "/alarm/alarms?pageSize=1");
        let key = MatchKey::from_url(
            "GET",
            "http://backend.local/alarm/alarms?pageSize=1",
            "http://backend.local",
            &RequestMatching::default(),
        );

        let response = DefaultNotFound.respond(&request, &key, Some("suite__test"));
        let body = response.json_body().unwrap();

        assert_eq!(response.status, 404);
        assert_eq!(body["error"], "MatchMiss");
        assert_eq!(body["method"], "GET");
        assert_eq!(body["pact"], "suite__test");
    }

    #[test]
    fn test_validation_response() {
        let key = MatchKey::from_url(
            "POST",
            "http://backend.local/event/events?_=1",
            "http://backend.local",
            &RequestMatching::default(),
        );
        let error = ValidationError::new(vec![Violation::new("$.text", "const", "value differs")
            .with_values(&json!("hello"), &json!("bye"))]);

        let response = validation_response(&key, &error);
        let body = response.json_body().unwrap();

        assert_eq!(response.status, 422);
        assert_eq!(body["url"], "POST /event/events");
        assert_eq!(body["path"], "$.text");
        assert_eq!(body["expected"], "hello");
        assert_eq!(body["actual"], "bye");
        assert_eq!(body["violations"].as_array().unwrap().len(), 1);
    }
}
