//! Extension points around the request lifecycle

use crate::matcher::RequestMatcher;
use crate::message::{HttpRequest, HttpResponse};
use crate::pact::{Modes, Pact, Record};
use crate::Result;

use super::controller::ProxyController;

/// State visible to hooks while a request is handled
///
/// Hooks run under the session lock, so the pact cannot change while a hook
/// inspects it.
pub struct HookContext<'a> {
    /// Active pact, if any
    pub pact: Option<&'a Pact>,
    /// Records a recorded exchange is merged next to in `record` mode, all
    /// records of the pact otherwise
    pub records: Vec<&'a Record>,
    /// Matcher configured for the active pact
    pub matcher: &'a RequestMatcher,
    /// Modes in effect
    pub modes: Modes,
    /// Backend base URL
    pub base_url: &'a str,
}

/// Lifecycle hooks of a [`ProxyController`]
///
/// Every method has a default that leaves behavior unchanged.
pub trait ControllerHooks: Send + Sync {
    /// Called once before the listener is bound
    ///
    /// # Errors
    ///
    /// An error aborts startup
    fn before_start(&self, _controller: &ProxyController) -> Result<()> {
        Ok(())
    }

    /// Called with each live exchange in `record` mode
    ///
    /// `record` is the exchange as it would be stored, already redacted.
    /// Returning `false` keeps it out of the pact.
    fn on_proxy_response(
        &self,
        _context: &HookContext<'_>,
        _request: &HttpRequest,
        _response: &HttpResponse,
        _record: &Record,
    ) -> bool {
        true
    }

    /// Called in `mock` and `apply` mode with the matched record, if any
    ///
    /// Returning a response serves it instead of the record or the
    /// not-found response.
    fn mock_request(
        &self,
        _context: &HookContext<'_>,
        _request: &HttpRequest,
        _record: Option<&Record>,
    ) -> Option<HttpResponse> {
        None
    }
}

/// Vetoes recording of requests already present in the pact
///
/// A request is a duplicate when its normalized key and its redacted body
/// equal those of a record the recording mode keeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct DuplicateSuppression;

impl ControllerHooks for DuplicateSuppression {
    fn on_proxy_response(
        &self,
        context: &HookContext<'_>,
        _request: &HttpRequest,
        _response: &HttpResponse,
        record: &Record,
    ) -> bool {
        !context
            .matcher
            .is_duplicate(record, context.base_url, &context.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pact::{Info, RequestMatching};
    use crate::preprocess::Preprocessor;

    const BASE: &str = "http://backend.local";

    fn info() -> Info {
        Info {
            base_url: BASE.to_string(),
            tenant: None,
            version: None,
            request_matching: RequestMatching::default(),
        }
    }

    #[test]
    fn test_duplicate_suppression() {
        let matcher = RequestMatcher::new(&info());
        let request = HttpRequest::new("POST", "/event/events")
            .with_header("content-type", "application/json")
            .with_body(r#"{"type":"a","password":"one"}"#);
        let response = HttpResponse::new(201);
        let preprocessor = Preprocessor::default();
        let capture = |request: &HttpRequest| {
            preprocessor.process(Record::capture(BASE, request, &response))
        };
        let record = capture(&request);

        let mut pact = Pact::new("p", info());
        let context = HookContext {
            pact: Some(&pact),
            records: Vec::new(),
            matcher: &matcher,
            modes: Modes::default(),
            base_url: BASE,
        };
        assert!(DuplicateSuppression.on_proxy_response(&context, &request, &response, &record));

        pact.records.push(record.clone());
        let context = HookContext {
            pact: Some(&pact),
            records: pact.records.iter().collect(),
            matcher: &matcher,
            modes: Modes::default(),
            base_url: BASE,
        };
        assert!(!DuplicateSuppression.on_proxy_response(&context, &request, &response, &record));

        // Only the redacted password differs
        let relogin = request.clone().with_body(r#"{"type":"a","password":"two"}"#);
        assert!(!DuplicateSuppression.on_proxy_response(
            &context,
            &relogin,
            &response,
            &capture(&relogin)
        ));

        let other = request.with_body(r#"{"type":"b"}"#);
        assert!(DuplicateSuppression.on_proxy_response(
            &context,
            &other,
            &response,
            &capture(&other)
        ));
    }
}
