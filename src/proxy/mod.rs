//! Proxy controller and its extension points

pub mod control;
mod controller;
mod hooks;
mod response;

pub use controller::{ControllerBuilder, PactSummary, ProxyController};
pub use hooks::{ControllerHooks, DuplicateSuppression, HookContext};
pub use response::{
    validation_response, DefaultNotFound, NotFoundResponder, RECORD_HEADER, REPLAY_HEADER,
};

use crate::message::HttpResponse;

/// Where the response to a proxied request came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeSource {
    /// Fresh response from the backend
    Live(HttpResponse),
    /// Stored response from the active pact
    Recorded {
        /// Index of the record
        index: usize,
        /// The record had been served before
        duplicate: bool,
        /// Stored response
        response: HttpResponse,
    },
}

impl ExchangeSource {
    /// Check if the response was replayed
    #[must_use]
    pub fn is_recorded(&self) -> bool {
        matches!(self, Self::Recorded { .. })
    }

    /// Response sent to the client; replayed responses are tagged
    #[must_use]
    pub fn into_response(self) -> HttpResponse {
        match self {
            Self::Live(response) => response,
            Self::Recorded {
                index,
                duplicate,
                response,
            } => response
                .with_header(REPLAY_HEADER, if duplicate { "duplicate" } else { "first" })
                .with_header(RECORD_HEADER, &index.to_string()),
        }
    }
}
