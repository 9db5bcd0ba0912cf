//! Replay engine for serving recorded responses

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::matcher::{BodyMatcher, Match, RequestMatcher};
use crate::message::HttpRequest;
use crate::pact::Record;
use crate::recording::Session;
use crate::schema::{SchemaValidator, ValidationError, Violation};

/// Replay engine: sequential lookup and apply-mode verification
pub struct ReplayEngine {
    validator: Arc<SchemaValidator>,
    hits: AtomicU64,
    duplicates: AtomicU64,
    misses: AtomicU64,
    mismatches: AtomicU64,
}

impl ReplayEngine {
    /// Create a new replay engine
    #[must_use]
    pub fn new(validator: Arc<SchemaValidator>) -> Self {
        Self {
            validator,
            hits: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            mismatches: AtomicU64::new(0),
        }
    }

    /// Find and consume the record serving a request
    ///
    /// Returns the match with a copy of the record so the session lock can
    /// be released before the response is built.
    pub fn lookup(
        &self,
        session: &mut Session,
        matcher: &RequestMatcher,
        request: &HttpRequest,
        base_url: &str,
    ) -> Option<(Match, Record)> {
        let found = session.pact_and_cursor().and_then(|(pact, cursor)| {
            matcher
                .find_match(request, base_url, &pact.records, cursor)
                .map(|m| (m, pact.records[m.index].clone()))
        });

        match &found {
            Some((m, _)) if m.duplicate => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.duplicates.fetch_add(1, Ordering::Relaxed);
            }
            Some(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Replay miss: {} {} (pact: {})",
                    request.method,
                    request.path,
                    session.pact_id().unwrap_or("<none>")
                );
            }
        }
        found
    }

    /// Check a live request against the record it matched
    ///
    /// `live` is the live request captured and redacted like a recording,
    /// so redacted fields compare equal. The record's request body schema is
    /// used when present, otherwise the bodies are compared structurally
    /// with `placeholder` matching any string.
    ///
    /// # Errors
    ///
    /// Returns the violations found
    pub fn verify(
        &self,
        record: &Record,
        live: &Record,
        strict: bool,
        placeholder: &str,
    ) -> Result<(), ValidationError> {
        let actual = live.request.body.clone().unwrap_or(Value::Null);

        let result = if let Some(schema) = &record.request.body_schema {
            self.validator.validate(&actual, schema, strict)
        } else {
            match &record.request.body {
                Some(expected) => BodyMatcher::new(strict)
                    .with_placeholder(placeholder)
                    .compare(expected, &actual),
                None if strict && !actual.is_null() => Err(ValidationError::new(vec![
                    Violation::new("$", "const", "no request body was recorded")
                        .with_values(&Value::Null, &actual),
                ])),
                None => Ok(()),
            }
        };

        if let Err(e) = &result {
            self.mismatches.fetch_add(1, Ordering::Relaxed);
            debug!("Apply mismatch for {}: {}", record.request.url, e);
        }
        result
    }

    /// Get replay statistics
    #[must_use]
    pub fn stats(&self) -> ReplayStats {
        ReplayStats {
            hits: self.hits.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            mismatches: self.mismatches.load(Ordering::Relaxed),
        }
    }

    /// Reset statistics
    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.duplicates.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.mismatches.store(0, Ordering::Relaxed);
    }
}

/// Replay statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayStats {
    /// Requests served from a record
    pub hits: u64,
    /// Hits that reused an already served record
    pub duplicates: u64,
    /// Requests without a matching record
    pub misses: u64,
    /// Apply-mode verification failures
    pub mismatches: u64,
}
