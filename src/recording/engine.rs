//! Capture, redaction and merging of recorded exchanges

use std::sync::Arc;

use tracing::{debug, info};

use crate::matcher::RequestMatcher;
use crate::message::{HttpRequest, HttpResponse};
use crate::pact::{Info, Record, RecordingMode};
use crate::preprocess::Preprocessor;
use crate::schema::SchemaGenerator;

use super::session::Session;

/// What happened to a recorded exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Added at the end of the records
    Appended(usize),
    /// Overwrote an existing record
    Replaced(usize),
    /// Not written
    Skipped,
}

impl MergeOutcome {
    /// Check if the pact changed
    #[must_use]
    pub fn is_write(self) -> bool {
        !matches!(self, Self::Skipped)
    }
}

/// Turns live exchanges into records and merges them into the session
pub struct RecordingEngine {
    preprocessor: Preprocessor,
    generator: Option<Arc<dyn SchemaGenerator>>,
}

impl RecordingEngine {
    /// Create a recording engine
    #[must_use]
    pub fn new(preprocessor: Preprocessor, generator: Option<Arc<dyn SchemaGenerator>>) -> Self {
        Self {
            preprocessor,
            generator,
        }
    }

    /// Preprocessor applied to every record
    #[must_use]
    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    /// Capture a live exchange as a redacted record
    ///
    /// Body schemas are generated from the original documents; the redaction
    /// keeps value types so they stay valid for the stored bodies.
    #[must_use]
    pub fn capture(&self, base_url: &str, request: &HttpRequest, response: &HttpResponse) -> Record {
        let mut record = Record::capture(base_url, request, response);

        if let Some(generator) = &self.generator {
            if record.request.body_encoding.is_none() {
                record.request.body_schema =
                    record.request.body.as_ref().and_then(|b| generator.generate(b));
            }
            if record.response.body_encoding.is_none() {
                record.response.body_schema =
                    record.response.body.as_ref().and_then(|b| generator.generate(b));
            }
        }

        self.preprocessor.process(record)
    }

    /// Merge a record into the active pact according to the recording mode
    ///
    /// `info` is the metadata of the current configuration, installed by
    /// `replace` and `refresh`. A write marks the session dirty.
    pub fn merge(&self, session: &mut Session, record: Record, info: &Info) -> MergeOutcome {
        let mode = session.modes().recording_mode;

        if session.pact().is_none() {
            return MergeOutcome::Skipped;
        }

        let outcome = match mode {
            RecordingMode::New if session.existed_at_start() => {
                debug!("Pact exists, not recording in mode 'new'");
                MergeOutcome::Skipped
            }
            RecordingMode::New | RecordingMode::Append => Self::append(session, record),
            RecordingMode::Replace => {
                if !session.replaced() {
                    if let Some(pact) = session.pact_mut() {
                        info!(
                            "Replacing {} records of pact {}",
                            pact.records.len(),
                            pact.id
                        );
                        pact.records.clear();
                        pact.info = info.clone();
                    }
                    session.set_replaced();
                }
                Self::append(session, record)
            }
            RecordingMode::Refresh => Self::refresh(session, record, info),
        };

        if outcome.is_write() {
            session.mark_dirty();
        }
        outcome
    }

    fn append(session: &mut Session, record: Record) -> MergeOutcome {
        match session.pact_mut() {
            Some(pact) => {
                pact.records.push(record);
                MergeOutcome::Appended(pact.records.len() - 1)
            }
            None => MergeOutcome::Skipped,
        }
    }

    fn refresh(session: &mut Session, record: Record, info: &Info) -> MergeOutcome {
        let matcher = RequestMatcher::new(info);
        let key = matcher.record_key(&record);

        let target = session.pact().and_then(|pact| {
            pact.records
                .iter()
                .enumerate()
                .find(|(i, existing)| !session.is_refreshed(*i) && matcher.record_key(existing) == key)
                .map(|(i, _)| i)
        });

        let outcome = match session.pact_mut() {
            Some(pact) => {
                pact.info = info.clone();
                match target {
                    Some(index) => {
                        pact.records[index] = record;
                        MergeOutcome::Replaced(index)
                    }
                    None => {
                        pact.records.push(record);
                        MergeOutcome::Appended(pact.records.len() - 1)
                    }
                }
            }
            None => MergeOutcome::Skipped,
        };

        if let MergeOutcome::Replaced(index) | MergeOutcome::Appended(index) = outcome {
            session.set_refreshed(index);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pact::{Modes, OperatingMode, Pact, RequestMatching};
    use crate::preprocess::PreprocessorConfig;
    use crate::schema::InferredSchemaGenerator;

    const BASE: &str = "http://backend.local";

    fn info(version: &str) -> Info {
        Info {
            base_url: BASE.to_string(),
            tenant: None,
            version: Some(version.to_string()),
            request_matching: RequestMatching::default(),
        }
    }

    fn engine() -> RecordingEngine {
        RecordingEngine::new(Preprocessor::default(), None)
    }

    fn record(engine: &RecordingEngine, path: &str, body: &str) -> Record {
        engine.capture(
            BASE,
            &HttpRequest::new("GET", path),
            &HttpResponse::new(200).with_body(body),
        )
    }

    fn session(mode: RecordingMode, existing: &[&str], existed: bool) -> Session {
        let engine = engine();
        let mut pact = Pact::new("p", info("1"));
        for path in existing {
            pact.records.push(record(&engine, path, "old"));
        }
        let mut session = Session::new(Modes::new(OperatingMode::Record, mode));
        session.activate(pact, existed);
        session
    }

    fn bodies(session: &Session) -> Vec<String> {
        session
            .pact()
            .unwrap()
            .records
            .iter()
            .map(|r| String::from_utf8(r.response.body_bytes()).unwrap())
            .collect()
    }

    #[test]
    fn test_append() {
        let engine = engine();
        let mut session = session(RecordingMode::Append, &["/a"], true);

        let outcome = engine.merge(&mut session, record(&engine, "/a", "new"), &info("2"));

        assert_eq!(outcome, MergeOutcome::Appended(1));
        assert_eq!(bodies(&session), vec!["old", "new"]);
        assert_eq!(session.pact().unwrap().info.version.as_deref(), Some("1"));
        assert!(session.has_pending_write());
    }

    #[test]
    fn test_new_skips_existing_pact() {
        let engine = engine();
        let mut existing = session(RecordingMode::New, &["/a"], true);
        let outcome = engine.merge(&mut existing, record(&engine, "/a", "new"), &info("2"));
        assert_eq!(outcome, MergeOutcome::Skipped);
        assert!(!existing.has_pending_write());

        let mut fresh = session(RecordingMode::New, &[], false);
        let outcome = engine.merge(&mut fresh, record(&engine, "/a", "new"), &info("2"));
        assert_eq!(outcome, MergeOutcome::Appended(0));
    }

    #[test]
    fn test_replace_clears_once() {
        let engine = engine();
        let mut session = session(RecordingMode::Replace, &["/a", "/b"], true);

        engine.merge(&mut session, record(&engine, "/c", "first"), &info("2"));
        engine.merge(&mut session, record(&engine, "/d", "second"), &info("2"));

        assert_eq!(bodies(&session), vec!["first", "second"]);
        assert_eq!(session.pact().unwrap().info.version.as_deref(), Some("2"));
    }

    #[test]
    fn test_refresh_replaces_in_order() {
        let engine = engine();
        let mut session = session(RecordingMode::Refresh, &["/a", "/b", "/a"], true);

        let first = engine.merge(&mut session, record(&engine, "/a", "a1"), &info("2"));
        let second = engine.merge(&mut session, record(&engine, "/a", "a2"), &info("2"));
        let third = engine.merge(&mut session, record(&engine, "/a", "a3"), &info("2"));

        assert_eq!(first, MergeOutcome::Replaced(0));
        assert_eq!(second, MergeOutcome::Replaced(2));
        assert_eq!(third, MergeOutcome::Appended(3));
        assert_eq!(bodies(&session), vec!["a1", "old", "a2", "a3"]);
        assert_eq!(session.pact().unwrap().info.version.as_deref(), Some("2"));
    }

    #[test]
    fn test_capture_redacts_and_generates_schema() {
        let engine = RecordingEngine::new(
            Preprocessor::new(&PreprocessorConfig::default()).unwrap(),
            Some(Arc::new(InferredSchemaGenerator)),
        );
        let request = HttpRequest::new("POST", "/user/login")
            .with_header("content-type", "application/json")
            .with_body(r#"{"user":"admin","password":"hunter2"}"#);

        let record = engine.capture(BASE, &request, &HttpResponse::new(204));

        assert_eq!(record.request.body.as_ref().unwrap()["password"], "****");
        let schema = record.request.body_schema.unwrap();
        assert_eq!(schema["properties"]["password"]["type"], "string");
        assert!(record.response.body_schema.is_none());
    }

    #[test]
    fn test_no_active_pact() {
        let engine = engine();
        let mut session = Session::new(Modes::default());
        let outcome = engine.merge(&mut session, record(&engine, "/a", "x"), &info("1"));
        assert_eq!(outcome, MergeOutcome::Skipped);
    }
}
