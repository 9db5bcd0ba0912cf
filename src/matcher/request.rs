//! Sequential request matching against recorded exchanges

use tracing::debug;

use crate::fingerprint::MatchKey;
use crate::message::{is_hop_by_hop, HttpRequest};
use crate::pact::{Headers, Info, Record, RequestMatching};

use super::cursor::MatchCursor;

/// Headers that never take part in header comparison
const VOLATILE_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "date",
    "user-agent",
    "accept-encoding",
    "authorization",
    "cookie",
    "x-xsrf-token",
];

/// A record selected for a live request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    /// Index into the pact's records
    pub index: usize,
    /// The record had already been served before
    pub duplicate: bool,
}

/// Locates stored exchanges for live requests
#[derive(Debug, Clone)]
pub struct RequestMatcher {
    options: RequestMatching,
    pact_base_url: String,
    sequential_fallback: bool,
}

impl RequestMatcher {
    /// Create a matcher for a pact
    #[must_use]
    pub fn new(info: &Info) -> Self {
        Self {
            options: info.request_matching.clone(),
            pact_base_url: info.base_url.clone(),
            sequential_fallback: false,
        }
    }

    /// Reuse already consumed records when nothing unconsumed matches
    #[must_use]
    pub fn with_sequential_fallback(mut self, enabled: bool) -> Self {
        self.sequential_fallback = enabled;
        self
    }

    /// Match key of a live request issued against `base_url`
    #[must_use]
    pub fn request_key(&self, request: &HttpRequest, base_url: &str) -> MatchKey {
        MatchKey::from_url(
            &request.method,
            &request.url(base_url),
            base_url,
            &self.options,
        )
    }

    /// Match key of a recorded exchange
    #[must_use]
    pub fn record_key(&self, record: &Record) -> MatchKey {
        MatchKey::from_url(
            &record.request.method,
            &record.request.url,
            &self.pact_base_url,
            &self.options,
        )
    }

    /// Find the record serving a live request and consume it
    ///
    /// Records are scanned in recording order from the cursor; the earliest
    /// unconsumed record with an equal key wins.
    pub fn find_match(
        &self,
        request: &HttpRequest,
        base_url: &str,
        records: &[Record],
        cursor: &mut MatchCursor,
    ) -> Option<Match> {
        let key = self.request_key(request, base_url);

        let candidate = (cursor.position()..records.len())
            .filter(|i| !cursor.is_consumed(*i))
            .find(|i| self.is_candidate(&key, request, &records[*i]));

        if let Some(index) = candidate {
            cursor.consume(index);
            debug!("Matched {} to record {} ({})", key, index, key.short_hash());
            return Some(Match {
                index,
                duplicate: false,
            });
        }

        if self.sequential_fallback {
            let reused = records
                .iter()
                .enumerate()
                .find(|(_, record)| self.is_candidate(&key, request, record))
                .map(|(index, _)| index);

            if let Some(index) = reused {
                debug!("Reusing consumed record {} for {}", index, key);
                return Some(Match {
                    index,
                    duplicate: true,
                });
            }
        }

        debug!("No record for {} ({})", key, key.short_hash());
        None
    }

    /// Check if an equal request with an equal body is already recorded
    ///
    /// `record` is a freshly captured exchange against `base_url`. Both sides
    /// are compared after redaction, so redacted fields do not differ.
    #[must_use]
    pub fn is_duplicate(&self, record: &Record, base_url: &str, records: &[&Record]) -> bool {
        let key = MatchKey::from_url(
            &record.request.method,
            &record.request.url,
            base_url,
            &self.options,
        );
        records.iter().any(|existing| {
            self.record_key(existing) == key
                && existing.request.body_encoding == record.request.body_encoding
                && existing.request.body == record.request.body
        })
    }

    fn is_candidate(&self, key: &MatchKey, request: &HttpRequest, record: &Record) -> bool {
        self.record_key(record) == *key
            && (!self.options.match_headers
                || self.headers_match(&request.headers, &record.request.headers))
    }

    fn headers_match(&self, live: &[(String, String)], recorded: &Headers) -> bool {
        recorded
            .iter()
            .filter(|(name, _)| !self.is_ignored_header(name))
            .all(|(name, value)| {
                live.iter()
                    .any(|(n, v)| n.eq_ignore_ascii_case(name) && v.trim() == value.trim())
            })
    }

    fn is_ignored_header(&self, name: &str) -> bool {
        is_hop_by_hop(name)
            || VOLATILE_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
            || self
                .options
                .ignore_headers
                .iter()
                .any(|h| h.eq_ignore_ascii_case(name))
    }
}
