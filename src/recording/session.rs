//! Active pact session state

use std::collections::HashSet;

use crate::matcher::MatchCursor;
use crate::pact::{Modes, Pact, Record, RecordingMode};

/// The single active pact of a controller and everything tracked about it
///
/// A session is always accessed under the controller's session lock, so
/// "append + advance cursor" happens atomically.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pact: Option<Pact>,
    existed_at_start: bool,
    cursor: MatchCursor,
    modes: Modes,
    replaced: bool,
    refreshed: HashSet<usize>,
    generation: u64,
    persisted: u64,
}

impl Session {
    /// Create a session without an active pact
    #[must_use]
    pub fn new(modes: Modes) -> Self {
        Self {
            modes,
            ..Self::default()
        }
    }

    /// Make a pact current, dropping all per-pact bookkeeping
    pub fn activate(&mut self, pact: Pact, existed: bool) {
        self.pact = Some(pact);
        self.existed_at_start = existed;
        self.cursor.reset();
        self.replaced = false;
        self.refreshed.clear();
        self.generation = 0;
        self.persisted = 0;
    }

    /// Unset the active pact
    pub fn deactivate(&mut self) -> Option<Pact> {
        self.cursor.reset();
        self.replaced = false;
        self.refreshed.clear();
        self.generation = 0;
        self.persisted = 0;
        self.existed_at_start = false;
        self.pact.take()
    }

    /// Active pact
    #[must_use]
    pub fn pact(&self) -> Option<&Pact> {
        self.pact.as_ref()
    }

    /// Active pact, mutable
    pub fn pact_mut(&mut self) -> Option<&mut Pact> {
        self.pact.as_mut()
    }

    /// Id of the active pact
    #[must_use]
    pub fn pact_id(&self) -> Option<&str> {
        self.pact.as_ref().map(|p| p.id.as_str())
    }

    /// Check if the active pact was loaded from the store
    #[must_use]
    pub fn existed_at_start(&self) -> bool {
        self.existed_at_start
    }

    /// Current modes
    #[must_use]
    pub fn modes(&self) -> Modes {
        self.modes
    }

    /// Install new modes
    pub fn set_modes(&mut self, modes: Modes) {
        self.modes = modes;
    }

    /// Match cursor of the active pact
    pub fn cursor_mut(&mut self) -> &mut MatchCursor {
        &mut self.cursor
    }

    /// Match cursor of the active pact
    #[must_use]
    pub fn cursor(&self) -> &MatchCursor {
        &self.cursor
    }

    /// Active pact and its cursor, borrowed together for matching
    pub fn pact_and_cursor(&mut self) -> Option<(&Pact, &mut MatchCursor)> {
        let pact = self.pact.as_ref()?;
        Some((pact, &mut self.cursor))
    }

    /// Records a new exchange would sit next to after merging
    ///
    /// `replace` starts from nothing until it cleared the pact, and `refresh`
    /// only keeps records it already rewrote.
    #[must_use]
    pub fn merge_view(&self) -> Vec<&Record> {
        let Some(pact) = &self.pact else {
            return Vec::new();
        };
        match self.modes.recording_mode {
            RecordingMode::Replace if !self.replaced => Vec::new(),
            RecordingMode::Refresh => pact
                .records
                .iter()
                .enumerate()
                .filter(|(index, _)| self.refreshed.contains(index))
                .map(|(_, record)| record)
                .collect(),
            _ => pact.records.iter().collect(),
        }
    }

    /// Restart matching and recording-mode bookkeeping from the first record
    pub fn reset_cursors(&mut self) {
        self.cursor.reset();
        self.replaced = false;
        self.refreshed.clear();
    }

    /// Check if `replace` already cleared the records
    #[must_use]
    pub fn replaced(&self) -> bool {
        self.replaced
    }

    pub(crate) fn set_replaced(&mut self) {
        self.replaced = true;
    }

    /// Check if a record was already overwritten by `refresh`
    #[must_use]
    pub fn is_refreshed(&self, index: usize) -> bool {
        self.refreshed.contains(&index)
    }

    pub(crate) fn set_refreshed(&mut self, index: usize) {
        self.refreshed.insert(index);
    }

    /// Record that the pact changed and needs saving
    pub fn mark_dirty(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Check if changes are waiting to be saved
    #[must_use]
    pub fn has_pending_write(&self) -> bool {
        self.pact.is_some() && self.generation != self.persisted
    }

    /// Copy of the pact to save, with the generation it represents
    #[must_use]
    pub fn snapshot(&self) -> Option<(Pact, u64)> {
        if !self.has_pending_write() {
            return None;
        }
        self.pact.clone().map(|pact| (pact, self.generation))
    }

    /// Record a successful save of `generation`
    pub fn mark_persisted(&mut self, generation: u64) {
        self.persisted = self.persisted.max(generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pact::{Info, OperatingMode, RecordingMode, RequestMatching};

    fn pact(id: &str) -> Pact {
        Pact::new(
            id,
            Info {
                base_url: "http://backend.local".to_string(),
                tenant: None,
                version: None,
                request_matching: RequestMatching::default(),
            },
        )
    }

    #[test]
    fn test_new_session_is_empty() {
        let modes = Modes::new(OperatingMode::Mock, RecordingMode::Append);
        let session = Session::new(modes);

        assert!(session.pact().is_none());
        assert_eq!(session.modes(), modes);
        assert!(!session.has_pending_write());
        assert!(session.snapshot().is_none());
    }

    #[test]
    fn test_generations() {
        let mut session = Session::default();
        session.activate(pact("a"), false);

        let first = session.mark_dirty();
        let second = session.mark_dirty();
        assert!(session.has_pending_write());

        let (snapshot, generation) = session.snapshot().unwrap();
        assert_eq!(snapshot.id, "a");
        assert_eq!(generation, second);

        session.mark_persisted(second);
        session.mark_persisted(first);
        assert!(!session.has_pending_write());
    }

    #[test]
    fn test_activate_resets_bookkeeping() {
        let mut session = Session::default();
        session.activate(pact("a"), true);
        session.cursor_mut().consume(0);
        session.set_replaced();
        session.set_refreshed(3);
        session.mark_dirty();

        session.activate(pact("b"), false);

        assert_eq!(session.pact_id(), Some("b"));
        assert!(!session.existed_at_start());
        assert_eq!(session.cursor().consumed_count(), 0);
        assert!(!session.replaced());
        assert!(!session.is_refreshed(3));
        assert!(!session.has_pending_write());
    }

    #[test]
    fn test_reset_cursors_keeps_pact() {
        let mut session = Session::default();
        session.activate(pact("a"), true);
        session.cursor_mut().consume(0);
        session.set_replaced();

        session.reset_cursors();

        assert_eq!(session.pact_id(), Some("a"));
        assert_eq!(session.cursor().position(), 0);
        assert!(!session.replaced());
    }

    #[test]
    fn test_merge_view() {
        let mut existing = pact("a");
        for path in ["/a", "/b"] {
            existing.records.push(Record::capture(
                "http://backend.local",
                &crate::message::HttpRequest::new("GET", path),
                &crate::message::HttpResponse::new(200),
            ));
        }

        let mut session = Session::new(Modes::new(OperatingMode::Record, RecordingMode::Append));
        session.activate(existing, true);
        assert_eq!(session.merge_view().len(), 2);

        session.set_modes(Modes::new(OperatingMode::Record, RecordingMode::Replace));
        assert!(session.merge_view().is_empty());
        session.set_replaced();
        assert_eq!(session.merge_view().len(), 2);

        session.set_modes(Modes::new(OperatingMode::Record, RecordingMode::Refresh));
        session.reset_cursors();
        assert!(session.merge_view().is_empty());
        session.set_refreshed(1);
        let view = session.merge_view();
        assert_eq!(view.len(), 1);
        assert!(view[0].request.url.ends_with("/b"));
    }

    #[test]
    fn test_deactivate() {
        let mut session = Session::default();
        session.activate(pact("a"), true);

        let previous = session.deactivate().unwrap();
        assert_eq!(previous.id, "a");
        assert!(session.pact().is_none());
    }
}
