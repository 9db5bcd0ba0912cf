//! Per-session consumption state for sequential matching

/// Tracks which records of the active pact have been served
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchCursor {
    consumed: Vec<bool>,
    next: usize,
}

impl MatchCursor {
    /// Create a cursor at the first record
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the first unconsumed record
    #[must_use]
    pub fn position(&self) -> usize {
        self.next
    }

    /// Check if a record has been consumed
    #[must_use]
    pub fn is_consumed(&self, index: usize) -> bool {
        self.consumed.get(index).copied().unwrap_or(false)
    }

    /// Mark a record consumed and advance past the consumed prefix
    pub fn consume(&mut self, index: usize) {
        if index >= self.consumed.len() {
            self.consumed.resize(index + 1, false);
        }
        self.consumed[index] = true;

        while self.is_consumed(self.next) {
            self.next += 1;
        }
    }

    /// Number of consumed records
    #[must_use]
    pub fn consumed_count(&self) -> usize {
        self.consumed.iter().filter(|c| **c).count()
    }

    /// Start again from the first record
    pub fn reset(&mut self) {
        self.consumed.clear();
        self.next = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_advances_over_prefix() {
        let mut cursor = MatchCursor::new();
        assert_eq!(cursor.position(), 0);

        cursor.consume(1);
        assert_eq!(cursor.position(), 0);
        assert!(cursor.is_consumed(1));

        cursor.consume(0);
        assert_eq!(cursor.position(), 2);
        assert_eq!(cursor.consumed_count(), 2);
    }

    #[test]
    fn test_cursor_reset() {
        let mut cursor = MatchCursor::new();
        cursor.consume(0);
        cursor.consume(1);

        cursor.reset();

        assert_eq!(cursor.position(), 0);
        assert_eq!(cursor.consumed_count(), 0);
        assert!(!cursor.is_consumed(0));
    }
}
