//! Pact data model: recorded exchanges, metadata and session modes

mod mode;
mod types;

pub use mode::{Modes, OperatingMode, RecordingMode};
pub use types::{
    status_text, to_header_map, BodyEncoding, Headers, Info, Pact, Record, RecordRequest,
    RecordResponse, RequestMatching, DEFAULT_IGNORED_URL_PARAMETERS,
};

use crate::{ProxyError, Result};

/// Separator used when deriving a pact id from nested titles
pub const TITLE_SEPARATOR: &str = "__";

/// Identifies the pact a session should use
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PactSelector {
    /// Explicit pact id
    Id(String),
    /// Test titles, outermost first
    Titles(Vec<String>),
}

impl PactSelector {
    /// Resolve the pact id
    ///
    /// # Errors
    ///
    /// Returns `InvalidPactId` if the resulting id is unusable as a file name
    pub fn resolve(&self) -> Result<String> {
        let id = match self {
            Self::Id(id) => id.trim().to_string(),
            Self::Titles(titles) => pact_id_from_titles(titles),
        };
        validate_pact_id(&id)?;
        Ok(id)
    }
}

/// Derive a pact id from test titles
#[must_use]
pub fn pact_id_from_titles<S: AsRef<str>>(titles: &[S]) -> String {
    titles
        .iter()
        .map(|t| t.as_ref().trim())
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.split_whitespace()
                .collect::<Vec<_>>()
                .join("_")
                .replace(['/', '\\'], "_")
        })
        .collect::<Vec<_>>()
        .join(TITLE_SEPARATOR)
}

/// Validate a pact id
///
/// # Errors
///
/// Returns error if the id is empty, too long or could escape the storage location
pub fn validate_pact_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(ProxyError::InvalidPactId(
            "Pact id cannot be empty".to_string(),
        ));
    }

    if id.len() > 255 {
        return Err(ProxyError::InvalidPactId(format!(
            "Pact id too long: {} > 255",
            id.len()
        )));
    }

    if id.contains('/') || id.contains('\\') {
        return Err(ProxyError::InvalidPactId(
            "Pact id cannot contain path separators".to_string(),
        ));
    }

    if id.starts_with('.') {
        return Err(ProxyError::InvalidPactId(
            "Pact id cannot start with dot".to_string(),
        ));
    }

    if id.contains('\0') {
        return Err(ProxyError::InvalidPactId(
            "Pact id cannot contain null bytes".to_string(),
        ));
    }

    if id.contains("..") {
        return Err(ProxyError::InvalidPactId(
            "Pact id cannot contain '..'".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_pact_id() {
        assert!(validate_pact_id("valid_pact").is_ok());
        assert!(validate_pact_id("suite__creates_device").is_ok());

        assert!(validate_pact_id("").is_err());
        assert!(validate_pact_id(".hidden").is_err());
        assert!(validate_pact_id("a/b").is_err());
        assert!(validate_pact_id("a\\b").is_err());
        assert!(validate_pact_id("a..b").is_err());
        assert!(validate_pact_id("a\0b").is_err());
        assert!(validate_pact_id(&"x".repeat(256)).is_err());
    }

    #[test]
    fn test_id_from_titles() {
        let id = pact_id_from_titles(&["Inventory", "creates a  device"]);
        assert_eq!(id, "Inventory__creates_a_device");

        let selector = PactSelector::Titles(vec!["alarms".into(), "".into(), "list/all".into()]);
        assert_eq!(selector.resolve().unwrap(), "alarms__list_all");
    }

    #[test]
    fn test_selector_rejects_traversal() {
        assert!(PactSelector::Id("../etc".to_string()).resolve().is_err());
        assert!(PactSelector::Titles(vec![]).resolve().is_err());
    }
}
