//! JSON schema validation, custom formats and schema generation

mod formats;
mod generator;
mod validator;

pub use formats::{
    BooleanFormat, DateTimeFormat, IntegerFormat, SemverRangeFormat, SemverVersionFormat,
    UuidFormat,
};
pub use generator::InferredSchemaGenerator;
pub use validator::SchemaValidator;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Maximum nesting depth walked in schemas and documents
pub const MAX_DEPTH: usize = 64;

/// Validation of a single `format` keyword value
///
/// Implement this to register formats beyond the built-in ones.
pub trait FormatRule: Send + Sync {
    /// Format name as used in schemas
    fn name(&self) -> &str;

    /// Check a value against the format
    fn validate(&self, value: &Value) -> bool;
}

/// Produces a schema describing a JSON document
pub trait SchemaGenerator: Send + Sync {
    /// Generate a schema, or `None` if the value should not get one
    fn generate(&self, value: &Value) -> Option<Value>;
}

/// One failed assertion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    /// Location in the validated document (`$.a[0].b`)
    pub path: String,
    /// Schema keyword or comparison rule that failed
    pub keyword: String,
    /// Human readable description
    pub message: String,
    /// Expected value, when comparing documents
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    /// Actual value, when comparing documents
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
}

impl Violation {
    /// Create a violation without expected/actual values
    #[must_use]
    pub fn new(path: &str, keyword: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            keyword: keyword.to_string(),
            message: message.into(),
            expected: None,
            actual: None,
        }
    }

    /// Attach the compared values
    #[must_use]
    pub fn with_values(mut self, expected: &Value, actual: &Value) -> Self {
        self.expected = Some(expected.clone());
        self.actual = Some(actual.clone());
        self
    }
}

/// A document failed schema validation or structural comparison
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{}", summarize(.violations))]
pub struct ValidationError {
    /// Every failed assertion, in document order
    pub violations: Vec<Violation>,
}

impl ValidationError {
    /// Wrap a list of violations
    #[must_use]
    pub fn new(violations: Vec<Violation>) -> Self {
        Self { violations }
    }

    /// Check if any violation used a keyword
    #[must_use]
    pub fn has_keyword(&self, keyword: &str) -> bool {
        self.violations.iter().any(|v| v.keyword == keyword)
    }

    /// The first violation
    #[must_use]
    pub fn first(&self) -> Option<&Violation> {
        self.violations.first()
    }
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.path, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Append an object key to a document path
pub(crate) fn child_path(path: &str, key: &str) -> String {
    format!("{path}.{key}")
}

/// Append an array index to a document path
pub(crate) fn index_path(path: &str, index: usize) -> String {
    format!("{path}[{index}]")
}
