//! Structural comparison of JSON documents

use serde_json::Value;

use crate::schema::{child_path, index_path, ValidationError, Violation, MAX_DEPTH};

/// Deep comparison of a recorded document with a live one
///
/// A non-strict comparison only requires the expected keys to be present,
/// a strict one also rejects keys the expected document does not have.
/// Strings equal to the placeholder match any string.
#[derive(Debug, Clone, Default)]
pub struct BodyMatcher {
    strict: bool,
    placeholder: Option<String>,
}

impl BodyMatcher {
    /// Create a matcher
    #[must_use]
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            placeholder: None,
        }
    }

    /// Treat expected strings equal to `placeholder` as wildcards
    #[must_use]
    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }

    /// Compare two documents
    ///
    /// # Errors
    ///
    /// Returns every mismatch with its path and the compared values
    pub fn compare(&self, expected: &Value, actual: &Value) -> Result<(), ValidationError> {
        let mut violations = Vec::new();
        self.walk(expected, actual, "$", 0, &mut violations);

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(violations))
        }
    }

    fn walk(&self, expected: &Value, actual: &Value, path: &str, depth: usize, out: &mut Vec<Violation>) {
        if depth > MAX_DEPTH {
            return;
        }

        match (expected, actual) {
            (Value::String(e), Value::String(_)) if self.is_placeholder(e) => {}
            (Value::Object(e), Value::Object(a)) => {
                for (key, expected_child) in e {
                    match a.get(key) {
                        Some(actual_child) => {
                            self.walk(expected_child, actual_child, &child_path(path, key), depth + 1, out);
                        }
                        None => out.push(
                            Violation::new(&child_path(path, key), "required", format!("missing property '{key}'"))
                                .with_values(expected_child, &Value::Null),
                        ),
                    }
                }

                if self.strict {
                    for (key, actual_child) in a.iter().filter(|(k, _)| !e.contains_key(*k)) {
                        out.push(
                            Violation::new(
                                &child_path(path, key),
                                "additionalProperties",
                                format!("unexpected property '{key}'"),
                            )
                            .with_values(&Value::Null, actual_child),
                        );
                    }
                }
            }
            (Value::Array(e), Value::Array(a)) => {
                if e.len() != a.len() {
                    out.push(
                        Violation::new(
                            path,
                            "length",
                            format!("expected {} items, got {}", e.len(), a.len()),
                        )
                        .with_values(expected, actual),
                    );
                    return;
                }
                for (i, (expected_item, actual_item)) in e.iter().zip(a).enumerate() {
                    self.walk(expected_item, actual_item, &index_path(path, i), depth + 1, out);
                }
            }
            (Value::Number(e), Value::Number(a)) if e.as_f64() == a.as_f64() => {}
            _ if expected == actual => {}
            _ if std::mem::discriminant(expected) != std::mem::discriminant(actual) => {
                out.push(
                    Violation::new(path, "type", "value has a different type").with_values(expected, actual),
                );
            }
            _ => out.push(Violation::new(path, "const", "value differs").with_values(expected, actual)),
        }
    }

    fn is_placeholder(&self, value: &str) -> bool {
        self.placeholder.as_deref() == Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equal_documents() {
        let doc = json!({"a": [1, {"b": "c"}], "d": null});
        assert!(BodyMatcher::new(true).compare(&doc, &doc).is_ok());
    }

    #[test]
    fn test_non_strict_ignores_extra_keys() {
        let expected = json!({"type": "c8y_Alarm"});
        let actual = json!({"type": "c8y_Alarm", "time": "2024-01-01T00:00:00Z"});

        assert!(BodyMatcher::new(false).compare(&expected, &actual).is_ok());

        let err = BodyMatcher::new(true).compare(&expected, &actual).unwrap_err();
        assert_eq!(err.first().unwrap().path, "$.time");
        assert_eq!(err.first().unwrap().keyword, "additionalProperties");
    }

    #[test]
    fn test_mismatch_reports_values() {
        let expected = json!({"source": {"id": "1"}, "severity": "MAJOR"});
        let actual = json!({"source": {"id": "2"}, "severity": "MAJOR"});

        let err = BodyMatcher::new(false).compare(&expected, &actual).unwrap_err();
        let violation = err.first().unwrap();
        assert_eq!(violation.path, "$.source.id");
        assert_eq!(violation.expected, Some(json!("1")));
        assert_eq!(violation.actual, Some(json!("2")));
    }

    #[test]
    fn test_placeholder_matches_any_string() {
        let matcher = BodyMatcher::new(true).with_placeholder("****");
        let expected = json!({"user": "admin", "password": "****"});

        assert!(matcher
            .compare(&expected, &json!({"user": "admin", "password": "secret"}))
            .is_ok());
        assert!(matcher
            .compare(&expected, &json!({"user": "admin", "password": 42}))
            .is_err());
    }

    #[test]
    fn test_type_and_length_mismatch() {
        let matcher = BodyMatcher::new(false);

        let err = matcher.compare(&json!({"n": 1}), &json!({"n": "1"})).unwrap_err();
        assert!(err.has_keyword("type"));

        let err = matcher.compare(&json!([1, 2]), &json!([1])).unwrap_err();
        assert!(err.has_keyword("length"));

        assert!(matcher.compare(&json!(1), &json!(1.0)).is_ok());
    }

    #[test]
    fn test_missing_property() {
        let err = BodyMatcher::new(false)
            .compare(&json!({"a": 1, "b": 2}), &json!({"a": 1}))
            .unwrap_err();
        assert_eq!(err.first().unwrap().path, "$.b");
        assert!(err.has_keyword("required"));
    }
}
