//! Built-in `format` rules
//!
//! Backends frequently send booleans and integers as strings, so the
//! `boolean` and `integer` formats accept both representations.

use semver::{Version, VersionReq};
use serde_json::Value;
use uuid::Uuid;

use super::FormatRule;

/// Parse an npm-style range (`>=1.2.0 <2`, `^1.0.0 || 2.x`, `1.0.0 - 1.5.0`)
/// as a union of [`VersionReq`]s
fn parse_range(range: &str) -> Option<Vec<VersionReq>> {
    range
        .split("||")
        .map(|set| {
            let set = set.trim();
            if set.is_empty() {
                return None;
            }
            let comparators = match set.split_once(" - ") {
                Some((low, high)) => format!(">={}, <={}", low.trim(), high.trim()),
                None => join_comparators(set),
            };
            VersionReq::parse(&comparators).ok()
        })
        .collect()
}

/// Turn space separated comparators into the comma separated form,
/// keeping a bare operator attached to the version after it
fn join_comparators(set: &str) -> String {
    let mut comparators: Vec<String> = Vec::new();
    let mut pending = String::new();
    for token in set.split_whitespace() {
        let token = token.trim_start_matches(['v', 'V']);
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
            pending.push_str(token);
            continue;
        }
        comparators.push(format!("{pending}{token}"));
        pending.clear();
    }
    if !pending.is_empty() {
        comparators.push(pending);
    }
    comparators.join(", ")
}

/// RFC 3339 timestamps
#[derive(Debug, Clone, Copy, Default)]
pub struct DateTimeFormat;

impl FormatRule for DateTimeFormat {
    fn name(&self) -> &str {
        "date-time"
    }

    fn validate(&self, value: &Value) -> bool {
        value
            .as_str()
            .is_some_and(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
    }
}

/// Exact semantic versions (`1.2.3-rc.1`)
#[derive(Debug, Clone, Copy, Default)]
pub struct SemverVersionFormat;

impl FormatRule for SemverVersionFormat {
    fn name(&self) -> &str {
        "semver-version"
    }

    fn validate(&self, value: &Value) -> bool {
        value
            .as_str()
            .is_some_and(|s| Version::parse(s).is_ok())
    }
}

/// Semantic version ranges (`>=1.2.0 <2`, `^1.0.0 || 2.x`, `1.0.0 - 1.5.0`)
#[derive(Debug, Clone, Copy, Default)]
pub struct SemverRangeFormat;

impl FormatRule for SemverRangeFormat {
    fn name(&self) -> &str {
        "semver-range"
    }

    fn validate(&self, value: &Value) -> bool {
        value
            .as_str()
            .is_some_and(|s| !s.trim().is_empty() && parse_range(s).is_some())
    }
}

/// Booleans, also as `"true"` / `"false"` strings
#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanFormat;

impl FormatRule for BooleanFormat {
    fn name(&self) -> &str {
        "boolean"
    }

    fn validate(&self, value: &Value) -> bool {
        match value {
            Value::Bool(_) => true,
            Value::String(s) => s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("false"),
            _ => false,
        }
    }
}

/// Integers, also as decimal strings
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerFormat;

impl FormatRule for IntegerFormat {
    fn name(&self) -> &str {
        "integer"
    }

    fn validate(&self, value: &Value) -> bool {
        match value {
            Value::Number(n) => n.is_i64() || n.is_u64(),
            Value::String(s) => s.trim().parse::<i64>().is_ok(),
            _ => false,
        }
    }
}

/// RFC 4122 style UUIDs
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidFormat;

impl FormatRule for UuidFormat {
    fn name(&self) -> &str {
        "uuid"
    }

    fn validate(&self, value: &Value) -> bool {
        value.as_str().is_some_and(|s| Uuid::parse_str(s).is_ok())
    }
}
