//! Redaction of recorded exchanges before they are persisted
//!
//! Rules address fields with dotted paths:
//!
//! ```text
//! [request.|response.](headers|body)[.segment]*
//! ```
//!
//! `*` matches any key or array element. Key segments pass through arrays,
//! so `body.password` also reaches `[{"password": ..}]`. Header names
//! compare case-insensitively. Rules without a direction apply to both.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ProxyError, Result};
use crate::pact::{BodyEncoding, Headers, Record};
use crate::schema::MAX_DEPTH;

/// Default replacement for obfuscated strings
pub const DEFAULT_OBFUSCATION_PATTERN: &str = "****";

/// Fields obfuscated unless configured otherwise
pub const DEFAULT_OBFUSCATE: &[&str] = &[
    "request.headers.authorization",
    "request.headers.cookie",
    "request.headers.x-xsrf-token",
    "response.headers.set-cookie",
    "body.password",
];

/// Redaction rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessorConfig {
    /// Paths replaced by a value of the same type
    pub obfuscate: Vec<String>,
    /// Paths removed
    pub ignore: Vec<String>,
    /// Replacement for obfuscated strings
    #[serde(alias = "obfuscationPattern")]
    pub obfuscation_pattern: String,
    /// Regex substitutions on string values
    pub replace: Vec<ReplaceRule>,
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            obfuscate: DEFAULT_OBFUSCATE.iter().map(ToString::to_string).collect(),
            ignore: Vec::new(),
            obfuscation_pattern: DEFAULT_OBFUSCATION_PATTERN.to_string(),
            replace: Vec::new(),
        }
    }
}

/// A regex substitution applied to the string values under a path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceRule {
    /// Field path
    pub path: String,
    /// Regular expression
    pub pattern: String,
    /// Replacement, may reference groups as `$1`
    pub replacement: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Request,
    Response,
    Both,
}

impl Scope {
    fn includes(self, other: Scope) -> bool {
        self == Scope::Both || self == other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Headers,
    Body,
}

#[derive(Debug, Clone)]
enum Action {
    Obfuscate,
    Ignore,
    Replace(Regex, String),
}

#[derive(Debug, Clone)]
struct Rule {
    scope: Scope,
    target: Target,
    segments: Vec<String>,
    action: Action,
}

impl Rule {
    fn parse(path: &str, action: Action) -> Result<Self> {
        let mut parts = path.split('.').peekable();

        let scope = match parts.peek().copied() {
            Some("request") => {
                parts.next();
                Scope::Request
            }
            Some("response") => {
                parts.next();
                Scope::Response
            }
            _ => Scope::Both,
        };

        let target = match parts.next() {
            Some("headers") => Target::Headers,
            Some("body") => Target::Body,
            _ => {
                return Err(ProxyError::Config(format!(
                    "invalid preprocessor path '{path}': expected headers or body"
                )))
            }
        };

        let segments: Vec<String> = parts.map(ToString::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(ProxyError::Config(format!(
                "invalid preprocessor path '{path}': empty segment"
            )));
        }

        Ok(Self {
            scope,
            target,
            segments,
            action,
        })
    }
}

/// Applies redaction rules to records
#[derive(Debug, Clone)]
pub struct Preprocessor {
    rules: Vec<Rule>,
    pattern: String,
}

impl Preprocessor {
    /// Compile the configured rules
    ///
    /// # Errors
    ///
    /// Returns an error if a path or a replace pattern is invalid
    pub fn new(config: &PreprocessorConfig) -> Result<Self> {
        let mut rules = Vec::new();

        for path in &config.obfuscate {
            rules.push(Rule::parse(path, Action::Obfuscate)?);
        }
        for rule in &config.replace {
            let re = Regex::new(&rule.pattern).map_err(|e| {
                ProxyError::Config(format!("invalid replace pattern '{}': {}", rule.pattern, e))
            })?;
            rules.push(Rule::parse(&rule.path, Action::Replace(re, rule.replacement.clone()))?);
        }
        // removal last so obfuscated parents can still be dropped
        for path in &config.ignore {
            rules.push(Rule::parse(path, Action::Ignore)?);
        }

        debug!("Compiled {} preprocessor rules", rules.len());

        Ok(Self {
            rules,
            pattern: config.obfuscation_pattern.clone(),
        })
    }

    /// String written over obfuscated values
    #[must_use]
    pub fn obfuscation_pattern(&self) -> &str {
        &self.pattern
    }

    /// Redact a record
    ///
    /// The original JSON text of a body is dropped once a rule changes it.
    #[must_use]
    pub fn process(&self, mut record: Record) -> Record {
        let request_before = record
            .request
            .body_text
            .is_some()
            .then(|| record.request.body.clone());
        let response_before = record
            .response
            .body_text
            .is_some()
            .then(|| record.response.body.clone());

        for rule in &self.rules {
            if rule.scope.includes(Scope::Request) {
                let request = &mut record.request;
                self.apply(
                    rule,
                    &mut request.headers,
                    &mut request.body,
                    request.body_encoding,
                );
            }
            if rule.scope.includes(Scope::Response) {
                let response = &mut record.response;
                self.apply(
                    rule,
                    &mut response.headers,
                    &mut response.body,
                    response.body_encoding,
                );
            }
        }

        if request_before.is_some_and(|before| before != record.request.body) {
            record.request.body_text = None;
        }
        if response_before.is_some_and(|before| before != record.response.body) {
            record.response.body_text = None;
        }
        record
    }

    fn apply(
        &self,
        rule: &Rule,
        headers: &mut Headers,
        body: &mut Option<Value>,
        encoding: Option<BodyEncoding>,
    ) {
        match rule.target {
            Target::Headers => self.apply_headers(rule, headers),
            Target::Body => {
                if encoding.is_some() {
                    return;
                }
                let Some(value) = body.as_mut() else {
                    return;
                };
                if rule.segments.is_empty() {
                    if matches!(rule.action, Action::Ignore) {
                        *body = None;
                    } else {
                        self.transform(value, &rule.action, 0);
                    }
                    return;
                }
                self.walk(value, &rule.segments, &rule.action, 0);
            }
        }
    }

    fn apply_headers(&self, rule: &Rule, headers: &mut Headers) {
        let selector = rule.segments.first().map(String::as_str);
        let selected = |name: &str| match selector {
            None | Some("*") => true,
            Some(wanted) => wanted.eq_ignore_ascii_case(name),
        };

        match &rule.action {
            Action::Ignore => headers.retain(|name, _| !selected(name)),
            Action::Obfuscate => {
                for (_, value) in headers.iter_mut().filter(|(name, _)| selected(name)) {
                    value.clone_from(&self.pattern);
                }
            }
            Action::Replace(re, replacement) => {
                for (_, value) in headers.iter_mut().filter(|(name, _)| selected(name)) {
                    *value = re.replace_all(value, replacement.as_str()).into_owned();
                }
            }
        }
    }

    fn walk(&self, value: &mut Value, segments: &[String], action: &Action, depth: usize) {
        if depth > MAX_DEPTH {
            return;
        }
        let Some((segment, rest)) = segments.split_first() else {
            self.transform(value, action, depth);
            return;
        };

        match value {
            Value::Object(map) => {
                if rest.is_empty() && matches!(action, Action::Ignore) {
                    remove_keys(map, segment);
                    return;
                }
                for (key, child) in map.iter_mut() {
                    if segment == "*" || key == segment {
                        self.walk(child, rest, action, depth + 1);
                    }
                }
            }
            Value::Array(items) => {
                if segment == "*" {
                    if rest.is_empty() && matches!(action, Action::Ignore) {
                        items.clear();
                        return;
                    }
                    for item in items.iter_mut() {
                        self.walk(item, rest, action, depth + 1);
                    }
                } else if let Ok(index) = segment.parse::<usize>() {
                    if rest.is_empty() && matches!(action, Action::Ignore) {
                        if index < items.len() {
                            items.remove(index);
                        }
                        return;
                    }
                    if let Some(item) = items.get_mut(index) {
                        self.walk(item, rest, action, depth + 1);
                    }
                } else {
                    for item in items.iter_mut() {
                        self.walk(item, segments, action, depth + 1);
                    }
                }
            }
            _ => {}
        }
    }

    /// Rewrite a value in place, keeping its type
    fn transform(&self, value: &mut Value, action: &Action, depth: usize) {
        if depth > MAX_DEPTH {
            return;
        }
        match value {
            Value::Object(map) => {
                for child in map.values_mut() {
                    self.transform(child, action, depth + 1);
                }
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    self.transform(item, action, depth + 1);
                }
            }
            Value::String(s) => match action {
                Action::Obfuscate => s.clone_from(&self.pattern),
                Action::Replace(re, replacement) => {
                    *s = re.replace_all(s, replacement.as_str()).into_owned();
                }
                Action::Ignore => {}
            },
            Value::Number(_) => {
                if matches!(action, Action::Obfuscate) {
                    *value = Value::from(0);
                }
            }
            Value::Bool(b) => {
                if matches!(action, Action::Obfuscate) {
                    *b = false;
                }
            }
            Value::Null => {}
        }
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self {
            rules: DEFAULT_OBFUSCATE
                .iter()
                .filter_map(|path| Rule::parse(path, Action::Obfuscate).ok())
                .collect(),
            pattern: DEFAULT_OBFUSCATION_PATTERN.to_string(),
        }
    }
}

fn remove_keys(map: &mut Map<String, Value>, segment: &str) {
    if segment == "*" {
        map.clear();
    } else {
        map.remove(segment);
    }
}
