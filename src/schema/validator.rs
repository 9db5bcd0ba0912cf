//! JSON schema validation over `serde_json` values

use std::sync::Arc;

use dashmap::DashMap;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use super::formats::{
    BooleanFormat, DateTimeFormat, IntegerFormat, SemverRangeFormat, SemverVersionFormat,
    UuidFormat,
};
use super::{child_path, index_path, FormatRule, ValidationError, Violation, MAX_DEPTH};

/// Keywords whose value is a single subschema
const SCHEMA_KEYWORDS: &[&str] = &["additionalProperties", "not", "items"];

/// Keywords whose value is a list of subschemas
const SCHEMA_LIST_KEYWORDS: &[&str] = &["allOf", "anyOf", "oneOf", "items"];

/// Keywords whose value maps names to subschemas
const SCHEMA_MAP_KEYWORDS: &[&str] = &["properties", "definitions", "$defs"];

/// Validates documents against JSON schemas
///
/// Named schemas registered with [`SchemaValidator::register_schema`] can be
/// referenced from any schema as `{"$ref": "name"}` or
/// `{"$ref": "name#/definitions/part"}`.
pub struct SchemaValidator {
    schemas: DashMap<String, Value>,
    formats: DashMap<String, Arc<dyn FormatRule>>,
    patterns: DashMap<String, Regex>,
}

impl SchemaValidator {
    /// Create a validator with the built-in formats
    #[must_use]
    pub fn new() -> Self {
        let validator = Self::empty();
        validator.register_format(Arc::new(DateTimeFormat));
        validator.register_format(Arc::new(SemverVersionFormat));
        validator.register_format(Arc::new(SemverRangeFormat));
        validator.register_format(Arc::new(BooleanFormat));
        validator.register_format(Arc::new(IntegerFormat));
        validator.register_format(Arc::new(UuidFormat));
        validator
    }

    /// Create a validator without any formats
    #[must_use]
    pub fn empty() -> Self {
        Self {
            schemas: DashMap::new(),
            formats: DashMap::new(),
            patterns: DashMap::new(),
        }
    }

    /// Register a named schema document
    pub fn register_schema(&self, name: &str, schema: Value) {
        self.schemas.insert(name.to_string(), schema);
    }

    /// Register a format rule, replacing any rule with the same name
    pub fn register_format(&self, rule: Arc<dyn FormatRule>) {
        self.formats.insert(rule.name().to_string(), rule);
    }

    /// Check if a format is known
    #[must_use]
    pub fn has_format(&self, name: &str) -> bool {
        self.formats.contains_key(name)
    }

    /// Validate a document
    ///
    /// With `strict = false` every object schema accepts additional
    /// properties. With `strict = true` object schemas declaring `properties`
    /// reject undeclared ones unless they say otherwise.
    ///
    /// # Errors
    ///
    /// Returns every violation found
    pub fn validate(&self, value: &Value, schema: &Value, strict: bool) -> Result<(), ValidationError> {
        let prepared = prepare(schema, strict, 0);
        let mut violations = Vec::new();
        self.check(value, &prepared, &prepared, strict, "$", 0, &mut violations);

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(violations))
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn check(
        &self,
        value: &Value,
        schema: &Value,
        root: &Value,
        strict: bool,
        path: &str,
        depth: usize,
        out: &mut Vec<Violation>,
    ) {
        if depth > MAX_DEPTH {
            debug!("Schema depth limit reached at {}", path);
            return;
        }

        let schema = match schema {
            Value::Bool(true) => return,
            Value::Bool(false) => {
                out.push(Violation::new(path, "false", "no value is allowed here"));
                return;
            }
            Value::Object(schema) => schema,
            _ => return,
        };

        if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
            match self.resolve(reference, root, strict) {
                Some((target, Some(document))) => {
                    self.check(value, &target, &document, strict, path, depth + 1, out);
                }
                Some((target, None)) => {
                    self.check(value, &target, root, strict, path, depth + 1, out);
                }
                None => out.push(Violation::new(
                    path,
                    "$ref",
                    format!("unresolvable reference '{reference}'"),
                )),
            }
        }

        if let Some(expected) = schema.get("type") {
            if !type_matches(value, expected) {
                out.push(Violation::new(
                    path,
                    "type",
                    format!("expected type {expected}, got {}", type_name(value)),
                ));
                return;
            }
        }

        if let Some(options) = schema.get("enum").and_then(Value::as_array) {
            if !options.iter().any(|o| json_equal(o, value)) {
                out.push(Violation::new(path, "enum", "value is not one of the allowed values"));
            }
        }

        if let Some(constant) = schema.get("const") {
            if !json_equal(constant, value) {
                out.push(Violation::new(path, "const", format!("expected constant {constant}")));
            }
        }

        match value {
            Value::Number(n) => Self::check_number(n.as_f64().unwrap_or_default(), schema, path, out),
            Value::String(s) => self.check_string(s, schema, path, out),
            Value::Array(items) => {
                self.check_array(items, schema, root, strict, path, depth, out);
            }
            Value::Object(object) => {
                self.check_object(object, schema, root, strict, path, depth, out);
            }
            _ => {}
        }

        if let Some(format) = schema.get("format").and_then(Value::as_str) {
            match self.formats.get(format) {
                Some(rule) if !rule.validate(value) => out.push(Violation::new(
                    path,
                    "format",
                    format!("value does not match format '{format}'"),
                )),
                Some(_) => {}
                None => debug!("Unknown format '{}' ignored", format),
            }
        }

        self.check_combinators(value, schema, root, strict, path, depth, out);
    }

    fn check_number(n: f64, schema: &Map<String, Value>, path: &str, out: &mut Vec<Violation>) {
        if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
            if n < min {
                out.push(Violation::new(path, "minimum", format!("{n} is less than {min}")));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
            if n > max {
                out.push(Violation::new(path, "maximum", format!("{n} is greater than {max}")));
            }
        }
        if let Some(min) = schema.get("exclusiveMinimum").and_then(Value::as_f64) {
            if n <= min {
                out.push(Violation::new(
                    path,
                    "exclusiveMinimum",
                    format!("{n} is not greater than {min}"),
                ));
            }
        }
        if let Some(max) = schema.get("exclusiveMaximum").and_then(Value::as_f64) {
            if n >= max {
                out.push(Violation::new(
                    path,
                    "exclusiveMaximum",
                    format!("{n} is not less than {max}"),
                ));
            }
        }
    }

    fn check_string(&self, s: &str, schema: &Map<String, Value>, path: &str, out: &mut Vec<Violation>) {
        let length = s.chars().count() as u64;

        if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
            if length < min {
                out.push(Violation::new(path, "minLength", format!("shorter than {min} characters")));
            }
        }
        if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
            if length > max {
                out.push(Violation::new(path, "maxLength", format!("longer than {max} characters")));
            }
        }

        if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
            match self.pattern(pattern) {
                Some(re) if !re.is_match(s) => out.push(Violation::new(
                    path,
                    "pattern",
                    format!("does not match pattern '{pattern}'"),
                )),
                Some(_) => {}
                None => out.push(Violation::new(
                    path,
                    "pattern",
                    format!("invalid pattern '{pattern}'"),
                )),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn check_array(
        &self,
        items: &[Value],
        schema: &Map<String, Value>,
        root: &Value,
        strict: bool,
        path: &str,
        depth: usize,
        out: &mut Vec<Violation>,
    ) {
        let count = items.len() as u64;

        if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
            if count < min {
                out.push(Violation::new(path, "minItems", format!("fewer than {min} items")));
            }
        }
        if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
            if count > max {
                out.push(Violation::new(path, "maxItems", format!("more than {max} items")));
            }
        }

        match schema.get("items") {
            Some(Value::Array(positional)) => {
                for (i, (item, item_schema)) in items.iter().zip(positional).enumerate() {
                    self.check(item, item_schema, root, strict, &index_path(path, i), depth + 1, out);
                }
            }
            Some(item_schema) => {
                for (i, item) in items.iter().enumerate() {
                    self.check(item, item_schema, root, strict, &index_path(path, i), depth + 1, out);
                }
            }
            None => {}
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn check_object(
        &self,
        object: &Map<String, Value>,
        schema: &Map<String, Value>,
        root: &Value,
        strict: bool,
        path: &str,
        depth: usize,
        out: &mut Vec<Violation>,
    ) {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(name) {
                    out.push(Violation::new(
                        path,
                        "required",
                        format!("missing required property '{name}'"),
                    ));
                }
            }
        }

        let properties = schema.get("properties").and_then(Value::as_object);

        for (name, property) in object {
            let property_path = child_path(path, name);

            if let Some(property_schema) = properties.and_then(|p| p.get(name)) {
                self.check(property, property_schema, root, strict, &property_path, depth + 1, out);
                continue;
            }

            match schema.get("additionalProperties") {
                Some(Value::Bool(false)) => out.push(Violation::new(
                    path,
                    "additionalProperties",
                    format!("additional properties are not allowed ('{name}' was unexpected)"),
                )),
                Some(extra @ Value::Object(_)) => {
                    self.check(property, extra, root, strict, &property_path, depth + 1, out);
                }
                _ => {}
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn check_combinators(
        &self,
        value: &Value,
        schema: &Map<String, Value>,
        root: &Value,
        strict: bool,
        path: &str,
        depth: usize,
        out: &mut Vec<Violation>,
    ) {
        if let Some(all) = schema.get("allOf").and_then(Value::as_array) {
            for sub in all {
                self.check(value, sub, root, strict, path, depth + 1, out);
            }
        }

        if let Some(any) = schema.get("anyOf").and_then(Value::as_array) {
            let passing = any
                .iter()
                .filter(|sub| self.passes(value, sub, root, strict, path, depth))
                .count();
            if passing == 0 {
                out.push(Violation::new(path, "anyOf", "value matches none of the schemas"));
            }
        }

        if let Some(one) = schema.get("oneOf").and_then(Value::as_array) {
            let passing = one
                .iter()
                .filter(|sub| self.passes(value, sub, root, strict, path, depth))
                .count();
            if passing != 1 {
                out.push(Violation::new(
                    path,
                    "oneOf",
                    format!("value matches {passing} schemas, expected exactly one"),
                ));
            }
        }

        if let Some(not) = schema.get("not") {
            if self.passes(value, not, root, strict, path, depth) {
                out.push(Violation::new(path, "not", "value must not match the schema"));
            }
        }
    }

    fn passes(&self, value: &Value, schema: &Value, root: &Value, strict: bool, path: &str, depth: usize) -> bool {
        let mut scratch = Vec::new();
        self.check(value, schema, root, strict, path, depth + 1, &mut scratch);
        scratch.is_empty()
    }

    /// Resolve a reference to its target schema and, for named documents, the new root
    fn resolve(&self, reference: &str, root: &Value, strict: bool) -> Option<(Value, Option<Value>)> {
        let (name, pointer) = reference.split_once('#').unwrap_or((reference, ""));

        if name.is_empty() {
            return root.pointer(pointer).cloned().map(|target| (target, None));
        }

        let document = prepare(self.schemas.get(name)?.value(), strict, 0);
        let target = document.pointer(pointer)?.clone();
        Some((target, Some(document)))
    }

    fn pattern(&self, pattern: &str) -> Option<Regex> {
        if let Some(re) = self.patterns.get(pattern) {
            return Some(re.clone());
        }
        let re = Regex::new(pattern).ok()?;
        self.patterns.insert(pattern.to_string(), re.clone());
        Some(re)
    }
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply the strictness policy to every object node of a schema
fn prepare(schema: &Value, strict: bool, depth: usize) -> Value {
    let Value::Object(map) = schema else {
        return schema.clone();
    };
    if depth > MAX_DEPTH {
        return schema.clone();
    }

    let mut prepared = Map::with_capacity(map.len());
    for (key, value) in map {
        let value = if SCHEMA_MAP_KEYWORDS.contains(&key.as_str()) {
            match value {
                Value::Object(children) => Value::Object(
                    children
                        .iter()
                        .map(|(name, child)| (name.clone(), prepare(child, strict, depth + 1)))
                        .collect(),
                ),
                other => other.clone(),
            }
        } else if SCHEMA_LIST_KEYWORDS.contains(&key.as_str()) && value.is_array() {
            Value::Array(
                value
                    .as_array()
                    .map(|list| list.iter().map(|s| prepare(s, strict, depth + 1)).collect())
                    .unwrap_or_default(),
            )
        } else if SCHEMA_KEYWORDS.contains(&key.as_str()) {
            prepare(value, strict, depth + 1)
        } else {
            value.clone()
        };
        prepared.insert(key.clone(), value);
    }

    if strict {
        if prepared.contains_key("properties") && !prepared.contains_key("additionalProperties") {
            prepared.insert("additionalProperties".to_string(), Value::Bool(false));
        }
    } else if is_object_schema(&prepared) {
        prepared.insert("additionalProperties".to_string(), Value::Bool(true));
    }

    Value::Object(prepared)
}

fn is_object_schema(schema: &Map<String, Value>) -> bool {
    if schema.contains_key("properties") || schema.contains_key("additionalProperties") {
        return true;
    }
    match schema.get("type") {
        Some(Value::String(t)) => t == "object",
        Some(Value::Array(types)) => types.iter().any(|t| t == "object"),
        _ => false,
    }
}

fn type_matches(value: &Value, expected: &Value) -> bool {
    match expected {
        Value::String(t) => is_type(value, t),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| is_type(value, t)),
        _ => true,
    }
}

fn is_type(value: &Value, name: &str) -> bool {
    match name {
        "null" => value.is_null(),
        "boolean" => value.is_boolean(),
        "string" => value.is_string(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "number" => value.is_number(),
        "integer" => match value {
            Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0),
            _ => false,
        },
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Equality that treats `1` and `1.0` as the same number
fn json_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}
