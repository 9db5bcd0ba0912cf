//! Schema inference from recorded documents

use serde_json::{json, Map, Value};

use super::{SchemaGenerator, MAX_DEPTH};

/// Infers a schema from the shape of a document
///
/// Objects list their properties without `required`, arrays take the schema of
/// their first element and timestamps get `format: date-time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct InferredSchemaGenerator;

impl InferredSchemaGenerator {
    /// Create a generator
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn infer(value: &Value, depth: usize) -> Value {
        if depth > MAX_DEPTH {
            return json!({});
        }

        match value {
            Value::Null => json!({"type": "null"}),
            Value::Bool(_) => json!({"type": "boolean"}),
            Value::Number(n) if n.is_i64() || n.is_u64() => json!({"type": "integer"}),
            Value::Number(_) => json!({"type": "number"}),
            Value::String(s) if chrono::DateTime::parse_from_rfc3339(s).is_ok() => {
                json!({"type": "string", "format": "date-time"})
            }
            Value::String(_) => json!({"type": "string"}),
            Value::Array(items) => match items.first() {
                Some(first) => json!({"type": "array", "items": Self::infer(first, depth + 1)}),
                None => json!({"type": "array"}),
            },
            Value::Object(object) => {
                let properties: Map<String, Value> = object
                    .iter()
                    .map(|(name, child)| (name.clone(), Self::infer(child, depth + 1)))
                    .collect();
                json!({"type": "object", "properties": properties})
            }
        }
    }
}

impl SchemaGenerator for InferredSchemaGenerator {
    fn generate(&self, value: &Value) -> Option<Value> {
        if value.is_null() {
            return None;
        }
        Some(Self::infer(value, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaValidator;

    #[test]
    fn test_infer_nested_document() {
        let document = json!({
            "id": "12",
            "count": 3,
            "ratio": 0.5,
            "creationTime": "2024-03-01T12:00:00.000Z",
            "tags": ["a", "b"]
        });

        let schema = InferredSchemaGenerator.generate(&document).unwrap();

        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["count"]["type"], "integer");
        assert_eq!(schema["properties"]["ratio"]["type"], "number");
        assert_eq!(schema["properties"]["creationTime"]["format"], "date-time");
        assert_eq!(schema["properties"]["tags"]["items"]["type"], "string");
    }

    #[test]
    fn test_generated_schema_validates_source() {
        let document = json!({"managedObject": {"id": "1", "name": "device"}, "values": [1, 2]});
        let schema = InferredSchemaGenerator.generate(&document).unwrap();

        let validator = SchemaValidator::new();
        assert!(validator.validate(&document, &schema, true).is_ok());

        let extended = json!({"managedObject": {"id": "1", "name": "device", "owner": "x"}, "values": []});
        assert!(validator.validate(&extended, &schema, false).is_ok());
        assert!(validator.validate(&extended, &schema, true).is_err());
    }

    #[test]
    fn test_null_has_no_schema() {
        assert!(InferredSchemaGenerator::new().generate(&Value::Null).is_none());
    }
}
