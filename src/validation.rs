//! Parameter validation against a tool's declared JSON Schema.

use std::fmt;

use jsonschema::JSONSchema;
use rmcp::model::JsonObject;
use serde_json::Value;

use crate::error::FieldError;

/// Why a parameter set could not be accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationFailure {
    /// The parameters violate the schema.
    Invalid(Vec<FieldError>),
    /// The schema itself cannot be compiled.
    BadSchema(String),
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid(errors) => write!(f, "{} schema violation(s)", errors.len()),
            Self::BadSchema(msg) => write!(f, "Invalid tool schema: {}", msg),
        }
    }
}

impl std::error::Error for ValidationFailure {}

/// Validates invocation parameters against a schema.
pub trait ParameterValidator: Send + Sync {
    fn validate(&self, schema: &JsonObject, parameters: &JsonObject)
    -> Result<(), ValidationFailure>;
}

/// JSON Schema (draft 7 and later) validator backed by the `jsonschema` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSchemaValidator;

impl JsonSchemaValidator {
    /// Check that a schema compiles, without validating anything against it.
    pub fn check_schema(schema: &JsonObject) -> Result<(), ValidationFailure> {
        let schema = Value::Object(schema.clone());
        JSONSchema::compile(&schema)
            .map(|_| ())
            .map_err(|e| ValidationFailure::BadSchema(e.to_string()))
    }
}

impl ParameterValidator for JsonSchemaValidator {
    fn validate(
        &self,
        schema: &JsonObject,
        parameters: &JsonObject,
    ) -> Result<(), ValidationFailure> {
        let schema = Value::Object(schema.clone());
        let compiled = JSONSchema::compile(&schema)
            .map_err(|e| ValidationFailure::BadSchema(e.to_string()))?;

        let instance = Value::Object(parameters.clone());
        let errors: Vec<FieldError> = match compiled.validate(&instance) {
            Ok(()) => return Ok(()),
            Err(errors) => errors
                .map(|e| FieldError::new(e.instance_path.to_string(), e.to_string()))
                .collect(),
        };
        Err(ValidationFailure::Invalid(errors))
    }
}

/// Accepts everything. Useful for tools whose handler does its own parsing.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllValidator;

impl ParameterValidator for AcceptAllValidator {
    fn validate(&self, _schema: &JsonObject, _parameters: &JsonObject) -> Result<(), ValidationFailure> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> JsonObject {
        value.as_object().cloned().unwrap()
    }

    fn schema() -> JsonObject {
        obj(json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" },
                "mode": { "type": "string", "enum": ["upper", "lower"] },
                "count": { "type": "integer", "minimum": 0, "maximum": 10 }
            },
            "required": ["text"]
        }))
    }

    #[test]
    fn test_valid_parameters() {
        let params = obj(json!({ "text": "hi", "mode": "upper", "count": 3 }));
        assert_eq!(JsonSchemaValidator.validate(&schema(), &params), Ok(()));
    }

    #[test]
    fn test_missing_required_field() {
        let params = obj(json!({ "count": 1 }));
        match JsonSchemaValidator.validate(&schema(), &params) {
            Err(ValidationFailure::Invalid(errors)) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].message.contains("text"));
            }
            other => panic!("expected invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_reports_every_violation_with_pointer() {
        let params = obj(json!({ "text": 5, "mode": "sideways", "count": 11 }));
        match JsonSchemaValidator.validate(&schema(), &params) {
            Err(ValidationFailure::Invalid(errors)) => {
                let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
                assert!(fields.contains(&"/text"));
                assert!(fields.contains(&"/mode"));
                assert!(fields.contains(&"/count"));
            }
            other => panic!("expected invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_schema() {
        let bad = obj(json!({ "type": "no-such-type" }));
        assert!(matches!(
            JsonSchemaValidator.validate(&bad, &JsonObject::new()),
            Err(ValidationFailure::BadSchema(_))
        ));
        assert!(JsonSchemaValidator::check_schema(&bad).is_err());
        assert!(JsonSchemaValidator::check_schema(&schema()).is_ok());
    }

    #[test]
    fn test_accept_all() {
        let params = obj(json!({ "anything": true }));
        assert_eq!(AcceptAllValidator.validate(&schema(), &params), Ok(()));
    }
}
