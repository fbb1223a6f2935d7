//! Protocol-level response envelopes.
//!
//! Every invocation produces an ordered sequence of envelopes tagged with
//! its correlation id. Exactly one of them is terminal (`final: true`, or a
//! `failure`), and it is always the last one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProtocolError, ToolError};
use crate::types::CorrelationId;

/// Metadata attached to every success envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    /// Intermediate chunk of a streaming invocation.
    pub partial: bool,
    /// Terminating chunk of the invocation.
    #[serde(rename = "final")]
    pub is_final: bool,
    pub timestamp: DateTime<Utc>,
    /// The tool ran but reported a business-level failure.
    #[serde(default)]
    pub is_error: bool,
    /// Handler-supplied keys, flattened next to the fixed ones.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EnvelopeMetadata {
    fn new(partial: bool, is_final: bool, extra: Option<Map<String, Value>>) -> Self {
        let mut extra = extra.unwrap_or_default();
        // Fixed keys always win over handler-supplied ones.
        for reserved in ["partial", "final", "timestamp", "isError"] {
            extra.remove(reserved);
        }
        Self {
            partial,
            is_final,
            timestamp: Utc::now(),
            is_error: false,
            extra,
        }
    }
}

/// Discriminated envelope payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum EnvelopeBody {
    Success {
        content: Value,
        metadata: EnvelopeMetadata,
    },
    Failure {
        code: i32,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
}

/// One discrete response unit delivered to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub correlation_id: CorrelationId,
    #[serde(flatten)]
    pub body: EnvelopeBody,
}

impl ResponseEnvelope {
    /// Intermediate success chunk (`partial: true, final: false`).
    pub fn partial(
        correlation_id: CorrelationId,
        content: Value,
        metadata: Option<Map<String, Value>>,
    ) -> Self {
        Self {
            correlation_id,
            body: EnvelopeBody::Success {
                content,
                metadata: EnvelopeMetadata::new(true, false, metadata),
            },
        }
    }

    /// Terminal success (`partial: false, final: true`).
    pub fn complete(
        correlation_id: CorrelationId,
        content: Value,
        metadata: Option<Map<String, Value>>,
    ) -> Self {
        Self {
            correlation_id,
            body: EnvelopeBody::Success {
                content,
                metadata: EnvelopeMetadata::new(false, true, metadata),
            },
        }
    }

    /// Terminal success carrying a tool execution error (`isError: true`).
    pub fn tool_error(correlation_id: CorrelationId, error: &ToolError) -> Self {
        let mut metadata = EnvelopeMetadata::new(false, true, None);
        metadata.is_error = true;
        Self {
            correlation_id,
            body: EnvelopeBody::Success {
                content: error.to_content(),
                metadata,
            },
        }
    }

    /// Terminal protocol failure.
    pub fn failure(correlation_id: CorrelationId, error: &ProtocolError) -> Self {
        Self {
            correlation_id,
            body: EnvelopeBody::Failure {
                code: error.code(),
                message: error.to_string(),
                data: error.data(),
            },
        }
    }

    /// Whether this envelope terminates its invocation.
    pub fn is_final(&self) -> bool {
        match &self.body {
            EnvelopeBody::Success { metadata, .. } => metadata.is_final,
            EnvelopeBody::Failure { .. } => true,
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(&self.body, EnvelopeBody::Success { metadata, .. } if metadata.partial)
    }

    /// Whether this is a success envelope flagged as a tool execution error.
    pub fn is_tool_error(&self) -> bool {
        matches!(&self.body, EnvelopeBody::Success { metadata, .. } if metadata.is_error)
    }

    /// Content of a success envelope.
    pub fn content(&self) -> Option<&Value> {
        match &self.body {
            EnvelopeBody::Success { content, .. } => Some(content),
            EnvelopeBody::Failure { .. } => None,
        }
    }

    /// Protocol error code of a failure envelope.
    pub fn failure_code(&self) -> Option<i32> {
        match &self.body {
            EnvelopeBody::Failure { code, .. } => Some(*code),
            EnvelopeBody::Success { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::INVALID_PARAMETERS_ERROR_CODE;
    use serde_json::json;

    #[test]
    fn test_partial_and_complete_flags() {
        let id = CorrelationId::new("c1");
        let p = ResponseEnvelope::partial(id.clone(), json!({ "n": 1 }), None);
        assert!(p.is_partial());
        assert!(!p.is_final());

        let c = ResponseEnvelope::complete(id, json!({ "done": true }), None);
        assert!(!c.is_partial());
        assert!(c.is_final());
        assert!(!c.is_tool_error());
    }

    #[test]
    fn test_success_wire_shape() {
        let mut extra = Map::new();
        extra.insert("progress".to_string(), json!(0.5));
        extra.insert("final".to_string(), json!(true));
        let env = ResponseEnvelope::partial(CorrelationId::new("c1"), json!("hi"), Some(extra));
        let wire = serde_json::to_value(&env).unwrap();

        assert_eq!(wire["correlationId"], "c1");
        assert_eq!(wire["status"], "success");
        assert_eq!(wire["content"], "hi");
        assert_eq!(wire["metadata"]["partial"], true);
        // reserved key from the handler is dropped
        assert_eq!(wire["metadata"]["final"], false);
        assert_eq!(wire["metadata"]["isError"], false);
        assert_eq!(wire["metadata"]["progress"], 0.5);
        assert!(wire["metadata"]["timestamp"].is_string());
    }

    #[test]
    fn test_failure_wire_shape_and_parse() {
        let err = ProtocolError::InvalidParameters(vec![]);
        let env = ResponseEnvelope::failure(CorrelationId::new("c2"), &err);
        assert!(env.is_final());
        assert_eq!(env.failure_code(), Some(INVALID_PARAMETERS_ERROR_CODE));

        let raw = serde_json::to_string(&env).unwrap();
        let parsed: ResponseEnvelope = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, env);
        assert_eq!(parsed.content(), None);
    }

    #[test]
    fn test_tool_error_envelope() {
        let env = ResponseEnvelope::tool_error(CorrelationId::new("c3"), &ToolError::new("nope"));
        assert!(env.is_final());
        assert!(env.is_tool_error());
        assert_eq!(env.content(), Some(&json!({ "error": "nope" })));
    }
}
