//! Error taxonomy for the registry and dispatcher.
//!
//! Two disjoint classes reach a caller:
//! - [`ProtocolError`]: the server could not process the request. Reported
//!   as a top-level failure envelope with a JSON-RPC style numeric code.
//! - [`ToolError`]: the tool ran but its own operation failed. Reported
//!   inside a *successful* envelope flagged `isError: true`.
//!
//! Handlers never throw; they return [`HandlerResult`], whose error side is
//! the closed [`HandlerError`] enum. Classification is a total `match`.

use std::fmt;

use rmcp::model::ErrorCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::types::{PermissionTag, ToolName};

/// JSON-RPC code for a malformed request.
pub const MALFORMED_REQUEST_ERROR_CODE: i32 = -32600;
/// JSON-RPC code for an unknown method; used for unknown or disabled tools.
pub const TOOL_NOT_FOUND_ERROR_CODE: i32 = -32601;
/// JSON-RPC code for invalid params.
pub const INVALID_PARAMETERS_ERROR_CODE: i32 = -32602;
/// JSON-RPC code for an internal error.
pub const INTERNAL_FAULT_ERROR_CODE: i32 = -32603;
/// Server-defined code for a caller lacking the tool's permission level.
pub const ACCESS_DENIED_ERROR_CODE: i32 = -32001;

/// One schema violation found while validating invocation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// JSON pointer to the offending value ("" for the parameters root).
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Failures surfaced at the envelope level, never as tool content.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// The tool is absent or disabled.
    ToolNotFound(ToolName),
    /// The parameters do not satisfy the tool's schema.
    InvalidParameters(Vec<FieldError>),
    /// The caller is not allowed to invoke a tool at this permission level.
    AccessDenied {
        tool: ToolName,
        required: PermissionTag,
    },
    /// Infrastructure fault or handler contract violation.
    InternalFault(String),
    /// The request itself is structurally unusable.
    MalformedRequest(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ToolNotFound(name) => write!(f, "Tool not found: {}", name),
            Self::InvalidParameters(errors) => {
                write!(f, "Invalid parameters")?;
                for (i, err) in errors.iter().enumerate() {
                    let sep = if i == 0 { ": " } else { "; " };
                    if err.field.is_empty() {
                        write!(f, "{}{}", sep, err.message)?;
                    } else {
                        write!(f, "{}{}: {}", sep, err.field, err.message)?;
                    }
                }
                Ok(())
            }
            Self::AccessDenied { tool, required } => {
                write!(f, "Access denied: tool {} requires {} permission", tool, required)
            }
            Self::InternalFault(msg) => write!(f, "Internal error: {}", msg),
            Self::MalformedRequest(msg) => write!(f, "Malformed request: {}", msg),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl ProtocolError {
    /// Numeric protocol code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Self::ToolNotFound(_) => TOOL_NOT_FOUND_ERROR_CODE,
            Self::InvalidParameters(_) => INVALID_PARAMETERS_ERROR_CODE,
            Self::AccessDenied { .. } => ACCESS_DENIED_ERROR_CODE,
            Self::InternalFault(_) => INTERNAL_FAULT_ERROR_CODE,
            Self::MalformedRequest(_) => MALFORMED_REQUEST_ERROR_CODE,
        }
    }

    /// Short machine-readable kind, used in logs and error data.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ToolNotFound(_) => "tool_not_found",
            Self::InvalidParameters(_) => "invalid_parameters",
            Self::AccessDenied { .. } => "access_denied",
            Self::InternalFault(_) => "internal_fault",
            Self::MalformedRequest(_) => "malformed_request",
        }
    }

    /// Structured error data attached to the failure envelope.
    pub fn data(&self) -> Option<Value> {
        match self {
            Self::ToolNotFound(name) => Some(json!({ "kind": self.kind(), "tool": name })),
            Self::InvalidParameters(errors) => {
                Some(json!({ "kind": self.kind(), "errors": errors }))
            }
            Self::AccessDenied { tool, required } => Some(json!({
                "kind": self.kind(),
                "tool": tool,
                "required": required,
            })),
            Self::InternalFault(_) | Self::MalformedRequest(_) => {
                Some(json!({ "kind": self.kind() }))
            }
        }
    }

    /// Convert this error to an MCP ErrorData for protocol responses.
    pub fn to_mcp_error(&self) -> rmcp::ErrorData {
        rmcp::ErrorData::new(ErrorCode(self.code()), self.to_string(), self.data())
    }
}

/// Business-level failure of a tool's own logic (e.g. "task not found").
#[derive(Debug, Clone, PartialEq)]
pub struct ToolError {
    pub message: String,
    pub data: Option<Value>,
}

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Content payload carried by the `isError` success envelope.
    pub fn to_content(&self) -> Value {
        match &self.data {
            Some(data) => json!({ "error": self.message, "data": data }),
            None => json!({ "error": self.message }),
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tool execution failed: {}", self.message)
    }
}

impl std::error::Error for ToolError {}

/// Closed set of ways a handler can fail.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerError {
    /// Expected business failure; delivered as tool content.
    Execution(ToolError),
    /// Handler bug or infrastructure fault; delivered as `InternalFault`.
    Fault(String),
}

impl HandlerError {
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(ToolError::new(message))
    }

    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault(message.into())
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Execution(err) => write!(f, "{}", err),
            Self::Fault(msg) => write!(f, "Handler fault: {}", msg),
        }
    }
}

impl std::error::Error for HandlerError {}

impl From<ToolError> for HandlerError {
    fn from(err: ToolError) -> Self {
        Self::Execution(err)
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::Fault(err.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Fault(format!("serialization error: {}", err))
    }
}

/// Outcome of one handler execution.
pub type HandlerResult = Result<Value, HandlerError>;

/// Errors raised by catalog mutations.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// A live entry already uses this name.
    DuplicateName(ToolName),
    /// The `ToolSpec` is unusable (empty name, non-object schema).
    InvalidSpec { name: ToolName, reason: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateName(name) => write!(f, "Tool '{}' is already registered", name),
            Self::InvalidSpec { name, reason } => {
                write!(f, "Invalid spec for tool '{}': {}", name, reason)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// The output sink no longer accepts envelopes (caller went away).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

impl fmt::Display for SinkClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "output sink closed")
    }
}

impl std::error::Error for SinkClosed {}
