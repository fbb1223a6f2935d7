//! The `echo` tool: returns its `text` parameter unchanged.

use rmcp::model::JsonObject;
use serde_json::json;

use crate::error::HandlerError;
use crate::tools::handler::{Handler, HandlerFuture, ToolContext, UnaryHandler};
use crate::tools::spec::ToolSpec;

pub const ECHO_TOOL_NAME: &str = "echo";

/// Handler for the `echo` tool.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

impl EchoHandler {
    /// Catalog entry for this tool.
    pub fn spec() -> ToolSpec {
        ToolSpec::new(
            ECHO_TOOL_NAME,
            "Return the given text unchanged.",
            Handler::unary(EchoHandler),
        )
        .with_title("Echo")
        .with_schema(Self::input_schema())
        .with_category("diagnostics")
        .with_tag("text")
    }

    fn input_schema() -> JsonObject {
        let mut schema = JsonObject::new();
        schema.insert("type".to_string(), json!("object"));

        let mut properties = serde_json::Map::new();
        properties.insert(
            "text".to_string(),
            json!({
                "type": "string",
                "description": "Text to return."
            }),
        );

        schema.insert("properties".to_string(), json!(properties));
        schema.insert("required".to_string(), json!(["text"]));
        schema
    }
}

impl UnaryHandler for EchoHandler {
    fn call(&self, params: JsonObject, _ctx: ToolContext) -> HandlerFuture<'_> {
        Box::pin(async move {
            // Schema validation guarantees a string, but the handler may be
            // dispatched without a validator.
            let text = params
                .get("text")
                .and_then(|v| v.as_str())
                .ok_or_else(|| HandlerError::execution("missing 'text' parameter"))?;
            Ok(json!(text))
        })
    }
}
