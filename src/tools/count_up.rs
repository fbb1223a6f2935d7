//! The `count_up` tool: streams `{n}` for `n` in `1..=to`, then `{done: true}`.

use std::time::Duration;

use rmcp::model::JsonObject;
use serde_json::json;
use tracing::debug;

use crate::framer::Framer;
use crate::tools::handler::{Handler, HandlerFuture, StreamingHandler, ToolContext};
use crate::tools::spec::ToolSpec;

pub const COUNT_UP_TOOL_NAME: &str = "count_up";

const DEFAULT_TO: u64 = 3;
const MAX_TO: u64 = 1000;
const MAX_DELAY_MS: u64 = 10_000;

/// Handler for the `count_up` streaming tool.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountUpHandler;

impl CountUpHandler {
    /// Catalog entry for this tool.
    pub fn spec() -> ToolSpec {
        ToolSpec::new(
            COUNT_UP_TOOL_NAME,
            "Count from 1 up to `to`, emitting one partial result per number.",
            Handler::streaming(CountUpHandler),
        )
        .with_title("Count up")
        .with_schema(Self::input_schema())
        .with_category("diagnostics")
        .with_tag("stream")
    }

    fn input_schema() -> JsonObject {
        let mut schema = JsonObject::new();
        schema.insert("type".to_string(), json!("object"));

        let mut properties = serde_json::Map::new();
        properties.insert(
            "to".to_string(),
            json!({
                "type": "integer",
                "description": "Last number to emit (default: 3).",
                "minimum": 0,
                "maximum": MAX_TO,
                "default": DEFAULT_TO
            }),
        );
        properties.insert(
            "delayMs".to_string(),
            json!({
                "type": "integer",
                "description": "Pause between numbers in milliseconds (default: 0).",
                "minimum": 0,
                "maximum": MAX_DELAY_MS,
                "default": 0
            }),
        );

        schema.insert("properties".to_string(), json!(properties));
        schema.insert("required".to_string(), json!([]));
        schema
    }
}

impl StreamingHandler for CountUpHandler {
    fn stream<'a>(
        &'a self,
        params: JsonObject,
        ctx: ToolContext,
        framer: &'a mut Framer,
    ) -> HandlerFuture<'a> {
        Box::pin(async move {
            let to = params
                .get("to")
                .and_then(|v| v.as_u64())
                .unwrap_or(DEFAULT_TO)
                .min(MAX_TO);
            let delay = params
                .get("delayMs")
                .and_then(|v| v.as_u64())
                .unwrap_or(0)
                .min(MAX_DELAY_MS);

            for n in 1..=to {
                if delay > 0 {
                    tokio::select! {
                        _ = ctx.cancellation.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                    }
                }
                if ctx.cancellation.is_cancelled() || framer.send(json!({ "n": n }), None).await.is_err() {
                    debug!(correlation_id = %ctx.correlation_id, at = n, "count_up cancelled");
                    break;
                }
            }

            // The dispatcher completes the stream with this result.
            Ok(json!({ "done": true }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CallerContext;
    use crate::dispatcher::close_stream;
    use crate::envelope::ResponseEnvelope;
    use crate::types::{CorrelationId, ToolName};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn ctx(token: CancellationToken) -> ToolContext {
        ToolContext {
            correlation_id: CorrelationId::new("c1"),
            tool_name: ToolName::new(COUNT_UP_TOOL_NAME),
            caller: CallerContext::local_admin(),
            cancellation: token,
        }
    }

    #[tokio::test]
    async fn test_count_up_streams_then_completes() {
        let (tx, mut rx) = mpsc::channel::<ResponseEnvelope>(16);
        let token = CancellationToken::new();
        let mut framer = Framer::channel(CorrelationId::new("c1"), tx, token.clone());

        let mut params = JsonObject::new();
        params.insert("to".to_string(), json!(2));
        let outcome = CountUpHandler.stream(params, ctx(token), &mut framer).await;
        assert!(framer.is_open());
        close_stream(&mut framer, outcome).await;
        drop(framer);

        let mut contents = Vec::new();
        while let Some(env) = rx.recv().await {
            contents.push((env.content().cloned().unwrap(), env.is_final()));
        }
        assert_eq!(
            contents,
            vec![
                (json!({ "n": 1 }), false),
                (json!({ "n": 2 }), false),
                (json!({ "done": true }), true),
            ]
        );
    }

    #[tokio::test]
    async fn test_count_up_stops_when_cancelled() {
        let (tx, mut rx) = mpsc::channel::<ResponseEnvelope>(16);
        let token = CancellationToken::new();
        token.cancel();
        let mut framer = Framer::channel(CorrelationId::new("c1"), tx, token.clone());

        let outcome = CountUpHandler
            .stream(JsonObject::new(), ctx(token), &mut framer)
            .await;
        close_stream(&mut framer, outcome).await;
        drop(framer);

        let env = rx.recv().await.unwrap();
        assert!(env.is_final());
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_count_up_spec() {
        let spec = CountUpHandler::spec();
        assert!(spec.handler.is_streaming());
        assert_eq!(spec.parameter_schema["properties"]["to"]["maximum"], json!(MAX_TO));
    }
}
