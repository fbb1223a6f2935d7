//! Tool handler shapes.
//!
//! A handler is either unary (`params → result`) or streaming
//! (`params, framer → result`). The shape is fixed when the tool is
//! registered, so the dispatcher never has to guess.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rmcp::model::JsonObject;
use tokio_util::sync::CancellationToken;

use crate::auth::CallerContext;
use crate::error::HandlerResult;
use crate::framer::Framer;
use crate::types::{CorrelationId, ToolName};

/// Boxed future returned by handlers.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'a>>;

/// Context passed to tool handlers during execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub correlation_id: CorrelationId,
    pub tool_name: ToolName,
    /// Caller identity (already authorized for this tool)
    pub caller: CallerContext,
    /// Cancelled when the caller disconnects mid-stream.
    pub cancellation: CancellationToken,
}

/// Single-result tool implementation.
pub trait UnaryHandler: Send + Sync {
    fn call(&self, params: JsonObject, ctx: ToolContext) -> HandlerFuture<'_>;
}

/// Tool implementation that emits partial results through a [`Framer`].
///
/// Implementations may end the stream with `framer.complete(..)` or
/// `framer.error(..)`, or simply return: the dispatcher terminates a framer
/// left open from the returned value.
pub trait StreamingHandler: Send + Sync {
    fn stream<'a>(
        &'a self,
        params: JsonObject,
        ctx: ToolContext,
        framer: &'a mut Framer,
    ) -> HandlerFuture<'a>;
}

/// Registered handler, tagged with its capability.
#[derive(Clone)]
pub enum Handler {
    Unary(Arc<dyn UnaryHandler>),
    Streaming(Arc<dyn StreamingHandler>),
}

impl Handler {
    pub fn unary<H: UnaryHandler + 'static>(handler: H) -> Self {
        Self::Unary(Arc::new(handler))
    }

    pub fn streaming<H: StreamingHandler + 'static>(handler: H) -> Self {
        Self::Streaming(Arc::new(handler))
    }

    /// Wrap an async closure as a unary handler.
    pub fn unary_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(JsonObject, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::Unary(Arc::new(UnaryFn(f)))
    }

    /// Wrap a closure returning a boxed future as a streaming handler.
    pub fn streaming_fn<F>(f: F) -> Self
    where
        F: for<'a> Fn(JsonObject, ToolContext, &'a mut Framer) -> HandlerFuture<'a>
            + Send
            + Sync
            + 'static,
    {
        Self::Streaming(Arc::new(StreamingFn(f)))
    }

    /// Whether the handler accepts a framer.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming(_))
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unary(_) => f.write_str("Handler::Unary"),
            Self::Streaming(_) => f.write_str("Handler::Streaming"),
        }
    }
}

struct UnaryFn<F>(F);

impl<F, Fut> UnaryHandler for UnaryFn<F>
where
    F: Fn(JsonObject, ToolContext) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, params: JsonObject, ctx: ToolContext) -> HandlerFuture<'_> {
        Box::pin((self.0)(params, ctx))
    }
}

struct StreamingFn<F>(F);

impl<F> StreamingHandler for StreamingFn<F>
where
    F: for<'a> Fn(JsonObject, ToolContext, &'a mut Framer) -> HandlerFuture<'a> + Send + Sync,
{
    fn stream<'a>(
        &'a self,
        params: JsonObject,
        ctx: ToolContext,
        framer: &'a mut Framer,
    ) -> HandlerFuture<'a> {
        (self.0)(params, ctx, framer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ToolContext {
        ToolContext {
            correlation_id: CorrelationId::new("t1"),
            tool_name: ToolName::new("test"),
            caller: CallerContext::local_admin(),
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_unary_fn_adapter() {
        let handler = Handler::unary_fn(|params, _ctx| async move {
            Ok(params.get("x").cloned().unwrap_or_default())
        });
        assert!(!handler.is_streaming());

        let Handler::Unary(h) = handler else {
            panic!("expected unary");
        };
        let mut params = JsonObject::new();
        params.insert("x".to_string(), json!(42));
        assert_eq!(h.call(params, ctx()).await, Ok(json!(42)));
    }

    #[tokio::test]
    async fn test_streaming_fn_adapter() {
        let handler = Handler::streaming_fn(|_params, _ctx, framer| {
            Box::pin(async move {
                framer.send(json!(1), None).await.ok();
                Ok(json!("done"))
            })
        });
        assert!(handler.is_streaming());
        assert_eq!(format!("{:?}", handler), "Handler::Streaming");

        let Handler::Streaming(h) = handler else {
            panic!("expected streaming");
        };
        let mut framer = Framer::buffered(CorrelationId::new("t1"), CancellationToken::new());
        let result = h.stream(JsonObject::new(), ctx(), &mut framer).await;
        assert_eq!(result, Ok(json!("done")));
        assert_eq!(framer.discarded_partials(), 1);
        assert!(framer.is_open());
    }
}
