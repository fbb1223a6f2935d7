//! Invocation dispatcher.
//!
//! Turns one [`InvocationRequest`] into envelopes on an output sink:
//!
//! 1. structural checks (`MalformedRequest`)
//! 2. registry lookup (`ToolNotFound`, disabled tools included)
//! 3. authorization, once, before any handler code (`AccessDenied`)
//! 4. schema validation (`InvalidParameters`)
//! 5. execution, unary or streaming depending on the request and the
//!    handler's registered shape
//!
//! Failures in steps 1-4 produce a single terminal failure envelope and the
//! handler is never called.

use std::sync::Arc;

use rmcp::model::JsonObject;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{Authorizer, CallerContext};
use crate::config::DEFAULT_STREAM_BUFFER;
use crate::envelope::ResponseEnvelope;
use crate::error::{HandlerError, HandlerResult, ProtocolError};
use crate::framer::Framer;
use crate::tools::{Handler, SharedRegistry, ToolContext, ToolSpec};
use crate::types::{CorrelationId, PermissionTag, ToolName};
use crate::validation::{JsonSchemaValidator, ParameterValidator, ValidationFailure};


/// One request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    pub tool_name: ToolName,
    #[serde(default)]
    pub parameters: JsonObject,
    #[serde(default)]
    pub wants_streaming: bool,
    pub correlation_id: CorrelationId,
}

impl InvocationRequest {
    /// Unary request with a freshly generated correlation id.
    pub fn new(tool_name: impl Into<ToolName>, parameters: JsonObject) -> Self {
        Self {
            tool_name: tool_name.into(),
            parameters,
            wants_streaming: false,
            correlation_id: CorrelationId::generate(),
        }
    }

    pub fn streaming(mut self) -> Self {
        self.wants_streaming = true;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<CorrelationId>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }
}

/// How [`Dispatcher::dispatch`] disposed of a request.
#[derive(Debug)]
pub enum Dispatched {
    /// The single terminal envelope has been written to the sink.
    Completed,
    /// A streaming handler is running; its output reaches the sink only.
    Streaming(JoinHandle<()>),
    /// Rejected before the handler ran. The failure envelope was also sent.
    Rejected(ProtocolError),
}

/// Routes invocation requests to registered handlers.
#[derive(Clone)]
pub struct Dispatcher {
    registry: SharedRegistry,
    authorizer: Option<Arc<dyn Authorizer>>,
    validator: Arc<dyn ParameterValidator>,
    stream_buffer: usize,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("authorizer", &self.authorizer.is_some())
            .field("stream_buffer", &self.stream_buffer)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Dispatcher with JSON Schema validation and no authorizer.
    pub fn new(registry: SharedRegistry) -> Self {
        Self {
            registry,
            authorizer: None,
            validator: Arc::new(JsonSchemaValidator),
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }

    pub fn with_authorizer(mut self, authorizer: impl Authorizer + 'static) -> Self {
        self.authorizer = Some(Arc::new(authorizer));
        self
    }

    pub fn with_validator(mut self, validator: impl ParameterValidator + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    /// Capacity transports should use for per-invocation channels.
    pub fn with_stream_buffer(mut self, capacity: usize) -> Self {
        self.stream_buffer = capacity.max(1);
        self
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn stream_buffer(&self) -> usize {
        self.stream_buffer
    }

    /// Whether `caller` may see and invoke tools at the given level.
    pub fn is_authorized(&self, caller: &CallerContext, required: PermissionTag) -> bool {
        match &self.authorizer {
            Some(authorizer) => authorizer.allowed(caller, required),
            None => true,
        }
    }

    /// Run one invocation, writing its envelopes to `sink`.
    ///
    /// Returns once the terminal envelope is written, except for streaming
    /// handlers asked to stream: those run on a spawned task whose handle is
    /// returned as soon as it is attached.
    pub async fn dispatch(
        &self,
        request: InvocationRequest,
        caller: &CallerContext,
        sink: mpsc::Sender<ResponseEnvelope>,
    ) -> Dispatched {
        let spec = match self.preflight(&request, caller).await {
            Ok(spec) => spec,
            Err(err) => {
                let envelope = ResponseEnvelope::failure(request.correlation_id.clone(), &err);
                if sink.send(envelope).await.is_err() {
                    debug!(correlation_id = %request.correlation_id, "Caller left before rejection was delivered");
                }
                return Dispatched::Rejected(err);
            }
        };

        let InvocationRequest {
            parameters,
            wants_streaming,
            correlation_id,
            ..
        } = request;
        let cancellation = CancellationToken::new();
        let ctx = ToolContext {
            correlation_id: correlation_id.clone(),
            tool_name: spec.name.clone(),
            caller: caller.clone(),
            cancellation: cancellation.clone(),
        };

        if wants_streaming && let Handler::Streaming(handler) = &spec.handler {
            let handler = Arc::clone(handler);
            let finished = watch_sink(sink.clone(), cancellation.clone());
            let task = tokio::spawn(async move {
                let _finished = finished;
                let mut framer = Framer::channel(correlation_id, sink, cancellation);
                let outcome = handler.stream(parameters, ctx, &mut framer).await;
                close_stream(&mut framer, outcome).await;
                debug!(
                    correlation_id = %framer.correlation_id(),
                    envelopes = framer.emitted(),
                    "Streaming invocation finished"
                );
            });
            return Dispatched::Streaming(task);
        }

        let envelope = run_to_completion(&spec, parameters, ctx).await;
        if sink.send(envelope).await.is_err() {
            debug!(correlation_id = %correlation_id, "Caller left before the result was delivered");
        }
        Dispatched::Completed
    }

    /// Run one invocation unary-style and return its terminal envelope.
    ///
    /// Streaming handlers are degraded: partials are dropped.
    pub async fn call(&self, request: InvocationRequest, caller: &CallerContext) -> ResponseEnvelope {
        self.call_with_cancellation(request, caller, CancellationToken::new())
            .await
    }

    /// [`Dispatcher::call`] with a transport-owned cancellation token.
    pub async fn call_with_cancellation(
        &self,
        request: InvocationRequest,
        caller: &CallerContext,
        cancellation: CancellationToken,
    ) -> ResponseEnvelope {
        let spec = match self.preflight(&request, caller).await {
            Ok(spec) => spec,
            Err(err) => return ResponseEnvelope::failure(request.correlation_id, &err),
        };
        let ctx = ToolContext {
            correlation_id: request.correlation_id,
            tool_name: spec.name.clone(),
            caller: caller.clone(),
            cancellation,
        };
        run_to_completion(&spec, request.parameters, ctx).await
    }

    /// Steps 1-4: everything that must pass before handler code runs.
    async fn preflight(
        &self,
        request: &InvocationRequest,
        caller: &CallerContext,
    ) -> Result<Arc<ToolSpec>, ProtocolError> {
        if request.correlation_id.as_str().trim().is_empty() {
            return Err(ProtocolError::MalformedRequest(
                "correlation id must not be empty".to_string(),
            ));
        }
        if request.tool_name.as_str().trim().is_empty() {
            return Err(ProtocolError::MalformedRequest(
                "tool name must not be empty".to_string(),
            ));
        }

        let spec = {
            let registry = self.registry.read().await;
            registry.lookup(request.tool_name.as_str())
        };
        let Some(spec) = spec else {
            info!(
                tool = %request.tool_name,
                correlation_id = %request.correlation_id,
                "Rejected invocation of unknown tool"
            );
            return Err(ProtocolError::ToolNotFound(request.tool_name.clone()));
        };

        if !self.is_authorized(caller, spec.permission) {
            warn!(
                tool = %spec.name,
                caller = %caller.caller_id(),
                required = %spec.permission,
                granted = %caller.permission(),
                "Access denied"
            );
            return Err(ProtocolError::AccessDenied {
                tool: spec.name.clone(),
                required: spec.permission,
            });
        }

        match self
            .validator
            .validate(&spec.parameter_schema, &request.parameters)
        {
            Ok(()) => {}
            Err(ValidationFailure::Invalid(errors)) => {
                info!(
                    tool = %spec.name,
                    correlation_id = %request.correlation_id,
                    violations = errors.len(),
                    "Rejected invalid parameters"
                );
                return Err(ProtocolError::InvalidParameters(errors));
            }
            Err(ValidationFailure::BadSchema(msg)) => {
                warn!(tool = %spec.name, error = %msg, "Tool has an unusable parameter schema");
                return Err(ProtocolError::InternalFault(format!(
                    "tool '{}' has an invalid parameter schema",
                    spec.name
                )));
            }
        }

        info!(
            tool = %spec.name,
            correlation_id = %request.correlation_id,
            caller = %caller.caller_id(),
            streaming = request.wants_streaming,
            "Dispatching tool invocation"
        );
        Ok(spec)
    }
}

/// Run a handler on its own task and frame its single terminal envelope.
///
/// The task boundary turns handler panics into `InternalFault`.
async fn run_to_completion(
    spec: &ToolSpec,
    parameters: JsonObject,
    ctx: ToolContext,
) -> ResponseEnvelope {
    let correlation_id = ctx.correlation_id.clone();
    let joined = match &spec.handler {
        Handler::Unary(handler) => {
            let handler = Arc::clone(handler);
            let id = correlation_id.clone();
            tokio::spawn(async move { frame_outcome(id, handler.call(parameters, ctx).await) })
                .await
        }
        Handler::Streaming(handler) => {
            let handler = Arc::clone(handler);
            let id = correlation_id.clone();
            tokio::spawn(async move {
                let mut framer = Framer::buffered(id.clone(), ctx.cancellation.clone());
                let outcome = handler.stream(parameters, ctx, &mut framer).await;
                close_stream(&mut framer, outcome).await;
                debug!(
                    correlation_id = %id,
                    dropped = framer.discarded_partials(),
                    "Degraded streaming handler to a single result"
                );
                framer.take_terminal().unwrap_or_else(|| {
                    ResponseEnvelope::failure(
                        id,
                        &ProtocolError::InternalFault("stream produced no result".to_string()),
                    )
                })
            })
            .await
        }
    };

    joined.unwrap_or_else(|err| {
        warn!(tool = %spec.name, correlation_id = %correlation_id, error = %err, "Tool handler aborted");
        ResponseEnvelope::failure(
            correlation_id,
            &ProtocolError::InternalFault(format!("tool '{}' aborted", spec.name)),
        )
    })
}

/// Frame a unary handler's outcome as its terminal envelope.
fn frame_outcome(correlation_id: CorrelationId, outcome: HandlerResult) -> ResponseEnvelope {
    match outcome {
        Ok(content) => ResponseEnvelope::complete(correlation_id, content, None),
        Err(HandlerError::Execution(err)) => {
            debug!(correlation_id = %correlation_id, error = %err, "Tool reported an execution error");
            ResponseEnvelope::tool_error(correlation_id, &err)
        }
        Err(HandlerError::Fault(msg)) => {
            warn!(correlation_id = %correlation_id, error = %msg, "Tool handler fault");
            ResponseEnvelope::failure(correlation_id, &ProtocolError::InternalFault(msg))
        }
    }
}

/// Terminate a framer the handler left open, using the handler's outcome.
pub(crate) async fn close_stream(framer: &mut Framer, outcome: HandlerResult) {
    if !framer.is_open() {
        if let Err(err) = outcome {
            warn!(
                correlation_id = %framer.correlation_id(),
                error = %err,
                "Handler failed after its stream was closed; ignoring"
            );
        }
        return;
    }
    let delivered = match outcome {
        Ok(content) => framer.complete(content, None).await,
        Err(err) => {
            if let HandlerError::Fault(msg) = &err {
                warn!(correlation_id = %framer.correlation_id(), error = %msg, "Streaming handler fault");
            }
            framer.error(err).await
        }
    };
    if delivered.is_err() {
        debug!(correlation_id = %framer.correlation_id(), "Caller left before the stream ended");
    }
}

/// Cancel `token` if the caller drops its receiver mid-stream.
///
/// The watcher holds a sender clone; it lets go once the returned guard is
/// dropped so the receiver can observe the end of the stream.
fn watch_sink(
    sink: mpsc::Sender<ResponseEnvelope>,
    token: CancellationToken,
) -> tokio_util::sync::DropGuard {
    let finished = CancellationToken::new();
    let done = finished.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sink.closed() => {
                debug!("Output sink closed; cancelling invocation");
                token.cancel();
            }
            _ = done.cancelled() => {}
        }
    });
    finished.drop_guard()
}
