//! MCP server implementation using rmcp.
//!
//! Exposes the registry and dispatcher over the Model Context Protocol.
//! MCP tool calls are request/response, so every call runs through
//! [`Dispatcher::call`] and streaming tools are degraded to their final
//! result.

use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use anyhow::Result;
use axum::Router;
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};
use rmcp::{
    ErrorData as McpError,
    handler::server::ServerHandler,
    model::*,
    service::{NotificationContext, RequestContext, RoleServer},
};

use crate::auth::{CallerContext, CallerExtractor};
use crate::dispatcher::{Dispatcher, InvocationRequest};
use crate::envelope::{EnvelopeBody, ResponseEnvelope};
use crate::tools::ToolFilter;

/// Type alias for HTTP request parts stored in rmcp extensions.
type HttpParts = http::request::Parts;

/// Tools returned per `list_tools` page.
pub const TOOLS_PAGE_SIZE: usize = 100;

/// MCP server that delegates tool requests to the dispatcher.
#[derive(Clone)]
pub struct McpServer {
    dispatcher: Dispatcher,
    /// Caller established during `initialize` (HTTP sessions).
    session_caller: Arc<RwLock<Option<CallerContext>>>,
    /// Caller used when no session caller was established.
    default_caller: CallerContext,
    /// Present for HTTP sessions; resolves `X-API-Key` headers.
    extractor: Option<Arc<CallerExtractor>>,
}

impl McpServer {
    /// Server for a trusted local transport (stdio): the caller holds every
    /// permission.
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            session_caller: Arc::new(RwLock::new(None)),
            default_caller: CallerContext::local_admin(),
            extractor: None,
        }
    }

    /// Server for HTTP sessions; callers are resolved from request headers.
    pub fn new_with_auth(dispatcher: Dispatcher, extractor: Arc<CallerExtractor>) -> Self {
        Self {
            dispatcher,
            session_caller: Arc::new(RwLock::new(None)),
            // Until initialize runs, treat the session as the least privileged caller.
            default_caller: CallerContext::anonymous(crate::types::PermissionTag::Public),
            extractor: Some(extractor),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The caller for this session.
    pub async fn caller(&self) -> CallerContext {
        self.session_caller
            .read()
            .await
            .clone()
            .unwrap_or_else(|| self.default_caller.clone())
    }

    /// One page of the tools visible to this session's caller.
    pub async fn visible_tools(&self, cursor: Option<&str>) -> Result<ListToolsResult, McpError> {
        let offset = match cursor {
            Some(cursor) => cursor.parse::<usize>().map_err(|_| {
                McpError::invalid_params(format!("Invalid cursor: {}", cursor), None)
            })?,
            None => 0,
        };

        let caller = self.caller().await;
        let descriptors = self
            .dispatcher
            .registry()
            .read()
            .await
            .enumerate(&ToolFilter::default());

        let visible: Vec<_> = descriptors
            .into_iter()
            .filter(|d| self.dispatcher.is_authorized(&caller, d.permission))
            .collect();
        let total = visible.len();
        let tools: Vec<Tool> = visible
            .iter()
            .skip(offset)
            .take(TOOLS_PAGE_SIZE)
            .map(|d| d.to_mcp_tool())
            .collect();

        let end = offset.saturating_add(TOOLS_PAGE_SIZE);
        let next_cursor = (end < total).then(|| end.to_string());

        Ok(ListToolsResult {
            tools,
            next_cursor,
            ..Default::default()
        })
    }

    /// Invoke a tool on behalf of this session's caller.
    ///
    /// `cancellation` is the MCP request's token; the handler sees it as
    /// `ToolContext::cancellation`.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
        cancellation: CancellationToken,
    ) -> Result<CallToolResult, McpError> {
        let caller = self.caller().await;
        let request = InvocationRequest::new(name, arguments.unwrap_or_default());
        let envelope = self
            .dispatcher
            .call_with_cancellation(request, &caller, cancellation)
            .await;
        envelope_to_call_result(envelope)
    }
}

/// Map a terminal envelope to an MCP tool result.
///
/// Success envelopes (including tool execution errors) become a
/// `CallToolResult`; failure envelopes become protocol errors.
pub fn envelope_to_call_result(envelope: ResponseEnvelope) -> Result<CallToolResult, McpError> {
    match envelope.body {
        EnvelopeBody::Success { content, metadata } => {
            let text = match &content {
                serde_json::Value::String(s) => s.clone(),
                other => serde_json::to_string(other)
                    .unwrap_or_else(|_| "internal serialization error".to_string()),
            };
            let structured_content = content.is_object().then_some(content);
            Ok(CallToolResult {
                content: vec![Content::text(text)],
                structured_content,
                is_error: Some(metadata.is_error),
                meta: None,
            })
        }
        EnvelopeBody::Failure {
            code,
            message,
            data,
        } => Err(McpError::new(ErrorCode(code), message, data)),
    }
}

impl ServerHandler for McpServer {
    fn ping(
        &self,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<(), McpError>> + Send + '_ {
        std::future::ready(Ok(()))
    }

    fn initialize(
        &self,
        _request: InitializeRequestParams,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<InitializeResult, McpError>> + Send + '_ {
        let info = self.get_info();
        let extractor = self.extractor.clone();
        let session_caller = self.session_caller.clone();
        let extensions = context.extensions.clone();

        async move {
            if let Some(extractor) = extractor {
                // rmcp stores http::request::Parts in extensions for HTTP transport
                let (api_key, ip_address, user_agent) =
                    if let Some(parts) = extensions.get::<HttpParts>() {
                        let header = |name: &str| {
                            parts
                                .headers
                                .get(name)
                                .and_then(|v| v.to_str().ok())
                                .map(|s| s.to_string())
                        };
                        (
                            header("X-API-Key"),
                            header("X-Forwarded-For").or_else(|| header("X-Real-IP")),
                            header(http::header::USER_AGENT.as_str()),
                        )
                    } else {
                        (None, None, None)
                    };

                match extractor.extract(api_key.as_deref(), ip_address, user_agent) {
                    Ok(caller) => {
                        tracing::info!(
                            caller = %caller.caller_id(),
                            permission = %caller.permission(),
                            "Caller established for MCP session"
                        );
                        *session_caller.write().await = Some(caller);
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "MCP session rejected");
                        return Err(err.to_mcp_error());
                    }
                }
            }

            Ok(info)
        }
    }

    fn list_tools(
        &self,
        request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let cursor = request.and_then(|r| r.cursor);
        async move { self.visible_tools(cursor.as_deref()).await }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        let name = request.name.to_string();
        let arguments = request.arguments;
        async move { self.invoke(&name, arguments, context.ct).await }
    }

    fn on_initialized(
        &self,
        _context: NotificationContext<RoleServer>,
    ) -> impl Future<Output = ()> + Send + '_ {
        std::future::ready(())
    }

    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Tool registry and dispatcher. Use list_tools to discover the \
                 available tools and call_tool to invoke them."
                    .to_string(),
            ),
        }
    }
}

/// Serve MCP over Streamable HTTP at `/mcp` on the given bind address,
/// e.g. `127.0.0.1:3942`.
///
/// Each session gets its own [`McpServer`] whose caller is resolved from the
/// session's `X-API-Key` header.
pub async fn start_mcp_http(
    dispatcher: Dispatcher,
    extractor: CallerExtractor,
    bind: &str,
) -> Result<()> {
    let extractor = Arc::new(extractor);

    let service = StreamableHttpService::new(
        {
            let dispatcher = dispatcher.clone();
            let extractor = extractor.clone();
            move || Ok(McpServer::new_with_auth(dispatcher.clone(), extractor.clone()))
        },
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let router = Router::new().nest_service("/mcp", service);
    let listener = tokio::net::TcpListener::bind(bind).await?;

    tracing::info!("MCP HTTP server listening on http://{}/mcp", bind);

    axum::serve(listener, router).await?;

    Ok(())
}
