//! REST API for tool discovery, invocation and administration.
//!
//! The public router resolves callers from the `X-API-Key` header. The admin
//! router performs no caller checks and must only be bound to a trusted
//! interface.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        IntoResponse, Json, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::auth::{AuthError, CallerContext, CallerExtractor};
use crate::dispatcher::{Dispatcher, InvocationRequest};
use crate::envelope::ResponseEnvelope;
use crate::error::{
    ACCESS_DENIED_ERROR_CODE, INVALID_PARAMETERS_ERROR_CODE, MALFORMED_REQUEST_ERROR_CODE,
    ProtocolError, TOOL_NOT_FOUND_ERROR_CODE,
};
use crate::tools::ToolFilter;
use crate::types::CorrelationId;

/// Shared state for both routers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub extractor: Arc<CallerExtractor>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, extractor: CallerExtractor) -> Self {
        Self {
            dispatcher,
            extractor: Arc::new(extractor),
        }
    }
}

pub fn create_public_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/tools", get(list_tools))
        .route("/tools/{name}", get(describe_tool))
        .route("/invoke", post(invoke_tool))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

pub fn create_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/tools/{name}/enable", post(enable_tool))
        .route("/tools/{name}/disable", post(disable_tool))
        .route("/tools/{name}", axum::routing::delete(remove_tool))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// Resolve the caller from request headers.
fn caller_from_headers(
    extractor: &CallerExtractor,
    headers: &HeaderMap,
) -> Result<CallerContext, (StatusCode, Json<Value>)> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    };
    let api_key = header("X-API-Key");
    let ip_address = header("X-Forwarded-For").or_else(|| header("X-Real-IP"));
    let user_agent = header(axum::http::header::USER_AGENT.as_str());

    extractor
        .extract(api_key.as_deref(), ip_address, user_agent)
        .map_err(|err| {
            warn!(error = %err, "Rejected HTTP caller");
            let status = match err {
                AuthError::Unauthenticated | AuthError::InvalidApiKey => StatusCode::UNAUTHORIZED,
            };
            (status, Json(json!({ "error": err.to_string() })))
        })
}

/// HTTP status for a terminal envelope.
fn status_for(envelope: &ResponseEnvelope) -> StatusCode {
    match envelope.failure_code() {
        None => StatusCode::OK,
        Some(TOOL_NOT_FOUND_ERROR_CODE) => StatusCode::NOT_FOUND,
        Some(INVALID_PARAMETERS_ERROR_CODE) | Some(MALFORMED_REQUEST_ERROR_CODE) => {
            StatusCode::BAD_REQUEST
        }
        Some(ACCESS_DENIED_ERROR_CODE) => StatusCode::FORBIDDEN,
        Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn list_tools(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(filter): Query<ToolFilter>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let caller = caller_from_headers(&state.extractor, &headers)?;

    let tools: Vec<_> = state
        .dispatcher
        .registry()
        .read()
        .await
        .enumerate(&filter)
        .into_iter()
        .filter(|d| state.dispatcher.is_authorized(&caller, d.permission))
        .collect();

    Ok(Json(json!({
        "tools": tools,
        "count": tools.len()
    })))
}

async fn describe_tool(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let caller = caller_from_headers(&state.extractor, &headers)?;

    let descriptor = state.dispatcher.registry().read().await.describe(&name);
    match descriptor {
        Some(d) if state.dispatcher.is_authorized(&caller, d.permission) => Ok(Json(json!(d))),
        Some(d) => Err((
            StatusCode::FORBIDDEN,
            Json(json!({ "error": format!("tool {} requires {} permission", name, d.permission) })),
        )),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Tool not found: {}", name) })),
        )),
    }
}

/// Invoke a tool. Streaming requests are answered with Server-Sent Events,
/// one envelope per event; everything else gets a single JSON envelope.
async fn invoke_tool(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let caller = match caller_from_headers(&state.extractor, &headers) {
        Ok(caller) => caller,
        Err(rejection) => return rejection.into_response(),
    };

    // Parsed by hand so that bodies which are not JSON still get an envelope.
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => return malformed_request(CorrelationId::generate(), err.to_string()),
    };
    let request: InvocationRequest = match serde_json::from_value(payload.clone()) {
        Ok(request) => request,
        Err(err) => {
            let correlation_id = payload
                .get("correlationId")
                .and_then(|v| v.as_str())
                .map(CorrelationId::new)
                .unwrap_or_else(CorrelationId::generate);
            return malformed_request(correlation_id, err.to_string());
        }
    };

    if !request.wants_streaming {
        let envelope = state.dispatcher.call(request, &caller).await;
        return (status_for(&envelope), Json(envelope)).into_response();
    }

    let (tx, rx) = mpsc::channel(state.dispatcher.stream_buffer());
    // Rejections and unary results are already buffered in the channel by
    // the time dispatch returns; streams keep running on their own task.
    let _ = state.dispatcher.dispatch(request, &caller, tx).await;

    let events = ReceiverStream::new(rx).map(|envelope| {
        Ok::<_, Infallible>(
            Event::default()
                .json_data(&envelope)
                .unwrap_or_else(|_| Event::default().data("internal serialization error")),
        )
    });
    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

fn malformed_request(correlation_id: CorrelationId, reason: String) -> Response {
    let envelope =
        ResponseEnvelope::failure(correlation_id, &ProtocolError::MalformedRequest(reason));
    (StatusCode::BAD_REQUEST, Json(envelope)).into_response()
}

async fn set_enabled(state: &AppState, name: &str, enabled: bool) -> Result<Json<Value>, StatusCode> {
    let found = state.dispatcher.registry().write().await.set_enabled(name, enabled);
    if !found {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(json!({
        "status": "ok",
        "tool": name,
        "enabled": enabled,
    })))
}

async fn enable_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    set_enabled(&state, &name, true).await
}

async fn disable_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    set_enabled(&state, &name, false).await
}

async fn remove_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let removed = state.dispatcher.registry().write().await.unregister(&name);
    if !removed {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(json!({
        "status": "ok",
        "tool": name,
        "removed": true,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{PermissionLevelAuthorizer, hash_api_key};
    use crate::config::{ApiKeyConfig, ServerConfig};
    use crate::tools::{Handler, ToolRegistry, ToolSpec, register_builtin_tools};
    use crate::types::PermissionTag;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> AppState {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry).unwrap();
        registry
            .register(
                ToolSpec::new(
                    "admin_reset",
                    "Admin only",
                    Handler::unary_fn(|_, _| async { Ok(json!("reset")) }),
                )
                .with_permission(PermissionTag::Admin),
            )
            .unwrap();
        let dispatcher =
            Dispatcher::new(registry.shared()).with_authorizer(PermissionLevelAuthorizer);

        let config = ServerConfig {
            api_keys: vec![ApiKeyConfig {
                name: "ops".to_string(),
                key_sha256: hash_api_key("ops-secret"),
                permission: PermissionTag::Admin,
            }],
            ..Default::default()
        };
        AppState::new(dispatcher, CallerExtractor::from_config(&config))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn invoke(body: Value) -> Request<Body> {
        Request::post("/invoke")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = create_public_router(state())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_list_tools_depends_on_caller() {
        let app = create_public_router(state());

        let anonymous = app
            .clone()
            .oneshot(Request::get("/tools").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(anonymous).await["count"], 2);

        let admin = app
            .clone()
            .oneshot(
                Request::get("/tools")
                    .header("X-API-Key", "ops-secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(admin).await["count"], 3);

        let filtered = app
            .clone()
            .oneshot(
                Request::get("/tools?tag=stream")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let filtered = body_json(filtered).await;
        assert_eq!(filtered["count"], 1);
        assert_eq!(filtered["tools"][0]["name"], "count_up");

        let bad_key = app
            .oneshot(
                Request::get("/tools")
                    .header("X-API-Key", "wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(bad_key.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_describe_tool() {
        let app = create_public_router(state());

        let echo = app
            .clone()
            .oneshot(Request::get("/tools/echo").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(echo.status(), StatusCode::OK);
        assert_eq!(body_json(echo).await["streaming"], false);

        let missing = app
            .clone()
            .oneshot(Request::get("/tools/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let forbidden = app
            .oneshot(Request::get("/tools/admin_reset").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_invoke_unary() {
        let app = create_public_router(state());
        let response = app
            .oneshot(invoke(json!({
                "toolName": "echo",
                "parameters": { "text": "hi" },
                "correlationId": "req-1"
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let envelope = body_json(response).await;
        assert_eq!(envelope["correlationId"], "req-1");
        assert_eq!(envelope["status"], "success");
        assert_eq!(envelope["content"], "hi");
        assert_eq!(envelope["metadata"]["final"], true);
    }

    #[tokio::test]
    async fn test_invoke_errors_map_to_http_status() {
        let app = create_public_router(state());

        let missing = app
            .clone()
            .oneshot(invoke(json!({ "toolName": "nope", "correlationId": "a" })))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(missing).await["code"], TOOL_NOT_FOUND_ERROR_CODE);

        let invalid = app
            .clone()
            .oneshot(invoke(json!({ "toolName": "echo", "correlationId": "b" })))
            .await
            .unwrap();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let denied = app
            .clone()
            .oneshot(invoke(json!({ "toolName": "admin_reset", "correlationId": "c" })))
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        let malformed = app
            .oneshot(invoke(json!({ "parameters": {}, "correlationId": "d" })))
            .await
            .unwrap();
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
        let envelope = body_json(malformed).await;
        assert_eq!(envelope["correlationId"], "d");
        assert_eq!(envelope["code"], MALFORMED_REQUEST_ERROR_CODE);
    }

    #[tokio::test]
    async fn test_invoke_non_json_body_gets_envelope() {
        let app = create_public_router(state());
        let response = app
            .oneshot(
                Request::post("/invoke")
                    .header("content-type", "text/plain")
                    .body(Body::from("echo hello"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let envelope = body_json(response).await;
        assert_eq!(envelope["code"], MALFORMED_REQUEST_ERROR_CODE);
        assert!(!envelope["correlationId"].as_str().unwrap().is_empty());
        assert_eq!(envelope["status"], "failure");
    }

    #[tokio::test]
    async fn test_invoke_streaming_as_sse() {
        let app = create_public_router(state());
        let response = app
            .oneshot(invoke(json!({
                "toolName": "count_up",
                "parameters": { "to": 2 },
                "wantsStreaming": true,
                "correlationId": "s-1"
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let text = body_text(response).await;
        let events: Vec<Value> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0]["content"]["n"], 1);
        assert_eq!(events[1]["content"]["n"], 2);
        assert_eq!(events[2]["metadata"]["final"], true);
    }

    #[tokio::test]
    async fn test_admin_enable_disable_remove() {
        let state = state();
        let admin = create_admin_router(state.clone());
        let public = create_public_router(state);

        let disabled = admin
            .clone()
            .oneshot(Request::post("/tools/echo/disable").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(disabled.status(), StatusCode::OK);

        let hidden = public
            .clone()
            .oneshot(Request::get("/tools/echo").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(hidden.status(), StatusCode::NOT_FOUND);

        let enabled = admin
            .clone()
            .oneshot(Request::post("/tools/echo/enable").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(enabled).await["enabled"], true);

        let removed = admin
            .clone()
            .oneshot(Request::delete("/tools/echo").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(removed.status(), StatusCode::OK);

        let again = admin
            .oneshot(Request::delete("/tools/echo").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(again.status(), StatusCode::NOT_FOUND);
    }
}
