// Core modules
pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod framer;
pub mod tools;
pub mod types;
pub mod validation;

// Transports
pub mod api;
pub mod server;

// Re-export key types and functions
pub use auth::{CallerContext, CallerExtractor, PermissionLevelAuthorizer};
pub use config::{ServerConfig, load_config};
pub use dispatcher::{Dispatched, Dispatcher, InvocationRequest};
pub use envelope::{EnvelopeBody, ResponseEnvelope};
pub use error::{HandlerError, HandlerResult, ProtocolError, RegistryError, ToolError};
pub use framer::Framer;
pub use server::McpServer;
pub use tools::{Handler, SharedRegistry, ToolContext, ToolRegistry, ToolSpec};
pub use types::{CorrelationId, PermissionTag, ToolName};

use anyhow::Result;
use tracing::{info, warn};
use validation::AcceptAllValidator;

/// Convenience function to create a fully configured dispatcher.
///
/// Registers the built-in tools, applies `disabledTools`, and installs the
/// permission authorizer unless the config turns authorization off.
pub fn create_dispatcher(config: &ServerConfig) -> Result<Dispatcher> {
    let mut registry = ToolRegistry::new();
    tools::register_builtin_tools(&mut registry)?;

    for name in &config.disabled_tools {
        if !registry.set_enabled(name, false) {
            warn!(tool = %name, "Config disables a tool that is not registered");
        }
    }

    let mut dispatcher =
        Dispatcher::new(registry.shared()).with_stream_buffer(config.stream_buffer);
    if config.authorization {
        dispatcher = dispatcher.with_authorizer(PermissionLevelAuthorizer);
    } else {
        warn!("Authorization disabled; every caller may invoke every tool");
    }
    if !config.validate_parameters {
        dispatcher = dispatcher.with_validator(AcceptAllValidator);
        warn!("Parameter validation disabled; handlers receive unchecked input");
    }

    info!(
        disabled = config.disabled_tools.len(),
        stream_buffer = config.stream_buffer,
        "Dispatcher ready"
    );
    Ok(dispatcher)
}
