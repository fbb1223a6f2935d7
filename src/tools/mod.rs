//! Tool catalog, handler shapes, and the built-in tools.
//!
//! New tools are added by building a [`ToolSpec`] around a [`Handler`] and
//! registering it; the dispatcher and transports need no changes.

mod handler;
mod registry;
mod spec;

pub use handler::{Handler, HandlerFuture, StreamingHandler, ToolContext, UnaryHandler};
pub use registry::{RegistryEntry, SharedRegistry, ToolRegistry};
pub use spec::{ToolDescriptor, ToolFilter, ToolSpec};

// Built-in tool implementations
mod count_up;
mod echo;

pub use count_up::{COUNT_UP_TOOL_NAME, CountUpHandler};
pub use echo::{ECHO_TOOL_NAME, EchoHandler};

use crate::error::RegistryError;

/// Register every built-in tool.
pub fn register_builtin_tools(registry: &mut ToolRegistry) -> Result<(), RegistryError> {
    registry.register(EchoHandler::spec())?;
    registry.register(CountUpHandler::spec())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_builtin_tools() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry).unwrap();
        assert_eq!(
            registry.names(),
            vec![
                crate::types::ToolName::new(ECHO_TOOL_NAME),
                crate::types::ToolName::new(COUNT_UP_TOOL_NAME),
            ]
        );
        // a second pass collides
        assert!(register_builtin_tools(&mut registry).is_err());
    }
}
