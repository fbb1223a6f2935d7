//! NewType wrappers for strong typing across the registry and dispatcher.
//!
//! These types prevent accidental mixing of semantically different strings
//! (e.g., passing a correlation id where a tool name is expected).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }

            /// Whether the wrapped string is empty.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Unique catalog key of a tool (e.g., "echo", "count_up").
    ///
    /// Names are unique among live registry entries; a name becomes
    /// available again once its entry is unregistered.
    ToolName
);

newtype_string!(
    /// Opaque caller-supplied token identifying one invocation.
    ///
    /// Echoed back in every envelope emitted for that invocation so that
    /// interleaved streams can be told apart.
    CorrelationId
);

newtype_string!(
    /// Identity of the caller as established by the transport layer.
    ///
    /// This is the configured API key name, or "anonymous" for
    /// unauthenticated local use.
    CallerId
);

newtype_string!(
    /// Hex-encoded SHA-256 hash of an API key.
    ///
    /// Configuration stores only hashes; presented keys are hashed before
    /// comparison.
    ApiKeyHash
);

impl CorrelationId {
    /// Generate a fresh random correlation id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Access level required to invoke a tool, or granted to a caller.
///
/// Levels are totally ordered: `Public < Protected < Admin`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PermissionTag {
    #[default]
    Public,
    Protected,
    Admin,
}

impl PermissionTag {
    /// Convert to the lowercase wire string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Protected => "protected",
            Self::Admin => "admin",
        }
    }

    /// Parse from the lowercase wire string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Self::Public),
            "protected" => Some(Self::Protected),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for PermissionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newtype_borrow_lookup() {
        let mut map = std::collections::HashMap::new();
        map.insert(ToolName::new("echo"), 1);
        assert_eq!(map.get("echo"), Some(&1));
    }

    #[test]
    fn test_newtype_serde_transparent() {
        let id = CorrelationId::new("req-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"req-1\"");
    }

    #[test]
    fn test_generated_correlation_ids_differ() {
        assert_ne!(CorrelationId::generate(), CorrelationId::generate());
    }

    #[test]
    fn test_permission_ordering() {
        assert!(PermissionTag::Public < PermissionTag::Protected);
        assert!(PermissionTag::Protected < PermissionTag::Admin);
        assert_eq!(PermissionTag::default(), PermissionTag::Public);
    }

    #[test]
    fn test_permission_round_trip_strings() {
        for tag in [PermissionTag::Public, PermissionTag::Protected, PermissionTag::Admin] {
            assert_eq!(PermissionTag::parse(tag.as_str()), Some(tag));
        }
        assert_eq!(PermissionTag::parse("root"), None);
        assert_eq!(
            serde_json::to_value(PermissionTag::Admin).unwrap(),
            serde_json::json!("admin")
        );
    }
}
