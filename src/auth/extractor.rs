//! Caller extraction for HTTP and MCP requests.

use std::collections::HashMap;
use std::fmt;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::auth::context::CallerContext;
use crate::config::ServerConfig;
use crate::error::ACCESS_DENIED_ERROR_CODE;
use crate::types::{ApiKeyHash, CallerId, PermissionTag};

/// Authentication errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No credentials provided and anonymous access not allowed
    Unauthenticated,
    /// The presented API key matches no configured key
    InvalidApiKey,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthenticated => write!(f, "Authentication required"),
            Self::InvalidApiKey => write!(f, "Invalid API key"),
        }
    }
}

impl std::error::Error for AuthError {}

impl AuthError {
    /// Convert to an MCP error for rejected sessions.
    pub fn to_mcp_error(&self) -> rmcp::ErrorData {
        rmcp::ErrorData::new(
            rmcp::model::ErrorCode(ACCESS_DENIED_ERROR_CODE),
            self.to_string(),
            None,
        )
    }
}

/// Resolves request credentials to a [`CallerContext`].
#[derive(Debug, Clone)]
pub struct CallerExtractor {
    keys: HashMap<ApiKeyHash, (CallerId, PermissionTag)>,
    allow_anonymous: bool,
    anonymous_permission: PermissionTag,
}

impl CallerExtractor {
    /// Build an extractor from the server configuration.
    pub fn from_config(config: &ServerConfig) -> Self {
        let keys = config
            .api_keys
            .iter()
            .map(|k| {
                (
                    k.key_sha256.clone(),
                    (CallerId::new(k.name.clone()), k.permission),
                )
            })
            .collect();
        Self {
            keys,
            allow_anonymous: config.allow_anonymous,
            anonymous_permission: config.anonymous_permission,
        }
    }

    /// Extract a caller from the `X-API-Key` header value.
    ///
    /// A presented key must be valid even when anonymous access is allowed.
    pub fn extract(
        &self,
        api_key: Option<&str>,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<CallerContext, AuthError> {
        if let Some(key) = api_key {
            let hash = hash_api_key(key);
            let (caller_id, permission) = self.keys.get(&hash).ok_or(AuthError::InvalidApiKey)?;
            debug!(caller = %caller_id, permission = %permission, "Authenticated API key");
            return Ok(CallerContext::new(caller_id.clone(), *permission)
                .with_client_info(ip_address, user_agent));
        }

        if self.allow_anonymous {
            return Ok(CallerContext::anonymous(self.anonymous_permission)
                .with_client_info(ip_address, user_agent));
        }

        Err(AuthError::Unauthenticated)
    }
}

/// Hash an API key for storage or comparison.
pub fn hash_api_key(key: &str) -> ApiKeyHash {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let result = hasher.finalize();
    ApiKeyHash::new(format!("{:x}", result))
}

/// Generate a new API key with the format: prefix_randompart
/// Returns (full_key, hash)
pub fn generate_api_key() -> (String, ApiKeyHash) {
    use uuid::Uuid;

    let prefix = format!("th_{}", &Uuid::new_v4().simple().to_string()[..8]);
    let secret = Uuid::new_v4().simple().to_string();
    let full_key = format!("{}_{}", prefix, secret);
    let key_hash = hash_api_key(&full_key);

    (full_key, key_hash)
}
