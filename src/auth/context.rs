//! Caller context for request-scoped identity.

use serde::{Deserialize, Serialize};

use crate::types::{CallerId, PermissionTag};

/// Caller identity extracted by the transport layer.
///
/// This struct is handed to the authorizer and to tool handlers. It is
/// immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallerContext {
    /// Configured key name, or "anonymous"
    caller_id: CallerId,
    /// Highest permission level this caller holds
    permission: PermissionTag,
    /// Whether this caller presented no credentials
    is_anonymous: bool,
    /// Client IP address (for audit logging)
    ip_address: Option<String>,
    /// Client user agent (for audit logging)
    user_agent: Option<String>,
}

impl CallerContext {
    /// Create a caller context for an authenticated caller.
    pub fn new(caller_id: CallerId, permission: PermissionTag) -> Self {
        Self {
            caller_id,
            permission,
            is_anonymous: false,
            ip_address: None,
            user_agent: None,
        }
    }

    /// Create an anonymous caller holding the given level.
    pub fn anonymous(permission: PermissionTag) -> Self {
        Self {
            caller_id: CallerId::new("anonymous"),
            permission,
            is_anonymous: true,
            ip_address: None,
            user_agent: None,
        }
    }

    /// Local operator context (CLI, stdio) holding every permission.
    pub fn local_admin() -> Self {
        Self::new(CallerId::new("local"), PermissionTag::Admin)
    }

    /// Set client metadata for audit logging.
    pub fn with_client_info(
        mut self,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }

    pub fn caller_id(&self) -> &CallerId {
        &self.caller_id
    }

    pub fn permission(&self) -> PermissionTag {
        self.permission
    }

    pub fn is_anonymous(&self) -> bool {
        self.is_anonymous
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_context_new() {
        let ctx = CallerContext::new(CallerId::new("ops"), PermissionTag::Admin);
        assert_eq!(ctx.caller_id().as_str(), "ops");
        assert_eq!(ctx.permission(), PermissionTag::Admin);
        assert!(!ctx.is_anonymous());
    }

    #[test]
    fn test_caller_context_anonymous() {
        let ctx = CallerContext::anonymous(PermissionTag::Public);
        assert_eq!(ctx.caller_id().as_str(), "anonymous");
        assert!(ctx.is_anonymous());
    }

    #[test]
    fn test_caller_context_with_client_info() {
        let ctx = CallerContext::anonymous(PermissionTag::Public).with_client_info(
            Some("192.168.1.1".to_string()),
            Some("curl/8.0".to_string()),
        );

        assert_eq!(ctx.ip_address(), Some("192.168.1.1"));
        assert_eq!(ctx.user_agent(), Some("curl/8.0"));
    }
}
