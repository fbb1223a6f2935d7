//! Authorization predicate consulted by the dispatcher.

use crate::auth::CallerContext;
use crate::types::PermissionTag;

/// Decides whether a caller may invoke a tool at the given level.
pub trait Authorizer: Send + Sync {
    fn allowed(&self, caller: &CallerContext, required: PermissionTag) -> bool;
}

impl<F> Authorizer for F
where
    F: Fn(&CallerContext, PermissionTag) -> bool + Send + Sync,
{
    fn allowed(&self, caller: &CallerContext, required: PermissionTag) -> bool {
        self(caller, required)
    }
}

/// Grants access when the caller's level is at least the required one.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionLevelAuthorizer;

impl Authorizer for PermissionLevelAuthorizer {
    fn allowed(&self, caller: &CallerContext, required: PermissionTag) -> bool {
        caller.permission() >= required
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CallerId;

    #[test]
    fn test_permission_level_authorizer() {
        let auth = PermissionLevelAuthorizer;
        let public = CallerContext::anonymous(PermissionTag::Public);
        let admin = CallerContext::new(CallerId::new("ops"), PermissionTag::Admin);

        assert!(auth.allowed(&public, PermissionTag::Public));
        assert!(!auth.allowed(&public, PermissionTag::Protected));
        assert!(auth.allowed(&admin, PermissionTag::Protected));
        assert!(auth.allowed(&admin, PermissionTag::Admin));
    }

    #[test]
    fn test_closure_authorizer() {
        let deny_all = |_: &CallerContext, _: PermissionTag| false;
        let caller = CallerContext::local_admin();
        assert!(!deny_all.allowed(&caller, PermissionTag::Public));
    }
}
