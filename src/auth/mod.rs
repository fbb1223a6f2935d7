//! Caller identity and authorization.
//!
//! The transport layer turns request headers into a [`CallerContext`]
//! via [`CallerExtractor`]. The dispatcher then consults an [`Authorizer`]
//! exactly once per invocation, before any handler code runs.
//!
//! ## Security Model
//!
//! - Configuration stores SHA-256 hashes of API keys, never the keys
//! - Each key grants one permission level (`public < protected < admin`)
//! - Anonymous callers get the configured anonymous level, if allowed
//! - Disabled tools are invisible to every caller regardless of level

mod authorizer;
mod context;
mod extractor;

pub use authorizer::{Authorizer, PermissionLevelAuthorizer};
pub use context::CallerContext;
pub use extractor::{AuthError, CallerExtractor, generate_api_key, hash_api_key};
