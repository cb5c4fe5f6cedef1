//! Caller authentication for the gateway.
//!
//! Resolves inbound request metadata to an [`Identity`] using two credential
//! forms, tried in sequence:
//! - **Session**: a Frappe `sid` cookie, validated against the issuer
//! - **Bearer**: an OAuth2 access token, validated via introspection
//!
//! Successful validations are cached with a TTL; trusted backend clients may
//! assert end-user identities through forwarded headers.

mod cache;
mod gate;
mod identity;
mod strategy;

pub use cache::{CacheKey, IdentityCache};
pub use gate::AuthGate;
pub use identity::{
    BEARER_PREFIX, HEADER_CSRF_TOKEN, HEADER_DELEGATED_USER_EMAIL, HEADER_DELEGATED_USER_ID,
    HEADER_DELEGATED_USER_NAME, Identity, RequestMetadata, SESSION_COOKIE_NAME,
    UpstreamCredential,
};
pub use strategy::{AuthStrategy, OAuth2Strategy};
