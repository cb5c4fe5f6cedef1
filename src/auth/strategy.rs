//! Authentication strategies for inbound callers.
//!
//! The production strategy resolves a caller through two credential forms,
//! tried in sequence: a Frappe session cookie validated against the issuer,
//! then an OAuth2 bearer token validated via token introspection. Successful
//! validations are cached; a statically trusted backend client may override
//! the effective identity through delegated-identity headers.

use std::collections::HashSet;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header;
use serde::Deserialize;

use super::cache::{CacheKey, IdentityCache};
use super::identity::{BEARER_PREFIX, Identity, RequestMetadata, SESSION_COOKIE_NAME, UpstreamCredential};
use crate::config::{AuthConfig, OAuth2Config};
use crate::{Error, Result};

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Resolves inbound request metadata to a caller identity.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Strategy name for logging/debugging.
    fn name(&self) -> &'static str;

    /// Resolve the caller, or fail with a typed authentication error.
    async fn authenticate(&self, meta: &RequestMetadata) -> Result<Identity>;
}

/// Session-cookie + OAuth2-bearer authentication against a Frappe issuer.
pub struct OAuth2Strategy {
    token_info_url: String,
    issuer_url: String,
    trusted_clients: RwLock<HashSet<String>>,
    cache: IdentityCache,
    http: reqwest::Client,
    validate_remote: bool,
}

/// Wire shape of the token introspection response.
#[derive(Deserialize)]
struct TokenInfo {
    sub: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    roles: Vec<String>,
}

/// Wire shape of the session identity check; `message` is the user email.
#[derive(Deserialize)]
struct LoggedUser {
    message: String,
}

impl OAuth2Strategy {
    pub fn new(config: OAuth2Config) -> Result<Self> {
        Self::with_cache_ttl(config, DEFAULT_CACHE_TTL)
    }

    pub fn with_cache_ttl(config: OAuth2Config, cache_ttl: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(Error::Network)?;

        Ok(Self {
            token_info_url: config.token_info_url,
            issuer_url: config.issuer_url.trim_end_matches('/').to_string(),
            trusted_clients: RwLock::new(config.trusted_clients.into_iter().collect()),
            cache: IdentityCache::new(cache_ttl),
            http,
            validate_remote: config.validate_remote,
        })
    }

    /// Build from the full auth configuration, wiring the cache TTL.
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        Self::with_cache_ttl(config.oauth2.clone(), config.cache.ttl())
    }

    /// Check membership in the trusted-client set. Read path never blocks
    /// other readers.
    pub fn is_trusted_client(&self, client_id: &str) -> bool {
        self.trusted_clients
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(client_id)
    }

    /// Add a client id to the trusted set at runtime.
    pub fn trust_client(&self, client_id: impl Into<String>) {
        self.trusted_clients
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(client_id.into());
    }

    /// Drop every cached validation.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    /// Validate a session cookie against the issuer's who-am-i endpoint.
    /// One remote call; failures are never cached.
    async fn resolve_session(&self, sid: &str, csrf_token: Option<&str>) -> Result<Identity> {
        let key = CacheKey::Session(sid.to_string());
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        if !self.validate_remote {
            // Development bypass: anonymous caller retaining the session for
            // upstream pass-through.
            return Ok(Identity::anonymous().with_credential(
                UpstreamCredential::Session {
                    sid: sid.to_string(),
                    csrf_token: csrf_token.map(str::to_string),
                },
            ));
        }

        let url = format!("{}/api/method/frappe.auth.get_logged_user", self.issuer_url);
        let response = self
            .http
            .get(&url)
            .header(
                header::COOKIE,
                format!("{}={}", SESSION_COOKIE_NAME, sid),
            )
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(Error::validation(format!(
                "invalid session: status {}",
                response.status().as_u16()
            )));
        }

        let logged_user: LoggedUser = response.json().await?;
        let identity = Identity::new(logged_user.message.clone(), logged_user.message)
            .with_credential(UpstreamCredential::Session {
                sid: sid.to_string(),
                csrf_token: csrf_token.map(str::to_string),
            });

        self.cache.insert(key, identity.clone());
        tracing::debug!(user = identity.email(), "session cookie validated");
        Ok(identity)
    }

    /// Validate a bearer token via the introspection endpoint. A non-200
    /// response is a hard failure; there is no fallback past this point.
    async fn introspect_token(&self, token: &str) -> Result<Identity> {
        let response = self
            .http
            .get(&self.token_info_url)
            .header(
                header::AUTHORIZATION,
                format!("{}{}", BEARER_PREFIX, token),
            )
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(Error::validation(format!(
                "invalid token: status {}",
                response.status().as_u16()
            )));
        }

        let info: TokenInfo = response.json().await?;
        let mut identity = Identity::new(info.sub, info.email)
            .with_roles(info.roles)
            .with_credential(UpstreamCredential::Bearer(token.to_string()));
        if !info.name.is_empty() {
            identity = identity.with_full_name(info.name);
        }
        if !info.client_id.is_empty() {
            identity = identity.with_client_id(info.client_id);
        }

        tracing::debug!(user = identity.email(), "bearer token validated");
        Ok(identity)
    }

    /// Identity asserted by a trusted backend via forwarded headers:
    /// id/email/name only, no roles, no upstream credential.
    fn delegated_identity(meta: &RequestMetadata) -> Option<Identity> {
        let id = meta.delegated_user_id()?;
        let mut identity =
            Identity::new(id, meta.delegated_user_email().unwrap_or_default());
        if let Some(name) = meta.delegated_user_name() {
            identity = identity.with_full_name(name);
        }
        Some(identity)
    }
}

#[async_trait]
impl AuthStrategy for OAuth2Strategy {
    fn name(&self) -> &'static str {
        "oauth2"
    }

    async fn authenticate(&self, meta: &RequestMetadata) -> Result<Identity> {
        // Credential form 1: Frappe session cookie (user-level permissions).
        // A failed session validation falls through to the bearer path.
        if let Some(sid) = meta.session_cookie() {
            match self.resolve_session(sid, meta.csrf_token()).await {
                Ok(identity) => return Ok(identity),
                Err(e) => {
                    tracing::debug!(error = %e, "session validation failed, trying bearer token");
                }
            }
        }

        // Credential form 2: OAuth2 bearer token. A request with neither
        // credential form fails here even in bypass mode.
        let Some(token) = meta.bearer_token() else {
            return Err(Error::auth(
                "missing authentication: no session cookie or bearer token",
            ));
        };

        if !self.validate_remote {
            // Development bypass: no remote calls, fixed anonymous caller.
            return Ok(Identity::anonymous());
        }

        let identity = match self.cache.get(&CacheKey::Bearer(token.to_string())) {
            Some(cached) => cached,
            None => {
                let identity = self.introspect_token(token).await?;
                self.cache
                    .insert(CacheKey::Bearer(token.to_string()), identity.clone());
                identity
            }
        };

        // Trusted-client delegation, applied per request after the cache
        // lookup so the cache only ever holds introspected identities.
        if let Some(client_id) = identity.client_id()
            && self.is_trusted_client(client_id)
            && let Some(delegated) = Self::delegated_identity(meta)
        {
            tracing::debug!(
                client_id,
                delegated_id = delegated.id(),
                "trusted client asserted delegated identity"
            );
            return Ok(delegated);
        }

        Ok(identity)
    }
}

impl std::fmt::Debug for OAuth2Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Strategy")
            .field("token_info_url", &self.token_info_url)
            .field("issuer_url", &self.issuer_url)
            .field("validate_remote", &self.validate_remote)
            .field("cache", &self.cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bypass_strategy() -> OAuth2Strategy {
        OAuth2Strategy::new(OAuth2Config {
            validate_remote: false,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_bypass_mode_returns_anonymous() {
        let strategy = bypass_strategy();
        let identity = strategy
            .authenticate(&RequestMetadata::new().with_bearer("whatever"))
            .await
            .unwrap();
        assert_eq!(identity.id(), "anonymous");
        assert!(identity.credential().is_none());
    }

    #[tokio::test]
    async fn test_bypass_mode_retains_session_for_passthrough() {
        let strategy = bypass_strategy();
        let identity = strategy
            .authenticate(&RequestMetadata::new().with_session_cookie("sid-value"))
            .await
            .unwrap();
        assert_eq!(identity.id(), "anonymous");
        assert!(matches!(
            identity.credential(),
            Some(UpstreamCredential::Session { sid, .. }) if sid == "sid-value"
        ));
    }

    #[tokio::test]
    async fn test_bypass_mode_still_requires_a_credential() {
        let strategy = bypass_strategy();
        let err = strategy
            .authenticate(&RequestMetadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[test]
    fn test_trusted_client_set() {
        let strategy = OAuth2Strategy::new(OAuth2Config {
            trusted_clients: vec!["backend-portal".into()],
            validate_remote: false,
            ..Default::default()
        })
        .unwrap();

        assert!(strategy.is_trusted_client("backend-portal"));
        assert!(!strategy.is_trusted_client("unknown-client"));

        strategy.trust_client("reporting-service");
        assert!(strategy.is_trusted_client("reporting-service"));
    }

    #[test]
    fn test_delegated_identity_requires_user_id() {
        let meta = RequestMetadata::new();
        assert!(OAuth2Strategy::delegated_identity(&meta).is_none());

        let meta = RequestMetadata::new().with_delegated_identity(
            "emp-42",
            "emp42@example.com",
            "Employee 42",
        );
        let delegated = OAuth2Strategy::delegated_identity(&meta).unwrap();
        assert_eq!(delegated.id(), "emp-42");
        assert_eq!(delegated.email(), "emp42@example.com");
        assert!(delegated.roles().is_empty());
        assert!(delegated.credential().is_none());
    }
}
