//! Gateway configuration: upstream endpoint, credentials, rate limiting,
//! retry, and authentication knobs.

use std::env;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

use crate::{Error, Result};

fn default_true() -> bool {
    true
}

/// Top-level configuration for the gateway core.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub frappe: FrappeConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl GatewayConfig {
    /// Apply environment variable overrides on top of the loaded values.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(base_url) = env::var("FRAPPE_BASE_URL") {
            self.frappe.base_url = base_url;
        }
        if let Ok(api_key) = env::var("FRAPPE_API_KEY") {
            self.frappe.api_key = Some(api_key);
        }
        if let Ok(api_secret) = env::var("FRAPPE_API_SECRET") {
            self.frappe.api_secret = Some(api_secret.into());
        }
        if let Ok(url) = env::var("OAUTH_TOKEN_INFO_URL") {
            self.auth.oauth2.token_info_url = url;
        }
        if let Ok(url) = env::var("OAUTH_ISSUER_URL") {
            self.auth.oauth2.issuer_url = url;
        }
        if let Ok(require) = env::var("AUTH_REQUIRE_AUTH") {
            self.auth.require_auth = require == "true";
        }
        if let Ok(ttl) = env::var("CACHE_TTL_SECS")
            && let Ok(secs) = ttl.parse()
        {
            self.auth.cache.ttl_secs = secs;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.frappe.validate()?;
        self.auth.validate()
    }
}

/// Upstream Frappe instance configuration. Works with ERPNext and any other
/// Frappe-based application.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FrappeConfig {
    /// Base URL of the Frappe instance, e.g. `https://erp.example.com`.
    pub base_url: String,
    /// Static service-level API key. Optional: when absent, calls must carry
    /// a caller credential (session or bearer).
    pub api_key: Option<String>,
    /// Static service-level API secret; must be paired with `api_key`.
    pub api_secret: Option<SecretString>,
    /// Per-attempt HTTP timeout in seconds.
    pub timeout_secs: u64,
    /// Whole-operation deadline in seconds, covering rate-limit waits,
    /// backoff sleeps, and every attempt.
    pub operation_timeout_secs: u64,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
}

impl Default for FrappeConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: None,
            api_secret: None,
            timeout_secs: 30,
            operation_timeout_secs: 120,
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl FrappeConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Configure the static service key pair used as the credential of last
    /// resort (service-level privilege, not user-level).
    pub fn with_service_key(mut self, key: impl Into<String>, secret: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self.api_secret = Some(secret.into().into());
        self
    }

    pub fn with_rate_limit(mut self, requests_per_second: f64, burst: u32) -> Self {
        self.rate_limit = RateLimitConfig {
            requests_per_second,
            burst,
        };
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout_secs = timeout.as_secs();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(Error::config("frappe base URL is required"));
        }
        Url::parse(&self.base_url)
            .map_err(|e| Error::config(format!("invalid base URL {}: {}", self.base_url, e)))?;
        if self.api_key.is_some() && self.api_secret.is_none() {
            return Err(Error::config("API key provided without API secret"));
        }
        if self.api_secret.is_some() && self.api_key.is_none() {
            return Err(Error::config("API secret provided without API key"));
        }
        Ok(())
    }
}

/// Token-bucket parameters for outbound calls to the upstream.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_second: f64,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            burst: 20,
        }
    }
}

/// Bounded-retry parameters. Delay for attempt `n` (n >= 1) is
/// `min(n * initial_delay, max_delay)`; attempt 0 has no delay.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Authentication configuration for inbound callers.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// When false, authentication failures let the call proceed without an
    /// identity (the upstream client then falls back to the service key).
    pub require_auth: bool,
    pub oauth2: OAuth2Config,
    pub cache: CacheConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            require_auth: true,
            oauth2: OAuth2Config::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl AuthConfig {
    pub fn validate(&self) -> Result<()> {
        if self.oauth2.validate_remote {
            if self.oauth2.token_info_url.is_empty() {
                return Err(Error::config(
                    "oauth2 token_info_url is required when remote validation is enabled",
                ));
            }
            if self.oauth2.issuer_url.is_empty() {
                return Err(Error::config(
                    "oauth2 issuer_url is required when remote validation is enabled",
                ));
            }
        }
        Ok(())
    }
}

/// OAuth2 / session validation endpoints and trust settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct OAuth2Config {
    /// Token introspection endpoint; called with `Authorization: Bearer`.
    pub token_info_url: String,
    /// Frappe issuer base URL; session cookies are validated against
    /// `<issuer_url>/api/method/frappe.auth.get_logged_user`.
    pub issuer_url: String,
    /// Client ids allowed to assert end-user identities via forwarded
    /// headers.
    pub trusted_clients: Vec<String>,
    /// Disables all remote validation when false, resolving every caller to
    /// a fixed anonymous identity. Development only.
    #[serde(default = "default_true")]
    pub validate_remote: bool,
    /// HTTP timeout for validation calls, in seconds.
    pub timeout_secs: u64,
}

impl Default for OAuth2Config {
    fn default() -> Self {
        Self {
            token_info_url: String::new(),
            issuer_url: String::new(),
            trusted_clients: Vec::new(),
            validate_remote: true,
            timeout_secs: 30,
        }
    }
}

impl OAuth2Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Identity cache tuning.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 300 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}
