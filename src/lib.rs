//! # frappe-gateway
//!
//! Authenticated, resilient gateway client for Frappe/ERPNext document APIs.
//!
//! This crate lets a tool-calling front end reach a Frappe-style REST API
//! without holding its own service credentials: inbound callers are resolved
//! to an [`Identity`] (session cookie or OAuth2 bearer token, with TTL
//! caching and trusted-client delegation), and every upstream call runs
//! under rate limiting, bounded retry, and read-through document caching.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use frappe_gateway::{FrappeClient, FrappeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), frappe_gateway::Error> {
//!     let config = FrappeConfig::new("https://erp.example.com")
//!         .with_service_key("api-key", "api-secret");
//!     let client = FrappeClient::new(config)?;
//!
//!     let doc = client.get_document(None, "Project", "PROJ-0001").await?;
//!     println!("{:?}", doc.get("status"));
//!     Ok(())
//! }
//! ```
//!
//! ## Caller identity pass-through
//!
//! ```rust,no_run
//! use frappe_gateway::{AuthGate, OAuth2Strategy, OAuth2Config, RequestMetadata};
//!
//! # async fn example(client: frappe_gateway::FrappeClient, meta: RequestMetadata)
//! # -> Result<(), frappe_gateway::Error> {
//! let strategy = OAuth2Strategy::new(OAuth2Config {
//!     token_info_url: "https://erp.example.com/api/method/frappe.integrations.oauth2.openid_profile".into(),
//!     issuer_url: "https://erp.example.com".into(),
//!     ..Default::default()
//! })?;
//! let gate = AuthGate::new(strategy, true);
//!
//! let identity = gate.resolve(&meta).await?;
//! let doc = client.get_document(identity.as_ref(), "Task", "TASK-0042").await?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod auth;
pub mod client;
pub mod config;
pub mod types;

// Re-exports for convenience
pub use auth::{
    AuthGate, AuthStrategy, CacheKey, Identity, IdentityCache, OAuth2Strategy, RequestMetadata,
    UpstreamCredential,
};
pub use client::{DocumentCache, FrappeClient, RetryPolicy, TokenBucket};
pub use config::{
    AuthConfig, CacheConfig, FrappeConfig, GatewayConfig, OAuth2Config, RateLimitConfig,
    RetryConfig,
};
pub use types::{
    AggregationRequest, Document, DocumentList, ListRequest, ReportColumn, ReportRequest,
    ReportResponse, SearchRequest,
};

/// Error type for gateway operations.
///
/// Upstream failures carry enough context (operation, status, diagnostic
/// payload) to diagnose without a second round trip.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// No usable credential was presented.
    #[error("authentication required: {0}")]
    Auth(String),

    /// A credential was presented but rejected by the identity provider.
    #[error("credential rejected: {0}")]
    Validation(String),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Upstream returned an error response.
    #[error("upstream error (HTTP {status}): {message}")]
    Upstream {
        status: u16,
        message: String,
        /// Server-side traceback or diagnostic payload, when provided.
        exc: Option<String>,
        /// Structured retry-after signal from the `Retry-After` header.
        retry_after: Option<std::time::Duration>,
    },

    /// Network connectivity or transport failure before any response.
    #[error("network request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization or deserialization failed.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// The caller's deadline elapsed during a suspension point.
    #[error("deadline exceeded after {:.1}s", .0.as_secs_f64())]
    Deadline(std::time::Duration),

    /// Every retry attempt failed; wraps the final failure.
    #[error("request failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<Error> },
}

impl Error {
    pub fn auth(message: impl Into<String>) -> Self {
        Error::Auth(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Check whether a repeated attempt could plausibly succeed.
    ///
    /// Deterministic given the status code: transport failures, 5xx, and
    /// rate limiting (429) are retryable; everything else is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::Upstream { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Error::Auth(_)
                | Error::Validation(_)
                | Error::Upstream {
                    status: 401 | 403,
                    ..
                }
        )
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Upstream { status, .. } => Some(*status),
            Error::RetriesExhausted { last, .. } => last.status_code(),
            _ => None,
        }
    }

    /// Structured retry-after hint, when the upstream provided one.
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Error::Upstream { retry_after, .. } => *retry_after,
            Error::RetriesExhausted { last, .. } => last.retry_after(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
