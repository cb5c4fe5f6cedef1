//! Propagation policy for authentication outcomes.

use super::identity::{Identity, RequestMetadata};
use super::strategy::AuthStrategy;
use crate::Result;

/// Wraps a strategy with the optional/required decision.
///
/// In optional mode an authentication failure lets the call proceed without
/// an identity (the upstream client then falls back to its service key). In
/// required mode the failure is surfaced to the caller.
#[derive(Debug)]
pub struct AuthGate<S> {
    strategy: S,
    required: bool,
}

impl<S: AuthStrategy> AuthGate<S> {
    pub fn new(strategy: S, required: bool) -> Self {
        Self { strategy, required }
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Resolve the caller under this gate's policy.
    pub async fn resolve(&self, meta: &RequestMetadata) -> Result<Option<Identity>> {
        match self.strategy.authenticate(meta).await {
            Ok(identity) => Ok(Some(identity)),
            Err(e) if !self.required => {
                tracing::debug!(
                    strategy = self.strategy.name(),
                    error = %e,
                    "authentication failed, proceeding without identity"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
