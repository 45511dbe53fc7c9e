//! The Model Invocation Gateway seam.
//!
//! The orchestration core only ever talks to backends through
//! [`ModelInvoker`]; [`http_gateway::HttpGateway`] is the production
//! implementation.

pub mod http_gateway;

use async_trait::async_trait;
use std::time::Duration;

use crate::types::{ChatMessage, InvocationParams};

pub use http_gateway::HttpGateway;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors a gateway may return for a single call. None of them are retried
/// by the orchestration core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited")]
    RateLimit,

    #[error("Invalid API key")]
    InvalidKey,

    #[error("Model not available: {0}")]
    ModelUnavailable(String),

    #[error("Timeout")]
    Timeout,

    #[error("Provider error: {0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Uniform interface over every backend.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Send `messages` to the backend named by `qualified_id`
    /// (`provider:model`) and return the generated text.
    async fn invoke(
        &self,
        qualified_id: &str,
        messages: &[ChatMessage],
        params: &InvocationParams,
    ) -> Result<String, ProviderError>;
}

/// Bound on a single backend call when none is configured.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Invoke `qualified_id`, giving up after `limit`. An elapsed limit is
/// reported as [`ProviderError::Timeout`].
pub async fn invoke_within(
    invoker: &dyn ModelInvoker,
    qualified_id: &str,
    messages: &[ChatMessage],
    params: &InvocationParams,
    limit: Duration,
) -> Result<String, ProviderError> {
    match tokio::time::timeout(limit, invoker.invoke(qualified_id, messages, params)).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout),
    }
}

/// Split a qualified id into `(provider, model)`.
pub fn split_qualified_id(qualified_id: &str) -> Result<(&str, &str), ProviderError> {
    match qualified_id.split_once(':') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
            Ok((provider, model))
        }
        _ => Err(ProviderError::ModelUnavailable(qualified_id.to_owned())),
    }
}
