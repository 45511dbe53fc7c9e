use crate::providers::ProviderError;

/// Errors that cross the orchestration boundary. Per-backend failures inside
/// a fan-out never surface here; they stay in their `InvocationResult`.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The single-target path found no enabled backend.
    #[error("No available model: the catalog has no enabled entries")]
    NoAvailableModel,

    /// Every backend in a fan-out batch failed.
    #[error("All models failed to generate responses ({attempted} attempted)")]
    AllInvocationsFailed { attempted: usize },

    /// The single routed backend failed.
    #[error("Model '{model_id}' failed: {source}")]
    Invocation {
        model_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
