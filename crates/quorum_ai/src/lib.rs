//! Quorum routing core.
//!
//! Classifies chat requests, routes them to one backend or fans them out to
//! several, then ranks or merges the answers. Backends are reached only
//! through the [`ModelInvoker`] trait; [`HttpGateway`] is the HTTP
//! implementation.

pub mod catalog;
pub mod dispatch;
pub mod error;
pub mod evaluator;
mod judge;
pub mod providers;
pub mod routing;
pub mod service;
pub mod stats;
pub mod synthesizer;
pub mod types;

#[cfg(test)]
mod testing;

pub use catalog::{CatalogSnapshot, ModelCatalog, ModelDescriptor};
pub use dispatch::{InvocationOutcome, InvocationResult, ParallelDispatcher};
pub use error::RouterError;
pub use evaluator::{EvaluationResult, ResponseEvaluator};
pub use providers::{HttpGateway, ModelInvoker, ProviderError};
pub use routing::{PromptAnalysis, PromptClassifier, RoutingDecision, RoutingPolicy};
pub use service::{
    Orchestrator, OrchestratorSettings, ParallelBestResponse, ParallelSynthesisResponse,
    RoutedResponse,
};
pub use stats::{StatsRecorder, StatsSummary};
pub use synthesizer::{ResponseSynthesizer, SynthesisResult};
pub use types::{ChatMessage, InvocationParams, MessageRole, TaskCategory};
