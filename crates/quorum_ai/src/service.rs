//! Orchestrator: the caller-facing surface of the routing core.
//!
//! Wires the catalog, classifier, routing policy, dispatcher, evaluator,
//! synthesizer and stats recorder behind one [`ModelInvoker`] and exposes
//! the five request operations. Every request works on a single catalog
//! snapshot taken when it starts.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, info, info_span};

use quorum_core::{ClassifierMode, QuorumConfig};

use crate::catalog::{CatalogSnapshot, ModelCatalog, ModelDescriptor};
use crate::dispatch::{InvocationResult, ParallelDispatcher};
use crate::error::RouterError;
use crate::evaluator::{EvaluationResult, ResponseEvaluator};
use crate::providers::{ModelInvoker, ProviderError, invoke_within};
use crate::routing::{PromptAnalysis, PromptClassifier, RoutingDecision, RoutingPolicy};
use crate::stats::StatsRecorder;
use crate::synthesizer::{ResponseSynthesizer, SynthesisResult};
use crate::types::{ChatMessage, InvocationParams, latest_user_prompt, validate_messages};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// The subset of [`QuorumConfig`] the orchestrator needs.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub router_model: String,
    pub judge_model: String,
    pub synthesis_model: String,
    pub classifier_mode: ClassifierMode,
    pub per_call_timeout: Duration,
    /// Catalog ids to fan out to; `None` means every enabled model.
    pub parallel_targets: Option<Vec<String>>,
}

impl OrchestratorSettings {
    pub fn from_config(config: &QuorumConfig) -> Self {
        Self {
            router_model: config.router_model.clone(),
            judge_model: config.judge_model.clone(),
            synthesis_model: config.synthesis_model.clone(),
            classifier_mode: config.classifier_mode,
            per_call_timeout: Duration::from_secs(config.per_call_timeout_secs),
            parallel_targets: config.parallel_targets.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RoutedResponse {
    pub content: String,
    pub decision: RoutingDecision,
    pub analysis: PromptAnalysis,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParallelBestResponse {
    pub content: String,
    pub best_model: String,
    pub evaluation: EvaluationResult,
    pub analysis: PromptAnalysis,
    /// One entry per target, in dispatch order.
    pub results: Vec<InvocationResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParallelSynthesisResponse {
    pub content: String,
    pub synthesis: SynthesisResult,
    pub evaluation: EvaluationResult,
    pub best_individual_model: String,
    pub analysis: PromptAnalysis,
    /// One entry per target, in dispatch order.
    pub results: Vec<InvocationResult>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    catalog: Arc<ModelCatalog>,
    invoker: Arc<dyn ModelInvoker>,
    classifier: PromptClassifier,
    policy: RoutingPolicy,
    dispatcher: ParallelDispatcher,
    evaluator: Arc<ResponseEvaluator>,
    synthesizer: ResponseSynthesizer,
    stats: Arc<StatsRecorder>,
    per_call_timeout: Duration,
    parallel_targets: Option<Vec<String>>,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<ModelCatalog>,
        invoker: Arc<dyn ModelInvoker>,
        stats: Arc<StatsRecorder>,
        settings: OrchestratorSettings,
    ) -> Self {
        let call_timeout = settings.per_call_timeout;
        let classifier = match settings.classifier_mode {
            ClassifierMode::Judge => {
                PromptClassifier::judge(Arc::clone(&invoker), settings.router_model)
            }
            ClassifierMode::Heuristic => PromptClassifier::heuristic(),
        }
        .with_timeout(call_timeout);
        let evaluator = Arc::new(
            ResponseEvaluator::new(Arc::clone(&invoker), settings.judge_model)
                .with_timeout(call_timeout),
        );
        let synthesizer = ResponseSynthesizer::new(
            Arc::clone(&invoker),
            settings.synthesis_model,
            Arc::clone(&evaluator),
        )
        .with_timeout(call_timeout);

        info!(
            models = catalog.snapshot().len(),
            classifier = ?settings.classifier_mode,
            timeout_secs = settings.per_call_timeout.as_secs(),
            "Orchestrator ready"
        );

        Self {
            dispatcher: ParallelDispatcher::new(Arc::clone(&invoker)),
            catalog,
            invoker,
            classifier,
            policy: RoutingPolicy,
            evaluator,
            synthesizer,
            stats,
            per_call_timeout: settings.per_call_timeout,
            parallel_targets: settings.parallel_targets,
        }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn stats(&self) -> &StatsRecorder {
        &self.stats
    }

    /// Flush and close the stats log.
    pub async fn shutdown(&self) {
        self.stats.shutdown().await;
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Classify the request, pick one backend and forward the request to it.
    pub async fn route(
        &self,
        messages: &[ChatMessage],
        params: &InvocationParams,
    ) -> Result<(String, RoutingDecision), RouterError> {
        let routed = self.route_with_metadata(messages, params).await?;
        Ok((routed.content, routed.decision))
    }

    /// Like [`route`](Self::route) but also returns the prompt analysis.
    pub async fn route_with_metadata(
        &self,
        messages: &[ChatMessage],
        params: &InvocationParams,
    ) -> Result<RoutedResponse, RouterError> {
        validate_messages(messages).map_err(RouterError::InvalidRequest)?;
        let snapshot = self.catalog.snapshot();
        self.route_on(&snapshot, messages, params)
            .instrument(request_span("route"))
            .await
    }

    /// Fan out to every target and return the response the judge ranks best.
    pub async fn parallel_best(
        &self,
        messages: &[ChatMessage],
        params: &InvocationParams,
    ) -> Result<ParallelBestResponse, RouterError> {
        validate_messages(messages).map_err(RouterError::InvalidRequest)?;
        let snapshot = self.catalog.snapshot();
        self.best_on(&snapshot, messages, params)
            .instrument(request_span("parallel_best"))
            .await
    }

    /// Fan out to every target and merge the successful responses.
    pub async fn parallel_synthesize(
        &self,
        messages: &[ChatMessage],
        params: &InvocationParams,
    ) -> Result<ParallelSynthesisResponse, RouterError> {
        validate_messages(messages).map_err(RouterError::InvalidRequest)?;
        let snapshot = self.catalog.snapshot();
        self.synthesize_on(&snapshot, messages, params)
            .instrument(request_span("parallel_synthesize"))
            .await
    }

    /// Classify a bare prompt without routing it.
    pub async fn analyze(&self, prompt: &str) -> PromptAnalysis {
        self.classifier
            .classify(&[ChatMessage::user(prompt)])
            .instrument(request_span("analyze"))
            .await
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn route_on(
        &self,
        snapshot: &CatalogSnapshot,
        messages: &[ChatMessage],
        params: &InvocationParams,
    ) -> Result<RoutedResponse, RouterError> {
        let analysis = self.classifier.classify(messages).await;
        let decision = self.policy.decide(&analysis, snapshot)?;
        info!(
            model = %decision.selected,
            category = %analysis.category,
            confidence = decision.confidence,
            "Routing to single model"
        );

        let content = self
            .invoke_single(&decision.qualified_id, messages, params)
            .await
            .map_err(|source| RouterError::Invocation {
                model_id: decision.selected.clone(),
                source,
            })?;

        self.stats.record(analysis.category, &decision.selected);
        Ok(RoutedResponse {
            content,
            decision,
            analysis,
        })
    }

    async fn best_on(
        &self,
        snapshot: &CatalogSnapshot,
        messages: &[ChatMessage],
        params: &InvocationParams,
    ) -> Result<ParallelBestResponse, RouterError> {
        let (analysis, results) = self.classify_and_dispatch(snapshot, messages, params).await?;
        let prompt = latest_user_prompt(messages);
        let evaluation = self.evaluator.evaluate(prompt, &results).await?;
        let (best_model, content) = best_of(&evaluation, &results)?;

        self.stats.record(analysis.category, &best_model);
        Ok(ParallelBestResponse {
            content,
            best_model,
            evaluation,
            analysis,
            results,
        })
    }

    /// Ranks first so the synthesis fallback never needs a second judge call.
    async fn synthesize_on(
        &self,
        snapshot: &CatalogSnapshot,
        messages: &[ChatMessage],
        params: &InvocationParams,
    ) -> Result<ParallelSynthesisResponse, RouterError> {
        let (analysis, results) = self.classify_and_dispatch(snapshot, messages, params).await?;
        let prompt = latest_user_prompt(messages);
        let evaluation = self.evaluator.evaluate(prompt, &results).await?;
        let (best_individual_model, _) = best_of(&evaluation, &results)?;
        let synthesis = self
            .synthesizer
            .synthesize(prompt, &results, Some(&evaluation))
            .await?;

        self.stats.record(analysis.category, &best_individual_model);
        Ok(ParallelSynthesisResponse {
            content: synthesis.content.clone(),
            synthesis,
            evaluation,
            best_individual_model,
            analysis,
            results,
        })
    }

    /// Enabled fan-out targets in the snapshot, in configured order. A
    /// repeated id is dispatched once, at its first position.
    fn parallel_targets(&self, snapshot: &CatalogSnapshot) -> Vec<ModelDescriptor> {
        match self.parallel_targets {
            Some(ref ids) => {
                let mut seen = HashSet::new();
                ids.iter()
                    .filter(|id| seen.insert(*id))
                    .filter_map(|id| snapshot.get(id))
                    .filter(|m| m.enabled)
                    .cloned()
                    .collect()
            }
            None => snapshot.list_enabled().into_iter().cloned().collect(),
        }
    }

    /// Classification and fan-out run side by side.
    async fn classify_and_dispatch(
        &self,
        snapshot: &CatalogSnapshot,
        messages: &[ChatMessage],
        params: &InvocationParams,
    ) -> Result<(PromptAnalysis, Vec<InvocationResult>), RouterError> {
        let targets = self.parallel_targets(snapshot);
        if targets.is_empty() {
            return Err(RouterError::NoAvailableModel);
        }

        let (analysis, results) = tokio::join!(
            self.classifier.classify(messages),
            self.dispatcher
                .dispatch(&targets, messages, params, self.per_call_timeout),
        );

        let ok = results.iter().filter(|r| r.is_ok()).count();
        debug!(targets = targets.len(), ok, category = %analysis.category, "Fan-out complete");
        Ok((analysis, results))
    }

    async fn invoke_single(
        &self,
        qualified_id: &str,
        messages: &[ChatMessage],
        params: &InvocationParams,
    ) -> Result<String, ProviderError> {
        invoke_within(
            self.invoker.as_ref(),
            qualified_id,
            messages,
            params,
            self.per_call_timeout,
        )
        .await
    }
}

fn request_span(operation: &'static str) -> tracing::Span {
    info_span!("request", op = operation, id = %uuid::Uuid::new_v4())
}

/// The top-ranked model and its content.
fn best_of(
    evaluation: &EvaluationResult,
    results: &[InvocationResult],
) -> Result<(String, String), RouterError> {
    evaluation
        .best_model()
        .and_then(|best| {
            results
                .iter()
                .find(|r| r.model_id == best)
                .and_then(|r| r.ok_content())
                .map(|content| (best.to_owned(), content.to_owned()))
        })
        .ok_or(RouterError::AllInvocationsFailed {
            attempted: results.len(),
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
