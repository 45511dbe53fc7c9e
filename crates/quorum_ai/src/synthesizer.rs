//! Response Synthesizer
//!
//! Merges the successful responses of a fan-out into one answer through a
//! designated synthesis backend. If that backend fails, the best single
//! response is returned instead, flagged `degraded`.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::dispatch::InvocationResult;
use crate::error::RouterError;
use crate::evaluator::{EvaluationResult, ResponseEvaluator};
use crate::providers::{DEFAULT_CALL_TIMEOUT, ModelInvoker, invoke_within};
use crate::types::{ChatMessage, InvocationParams};

const SYNTHESIS_PARAMS: InvocationParams = InvocationParams {
    temperature: Some(0.3),
    max_tokens: Some(2000),
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisResult {
    pub content: String,
    /// Models whose content went into `content`, in dispatch order.
    pub contributing_models: Vec<String>,
    pub degraded: bool,
}

pub struct ResponseSynthesizer {
    invoker: Arc<dyn ModelInvoker>,
    synthesis_model: String,
    evaluator: Arc<ResponseEvaluator>,
    call_timeout: Duration,
}

impl ResponseSynthesizer {
    /// `evaluator` supplies the ranking for the fallback path when the
    /// caller has none.
    pub fn new(
        invoker: Arc<dyn ModelInvoker>,
        synthesis_model: impl Into<String>,
        evaluator: Arc<ResponseEvaluator>,
    ) -> Self {
        Self {
            invoker,
            synthesis_model: synthesis_model.into(),
            evaluator,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Bound the synthesis call. A synthesis backend that does not answer in
    /// time falls back to the best single response.
    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub async fn synthesize(
        &self,
        prompt: &str,
        results: &[InvocationResult],
        ranking: Option<&EvaluationResult>,
    ) -> Result<SynthesisResult, RouterError> {
        let candidates: Vec<(&str, &str)> = results
            .iter()
            .filter_map(|r| r.ok_content().map(|c| (r.model_id.as_str(), c)))
            .collect();
        if candidates.is_empty() {
            return Err(RouterError::AllInvocationsFailed {
                attempted: results.len(),
            });
        }

        let request = [ChatMessage::user(Self::synthesis_prompt(prompt, &candidates))];
        let failure = match invoke_within(
            self.invoker.as_ref(),
            &self.synthesis_model,
            &request,
            &SYNTHESIS_PARAMS,
            self.call_timeout,
        )
        .await
        {
            Ok(content) if !content.trim().is_empty() => {
                let contributing_models: Vec<String> =
                    candidates.iter().map(|(id, _)| (*id).to_owned()).collect();
                info!(
                    model = %self.synthesis_model,
                    sources = contributing_models.len(),
                    "Synthesized responses"
                );
                return Ok(SynthesisResult {
                    content,
                    contributing_models,
                    degraded: false,
                });
            }
            Ok(_) => "empty synthesis".to_owned(),
            Err(e) => e.to_string(),
        };

        warn!(model = %self.synthesis_model, error = %failure, "Synthesis failed, using best single response");
        self.best_single(prompt, results, &candidates, ranking).await
    }

    async fn best_single(
        &self,
        prompt: &str,
        results: &[InvocationResult],
        candidates: &[(&str, &str)],
        ranking: Option<&EvaluationResult>,
    ) -> Result<SynthesisResult, RouterError> {
        let find = |id: &str| candidates.iter().find(|(m, _)| *m == id).copied();

        let supplied = ranking.and_then(|r| r.best_model()).and_then(find);
        let (model_id, content) = match supplied {
            Some(hit) => hit,
            None => {
                let evaluation = self.evaluator.evaluate(prompt, results).await?;
                evaluation
                    .best_model()
                    .and_then(find)
                    .unwrap_or(candidates[0])
            }
        };

        Ok(SynthesisResult {
            content: content.to_owned(),
            contributing_models: vec![model_id.to_owned()],
            degraded: true,
        })
    }

    fn synthesis_prompt(prompt: &str, candidates: &[(&str, &str)]) -> String {
        let responses = candidates
            .iter()
            .map(|(id, content)| format!("=== Response from {id} ===\n{content}"))
            .collect::<Vec<_>>()
            .join("\n\n");

        format!(
            "Several AI models answered the same question. Combine their answers into \
             one response that keeps the strongest, correct points of each, resolves \
             contradictions, and drops repetition. Reply with the final answer only, \
             without mentioning the individual models.\n\n\
             Question:\n\"\"\"\n{prompt}\n\"\"\"\n\n{responses}"
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
