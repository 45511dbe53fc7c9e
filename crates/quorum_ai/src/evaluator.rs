//! Response Evaluator
//!
//! Ranks the successful responses of a fan-out with one call to a judge
//! backend. When the judge is unreachable or answers in the wrong shape the
//! ranking falls back to response length and is flagged `degraded`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::dispatch::InvocationResult;
use crate::error::RouterError;
use crate::judge::{extract_json_object, truncate};
use crate::providers::{DEFAULT_CALL_TIMEOUT, ModelInvoker, invoke_within};
use crate::types::{ChatMessage, InvocationParams};

/// Inclusive score range the judge is asked to use.
pub const SCORE_RANGE: std::ops::RangeInclusive<i64> = 1..=10;

const JUDGE_PARAMS: InvocationParams = InvocationParams {
    temperature: Some(0.1),
    max_tokens: Some(500),
};

/// Outcome of ranking a batch of responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Model ids, best first. Only successful responses appear.
    pub ranking: Vec<String>,
    /// Judge scores; empty when `degraded`.
    pub scores: BTreeMap<String, i64>,
    pub reasoning: String,
    pub degraded: bool,
}

impl EvaluationResult {
    pub fn best_model(&self) -> Option<&str> {
        self.ranking.first().map(String::as_str)
    }
}

#[derive(Deserialize)]
struct JudgeScores {
    scores: BTreeMap<String, i64>,
    #[serde(default)]
    best_model: Option<String>,
    #[serde(default)]
    reasoning: String,
}

/// A successful response, in dispatch order.
struct Candidate<'a> {
    model_id: &'a str,
    content: &'a str,
}

// ---------------------------------------------------------------------------
// ResponseEvaluator
// ---------------------------------------------------------------------------

pub struct ResponseEvaluator {
    invoker: Arc<dyn ModelInvoker>,
    judge_model: String,
    call_timeout: Duration,
}

impl ResponseEvaluator {
    pub fn new(invoker: Arc<dyn ModelInvoker>, judge_model: impl Into<String>) -> Self {
        Self {
            invoker,
            judge_model: judge_model.into(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Bound the judge call. A judge that does not answer in time degrades
    /// to the length ranking.
    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Rank the `ok` entries of `results` for the question `prompt`.
    ///
    /// Fails only when no entry succeeded. Judge failures degrade instead.
    pub async fn evaluate(
        &self,
        prompt: &str,
        results: &[InvocationResult],
    ) -> Result<EvaluationResult, RouterError> {
        let candidates: Vec<Candidate<'_>> = results
            .iter()
            .filter_map(|r| {
                r.ok_content().map(|content| Candidate {
                    model_id: &r.model_id,
                    content,
                })
            })
            .collect();

        if candidates.is_empty() {
            return Err(RouterError::AllInvocationsFailed {
                attempted: results.len(),
            });
        }

        let request = [ChatMessage::user(Self::judge_prompt(prompt, &candidates))];
        let verdict = match invoke_within(
            self.invoker.as_ref(),
            &self.judge_model,
            &request,
            &JUDGE_PARAMS,
            self.call_timeout,
        )
        .await
        {
            Ok(reply) => Self::parse_scores(&reply, &candidates),
            Err(e) => Err(format!("judge call failed: {e}")),
        };

        let evaluation = match verdict {
            Ok(evaluation) => evaluation,
            Err(reason) => {
                warn!(judge = %self.judge_model, %reason, "Falling back to length ranking");
                Self::rank_by_length(&candidates, &reason)
            }
        };

        info!(
            best = evaluation.best_model().unwrap_or_default(),
            candidates = candidates.len(),
            degraded = evaluation.degraded,
            "Evaluated responses"
        );
        Ok(evaluation)
    }

    fn judge_prompt(prompt: &str, candidates: &[Candidate<'_>]) -> String {
        let mut out = format!(
            "You are judging answers from several AI models to the same question.\n\n\
             Question:\n\"\"\"\n{prompt}\n\"\"\"\n\n"
        );
        for c in candidates {
            out.push_str(&format!(
                "=== Response from {} ===\n{}\n\n",
                c.model_id, c.content
            ));
        }
        let ids = candidates
            .iter()
            .map(|c| format!("\"{}\": <score>", c.model_id))
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!(
            "Score every response for accuracy, completeness, clarity and relevance \
             on an integer scale from {} (worst) to {} (best).\n\
             Respond with ONLY a JSON object in this exact format:\n\
             {{\"scores\": {{{ids}}}, \"best_model\": \"<model>\", \
             \"reasoning\": \"<one or two sentences>\"}}",
            SCORE_RANGE.start(),
            SCORE_RANGE.end(),
        ));
        out
    }

    /// Validate the judge reply and compute the ranking from its scores.
    fn parse_scores(reply: &str, candidates: &[Candidate<'_>]) -> Result<EvaluationResult, String> {
        let unparsable = || format!("unparsable judge reply: {}", truncate(reply, 120));
        let value = extract_json_object(reply).ok_or_else(unparsable)?;
        let parsed: JudgeScores = serde_json::from_value(value).map_err(|_| unparsable())?;

        let mut scores = BTreeMap::new();
        for c in candidates {
            match parsed.scores.get(c.model_id) {
                Some(score) if SCORE_RANGE.contains(score) => {
                    scores.insert(c.model_id.to_owned(), *score);
                }
                Some(score) => return Err(format!("score {score} for {} out of range", c.model_id)),
                None => return Err(format!("judge did not score {}", c.model_id)),
            }
        }

        // Stable sort keeps dispatch order among equal scores.
        let mut ranking: Vec<&str> = candidates.iter().map(|c| c.model_id).collect();
        ranking.sort_by_key(|id| std::cmp::Reverse(scores[*id]));

        if let Some(named) = parsed.best_model.as_deref() {
            if ranking.first() != Some(&named) {
                debug!(named, ranked = ranking[0], "Judge's best_model disagrees with its scores");
            }
        }

        Ok(EvaluationResult {
            ranking: ranking.into_iter().map(str::to_owned).collect(),
            scores,
            reasoning: parsed.reasoning,
            degraded: false,
        })
    }

    /// Longest response first, dispatch order breaking ties.
    fn rank_by_length(candidates: &[Candidate<'_>], reason: &str) -> EvaluationResult {
        let mut ranked: Vec<&Candidate<'_>> = candidates.iter().collect();
        ranked.sort_by_key(|c| std::cmp::Reverse(c.content.chars().count()));

        EvaluationResult {
            ranking: ranked.into_iter().map(|c| c.model_id.to_owned()).collect(),
            scores: BTreeMap::new(),
            reasoning: format!("{reason}; ranked by response length instead"),
            degraded: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
