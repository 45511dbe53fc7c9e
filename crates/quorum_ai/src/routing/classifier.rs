//! Prompt Classifier
//!
//! Derives a [`TaskCategory`] and confidence for a request, either by asking
//! a router backend (judge mode) or from local keyword rules (heuristic
//! mode). Classification is advisory: any judge failure downgrades to
//! `general` with zero confidence instead of surfacing an error.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use quorum_core::ClassifierMode;

use crate::judge::{extract_json_object, truncate};
use crate::providers::{DEFAULT_CALL_TIMEOUT, ModelInvoker, invoke_within};
use crate::types::{ChatMessage, InvocationParams, TaskCategory, latest_user_prompt};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Feature key set to `"true"` when classification fell back to `general`.
pub const FEATURE_DEGRADED: &str = "classification_degraded";

/// Result of classifying one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptAnalysis {
    pub category: TaskCategory,
    /// In `[0, 1]`.
    pub confidence: f32,
    pub features: BTreeMap<String, String>,
}

impl PromptAnalysis {
    pub fn new(category: TaskCategory, confidence: f32) -> Self {
        Self {
            category,
            confidence: confidence.clamp(0.0, 1.0),
            features: BTreeMap::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.features.get(FEATURE_DEGRADED).is_some_and(|v| v == "true")
    }

    fn with_feature(mut self, key: &str, value: impl Into<String>) -> Self {
        self.features.insert(key.to_owned(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Heuristic patterns
// ---------------------------------------------------------------------------

/// Keyword rules per category. Earlier entries win when several match.
static CATEGORY_PATTERNS: Lazy<Vec<(TaskCategory, Vec<Regex>)>> = Lazy::new(|| {
    vec![
        (
            TaskCategory::Coding,
            compile_patterns(&[
                r"(?i)\b(code|function|class|method|compile[rs]?|refactor|debug(ging)?|bug|stack ?trace)\b",
                r"(?i)\b(python|rust|javascript|typescript|java|golang|c\+\+|sql|regex|api|script)\b",
                r"```",
            ]),
        ),
        (
            TaskCategory::Reasoning,
            compile_patterns(&[
                r"(?i)\b(prove|proof|theorem|logic(al)?|deduce|puzzle|riddle|paradox)\b",
                r"(?i)\b(solve|equation|probability|calculate|integral|derivative)\b",
                r"(?i)step[- ]by[- ]step|\bwhy (does|is|do)\b",
            ]),
        ),
        (
            TaskCategory::Creative,
            compile_patterns(&[
                r"(?i)\b(story|poem|poetry|haiku|lyrics|song|novel|fiction|screenplay)\b",
                r"(?i)\b(imagine|brainstorm|creative|invent|slogan|tagline)\b",
            ]),
        ),
        (
            TaskCategory::Analysis,
            compile_patterns(&[
                r"(?i)\b(analy[sz]e|analysis|compare|comparison|evaluate|assess|trade-?offs?)\b",
                r"(?i)\b(summari[sz]e|dataset|data|trends?|statistics|report|pros and cons)\b",
            ]),
        ),
        (
            TaskCategory::Simple,
            compile_patterns(&[
                r"(?i)^\s*(what is|what's|who is|who was|when (is|was|did)|where is|define|translate)\b",
                r"(?i)\b(capital of|how many|quick question|tl;?dr)\b",
            ]),
        ),
    ]
});

/// Prompts at most this long with no keyword hit are treated as simple.
const SHORT_PROMPT_CHARS: usize = 80;

fn compile_patterns(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("Bad regex pattern `{p}`: {e}")))
        .collect()
}

// ---------------------------------------------------------------------------
// PromptClassifier
// ---------------------------------------------------------------------------

/// Judge calls need little room and no creativity.
const JUDGE_PARAMS: InvocationParams = InvocationParams {
    temperature: Some(0.1),
    max_tokens: Some(200),
};

#[derive(Deserialize)]
struct JudgeVerdict {
    category: String,
    confidence: f32,
    #[serde(default)]
    task: Option<String>,
}

/// Classifies requests into task categories.
pub struct PromptClassifier {
    mode: ClassifierMode,
    router_model: String,
    invoker: Option<Arc<dyn ModelInvoker>>,
    call_timeout: Duration,
}

impl PromptClassifier {
    /// Classify by asking `router_model` (a qualified id).
    pub fn judge(invoker: Arc<dyn ModelInvoker>, router_model: impl Into<String>) -> Self {
        Self {
            mode: ClassifierMode::Judge,
            router_model: router_model.into(),
            invoker: Some(invoker),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Classify locally without any backend call.
    pub fn heuristic() -> Self {
        Self {
            mode: ClassifierMode::Heuristic,
            router_model: String::new(),
            invoker: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Bound the router call; a stalled router fails open like any other
    /// judge failure.
    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn mode(&self) -> ClassifierMode {
        self.mode
    }

    /// Classify a full message sequence. Never fails.
    pub async fn classify(&self, messages: &[ChatMessage]) -> PromptAnalysis {
        let prompt = latest_user_prompt(messages);
        let analysis = match (self.mode, self.invoker.as_ref()) {
            (ClassifierMode::Judge, Some(invoker)) => {
                self.classify_with_judge(invoker.as_ref(), prompt).await
            }
            _ => Self::classify_heuristic(prompt),
        };

        debug!(
            category = %analysis.category,
            confidence = analysis.confidence,
            degraded = analysis.is_degraded(),
            "Classified prompt"
        );

        analysis
            .with_feature("message_count", messages.len().to_string())
            .with_feature("prompt_chars", prompt.chars().count().to_string())
    }

    // ------------------------------------------------------------------
    // Judge mode
    // ------------------------------------------------------------------

    async fn classify_with_judge(&self, invoker: &dyn ModelInvoker, prompt: &str) -> PromptAnalysis {
        let request = [ChatMessage::user(Self::judge_prompt(prompt))];
        let reply = match invoke_within(
            invoker,
            &self.router_model,
            &request,
            &JUDGE_PARAMS,
            self.call_timeout,
        )
        .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(model = %self.router_model, error = %e, "Classification call failed");
                return Self::fail_open(&e.to_string());
            }
        };

        match Self::parse_verdict(&reply) {
            Some(analysis) => analysis.with_feature("classification_source", "judge"),
            None => {
                warn!(
                    model = %self.router_model,
                    reply = %truncate(&reply, 120),
                    "Unparsable classification reply"
                );
                Self::fail_open("unparsable classification reply")
            }
        }
    }

    fn judge_prompt(prompt: &str) -> String {
        let categories = TaskCategory::ALL
            .iter()
            .map(|c| format!("- {c}: {}", c.affinity_tags().join(", ")))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "You classify user requests for a model router.\n\n\
             Categories:\n{categories}\n\n\
             User request:\n\"\"\"\n{prompt}\n\"\"\"\n\n\
             Respond with ONLY a JSON object in this exact format:\n\
             {{\"category\": \"<one category name>\", \"confidence\": <0.0 to 1.0>, \
             \"task\": \"<two or three word task name>\"}}"
        )
    }

    fn parse_verdict(reply: &str) -> Option<PromptAnalysis> {
        let value = extract_json_object(reply)?;
        let verdict: JudgeVerdict = serde_json::from_value(value).ok()?;
        let category = TaskCategory::parse(&verdict.category)?;
        if !verdict.confidence.is_finite() {
            return None;
        }

        let mut analysis = PromptAnalysis::new(category, verdict.confidence);
        if let Some(task) = verdict.task.filter(|t| !t.trim().is_empty()) {
            analysis = analysis.with_feature("task_name", task.trim());
        }
        Some(analysis)
    }

    fn fail_open(detail: &str) -> PromptAnalysis {
        PromptAnalysis::new(TaskCategory::General, 0.0)
            .with_feature(FEATURE_DEGRADED, "true")
            .with_feature("classification_source", "fallback")
            .with_feature("classification_error", detail)
    }

    // ------------------------------------------------------------------
    // Heuristic mode
    // ------------------------------------------------------------------

    fn classify_heuristic(prompt: &str) -> PromptAnalysis {
        let mut best: Option<(TaskCategory, usize, String)> = None;

        for (category, patterns) in CATEGORY_PATTERNS.iter() {
            let hits: Vec<_> = patterns.iter().filter_map(|re| re.find(prompt)).collect();
            let Some(first) = hits.first() else { continue };
            // Strictly greater keeps the earlier category on equal hit counts.
            if best.as_ref().is_none_or(|(_, n, _)| hits.len() > *n) {
                best = Some((*category, hits.len(), first.as_str().trim().to_lowercase()));
            }
        }

        let analysis = match best {
            Some((category, hits, keyword)) => {
                let confidence = 0.5 + 0.15 * (hits.saturating_sub(1)) as f32;
                PromptAnalysis::new(category, confidence.min(0.9)).with_feature("task_name", keyword)
            }
            None if prompt.chars().count() <= SHORT_PROMPT_CHARS => {
                PromptAnalysis::new(TaskCategory::Simple, 0.4)
            }
            None => PromptAnalysis::new(TaskCategory::General, 0.3),
        };
        analysis.with_feature("classification_source", "heuristic")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;
    use crate::testing::ScriptedInvoker;

    const ROUTER: &str = "test:router";

    fn judge_with(invoker: ScriptedInvoker) -> (Arc<ScriptedInvoker>, PromptClassifier) {
        let invoker = Arc::new(invoker);
        let classifier = PromptClassifier::judge(invoker.clone(), ROUTER);
        (invoker, classifier)
    }

    #[tokio::test]
    async fn judge_reply_is_parsed() {
        let (invoker, classifier) = judge_with(ScriptedInvoker::new().text(
            ROUTER,
            r#"Here you go: {"category": "Coding", "confidence": 0.92, "task": "fix bug"}"#,
        ));

        let analysis = classifier
            .classify(&[ChatMessage::user("Why does my Rust code panic?")])
            .await;

        assert_eq!(analysis.category, TaskCategory::Coding);
        assert!((analysis.confidence - 0.92).abs() < f32::EPSILON);
        assert!(!analysis.is_degraded());
        assert_eq!(analysis.features["classification_source"], "judge");
        assert_eq!(analysis.features["task_name"], "fix bug");
        assert_eq!(analysis.features["message_count"], "1");
        assert_eq!(invoker.calls(), 1);
    }

    #[tokio::test]
    async fn judge_uses_low_temperature_and_latest_user_prompt() {
        let (invoker, classifier) = judge_with(
            ScriptedInvoker::new().text(ROUTER, r#"{"category":"creative","confidence":0.7}"#),
        );
        classifier
            .classify(&[
                ChatMessage::user("old question"),
                ChatMessage::user("write a haiku about rust"),
            ])
            .await;

        let sent = invoker.last_messages(ROUTER).unwrap();
        assert!(sent[0].content.contains("write a haiku about rust"));
        assert!(!sent[0].content.contains("old question"));
        assert_eq!(invoker.last_params(ROUTER), Some(JUDGE_PARAMS));
    }

    #[tokio::test]
    async fn judge_confidence_is_clamped() {
        let (_, classifier) = judge_with(
            ScriptedInvoker::new().text(ROUTER, r#"{"category":"analysis","confidence":7}"#),
        );
        let analysis = classifier.classify(&[ChatMessage::user("compare")]).await;
        assert_eq!(analysis.confidence, 1.0);
    }

    #[tokio::test]
    async fn judge_failure_fails_open() {
        let (_, classifier) =
            judge_with(ScriptedInvoker::new().fail(ROUTER, ProviderError::RateLimit));

        let analysis = classifier.classify(&[ChatMessage::user("hello")]).await;

        assert_eq!(analysis.category, TaskCategory::General);
        assert_eq!(analysis.confidence, 0.0);
        assert!(analysis.is_degraded());
        assert_eq!(analysis.features[FEATURE_DEGRADED], "true");
        assert_eq!(analysis.features["classification_source"], "fallback");
    }

    #[tokio::test]
    async fn stalled_router_fails_open_within_timeout() {
        let invoker = Arc::new(ScriptedInvoker::new().stall(ROUTER));
        let classifier =
            PromptClassifier::judge(invoker, ROUTER).with_timeout(Duration::from_millis(100));

        let started = std::time::Instant::now();
        let analysis = classifier.classify(&[ChatMessage::user("hello")]).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(analysis.is_degraded());
        assert_eq!(analysis.category, TaskCategory::General);
        assert_eq!(analysis.features["classification_error"], "Timeout");
    }

    #[tokio::test]
    async fn unknown_category_fails_open() {
        for reply in [
            "I think it is coding.",
            r#"{"category": "poetry", "confidence": 0.9}"#,
            r#"{"category": "coding"}"#,
        ] {
            let (_, classifier) = judge_with(ScriptedInvoker::new().text(ROUTER, reply));
            let analysis = classifier.classify(&[ChatMessage::user("x")]).await;
            assert!(analysis.is_degraded(), "reply should be rejected: {reply}");
            assert_eq!(analysis.category, TaskCategory::General);
        }
    }

    #[tokio::test]
    async fn heuristic_detects_categories() {
        let classifier = PromptClassifier::heuristic();
        let cases = [
            ("Refactor this python function to be faster", TaskCategory::Coding),
            ("Prove that the square root of two is irrational", TaskCategory::Reasoning),
            ("Write a poem about the sea", TaskCategory::Creative),
            ("Compare the pros and cons of these two vendors", TaskCategory::Analysis),
            ("What is the capital of France?", TaskCategory::Simple),
            ("hi there", TaskCategory::Simple),
        ];
        for (prompt, expected) in cases {
            let analysis = classifier.classify(&[ChatMessage::user(prompt)]).await;
            assert_eq!(analysis.category, expected, "prompt: {prompt}");
            assert_eq!(analysis.features["classification_source"], "heuristic");
            assert!(!analysis.is_degraded());
        }
    }

    #[tokio::test]
    async fn heuristic_long_unmatched_prompt_is_general() {
        let prompt = "Tell me everything you can about the history of the Hanseatic League \
                      and its influence on northern European towns";
        let analysis = PromptClassifier::heuristic()
            .classify(&[ChatMessage::user(prompt)])
            .await;
        assert_eq!(analysis.category, TaskCategory::General);
        assert!(analysis.confidence > 0.0);
    }

    #[tokio::test]
    async fn heuristic_confidence_grows_with_hits() {
        let classifier = PromptClassifier::heuristic();
        let one = classifier.classify(&[ChatMessage::user("fix this bug")]).await;
        let three = classifier
            .classify(&[ChatMessage::user("fix this rust bug:\n```\nfn main() {}\n```")])
            .await;
        assert_eq!(one.category, TaskCategory::Coding);
        assert!(three.confidence > one.confidence);
        assert!(three.confidence <= 0.9);
    }
}
