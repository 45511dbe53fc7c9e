//! Parallel Dispatcher
//!
//! Fans one request out to several backends at once. Every target runs in
//! its own task with its own timeout clock, and every target yields exactly
//! one [`InvocationResult`] in input order, whatever happens to the others.

use futures::FutureExt;
use serde::{Serialize, Serializer};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::catalog::ModelDescriptor;
use crate::judge::truncate;
use crate::providers::{ModelInvoker, ProviderError};
use crate::types::{ChatMessage, InvocationParams};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationOutcome {
    Ok,
    Error,
    Timeout,
}

impl std::fmt::Display for InvocationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// What one backend produced for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationResult {
    /// Catalog id of the target.
    pub model_id: String,
    pub content: Option<String>,
    #[serde(rename = "latency_ms", serialize_with = "serialize_millis")]
    pub latency: Duration,
    pub outcome: InvocationOutcome,
    pub error_detail: Option<String>,
}

fn serialize_millis<S: Serializer>(latency: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(latency.as_millis() as u64)
}

impl InvocationResult {
    pub fn ok(model_id: impl Into<String>, content: impl Into<String>, latency: Duration) -> Self {
        Self {
            model_id: model_id.into(),
            content: Some(content.into()),
            latency,
            outcome: InvocationOutcome::Ok,
            error_detail: None,
        }
    }

    pub fn error(model_id: impl Into<String>, detail: impl Into<String>, latency: Duration) -> Self {
        Self {
            model_id: model_id.into(),
            content: None,
            latency,
            outcome: InvocationOutcome::Error,
            error_detail: Some(detail.into()),
        }
    }

    pub fn timeout(model_id: impl Into<String>, detail: impl Into<String>, latency: Duration) -> Self {
        Self {
            outcome: InvocationOutcome::Timeout,
            ..Self::error(model_id, detail, latency)
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome == InvocationOutcome::Ok
    }

    /// Content of a successful result.
    pub fn ok_content(&self) -> Option<&str> {
        if self.is_ok() {
            self.content.as_deref()
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// ParallelDispatcher
// ---------------------------------------------------------------------------

/// Concurrent, failure-isolated invocation of a set of backends. No retries
/// happen here.
#[derive(Clone)]
pub struct ParallelDispatcher {
    invoker: Arc<dyn ModelInvoker>,
}

impl ParallelDispatcher {
    pub fn new(invoker: Arc<dyn ModelInvoker>) -> Self {
        Self { invoker }
    }

    /// Invoke every target concurrently and return one result per target,
    /// positioned like `targets`.
    ///
    /// Dropping the returned future aborts all in-flight calls.
    pub async fn dispatch(
        &self,
        targets: &[ModelDescriptor],
        messages: &[ChatMessage],
        params: &InvocationParams,
        per_call_timeout: Duration,
    ) -> Vec<InvocationResult> {
        if targets.is_empty() {
            return Vec::new();
        }
        info!(targets = targets.len(), timeout_ms = per_call_timeout.as_millis() as u64, "Dispatching in parallel");

        let messages: Arc<[ChatMessage]> = messages.into();
        let mut tasks = JoinSet::new();

        for (idx, target) in targets.iter().enumerate() {
            let invoker = Arc::clone(&self.invoker);
            let messages = Arc::clone(&messages);
            let model_id = target.id.clone();
            let qualified_id = target.qualified_id.clone();
            let params = *params;

            tasks.spawn(async move {
                let started = Instant::now();
                let call = AssertUnwindSafe(invoker.invoke(&qualified_id, &messages, &params))
                    .catch_unwind();
                let outcome = tokio::time::timeout(per_call_timeout, call).await;
                let latency = started.elapsed();

                let result = match outcome {
                    Err(_) => InvocationResult::timeout(
                        model_id,
                        format!("no response within {}ms", per_call_timeout.as_millis()),
                        latency,
                    ),
                    Ok(Err(panic)) => InvocationResult::error(
                        model_id,
                        format!("backend panicked: {}", panic_message(panic.as_ref())),
                        latency,
                    ),
                    Ok(Ok(Err(ProviderError::Timeout))) => {
                        InvocationResult::timeout(model_id, ProviderError::Timeout.to_string(), latency)
                    }
                    Ok(Ok(Err(e))) => InvocationResult::error(model_id, e.to_string(), latency),
                    Ok(Ok(Ok(content))) if content.trim().is_empty() => {
                        InvocationResult::error(model_id, "empty response", latency)
                    }
                    Ok(Ok(Ok(content))) => InvocationResult::ok(model_id, content, latency),
                };
                (idx, result)
            });
        }

        let mut slots: Vec<Option<InvocationResult>> = vec![None; targets.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => {
                    debug!(
                        model = %result.model_id,
                        outcome = %result.outcome,
                        latency_ms = result.latency.as_millis() as u64,
                        "Invocation finished"
                    );
                    if let Some(detail) = result.error_detail.as_deref() {
                        warn!(model = %result.model_id, error = %truncate(detail, 200), "Invocation failed");
                    }
                    slots[idx] = Some(result);
                }
                Err(e) => warn!(error = %e, "Dispatch task did not complete"),
            }
        }

        slots
            .into_iter()
            .zip(targets)
            .map(|(slot, target)| {
                slot.unwrap_or_else(|| {
                    InvocationResult::error(target.id.clone(), "task did not complete", Duration::ZERO)
                })
            })
            .collect()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
