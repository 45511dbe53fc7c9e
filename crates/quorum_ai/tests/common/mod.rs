//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use quorum_ai::{
    ChatMessage, InvocationParams, ModelCatalog, ModelDescriptor, ModelInvoker, Orchestrator,
    OrchestratorSettings, ProviderError, StatsRecorder,
};
use quorum_core::ClassifierMode;

pub const ROUTER: &str = "mock:router";
pub const JUDGE: &str = "mock:judge";
pub const SYNTH: &str = "mock:synth";

/// Backend stand-in: each qualified id answers after a fixed delay.
#[derive(Default)]
pub struct MockBackends {
    replies: HashMap<String, (Duration, Result<String, ProviderError>)>,
    calls: HashMap<String, Arc<AtomicUsize>>,
}

impl MockBackends {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, id: &str, content: &str) -> Self {
        self.reply_after(id, Duration::ZERO, content)
    }

    pub fn reply_after(mut self, id: &str, delay: Duration, content: &str) -> Self {
        self.replies.insert(id.into(), (delay, Ok(content.into())));
        self.calls.insert(id.into(), Arc::default());
        self
    }

    pub fn fail(mut self, id: &str, error: ProviderError) -> Self {
        self.replies.insert(id.into(), (Duration::ZERO, Err(error)));
        self.calls.insert(id.into(), Arc::default());
        self
    }

    pub fn calls(&self, id: &str) -> usize {
        self.calls
            .get(id)
            .map_or(0, |c| c.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl ModelInvoker for MockBackends {
    async fn invoke(
        &self,
        qualified_id: &str,
        _messages: &[ChatMessage],
        _params: &InvocationParams,
    ) -> Result<String, ProviderError> {
        let Some((delay, reply)) = self.replies.get(qualified_id).cloned() else {
            return Err(ProviderError::ModelUnavailable(qualified_id.into()));
        };
        if let Some(counter) = self.calls.get(qualified_id) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        tokio::time::sleep(delay).await;
        reply
    }
}

pub fn model(id: &str, tags: &[&str], cost: f64) -> ModelDescriptor {
    ModelDescriptor::new(id, "mock", id, id, tags, cost)
}

pub fn settings(mode: ClassifierMode, timeout: Duration) -> OrchestratorSettings {
    OrchestratorSettings {
        router_model: ROUTER.into(),
        judge_model: JUDGE.into(),
        synthesis_model: SYNTH.into(),
        classifier_mode: mode,
        per_call_timeout: timeout,
        parallel_targets: None,
    }
}

pub fn orchestrator(
    models: Vec<ModelDescriptor>,
    backends: Arc<MockBackends>,
    stats: StatsRecorder,
    settings: OrchestratorSettings,
) -> Orchestrator {
    Orchestrator::new(
        Arc::new(ModelCatalog::new(models)),
        backends,
        Arc::new(stats),
        settings,
    )
}

pub fn ask(prompt: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::user(prompt)]
}
