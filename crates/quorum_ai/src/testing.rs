//! Scripted backends for unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::catalog::{CatalogSnapshot, ModelDescriptor};
use crate::providers::{ModelInvoker, ProviderError};
use crate::types::{ChatMessage, InvocationParams};

#[derive(Clone)]
pub(crate) enum Reply {
    Text(String),
    Fail(ProviderError),
    Panic,
}

/// A [`ModelInvoker`] whose answers are fixed per qualified id.
#[derive(Default)]
pub(crate) struct ScriptedInvoker {
    scripts: HashMap<String, (Duration, Reply)>,
    calls: Arc<AtomicUsize>,
    log: Mutex<Vec<(String, Vec<ChatMessage>, InvocationParams)>>,
}

impl ScriptedInvoker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn text(self, id: &str, content: &str) -> Self {
        self.script(id, Duration::ZERO, Reply::Text(content.to_owned()))
    }

    pub(crate) fn fail(self, id: &str, error: ProviderError) -> Self {
        self.script(id, Duration::ZERO, Reply::Fail(error))
    }

    /// A backend that never answers within any test timeout.
    pub(crate) fn stall(self, id: &str) -> Self {
        self.script(id, Duration::from_secs(30), Reply::Text("too late".to_owned()))
    }

    pub(crate) fn script(mut self, id: &str, delay: Duration, reply: Reply) -> Self {
        self.scripts.insert(id.to_owned(), (delay, reply));
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn calls_to(&self, id: &str) -> usize {
        self.log.lock().iter().filter(|(m, _, _)| m == id).count()
    }

    /// Messages of the most recent call to `id`.
    pub(crate) fn last_messages(&self, id: &str) -> Option<Vec<ChatMessage>> {
        self.log
            .lock()
            .iter()
            .rev()
            .find(|(m, _, _)| m == id)
            .map(|(_, msgs, _)| msgs.clone())
    }

    pub(crate) fn last_params(&self, id: &str) -> Option<InvocationParams> {
        self.log
            .lock()
            .iter()
            .rev()
            .find(|(m, _, _)| m == id)
            .map(|(_, _, p)| *p)
    }
}

#[async_trait]
impl ModelInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        qualified_id: &str,
        messages: &[ChatMessage],
        params: &InvocationParams,
    ) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log
            .lock()
            .push((qualified_id.to_owned(), messages.to_vec(), *params));

        let Some((delay, reply)) = self.scripts.get(qualified_id).cloned() else {
            return Err(ProviderError::ModelUnavailable(qualified_id.to_owned()));
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match reply {
            Reply::Text(content) => Ok(content),
            Reply::Fail(err) => Err(err),
            Reply::Panic => panic!("scripted panic from {qualified_id}"),
        }
    }
}

/// A descriptor whose qualified id is `test:<id>`.
pub(crate) fn model(id: &str, tags: &[&str], cost: f64) -> ModelDescriptor {
    ModelDescriptor::new(id, "test", id, id.to_uppercase(), tags, cost)
}

pub(crate) fn snapshot(models: Vec<ModelDescriptor>) -> CatalogSnapshot {
    CatalogSnapshot::new(models)
}
