//! Model catalog.
//!
//! Descriptors are loaded once from configuration. The only runtime mutation
//! is the `enabled` flag, applied copy-on-write so that a request's
//! [`CatalogSnapshot`] never observes a change mid-flight.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

use quorum_core::{ModelEntry, QuorumConfig};

use crate::types::TaskCategory;

// ---------------------------------------------------------------------------
// ModelDescriptor
// ---------------------------------------------------------------------------

/// Metadata for one addressable backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelDescriptor {
    /// Catalog key, e.g. `"gpt-4o"`.
    pub id: String,
    pub provider: String,
    /// `provider:model` id passed to the gateway.
    pub qualified_id: String,
    pub display_name: String,
    pub strength_tags: BTreeSet<String>,
    pub cost_per_1k_tokens: f64,
    pub enabled: bool,
}

impl ModelDescriptor {
    pub fn new(
        id: impl Into<String>,
        provider: impl Into<String>,
        model_id: &str,
        display_name: impl Into<String>,
        strength_tags: &[&str],
        cost_per_1k_tokens: f64,
    ) -> Self {
        let provider = provider.into();
        Self {
            id: id.into(),
            qualified_id: format!("{provider}:{model_id}"),
            provider,
            display_name: display_name.into(),
            strength_tags: strength_tags.iter().map(|t| t.to_lowercase()).collect(),
            cost_per_1k_tokens,
            enabled: true,
        }
    }

    pub fn from_entry(entry: &ModelEntry) -> Self {
        Self {
            id: entry.id.clone(),
            provider: entry.provider.clone(),
            qualified_id: format!("{}:{}", entry.provider, entry.model_id),
            display_name: entry.display_name.clone(),
            strength_tags: entry
                .strengths
                .iter()
                .map(|t| t.trim().to_lowercase())
                .collect(),
            cost_per_1k_tokens: entry.cost_per_1k_tokens,
            enabled: entry.enabled,
        }
    }

    /// Number of the category's affinity tags this model declares.
    pub fn affinity(&self, category: TaskCategory) -> usize {
        category
            .affinity_tags()
            .iter()
            .filter(|tag| self.strength_tags.contains(**tag))
            .count()
    }

    /// The strongest affinity tag for `category` this model declares.
    pub fn matched_tag(&self, category: TaskCategory) -> Option<&'static str> {
        category
            .affinity_tags()
            .iter()
            .copied()
            .find(|tag| self.strength_tags.contains(*tag))
    }
}

// ---------------------------------------------------------------------------
// CatalogSnapshot
// ---------------------------------------------------------------------------

/// An immutable view of the catalog taken at request start.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    models: Arc<[ModelDescriptor]>,
}

impl CatalogSnapshot {
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        Self {
            models: models.into(),
        }
    }

    /// Every descriptor in declaration order.
    pub fn all(&self) -> &[ModelDescriptor] {
        &self.models
    }

    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn list_enabled(&self) -> Vec<&ModelDescriptor> {
        self.models.iter().filter(|m| m.enabled).collect()
    }

    /// All descriptors ordered by descending affinity for `category`, then
    /// ascending cost, then declaration order.
    pub fn by_affinity(&self, category: TaskCategory) -> Vec<&ModelDescriptor> {
        let mut ranked: Vec<(usize, &ModelDescriptor)> = self
            .models
            .iter()
            .map(|m| (m.affinity(category), m))
            .collect();
        // Stable sort keeps declaration order among full ties.
        ranked.sort_by(|(sa, a), (sb, b)| {
            sb.cmp(sa)
                .then_with(|| a.cost_per_1k_tokens.total_cmp(&b.cost_per_1k_tokens))
        });
        ranked.into_iter().map(|(_, m)| m).collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ModelCatalog
// ---------------------------------------------------------------------------

/// Process-wide registry of known backends.
pub struct ModelCatalog {
    current: RwLock<Arc<[ModelDescriptor]>>,
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        Self {
            current: RwLock::new(models.into()),
        }
    }

    pub fn from_config(config: &QuorumConfig) -> Self {
        Self::new(config.models.iter().map(ModelDescriptor::from_entry).collect())
    }

    pub fn snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            models: self.current.read().clone(),
        }
    }

    pub fn list_enabled(&self) -> Vec<ModelDescriptor> {
        self.snapshot().list_enabled().into_iter().cloned().collect()
    }

    pub fn by_affinity(&self, category: TaskCategory) -> Vec<ModelDescriptor> {
        self.snapshot()
            .by_affinity(category)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Flip one model's `enabled` flag. Returns `false` for unknown ids.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        self.update(|m| m.id == id, enabled) > 0
    }

    /// Disable every model served by `provider`, e.g. when its API key is
    /// missing. Returns how many entries changed.
    pub fn disable_provider(&self, provider: &str) -> usize {
        let changed = self.update(|m| m.provider == provider && m.enabled, false);
        if changed > 0 {
            info!(provider, models = changed, "Disabled models without credentials");
        }
        changed
    }

    fn update(&self, matches: impl Fn(&ModelDescriptor) -> bool, enabled: bool) -> usize {
        let mut guard = self.current.write();
        let mut next: Vec<ModelDescriptor> = guard.to_vec();
        let mut changed = 0;
        for model in next.iter_mut().filter(|m| matches(m)) {
            model.enabled = enabled;
            changed += 1;
        }
        if changed > 0 {
            *guard = next.into();
        }
        changed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
