//! Routing Policy
//!
//! Deterministic choice of one backend for a classified request: the head of
//! the catalog's affinity ordering among enabled models.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::CatalogSnapshot;
use crate::error::RouterError;
use crate::routing::PromptAnalysis;

/// The backend chosen for a single-target request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Catalog id of the chosen model.
    pub selected: String,
    /// `provider:model` id handed to the gateway.
    pub qualified_id: String,
    /// Human-readable explanation of why this route was chosen.
    pub reasoning: String,
    pub confidence: f32,
    pub estimated_cost_per_1k: f64,
}

/// Stateless; identical inputs always yield an identical decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoutingPolicy;

impl RoutingPolicy {
    pub fn decide(
        &self,
        analysis: &PromptAnalysis,
        catalog: &CatalogSnapshot,
    ) -> Result<RoutingDecision, RouterError> {
        let category = analysis.category;
        let chosen = catalog
            .by_affinity(category)
            .into_iter()
            .find(|m| m.enabled)
            .ok_or(RouterError::NoAvailableModel)?;

        let reasoning = match chosen.matched_tag(category) {
            Some(tag) => format!(
                "{category} task: {} matches the '{tag}' strength \
                 ({} of {} {category} strengths, ${:.5}/1k tokens)",
                chosen.display_name,
                chosen.affinity(category),
                category.affinity_tags().len(),
                chosen.cost_per_1k_tokens,
            ),
            None => format!(
                "{category} task: no enabled model lists a {category} strength; \
                 {} is the cheapest enabled model (${:.5}/1k tokens)",
                chosen.display_name, chosen.cost_per_1k_tokens,
            ),
        };

        debug!(
            model = %chosen.id,
            %category,
            cost = chosen.cost_per_1k_tokens,
            "Routing decision"
        );

        Ok(RoutingDecision {
            selected: chosen.id.clone(),
            qualified_id: chosen.qualified_id.clone(),
            reasoning,
            confidence: analysis.confidence,
            estimated_cost_per_1k: chosen.cost_per_1k_tokens,
        })
    }
}
