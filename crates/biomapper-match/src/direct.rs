//! Stage 1 — direct identifier extraction.
//!
//! Checks identifiers already embedded in source rows against a priority
//! order; the first well-formed one wins and carries its per-ontology
//! tier-1 confidence. No network calls, no cost.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use biomapper_common::confidence::check_unit_interval;
use biomapper_common::{
    BiomapperError, Entity, MatchCandidate, MatchMethod, MatchStage, Ontology, Result, StageResult,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectMatcherConfig {
    /// Ontologies checked in order; first present, well-formed value wins.
    #[serde(default = "Ontology::default_priority")]
    pub priority_order: Vec<Ontology>,
    /// Per-ontology confidence overrides. Anything absent falls back to
    /// the documented default tiering.
    #[serde(default)]
    pub confidence_overrides: HashMap<Ontology, f64>,
}

impl Default for DirectMatcherConfig {
    fn default() -> Self {
        Self {
            priority_order: Ontology::default_priority(),
            confidence_overrides: HashMap::new(),
        }
    }
}

impl DirectMatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.priority_order.is_empty() {
            return Err(BiomapperError::Config(
                "direct matcher priority_order must not be empty".to_string(),
            ));
        }
        for (ont, c) in &self.confidence_overrides {
            check_unit_interval(&format!("confidence override for {}", ont.as_str()), *c)?;
        }
        Ok(())
    }

    fn confidence_for(&self, ontology: Ontology) -> f64 {
        self.confidence_overrides
            .get(&ontology)
            .copied()
            .unwrap_or_else(|| ontology.default_confidence())
    }
}

pub struct DirectMatcher {
    config: DirectMatcherConfig,
}

impl DirectMatcher {
    pub fn new(config: DirectMatcherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Pick the first valid identifier per the configured priority order.
    /// Malformed identifiers are treated as absent, not as errors.
    fn extract_one(&self, entity: &Entity) -> Option<MatchCandidate> {
        for &ontology in &self.config.priority_order {
            let Some(value) = entity.identifier(ontology) else {
                continue;
            };
            if !ontology.is_well_formed(value) {
                debug!(
                    entity = %entity.raw_name,
                    ontology = ontology.as_str(),
                    value,
                    "Malformed identifier skipped"
                );
                continue;
            }
            return Some(MatchCandidate {
                target_id: ontology.curie(value),
                target_name: entity.raw_name.clone(),
                confidence: self.config.confidence_for(ontology),
                method: MatchMethod::DirectId,
                stage: 1,
                cost_dollars: 0.0,
            });
        }
        None
    }

    pub fn extract(&self, entities: Vec<Entity>) -> StageResult {
        let t0 = Instant::now();
        let mut result = StageResult::new(1);
        for entity in entities {
            match self.extract_one(&entity) {
                Some(candidate) => result.matched.push((entity, candidate)),
                None => result.unmapped.push(entity),
            }
        }
        result.processing_time_seconds = t0.elapsed().as_secs_f64();
        result
    }
}

#[async_trait]
impl MatchStage for DirectMatcher {
    fn stage_number(&self) -> u8 {
        1
    }

    fn name(&self) -> &'static str {
        "direct_id"
    }

    async fn run(&self, entities: Vec<Entity>) -> Result<StageResult> {
        Ok(self.extract(entities))
    }
}
