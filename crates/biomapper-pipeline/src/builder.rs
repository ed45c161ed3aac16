//! Wires a validated `PipelineConfig` plus injected collaborators into
//! a ready-to-run orchestrator.

use std::sync::Arc;

use biomapper_bridge::{ApiBridgeMatcher, BridgeClient};
use biomapper_common::{BiomapperError, MatchStage, Result};
use biomapper_match::{DirectMatcher, FuzzyMatcher, ReferenceIndex};
use biomapper_semantic::{SemanticBackend, SemanticMatcher};

use crate::config::PipelineConfig;
use crate::orchestrator::ProgressiveOrchestrator;

/// Build the stage list declared by the config.
///
/// Missing collaborators for enabled stages are configuration errors
/// (fail-fast), with one exception: an enabled Stage 4 without a
/// semantic backend degrades to the strict fuzzy fallback against the
/// same reference index.
pub fn build_pipeline(
    config: &PipelineConfig,
    reference_index: Arc<ReferenceIndex>,
    bridge_client: Option<Arc<dyn BridgeClient>>,
    semantic_backend: Option<Arc<dyn SemanticBackend>>,
) -> Result<ProgressiveOrchestrator> {
    config.validate()?;

    let mut stages: Vec<Box<dyn MatchStage>> = Vec::new();
    let mut disabled: Vec<u8> = Vec::new();

    if config.stage1_enabled {
        stages.push(Box::new(DirectMatcher::new(config.stage1.clone())?));
    } else {
        disabled.push(1);
    }
    if config.stage2_enabled {
        stages.push(Box::new(FuzzyMatcher::new(
            reference_index.clone(),
            config.stage2.clone(),
        )?));
    } else {
        disabled.push(2);
    }
    if config.stage3_enabled {
        let client = bridge_client.ok_or_else(|| {
            BiomapperError::Config(
                "stage 3 is enabled but no bridge client was provided".to_string(),
            )
        })?;
        stages.push(Box::new(ApiBridgeMatcher::new(
            client,
            config.stage3.clone(),
        )?));
    } else {
        disabled.push(3);
    }
    if config.stage4_enabled {
        stages.push(Box::new(SemanticMatcher::new(
            semantic_backend,
            Some(reference_index),
            config.stage4.clone(),
        )?));
    } else {
        disabled.push(4);
    }

    let mut orchestrator = ProgressiveOrchestrator::new(stages)
        .with_disabled_stages(disabled)
        .with_target_type(config.target_type.clone());
    if let Some(max) = config.max_total_cost_dollars {
        orchestrator = orchestrator.with_max_total_cost(max);
    }
    Ok(orchestrator)
}
