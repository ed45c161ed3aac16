//! The progressive orchestrator.
//!
//! Drives the configured stages in order, forwarding only the entities
//! not yet matched (first-match-wins). Per-stage failures degrade
//! gracefully: the stage is marked failed in the ledger and its input
//! flows on to the next stage untouched. The orchestrator is the single
//! point that aggregates cost and can short-circuit stages that would
//! blow the budget.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, instrument, warn};

use biomapper_common::{BiomapperError, Entity, MatchCandidate, MatchStage};

use crate::cache::{CachedMapping, MappingCache};
use crate::stats::{ProgressiveStatistics, StageStatus, StageSummary};

/// Everything a run produces: merged matches in stage order, the final
/// unmapped remainder, and the statistics ledger.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub matched: Vec<(Entity, MatchCandidate)>,
    pub unmapped: Vec<Entity>,
    pub statistics: ProgressiveStatistics,
}

pub struct ProgressiveOrchestrator {
    stages: Vec<Box<dyn MatchStage>>,
    disabled_stages: Vec<u8>,
    cache: Option<Arc<dyn MappingCache>>,
    max_total_cost_dollars: Option<f64>,
    target_type: String,
}

impl ProgressiveOrchestrator {
    /// Stages are injected in execution order; a disabled stage is
    /// not part of the list and its input passes through.
    pub fn new(stages: Vec<Box<dyn MatchStage>>) -> Self {
        Self {
            stages,
            disabled_stages: Vec::new(),
            cache: None,
            max_total_cost_dollars: None,
            target_type: "reference".to_string(),
        }
    }

    /// Stage numbers configured off, recorded in the ledger as
    /// `SkippedDisabled` so a run report accounts for every stage.
    pub fn with_disabled_stages(mut self, stages: Vec<u8>) -> Self {
        self.disabled_stages = stages;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn MappingCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_max_total_cost(mut self, max_dollars: f64) -> Self {
        self.max_total_cost_dollars = Some(max_dollars);
        self
    }

    pub fn with_target_type(mut self, target_type: impl Into<String>) -> Self {
        self.target_type = target_type.into();
        self
    }

    /// Resolve entities against the cache before any stage runs.
    /// Returns `(hits, remainder)`.
    async fn cache_prepass(
        &self,
        cache: &dyn MappingCache,
        entities: Vec<Entity>,
    ) -> (Vec<(Entity, MatchCandidate)>, Vec<Entity>) {
        let mut hits = Vec::new();
        let mut remainder = Vec::new();
        for entity in entities {
            let cached = cache
                .get(&entity.raw_name, &entity.source_dataset, &self.target_type)
                .await;
            match cached {
                Ok(Some(m)) => {
                    let candidate = MatchCandidate {
                        target_id: m.target_id,
                        target_name: m.target_name,
                        confidence: m.confidence,
                        method: m.method,
                        stage: m.stage,
                        cost_dollars: 0.0,
                    };
                    hits.push((entity, candidate));
                }
                Ok(None) => remainder.push(entity),
                Err(e) => {
                    warn!(entity = %entity.raw_name, error = %e, "Cache lookup failed");
                    remainder.push(entity);
                }
            }
        }
        (hits, remainder)
    }

    async fn cache_writeback(
        &self,
        cache: &dyn MappingCache,
        matched: &[(Entity, MatchCandidate)],
    ) {
        for (entity, candidate) in matched {
            let mapping = CachedMapping {
                source_id: entity.raw_name.clone(),
                source_type: entity.source_dataset.clone(),
                target_type: self.target_type.clone(),
                target_id: candidate.target_id.clone(),
                target_name: candidate.target_name.clone(),
                confidence: candidate.confidence,
                method: candidate.method,
                stage: candidate.stage,
            };
            if let Err(e) = cache.upsert(&mapping).await {
                warn!(entity = %entity.raw_name, error = %e, "Cache write-back failed");
            }
        }
    }

    /// Run the progressive pipeline over a batch of entities.
    ///
    /// Never aborts mid-stream for runtime data problems: the result is
    /// always a best-effort match set plus a ledger recording what
    /// failed, what was skipped and why.
    #[instrument(skip_all, fields(n_entities = entities.len(), n_stages = self.stages.len()))]
    pub async fn run(&self, entities: Vec<Entity>) -> PipelineOutcome {
        let t0 = Instant::now();
        let total = entities.len();
        let mut statistics = ProgressiveStatistics::new(total);
        let mut matched_all: Vec<(Entity, MatchCandidate)> = Vec::new();
        let mut remainder = entities;

        // Cache pre-pass: previously resolved mappings short-circuit the
        // whole pipeline for their entities.
        if let Some(cache) = &self.cache {
            let input_count = remainder.len();
            let (hits, rest) = self.cache_prepass(cache.as_ref(), remainder).await;
            remainder = rest;
            if !hits.is_empty() {
                info!(hits = hits.len(), "Cache pre-pass resolved entities");
                let candidates: Vec<MatchCandidate> =
                    hits.iter().map(|(_, c)| c.clone()).collect();
                let mut summary = StageSummary::from_result(
                    input_count,
                    &biomapper_common::StageResult::new(0),
                );
                summary.matched_count = hits.len();
                summary.cache_hits = hits.len() as u64;
                statistics = statistics.merged(summary, &candidates);
                matched_all.extend(hits);
            }
        }

        let mut disabled = self.disabled_stages.clone();
        disabled.sort_unstable();
        let mut disabled = disabled.into_iter().peekable();

        for stage in &self.stages {
            let stage_number = stage.stage_number();

            // Ledger entries for disabled stages the pipeline passes over.
            while let Some(&d) = disabled.peek() {
                if d >= stage_number {
                    break;
                }
                disabled.next();
                statistics = statistics.recorded(StageSummary::skipped(
                    d,
                    remainder.len(),
                    StageStatus::SkippedDisabled,
                ));
            }

            let input_count = remainder.len();

            // Budget fail-safe: skip any stage whose projected spend
            // would cross the ceiling.
            if let Some(max) = self.max_total_cost_dollars {
                let projected =
                    statistics.total_cost_dollars + stage.estimated_cost(input_count);
                if projected > max {
                    warn!(
                        stage = stage.name(),
                        projected, max, "Skipping stage: budget would be exceeded"
                    );
                    statistics = statistics.recorded(StageSummary::skipped(
                        stage_number,
                        input_count,
                        StageStatus::SkippedBudgetExceeded,
                    ));
                    continue;
                }
            }

            match stage.run(remainder.clone()).await {
                Ok(result) => {
                    if result.total() != input_count {
                        warn!(
                            stage = stage.name(),
                            input = input_count,
                            output = result.total(),
                            "Stage result does not account for all entities"
                        );
                    }
                    info!(
                        stage = stage.name(),
                        matched = result.matched.len(),
                        unmapped = result.unmapped.len(),
                        api_calls = result.api_calls,
                        cost = result.cost_dollars,
                        "Stage complete"
                    );
                    let candidates: Vec<MatchCandidate> =
                        result.matched.iter().map(|(_, c)| c.clone()).collect();
                    let summary = StageSummary::from_result(input_count, &result);
                    matched_all.extend(result.matched);
                    remainder = result.unmapped;
                    statistics = statistics.merged(summary, &candidates);
                }
                Err(e) => {
                    // Whole-stage failure: degrade, keep the pre-stage
                    // remainder for the stages beyond. Dollars already
                    // spent before the failure stay on the ledger.
                    warn!(stage = stage.name(), error = %e, "Stage failed, continuing with remainder");
                    let mut summary =
                        StageSummary::failed(stage_number, input_count, e.to_string());
                    if let BiomapperError::BridgeUnavailable {
                        api_calls,
                        cost_dollars,
                        ..
                    } = &e
                    {
                        summary.api_calls = *api_calls;
                        summary.cost_dollars = *cost_dollars;
                    }
                    statistics = statistics.recorded(summary);
                }
            }
        }

        for d in disabled {
            statistics = statistics.recorded(StageSummary::skipped(
                d,
                remainder.len(),
                StageStatus::SkippedDisabled,
            ));
        }

        if let Some(cache) = &self.cache {
            self.cache_writeback(cache.as_ref(), &matched_all).await;
        }

        statistics.duration_ms = t0.elapsed().as_millis() as u64;
        info!(
            run_id = %statistics.run_id,
            matched = matched_all.len(),
            unmapped = remainder.len(),
            coverage = statistics.cumulative_coverage,
            cost = statistics.total_cost_dollars,
            duration_ms = statistics.duration_ms,
            "Progressive pipeline complete"
        );

        PipelineOutcome {
            matched: matched_all,
            unmapped: remainder,
            statistics,
        }
    }
}
