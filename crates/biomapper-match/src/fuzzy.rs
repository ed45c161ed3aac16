//! Stage 2 — token-sort fuzzy matching against the reference index.
//!
//! An O(entities × references) scan over pre-normalized strings. For the
//! typical panel sizes (hundreds of biomarkers) this completes well under
//! a second: no network, no cost, fully deterministic.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use biomapper_common::confidence::{check_unit_interval, STAGE2_DEFAULT_THRESHOLD};
use biomapper_common::{
    Entity, MatchCandidate, MatchMethod, MatchStage, Result, StageResult,
};

use crate::reference::{ReferenceIndex, ReferenceRecord};

/// Token-sort similarity in [0, 1]: tokenize both strings, sort the
/// tokens, and compare the rejoined forms by normalized Levenshtein.
/// Word-order variants ("cholesterol hdl" vs "hdl cholesterol") score 1.0.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    let sort_tokens = |s: &str| {
        let mut toks: Vec<&str> = s.split_whitespace().collect();
        toks.sort_unstable();
        toks.join(" ")
    };
    let (sa, sb) = (sort_tokens(a), sort_tokens(b));
    if sa.is_empty() && sb.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(&sa, &sb)
}

/// Best-scoring record for a normalized name, or None below threshold.
/// Scores the name and every synonym, keeps the maximum.
pub fn best_match<'a>(
    normalized_name: &str,
    index: &'a ReferenceIndex,
    threshold: f64,
) -> Option<(&'a ReferenceRecord, f64)> {
    let mut best: Option<(&ReferenceRecord, f64)> = None;
    for record in index.records() {
        for form in &record.normalized_forms {
            let score = token_sort_ratio(normalized_name, form);
            if best.map_or(true, |(_, b)| score > b) {
                best = Some((record, score));
            }
        }
    }
    best.filter(|(_, score)| *score >= threshold)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzyMatcherConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_threshold() -> f64 {
    STAGE2_DEFAULT_THRESHOLD
}

impl Default for FuzzyMatcherConfig {
    fn default() -> Self {
        Self {
            threshold: STAGE2_DEFAULT_THRESHOLD,
        }
    }
}

impl FuzzyMatcherConfig {
    pub fn validate(&self) -> Result<()> {
        check_unit_interval("fuzzy threshold", self.threshold)
    }
}

pub struct FuzzyMatcher {
    index: Arc<ReferenceIndex>,
    config: FuzzyMatcherConfig,
}

impl FuzzyMatcher {
    pub fn new(index: Arc<ReferenceIndex>, config: FuzzyMatcherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { index, config })
    }

    pub fn match_batch(&self, entities: Vec<Entity>) -> StageResult {
        let t0 = Instant::now();
        let mut result = StageResult::new(2);

        // Empty reference index: everything passes through unmapped.
        if self.index.is_empty() {
            debug!("Fuzzy matcher has empty reference index, passing batch through");
            result.unmapped = entities;
            result.processing_time_seconds = t0.elapsed().as_secs_f64();
            return result;
        }

        for entity in entities {
            match best_match(&entity.normalized_name, &self.index, self.config.threshold) {
                Some((record, score)) => {
                    let candidate = MatchCandidate {
                        target_id: record.id.clone(),
                        target_name: record.name.clone(),
                        confidence: score,
                        method: MatchMethod::FuzzyString,
                        stage: 2,
                        cost_dollars: 0.0,
                    };
                    result.matched.push((entity, candidate));
                }
                None => result.unmapped.push(entity),
            }
        }
        result.processing_time_seconds = t0.elapsed().as_secs_f64();
        result
    }
}

#[async_trait]
impl MatchStage for FuzzyMatcher {
    fn stage_number(&self) -> u8 {
        2
    }

    fn name(&self) -> &'static str {
        "fuzzy_string"
    }

    async fn run(&self, entities: Vec<Entity>) -> Result<StageResult> {
        Ok(self.match_batch(entities))
    }
}
