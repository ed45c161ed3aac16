//! Stage 4 matcher: embedding gate, LLM adjudication, hard call budget.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use biomapper_common::confidence::{
    check_unit_interval, STAGE4_DEFAULT_CONFIDENCE_THRESHOLD, STAGE4_DEFAULT_SIMILARITY_THRESHOLD,
    STAGE4_FALLBACK_FUZZY_THRESHOLD,
};
use biomapper_common::{
    BiomapperError, Entity, MatchCandidate, MatchMethod, MatchStage, Result, StageResult,
};
use biomapper_match::fuzzy::best_match;
use biomapper_match::ReferenceIndex;

use crate::backend::{SemanticBackend, SemanticCandidate};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticMatcherConfig {
    /// LLM-reported confidence required for acceptance.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Embedding similarity required before a candidate is even shown
    /// to the LLM. Acceptance needs BOTH gates (conjunctive).
    #[serde(default = "default_similarity_threshold")]
    pub embedding_similarity_threshold: f64,
    /// Hard ceiling on LLM calls per invocation. Once exhausted,
    /// remaining entities fall through unmapped.
    #[serde(default = "default_max_llm_calls")]
    pub max_llm_calls: u64,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_llm_cost")]
    pub cost_per_llm_call_dollars: f64,
    #[serde(default = "default_call_timeout")]
    pub per_call_timeout_secs: u64,
    /// Bounds the whole stage; entities not yet processed at expiry are
    /// returned unmapped.
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,
    /// Threshold for the fuzzy fallback when no backend is configured.
    /// Deliberately stricter than the Stage 2 default.
    #[serde(default = "default_fallback_threshold")]
    pub fallback_fuzzy_threshold: f64,
}

fn default_confidence_threshold() -> f64 {
    STAGE4_DEFAULT_CONFIDENCE_THRESHOLD
}
fn default_similarity_threshold() -> f64 {
    STAGE4_DEFAULT_SIMILARITY_THRESHOLD
}
fn default_max_llm_calls() -> u64 {
    25
}
fn default_top_k() -> usize {
    5
}
fn default_llm_cost() -> f64 {
    0.002
}
fn default_call_timeout() -> u64 {
    30
}
fn default_stage_timeout() -> u64 {
    300
}
fn default_fallback_threshold() -> f64 {
    STAGE4_FALLBACK_FUZZY_THRESHOLD
}

impl Default for SemanticMatcherConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            embedding_similarity_threshold: default_similarity_threshold(),
            max_llm_calls: default_max_llm_calls(),
            top_k: default_top_k(),
            cost_per_llm_call_dollars: default_llm_cost(),
            per_call_timeout_secs: default_call_timeout(),
            stage_timeout_secs: default_stage_timeout(),
            fallback_fuzzy_threshold: default_fallback_threshold(),
        }
    }
}

impl SemanticMatcherConfig {
    pub fn validate(&self) -> Result<()> {
        check_unit_interval("semantic confidence_threshold", self.confidence_threshold)?;
        check_unit_interval(
            "semantic embedding_similarity_threshold",
            self.embedding_similarity_threshold,
        )?;
        check_unit_interval(
            "semantic fallback_fuzzy_threshold",
            self.fallback_fuzzy_threshold,
        )?;
        if self.top_k == 0 {
            return Err(BiomapperError::Config(
                "semantic top_k must be at least 1".to_string(),
            ));
        }
        if self.cost_per_llm_call_dollars < 0.0 {
            return Err(BiomapperError::Config(
                "semantic cost_per_llm_call_dollars must be >= 0".to_string(),
            ));
        }
        if self.per_call_timeout_secs == 0 || self.stage_timeout_secs == 0 {
            return Err(BiomapperError::Config(
                "semantic timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct SemanticMatcher {
    backend: Option<Arc<dyn SemanticBackend>>,
    fallback_index: Option<Arc<ReferenceIndex>>,
    config: SemanticMatcherConfig,
}

impl SemanticMatcher {
    pub fn new(
        backend: Option<Arc<dyn SemanticBackend>>,
        fallback_index: Option<Arc<ReferenceIndex>>,
        config: SemanticMatcherConfig,
    ) -> Result<Self> {
        config.validate()?;
        if backend.is_none() && fallback_index.is_none() {
            return Err(BiomapperError::Config(
                "semantic stage needs a backend or a fallback reference index".to_string(),
            ));
        }
        Ok(Self {
            backend,
            fallback_index,
            config,
        })
    }

    pub fn with_backend(
        backend: Arc<dyn SemanticBackend>,
        config: SemanticMatcherConfig,
    ) -> Result<Self> {
        Self::new(Some(backend), None, config)
    }

    /// Fuzzy-only degradation, used when no embedding/LLM capability
    /// exists. The pipeline never hard-fails for lack of a provider.
    pub fn with_fallback(
        index: Arc<ReferenceIndex>,
        config: SemanticMatcherConfig,
    ) -> Result<Self> {
        Self::new(None, Some(index), config)
    }

    async fn run_semantic(
        &self,
        backend: &dyn SemanticBackend,
        entities: Vec<Entity>,
    ) -> StageResult {
        let t0 = Instant::now();
        let mut result = StageResult::new(4);
        let per_call = Duration::from_secs(self.config.per_call_timeout_secs);
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.stage_timeout_secs);

        // Embedding reuse within the invocation: duplicate names hit the
        // memoized candidate list instead of the backend.
        let mut candidate_cache: HashMap<String, Vec<SemanticCandidate>> = HashMap::new();

        for entity in entities {
            // Stage deadline: entities not yet processed go unmapped.
            if tokio::time::Instant::now() >= deadline {
                debug!(entity = %entity.raw_name, "Stage deadline passed, entity falls through");
                result.unmapped.push(entity);
                continue;
            }

            let candidates = match candidate_cache.get(&entity.normalized_name) {
                Some(cached) => {
                    result.cache_hits += 1;
                    cached.clone()
                }
                None => {
                    let search = timeout(
                        per_call,
                        backend.similarity_search(&entity.normalized_name, self.config.top_k),
                    )
                    .await;
                    result.api_calls += 1;
                    match search {
                        Ok(Ok(c)) => {
                            candidate_cache.insert(entity.normalized_name.clone(), c.clone());
                            c
                        }
                        Ok(Err(e)) => {
                            warn!(entity = %entity.raw_name, error = %e, "Similarity search failed");
                            result.failed_lookups += 1;
                            result.unmapped.push(entity);
                            continue;
                        }
                        Err(_) => {
                            warn!(entity = %entity.raw_name, "Similarity search timed out");
                            result.failed_lookups += 1;
                            result.unmapped.push(entity);
                            continue;
                        }
                    }
                }
            };

            let best = candidates
                .iter()
                .filter(|c| c.similarity >= self.config.embedding_similarity_threshold)
                .max_by(|a, b| {
                    a.similarity
                        .partial_cmp(&b.similarity)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .cloned();

            let Some(best) = best else {
                result.unmapped.push(entity);
                continue;
            };

            // Hard budget ceiling: once spent, no further adjudication.
            if result.llm_calls >= self.config.max_llm_calls {
                debug!(entity = %entity.raw_name, "LLM budget exhausted, entity falls through");
                result.unmapped.push(entity);
                continue;
            }

            let verdict = timeout(per_call, backend.adjudicate(&entity, &best)).await;
            result.llm_calls += 1;
            result.api_calls += 1;
            result.cost_dollars += self.config.cost_per_llm_call_dollars;

            match verdict {
                Ok(Ok(adj)) if adj.accept && adj.confidence >= self.config.confidence_threshold => {
                    let candidate = MatchCandidate {
                        target_id: best.target_id,
                        target_name: best.target_name,
                        confidence: adj.confidence,
                        method: MatchMethod::SemanticLlm,
                        stage: 4,
                        cost_dollars: self.config.cost_per_llm_call_dollars,
                    };
                    result.matched.push((entity, candidate));
                }
                Ok(Ok(_)) => result.unmapped.push(entity),
                Ok(Err(e)) => {
                    warn!(entity = %entity.raw_name, error = %e, "Adjudication failed");
                    result.failed_lookups += 1;
                    result.unmapped.push(entity);
                }
                Err(_) => {
                    warn!(entity = %entity.raw_name, "Adjudication timed out");
                    result.failed_lookups += 1;
                    result.unmapped.push(entity);
                }
            }
        }

        result.processing_time_seconds = t0.elapsed().as_secs_f64();
        result
    }

    fn run_fallback(&self, index: &ReferenceIndex, entities: Vec<Entity>) -> StageResult {
        let t0 = Instant::now();
        let mut result = StageResult::new(4);
        for entity in entities {
            match best_match(
                &entity.normalized_name,
                index,
                self.config.fallback_fuzzy_threshold,
            ) {
                Some((record, score)) => {
                    let candidate = MatchCandidate {
                        target_id: record.id.clone(),
                        target_name: record.name.clone(),
                        confidence: score,
                        method: MatchMethod::FuzzyString,
                        stage: 4,
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
impl MatchStage for SemanticMatcher {
    fn stage_number(&self) -> u8 {
        4
    }

    fn name(&self) -> &'static str {
        "semantic_llm"
    }

    fn estimated_cost(&self, n_entities: usize) -> f64 {
        if self.backend.is_none() {
            return 0.0;
        }
        (n_entities as u64).min(self.config.max_llm_calls) as f64
            * self.config.cost_per_llm_call_dollars
    }

    #[instrument(skip(self, entities), fields(n = entities.len()))]
    async fn run(&self, entities: Vec<Entity>) -> Result<StageResult> {
        match (&self.backend, &self.fallback_index) {
            (Some(backend), _) => Ok(self.run_semantic(backend.as_ref(), entities).await),
            (None, Some(index)) => Ok(self.run_fallback(index, entities)),
            // Rejected at construction.
            (None, None) => unreachable!("validated in SemanticMatcher::new"),
        }
    }
}
