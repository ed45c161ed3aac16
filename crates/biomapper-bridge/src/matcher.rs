//! Stage 3 — bridge lookup orchestration.
//!
//! Issues one bridge lookup per unmapped entity under bounded concurrency
//! and fixed-interval pacing, with retry-then-skip semantics: a single
//! entity's failure never aborts the batch. The stage reports an error
//! only when the bridge service itself is unreachable for the whole batch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use biomapper_common::confidence::{check_unit_interval, STAGE3_DEFAULT_CONFIDENCE};
use biomapper_common::{
    BiomapperError, Entity, MatchCandidate, MatchMethod, MatchStage, Ontology, Result, StageResult,
};

use crate::client::{BridgeCandidate, BridgeClient};
use crate::limiter::FixedIntervalLimiter;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeMatcherConfig {
    /// Lookups per second across the whole batch; <= 0 disables pacing.
    #[serde(default = "default_rate")]
    pub rate_limit_per_second: f64,
    #[serde(default = "default_concurrent")]
    pub max_concurrent: usize,
    /// Retries for transient errors (timeout, 5xx). 4xx is never retried.
    #[serde(default = "default_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_call_timeout")]
    pub per_call_timeout_secs: u64,
    /// Bounds the whole stage; entities still in flight at expiry are
    /// returned unmapped.
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,
    #[serde(default = "default_cost")]
    pub cost_per_call_dollars: f64,
    /// Used when the bridge reports no match-quality signal.
    #[serde(default = "default_confidence")]
    pub default_confidence: f64,
    /// Tier-3 ceiling: bridge-derived scores are clamped below the
    /// Stage 1/2 confidence ranges.
    #[serde(default = "default_max_confidence")]
    pub max_confidence: f64,
}

fn default_rate() -> f64 {
    5.0
}
fn default_concurrent() -> usize {
    5
}
fn default_retries() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    250
}
fn default_call_timeout() -> u64 {
    15
}
fn default_stage_timeout() -> u64 {
    300
}
fn default_cost() -> f64 {
    0.0001
}
fn default_confidence() -> f64 {
    STAGE3_DEFAULT_CONFIDENCE
}
fn default_max_confidence() -> f64 {
    0.90
}

impl Default for BridgeMatcherConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_second: default_rate(),
            max_concurrent: default_concurrent(),
            max_retries: default_retries(),
            retry_backoff_ms: default_backoff_ms(),
            per_call_timeout_secs: default_call_timeout(),
            stage_timeout_secs: default_stage_timeout(),
            cost_per_call_dollars: default_cost(),
            default_confidence: default_confidence(),
            max_confidence: default_max_confidence(),
        }
    }
}

impl BridgeMatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(BiomapperError::Config(
                "bridge max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.per_call_timeout_secs == 0 || self.stage_timeout_secs == 0 {
            return Err(BiomapperError::Config(
                "bridge timeouts must be non-zero".to_string(),
            ));
        }
        if self.cost_per_call_dollars < 0.0 {
            return Err(BiomapperError::Config(
                "bridge cost_per_call_dollars must be >= 0".to_string(),
            ));
        }
        check_unit_interval("bridge default_confidence", self.default_confidence)?;
        check_unit_interval("bridge max_confidence", self.max_confidence)?;
        if self.default_confidence > self.max_confidence {
            return Err(BiomapperError::Config(format!(
                "bridge default_confidence ({}) exceeds max_confidence ({})",
                self.default_confidence, self.max_confidence
            )));
        }
        Ok(())
    }
}

enum Verdict {
    Matched(MatchCandidate),
    NoMatch,
    Failed,
}

pub struct ApiBridgeMatcher {
    client: Arc<dyn BridgeClient>,
    config: BridgeMatcherConfig,
}

impl ApiBridgeMatcher {
    pub fn new(client: Arc<dyn BridgeClient>, config: BridgeMatcherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { client, config })
    }

    /// Prefer an existing well-formed identifier as the lookup key,
    /// falling back to the normalized name.
    fn query_for(entity: &Entity) -> String {
        for ontology in Ontology::default_priority() {
            if let Some(value) = entity.identifier(ontology) {
                if ontology.is_well_formed(value) {
                    return ontology.curie(value);
                }
            }
        }
        entity.normalized_name.clone()
    }

    fn candidate_from(&self, best: &BridgeCandidate) -> MatchCandidate {
        // Bridge scores are kept within the tier-3 band: never above the
        // ceiling, never below the tier default.
        let confidence = best
            .score
            .map(|s| s.clamp(self.config.default_confidence, self.config.max_confidence))
            .unwrap_or(self.config.default_confidence);
        MatchCandidate {
            target_id: best.target_id.clone(),
            target_name: best.target_name.clone(),
            confidence,
            method: MatchMethod::ApiBridge,
            stage: 3,
            cost_dollars: self.config.cost_per_call_dollars,
        }
    }

    async fn lookup_with_retry(
        &self,
        entity: &Entity,
        limiter: &FixedIntervalLimiter,
        api_calls: &AtomicU64,
    ) -> Verdict {
        let query = Self::query_for(entity);
        let per_call = Duration::from_secs(self.config.per_call_timeout_secs);
        let mut attempt: u32 = 0;

        loop {
            limiter.acquire().await;
            api_calls.fetch_add(1, Ordering::SeqCst);

            let outcome = match timeout(per_call, self.client.lookup(&query)).await {
                Ok(res) => res,
                Err(_) => Err(crate::client::BridgeError::Timeout),
            };

            match outcome {
                Ok(candidates) => {
                    let best = candidates.iter().max_by(|a, b| {
                        a.score
                            .unwrap_or(0.0)
                            .partial_cmp(&b.score.unwrap_or(0.0))
                            .unwrap_or(std::cmp::Ordering::Equal)
                    });
                    return match best {
                        Some(c) => Verdict::Matched(self.candidate_from(c)),
                        None => Verdict::NoMatch,
                    };
                }
                Err(e) if e.is_definitive_miss() => {
                    debug!(entity = %entity.raw_name, query, "Bridge reported definitive miss");
                    return Verdict::NoMatch;
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let backoff =
                        Duration::from_millis(self.config.retry_backoff_ms * (1 << attempt));
                    debug!(
                        entity = %entity.raw_name,
                        attempt,
                        error = %e,
                        "Transient bridge error, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    warn!(entity = %entity.raw_name, error = %e, "Bridge lookup failed, skipping entity");
                    return Verdict::Failed;
                }
            }
        }
    }
}

#[async_trait]
impl MatchStage for ApiBridgeMatcher {
    fn stage_number(&self) -> u8 {
        3
    }

    fn name(&self) -> &'static str {
        "api_bridge"
    }

    fn estimated_cost(&self, n_entities: usize) -> f64 {
        n_entities as f64 * self.config.cost_per_call_dollars
    }

    #[instrument(skip(self, entities), fields(bridge = self.client.name(), n = entities.len()))]
    async fn run(&self, entities: Vec<Entity>) -> Result<StageResult> {
        let t0 = Instant::now();
        let mut result = StageResult::new(3);
        if entities.is_empty() {
            return Ok(result);
        }

        let n = entities.len();
        let limiter = FixedIntervalLimiter::new(self.config.rate_limit_per_second);
        let api_calls = AtomicU64::new(0);
        let verdicts: Mutex<Vec<Option<Verdict>>> =
            Mutex::new((0..n).map(|_| None).collect());

        let work = stream::iter(entities.clone().into_iter().enumerate())
            .map(|(i, entity)| {
                let limiter = &limiter;
                let api_calls = &api_calls;
                let verdicts = &verdicts;
                async move {
                    let verdict = self.lookup_with_retry(&entity, limiter, api_calls).await;
                    verdicts.lock().unwrap()[i] = Some(verdict);
                }
            })
            .buffer_unordered(self.config.max_concurrent)
            .collect::<()>();

        let stage_budget = Duration::from_secs(self.config.stage_timeout_secs);
        if timeout(stage_budget, work).await.is_err() {
            warn!(
                elapsed_secs = t0.elapsed().as_secs(),
                "Bridge stage timed out, in-flight entities go unmapped"
            );
        }

        let verdicts = verdicts.into_inner().unwrap();
        let mut successes: usize = 0;
        for (entity, verdict) in entities.into_iter().zip(verdicts) {
            match verdict {
                Some(Verdict::Matched(candidate)) => {
                    successes += 1;
                    result.matched.push((entity, candidate));
                }
                Some(Verdict::NoMatch) => {
                    successes += 1;
                    result.unmapped.push(entity);
                }
                Some(Verdict::Failed) => {
                    result.failed_lookups += 1;
                    result.unmapped.push(entity);
                }
                // Still in flight at stage timeout.
                None => result.unmapped.push(entity),
            }
        }

        result.api_calls = api_calls.load(Ordering::SeqCst);
        result.cost_dollars = result.api_calls as f64 * self.config.cost_per_call_dollars;
        result.processing_time_seconds = t0.elapsed().as_secs_f64();

        // Every lookup failed and none succeeded: the bridge itself is
        // down, which the orchestrator handles as a whole-stage failure.
        if successes == 0 && result.failed_lookups as usize == n {
            return Err(BiomapperError::BridgeUnavailable {
                message: format!("all {n} lookups against {} failed", self.client.name()),
                api_calls: result.api_calls,
                cost_dollars: result.cost_dollars,
            });
        }

        Ok(result)
    }
}
