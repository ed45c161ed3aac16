//! Stage seam for the progressive orchestrator.
//!
//! Each matching strategy implements `MatchStage`; the orchestrator holds
//! an ordered list of boxed stages injected at construction time, which
//! keeps stages unit-testable with stubs.

use async_trait::async_trait;

use crate::entities::{Entity, StageResult};
use crate::Result;

/// One sequential matching strategy. Stages are stateless between
/// invocations: they receive a batch and return a `StageResult`.
#[async_trait]
pub trait MatchStage: Send + Sync {
    /// Position in the progressive pipeline (1-4).
    fn stage_number(&self) -> u8;

    fn name(&self) -> &'static str;

    /// Projected monetary cost of processing `n_entities`, used by the
    /// orchestrator's budget short-circuit. Local stages return 0.
    fn estimated_cost(&self, _n_entities: usize) -> f64 {
        0.0
    }

    /// Process a batch. Per-entity failures are recovered locally and
    /// reflected in the result; an `Err` means the whole stage is
    /// unusable (e.g. bridge service unreachable).
    async fn run(&self, entities: Vec<Entity>) -> Result<StageResult>;
}
