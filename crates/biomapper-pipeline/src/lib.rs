//! Progressive orchestration: sequences the four matching stages,
//! threads the unmapped remainder, enforces the cost budget and keeps
//! the cumulative statistics ledger.

pub mod builder;
pub mod cache;
pub mod config;
pub mod orchestrator;
pub mod stats;

pub use builder::build_pipeline;
pub use cache::{CachedMapping, InMemoryMappingCache, MappingCache};
pub use config::PipelineConfig;
pub use orchestrator::{PipelineOutcome, ProgressiveOrchestrator};
pub use stats::{ProgressiveStatistics, StageStatus, StageSummary};
