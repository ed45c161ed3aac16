//! Shared types for the biomapper progressive resolution pipeline.

pub mod confidence;
pub mod entities;
pub mod error;
pub mod normalize;
pub mod stage;

pub use entities::{Entity, MatchCandidate, MatchMethod, Ontology, StageResult};
pub use error::{BiomapperError, Result};
pub use stage::MatchStage;
