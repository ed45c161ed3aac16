//! Stage 4 — embedding similarity plus LLM-adjudicated matching.
//!
//! Last-resort stage with the highest per-entity cost, so acceptance is
//! conjunctive (embedding gate AND LLM confidence gate) and LLM calls sit
//! behind a hard budget ceiling. Degrades to a strict fuzzy pass when no
//! backend is configured.

pub mod backend;
pub mod matcher;

pub use backend::{
    Adjudication, MockSemanticBackend, OpenAiCompatibleBackend, SemanticBackend,
    SemanticCandidate, SemanticError,
};
pub use matcher::{SemanticMatcher, SemanticMatcherConfig};
