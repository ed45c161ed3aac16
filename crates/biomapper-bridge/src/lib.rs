//! Stage 3 — cross-reference expansion via external bridge APIs.
//!
//! The HTTP clients are thin; the orchestration logic here owns retry,
//! pacing, bounded concurrency and partial-failure isolation.

pub mod client;
pub mod limiter;
pub mod matcher;
pub mod unichem;

pub use client::{BridgeCandidate, BridgeClient, BridgeError, MockBridgeClient};
pub use limiter::FixedIntervalLimiter;
pub use matcher::{ApiBridgeMatcher, BridgeMatcherConfig};
pub use unichem::UniChemClient;
