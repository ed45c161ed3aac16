//! Cumulative statistics ledger for one pipeline run.
//!
//! Owned exclusively by the orchestrator and updated through pure merge
//! operations after each stage completes; stages never see or mutate it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use biomapper_common::confidence::bucket;
use biomapper_common::{MatchCandidate, StageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
    SkippedDisabled,
    SkippedBudgetExceeded,
}

/// Per-stage summary kept in the breakdown for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage_number: u8,
    pub status: StageStatus,
    pub input_count: usize,
    pub matched_count: usize,
    pub api_calls: u64,
    pub failed_lookups: u64,
    pub llm_calls: u64,
    pub cache_hits: u64,
    pub cost_dollars: f64,
    pub processing_time_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageSummary {
    pub fn from_result(input_count: usize, result: &StageResult) -> Self {
        Self {
            stage_number: result.stage_number,
            status: StageStatus::Completed,
            input_count,
            matched_count: result.matched.len(),
            api_calls: result.api_calls,
            failed_lookups: result.failed_lookups,
            llm_calls: result.llm_calls,
            cache_hits: result.cache_hits,
            cost_dollars: result.cost_dollars,
            processing_time_seconds: result.processing_time_seconds,
            error: None,
        }
    }

    pub fn failed(stage_number: u8, input_count: usize, error: String) -> Self {
        Self {
            stage_number,
            status: StageStatus::Failed,
            input_count,
            matched_count: 0,
            api_calls: 0,
            failed_lookups: 0,
            llm_calls: 0,
            cache_hits: 0,
            cost_dollars: 0.0,
            processing_time_seconds: 0.0,
            error: Some(error),
        }
    }

    pub fn skipped(stage_number: u8, input_count: usize, status: StageStatus) -> Self {
        Self {
            stage_number,
            status,
            input_count,
            matched_count: 0,
            api_calls: 0,
            failed_lookups: 0,
            llm_calls: 0,
            cache_hits: 0,
            cost_dollars: 0.0,
            processing_time_seconds: 0.0,
            error: None,
        }
    }
}

/// The single progressive ledger for a run. Coverage is monotonically
/// non-decreasing across merges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressiveStatistics {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub total_entities: usize,
    pub matched_total: usize,
    pub cumulative_coverage: f64,
    pub total_cost_dollars: f64,
    pub stage_breakdown: BTreeMap<u8, StageSummary>,
    pub confidence_distribution: BTreeMap<String, u64>,
    pub duration_ms: u64,
}

impl ProgressiveStatistics {
    pub fn new(total_entities: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            total_entities,
            matched_total: 0,
            cumulative_coverage: 0.0,
            total_cost_dollars: 0.0,
            stage_breakdown: BTreeMap::new(),
            confidence_distribution: BTreeMap::new(),
            duration_ms: 0,
        }
    }

    /// Fold one completed stage into the ledger. Pure with respect to
    /// the stage: takes the summary plus the accepted candidates and
    /// returns the updated ledger.
    pub fn merged(mut self, summary: StageSummary, candidates: &[MatchCandidate]) -> Self {
        self.matched_total += summary.matched_count;
        self.total_cost_dollars += summary.cost_dollars;
        for c in candidates {
            *self
                .confidence_distribution
                .entry(bucket(c.confidence).to_string())
                .or_insert(0) += 1;
        }
        self.stage_breakdown.insert(summary.stage_number, summary);
        self.cumulative_coverage = if self.total_entities == 0 {
            0.0
        } else {
            self.matched_total as f64 / self.total_entities as f64
        };
        self
    }

    /// Record a stage that did not contribute matches (failed or
    /// skipped). Cost already incurred before the failure still counts.
    pub fn recorded(mut self, summary: StageSummary) -> Self {
        self.total_cost_dollars += summary.cost_dollars;
        self.stage_breakdown.insert(summary.stage_number, summary);
        self
    }

    pub fn to_json(&self) -> biomapper_common::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biomapper_common::{MatchCandidate, MatchMethod};

    fn candidate(confidence: f64, stage: u8) -> MatchCandidate {
        MatchCandidate {
            target_id: "REF".to_string(),
            target_name: "ref".to_string(),
            confidence,
            method: MatchMethod::DirectId,
            stage,
            cost_dollars: 0.0,
        }
    }

    fn summary(stage: u8, input: usize, matched: usize, cost: f64) -> StageSummary {
        StageSummary {
            stage_number: stage,
            status: StageStatus::Completed,
            input_count: input,
            matched_count: matched,
            api_calls: 0,
            failed_lookups: 0,
            llm_calls: 0,
            cache_hits: 0,
            cost_dollars: cost,
            processing_time_seconds: 0.01,
            error: None,
        }
    }

    #[test]
    fn test_coverage_is_monotonic() {
        let stats = ProgressiveStatistics::new(10);
        let stats = stats.merged(summary(1, 10, 4, 0.0), &vec![candidate(0.98, 1); 4]);
        let after_stage1 = stats.cumulative_coverage;
        assert!((after_stage1 - 0.4).abs() < 1e-9);

        let stats = stats.merged(summary(2, 6, 2, 0.0), &vec![candidate(0.88, 2); 2]);
        assert!(stats.cumulative_coverage >= after_stage1);
        assert!((stats.cumulative_coverage - 0.6).abs() < 1e-9);

        // A stage with zero matches leaves coverage unchanged.
        let before = stats.cumulative_coverage;
        let stats = stats.merged(summary(3, 4, 0, 0.05), &[]);
        assert_eq!(stats.cumulative_coverage, before);
    }

    #[test]
    fn test_cost_accumulates() {
        let stats = ProgressiveStatistics::new(5)
            .merged(summary(3, 5, 1, 0.01), &[candidate(0.75, 3)])
            .merged(summary(4, 4, 1, 0.02), &[candidate(0.90, 4)]);
        assert!((stats.total_cost_dollars - 0.03).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_histogram_buckets() {
        let stats = ProgressiveStatistics::new(3).merged(
            summary(1, 3, 3, 0.0),
            &[candidate(0.98, 1), candidate(0.95, 1), candidate(0.75, 1)],
        );
        assert_eq!(stats.confidence_distribution[">=0.95"], 2);
        assert_eq!(stats.confidence_distribution["0.70-0.79"], 1);
    }

    #[test]
    fn test_failed_stage_recorded_without_matches() {
        let stats = ProgressiveStatistics::new(4)
            .recorded(StageSummary::failed(3, 4, "bridge down".to_string()));
        assert_eq!(stats.matched_total, 0);
        assert_eq!(stats.stage_breakdown[&3].status, StageStatus::Failed);
        assert_eq!(
            stats.stage_breakdown[&3].error.as_deref(),
            Some("bridge down")
        );
    }

    #[test]
    fn test_failed_stage_keeps_spent_cost() {
        let mut summary = StageSummary::failed(3, 2, "bridge down".to_string());
        summary.api_calls = 8;
        summary.cost_dollars = 0.0008;
        let stats = ProgressiveStatistics::new(2).recorded(summary);
        assert_eq!(stats.matched_total, 0);
        assert!((stats.total_cost_dollars - 0.0008).abs() < 1e-12);
        assert_eq!(stats.stage_breakdown[&3].api_calls, 8);
    }

    #[test]
    fn test_serializes_for_audit() {
        let stats = ProgressiveStatistics::new(2).merged(summary(1, 2, 1, 0.0), &[candidate(0.98, 1)]);
        let json = stats.to_json().unwrap();
        assert_eq!(json["total_entities"], 2);
        assert!(json["stage_breakdown"]["1"]["matched_count"].is_number());
    }
}
