//! YAML-driven pipeline configuration.
//!
//! One immutable, validated value object per stage, aggregated here.
//! Validation is fail-fast: a bad threshold aborts before any entity
//! is processed. Runtime data problems never surface through config.

use std::path::Path;

use serde::{Deserialize, Serialize};

use biomapper_bridge::BridgeMatcherConfig;
use biomapper_common::{BiomapperError, Result};
use biomapper_match::{DirectMatcherConfig, FuzzyMatcherConfig};
use biomapper_semantic::SemanticMatcherConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Label for the target ontology space, used as the cache key's
    /// `target_type` component.
    #[serde(default = "default_target_type")]
    pub target_type: String,

    /// Orchestrator-level spend ceiling across all stages. When a
    /// stage's projected cost would cross it, that stage is skipped
    /// proactively and recorded as such.
    #[serde(default)]
    pub max_total_cost_dollars: Option<f64>,

    #[serde(default = "default_true")]
    pub stage1_enabled: bool,
    #[serde(default)]
    pub stage1: DirectMatcherConfig,

    #[serde(default = "default_true")]
    pub stage2_enabled: bool,
    #[serde(default)]
    pub stage2: FuzzyMatcherConfig,

    #[serde(default = "default_true")]
    pub stage3_enabled: bool,
    #[serde(default)]
    pub stage3: BridgeMatcherConfig,

    /// Stage 4 is opt-in: it is the only stage with per-entity LLM cost.
    #[serde(default)]
    pub stage4_enabled: bool,
    #[serde(default)]
    pub stage4: SemanticMatcherConfig,
}

fn default_target_type() -> String {
    "reference".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_type: default_target_type(),
            max_total_cost_dollars: None,
            stage1_enabled: true,
            stage1: DirectMatcherConfig::default(),
            stage2_enabled: true,
            stage2: FuzzyMatcherConfig::default(),
            stage3_enabled: true,
            stage3: BridgeMatcherConfig::default(),
            stage4_enabled: false,
            stage4: SemanticMatcherConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            BiomapperError::Config(format!(
                "cannot read pipeline config {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(max) = self.max_total_cost_dollars {
            if max < 0.0 || max.is_nan() {
                return Err(BiomapperError::Config(format!(
                    "max_total_cost_dollars must be >= 0, got {max}"
                )));
            }
        }
        self.stage1.validate()?;
        self.stage2.validate()?;
        self.stage3.validate()?;
        self.stage4.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip_with_overrides() {
        let yaml = r#"
target_type: kraken
max_total_cost_dollars: 1.5
stage2:
  threshold: 0.9
stage3:
  rate_limit_per_second: 2.0
  max_concurrent: 3
stage4_enabled: true
stage4:
  max_llm_calls: 10
"#;
        let config = PipelineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.target_type, "kraken");
        assert_eq!(config.max_total_cost_dollars, Some(1.5));
        assert_eq!(config.stage2.threshold, 0.9);
        assert_eq!(config.stage3.max_concurrent, 3);
        assert!(config.stage4_enabled);
        assert_eq!(config.stage4.max_llm_calls, 10);
        // Untouched sections keep their defaults.
        assert!(config.stage1_enabled);
        assert_eq!(config.stage4.top_k, 5);
    }

    #[test]
    fn test_from_yaml_file() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "target_type: kraken\nstage4_enabled: true").unwrap();
        let config = PipelineConfig::from_yaml_file(f.path()).unwrap();
        assert_eq!(config.target_type, "kraken");
        assert!(config.stage4_enabled);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = PipelineConfig::from_yaml_file("/nonexistent/pipeline.yaml").unwrap_err();
        assert!(matches!(err, BiomapperError::Config(_)));
    }

    #[test]
    fn test_bad_threshold_fails_fast() {
        let yaml = "stage2:\n  threshold: 1.4\n";
        let err = PipelineConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, BiomapperError::Config(_)));
    }

    #[test]
    fn test_negative_budget_rejected() {
        let yaml = "max_total_cost_dollars: -1.0\n";
        assert!(PipelineConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_unparseable_yaml_is_error() {
        assert!(PipelineConfig::from_yaml_str(": not yaml").is_err());
    }
}
