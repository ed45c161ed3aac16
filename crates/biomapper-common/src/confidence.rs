//! Confidence tiering constants and histogram bucketing.
//!
//! The design convention: earlier, cheaper, more-certain stages receive
//! higher default confidence than later, costlier stages. All constants
//! here are defaults — every stage config can override them.

/// Default Stage 2 acceptance threshold (token-sort similarity).
pub const STAGE2_DEFAULT_THRESHOLD: f64 = 0.85;

/// Default tier-3 confidence when the bridge API reports no quality signal.
pub const STAGE3_DEFAULT_CONFIDENCE: f64 = 0.75;

/// Default Stage 4 LLM confidence acceptance threshold.
pub const STAGE4_DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.85;

/// Default Stage 4 embedding similarity gate.
pub const STAGE4_DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.80;

/// Default threshold for the Stage 4 fuzzy fallback — stricter than the
/// Stage 2 default, reflecting that anything surviving to Stage 4 already
/// failed the looser pass.
pub const STAGE4_FALLBACK_FUZZY_THRESHOLD: f64 = 0.92;

/// Histogram bucket label for a confidence value.
pub fn bucket(confidence: f64) -> &'static str {
    if confidence >= 0.95 {
        ">=0.95"
    } else if confidence >= 0.90 {
        "0.90-0.94"
    } else if confidence >= 0.80 {
        "0.80-0.89"
    } else if confidence >= 0.70 {
        "0.70-0.79"
    } else {
        "<0.70"
    }
}

/// Validate that a threshold lies in [0, 1]. Misconfiguration is fatal
/// at startup, before any entity processing begins.
pub fn check_unit_interval(name: &str, value: f64) -> crate::Result<()> {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        return Err(crate::BiomapperError::Config(format!(
            "{name} must be in [0, 1], got {value}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Ontology;

    #[test]
    fn test_bucket_edges() {
        assert_eq!(bucket(0.98), ">=0.95");
        assert_eq!(bucket(0.95), ">=0.95");
        assert_eq!(bucket(0.90), "0.90-0.94");
        assert_eq!(bucket(0.85), "0.80-0.89");
        assert_eq!(bucket(0.75), "0.70-0.79");
        assert_eq!(bucket(0.40), "<0.70");
    }

    #[test]
    fn test_tier1_constants_exceed_tier3_default() {
        // Per-ontology Stage 1 confidence always beats the Stage 3 default.
        for ont in Ontology::default_priority() {
            assert!(ont.default_confidence() > STAGE3_DEFAULT_CONFIDENCE);
        }
    }

    #[test]
    fn test_fallback_threshold_stricter_than_stage2() {
        assert!(STAGE4_FALLBACK_FUZZY_THRESHOLD > STAGE2_DEFAULT_THRESHOLD);
    }

    #[test]
    fn test_check_unit_interval() {
        assert!(check_unit_interval("t", 0.5).is_ok());
        assert!(check_unit_interval("t", 0.0).is_ok());
        assert!(check_unit_interval("t", 1.0).is_ok());
        assert!(check_unit_interval("t", 1.2).is_err());
        assert!(check_unit_interval("t", -0.1).is_err());
        assert!(check_unit_interval("t", f64::NAN).is_err());
    }
}
