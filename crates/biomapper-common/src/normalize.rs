//! Biomarker name normalization.
//!
//! Pure text cleaning used by every matching stage: lowercase, expand
//! known panel abbreviations, strip punctuation, collapse whitespace.
//! Same input always yields the same output; no I/O.

use std::collections::HashMap;
use std::sync::LazyLock;

/// Abbreviation expansions seen across Nightingale/Arivale style panels.
/// Keys are matched after cleaning, so `HDL_C`, `hdl-c` and `HDL C`
/// all hit the same entry.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("hdl_c", "hdl cholesterol"),
    ("ldl_c", "ldl cholesterol"),
    ("vldl_c", "vldl cholesterol"),
    ("total_c", "total cholesterol"),
    ("tg", "triglycerides"),
    ("glc", "glucose"),
    ("crp", "c reactive protein"),
    ("hba1c", "hemoglobin a1c"),
    ("apoa1", "apolipoprotein a1"),
    ("apob", "apolipoprotein b"),
    ("dha", "docosahexaenoic acid"),
    ("pufa", "polyunsaturated fatty acids"),
    ("mufa", "monounsaturated fatty acids"),
    ("sfa", "saturated fatty acids"),
    ("bcaa", "branched chain amino acids"),
];

static EXPANSIONS: LazyLock<HashMap<String, String>> = LazyLock::new(|| {
    ABBREVIATIONS
        .iter()
        .map(|(k, v)| (clean(k), clean(v)))
        .collect()
});

/// Lowercase, replace punctuation/underscores with spaces, collapse runs
/// of whitespace.
fn clean(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let replaced: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize a raw biomarker name for comparison.
/// Empty input returns an empty string, never an error.
pub fn normalize(raw: &str) -> String {
    let cleaned = clean(raw);
    if cleaned.is_empty() {
        return cleaned;
    }

    // Whole-name expansion first ("HDL_C" -> "hdl cholesterol"),
    // then token-level for abbreviations embedded in longer names.
    if let Some(expanded) = EXPANSIONS.get(&cleaned) {
        return expanded.clone();
    }

    cleaned
        .split_whitespace()
        .map(|tok| {
            EXPANSIONS
                .get(tok)
                .map(String::as_str)
                .unwrap_or(tok)
                .to_string()
        })
        .collect::<Vec<_>>()
        .join(" ")
}
