//! Core data types flowing through the progressive matching pipeline.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::normalize::normalize;

// ---------------------------------------------------------------------------
// Ontology
// ---------------------------------------------------------------------------

/// Identifier namespaces recognised by the direct-match stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ontology {
    PubChem,
    Chebi,
    InchiKey,
    UniProt,
    Hmdb,
    Kegg,
}

static PUBCHEM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[1-9][0-9]*$").unwrap());
static CHEBI_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(CHEBI:)?[0-9]+$").unwrap());
static INCHIKEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{14}-[A-Z]{10}-[A-Z]$").unwrap());
static UNIPROT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([OPQ][0-9][A-Z0-9]{3}[0-9]|[A-NR-Z][0-9]([A-Z][A-Z0-9]{2}[0-9]){1,2})$").unwrap()
});
static HMDB_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^HMDB[0-9]{5,7}$").unwrap());
static KEGG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^C[0-9]{5}$").unwrap());

impl Ontology {
    pub fn as_str(&self) -> &'static str {
        match self {
            Ontology::PubChem => "pubchem",
            Ontology::Chebi => "chebi",
            Ontology::InchiKey => "inchikey",
            Ontology::UniProt => "uniprot",
            Ontology::Hmdb => "hmdb",
            Ontology::Kegg => "kegg",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pubchem" | "pubchem_cid" => Some(Ontology::PubChem),
            "chebi" => Some(Ontology::Chebi),
            "inchikey" => Some(Ontology::InchiKey),
            "uniprot" => Some(Ontology::UniProt),
            "hmdb" => Some(Ontology::Hmdb),
            "kegg" => Some(Ontology::Kegg),
            _ => None,
        }
    }

    /// Format validation for a raw identifier value in this namespace.
    /// A malformed value is treated as absent by the caller, never an error.
    pub fn is_well_formed(&self, value: &str) -> bool {
        let v = value.trim();
        match self {
            Ontology::PubChem => PUBCHEM_RE.is_match(v),
            Ontology::Chebi => CHEBI_RE.is_match(v),
            Ontology::InchiKey => INCHIKEY_RE.is_match(v),
            Ontology::UniProt => UNIPROT_RE.is_match(v),
            Ontology::Hmdb => HMDB_RE.is_match(v),
            Ontology::Kegg => KEGG_RE.is_match(v),
        }
    }

    /// Compact CURIE form, e.g. `PUBCHEM:5793` or `CHEBI:17234`.
    pub fn curie(&self, value: &str) -> String {
        let v = value.trim();
        match self {
            Ontology::Chebi if v.starts_with("CHEBI:") => v.to_string(),
            _ => format!("{}:{}", self.as_str().to_uppercase(), v),
        }
    }

    /// Default tier-1 confidence assigned to a validated identifier
    /// from this namespace. Overridable via stage configuration.
    pub fn default_confidence(&self) -> f64 {
        match self {
            Ontology::PubChem => 0.98,
            Ontology::InchiKey => 0.97,
            Ontology::UniProt => 0.96,
            Ontology::Chebi => 0.95,
            Ontology::Hmdb => 0.93,
            Ontology::Kegg => 0.92,
        }
    }

    /// Default Stage 1 priority order: first well-formed identifier wins.
    pub fn default_priority() -> Vec<Ontology> {
        vec![
            Ontology::PubChem,
            Ontology::Chebi,
            Ontology::InchiKey,
            Ontology::UniProt,
            Ontology::Hmdb,
            Ontology::Kegg,
        ]
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A single biological record (metabolite, protein or chemistry marker)
/// being identifier-mapped. Raw fields are immutable after construction;
/// `normalized_name` is computed once at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub raw_name: String,
    pub normalized_name: String,
    #[serde(default)]
    pub source_identifiers: HashMap<String, String>,
    pub source_dataset: String,
}

impl Entity {
    pub fn new(raw_name: impl Into<String>, source_dataset: impl Into<String>) -> Self {
        let raw_name = raw_name.into();
        let normalized_name = normalize(&raw_name);
        Self {
            raw_name,
            normalized_name,
            source_identifiers: HashMap::new(),
            source_dataset: source_dataset.into(),
        }
    }

    pub fn with_identifier(mut self, ontology: Ontology, value: impl Into<String>) -> Self {
        self.source_identifiers
            .insert(ontology.as_str().to_string(), value.into());
        self
    }

    /// Raw identifier for a namespace, if present in the source row.
    pub fn identifier(&self, ontology: Ontology) -> Option<&str> {
        self.source_identifiers
            .get(ontology.as_str())
            .map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// MatchCandidate
// ---------------------------------------------------------------------------

/// Which strategy produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    DirectId,
    FuzzyString,
    ApiBridge,
    SemanticLlm,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::DirectId => "direct_id",
            MatchMethod::FuzzyString => "fuzzy_string",
            MatchMethod::ApiBridge => "api_bridge",
            MatchMethod::SemanticLlm => "semantic_llm",
        }
    }
}

/// A proposed source → target mapping with confidence and provenance.
/// Created by exactly one stage for exactly one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub target_id: String,
    pub target_name: String,
    pub confidence: f64,
    pub method: MatchMethod,
    pub stage: u8,
    pub cost_dollars: f64,
}

// ---------------------------------------------------------------------------
// StageResult
// ---------------------------------------------------------------------------

/// Output of running one stage over a batch of entities.
///
/// Invariant: `matched.len() + unmapped.len()` equals the size of the
/// input batch — no entity is silently dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_number: u8,
    pub matched: Vec<(Entity, MatchCandidate)>,
    pub unmapped: Vec<Entity>,
    pub processing_time_seconds: f64,
    pub api_calls: u64,
    pub cost_dollars: f64,
    pub failed_lookups: u64,
    pub llm_calls: u64,
    pub cache_hits: u64,
}

impl StageResult {
    pub fn new(stage_number: u8) -> Self {
        Self {
            stage_number,
            ..Default::default()
        }
    }

    /// Total entities accounted for by this result.
    pub fn total(&self) -> usize {
        self.matched.len() + self.unmapped.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
