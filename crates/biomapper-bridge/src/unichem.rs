//! UniChem compounds API client.
//!
//! Endpoint used:
//!   POST https://www.ebi.ac.uk/unichem/api/v1/compounds
//!
//! UniChem resolves a structure key (InChIKey) or source identifier into
//! the equivalent identifiers held by other registries. It reports no
//! match-quality signal, so candidates carry `score: None` and the
//! matcher falls back to its configured tier-3 default confidence.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, instrument};

use crate::client::{BridgeCandidate, BridgeClient, BridgeError};

const UNICHEM_COMPOUNDS_URL: &str = "https://www.ebi.ac.uk/unichem/api/v1/compounds";

pub struct UniChemClient {
    base_url: String,
    client: reqwest::Client,
}

impl UniChemClient {
    pub fn new(per_call_timeout: Duration) -> Result<Self, BridgeError> {
        let client = reqwest::Client::builder()
            .timeout(per_call_timeout)
            .user_agent("biomapper/0.1 (identifier harmonization)")
            .build()?;
        Ok(Self {
            base_url: UNICHEM_COMPOUNDS_URL.to_string(),
            client,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn query_type(query: &str) -> &'static str {
        // 14-10-1 uppercase block structure marks an InChIKey.
        let is_inchikey = query.len() == 27
            && query.as_bytes().get(14) == Some(&b'-')
            && query.as_bytes().get(25) == Some(&b'-');
        if is_inchikey {
            "inchikey"
        } else {
            "sourceID"
        }
    }
}

#[async_trait]
impl BridgeClient for UniChemClient {
    #[instrument(skip(self))]
    async fn lookup(&self, query: &str) -> Result<Vec<BridgeCandidate>, BridgeError> {
        let body = json!({
            "type": Self::query_type(query),
            "compound": query,
        });

        let resp = self.client.post(&self.base_url).json(&body).send().await?;
        let status = resp.status().as_u16();
        if status >= 400 {
            let message = resp.text().await.unwrap_or_default();
            return Err(BridgeError::Status { status, message });
        }

        let payload: serde_json::Value = resp.json().await?;
        let candidates = parse_compounds(&payload);
        debug!(query, n = candidates.len(), "UniChem lookup complete");
        Ok(candidates)
    }

    fn name(&self) -> &'static str {
        "unichem"
    }
}

/// Flatten the UniChem `compounds[].sources[]` structure into candidates.
fn parse_compounds(payload: &serde_json::Value) -> Vec<BridgeCandidate> {
    let mut out = Vec::new();
    let compounds = payload["compounds"].as_array().cloned().unwrap_or_default();
    for compound in &compounds {
        let sources = compound["sources"].as_array().cloned().unwrap_or_default();
        for source in &sources {
            let short_name = source["shortName"].as_str().unwrap_or("unichem");
            let Some(compound_id) = source["compoundId"].as_str().map(String::from).or_else(|| {
                source["compoundId"].as_u64().map(|n| n.to_string())
            }) else {
                continue;
            };
            out.push(BridgeCandidate {
                target_id: format!("{}:{}", short_name.to_uppercase(), compound_id),
                target_name: source["longName"]
                    .as_str()
                    .unwrap_or(short_name)
                    .to_string(),
                score: None,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_type_detection() {
        assert_eq!(
            UniChemClient::query_type("WQZGKKKJIJFFOK-GASJEMHNSA-N"),
            "inchikey"
        );
        assert_eq!(UniChemClient::query_type("CHEBI:17234"), "sourceID");
    }

    #[test]
    fn test_parse_compounds_payload() {
        let payload = serde_json::json!({
            "compounds": [{
                "uci": 103233771,
                "sources": [
                    {"shortName": "chebi", "longName": "ChEBI", "compoundId": "17234"},
                    {"shortName": "pubchem", "longName": "PubChem", "compoundId": 5793}
                ]
            }]
        });
        let candidates = parse_compounds(&payload);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].target_id, "CHEBI:17234");
        assert_eq!(candidates[1].target_id, "PUBCHEM:5793");
        assert!(candidates[0].score.is_none());
    }

    #[test]
    fn test_parse_empty_payload() {
        assert!(parse_compounds(&serde_json::json!({})).is_empty());
    }
}
