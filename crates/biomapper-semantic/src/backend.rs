//! Semantic backend trait and the OpenAI-compatible implementation.
//!
//! Any endpoint speaking the `/v1/embeddings` and `/v1/chat/completions`
//! shapes works here (OpenAI, LMStudio, vLLM, Ollama's compat layer, …).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use biomapper_common::Entity;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SemanticError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    #[error("API error [{status}]: {message}")]
    ApiError { status: u16, message: String },
    #[error("Unparseable adjudication: {0}")]
    BadAdjudication(String),
}

// ── Data shapes ───────────────────────────────────────────────────────────────

/// Nearest-neighbour candidate from the embedding index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticCandidate {
    pub target_id: String,
    pub target_name: String,
    /// Cosine similarity in [0, 1].
    pub similarity: f64,
}

/// LLM verdict on one (entity, candidate) pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Adjudication {
    pub accept: bool,
    pub confidence: f64,
}

// ── Trait ─────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait SemanticBackend: Send + Sync {
    /// Nearest reference entries by embedding similarity.
    async fn similarity_search(
        &self,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<SemanticCandidate>, SemanticError>;

    /// Ask the LLM whether the candidate really names the same entity.
    async fn adjudicate(
        &self,
        entity: &Entity,
        candidate: &SemanticCandidate,
    ) -> Result<Adjudication, SemanticError>;
}

// ── OpenAI-compatible backend ─────────────────────────────────────────────────

pub struct OpenAiCompatibleBackend {
    base_url: String,
    model: String,
    embedding_model: String,
    api_key: Option<String>,
    client: reqwest::Client,
    /// Reference entries with their precomputed embeddings.
    reference: Vec<(String, String, Vec<f32>)>,
}

impl OpenAiCompatibleBackend {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        embedding_model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            embedding_model: embedding_model.into(),
            api_key,
            client: reqwest::Client::new(),
            reference: Vec::new(),
        }
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(k) => req.bearer_auth(k),
            None => req,
        }
    }

    async fn check(resp: reqwest::Response) -> Result<serde_json::Value, SemanticError> {
        let status = resp.status().as_u16();
        let body: serde_json::Value = resp.json().await?;
        if status >= 400 {
            let message = body["error"]["message"]
                .as_str()
                .or_else(|| body["message"].as_str())
                .unwrap_or("unknown API error")
                .to_string();
            return Err(SemanticError::ApiError { status, message });
        }
        Ok(body)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SemanticError> {
        let url = format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({"model": &self.embedding_model, "input": texts});
        let resp = self.auth(self.client.post(&url)).json(&body).send().await?;
        let json = Self::check(resp).await?;
        let embeddings = json["data"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .iter()
            .map(|item| serde_json::from_value(item["embedding"].clone()).unwrap_or_default())
            .collect();
        Ok(embeddings)
    }

    /// Embed the reference `(id, name)` entries once up front. Must be
    /// called before `similarity_search`.
    pub async fn index_reference(
        &mut self,
        entries: Vec<(String, String)>,
    ) -> Result<(), SemanticError> {
        let names: Vec<String> = entries.iter().map(|(_, name)| name.clone()).collect();
        let vectors = self.embed(&names).await?;
        if vectors.len() != entries.len() {
            return Err(SemanticError::Unavailable(format!(
                "embedding endpoint returned {} vectors for {} inputs",
                vectors.len(),
                entries.len()
            )));
        }
        self.reference = entries
            .into_iter()
            .zip(vectors)
            .map(|((id, name), v)| (id, name, v))
            .collect();
        debug!(n = self.reference.len(), "Reference embeddings indexed");
        Ok(())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    // Shift from [-1, 1] into [0, 1] so thresholds compose with the
    // rest of the confidence machinery.
    (((dot / (na * nb)) as f64 + 1.0) / 2.0).clamp(0.0, 1.0)
}

const ADJUDICATION_SYSTEM_PROMPT: &str = "You are a biomedical identifier curation assistant. \
Given a source biomarker and a candidate reference entry, decide whether they denote the same \
biological entity. Answer with a single JSON object: {\"match\": true|false, \"confidence\": 0.0-1.0}.";

/// Extract the `{match, confidence}` object from an LLM reply, tolerating
/// surrounding prose.
pub fn parse_adjudication(content: &str) -> Result<Adjudication, SemanticError> {
    let start = content.find('{');
    let end = content.rfind('}');
    let (Some(start), Some(end)) = (start, end) else {
        return Err(SemanticError::BadAdjudication(content.to_string()));
    };
    let json: serde_json::Value = serde_json::from_str(&content[start..=end])
        .map_err(|_| SemanticError::BadAdjudication(content.to_string()))?;
    let accept = json["match"]
        .as_bool()
        .ok_or_else(|| SemanticError::BadAdjudication(content.to_string()))?;
    let confidence = json["confidence"].as_f64().unwrap_or(0.0).clamp(0.0, 1.0);
    Ok(Adjudication { accept, confidence })
}

#[async_trait]
impl SemanticBackend for OpenAiCompatibleBackend {
    async fn similarity_search(
        &self,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<SemanticCandidate>, SemanticError> {
        if self.reference.is_empty() {
            return Err(SemanticError::Unavailable(
                "reference embeddings not indexed".to_string(),
            ));
        }
        let query = self.embed(&[text.to_string()]).await?;
        let query = query.first().cloned().unwrap_or_default();

        let mut scored: Vec<SemanticCandidate> = self
            .reference
            .iter()
            .map(|(id, name, v)| SemanticCandidate {
                target_id: id.clone(),
                target_name: name.clone(),
                similarity: cosine_similarity(&query, v),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn adjudicate(
        &self,
        entity: &Entity,
        candidate: &SemanticCandidate,
    ) -> Result<Adjudication, SemanticError> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let user = format!(
            "Source biomarker: \"{}\" (normalized: \"{}\", dataset: {}).\n\
             Candidate reference: \"{}\" ({}).",
            entity.raw_name,
            entity.normalized_name,
            entity.source_dataset,
            candidate.target_name,
            candidate.target_id,
        );
        let body = serde_json::json!({
            "model": &self.model,
            "messages": [
                {"role": "system", "content": ADJUDICATION_SYSTEM_PROMPT},
                {"role": "user", "content": user},
            ],
            "max_tokens": 128,
            "temperature": 0.0,
        });
        let resp = self.auth(self.client.post(&url)).json(&body).send().await?;
        let json = Self::check(resp).await?;
        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("");
        parse_adjudication(content)
    }
}

// ── Mock implementation for testing ──────────────────────────────────────────

/// Builder-style mock backend with canned similarity results and
/// adjudications, counting calls for budget assertions.
pub struct MockSemanticBackend {
    candidates: HashMap<String, Vec<SemanticCandidate>>,
    adjudications: HashMap<(String, String), Adjudication>,
    search_delay: Option<std::time::Duration>,
    search_calls: AtomicU64,
    adjudicate_calls: AtomicU64,
}

impl MockSemanticBackend {
    pub fn new() -> Self {
        Self {
            candidates: HashMap::new(),
            adjudications: HashMap::new(),
            search_delay: None,
            search_calls: AtomicU64::new(0),
            adjudicate_calls: AtomicU64::new(0),
        }
    }

    pub fn with_candidates(mut self, text: &str, candidates: Vec<SemanticCandidate>) -> Self {
        self.candidates.insert(text.to_string(), candidates);
        self
    }

    pub fn with_adjudication(
        mut self,
        entity_name: &str,
        target_id: &str,
        adjudication: Adjudication,
    ) -> Self {
        self.adjudications
            .insert((entity_name.to_string(), target_id.to_string()), adjudication);
        self
    }

    /// Every similarity search sleeps this long before answering.
    pub fn with_search_delay(mut self, delay: std::time::Duration) -> Self {
        self.search_delay = Some(delay);
        self
    }

    pub fn search_calls(&self) -> u64 {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn adjudicate_calls(&self) -> u64 {
        self.adjudicate_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockSemanticBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SemanticBackend for MockSemanticBackend {
    async fn similarity_search(
        &self,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<SemanticCandidate>, SemanticError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.search_delay {
            tokio::time::sleep(delay).await;
        }
        let mut out = self.candidates.get(text).cloned().unwrap_or_default();
        out.truncate(top_k);
        Ok(out)
    }

    async fn adjudicate(
        &self,
        entity: &Entity,
        candidate: &SemanticCandidate,
    ) -> Result<Adjudication, SemanticError> {
        self.adjudicate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .adjudications
            .get(&(entity.normalized_name.clone(), candidate.target_id.clone()))
            .copied()
            // Unconfigured pairs are rejected outright.
            .unwrap_or(Adjudication {
                accept: false,
                confidence: 0.0,
            }))
    }
}
