use thiserror::Error;

#[derive(Debug, Error)]
pub enum BiomapperError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Whole-bridge outage. Carries the lookups already issued and the
    /// dollars already spent so the caller's cost ledger stays accurate.
    #[error("Bridge service unavailable: {message}")]
    BridgeUnavailable {
        message: String,
        api_calls: u64,
        cost_dollars: f64,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BiomapperError>;
