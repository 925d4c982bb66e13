use std::io;
use std::path::PathBuf;

/// Failures while building the pool registry. Any of these stops startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read pool config from {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed JSON pool config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed YAML pool config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("pool {pool}: invalid domain {domain:?}: {reason}")]
    InvalidDomain {
        pool: String,
        domain: String,
        reason: String,
    },

    #[error("pool {pool}: invalid custom header {name:?}")]
    InvalidHeader { pool: String, name: String },

    #[error("pool {pool}: total weight overflows")]
    WeightOverflow { pool: String },
}

/// Per-request resolution failures. Recoverable at request scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("Pool not found")]
    PoolNotFound,

    #[error("No domains available for redirection")]
    NoDomainsAvailable,

    #[error("Invalid domain weight")]
    InvalidWeight,
}

impl ResolutionError {
    /// HTTP status the transport answers with
    pub fn status_code(&self) -> u16 {
        match self {
            ResolutionError::PoolNotFound | ResolutionError::NoDomainsAvailable => 404,
            ResolutionError::InvalidWeight => 500,
        }
    }
}
