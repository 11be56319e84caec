use mediaforge_contracts::{AssetClass, FailureKind, ProviderFailure};
use thiserror::Error;

/// Terminal orchestration failures. Retry decisions never surface here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("no image provider available for {asset_class}: {detail}")]
    NoProviderAvailable {
        asset_class: AssetClass,
        detail: String,
    },
    #[error("{provider}: {}", .failure.message)]
    ProvidersExhausted {
        provider: String,
        failure: ProviderFailure,
    },
    #[error("generation cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            EngineError::InvalidRequest(_) => FailureKind::InvalidRequest,
            EngineError::NoProviderAvailable { .. } => FailureKind::NoProviderAvailable,
            EngineError::ProvidersExhausted { failure, .. } => failure.kind,
            EngineError::Cancelled => FailureKind::Cancelled,
        }
    }
}

/// Durable-storage failures. Always degraded, never an operation error.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("no durable storage configured")]
    NotConfigured,
    #[error("storage credentials missing: {0}")]
    MissingCredentials(String),
    #[error("storage api error ({status}): {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("storage http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
}
