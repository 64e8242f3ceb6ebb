use thiserror::Error;

use procura_channel::ChannelError;
use procura_core::errors::{ApplicationError, DomainError};
use procura_db::repositories::RepositoryError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AssistantError {
    #[error("assistant transport failure: {0}")]
    Transport(String),
    #[error("assistant api returned status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("assistant result could not be decoded: {0}")]
    Decode(String),
    #[error("message template failure: {0}")]
    Template(String),
    #[error("assistant configuration error: {0}")]
    Configuration(String),
}

impl AssistantError {
    /// Transport failures, throttling and server-side errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) | Self::Template(_) | Self::Configuration(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("quote store failure: {0}")]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{stage} failed: {source}")]
    Assistant { stage: &'static str, source: AssistantError },
    #[error("compose message for {counterparty}: {source}")]
    Compose { counterparty: String, source: AssistantError },
    #[error("send to {counterparty}: {source}")]
    Send { counterparty: String, source: ChannelError },
    #[error("quote request {0} not found")]
    RequestNotFound(String),
}

impl EngineError {
    pub fn assistant(stage: &'static str, source: AssistantError) -> Self {
        Self::Assistant { stage, source }
    }
}

impl From<EngineError> for ApplicationError {
    fn from(value: EngineError) -> Self {
        match value {
            EngineError::Domain(error) => Self::Domain(error),
            EngineError::Repository(RepositoryError::Domain(error)) => Self::Domain(error),
            EngineError::Repository(RepositoryError::NotFound(message)) => Self::NotFound(message),
            EngineError::RequestNotFound(id) => Self::NotFound(format!("quote request {id}")),
            EngineError::Repository(error) => Self::Persistence(error.to_string()),
            error @ (EngineError::Assistant { .. }
            | EngineError::Compose { .. }
            | EngineError::Send { .. }) => Self::Integration(error.to_string()),
        }
    }
}
