use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel is closed")]
    Closed,
    #[error("channel is not paired with the gateway")]
    NotPaired,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("gateway returned status {status}: {body}")]
    Gateway { status: u16, body: String },
    #[error("channel configuration error: {0}")]
    Configuration(String),
}
