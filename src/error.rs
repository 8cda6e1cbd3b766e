use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeshError {
    /// Construction-time misconfiguration, e.g. a missing room.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("signaling server unreachable: {0}")]
    SignalingUnreachable(String),

    #[error("signaling channel closed")]
    ChannelClosed,

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

pub type MeshResult<T> = std::result::Result<T, MeshError>;
