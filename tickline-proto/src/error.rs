use thiserror::Error;
use tickline_io::IoError;

/// Errors raised while framing or parsing messages on top of a [`tickline_io::Line`].
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Io(#[from] IoError),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
