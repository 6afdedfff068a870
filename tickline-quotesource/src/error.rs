use thiserror::Error;
use tickline_proto::ProtocolError;

#[derive(Debug, Error)]
pub enum QuoteSourceError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("parameter error: {0}")]
    Parameter(String),
}
