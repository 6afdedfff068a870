use thiserror::Error;
use tickline_proto::ProtocolError;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("parameter error: {0}")]
    Parameter(String),

    #[error("unknown account: {0}")]
    UnknownAccount(String),
}
