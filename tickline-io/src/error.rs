use thiserror::Error;

/// Semantic error kinds shared by every [`crate::line::Line`] and
/// [`crate::queue::ByteQueue`] implementation.
#[derive(Debug, Error)]
pub enum IoError {
    /// A bounded blocking operation elapsed without completing.
    #[error("operation timed out")]
    Timeout,

    /// The peer closed the connection, or the in-proc endpoint backing it
    /// was torn down.
    #[error("connection lost")]
    ConnectionLost,

    /// `set_option` was called with an option the transport cannot honor.
    #[error("unsupported option: {0}")]
    UnsupportedOption(&'static str),

    /// A single write exceeded the queue's total capacity.
    #[error("write of {0} bytes exceeds queue capacity")]
    WriteTooLarge(usize),

    /// The underlying OS transport reported an error.
    #[error(transparent)]
    Os(#[from] std::io::Error),
}
