//! Bidirectional line transports: in-process, Unix domain socket, TCP, and
//! (on Windows) named pipes, behind a common [`Line`] capability trait.

pub mod inproc;
pub mod tcp;

#[cfg(unix)]
pub mod unix;

#[cfg(windows)]
pub mod pipe;

use std::time::Duration;

use crate::error::IoError;

/// Options settable on a [`Line`] via [`Line::set_option`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOption {
    ReceiveTimeout,
    SendTimeout,
}

/// A bidirectional byte stream. Short reads/writes are legal.
///
/// `read` returning `Ok(0)` means a timeout if a receive timeout is
/// configured, otherwise the error is [`IoError::ConnectionLost`] directly.
pub trait Line: Send + Sync {
    fn read(&self, buf: &mut [u8]) -> Result<usize, IoError>;
    fn write(&self, buf: &[u8]) -> Result<usize, IoError>;
    fn set_option(&self, option: LineOption, value: Duration) -> Result<(), IoError>;
}

/// Accepts incoming connections on a bound endpoint.
pub trait Acceptor: Send + Sync {
    /// Waits up to `timeout` for an incoming connection. Returns `Ok(None)`
    /// on a plain timeout, not an error, so callers can poll a shutdown flag
    /// between calls.
    fn wait_connection(&self, timeout: Duration) -> Result<Option<Box<dyn Line>>, IoError>;
}

/// Constructs [`Line`]/[`Acceptor`] instances for a URI scheme.
pub trait LineFactory: Send + Sync {
    fn supports_scheme(&self, scheme: &str) -> bool;
    fn create_client(&self, address: &str) -> Result<Box<dyn Line>, IoError>;
    fn create_server(&self, address: &str) -> Result<Box<dyn Acceptor>, IoError>;
}
