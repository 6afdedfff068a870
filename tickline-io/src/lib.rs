//! Transport abstraction shared by the quote source and broker subsystems:
//! a blocking ring-buffer queue, a [`line::Line`]/[`line::Acceptor`]
//! capability pair implemented over in-process, Unix domain socket, TCP, and
//! (on Windows) named pipe transports, and a [`registry::FactoryRegistry`]
//! that dispatches on a connection address' URI scheme.

pub mod addr;
pub mod error;
pub mod line;
pub mod queue;
pub mod registry;
pub mod ring;

pub use error::IoError;
pub use line::{Acceptor, Line, LineFactory, LineOption};
pub use queue::ByteQueue;
pub use registry::FactoryRegistry;
pub use ring::RingBuffer;
