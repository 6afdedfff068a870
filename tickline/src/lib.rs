//! A market-data and order-routing gateway library.
//!
//! Re-exports the four core subsystems as a single facade:
//!
//! - [`tickline_io`]: the transport abstraction (ring buffer, blocking byte
//!   queue, `Line`/`Acceptor`, the URI-scheme factory registry).
//! - [`tickline_proto`]: the framed wire protocol, the `Tick` binary record,
//!   and the fixed-point `Decimal` type.
//! - [`tickline_quotesource`]: the QuoteSource server/client pair.
//! - [`tickline_broker`]: the BrokerServer/BrokerClient pair, the order
//!   state machine, and the broker adapter interface.
//!
//! [`logging`] provides the `tracing` setup shared by binaries embedding this
//! workspace.

pub mod logging;

pub use tickline_broker as broker;
pub use tickline_io as io;
pub use tickline_proto as proto;
pub use tickline_quotesource as quotesource;

pub use tickline_io::{FactoryRegistry, IoError, Line, LineOption};
pub use tickline_proto::{Decimal, Message, MessageProtocol, ProtocolError, Tick};
