//! Wire protocol shared by the quote source and broker services: framed
//! messages over a [`tickline_io::Line`], the fixed-point [`Decimal`] type,
//! and the [`Tick`] binary record.

pub mod error;
pub mod frame;
pub mod message;
pub mod tick;

pub use error::ProtocolError;
pub use frame::{Frame, Message, MessageType};
pub use message::MessageProtocol;
pub use tick::{Decimal, Tick, DATATYPE_PRICE, FRACTIONAL_BASE, PACKET_TYPE_TICK, TICK_WIRE_SIZE};
