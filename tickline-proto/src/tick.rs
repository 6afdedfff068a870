//! The fixed-point [`Decimal`] type and the wire-stable [`Tick`] record.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::ProtocolError;

/// Eight decimal places, matching the `decimal_fixed` convention ticks are
/// encoded with on the wire.
pub const FRACTIONAL_BASE: i64 = 100_000_000;

/// A fixed-point decimal stored as two independent wire fields. Not
/// `rust_decimal::Decimal`: that type's internal scaled-int128 layout is not
/// wire-stable in the `(i64, i32)` shape the external tick format requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Decimal {
    pub integer: i64,
    pub fractional: i32,
}

impl Decimal {
    pub fn new(integer: i64, fractional: i32) -> Self {
        Self { integer, fractional }
    }

    pub fn to_f64(self) -> f64 {
        self.integer as f64 + (self.fractional as f64 / FRACTIONAL_BASE as f64)
    }

    pub fn from_f64(value: f64) -> Self {
        let integer = value.trunc() as i64;
        let fractional = ((value - value.trunc()) * FRACTIONAL_BASE as f64).round() as i32;
        Self { integer, fractional }
    }
}

/// `packet_type` tag for a tick record.
pub const PACKET_TYPE_TICK: u8 = 1;
/// `datatype` tag for a price tick; other values are reserved and round-trip
/// opaquely.
pub const DATATYPE_PRICE: u8 = 1;

/// Fixed 32-byte wire record: `timestamp: u64, useconds: u32,
/// packet_type: u8, datatype: u8, _pad: u16, value_integer: i64,
/// value_fractional: i32, volume: i32`. Field order and widths are part of
/// the external interface and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub timestamp: u64,
    pub useconds: u32,
    pub packet_type: u8,
    pub datatype: u8,
    pub value: Decimal,
    pub volume: i32,
}

/// Size in bytes of the wire encoding of [`Tick`].
pub const TICK_WIRE_SIZE: usize = 32;

impl Tick {
    pub fn price(timestamp: u64, useconds: u32, value: Decimal, volume: i32) -> Self {
        Self {
            timestamp,
            useconds,
            packet_type: PACKET_TYPE_TICK,
            datatype: DATATYPE_PRICE,
            value,
            volume,
        }
    }

    pub fn encode(&self) -> [u8; TICK_WIRE_SIZE] {
        let mut buf = [0u8; TICK_WIRE_SIZE];
        {
            let mut w = &mut buf[..];
            w.write_u64::<LittleEndian>(self.timestamp).unwrap();
            w.write_u32::<LittleEndian>(self.useconds).unwrap();
            w.write_u8(self.packet_type).unwrap();
            w.write_u8(self.datatype).unwrap();
            w.write_u16::<LittleEndian>(0).unwrap(); // _pad
            w.write_i64::<LittleEndian>(self.value.integer).unwrap();
            w.write_i32::<LittleEndian>(self.value.fractional).unwrap();
            w.write_i32::<LittleEndian>(self.volume).unwrap();
        }
        buf
    }

    /// Decodes a tick from exactly [`TICK_WIRE_SIZE`] bytes. A receiver with
    /// a mismatched size must reject the frame rather than attempt a partial
    /// decode.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != TICK_WIRE_SIZE {
            return Err(ProtocolError::MalformedFrame(format!(
                "tick frame is {} bytes, expected {TICK_WIRE_SIZE}",
                bytes.len()
            )));
        }
        let mut r = bytes;
        let timestamp = r.read_u64::<LittleEndian>().unwrap();
        let useconds = r.read_u32::<LittleEndian>().unwrap();
        let packet_type = r.read_u8().unwrap();
        let datatype = r.read_u8().unwrap();
        let _pad = r.read_u16::<LittleEndian>().unwrap();
        let integer = r.read_i64::<LittleEndian>().unwrap();
        let fractional = r.read_i32::<LittleEndian>().unwrap();
        let volume = r.read_i32::<LittleEndian>().unwrap();
        Ok(Self {
            timestamp,
            useconds,
            packet_type,
            datatype,
            value: Decimal::new(integer, fractional),
            volume,
        })
    }
}
