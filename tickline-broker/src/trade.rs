//! The [`Trade`] record and its execution-time formatting.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tickline_proto::Decimal;

use crate::order::{Operation, SignalId};

pub const EXECUTION_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Formats a UTC timestamp as `YYYY-MM-DD hh:mm:ss.mmm`.
pub fn format_execution_time(time: DateTime<Utc>) -> String {
    time.format(EXECUTION_TIME_FORMAT).to_string()
}

/// Parses the `YYYY-MM-DD hh:mm:ss.mmm` execution-time format.
pub fn parse_execution_time(text: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text, EXECUTION_TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// An immutable fill record. `order_id` is the gateway local id when
/// generated by a broker adapter; the broker server rewrites it to the
/// originating order's `client_assigned_id` before sending it to the client.
#[derive(Debug, Clone)]
pub struct Trade {
    pub order_id: u64,
    pub price: Decimal,
    pub quantity: u32,
    pub volume: Decimal,
    pub volume_currency: String,
    pub operation: Operation,
    pub account: String,
    pub security: String,
    pub timestamp: u64,
    pub useconds: u32,
    pub signal_id: Option<SignalId>,
}

/// The `{trade: {...}}` notification sent on a fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeNotification {
    pub trade: TradeWire,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeWire {
    #[serde(rename = "order-id")]
    pub order_id: u64,
    pub price: f64,
    pub quantity: u32,
    pub volume: f64,
    #[serde(rename = "volume-currency")]
    pub volume_currency: String,
    pub operation: Operation,
    pub account: String,
    pub security: String,
    #[serde(rename = "execution-time")]
    pub execution_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(rename = "signal-id", skip_serializing_if = "Option::is_none")]
    pub signal_id: Option<String>,
    #[serde(rename = "order-comment", skip_serializing_if = "Option::is_none")]
    pub order_comment: Option<String>,
}

impl Trade {
    /// Reconstructs a [`Trade`] from a deserialized [`TradeWire`], decoding
    /// the execution-time string back into `timestamp`/`useconds`. `None`
    /// if the execution-time string does not match the expected format.
    pub fn from_wire(wire: &TradeWire) -> Option<Self> {
        let time = parse_execution_time(&wire.execution_time)?;
        let signal_id = if wire.strategy.is_some() || wire.signal_id.is_some() || wire.order_comment.is_some() {
            Some(SignalId::new(
                wire.strategy.clone().unwrap_or_default(),
                wire.signal_id.clone().unwrap_or_default(),
                wire.order_comment.clone().unwrap_or_default(),
            ))
        } else {
            None
        };
        Some(Self {
            order_id: wire.order_id,
            price: Decimal::from_f64(wire.price),
            quantity: wire.quantity,
            volume: Decimal::from_f64(wire.volume),
            volume_currency: wire.volume_currency.clone(),
            operation: wire.operation,
            account: wire.account.clone(),
            security: wire.security.clone(),
            timestamp: time.timestamp().max(0) as u64,
            useconds: time.timestamp_subsec_millis() * 1_000,
            signal_id,
        })
    }

    pub fn to_wire(&self) -> TradeWire {
        let time = DateTime::<Utc>::from_timestamp(self.timestamp as i64, self.useconds * 1_000)
            .unwrap_or_else(Utc::now);
        let (strategy, signal_id, order_comment) = match &self.signal_id {
            Some(s) => (
                Some(s.strategy_id.clone()),
                Some(s.signal_id.clone()),
                Some(s.comment.clone()),
            ),
            None => (None, None, None),
        };
        TradeWire {
            order_id: self.order_id,
            price: self.price.to_f64(),
            quantity: self.quantity,
            volume: self.volume.to_f64(),
            volume_currency: self.volume_currency.clone(),
            operation: self.operation,
            account: self.account.clone(),
            security: self.security.clone(),
            execution_time: format_execution_time(time),
            strategy,
            signal_id,
            order_comment,
        }
    }

    pub fn to_notification(&self) -> TradeNotification {
        TradeNotification {
            trade: self.to_wire(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_time_round_trips() {
        let time = Utc::now().date_naive().and_hms_milli_opt(9, 30, 0, 250).unwrap().and_utc();
        let formatted = format_execution_time(time);
        assert!(formatted.contains('.'));
        let parsed = parse_execution_time(&formatted).unwrap();
        assert_eq!(parsed.timestamp_millis(), time.timestamp_millis());
    }

    #[test]
    fn wire_round_trip_preserves_execution_time_to_millisecond() {
        let trade = Trade {
            order_id: 7,
            price: Decimal::new(19, 73_000_000),
            quantity: 2,
            volume: Decimal::new(39, 46_000_000),
            volume_currency: "BRL".into(),
            operation: Operation::Buy,
            account: "A".into(),
            security: "S".into(),
            timestamp: 1_700_000_000,
            useconds: 250_000,
            signal_id: None,
        };
        let wire = trade.to_wire();
        let back = Trade::from_wire(&wire).unwrap();
        assert_eq!(back.order_id, trade.order_id);
        assert_eq!(back.timestamp, trade.timestamp);
        assert_eq!(back.useconds, trade.useconds);
    }

    #[test]
    fn signal_id_serializes_under_the_nested_trade_object() {
        let trade = Trade {
            order_id: 1,
            price: Decimal::new(19, 73_000_000),
            quantity: 2,
            volume: Decimal::new(39, 46_000_000),
            volume_currency: "RUB".into(),
            operation: Operation::Buy,
            account: "TEST_ACCOUNT".into(),
            security: "FOOBAR".into(),
            timestamp: 0,
            useconds: 0,
            signal_id: Some(SignalId::new(
                "FOO_STRATEGY".into(),
                "FOO_SIGNAL".into(),
                "BLAHBLAH".into(),
            )),
        };

        let json = serde_json::to_value(trade.to_notification()).unwrap();
        assert!(!json["trade"].is_null());
        assert_eq!(json["trade"]["strategy"], "FOO_STRATEGY");
        assert_eq!(json["trade"]["signal-id"], "FOO_SIGNAL");
        assert_eq!(json["trade"]["order-comment"], "BLAHBLAH");

        let notification: TradeNotification = serde_json::from_value(json).unwrap();
        let back = Trade::from_wire(&notification.trade).unwrap();
        assert_eq!(back.signal_id.unwrap().comment, "BLAHBLAH");
    }
}
