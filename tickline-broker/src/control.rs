//! Control-channel JSON request/response schemas.

use serde::{Deserialize, Serialize};

use crate::order::{Operation, OrderType, SignalId};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum ControlRequest {
    GetIdentity,
    Order {
        id: u64,
        account: String,
        security: String,
        #[serde(rename = "type")]
        order_type: OrderType,
        operation: Operation,
        quantity: u32,
        #[serde(default)]
        price: Option<f64>,
        #[serde(default)]
        strategy: Option<String>,
        #[serde(default, rename = "signal-id")]
        signal_id: Option<String>,
        #[serde(default)]
        comment: Option<String>,
    },
    CancelOrder {
        id: u64,
        account: String,
    },
}

/// Assembles the `(strategy_id, signal_id, comment)` triple an `order`
/// request carries, if any of its three fields were given.
pub fn signal_id_from_parts(
    strategy: Option<String>,
    signal_id: Option<String>,
    comment: Option<String>,
) -> Option<SignalId> {
    if strategy.is_none() && signal_id.is_none() && comment.is_none() {
        return None;
    }
    Some(SignalId::new(
        strategy.unwrap_or_default(),
        signal_id.unwrap_or_default(),
        comment.unwrap_or_default(),
    ))
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentityResponse {
    pub identity: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultResponse {
    pub result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ResultResponse {
    pub fn success() -> Self {
        Self {
            result: "success",
            reason: None,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            result: "error",
            reason: Some(reason.into()),
        }
    }
}

/// The `{order: {id, new-state, message?}}` notification sent on an order
/// state change.
#[derive(Debug, Clone, Serialize)]
pub struct OrderUpdate {
    pub order: OrderUpdateBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderUpdateBody {
    pub id: u64,
    #[serde(rename = "new-state")]
    pub new_state: crate::order::OrderState,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}
