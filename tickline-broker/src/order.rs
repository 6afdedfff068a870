//! The [`Order`] record and its state machine.

use std::sync::atomic::{AtomicU64, Ordering};

use derive_more::Constructor;
use serde::{Deserialize, Serialize};
use tickline_proto::Decimal;

/// Mints process-lifetime-unique, monotonically increasing, non-zero
/// `local_id`s.
static NEXT_LOCAL_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_local_id() -> u64 {
    NEXT_LOCAL_ID.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderState {
    Unsubmitted,
    Submitted,
    PartiallyExecuted,
    Executed,
    Cancelled,
    Rejected,
    Error,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Executed | Self::Cancelled | Self::Rejected | Self::Error
        )
    }
}

/// `(strategy_id, signal_id, comment)` triple carried through from a
/// client's order submission to its trades.
#[derive(Debug, Clone, PartialEq, Eq, Constructor, Serialize, Deserialize)]
pub struct SignalId {
    pub strategy_id: String,
    pub signal_id: String,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone)]
pub struct Order {
    pub local_id: u64,
    pub client_assigned_id: u64,
    pub account: String,
    pub security: String,
    pub price: Option<Decimal>,
    pub quantity: u32,
    pub executed_quantity: u32,
    pub operation: Operation,
    pub order_type: OrderType,
    pub state: OrderState,
    pub message: String,
    pub signal_id: Option<SignalId>,
}

impl Order {
    pub fn new(
        client_assigned_id: u64,
        account: String,
        security: String,
        price: Option<Decimal>,
        quantity: u32,
        operation: Operation,
        order_type: OrderType,
        signal_id: Option<SignalId>,
    ) -> Self {
        Self {
            local_id: next_local_id(),
            client_assigned_id,
            account,
            security,
            price,
            quantity,
            executed_quantity: 0,
            operation,
            order_type,
            state: OrderState::Unsubmitted,
            message: String::new(),
            signal_id,
        }
    }

    /// Moves the order to `Submitted`. A no-op on a terminal order.
    pub fn submit(&mut self) {
        if !self.state.is_terminal() {
            self.state = OrderState::Submitted;
        }
    }

    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = OrderState::Cancelled;
        }
    }

    pub fn reject(&mut self, reason: impl Into<String>) {
        if !self.state.is_terminal() {
            self.state = OrderState::Rejected;
            self.message = reason.into();
        }
    }

    pub fn adapter_error(&mut self, reason: impl Into<String>) {
        if !self.state.is_terminal() {
            self.state = OrderState::Error;
            self.message = reason.into();
        }
    }

    /// Applies a fill of `quantity`: once terminal the state never changes,
    /// `executed_quantity` only grows, and an over-fill forces `Error`.
    pub fn fill(&mut self, quantity: u32) {
        if self.state.is_terminal() {
            return;
        }
        self.executed_quantity += quantity;
        self.state = if self.executed_quantity > self.quantity {
            OrderState::Error
        } else if self.executed_quantity == self.quantity {
            OrderState::Executed
        } else {
            OrderState::PartiallyExecuted
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_order() -> Order {
        Order::new(
            1,
            "A".into(),
            "S".into(),
            Some(Decimal::new(19, 73_000_000)),
            2,
            Operation::Buy,
            OrderType::Limit,
            None,
        )
    }

    #[test]
    fn fill_to_exact_quantity_executes() {
        let mut order = new_order();
        order.submit();
        order.fill(1);
        assert_eq!(order.state, OrderState::PartiallyExecuted);
        order.fill(1);
        assert_eq!(order.state, OrderState::Executed);
        assert_eq!(order.executed_quantity, 2);
    }

    #[test]
    fn overfill_forces_error() {
        let mut order = new_order();
        order.submit();
        order.fill(3);
        assert_eq!(order.state, OrderState::Error);
    }

    #[test]
    fn terminal_state_never_changes() {
        let mut order = new_order();
        order.submit();
        order.cancel();
        assert_eq!(order.state, OrderState::Cancelled);
        order.fill(1);
        assert_eq!(order.state, OrderState::Cancelled);
        assert_eq!(order.executed_quantity, 0);
    }

    #[test]
    fn local_ids_are_monotonically_increasing_and_nonzero() {
        let a = next_local_id();
        let b = next_local_id();
        assert!(a > 0);
        assert!(b > a);
    }
}
