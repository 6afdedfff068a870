//! The external broker adapter and session-reactor capability traits.

use crate::order::Order;
use crate::trade::Trade;

/// A collaborator that actually routes orders to a venue. The broker server
/// holds a shared, read-mostly list of these; each adapter calls back into
/// the server (via its registered [`Reactor`]s) from its own thread.
pub trait Broker: Send + Sync {
    fn submit_order(&self, order: &Order);
    fn cancel_order(&self, order: &Order);
    fn register_reactor(&self, reactor: std::sync::Arc<dyn Reactor>);
    fn unregister_reactor(&self, reactor: &std::sync::Arc<dyn Reactor>);
    fn order(&self, local_id: u64) -> Option<Order>;
    fn accounts(&self) -> Vec<String>;
    fn has_account(&self, name: &str) -> bool;
    fn positions(&self) -> Vec<(String, i64)>;
}

/// Callbacks invoked by a [`Broker`] adapter as order/trade events occur.
pub trait Reactor: Send + Sync {
    fn on_order(&self, order: &Order);
    fn on_trade(&self, trade: &Trade);
}
