//! The BrokerClient: a reconnecting event thread that requests an identity
//! on first connect, submits/cancels orders with a retrying backoff, and
//! dispatches inbound order/trade notifications to registered reactors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tickline_io::{FactoryRegistry, IoError, Line, LineOption};
use tickline_proto::{Message, MessageProtocol, MessageType, ProtocolError};
use tracing::debug;

use crate::adapter::Reactor;
use crate::order::{Operation, Order, OrderState, OrderType};
use crate::trade::{Trade, TradeNotification};

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_SUBMIT_BACKOFF: Duration = Duration::from_millis(100);

/// Tunables for a [`BrokerClient`], defaulting to a 5s reconnect sleep, a
/// ~2s receive timeout, and a 100ms retry backoff for `submit_order`/
/// `cancel_order` while disconnected.
#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    pub reconnect_delay: Duration,
    pub receive_timeout: Duration,
    pub submit_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            submit_backoff: DEFAULT_SUBMIT_BACKOFF,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct IdentityResponse {
    identity: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OrderUpdate {
    order: OrderUpdateBody,
}

#[derive(Debug, Clone, Deserialize)]
struct OrderUpdateBody {
    id: u64,
    #[serde(rename = "new-state")]
    new_state: OrderState,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
struct OrderRequest<'a> {
    command: &'static str,
    id: u64,
    account: &'a str,
    security: &'a str,
    #[serde(rename = "type")]
    order_type: OrderType,
    operation: Operation,
    quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    strategy: Option<&'a str>,
    #[serde(rename = "signal-id", skip_serializing_if = "Option::is_none")]
    signal_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct CancelRequest<'a> {
    command: &'static str,
    id: u64,
    account: &'a str,
}

struct Shared {
    address: String,
    registry: FactoryRegistry,
    identity: Mutex<Option<String>>,
    current_line: Mutex<Option<Arc<dyn Line>>>,
    orders: Mutex<Vec<Order>>,
    reactors: Mutex<Vec<Arc<dyn Reactor>>>,
    run: AtomicBool,
    config: ClientConfig,
}

/// Mirrors the server: one reconnecting event thread that owns the line,
/// requests identity on first connect, then loops reading. Outbound
/// `submit_order`/`cancel_order` spin with a 100ms backoff until the
/// underlying protocol write succeeds, covering broker-server restarts.
pub struct BrokerClient {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BrokerClient {
    pub fn new(address: impl Into<String>, registry: FactoryRegistry) -> Self {
        Self::with_config(address, registry, ClientConfig::default())
    }

    /// As [`BrokerClient::new`], with explicit [`ClientConfig`] tunables
    /// instead of the defaults.
    pub fn with_config(
        address: impl Into<String>,
        registry: FactoryRegistry,
        config: ClientConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                address: address.into(),
                registry,
                identity: Mutex::new(None),
                current_line: Mutex::new(None),
                orders: Mutex::new(Vec::new()),
                reactors: Mutex::new(Vec::new()),
                run: AtomicBool::new(false),
                config,
            }),
            handle: Mutex::new(None),
        }
    }

    pub fn register_reactor(&self, reactor: Arc<dyn Reactor>) {
        self.shared.reactors.lock().push(reactor);
    }

    pub fn identity(&self) -> Option<String> {
        self.shared.identity.lock().clone()
    }

    pub fn start(&self) {
        self.shared.run.store(true, Ordering::SeqCst);
        let worker_shared = self.shared.clone();
        let handle = thread::spawn(move || run_loop(worker_shared));
        *self.handle.lock() = Some(handle);
    }

    pub fn stop(&self) {
        self.shared.run.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// Records `order` locally (keyed by `client_assigned_id` for pairing
    /// with later server responses) and sends the `order` control request,
    /// spinning on a 100ms backoff until the write succeeds.
    pub fn submit_order(&self, order: Order) {
        self.shared.orders.lock().push(order.clone());

        let request = OrderRequest {
            command: "order",
            id: order.client_assigned_id,
            account: &order.account,
            security: &order.security,
            order_type: order.order_type,
            operation: order.operation,
            quantity: order.quantity,
            price: order.price.map(|p| p.to_f64()),
            strategy: order.signal_id.as_ref().map(|s| s.strategy_id.as_str()),
            signal_id: order.signal_id.as_ref().map(|s| s.signal_id.as_str()),
            comment: order.signal_id.as_ref().map(|s| s.comment.as_str()),
        };
        let body = serde_json::to_string(&request).expect("fixed struct serializes");
        self.send_with_backoff(&Message::control(&body));
    }

    pub fn cancel_order(&self, client_assigned_id: u64, account: &str) {
        let request = CancelRequest {
            command: "cancel-order",
            id: client_assigned_id,
            account,
        };
        let body = serde_json::to_string(&request).expect("fixed struct serializes");
        self.send_with_backoff(&Message::control(&body));
    }

    fn send_with_backoff(&self, msg: &Message) {
        loop {
            if !self.shared.run.load(Ordering::SeqCst) {
                return;
            }
            if let Some(line) = self.shared.current_line.lock().clone() {
                if MessageProtocol::send(line.as_ref(), msg).is_ok() {
                    return;
                }
            }
            thread::sleep(self.shared.config.submit_backoff);
        }
    }
}

fn run_loop(shared: Arc<Shared>) {
    while shared.run.load(Ordering::SeqCst) {
        match connect_and_serve(&shared) {
            Ok(()) => {}
            Err(e) => debug!(error = %e, "broker client session ended"),
        }
        *shared.current_line.lock() = None;
        if !shared.run.load(Ordering::SeqCst) {
            return;
        }
        thread::sleep(shared.config.reconnect_delay);
    }
}

fn connect_and_serve(shared: &Arc<Shared>) -> Result<(), ProtocolError> {
    let line: Arc<dyn Line> = Arc::from(
        shared
            .registry
            .create_client(&shared.address)
            .map_err(ProtocolError::Io)?
            .ok_or_else(|| {
                ProtocolError::MalformedFrame(format!(
                    "no transport registered for {}",
                    shared.address
                ))
            })?,
    );
    line.set_option(LineOption::ReceiveTimeout, shared.config.receive_timeout)
        .ok();
    *shared.current_line.lock() = Some(line.clone());

    if shared.identity.lock().is_none() {
        request_identity(shared, line.as_ref())?;
    }

    while shared.run.load(Ordering::SeqCst) {
        match MessageProtocol::read(line.as_ref()) {
            Ok(msg) => dispatch(shared, &msg),
            Err(ProtocolError::Io(IoError::Timeout)) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn request_identity(shared: &Arc<Shared>, line: &dyn Line) -> Result<(), ProtocolError> {
    MessageProtocol::send(line, &Message::control(r#"{"command":"get-identity"}"#))?;
    let response = MessageProtocol::read(line)?;
    let Some(frame) = response.frame(1) else {
        return Ok(());
    };
    if let Ok(json) = std::str::from_utf8(frame.as_bytes()) {
        if let Ok(identity) = serde_json::from_str::<IdentityResponse>(json) {
            *shared.identity.lock() = Some(identity.identity);
        }
    }
    Ok(())
}

fn dispatch(shared: &Arc<Shared>, msg: &Message) {
    if msg.message_type() != Some(MessageType::Control) {
        return;
    }
    let Some(frame) = msg.frame(1) else { return };
    let Ok(json) = std::str::from_utf8(frame.as_bytes()) else {
        return;
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(json) else {
        return;
    };

    if value.get("order").is_some() {
        if let Ok(update) = serde_json::from_value::<OrderUpdate>(value) {
            apply_order_update(shared, update.order);
        }
    } else if value.get("trade").is_some() {
        if let Ok(notification) = serde_json::from_value::<TradeNotification>(value) {
            if let Some(trade) = Trade::from_wire(&notification.trade) {
                for reactor in shared.reactors.lock().iter() {
                    reactor.on_trade(&trade);
                }
            }
        }
    }
}

fn apply_order_update(shared: &Arc<Shared>, body: OrderUpdateBody) {
    let snapshot = {
        let mut orders = shared.orders.lock();
        let Some(order) = orders
            .iter_mut()
            .find(|o| o.client_assigned_id == body.id)
        else {
            return;
        };
        order.state = body.new_state;
        order.message = body.message;
        order.clone()
    };
    for reactor in shared.reactors.lock().iter() {
        reactor.on_order(&snapshot);
    }
}
