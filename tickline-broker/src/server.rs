//! The BrokerServer: one acceptor thread spawning a session thread per
//! accepted line, broker-adapter registration, and the adapter-callback
//! reactor that routes order/trade events back to the owning session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tickline_io::line::Acceptor;
use tickline_io::{FactoryRegistry, Line, LineOption};
use tickline_proto::{Message, MessageProtocol, MessageType};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{Broker, Reactor};
use crate::control::{signal_id_from_parts, ControlRequest, IdentityResponse, OrderUpdate, OrderUpdateBody, ResultResponse};
use crate::error::BrokerError;
use crate::order::Order;
use crate::sink::TradeSinkPump;
use crate::trade::Trade;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Tunables for a [`BrokerServer`], defaulting to a 200ms acceptor/session
/// poll interval.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

struct Session {
    line: Arc<dyn Line>,
    write_lock: Mutex<()>,
    identity: Mutex<Option<String>>,
    active_orders: Mutex<HashMap<u64, Order>>,
    client_id_index: Mutex<HashMap<u64, u64>>,
    retired_orders: Mutex<Vec<Order>>,
    done: AtomicBool,
    poll_interval: Duration,
}

impl Session {
    fn new(line: Box<dyn Line>, config: &Config) -> Arc<Self> {
        Arc::new(Self {
            line: Arc::from(line),
            write_lock: Mutex::new(()),
            identity: Mutex::new(None),
            active_orders: Mutex::new(HashMap::new()),
            client_id_index: Mutex::new(HashMap::new()),
            retired_orders: Mutex::new(Vec::new()),
            done: AtomicBool::new(false),
            poll_interval: config.poll_interval,
        })
    }

    fn send(&self, msg: &Message) -> Result<(), BrokerError> {
        let _guard = self.write_lock.lock();
        MessageProtocol::send(self.line.as_ref(), msg).map_err(Into::into)
    }

    fn has_identity(&self) -> bool {
        self.identity.lock().is_some()
    }

    fn assign_identity(&self) -> String {
        let mut guard = self.identity.lock();
        if let Some(id) = guard.as_ref() {
            return id.clone();
        }
        let id = Uuid::new_v4().to_string();
        *guard = Some(id.clone());
        id
    }

    fn register_order(&self, order: Order) -> Result<(), BrokerError> {
        let mut index = self.client_id_index.lock();
        if index.contains_key(&order.client_assigned_id) {
            return Err(BrokerError::Parameter(format!(
                "duplicate client_assigned_id {}",
                order.client_assigned_id
            )));
        }
        index.insert(order.client_assigned_id, order.local_id);
        self.active_orders.lock().insert(order.local_id, order);
        Ok(())
    }

    fn order_by_client_id(&self, client_assigned_id: u64) -> Option<Order> {
        let local_id = *self.client_id_index.lock().get(&client_assigned_id)?;
        self.active_orders.lock().get(&local_id).cloned()
    }

    fn order_snapshot(&self, local_id: u64) -> Option<Order> {
        self.active_orders.lock().get(&local_id).cloned()
    }

    fn retire_if_terminal(&self, local_id: u64) {
        let mut active = self.active_orders.lock();
        let terminal = active.get(&local_id).is_some_and(|o| o.state.is_terminal());
        if terminal {
            if let Some(order) = active.remove(&local_id) {
                self.client_id_index.lock().remove(&order.client_assigned_id);
                self.retired_orders.lock().push(order);
            }
        }
    }

    /// Applies a trade fill to the order it references, returning the
    /// updated order snapshot, or `None` if this session does not own it.
    fn apply_fill(&self, local_id: u64, quantity: u32) -> Option<Order> {
        let snapshot = {
            let mut active = self.active_orders.lock();
            let order = active.get_mut(&local_id)?;
            order.fill(quantity);
            order.clone()
        };
        self.retire_if_terminal(local_id);
        Some(snapshot)
    }

    fn apply_state_update(&self, local_id: u64, new_state: crate::order::OrderState, message: String) -> Option<Order> {
        let snapshot = {
            let mut active = self.active_orders.lock();
            let order = active.get_mut(&local_id)?;
            order.state = new_state;
            order.message = message;
            order.clone()
        };
        self.retire_if_terminal(local_id);
        Some(snapshot)
    }
}

/// Routes adapter callbacks (`on_order`/`on_trade`) back to the owning
/// session, keyed by `local_id`.
struct ServerReactor {
    order_index: Mutex<HashMap<u64, Arc<Session>>>,
    trade_sink: Arc<TradeSinkPump>,
}

impl ServerReactor {
    fn index_order(&self, local_id: u64, session: Arc<Session>) {
        self.order_index.lock().insert(local_id, session);
    }

    fn session_for(&self, local_id: u64) -> Option<Arc<Session>> {
        self.order_index.lock().get(&local_id).cloned()
    }

    fn deindex(&self, local_id: u64) {
        self.order_index.lock().remove(&local_id);
    }
}

impl Reactor for ServerReactor {
    fn on_order(&self, order: &Order) {
        let Some(session) = self.session_for(order.local_id) else {
            return;
        };
        let Some(updated) =
            session.apply_state_update(order.local_id, order.state, order.message.clone())
        else {
            return;
        };
        let update = OrderUpdate {
            order: OrderUpdateBody {
                id: updated.client_assigned_id,
                new_state: updated.state,
                message: updated.message.clone(),
            },
        };
        let json = serde_json::to_string(&update).expect("fixed struct serializes");
        if session.send(&Message::control(&json)).is_err() {
            session.done.store(true, Ordering::SeqCst);
        }
        if updated.state.is_terminal() {
            self.deindex(order.local_id);
        }
    }

    fn on_trade(&self, trade: &Trade) {
        let Some(session) = self.session_for(trade.order_id) else {
            return;
        };
        let Some(order) = session.order_snapshot(trade.order_id) else {
            return;
        };

        let mut client_trade = trade.clone();
        client_trade.order_id = order.client_assigned_id;
        client_trade.signal_id = order.signal_id.clone();

        let updated = session.apply_fill(trade.order_id, trade.quantity);

        let trade_json =
            serde_json::to_string(&client_trade.to_notification()).expect("fixed struct serializes");
        let _ = session.send(&Message::control(&trade_json));

        if let Some(updated) = updated {
            let update = OrderUpdate {
                order: OrderUpdateBody {
                    id: updated.client_assigned_id,
                    new_state: updated.state,
                    message: updated.message.clone(),
                },
            };
            let json = serde_json::to_string(&update).expect("fixed struct serializes");
            if session.send(&Message::control(&json)).is_err() {
                session.done.store(true, Ordering::SeqCst);
            }
            if updated.state.is_terminal() {
                self.deindex(trade.order_id);
            }
        }

        // The trade-sink queue carries the original, server-side
        // identifiers, not the client-rewritten copy above.
        self.trade_sink.enqueue(trade.clone());
    }
}

/// Owns an acceptor, the live session list, and the registered broker
/// adapters.
pub struct BrokerServer {
    acceptor: Box<dyn Acceptor>,
    sessions: Mutex<Vec<Arc<Session>>>,
    adapters: Mutex<Vec<Arc<dyn Broker>>>,
    reactor: Arc<ServerReactor>,
    trade_sink: Arc<TradeSinkPump>,
    shutdown: Arc<AtomicBool>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
    config: Config,
}

impl BrokerServer {
    pub fn bind(
        address: &str,
        registry: &FactoryRegistry,
        sink_address: Option<String>,
        sink_registry: FactoryRegistry,
    ) -> Result<Self, BrokerError> {
        Self::bind_with_config(
            address,
            registry,
            sink_address,
            sink_registry,
            Config::default(),
        )
    }

    /// As [`BrokerServer::bind`], with explicit [`Config`] tunables instead
    /// of the default poll interval.
    pub fn bind_with_config(
        address: &str,
        registry: &FactoryRegistry,
        sink_address: Option<String>,
        sink_registry: FactoryRegistry,
        config: Config,
    ) -> Result<Self, BrokerError> {
        let acceptor = registry
            .create_server(address)
            .map_err(|e| BrokerError::Parameter(e.to_string()))?
            .ok_or_else(|| BrokerError::Parameter(format!("unrecognized scheme in {address}")))?;

        let trade_sink = TradeSinkPump::new(sink_address, sink_registry);
        let reactor = Arc::new(ServerReactor {
            order_index: Mutex::new(HashMap::new()),
            trade_sink: trade_sink.clone(),
        });

        Ok(Self {
            acceptor,
            sessions: Mutex::new(Vec::new()),
            adapters: Mutex::new(Vec::new()),
            reactor,
            trade_sink,
            shutdown: Arc::new(AtomicBool::new(false)),
            accept_thread: Mutex::new(None),
            config,
        })
    }

    /// Registers a broker adapter and subscribes this server's reactor to
    /// its order/trade callbacks.
    pub fn register_adapter(&self, adapter: Arc<dyn Broker>) {
        adapter.register_reactor(self.reactor.clone() as Arc<dyn Reactor>);
        self.adapters.lock().push(adapter);
    }

    pub fn start(self: &Arc<Self>) {
        self.trade_sink.start();
        let server = self.clone();
        let handle = thread::spawn(move || server.run_accept_loop());
        *self.accept_thread.lock() = Some(handle);
    }

    fn run_accept_loop(self: Arc<Self>) {
        info!("broker acceptor thread started");
        while !self.shutdown.load(Ordering::SeqCst) {
            match self.acceptor.wait_connection(self.config.poll_interval) {
                Ok(Some(line)) => {
                    let session = Session::new(line, &self.config);
                    self.sessions.lock().push(session.clone());
                    let server = self.clone();
                    thread::spawn(move || {
                        server.run_session(session.clone());
                        server.sessions.lock().retain(|s| !Arc::ptr_eq(s, &session));
                    });
                }
                Ok(None) => continue,
                Err(e) => warn!(error = %e, "acceptor error, retrying"),
            }
        }
    }

    fn run_session(self: &Arc<Self>, session: Arc<Session>) {
        let _ = session
            .line
            .set_option(LineOption::ReceiveTimeout, session.poll_interval);

        loop {
            if session.done.load(Ordering::SeqCst) || self.shutdown.load(Ordering::SeqCst) {
                return;
            }

            let msg = match MessageProtocol::read(session.line.as_ref()) {
                Ok(msg) => msg,
                Err(tickline_proto::ProtocolError::Io(tickline_io::IoError::Timeout)) => continue,
                Err(e) => {
                    debug!(error = %e, "broker session read failed, closing");
                    return;
                }
            };

            if msg.message_type() != Some(MessageType::Control) {
                continue;
            }
            let Some(frame) = msg.frame(1) else { continue };
            let Ok(json) = std::str::from_utf8(frame.as_bytes()) else {
                continue;
            };

            let response = self.handle_control(&session, json);
            if session.send(&response).is_err() {
                return;
            }
        }
    }

    fn handle_control(self: &Arc<Self>, session: &Arc<Session>, json: &str) -> Message {
        let request: ControlRequest = match serde_json::from_str(json) {
            Ok(r) => r,
            Err(e) => {
                return control_response(&ResultResponse::error(format!(
                    "malformed control request: {e}"
                )))
            }
        };

        match request {
            ControlRequest::GetIdentity => {
                let identity = session.assign_identity();
                let body = serde_json::to_string(&IdentityResponse { identity })
                    .expect("fixed struct serializes");
                Message::control(&body)
            }
            ControlRequest::Order {
                id,
                account,
                security,
                order_type,
                operation,
                quantity,
                price,
                strategy,
                signal_id,
                comment,
            } => self.handle_order(
                session, id, account, security, order_type, operation, quantity, price, strategy,
                signal_id, comment,
            ),
            ControlRequest::CancelOrder { id, account } => self.handle_cancel(session, id, account),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_order(
        self: &Arc<Self>,
        session: &Arc<Session>,
        client_assigned_id: u64,
        account: String,
        security: String,
        order_type: crate::order::OrderType,
        operation: crate::order::Operation,
        quantity: u32,
        price: Option<f64>,
        strategy: Option<String>,
        signal_id: Option<String>,
        comment: Option<String>,
    ) -> Message {
        if !session.has_identity() {
            return control_response(&ResultResponse::error("identity required"));
        }
        if order_type == crate::order::OrderType::Limit && price.is_none() {
            return control_response(&ResultResponse::error("limit order requires a price"));
        }

        let mut order = Order::new(
            client_assigned_id,
            account.clone(),
            security,
            price.map(tickline_proto::Decimal::from_f64),
            quantity,
            operation,
            order_type,
            signal_id_from_parts(strategy, signal_id, comment),
        );
        order.submit();

        if let Err(e) = session.register_order(order.clone()) {
            return control_response(&ResultResponse::error(e.to_string()));
        }
        self.reactor.index_order(order.local_id, session.clone());

        let adapters = self.adapters.lock().clone();
        for adapter in adapters.iter().filter(|a| a.has_account(&account)) {
            adapter.submit_order(&order);
        }

        control_response(&ResultResponse::success())
    }

    fn handle_cancel(self: &Arc<Self>, session: &Arc<Session>, client_assigned_id: u64, account: String) -> Message {
        let Some(order) = session.order_by_client_id(client_assigned_id) else {
            return control_response(&ResultResponse::error("no matching active order"));
        };

        let response = control_response(&ResultResponse::success());

        let adapters = self.adapters.lock().clone();
        for adapter in adapters.iter().filter(|a| a.has_account(&account)) {
            adapter.cancel_order(&order);
        }

        response
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for session in self.sessions.lock().iter() {
            session.done.store(true, Ordering::SeqCst);
        }
        if let Some(handle) = self.accept_thread.lock().take() {
            let _ = handle.join();
        }
        self.trade_sink.stop();
    }
}

fn control_response(body: &ResultResponse) -> Message {
    let json = serde_json::to_string(body).expect("fixed struct serializes");
    Message::control(&json)
}
