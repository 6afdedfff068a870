//! The trade-sink pump: a dedicated thread draining the server-wide trade
//! queue to a reconnecting sink line.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tickline_io::FactoryRegistry;
use tickline_proto::{Frame, Message, MessageProtocol};
use tracing::{debug, warn};

use crate::trade::Trade;

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_DRAIN_WAKE_INTERVAL: Duration = Duration::from_secs(1);

/// Tunables for a [`TradeSinkPump`], defaulting to a 5s reconnect sleep and
/// a 1s drain-wait wakeup (so `stop()` is noticed promptly even with an
/// empty queue).
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub reconnect_delay: Duration,
    pub drain_wake_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            drain_wake_interval: DEFAULT_DRAIN_WAKE_INTERVAL,
        }
    }
}

struct State {
    queue: VecDeque<Trade>,
    shutdown: bool,
}

/// Drains trades enqueued by [`crate::server::BrokerServer`] to a single
/// configured sink endpoint, reconnecting on send failure. A server with no
/// configured sink address runs no pump thread at all.
pub struct TradeSinkPump {
    address: Option<String>,
    registry: FactoryRegistry,
    state: Mutex<State>,
    woken: Condvar,
    handle: Mutex<Option<JoinHandle<()>>>,
    config: Config,
}

impl TradeSinkPump {
    pub fn new(address: Option<String>, registry: FactoryRegistry) -> Arc<Self> {
        Self::new_with_config(address, registry, Config::default())
    }

    /// As [`TradeSinkPump::new`], with explicit [`Config`] tunables instead
    /// of the defaults.
    pub fn new_with_config(
        address: Option<String>,
        registry: FactoryRegistry,
        config: Config,
    ) -> Arc<Self> {
        Arc::new(Self {
            address,
            registry,
            state: Mutex::new(State {
                queue: VecDeque::new(),
                shutdown: false,
            }),
            woken: Condvar::new(),
            handle: Mutex::new(None),
            config,
        })
    }

    pub fn enqueue(&self, trade: Trade) {
        let mut state = self.state.lock();
        state.queue.push_back(trade);
        self.woken.notify_one();
    }

    pub fn start(self: &Arc<Self>) {
        if self.address.is_none() {
            return;
        }
        let pump = self.clone();
        let handle = thread::spawn(move || pump.run());
        *self.handle.lock() = Some(handle);
    }

    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.woken.notify_all();
        drop(state);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    fn run(self: Arc<Self>) {
        let address = self.address.as_deref().expect("start() checked Some");
        loop {
            if self.state.lock().shutdown {
                return;
            }
            match self.registry.create_client(address) {
                Ok(Some(line)) => {
                    if let Err(e) = self.drain_until_failure(line.as_ref()) {
                        debug!(error = %e, "trade sink send failed, reconnecting");
                    }
                }
                Ok(None) => warn!(%address, "no transport registered for trade sink address"),
                Err(e) => warn!(error = %e, "trade sink connect failed"),
            }
            if self.state.lock().shutdown {
                return;
            }
            thread::sleep(self.config.reconnect_delay);
        }
    }

    fn drain_until_failure(&self, line: &dyn tickline_io::Line) -> Result<(), tickline_proto::ProtocolError> {
        loop {
            let trade = {
                let mut state = self.state.lock();
                loop {
                    if let Some(trade) = state.queue.pop_front() {
                        break Some(trade);
                    }
                    if state.shutdown {
                        break None;
                    }
                    self.woken.wait_for(&mut state, self.config.drain_wake_interval);
                }
            };
            let Some(trade) = trade else { return Ok(()) };

            let json = serde_json::to_string(&trade.to_notification())
                .expect("serializing a fixed struct never fails");
            // Single-frame message (no type tag): the trade-sink payload
            // uses the same JSON schema as client-facing trades but not the
            // Control(1)+JSON(2)-frame envelope.
            MessageProtocol::send(line, &Message::new(vec![Frame::from(json)]))?;
        }
    }
}
