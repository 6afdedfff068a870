//! The QuoteSource client: a reconnecting background thread that subscribes
//! to a ticker list and dispatches ticks to registered sinks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tickline_io::{FactoryRegistry, Line, LineOption};
use tickline_proto::{Message, MessageProtocol, MessageType, Tick, TICK_WIRE_SIZE};
use tracing::{debug, warn};

use crate::server::SERVICE_HEARTBEAT;

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Tunables for a [`QuoteSourceClient`], defaulting to a 5s reconnect
/// sleep, a ~2s receive timeout (so the read loop
/// can notice `stop()` promptly), and a 10s heartbeat cadence.
#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    pub reconnect_delay: Duration,
    pub receive_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Receives ticks dispatched by a [`QuoteSourceClient`].
pub trait TickSink: Send + Sync {
    fn on_tick(&self, ticker: &str, tick: Tick);
}

struct Shared {
    address: String,
    tickers: Mutex<Vec<String>>,
    registry: FactoryRegistry,
    sinks: Mutex<Vec<Arc<dyn TickSink>>>,
    run: AtomicBool,
    config: ClientConfig,
}

/// Subscribes to a comma-split ticker list on a configured QuoteSource
/// server and redistributes received ticks to every registered sink,
/// reconnecting transparently on any protocol error.
pub struct QuoteSourceClient {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl QuoteSourceClient {
    pub fn new(address: impl Into<String>, registry: FactoryRegistry) -> Self {
        Self::with_config(address, registry, ClientConfig::default())
    }

    /// As [`QuoteSourceClient::new`], with explicit [`ClientConfig`]
    /// tunables instead of the defaults.
    pub fn with_config(
        address: impl Into<String>,
        registry: FactoryRegistry,
        config: ClientConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                address: address.into(),
                tickers: Mutex::new(Vec::new()),
                registry,
                sinks: Mutex::new(Vec::new()),
                run: AtomicBool::new(false),
                config,
            }),
            handle: Mutex::new(None),
        }
    }

    pub fn register_sink(&self, sink: Arc<dyn TickSink>) {
        self.shared.sinks.lock().push(sink);
    }

    /// Starts the background thread subscribing to `tickers` (e.g.
    /// `["t:*"]`).
    pub fn start_stream(&self, tickers: Vec<String>) {
        *self.shared.tickers.lock() = tickers;
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
}

fn run_loop(shared: Arc<Shared>) {
    while shared.run.load(Ordering::SeqCst) {
        match connect_and_serve(&shared) {
            Ok(()) => {}
            Err(e) => debug!(error = %e, "quotesource client session ended"),
        }
        if !shared.run.load(Ordering::SeqCst) {
            return;
        }
        thread::sleep(shared.config.reconnect_delay);
    }
}

fn connect_and_serve(shared: &Arc<Shared>) -> Result<(), tickline_proto::ProtocolError> {
    let line = shared
        .registry
        .create_client(&shared.address)
        .map_err(tickline_proto::ProtocolError::Io)?
        .ok_or_else(|| {
            tickline_proto::ProtocolError::MalformedFrame(format!(
                "no transport registered for {}",
                shared.address
            ))
        })?;
    line.set_option(LineOption::ReceiveTimeout, shared.config.receive_timeout)
        .ok();

    let ticker_list = serde_json::to_string(&*shared.tickers.lock())
        .unwrap_or_else(|_| "[]".to_string());
    let body = format!(r#"{{"command":"start-stream","tickers":{ticker_list}}}"#);
    MessageProtocol::send(line.as_ref(), &Message::control(&body))?;
    let _ = MessageProtocol::read(line.as_ref())?;

    let mut last_heartbeat = Instant::now();
    while shared.run.load(Ordering::SeqCst) {
        if last_heartbeat.elapsed() >= shared.config.heartbeat_interval {
            MessageProtocol::send(line.as_ref(), &Message::service(SERVICE_HEARTBEAT))?;
            last_heartbeat = Instant::now();
        }

        match MessageProtocol::read(line.as_ref()) {
            Ok(msg) => dispatch(shared, &msg),
            Err(tickline_proto::ProtocolError::Io(tickline_io::IoError::Timeout)) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn dispatch(shared: &Arc<Shared>, msg: &Message) {
    if msg.message_type() != Some(MessageType::Data) {
        return;
    }
    let (Some(ticker_frame), Some(tick_frame)) = (msg.frame(1), msg.frame(2)) else {
        return;
    };
    let Ok(ticker) = std::str::from_utf8(ticker_frame.as_bytes()) else {
        return;
    };
    if tick_frame.as_bytes().len() != TICK_WIRE_SIZE {
        warn!("dropping data frame with unrecognized tick size");
        return;
    }
    let Ok(tick) = Tick::decode(tick_frame.as_bytes()) else {
        return;
    };
    for sink in shared.sinks.lock().iter() {
        sink.on_tick(ticker, tick);
    }
}
