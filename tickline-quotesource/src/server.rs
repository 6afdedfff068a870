//! The QuoteSource server: one acceptor thread spawning a session thread per
//! accepted line, push- and pull-mode tick fan-out.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use tickline_io::line::Acceptor;
use tickline_io::{FactoryRegistry, Line, LineOption};
use tickline_proto::{Frame, Message, MessageProtocol, MessageType, Tick};
use tracing::{debug, info, warn};

use crate::control::{CapabilitiesResponse, ControlRequest, ResultResponse};
use crate::error::QuoteSourceError;
use crate::filter::SubscriptionFilter;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
const DEFAULT_PULL_QUEUE_CAPACITY: usize = 1024;
pub(crate) const SERVICE_HEARTBEAT: u32 = 1;
const SERVICE_NEXT_TICK: u32 = 2;

/// Tunables for a [`QuoteSourceServer`], defaulting to a 200ms
/// acceptor/session poll interval and a 1024-slot pull-mode tick queue per
/// session.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub poll_interval: Duration,
    pub pull_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            pull_queue_capacity: DEFAULT_PULL_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Push,
    Pull,
}

/// A per-connection actor: owns its line, its subscription filter, and (in
/// pull mode) the credit counter and tick queue feeding its sender thread.
struct Session {
    line: Arc<dyn Line>,
    write_lock: Mutex<()>,
    filter: Mutex<Option<SubscriptionFilter>>,
    mode: Mutex<Mode>,
    credit: AtomicI64,
    pull_queue: ArrayQueue<(String, Tick)>,
    done: AtomicBool,
    poll_interval: Duration,
}

impl Session {
    fn new(line: Box<dyn Line>, config: &Config) -> Arc<Self> {
        Arc::new(Self {
            line: Arc::from(line),
            write_lock: Mutex::new(()),
            filter: Mutex::new(None),
            mode: Mutex::new(Mode::Push),
            credit: AtomicI64::new(0),
            pull_queue: ArrayQueue::new(config.pull_queue_capacity),
            done: AtomicBool::new(false),
            poll_interval: config.poll_interval,
        })
    }

    fn send(&self, msg: &Message) -> Result<(), QuoteSourceError> {
        let _guard = self.write_lock.lock();
        MessageProtocol::send(self.line.as_ref(), msg).map_err(Into::into)
    }

    fn matches(&self, ticker: &str) -> bool {
        self.filter
            .lock()
            .as_ref()
            .is_some_and(|f| f.matches(ticker))
    }

    /// Routes a published tick to this session per its current mode: an
    /// immediate write in push mode, or an enqueue (dropping the oldest
    /// entry on overflow) in pull mode.
    fn route_tick(&self, ticker: &str, tick: Tick) {
        match *self.mode.lock() {
            Mode::Push => {
                if let Err(e) = self.send(&Message::data(ticker, tick.encode().to_vec())) {
                    warn!(error = %e, "push-mode tick delivery failed, closing session");
                    self.done.store(true, Ordering::SeqCst);
                }
            }
            Mode::Pull => {
                if self.pull_queue.force_push((ticker.to_string(), tick)).is_some() {
                    debug!(%ticker, "pull queue full, dropped oldest tick");
                }
            }
        }
    }

    fn handle_control(&self, json: &str) -> Result<Message, QuoteSourceError> {
        let request: ControlRequest = match serde_json::from_str(json) {
            Ok(r) => r,
            Err(e) => {
                return Ok(control_response(&ResultResponse::error(format!(
                    "malformed control request: {e}"
                ))))
            }
        };

        match request {
            ControlRequest::RequestCapabilities => {
                let body = serde_json::to_string(&CapabilitiesResponse::default())
                    .expect("serializing a fixed struct never fails");
                Ok(Message::control(&body))
            }
            ControlRequest::StartStream { tickers, manual_mode } => {
                match SubscriptionFilter::from_requests(&tickers) {
                    Ok(filter) => {
                        *self.filter.lock() = Some(filter);
                        *self.mode.lock() = if manual_mode { Mode::Pull } else { Mode::Push };
                        Ok(control_response(&ResultResponse::success()))
                    }
                    Err(e) => Ok(control_response(&ResultResponse::error(e.to_string()))),
                }
            }
        }
    }

    fn handle_service(&self, sub_type: u32) {
        if sub_type == SERVICE_NEXT_TICK {
            self.credit.fetch_add(1, Ordering::SeqCst);
        }
        // Heartbeat and unrecognized sub-types are otherwise ignored.
    }

    /// The sender thread body for pull mode: pops at most one tick per
    /// positive credit and writes it, sleeping briefly when there is
    /// nothing to do.
    fn run_sender(self: Arc<Self>) {
        while !self.done.load(Ordering::SeqCst) {
            if self.credit.load(Ordering::SeqCst) <= 0 {
                thread::sleep(Duration::from_millis(5));
                continue;
            }
            let Some((ticker, tick)) = self.pull_queue.pop() else {
                thread::sleep(Duration::from_millis(5));
                continue;
            };
            self.credit.fetch_sub(1, Ordering::SeqCst);
            if let Err(e) = self.send(&Message::data(&ticker, tick.encode().to_vec())) {
                warn!(error = %e, "pull-mode tick delivery failed, closing session");
                self.done.store(true, Ordering::SeqCst);
                return;
            }
        }
    }

    fn run_reader(self: Arc<Self>) {
        let _ = self
            .line
            .set_option(LineOption::ReceiveTimeout, self.poll_interval);

        let mut sender_started = false;
        loop {
            if self.done.load(Ordering::SeqCst) {
                return;
            }

            let msg = match MessageProtocol::read(self.line.as_ref()) {
                Ok(msg) => msg,
                Err(tickline_proto::ProtocolError::Io(tickline_io::IoError::Timeout)) => continue,
                Err(e) => {
                    debug!(error = %e, "session read failed, closing");
                    self.done.store(true, Ordering::SeqCst);
                    return;
                }
            };

            match msg.message_type() {
                Some(MessageType::Control) => {
                    let Some(frame) = msg.frame(1) else { continue };
                    let Ok(json) = std::str::from_utf8(frame.as_bytes()) else { continue };
                    match self.handle_control(json) {
                        Ok(response) => {
                            if self.send(&response).is_err() {
                                self.done.store(true, Ordering::SeqCst);
                                return;
                            }
                        }
                        Err(_) => continue,
                    }
                }
                Some(MessageType::Service) => {
                    if let Some(frame) = msg.frame(1) {
                        if let Ok(bytes) = frame.as_bytes().try_into() {
                            self.handle_service(u32::from_le_bytes(bytes));
                        }
                    }
                }
                _ => {}
            }

            if !sender_started && *self.mode.lock() == Mode::Pull {
                sender_started = true;
                let sender_self = self.clone();
                thread::spawn(move || sender_self.run_sender());
            }
        }
    }
}

fn control_response(body: &ResultResponse) -> Message {
    let json = serde_json::to_string(body).expect("serializing a fixed struct never fails");
    Message::new(vec![Frame::from(MessageType::Control as u32), Frame::from(json)])
}

/// Owns an acceptor and the live session list; spawns one session thread
/// per accepted line and fans out published ticks to matching sessions.
pub struct QuoteSourceServer {
    acceptor: Box<dyn Acceptor>,
    sessions: Arc<Mutex<Vec<Arc<Session>>>>,
    shutdown: Arc<AtomicBool>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
    config: Config,
}

impl QuoteSourceServer {
    pub fn bind(address: &str, registry: &FactoryRegistry) -> Result<Self, QuoteSourceError> {
        Self::bind_with_config(address, registry, Config::default())
    }

    /// As [`QuoteSourceServer::bind`], with explicit [`Config`] tunables
    /// instead of the defaults.
    pub fn bind_with_config(
        address: &str,
        registry: &FactoryRegistry,
        config: Config,
    ) -> Result<Self, QuoteSourceError> {
        let acceptor = registry
            .create_server(address)
            .map_err(|e| QuoteSourceError::Parameter(e.to_string()))?
            .ok_or_else(|| QuoteSourceError::Parameter(format!("unrecognized scheme in {address}")))?;
        Ok(Self {
            acceptor,
            sessions: Arc::new(Mutex::new(Vec::new())),
            shutdown: Arc::new(AtomicBool::new(false)),
            accept_thread: Mutex::new(None),
            config,
        })
    }

    /// Starts the acceptor thread. The server keeps accepting until
    /// [`QuoteSourceServer::stop`] is called.
    pub fn start(self: &Arc<Self>) {
        let server = self.clone();
        let handle = thread::spawn(move || server.run_accept_loop());
        *self.accept_thread.lock() = Some(handle);
    }

    fn run_accept_loop(self: Arc<Self>) {
        info!("quotesource acceptor thread started");
        while !self.shutdown.load(Ordering::SeqCst) {
            match self.acceptor.wait_connection(self.config.poll_interval) {
                Ok(Some(line)) => {
                    let session = Session::new(line, &self.config);
                    self.sessions.lock().push(session.clone());
                    let sessions = self.sessions.clone();
                    thread::spawn(move || {
                        session.clone().run_reader();
                        sessions
                            .lock()
                            .retain(|s| !Arc::ptr_eq(s, &session));
                    });
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "acceptor error, retrying");
                }
            }
        }
    }

    /// Fans a tick out to every session whose subscription filter matches
    /// `ticker`, delivering immediately (push) or enqueuing (pull).
    pub fn publish(&self, ticker: &str, tick: Tick) {
        for session in self.sessions.lock().iter() {
            if session.matches(ticker) {
                session.route_tick(ticker, tick);
            }
        }
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for session in self.sessions.lock().iter() {
            session.done.store(true, Ordering::SeqCst);
        }
        if let Some(handle) = self.accept_thread.lock().take() {
            let _ = handle.join();
        }
    }
}
