//! In-process line: a pair of [`ByteQueue`]s cross-wired by a process-wide
//! connect registry keyed by address, so an in-proc acceptor can match a
//! connect request without any OS involvement.

use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::IoError;
use crate::line::{Acceptor, Line, LineFactory, LineOption};
use crate::queue::ByteQueue;

const DEFAULT_QUEUE_CAPACITY: usize = 64 * 1024;

struct PendingConnect {
    address: String,
    slot: Arc<ConnectSlot>,
}

struct ConnectSlot {
    channels: Mutex<Option<(Arc<ByteQueue>, Arc<ByteQueue>)>>,
    ready: Condvar,
}

/// Process-wide connect queue and its wakeup condition. Lives for the
/// process; individual [`InprocLineFactory`]s are the only intended owners
/// of the acceptor side of this registry.
struct Registry {
    pending: Mutex<VecDeque<PendingConnect>>,
    arrived: Condvar,
}

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Registry {
        pending: Mutex::new(VecDeque::new()),
        arrived: Condvar::new(),
    })
}

/// One half of an in-process connection: a send queue and a receive queue
/// shared with the peer.
pub struct InprocLine {
    send: Arc<ByteQueue>,
    recv: Arc<ByteQueue>,
    recv_timeout: Mutex<Option<Duration>>,
}

impl InprocLine {
    fn new(send: Arc<ByteQueue>, recv: Arc<ByteQueue>) -> Self {
        Self {
            send,
            recv,
            recv_timeout: Mutex::new(None),
        }
    }
}

impl Line for InprocLine {
    fn read(&self, buf: &mut [u8]) -> Result<usize, IoError> {
        match *self.recv_timeout.lock() {
            Some(timeout) => self.recv.read_with_timeout(buf, timeout),
            None => self.recv.read(buf),
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize, IoError> {
        self.send.write(buf)
    }

    fn set_option(&self, option: LineOption, value: Duration) -> Result<(), IoError> {
        match option {
            LineOption::ReceiveTimeout => {
                *self.recv_timeout.lock() = Some(value);
                Ok(())
            }
            LineOption::SendTimeout => Err(IoError::UnsupportedOption(
                "inproc lines block on a bounded queue rather than honoring a send timeout",
            )),
        }
    }
}

impl Drop for InprocLine {
    fn drop(&mut self) {
        // Disconnect both queues so the peer's blocked read/write (if any)
        // observes ConnectionLost rather than hanging until its own Arc
        // refcount drops to zero.
        self.send.set_connected(false);
        self.recv.set_connected(false);
    }
}

pub struct InprocAcceptor {
    address: String,
}

impl Acceptor for InprocAcceptor {
    fn wait_connection(&self, timeout: Duration) -> Result<Option<Box<dyn Line>>, IoError> {
        let deadline = Instant::now() + timeout;
        let reg = registry();
        let mut guard = reg.pending.lock();
        loop {
            if let Some(pos) = guard.iter().position(|p| p.address == self.address) {
                let pending = guard.remove(pos).expect("position just found");
                drop(guard);

                let server_reads = Arc::new(ByteQueue::new(DEFAULT_QUEUE_CAPACITY));
                let server_writes = Arc::new(ByteQueue::new(DEFAULT_QUEUE_CAPACITY));
                *pending.slot.channels.lock() =
                    Some((server_writes.clone(), server_reads.clone()));
                pending.slot.ready.notify_all();

                return Ok(Some(Box::new(InprocLine::new(server_writes, server_reads))));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let result = reg.arrived.wait_for(&mut guard, deadline - now);
            if result.timed_out() {
                continue;
            }
        }
    }
}

/// Builds [`InprocLine`]/[`InprocAcceptor`] instances for the `inproc`
/// scheme.
#[derive(Default)]
pub struct InprocLineFactory;

impl InprocLineFactory {
    pub fn new() -> Self {
        Self
    }
}

impl LineFactory for InprocLineFactory {
    fn supports_scheme(&self, scheme: &str) -> bool {
        scheme == "inproc"
    }

    fn create_client(&self, address: &str) -> Result<Box<dyn Line>, IoError> {
        let (_, rest) = crate::addr::parse(address).unwrap_or(("inproc", address));
        let slot = Arc::new(ConnectSlot {
            channels: Mutex::new(None),
            ready: Condvar::new(),
        });

        {
            let reg = registry();
            reg.pending.lock().push_back(PendingConnect {
                address: rest.to_string(),
                slot: slot.clone(),
            });
            reg.arrived.notify_all();
        }

        let mut guard = slot.channels.lock();
        while guard.is_none() {
            slot.ready.wait(&mut guard);
        }
        let (send, recv) = guard.take().expect("checked is_some above");
        Ok(Box::new(InprocLine::new(send, recv)))
    }

    fn create_server(&self, address: &str) -> Result<Box<dyn Acceptor>, IoError> {
        let (_, rest) = crate::addr::parse(address).unwrap_or(("inproc", address));
        Ok(Box::new(InprocAcceptor {
            address: rest.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn client_and_acceptor_cross_wire() {
        let factory = InprocLineFactory::new();
        let acceptor = factory.create_server("inproc://test-a").unwrap();

        let client = thread::spawn(move || {
            let factory = InprocLineFactory::new();
            factory.create_client("inproc://test-a").unwrap()
        });

        let server_line = acceptor
            .wait_connection(Duration::from_secs(2))
            .unwrap()
            .expect("connection arrives");
        let client_line = client.join().unwrap();

        client_line.write(b"hello").unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(server_line.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");

        server_line.write(b"world").unwrap();
        let mut buf2 = [0u8; 5];
        assert_eq!(client_line.read(&mut buf2).unwrap(), 5);
        assert_eq!(&buf2, b"world");
    }

    #[test]
    fn acceptor_times_out_with_no_pending_connect() {
        let factory = InprocLineFactory::new();
        let acceptor = factory.create_server("inproc://nobody-connects").unwrap();
        let result = acceptor.wait_connection(Duration::from_millis(50)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn dropping_one_end_raises_connection_lost_on_the_other() {
        let factory = InprocLineFactory::new();
        let acceptor = factory.create_server("inproc://test-disconnect").unwrap();

        let client = thread::spawn(move || {
            let factory = InprocLineFactory::new();
            factory.create_client("inproc://test-disconnect").unwrap()
        });

        let server_line = acceptor
            .wait_connection(Duration::from_secs(2))
            .unwrap()
            .expect("connection arrives");
        let client_line = client.join().unwrap();
        drop(client_line);

        let mut buf = [0u8; 4];
        let result = server_line.read(&mut buf);
        assert!(matches!(result, Err(IoError::ConnectionLost)));
    }
}
