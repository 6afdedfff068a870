//! Blocking byte queue: a [`RingBuffer`] guarded by a mutex, a non-empty
//! condition, a non-full condition, and a `connected` flag used to unblock
//! parked readers/writers on teardown.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::IoError;
use crate::ring::RingBuffer;

struct State {
    ring: RingBuffer,
    connected: bool,
}

/// A [`RingBuffer`] wrapped with a mutex, a non-empty condition, a non-full
/// condition, and a `connected` flag.
pub struct ByteQueue {
    state: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl ByteQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                ring: RingBuffer::new(capacity),
                connected: true,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Blocks until at least one byte is available, then reads as much as is
    /// present (which may be less than `dst.len()`). Fails with
    /// [`IoError::ConnectionLost`] if woken while disconnected and empty.
    pub fn read(&self, dst: &mut [u8]) -> Result<usize, IoError> {
        let mut guard = self.state.lock();
        loop {
            if !guard.ring.is_empty() {
                let n = guard.ring.read(dst);
                self.not_full.notify_one();
                return Ok(n);
            }
            if !guard.connected {
                return Err(IoError::ConnectionLost);
            }
            self.not_empty.wait(&mut guard);
        }
    }

    /// As [`ByteQueue::read`], but returns `Ok(0)` if `timeout` elapses
    /// before data arrives. Still raises `ConnectionLost` if disconnected
    /// and empty.
    pub fn read_with_timeout(&self, dst: &mut [u8], timeout: Duration) -> Result<usize, IoError> {
        let mut guard = self.state.lock();
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if !guard.ring.is_empty() {
                let n = guard.ring.read(dst);
                self.not_full.notify_one();
                return Ok(n);
            }
            if !guard.connected {
                return Err(IoError::ConnectionLost);
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return Ok(0);
            }
            let timed_out = self.not_empty.wait_for(&mut guard, deadline - now).timed_out();
            if timed_out && guard.ring.is_empty() {
                if !guard.connected {
                    return Err(IoError::ConnectionLost);
                }
                return Ok(0);
            }
        }
    }

    /// Blocks until there is room for all of `src`, then writes it in full.
    /// Fails immediately with [`IoError::WriteTooLarge`] if `src` is at
    /// least as large as the queue's total capacity (it could never fit).
    pub fn write(&self, src: &[u8]) -> Result<usize, IoError> {
        if src.len() >= self.state.lock().ring.capacity() {
            return Err(IoError::WriteTooLarge(src.len()));
        }

        let mut guard = self.state.lock();
        let mut written = 0;
        while written < src.len() {
            if !guard.connected {
                return Err(IoError::ConnectionLost);
            }
            if guard.ring.is_full() {
                self.not_full.wait(&mut guard);
                continue;
            }
            let n = guard.ring.write(&src[written..]);
            written += n;
            self.not_empty.notify_one();
        }
        Ok(written)
    }

    /// Marks the queue disconnected, waking any parked reader/writer so they
    /// observe [`IoError::ConnectionLost`] on their next empty-read or
    /// full-write.
    pub fn set_connected(&self, connected: bool) {
        let mut guard = self.state.lock();
        guard.connected = connected;
        if !connected {
            self.not_empty.notify_all();
            self.not_full.notify_all();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }
}

impl Drop for ByteQueue {
    fn drop(&mut self) {
        self.set_connected(false);
    }
}
