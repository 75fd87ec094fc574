use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use log::warn;

use crate::error::AdapterError;

#[derive(Debug, Default)]
struct BufferInner {
    queue: VecDeque<Vec<u8>>,
    last: Option<Vec<u8>>,
    open: bool,
    dropped: u64,
}

/// Notification payloads waiting to be read.
///
/// Pushes come from the event-delivery runtime and never block on readers. Readers block until a
/// payload arrives or the buffer is closed (the adapter left the ready state); messages that
/// arrived before the close can still be drained.
#[derive(Debug, Default)]
pub struct InboundBuffer {
    inner: Mutex<BufferInner>,
    available: Condvar,
    capacity: Option<usize>,
}

impl InboundBuffer {
    /// `capacity` of `None` never drops; otherwise the oldest message is dropped when full.
    pub fn new(capacity: Option<usize>) -> Self {
        InboundBuffer {
            inner: Mutex::new(BufferInner::default()),
            available: Condvar::new(),
            capacity: capacity.map(|capacity| capacity.max(1)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, payload: Vec<u8>) {
        let mut inner = self.lock();

        if let Some(capacity) = self.capacity {
            while inner.queue.len() >= capacity {
                inner.queue.pop_front();
                inner.dropped += 1;
                warn!("Inbound buffer full ({} messages), dropped the oldest message", capacity);
            }
        }

        inner.last = Some(payload.clone());
        inner.queue.push_back(payload);
        self.available.notify_one();
    }

    /// Pops the oldest message, waiting for one while the buffer is open.
    pub fn pop(&self) -> Result<Vec<u8>, AdapterError> {
        let inner = self.lock();
        let mut inner = self.available
            .wait_while(inner, |inner| inner.queue.is_empty() && inner.open)
            .unwrap_or_else(PoisonError::into_inner);

        inner.queue.pop_front().ok_or(AdapterError::NotConnected)
    }

    /// Like `pop`, but gives up after `timeout` and returns `Ok(None)`.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<Vec<u8>>, AdapterError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();

        loop {
            if let Some(payload) = inner.queue.pop_front() {
                return Ok(Some(payload));
            }
            if !inner.open {
                return Err(AdapterError::NotConnected);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            inner = self.available
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// The most recently pushed payload; independent of what has been popped.
    pub fn last(&self) -> Option<Vec<u8>> {
        self.lock().last.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn open(&self) {
        self.lock().open = true;
    }

    /// Wakes every blocked reader; they drain what is left and then fail with `NotConnected`.
    pub fn close(&self) {
        self.lock().open = false;
        self.available.notify_all();
    }
}
