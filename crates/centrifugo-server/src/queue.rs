//! Byte-bounded outbound queue.
//!
//! Every client connection owns one of these between the fan-out path and
//! its transport writer task. Enqueueing never blocks: a push that would
//! take the queued byte total over the cap fails instead, and the caller
//! closes the connection as too slow.

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Debug, PartialEq, Eq)]
pub enum PushError {
    /// Accepting the frame would exceed the byte cap.
    Full,
    /// The queue was closed.
    Closed,
}

struct Inner {
    items: VecDeque<Bytes>,
    bytes: usize,
    closed: bool,
}

pub struct ByteQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    max_bytes: usize,
}

impl ByteQueue {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(2),
                bytes: 0,
                closed: false,
            }),
            notify: Notify::new(),
            max_bytes,
        }
    }

    /// Enqueue a frame without blocking.
    pub fn push(&self, frame: Bytes) -> Result<(), PushError> {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(PushError::Closed);
            }
            if inner.bytes + frame.len() > self.max_bytes {
                return Err(PushError::Full);
            }
            inner.bytes += frame.len();
            inner.items.push_back(frame);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next frame. Returns `None` once the queue is closed
    /// and drained.
    pub async fn pop(&self) -> Option<Bytes> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(frame) = inner.items.pop_front() {
                    inner.bytes -= frame.len();
                    return Some(frame);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Close the queue. Pending frames stay poppable; further pushes fail.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Currently queued byte total.
    pub fn size(&self) -> usize {
        self.inner.lock().bytes
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }
}
