//! Notification transport.
//!
//! A transport moves opaque event payloads between store instances. It is
//! responsible for delivery only: no ordering across senders, no
//! durability. Disk stays the source of truth.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Default number of payloads buffered per subscriber.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Callback receiving every delivered payload.
pub type PayloadSink = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Transport failures. Never fatal to a commit.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport is closed")]
    Closed,

    #[error("Delivery failed: {reason}")]
    Delivery { reason: String },

    #[error("Subscription failed: {reason}")]
    Subscribe { reason: String },
}

/// Moves encoded event payloads to every subscribed store instance.
pub trait EventTransport: Send + Sync + fmt::Debug {
    /// Hand `payload` off for delivery. Returns the number of subscribers it
    /// was handed to, when the transport knows.
    fn send(&self, payload: &[u8]) -> Result<usize, TransportError>;

    /// Register `sink` for every future payload until the returned
    /// subscription is dropped.
    fn subscribe(&self, sink: PayloadSink) -> Result<Subscription, TransportError>;
}

// ============================================================================
// SUBSCRIPTION
// ============================================================================

/// Live registration with a transport; unsubscribes on drop.
pub struct Subscription {
    id: u64,
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(id: u64, cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to tear down.
    pub fn detached() -> Self {
        Self { id: 0, cancel: None }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

// ============================================================================
// NOOP TRANSPORT
// ============================================================================

/// Transport for single-instance stores: drops every payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransport;

impl EventTransport for NoopTransport {
    fn send(&self, _payload: &[u8]) -> Result<usize, TransportError> {
        Ok(0)
    }

    fn subscribe(&self, _sink: PayloadSink) -> Result<Subscription, TransportError> {
        Ok(Subscription::detached())
    }
}

// ============================================================================
// BROADCAST TRANSPORT
// ============================================================================

#[derive(Debug, Clone)]
enum Frame {
    Payload(Arc<Vec<u8>>),
    /// Wakes dispatchers so a cancelled one notices its stop flag.
    Wake,
}

/// In-process fan-out over a `tokio::sync::broadcast` channel.
///
/// Each subscriber gets a dispatcher thread that blocks on the channel and
/// feeds its sink, so publishers never wait on subscribers. Clones share the
/// channel. A slow subscriber that falls more than the channel capacity
/// behind loses the oldest payloads and logs how many.
#[derive(Debug, Clone)]
pub struct BroadcastTransport {
    tx: broadcast::Sender<Frame>,
    next_id: Arc<AtomicU64>,
}

impl Default for BroadcastTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl BroadcastTransport {
    /// Create a transport buffering up to `capacity` payloads per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn dispatch(
        id: u64,
        mut rx: broadcast::Receiver<Frame>,
        sink: PayloadSink,
        stopped: Arc<AtomicBool>,
    ) {
        loop {
            let frame = rx.blocking_recv();
            // A lagging receiver can miss the wake frame, so the flag decides.
            if stopped.load(Ordering::Acquire) {
                break;
            }
            match frame {
                Ok(Frame::Payload(payload)) => sink(&payload),
                Ok(Frame::Wake) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(subscription = id, skipped, "Subscriber lagged, events were dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        trace!(subscription = id, "Dispatcher stopped");
    }
}

impl EventTransport for BroadcastTransport {
    fn send(&self, payload: &[u8]) -> Result<usize, TransportError> {
        match self.tx.send(Frame::Payload(Arc::new(payload.to_vec()))) {
            Ok(receivers) => {
                trace!(receivers, bytes = payload.len(), "Payload broadcast");
                Ok(receivers)
            }
            // No subscribers is not a failure: nobody needs the event.
            Err(_) => Ok(0),
        }
    }

    fn subscribe(&self, sink: PayloadSink) -> Result<Subscription, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = self.tx.subscribe();
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopped);
        thread::Builder::new()
            .name(format!("binprefs-events-{id}"))
            .spawn(move || Self::dispatch(id, rx, sink, flag))
            .map_err(|e| TransportError::Subscribe {
                reason: e.to_string(),
            })?;
        debug!(subscription = id, "Transport subscription opened");

        let tx = self.tx.clone();
        Ok(Subscription::new(id, move || {
            stopped.store(true, Ordering::Release);
            let _ = tx.send(Frame::Wake);
        }))
    }
}
