//! Event bridge: ships local commits out, folds remote commits in.
//!
//! ```text
//!  local commit ──► share_with_peers() ──► sibling bridges (same process, inline)
//!               └─► publish() ──► executor task ──► transport.send()
//!
//!  transport ──► on_receive() ──► drop if sent by an in-process peer
//!                                   │
//!  peer ────────────────────────► on_event() ──► filter (store, origin)
//!                                   │
//!                                   ├─ decode ok ──► cache.apply_remote() ──► listeners
//!                                   └─ decode err ─► cache.invalidate()   ──► listeners
//! ```
//!
//! Delivery is best effort. A lost event only delays convergence until the
//! key is next invalidated or reloaded; disk stays the source of truth.

use crate::listeners::ListenerRegistry;
use crate::transport::{EventTransport, PayloadSink, Subscription, TransportError};
use binprefs_core::{
    ChangeKind, Codec, ConflictPolicy, Entry, PrefEvent, PrefKey, StoreName, VersionClock,
};
use binprefs_storage::{
    CacheProvider, FailureHandler, PeerSet, PeerSink, Slot, StoreExecutor, TaskHandle,
};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// What [`EventBridge::on_receive`] did with a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receipt {
    /// The change was written into the cache.
    Applied,
    /// The cache already held a newer version of the key.
    Superseded,
    /// The value could not be decoded; the key was invalidated instead.
    Invalidated,
    /// The event belongs to another store.
    ForeignStore,
    /// The event was published by this instance.
    OwnEvent,
    /// The event came from a facade in this process and was already
    /// delivered directly.
    LocalPeer,
    /// The payload is not an event.
    Malformed,
}

/// Couples one store instance to a notification transport.
#[derive(Debug)]
pub struct EventBridge {
    store: StoreName,
    origin: Uuid,
    codec: Codec,
    cache: Arc<dyn CacheProvider>,
    clock: Arc<VersionClock>,
    policy: ConflictPolicy,
    transport: Arc<dyn EventTransport>,
    listeners: Arc<ListenerRegistry>,
    peers: Arc<PeerSet>,
}

impl EventBridge {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: StoreName,
        origin: Uuid,
        codec: Codec,
        cache: Arc<dyn CacheProvider>,
        clock: Arc<VersionClock>,
        policy: ConflictPolicy,
        transport: Arc<dyn EventTransport>,
        listeners: Arc<ListenerRegistry>,
    ) -> Self {
        Self {
            store,
            origin,
            codec,
            cache,
            clock,
            policy,
            transport,
            listeners,
            peers: Arc::new(PeerSet::new()),
        }
    }

    /// Share commits with the other facades in `peers`.
    pub fn with_peers(mut self, peers: Arc<PeerSet>) -> Self {
        self.peers = peers;
        self
    }

    pub fn origin(&self) -> Uuid {
        self.origin
    }

    pub fn store(&self) -> &StoreName {
        &self.store
    }

    /// Start receiving remote events. Delivery stops when the returned
    /// subscription is dropped or the bridge is gone.
    pub fn attach(self: &Arc<Self>) -> Result<Subscription, TransportError> {
        let peer: Weak<Self> = Arc::downgrade(self);
        self.peers.join(self.origin, peer);

        let bridge: Weak<Self> = Arc::downgrade(self);
        let sink: PayloadSink = Arc::new(move |payload: &[u8]| {
            if let Some(bridge) = bridge.upgrade() {
                bridge.on_receive(payload);
            }
        });
        self.transport.subscribe(sink)
    }

    /// Hand `events` to every other facade of this store in this process.
    /// Runs inline, so they are applied when this returns.
    pub fn share_with_peers(&self, events: &[PrefEvent]) -> usize {
        self.peers.broadcast(self.origin, events)
    }

    /// Make the other facades of this store re-read `keys` from disk.
    pub fn invalidate_peers(&self, keys: &[PrefKey]) -> usize {
        self.peers.invalidate(self.origin, keys)
    }

    /// Queue delivery of `events` behind the current task.
    ///
    /// The returned handle never carries a delivery failure: those are
    /// logged and dropped.
    pub fn publish(
        &self,
        events: Vec<PrefEvent>,
        executor: &StoreExecutor,
        on_failure: Arc<dyn FailureHandler>,
    ) -> TaskHandle {
        let transport = Arc::clone(&self.transport);
        let store = self.store.clone();
        executor.submit("publish", on_failure, move || {
            for event in events {
                deliver(transport.as_ref(), &store, &event);
            }
            Ok(())
        })
    }

    /// Fold one payload from the transport into the local cache.
    pub fn on_receive(&self, payload: &[u8]) -> Receipt {
        let event = match PrefEvent::from_payload(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(store = %self.store, error = %e, "Dropping malformed event payload");
                return Receipt::Malformed;
            }
        };
        if event.store == self.store
            && event.origin != self.origin
            && self.peers.contains(&event.origin)
        {
            return Receipt::LocalPeer;
        }
        self.on_event(&event)
    }

    /// Fold one decoded event into the local cache.
    pub fn on_event(&self, event: &PrefEvent) -> Receipt {
        if event.store != self.store {
            trace!(store = %self.store, foreign = %event.store, "Ignoring event for another store");
            return Receipt::ForeignStore;
        }
        if event.origin == self.origin {
            return Receipt::OwnEvent;
        }

        self.clock.observe(event.version);
        let receipt = self.apply(event);
        debug!(
            store = %self.store,
            key = %event.key,
            kind = %event.kind,
            version = event.version,
            receipt = ?receipt,
            "Remote event received"
        );
        if receipt != Receipt::Superseded {
            self.listeners.notify(&event.key);
        }
        receipt
    }

    fn apply(&self, event: &PrefEvent) -> Receipt {
        let slot = match (event.kind, &event.value) {
            (ChangeKind::Removed, _) => Slot::Removed {
                version: event.version,
            },
            (ChangeKind::Updated, Some(bytes)) => match self.codec.decode(bytes) {
                Ok(value) => Slot::Fresh(Entry::new(value, event.version)),
                Err(e) => {
                    warn!(
                        store = %self.store,
                        key = %event.key,
                        error = %e,
                        "Undecodable remote value, invalidating key"
                    );
                    self.cache.invalidate(&event.key);
                    return Receipt::Invalidated;
                }
            },
            (ChangeKind::Updated, None) => {
                self.cache.invalidate(&event.key);
                return Receipt::Invalidated;
            }
        };

        if self.cache.apply_remote(event.key.clone(), slot, self.policy) {
            Receipt::Applied
        } else {
            Receipt::Superseded
        }
    }
}

impl PeerSink for EventBridge {
    fn on_peer_event(&self, event: &PrefEvent) {
        self.on_event(event);
    }

    fn on_peer_invalidate(&self, keys: &[PrefKey]) {
        for key in keys {
            self.cache.invalidate(key);
        }
    }
}

fn deliver(transport: &dyn EventTransport, store: &StoreName, event: &PrefEvent) {
    let payload = match event.to_payload() {
        Ok(payload) => payload,
        Err(e) => {
            warn!(store = %store, key = %event.key, error = %e, "Event could not be encoded");
            return;
        }
    };
    match transport.send(&payload) {
        Ok(receivers) => trace!(store = %store, key = %event.key, receivers, "Event published"),
        Err(e) => warn!(
            store = %store,
            key = %event.key,
            version = event.version,
            error = %e,
            "Event delivery failed"
        ),
    }
}
