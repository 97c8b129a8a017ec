//! In-process fan-out between facades of one store.
//!
//! Facades opened on the same store through the same registry share a
//! [`PeerSet`]. After a commit the writer hands its events to every other
//! member before the commit returns, so a sibling's cache is never older
//! than the last transaction committed in this process.

use binprefs_core::{PrefEvent, PrefKey};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::trace;
use uuid::Uuid;

/// Receives changes committed by another facade of the same store.
pub trait PeerSink: Send + Sync {
    fn on_peer_event(&self, event: &PrefEvent);

    /// A peer's commit failed part way; these keys may or may not have
    /// changed on disk.
    fn on_peer_invalidate(&self, keys: &[PrefKey]);
}

/// Weakly held members of one store, keyed by origin.
#[derive(Default)]
pub struct PeerSet {
    members: Mutex<Vec<(Uuid, Weak<dyn PeerSink>)>>,
}

impl fmt::Debug for PeerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSet")
            .field("members", &self.len())
            .finish()
    }
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `sink` under `origin`. It leaves when the sink is dropped.
    pub fn join(&self, origin: Uuid, sink: Weak<dyn PeerSink>) {
        let mut members = self.members.lock();
        members.retain(|(_, weak)| weak.strong_count() > 0);
        members.push((origin, sink));
        trace!(origin = %origin, members = members.len(), "Peer joined");
    }

    /// Whether `origin` is a live member.
    pub fn contains(&self, origin: &Uuid) -> bool {
        self.members
            .lock()
            .iter()
            .any(|(id, weak)| id == origin && weak.strong_count() > 0)
    }

    pub fn len(&self) -> usize {
        self.members
            .lock()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `events` to every member except `from`. Returns how many
    /// members received them.
    pub fn broadcast(&self, from: Uuid, events: &[PrefEvent]) -> usize {
        let others = self.others(from);
        for peer in &others {
            for event in events {
                peer.on_peer_event(event);
            }
        }
        others.len()
    }

    /// Tell every member except `from` to re-read `keys` from disk.
    pub fn invalidate(&self, from: Uuid, keys: &[PrefKey]) -> usize {
        let others = self.others(from);
        for peer in &others {
            peer.on_peer_invalidate(keys);
        }
        others.len()
    }

    // Upgraded outside delivery so a sink may join or query the set.
    fn others(&self, from: Uuid) -> Vec<Arc<dyn PeerSink>> {
        let mut members = self.members.lock();
        members.retain(|(_, weak)| weak.strong_count() > 0);
        members
            .iter()
            .filter(|(id, _)| *id != from)
            .filter_map(|(_, weak)| weak.upgrade())
            .collect()
    }
}
