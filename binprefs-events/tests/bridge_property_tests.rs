//! Property-Based Tests for the Event Bridge
//!
//! **Property 1: Convergence** - two bridges receiving the same remote
//! events in different orders end with the same cache state.
//!
//! **Property 2: Broadcast delivery** - every event published through a
//! `BroadcastTransport` reaches every other attached bridge.

use binprefs_core::{
    Codec, ConflictPolicy, PrefEvent, PrefKey, PrefValue, ShutdownPolicy, StoreName, VersionClock,
};
use binprefs_events::{BroadcastTransport, EventBridge, EventTransport, ListenerRegistry, NoopTransport};
use binprefs_storage::{CacheProvider, ConcurrentCacheProvider, IgnoreFailureHandler, StoreExecutor};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

// ============================================================================
// HELPERS
// ============================================================================

fn store() -> StoreName {
    StoreName::new("settings").unwrap()
}

fn bridge(transport: Arc<dyn EventTransport>) -> (Arc<EventBridge>, Arc<ConcurrentCacheProvider>) {
    let cache = Arc::new(ConcurrentCacheProvider::new());
    let bridge = Arc::new(EventBridge::new(
        store(),
        Uuid::new_v4(),
        Codec::default(),
        cache.clone(),
        Arc::new(VersionClock::new()),
        ConflictPolicy::LastWriterWins,
        transport,
        Arc::new(ListenerRegistry::new(store())),
    ));
    (bridge, cache)
}

fn event(key: u8, value: Option<i32>, version: u64, origin: Uuid) -> PrefEvent {
    let key = PrefKey::new(format!("k{key}")).unwrap();
    match value {
        Some(v) => {
            let bytes = Codec::default().encode(&PrefValue::Int(v)).unwrap();
            PrefEvent::updated(store(), key, bytes, version, origin)
        }
        None => PrefEvent::removed(store(), key, version, origin),
    }
}

fn events_strategy() -> impl Strategy<Value = Vec<(u8, Option<i32>)>> {
    prop::collection::vec((0u8..3, prop::option::of(any::<i32>())), 1..20)
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #[test]
    fn prop_bridges_converge_regardless_of_order(changes in events_strategy()) {
        let origin = Uuid::new_v4();
        let payloads: Vec<_> = changes
            .iter()
            .enumerate()
            .map(|(i, (k, v))| event(*k, *v, i as u64 + 1, origin).to_payload().unwrap())
            .collect();

        let (forward, forward_cache) = bridge(Arc::new(NoopTransport));
        let (backward, backward_cache) = bridge(Arc::new(NoopTransport));
        for payload in &payloads {
            forward.on_receive(payload);
        }
        for payload in payloads.iter().rev() {
            backward.on_receive(payload);
        }

        prop_assert_eq!(forward_cache.snapshot(), backward_cache.snapshot());
    }
}

#[test]
fn test_broadcast_reaches_other_bridges_only() {
    let transport: Arc<dyn EventTransport> = Arc::new(BroadcastTransport::new(64));
    let (publisher, publisher_cache) = bridge(Arc::clone(&transport));
    let (subscriber, subscriber_cache) = bridge(Arc::clone(&transport));
    let _pub_sub = publisher.attach().unwrap();
    let _sub_sub = subscriber.attach().unwrap();

    let executor = StoreExecutor::spawn(store(), ShutdownPolicy::Drain).unwrap();
    let events = vec![event(0, Some(1), 10, publisher.origin())];
    publisher
        .publish(events, &executor, Arc::new(IgnoreFailureHandler))
        .wait()
        .unwrap();

    let key = PrefKey::new("k0").unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while subscriber_cache.get(&key).is_none() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(subscriber_cache.get(&key), Some(PrefValue::Int(1)));
    assert_eq!(publisher_cache.get(&key), None);
}
