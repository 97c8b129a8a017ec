//! binprefs Events - Cross-Instance Change Propagation
//!
//! After a local commit the facade hands the resulting [`PrefEvent`]s to an
//! [`EventBridge`], which ships them through an [`EventTransport`]. Bridges
//! of other store instances fold them into their caches with version-stamped
//! last-writer-wins and notify their [`ListenerRegistry`].
//!
//! [`PrefEvent`]: binprefs_core::PrefEvent

pub mod bridge;
pub mod listeners;
pub mod transport;

pub use bridge::{EventBridge, Receipt};
pub use listeners::{ChangeListener, ListenerId, ListenerRegistry};
pub use transport::{
    BroadcastTransport, EventTransport, NoopTransport, PayloadSink, Subscription, TransportError,
    DEFAULT_CHANNEL_CAPACITY,
};
