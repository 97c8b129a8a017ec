//! Version stamps for committed mutations.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Version of a committed entry. Zero means "loaded from disk, origin
/// unknown" and loses against every stamped version.
pub type Version = u64;

/// Hybrid wall-clock/logical clock.
///
/// Each stamp is `max(now in unix nanos, previous stamp + 1)`, so stamps from
/// one clock are strictly increasing even if the wall clock steps back, and
/// stamps from different processes order roughly by wall time.
#[derive(Debug, Default)]
pub struct VersionClock {
    last: AtomicU64,
}

impl VersionClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the next stamp.
    pub fn next(&self) -> Version {
        let now = wall_nanos();
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let candidate = now.max(last.saturating_add(1));
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }

    /// Advance past a version observed from elsewhere.
    pub fn observe(&self, version: Version) {
        self.last.fetch_max(version, Ordering::AcqRel);
    }

    pub fn last(&self) -> Version {
        self.last.load(Ordering::Acquire)
    }
}

fn wall_nanos() -> u64 {
    Utc::now()
        .timestamp_nanos_opt()
        .map(|n| n.max(0) as u64)
        .unwrap_or(0)
}
