//! Time-boxed persistence of the totals aggregate.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::models::{now_ms, TotalsSnapshot, TOTALS_CACHE_KEY};
use crate::store::{load_json, save_json, KeyValueStore};

/// How long a completed totals walk stays authoritative.
pub const TOTALS_TTL: Duration = Duration::from_secs(10 * 60);

pub struct TotalsCache<S> {
    store: Arc<S>,
    ttl: Duration,
}

impl<S: KeyValueStore> TotalsCache<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            ttl: TOTALS_TTL,
        }
    }

    /// Returns the persisted snapshot if it is still fresh.
    pub fn load(&self) -> Option<TotalsSnapshot> {
        self.load_at(now_ms())
    }

    /// Same as [`load`](Self::load) against an explicit clock reading.
    pub fn load_at(&self, now: u64) -> Option<TotalsSnapshot> {
        let snapshot: TotalsSnapshot = match load_json(&*self.store, TOTALS_CACHE_KEY) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "could not read totals cache");
                return None;
            }
        };
        let age = now.saturating_sub(snapshot.timestamp);
        if age > self.ttl.as_millis() as u64 {
            debug!(age_ms = age, "cached totals are stale");
            return None;
        }
        Some(snapshot)
    }

    /// Replaces whatever was cached before.
    pub fn save(&self, snapshot: &TotalsSnapshot) -> Result<(), StoreError> {
        save_json(&*self.store, TOTALS_CACHE_KEY, snapshot)
    }
}
