use chrono::{DateTime, Utc};
use log::debug;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// A utilization value in [0, 1] and the wall-clock time it was observed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UtilizationReading {
    pub value: f64,
    pub observed_at: DateTime<Utc>,
}

impl UtilizationReading {
    fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.observed_at)
    }
}

/// Per-chute utilization readings with a fixed time-to-live.
///
/// Stale entries are dropped lazily by the lookup that finds them; there is no
/// background sweep and no size bound (keys are the configured deployments).
pub struct UtilizationCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, UtilizationReading>>,
}

impl UtilizationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, chute_id: &str) -> Option<f64> {
        self.get_at(chute_id, Utc::now())
    }

    pub fn put(&self, chute_id: &str, value: f64) {
        self.put_at(chute_id, value, Utc::now());
    }

    /// Fresh value for `chute_id` as seen at `now`, evicting a stale entry.
    pub fn get_at(&self, chute_id: &str, now: DateTime<Utc>) -> Option<f64> {
        let reading = *self.read().get(chute_id)?;
        let age = reading.age(now);

        if self.is_fresh(age) {
            debug!(
                "Cache hit for {}, age={:.1}s, util={}",
                chute_id,
                age.num_milliseconds() as f64 / 1000.0,
                reading.value
            );
            return Some(reading.value);
        }

        debug!(
            "Cache expired for {}, age={:.1}s",
            chute_id,
            age.num_milliseconds() as f64 / 1000.0
        );
        let mut entries = self.write();
        // A concurrent put may have refreshed the entry since we looked.
        if entries
            .get(chute_id)
            .map_or(false, |current| current.observed_at == reading.observed_at)
        {
            entries.remove(chute_id);
        }
        None
    }

    pub fn put_at(&self, chute_id: &str, value: f64, now: DateTime<Utc>) {
        self.write().insert(
            chute_id.to_string(),
            UtilizationReading {
                value,
                observed_at: now,
            },
        );
        debug!("Cached utilization for {}: {}", chute_id, value);
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn is_fresh(&self, age: chrono::Duration) -> bool {
        match age.to_std() {
            Ok(age) => age <= self.ttl,
            // Negative age: observed "in the future" after a clock step back.
            Err(_) => true,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, UtilizationReading>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, UtilizationReading>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
