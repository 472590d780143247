/*!
 * Failure counts per retry key.
 *
 * A requeued message may be redelivered to another consumer or expire in
 * the broker, so its count may never be cleared by this worker. Entries
 * therefore expire after `ttl` and the table never holds more than
 * `capacity` keys; the oldest entry is evicted first.
 */

use log::debug;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Keys remembered by default
pub const DEFAULT_CAPACITY: usize = 10_000;

/// How long a failure count is remembered by default
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy)]
struct Entry {
    count: u32,
    touched: Instant,
}

/// Bounded table of failure counts
#[derive(Debug)]
pub struct FailureLedger {
    entries: HashMap<String, Entry>,
    capacity: usize,
    ttl: Duration,
}

impl Default for FailureLedger {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

impl FailureLedger {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Count one more failure for `key` and return the new total
    pub fn record(&mut self, key: &str) -> u32 {
        let now = Instant::now();
        self.prune(now);

        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }

        let entry = self.entries.entry(key.to_string()).or_insert(Entry {
            count: 0,
            touched: now,
        });
        entry.count += 1;
        entry.touched = now;
        entry.count
    }

    /// Forget `key`
    pub fn clear(&mut self, key: &str) {
        self.entries.remove(key);
    }

    /// Failures remembered for `key`
    pub fn count(&self, key: &str) -> u32 {
        self.entries
            .get(key)
            .filter(|entry| entry.touched.elapsed() < self.ttl)
            .map_or(0, |entry| entry.count)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn prune(&mut self, now: Instant) {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, entry| now.duration_since(entry.touched) < ttl);
        let expired = before - self.entries.len();
        if expired > 0 {
            debug!("Forgot {} expired failure count(s)", expired);
        }
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.touched)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            debug!("Failure table full, forgetting {}", key);
            self.entries.remove(&key);
        }
    }
}
