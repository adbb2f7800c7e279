//! Echo suppression table
//!
//! Every message the bus publishes externally comes back from the broker if
//! the bus also subscribed to its topic. Local hooks already saw it, so the
//! echo must be dropped. The table maps a hash of (topic, wire bytes) to the
//! number of copies still awaiting their echo and the latest publish time;
//! each matching inbound message consumes one copy.
//!
//! Entries whose echo never arrives (no external subscription) are swept by
//! age. The table also has a hard capacity: when full, the oldest entry is
//! evicted. Only recording promotes an entry, so LRU order equals order of
//! last publish and a sweep can stop at the first entry that is young enough.

use lru::LruCache;
use parking_lot::Mutex;
use std::fmt;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Separator between topic and payload in the hashed key
const KEY_SEPARATOR: &str = "ǂ";

/// Hash of a (topic, wire bytes) pair
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct DedupKey([u8; 32]);

impl DedupKey {
    /// Key for `payload` published on `topic`
    pub fn new(topic: &str, payload: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(topic.as_bytes());
        hasher.update(KEY_SEPARATOR.as_bytes());
        hasher.update(payload);
        Self(*hasher.finalize().as_bytes())
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..8]))
    }
}

/// Outcome of [`DedupTable::record`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// New entry
    Inserted,
    /// Same message was already pending; one more copy is now awaited
    Refreshed,
    /// New entry, the oldest one had to go
    Evicted,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    copies: u32,
    at: Instant,
}

/// Bounded, age-swept table of published messages awaiting their echo
#[derive(Debug)]
pub struct DedupTable {
    entries: Mutex<LruCache<DedupKey, Pending>>,
    max_age: Duration,
}

impl DedupTable {
    /// Create a table holding at most `capacity` entries
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            max_age,
        }
    }

    /// Record a message just published
    pub fn record(&self, key: DedupKey) -> Recorded {
        self.record_at(key, Instant::now())
    }

    fn record_at(&self, key: DedupKey, now: Instant) -> Recorded {
        let mut entries = self.entries.lock();
        if let Some(pending) = entries.get_mut(&key) {
            pending.copies = pending.copies.saturating_add(1);
            pending.at = now;
            return Recorded::Refreshed;
        }
        match entries.push(key, Pending { copies: 1, at: now }) {
            None => Recorded::Inserted,
            Some((old, _)) => {
                trace!(evicted = %old, "dedup table full");
                Recorded::Evicted
            }
        }
    }

    /// Consume one pending copy of `key`, returning whether there was one
    ///
    /// A pending copy means the message is the echo of our own publish.
    pub fn take(&self, key: &DedupKey) -> bool {
        let mut entries = self.entries.lock();
        let Some(pending) = entries.peek_mut(key) else {
            return false;
        };
        pending.copies -= 1;
        if pending.copies == 0 {
            entries.pop(key);
        }
        true
    }

    /// Copies of `key` still awaiting their echo
    pub fn pending(&self, key: &DedupKey) -> u32 {
        self.entries.lock().peek(key).map_or(0, |p| p.copies)
    }

    /// Drop every entry older than the age bound at `now`
    ///
    /// Returns the number of entries removed.
    pub fn expire(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let mut removed = 0;
        while let Some((_, pending)) = entries.peek_lru() {
            if now.saturating_duration_since(pending.at) <= self.max_age {
                break;
            }
            entries.pop_lru();
            removed += 1;
        }
        removed
    }

    /// Number of distinct pending messages
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True if no entry is pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hard capacity
    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    /// Age bound
    pub fn max_age(&self) -> Duration {
        self.max_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_separates_topic_and_payload() {
        let a = DedupKey::new("ab", b"c");
        let b = DedupKey::new("a", b"bc");
        assert_ne!(a, b);
        assert_eq!(a, DedupKey::new("ab", b"c"));
        assert_eq!(a.to_string().len(), 16);
    }

    #[test]
    fn test_take_is_idempotent() {
        let table = DedupTable::new(10, Duration::from_secs(600));
        let key = DedupKey::new("rfm69/rx", &[1, 2, 3]);
        assert_eq!(table.record(key), Recorded::Inserted);
        assert!(table.take(&key));
        assert!(!table.take(&key));
        assert!(table.is_empty());
    }

    #[test]
    fn test_record_twice_awaits_two_echoes() {
        let table = DedupTable::new(10, Duration::from_secs(600));
        let key = DedupKey::new("t", b"x");
        table.record(key);
        assert_eq!(table.record(key), Recorded::Refreshed);
        assert_eq!(table.len(), 1);
        assert_eq!(table.pending(&key), 2);

        assert!(table.take(&key));
        assert_eq!(table.pending(&key), 1);
        assert!(table.take(&key));
        assert!(!table.take(&key));
        assert!(table.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let table = DedupTable::new(2, Duration::from_secs(600));
        let keys: Vec<_> = (0u8..3).map(|i| DedupKey::new("t", &[i])).collect();
        table.record(keys[0]);
        table.record(keys[1]);
        assert_eq!(table.record(keys[2]), Recorded::Evicted);
        assert_eq!(table.len(), 2);
        assert!(!table.take(&keys[0]));
        assert!(table.take(&keys[1]));
    }

    #[test]
    fn test_expire_by_age() {
        let table = DedupTable::new(10, Duration::from_secs(600));
        let start = Instant::now();
        let old = DedupKey::new("t", b"old");
        let young = DedupKey::new("t", b"young");
        table.record_at(old, start);
        table.record_at(young, start + Duration::from_secs(300));

        assert_eq!(table.expire(start + Duration::from_secs(600)), 0);
        assert_eq!(table.expire(start + Duration::from_secs(601)), 1);
        assert!(table.take(&young));
        assert!(!table.take(&old));
    }

    #[test]
    fn test_refresh_moves_entry_to_young_end() {
        let table = DedupTable::new(10, Duration::from_secs(60));
        let start = Instant::now();
        let a = DedupKey::new("t", b"a");
        let b = DedupKey::new("t", b"b");
        table.record_at(a, start);
        table.record_at(b, start + Duration::from_secs(10));
        table.record_at(a, start + Duration::from_secs(20));

        // only b is past the bound
        assert_eq!(table.expire(start + Duration::from_secs(75)), 1);
        assert!(table.take(&a));
    }
}
