//! Consistent-hash routing of RPC keys onto the worker set.
//!
//! The gateway maps a routing key (the internal job id) to one worker IP.
//! A hash ring with virtual nodes keeps the mapping stable: for a fixed
//! worker set the result is deterministic, and adding or removing one worker
//! reassigns roughly 1/N of the keys.

use std::collections::BTreeMap;
use std::hash::{DefaultHasher, Hash, Hasher};

/// Virtual nodes per worker. Higher counts smooth the distribution at the
/// cost of ring size; 160 is the conventional ring-hash default.
const VIRTUAL_NODES: u32 = 160;

/// Ring-hash router over a static worker set.
#[derive(Debug, Clone)]
pub struct HashRouter {
    ring: BTreeMap<u64, String>,
}

impl HashRouter {
    /// Build a router over the given worker identifiers (typically IPs).
    /// Membership is fixed for the life of the router; a change requires
    /// rebuilding it (the gateway restarts).
    pub fn new<I, S>(workers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ring = BTreeMap::new();
        for worker in workers {
            let worker = worker.into();
            if worker.is_empty() {
                continue;
            }
            for replica in 0..VIRTUAL_NODES {
                let point = hash_of(&(worker.as_str(), replica));
                ring.insert(point, worker.clone());
            }
        }
        Self { ring }
    }

    /// The worker owning `key`, or None when the worker set is empty.
    /// Deterministic for a fixed worker set.
    pub fn worker_for(&self, key: &str) -> Option<&str> {
        if self.ring.is_empty() {
            return None;
        }
        let point = hash_of(&key);
        self.ring
            .range(point..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, worker)| worker.as_str())
    }

    /// Number of distinct workers on the ring.
    pub fn len(&self) -> usize {
        let mut workers: Vec<&str> = self.ring.values().map(String::as_str).collect();
        workers.sort_unstable();
        workers.dedup();
        workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

fn hash_of<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}
