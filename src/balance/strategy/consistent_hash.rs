//! Consistent-hash selection.

use crate::backend::Backend;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

const DEFAULT_VIRTUAL_NODES: usize = 100;

/// Hash-ring selection keyed by client identity.
///
/// Each backend contributes `virtual_nodes` ring positions hashed from
/// `"<url>#<index>"` with CRC32-IEEE. A selection walks the sorted ring
/// to the first position at or past the current key hash, wrapping to
/// the start. Ring snapshots are immutable and swapped atomically, so
/// readers never lock; rebuilds serialize on an internal mutex.
pub struct ConsistentHash {
    virtual_nodes: usize,
    ring: ArcSwap<RingSnapshot>,
    rebuild_lock: Mutex<()>,
    key_hash: AtomicU32,
}

struct RingSnapshot {
    /// Ring positions, sorted ascending.
    positions: Vec<u32>,
    /// Position -> owning backend. On a position collision the later
    /// insertion wins.
    owners: HashMap<u32, Arc<Backend>>,
}

impl RingSnapshot {
    fn empty() -> Self {
        Self {
            positions: Vec::new(),
            owners: HashMap::new(),
        }
    }

    fn build(backends: &[Arc<Backend>], virtual_nodes: usize) -> Self {
        let mut snapshot = Self {
            positions: Vec::with_capacity(backends.len() * virtual_nodes),
            owners: HashMap::with_capacity(backends.len() * virtual_nodes),
        };

        for backend in backends {
            for i in 0..virtual_nodes {
                let key = format!("{}#{}", backend.url_str(), i);
                let hash = crc32fast::hash(key.as_bytes());

                snapshot.positions.push(hash);
                snapshot.owners.insert(hash, Arc::clone(backend));
            }
        }

        snapshot.positions.sort_unstable();
        snapshot.positions.dedup();
        snapshot
    }

    fn lookup(&self, hash: u32) -> Option<Arc<Backend>> {
        if self.positions.is_empty() {
            return None;
        }

        let idx = self.positions.partition_point(|&p| p < hash);
        let position = if idx == self.positions.len() {
            self.positions[0]
        } else {
            self.positions[idx]
        };

        self.owners.get(&position).map(Arc::clone)
    }

    fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl ConsistentHash {
    pub fn new(virtual_nodes: usize) -> Self {
        let virtual_nodes = if virtual_nodes == 0 {
            DEFAULT_VIRTUAL_NODES
        } else {
            virtual_nodes
        };

        Self {
            virtual_nodes,
            ring: ArcSwap::from_pointee(RingSnapshot::empty()),
            rebuild_lock: Mutex::new(()),
            key_hash: AtomicU32::new(0),
        }
    }

    /// Set the key hashed for subsequent selections.
    pub fn set_key(&self, key: &str) {
        self.key_hash
            .store(crc32fast::hash(key.as_bytes()), Ordering::Relaxed);
    }

    pub fn select(&self, candidates: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        let mut ring = self.ring.load_full();

        if ring.is_empty() {
            let _guard = self
                .rebuild_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            // Another caller may have built the ring while we waited.
            ring = self.ring.load_full();
            if ring.is_empty() {
                ring = Arc::new(RingSnapshot::build(candidates, self.virtual_nodes));
                self.ring.store(Arc::clone(&ring));
            }
        }

        ring.lookup(self.key_hash.load(Ordering::Relaxed))
    }

    /// Replace the ring with one built from the given backends.
    pub fn rebuild(&self, backends: &[Arc<Backend>]) {
        let _guard = self
            .rebuild_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        self.ring
            .store(Arc::new(RingSnapshot::build(backends, self.virtual_nodes)));
    }
}
