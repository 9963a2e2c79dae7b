//! Peer registry: session index to endpoint mapping
//!
//! Maps the 32-bit sender indices observed in WireGuard headers to the
//! endpoints those packets arrived from. The latest observation always
//! wins, which is how peer roaming propagates without any coordination.
//! Entries are never evicted; a peer that moves simply overwrites its
//! own binding with its next packet.

use log::debug;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::endpoint::Endpoint;

/// Thread-safe index → endpoint map
///
/// Reads happen on every forwarded packet, writes on every observed
/// sender index. All operations are atomic with respect to each other;
/// `all_except` enumerates under a single read guard so the returned
/// snapshot is consistent.
pub struct Registry {
    peers: RwLock<HashMap<u32, Endpoint>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Associate a peer index with an endpoint. Replaces any existing
    /// binding for the index; repeating an identical registration is a
    /// no-op in effect.
    pub fn register(&self, index: u32, endpoint: Endpoint) {
        let mut peers = self.peers.write().expect("registry lock poisoned");
        let replaced = peers.insert(index, endpoint);
        if replaced.is_none() {
            debug!("registered peer index {:#010x}", index);
        }
    }

    /// Endpoint last observed for `index`, if any
    pub fn lookup(&self, index: u32) -> Option<Endpoint> {
        let peers = self.peers.read().expect("registry lock poisoned");
        peers.get(&index).cloned()
    }

    /// Remove a peer. Safe to call for an unknown index.
    pub fn remove(&self, index: u32) {
        let mut peers = self.peers.write().expect("registry lock poisoned");
        peers.remove(&index);
    }

    /// Number of registered peers
    pub fn count(&self) -> usize {
        let peers = self.peers.read().expect("registry lock poisoned");
        peers.len()
    }

    /// Consistent snapshot of every endpoint that does not compare equal
    /// to `source`. Multiple indices mapping to the same endpoint yield
    /// that endpoint multiple times, one per index.
    pub fn all_except(&self, source: &Endpoint) -> Vec<Endpoint> {
        let peers = self.peers.read().expect("registry lock poisoned");
        peers
            .values()
            .filter(|endpoint| *endpoint != source)
            .cloned()
            .collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
