//! The ranked peer set behind tx and chunk fan-out.
//!
//! Peers come from the trusted node's `/peers` list. Each candidate is
//! pinged for its tip height and round-trip time; the registry keeps the
//! best `max_peers` ranked by `(height desc, rtt asc)`. Peers that fail
//! repeatedly are dropped until the next refresh.

use parking_lot::RwLock;
use std::time::Duration;

/// Consecutive failures after which a peer is dropped from the ranking.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// A ranked peer candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    /// Base URL of the peer, e.g. `http://159.65.10.2:1984`.
    pub url: String,
    /// Tip height the peer reported when pinged.
    pub height: u64,
    /// Observed round-trip time of the ping.
    pub rtt: Duration,
}

#[derive(Debug)]
struct Ranked {
    entry: PeerEntry,
    failures: u32,
}

/// Thread-safe registry of ranked peers.
#[derive(Debug)]
pub struct PeerRegistry {
    peers: RwLock<Vec<Ranked>>,
    max_peers: usize,
}

impl PeerRegistry {
    /// Create a registry keeping at most `max_peers` entries.
    #[must_use]
    pub fn new(max_peers: usize) -> Self {
        Self {
            peers: RwLock::new(Vec::new()),
            max_peers,
        }
    }

    /// Replace the peer set with freshly pinged candidates, re-ranking by
    /// `(height desc, rtt asc)` and keeping the best `max_peers`.
    pub fn replace(&self, mut entries: Vec<PeerEntry>) {
        entries.sort_by(|a, b| b.height.cmp(&a.height).then(a.rtt.cmp(&b.rtt)));
        entries.truncate(self.max_peers);

        let mut peers = self.peers.write();
        *peers = entries
            .into_iter()
            .map(|entry| Ranked { entry, failures: 0 })
            .collect();
    }

    /// The ranked peer URLs, best first.
    #[must_use]
    pub fn ranked(&self) -> Vec<String> {
        self.peers
            .read()
            .iter()
            .map(|p| p.entry.url.clone())
            .collect()
    }

    /// Record a failed request against a peer; the peer is dropped after
    /// [`MAX_CONSECUTIVE_FAILURES`] in a row.
    pub fn record_failure(&self, url: &str) {
        let mut peers = self.peers.write();
        if let Some(peer) = peers.iter_mut().find(|p| p.entry.url == url) {
            peer.failures += 1;
        }
        peers.retain(|p| p.failures < MAX_CONSECUTIVE_FAILURES);
    }

    /// Record a successful request, clearing the failure streak.
    pub fn record_success(&self, url: &str) {
        let mut peers = self.peers.write();
        if let Some(peer) = peers.iter_mut().find(|p| p.entry.url == url) {
            peer.failures = 0;
        }
    }

    /// Number of peers currently ranked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}
