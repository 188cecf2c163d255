//! Host-side broadcast registry: registered client connections and fan-out.
//!
//! The membership lock is held only to snapshot and to prune. Each member has
//! its own writer task, so a broadcast only queues the line per member and a
//! stuck peer cannot stall delivery to the others.

use std::collections::BTreeMap;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::connection::{ConnectionHandle, ConnectionId};

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members the line was queued for.
    pub delivered: usize,
    /// Members whose send failed; removed from the registry.
    pub pruned: Vec<ConnectionId>,
}

#[derive(Default)]
pub struct BroadcastRegistry {
    members: Mutex<BTreeMap<ConnectionId, ConnectionHandle>>,
}

impl BroadcastRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handshaked connection. Returns false if it was already registered.
    pub async fn register(&self, handle: ConnectionHandle) -> bool {
        let mut members = self.members.lock().await;
        if members.contains_key(&handle.id()) {
            return false;
        }
        debug!(peer = %handle.name(), id = %handle.id(), "registered");
        members.insert(handle.id(), handle);
        true
    }

    /// Remove a connection. Safe to call for unknown or already removed ids.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        self.members.lock().await.remove(&id).is_some()
    }

    /// Current members in registration order.
    pub async fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.members.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.members.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.lock().await.is_empty()
    }

    /// Queue `line` for every member of a snapshot, in registration order. A
    /// member that is already closed, for example after a failed write, is
    /// pruned from the live registry; the rest still get the line.
    pub async fn broadcast(&self, line: &str) -> BroadcastReport {
        let snapshot = self.snapshot().await;
        let mut report = BroadcastReport::default();
        if snapshot.is_empty() {
            warn!("no connected clients to broadcast to");
            return report;
        }
        let mut failed = Vec::new();
        for member in snapshot {
            match member.send(line) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(peer = %member.name(), id = %member.id(), error = %e, "broadcast failed, pruning");
                    failed.push(member);
                }
            }
        }
        if !failed.is_empty() {
            let mut members = self.members.lock().await;
            for member in &failed {
                members.remove(&member.id());
            }
        }
        for member in failed {
            report.pruned.push(member.id());
            member.close().await;
        }
        debug!(delivered = report.delivered, pruned = report.pruned.len(), "broadcast done");
        report
    }

    /// Empty the registry and close every member. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.members.lock().await);
        let n = drained.len();
        for member in drained.into_values() {
            member.close().await;
        }
        n
    }
}
