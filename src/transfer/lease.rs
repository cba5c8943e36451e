//! Per-id exclusive transfer leases
//!
//! A lease grants one pusher the right to append content for a message id.
//! Leases are non-reentrant, released when the guard drops, and reclaimable by
//! another pusher once they have been idle for longer than the timeout.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct LeaseEntry {
    holder: Uuid,
    peer: String,
    offset: u64,
    deadline: Instant,
    committing: bool,
}

/// Snapshot of a live lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseInfo {
    pub id: String,
    pub peer: String,
    pub offset: u64,
    pub committing: bool,
}

#[derive(Debug)]
pub struct LeaseTable {
    leases: DashMap<String, LeaseEntry>,
    idle_timeout: Duration,
}

impl LeaseTable {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            leases: DashMap::new(),
            idle_timeout,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Take the lease for `id` on behalf of `peer`.
    ///
    /// Fails with the time remaining until the current holder's lease lapses.
    pub fn acquire(
        self: &Arc<Self>,
        id: &str,
        peer: &str,
        offset: u64,
    ) -> Result<LeaseGuard, Duration> {
        let now = Instant::now();
        let entry = LeaseEntry {
            holder: Uuid::new_v4(),
            peer: peer.to_string(),
            offset,
            deadline: now + self.idle_timeout,
            committing: false,
        };
        let holder = entry.holder;

        match self.leases.entry(id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                if current.deadline > now {
                    return Err(current.deadline - now);
                }
                debug!(id, previous = %current.peer, peer, "reclaiming idle lease");
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }

        debug!(id, peer, offset, "lease acquired");
        crate::metrics::set_active_leases(self.leases.len());

        Ok(LeaseGuard {
            table: Arc::clone(self),
            id: id.to_string(),
            holder,
        })
    }

    /// Release every lease whose holder made no progress within the timeout.
    /// Partial content is left in place.
    pub fn reap_idle(&self) -> Vec<String> {
        let now = Instant::now();
        let mut reaped = Vec::new();
        self.leases.retain(|id, lease| {
            if lease.deadline <= now {
                reaped.push(id.clone());
                false
            } else {
                true
            }
        });

        if !reaped.is_empty() {
            debug!(count = reaped.len(), "reaped idle leases");
            crate::metrics::set_active_leases(self.leases.len());
        }
        reaped
    }

    pub fn active(&self) -> usize {
        self.leases.len()
    }

    /// Whether a live lease is held for `id`
    pub fn is_leased(&self, id: &str) -> bool {
        self.leases
            .get(id)
            .map(|lease| lease.deadline > Instant::now())
            .unwrap_or(false)
    }

    pub fn info(&self, id: &str) -> Option<LeaseInfo> {
        self.leases.get(id).map(|lease| LeaseInfo {
            id: id.to_string(),
            peer: lease.peer.clone(),
            offset: lease.offset,
            committing: lease.committing,
        })
    }
}

/// Scoped ownership of a lease; dropping it releases the lease if still held
#[derive(Debug)]
pub struct LeaseGuard {
    table: Arc<LeaseTable>,
    id: String,
    holder: Uuid,
}

impl LeaseGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// False once the lease was reaped or reclaimed by another pusher
    pub fn is_held(&self) -> bool {
        self.table
            .leases
            .get(&self.id)
            .map(|lease| lease.holder == self.holder)
            .unwrap_or(false)
    }

    /// Record progress and push the idle deadline out
    pub fn advance(&self, offset: u64) -> bool {
        match self.table.leases.get_mut(&self.id) {
            Some(mut lease) if lease.holder == self.holder => {
                lease.offset = offset;
                lease.deadline = Instant::now() + self.table.idle_timeout;
                true
            }
            _ => false,
        }
    }

    pub fn mark_committing(&self) -> bool {
        match self.table.leases.get_mut(&self.id) {
            Some(mut lease) if lease.holder == self.holder => {
                lease.committing = true;
                true
            }
            _ => false,
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let holder = self.holder;
        if self
            .table
            .leases
            .remove_if(&self.id, |_, lease| lease.holder == holder)
            .is_some()
        {
            debug!(id = %self.id, "lease released");
            crate::metrics::set_active_leases(self.table.leases.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_is_exclusive() {
        let table = Arc::new(LeaseTable::new(Duration::from_secs(60)));

        let guard = table.acquire("msg-1", "peer-a", 0).unwrap();
        let retry_after = table.acquire("msg-1", "peer-b", 0).unwrap_err();
        assert!(retry_after > Duration::ZERO);
        assert!(retry_after <= Duration::from_secs(60));

        // Same peer is refused as well
        assert!(table.acquire("msg-1", "peer-a", 0).is_err());

        // Other ids are independent
        let _other = table.acquire("msg-2", "peer-b", 0).unwrap();
        assert_eq!(table.active(), 2);

        drop(guard);
        assert!(!table.is_leased("msg-1"));
        assert!(table.acquire("msg-1", "peer-b", 0).is_ok());
    }

    #[test]
    fn test_idle_lease_reclaimed() {
        let table = Arc::new(LeaseTable::new(Duration::from_millis(20)));

        let stale = table.acquire("msg-1", "peer-a", 0).unwrap();
        std::thread::sleep(Duration::from_millis(40));

        let fresh = table.acquire("msg-1", "peer-b", 0).unwrap();
        assert!(!stale.is_held());
        assert!(!stale.advance(10));
        assert!(fresh.is_held());

        // Dropping the stale guard must not release the new holder
        drop(stale);
        assert!(fresh.is_held());
        assert_eq!(table.info("msg-1").unwrap().peer, "peer-b");
    }

    #[test]
    fn test_reap_idle() {
        let table = Arc::new(LeaseTable::new(Duration::from_millis(20)));

        let guard = table.acquire("msg-1", "peer-a", 0).unwrap();
        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(table.reap_idle(), vec!["msg-1".to_string()]);
        assert!(!guard.is_held());
        assert_eq!(table.active(), 0);
    }

    #[test]
    fn test_advance_extends_deadline() {
        let table = Arc::new(LeaseTable::new(Duration::from_millis(50)));

        let guard = table.acquire("msg-1", "peer-a", 0).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert!(guard.advance(128));
        std::thread::sleep(Duration::from_millis(30));

        assert!(table.reap_idle().is_empty());
        assert_eq!(table.info("msg-1").unwrap().offset, 128);
        assert!(guard.mark_committing());
        assert!(table.info("msg-1").unwrap().committing);
    }
}
