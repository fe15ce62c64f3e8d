//! Edit lock manager.
//!
//! Grants time-limited exclusive edit leases on single nodes. A lease is
//! renewed by its holder re-acquiring it (heartbeat) and lapses on its own
//! once `expires_at` has passed. Expiry is evaluated on every read, so no
//! background sweep is needed; [`EditLockManager::purge_expired`] only frees
//! memory.
//!
//! Acquisition never waits: it succeeds or reports the current holder at
//! once.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use scriptflow_core::error::{Result, ScriptflowError};
use scriptflow_core::id::{NodeId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Exclusive edit lease on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditLock {
    pub node_id: NodeId,
    pub holder: UserId,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Heartbeats since the lease was first granted
    pub renewal_count: u32,
}

impl EditLock {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Result of a lock acquisition attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockAcquisition {
    /// Lease granted on an unlocked or lapsed node
    Acquired(EditLock),
    /// Existing lease of the same holder extended
    Renewed(EditLock),
    /// Another holder has an unexpired lease
    Conflict {
        holder: UserId,
        expires_at: DateTime<Utc>,
    },
}

impl LockAcquisition {
    /// Convert a conflict into a `LockConflict` error
    pub fn into_result(self, node_id: &NodeId) -> Result<EditLock> {
        match self {
            Self::Acquired(lock) | Self::Renewed(lock) => Ok(lock),
            Self::Conflict { holder, expires_at } => Err(ScriptflowError::LockConflict {
                node_id: node_id.to_string(),
                holder,
                expires_at,
            }),
        }
    }
}

/// Lock statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStatistics {
    pub total_acquired: u64,
    pub total_renewed: u64,
    pub total_conflicts: u64,
    pub total_released: u64,
    /// Unexpired leases right now
    pub active_locks: usize,
}

/// Keyed, time-bounded edit leases
pub struct EditLockManager {
    locks: DashMap<NodeId, EditLock>,
    lease: ChronoDuration,
    acquired: AtomicU64,
    renewed: AtomicU64,
    conflicts: AtomicU64,
    released: AtomicU64,
}

impl EditLockManager {
    /// Create a lock manager granting leases of `lease` length
    pub fn new(lease: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            lease: ChronoDuration::from_std(lease).unwrap_or_else(|_| ChronoDuration::days(365)),
            acquired: AtomicU64::new(0),
            renewed: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    /// Length of a lease
    pub fn lease_duration(&self) -> ChronoDuration {
        self.lease
    }

    /// Acquire or renew the lease on `node_id` for `holder`
    pub fn acquire(&self, node_id: &NodeId, holder: &UserId) -> LockAcquisition {
        self.acquire_at(node_id, holder, Utc::now())
    }

    /// Acquire or renew as of `now`
    pub fn acquire_at(&self, node_id: &NodeId, holder: &UserId, now: DateTime<Utc>) -> LockAcquisition {
        let expires_at = now.checked_add_signed(self.lease).unwrap_or(DateTime::<Utc>::MAX_UTC);

        match self.locks.entry(node_id.clone()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get_mut();

                if current.is_active_at(now) && &current.holder != holder {
                    self.conflicts.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        "Lock conflict on node {}: held by {} until {}",
                        node_id, current.holder, current.expires_at
                    );
                    return LockAcquisition::Conflict {
                        holder: current.holder.clone(),
                        expires_at: current.expires_at,
                    };
                }

                if current.is_active_at(now) {
                    current.expires_at = expires_at;
                    current.renewal_count += 1;
                    self.renewed.fetch_add(1, Ordering::Relaxed);
                    return LockAcquisition::Renewed(current.clone());
                }

                debug!(
                    "Lease of {} on node {} lapsed at {}, granting to {}",
                    current.holder, node_id, current.expires_at, holder
                );
                *current = self.new_lock(node_id, holder, now, expires_at);
                self.acquired.fetch_add(1, Ordering::Relaxed);
                LockAcquisition::Acquired(current.clone())
            }
            Entry::Vacant(entry) => {
                let lock = self.new_lock(node_id, holder, now, expires_at);
                entry.insert(lock.clone());
                self.acquired.fetch_add(1, Ordering::Relaxed);
                debug!("Lock acquired on node {} by {}", node_id, holder);
                LockAcquisition::Acquired(lock)
            }
        }
    }

    fn new_lock(
        &self,
        node_id: &NodeId,
        holder: &UserId,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> EditLock {
        EditLock {
            node_id: node_id.clone(),
            holder: holder.clone(),
            acquired_at: now,
            expires_at,
            renewal_count: 0,
        }
    }

    /// Release the lease if `holder` has it; otherwise nothing happens
    pub fn release(&self, node_id: &NodeId, holder: &UserId) -> bool {
        let removed = self
            .locks
            .remove_if(node_id, |_, lock| &lock.holder == holder)
            .is_some();

        if removed {
            self.released.fetch_add(1, Ordering::Relaxed);
            debug!("Lock released on node {} by {}", node_id, holder);
        }
        removed
    }

    /// Drop any lease on a node regardless of holder
    pub fn forget(&self, node_id: &NodeId) {
        self.locks.remove(node_id);
    }

    /// Current unexpired lease on a node
    pub fn status(&self, node_id: &NodeId) -> Option<EditLock> {
        self.status_at(node_id, Utc::now())
    }

    pub fn status_at(&self, node_id: &NodeId, now: DateTime<Utc>) -> Option<EditLock> {
        self.locks
            .get(node_id)
            .filter(|lock| lock.is_active_at(now))
            .map(|lock| lock.value().clone())
    }

    /// Fail with `LockConflict` if someone other than `editor` holds the node
    pub fn ensure_editable(&self, node_id: &NodeId, editor: &UserId) -> Result<()> {
        self.ensure_editable_at(node_id, editor, Utc::now())
    }

    pub fn ensure_editable_at(&self, node_id: &NodeId, editor: &UserId, now: DateTime<Utc>) -> Result<()> {
        match self.status_at(node_id, now) {
            Some(lock) if &lock.holder != editor => Err(ScriptflowError::LockConflict {
                node_id: node_id.to_string(),
                holder: lock.holder,
                expires_at: lock.expires_at,
            }),
            _ => Ok(()),
        }
    }

    /// All unexpired leases, ordered by node
    pub fn active_locks(&self) -> Vec<EditLock> {
        self.active_locks_at(Utc::now())
    }

    pub fn active_locks_at(&self, now: DateTime<Utc>) -> Vec<EditLock> {
        let mut locks: Vec<EditLock> = self
            .locks
            .iter()
            .filter(|entry| entry.value().is_active_at(now))
            .map(|entry| entry.value().clone())
            .collect();
        locks.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        locks
    }

    /// Remove lapsed leases; returns how many were dropped
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| lock.is_active_at(now));
        let purged = before.saturating_sub(self.locks.len());
        if purged > 0 {
            info!("Purged {} expired edit locks", purged);
        }
        purged
    }

    pub fn statistics(&self) -> LockStatistics {
        LockStatistics {
            total_acquired: self.acquired.load(Ordering::Relaxed),
            total_renewed: self.renewed.load(Ordering::Relaxed),
            total_conflicts: self.conflicts.load(Ordering::Relaxed),
            total_released: self.released.load(Ordering::Relaxed),
            active_locks: self.active_locks().len(),
        }
    }
}
