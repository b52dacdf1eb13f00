//! Transaction-scoped exclusive locks.
//!
//! Locks are keyed by the first eight bytes of a BLAKE3 digest of a textual
//! key, so any string identity (a canonical id, a relationship triple, a
//! multiplicity side) maps to a stable numeric key. Transactions acquire their
//! keys in ascending order and hold them until commit or drop.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use strata_core::CanonicalId;

/// Numeric lock key.
pub type LockKey = u64;

/// Stable key for an arbitrary textual identity.
pub fn lock_key(identity: &str) -> LockKey {
    let digest = blake3::hash(identity.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

/// Lock key for a logical object.
pub fn object_key(canonical_id: CanonicalId) -> LockKey {
    lock_key(&format!("object:{canonical_id}"))
}

/// Lock key for the `(type, src, dst)` identity of a relationship.
pub fn triple_key(rel_type: &str, src: CanonicalId, dst: CanonicalId) -> LockKey {
    lock_key(&format!("rel-triple:{rel_type}:{src}:{dst}"))
}

/// Lock key for one endpoint side of a `one`-multiplicity relationship type.
pub fn side_key(rel_type: &str, side: &str, endpoint: CanonicalId) -> LockKey {
    lock_key(&format!("rel-one:{rel_type}:{side}:{endpoint}"))
}

/// Registry of per-key async mutexes. Entries are created on demand and
/// pruned once nobody holds or awaits them.
#[derive(Default)]
pub(crate) struct LockTable {
    slots: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

impl LockTable {
    fn slot(&self, key: LockKey) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.slots.lock().entry(key).or_default())
    }

    pub(crate) async fn acquire(&self, key: LockKey) -> OwnedMutexGuard<()> {
        self.slot(key).lock_owned().await
    }

    /// Drop the slot for `key` if no guard or waiter references it.
    pub(crate) fn prune(&self, key: LockKey) {
        let mut slots = self.slots.lock();
        if slots
            .get(&key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&key);
        }
    }

    /// Number of live slots.
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_stable_and_distinct() {
        let id = CanonicalId::new();
        assert_eq!(object_key(id), object_key(id));
        assert_ne!(object_key(id), object_key(CanonicalId::new()));

        let other = CanonicalId::new();
        assert_ne!(
            side_key("OWNED_BY", "src", id),
            side_key("OWNED_BY", "dst", id)
        );
        assert_ne!(triple_key("DEPENDS_ON", id, other), triple_key("DEPENDS_ON", other, id));
    }

    #[tokio::test]
    async fn slots_are_pruned_after_release() {
        let table = LockTable::default();
        let key = lock_key("object:x");
        let guard = table.acquire(key).await;
        assert_eq!(table.len(), 1);
        table.prune(key);
        assert_eq!(table.len(), 1);
        drop(guard);
        table.prune(key);
        assert_eq!(table.len(), 0);
    }
}
