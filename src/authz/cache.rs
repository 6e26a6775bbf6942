//! Effective-role cache.
//!
//! Entries have no TTL. Whoever mutates role assignments, role permission
//! sets, or parent links must call `invalidate` (usually through
//! `AuthzEngine::invalidate_cache`); until then a cached entry may be stale.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoleCacheKey {
    pub actor_id: String,
    pub domain: Option<String>,
}

impl RoleCacheKey {
    pub fn new(actor_id: &str, domain: Option<&str>) -> Self {
        Self {
            actor_id: actor_id.to_string(),
            domain: domain.map(str::to_string),
        }
    }
}

pub type RoleSet = Arc<BTreeSet<String>>;

pub trait RoleCache: Send + Sync {
    fn get(&self, key: &RoleCacheKey) -> Option<RoleSet>;

    fn set(&self, key: RoleCacheKey, roles: RoleSet);

    /// Drop every entry for `actor_id` (all domains), or everything on `None`.
    fn invalidate(&self, actor_id: Option<&str>);
}

/// Never stores anything; every lookup recomputes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRoleCache;

impl RoleCache for NoopRoleCache {
    fn get(&self, _key: &RoleCacheKey) -> Option<RoleSet> {
        None
    }

    fn set(&self, _key: RoleCacheKey, _roles: RoleSet) {}

    fn invalidate(&self, _actor_id: Option<&str>) {}
}

/// Overwrite-on-write map. Concurrent misses for the same key may compute the
/// value twice; both writes store the same set.
#[derive(Debug, Default)]
pub struct MemoryRoleCache {
    entries: RwLock<HashMap<RoleCacheKey, RoleSet>>,
}

impl MemoryRoleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl RoleCache for MemoryRoleCache {
    fn get(&self, key: &RoleCacheKey) -> Option<RoleSet> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: RoleCacheKey, roles: RoleSet) {
        self.entries.write().insert(key, roles);
    }

    fn invalidate(&self, actor_id: Option<&str>) {
        let mut entries = self.entries.write();
        match actor_id {
            Some(actor_id) => entries.retain(|key, _| key.actor_id != actor_id),
            None => entries.clear(),
        }
    }
}
