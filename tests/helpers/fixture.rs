use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rolegate::authz::{AuthzEngine, FixedClock, MemoryRoleCache, MemoryStore, RoleAssignment};
use rolegate::EngineSettings;

/// Tuesday 2026-06-02 14:30 UTC
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 2, 14, 30, 0).unwrap()
}

/// In-memory store plus engine constructors pinned to [`fixed_now`].
pub struct TestAuthz {
    store: Arc<MemoryStore>,
}

impl TestAuthz {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn assign(&self, actor_id: &str, role_id: &str) {
        self.store
            .assign_role(RoleAssignment::new(actor_id, role_id))
            .expect("Failed to assign role");
    }

    /// Engine with default settings and no role cache
    pub fn engine(&self) -> AuthzEngine {
        self.engine_with(EngineSettings::default())
    }

    pub fn engine_with(&self, settings: EngineSettings) -> AuthzEngine {
        AuthzEngine::new(self.store.clone(), settings).with_clock(Arc::new(FixedClock(fixed_now())))
    }

    /// Engine sharing the given role cache
    pub fn cached_engine(&self, cache: Arc<MemoryRoleCache>) -> AuthzEngine {
        self.engine().with_cache(cache)
    }
}
