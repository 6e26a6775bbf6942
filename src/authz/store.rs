//! Storage collaborator interface and an in-memory implementation.
//!
//! The engine only reads through [`AuthzStore`]. Absence is reported as
//! [`AuthzError::NotFound`]; anything else (`AuthzError::Storage`) is a backend
//! failure that the engine passes on to its caller.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;

use crate::authz::errors::{AuthzError, EntityKind};
use crate::authz::types::{Actor, Permission, Resource, Role, RoleAssignment};

pub trait AuthzStore: Send + Sync {
    fn get_actor(&self, id: &str) -> Result<Actor, AuthzError>;

    fn get_role(&self, id: &str) -> Result<Role, AuthzError>;

    fn get_permission(&self, id: &str) -> Result<Permission, AuthzError>;

    fn get_resource(&self, id: &str) -> Result<Resource, AuthzError>;

    /// Roles directly assigned to the actor, excluding expired assignments.
    /// With a domain, only assignments scoped to that domain count.
    fn get_direct_roles(&self, actor_id: &str, domain: Option<&str>) -> Result<Vec<Role>, AuthzError>;

    fn list_roles(&self, domain: Option<&str>) -> Result<Vec<Role>, AuthzError>;
}

#[derive(Debug, Default)]
struct Tables {
    actors: HashMap<String, Actor>,
    roles: HashMap<String, Role>,
    permissions: HashMap<String, Permission>,
    resources: HashMap<String, Resource>,
    assignments: Vec<RoleAssignment>,
}

/// Thread-safe in-memory store.
///
/// Records are stored as given; hierarchy and condition validation belong to
/// the caller (`RoleHierarchyResolver::validate_hierarchy`,
/// `PolicyEvaluator::validate_conditions`).
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an actor.
    pub fn put_actor(&self, actor: Actor) {
        self.tables.write().actors.insert(actor.id.clone(), actor);
    }

    pub fn put_role(&self, role: Role) {
        self.tables.write().roles.insert(role.id.clone(), role);
    }

    pub fn put_permission(&self, permission: Permission) {
        self.tables
            .write()
            .permissions
            .insert(permission.id.clone(), permission);
    }

    pub fn put_resource(&self, resource: Resource) {
        self.tables
            .write()
            .resources
            .insert(resource.id.clone(), resource);
    }

    /// Remove a role and every assignment of it. Children keep their
    /// (now dangling) parent reference.
    pub fn remove_role(&self, role_id: &str) -> Result<Role, AuthzError> {
        let mut tables = self.tables.write();
        let role = tables
            .roles
            .remove(role_id)
            .ok_or_else(|| AuthzError::not_found(EntityKind::Role, role_id))?;
        tables.assignments.retain(|a| a.role_id != role_id);
        Ok(role)
    }

    /// Assign a role. Re-assigning the same (actor, role, domain) replaces the
    /// previous assignment.
    pub fn assign_role(&self, assignment: RoleAssignment) -> Result<(), AuthzError> {
        let mut tables = self.tables.write();
        if !tables.actors.contains_key(&assignment.actor_id) {
            return Err(AuthzError::not_found(EntityKind::User, &assignment.actor_id));
        }
        if !tables.roles.contains_key(&assignment.role_id) {
            return Err(AuthzError::not_found(EntityKind::Role, &assignment.role_id));
        }
        tables.assignments.retain(|a| {
            !(a.actor_id == assignment.actor_id
                && a.role_id == assignment.role_id
                && a.domain == assignment.domain)
        });
        tables.assignments.push(assignment);
        Ok(())
    }

    /// Returns whether an assignment was removed.
    pub fn revoke_role(&self, actor_id: &str, role_id: &str, domain: Option<&str>) -> bool {
        let mut tables = self.tables.write();
        let before = tables.assignments.len();
        tables.assignments.retain(|a| {
            !(a.actor_id == actor_id && a.role_id == role_id && a.domain.as_deref() == domain)
        });
        tables.assignments.len() != before
    }

    /// All assignments for an actor, expired ones included.
    pub fn assignments_for(&self, actor_id: &str) -> Vec<RoleAssignment> {
        self.tables
            .read()
            .assignments
            .iter()
            .filter(|a| a.actor_id == actor_id)
            .cloned()
            .collect()
    }
}

impl AuthzStore for MemoryStore {
    fn get_actor(&self, id: &str) -> Result<Actor, AuthzError> {
        self.tables
            .read()
            .actors
            .get(id)
            .cloned()
            .ok_or_else(|| AuthzError::not_found(EntityKind::User, id))
    }

    fn get_role(&self, id: &str) -> Result<Role, AuthzError> {
        self.tables
            .read()
            .roles
            .get(id)
            .cloned()
            .ok_or_else(|| AuthzError::not_found(EntityKind::Role, id))
    }

    fn get_permission(&self, id: &str) -> Result<Permission, AuthzError> {
        self.tables
            .read()
            .permissions
            .get(id)
            .cloned()
            .ok_or_else(|| AuthzError::not_found(EntityKind::Permission, id))
    }

    fn get_resource(&self, id: &str) -> Result<Resource, AuthzError> {
        self.tables
            .read()
            .resources
            .get(id)
            .cloned()
            .ok_or_else(|| AuthzError::not_found(EntityKind::Resource, id))
    }

    fn get_direct_roles(&self, actor_id: &str, domain: Option<&str>) -> Result<Vec<Role>, AuthzError> {
        let tables = self.tables.read();
        if !tables.actors.contains_key(actor_id) {
            return Err(AuthzError::not_found(EntityKind::User, actor_id));
        }

        let now = Utc::now();
        let mut role_ids: Vec<&str> = tables
            .assignments
            .iter()
            .filter(|a| a.actor_id == actor_id)
            .filter(|a| domain.is_none() || a.domain.as_deref() == domain)
            .filter(|a| !a.is_expired_at(now))
            .map(|a| a.role_id.as_str())
            .collect();
        role_ids.sort_unstable();
        role_ids.dedup();

        // Assignments may outlive their role
        Ok(role_ids
            .into_iter()
            .filter_map(|id| tables.roles.get(id).cloned())
            .collect())
    }

    fn list_roles(&self, domain: Option<&str>) -> Result<Vec<Role>, AuthzError> {
        let tables = self.tables.read();
        let mut roles: Vec<Role> = tables
            .roles
            .values()
            .filter(|r| domain.is_none() || r.domain.as_deref() == domain)
            .cloned()
            .collect();
        roles.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(roles)
    }
}
