use rolegate::authz::{
    Actor, ActorStatus, AttrValue, MemoryStore, Permission, Role, RoleAssignment,
};
use serde_json::Value;

/// Builder for creating test actors
pub struct ActorBuilder {
    actor: Actor,
    roles: Vec<String>,
}

impl ActorBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            actor: Actor::new(id),
            roles: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: ActorStatus) -> Self {
        self.actor.status = status;
        self
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.actor.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn in_domain(mut self, domain: &str) -> Self {
        self.actor.domain = Some(domain.to_string());
        self
    }

    pub fn with_role(mut self, role_id: &str) -> Self {
        self.roles.push(role_id.to_string());
        self
    }

    /// Store the actor and its role assignments. Roles must already exist.
    pub fn create(self, store: &MemoryStore) -> Actor {
        store.put_actor(self.actor.clone());
        for role_id in &self.roles {
            store
                .assign_role(RoleAssignment::new(self.actor.id.clone(), role_id.clone()))
                .expect("Failed to assign test role");
        }
        self.actor
    }
}

/// Builder for creating test roles
pub struct RoleBuilder {
    id: String,
    parent: Option<String>,
    permissions: Vec<String>,
    domain: Option<String>,
}

impl RoleBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            parent: None,
            permissions: Vec::new(),
            domain: None,
        }
    }

    pub fn with_parent(mut self, parent: &str) -> Self {
        self.parent = Some(parent.to_string());
        self
    }

    pub fn grants(mut self, permission_id: &str) -> Self {
        self.permissions.push(permission_id.to_string());
        self
    }

    pub fn in_domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }

    pub fn create(self, store: &MemoryStore) -> Role {
        let role = Role::new(self.id)
            .with_parent(self.parent.as_deref())
            .with_domain(self.domain.as_deref())
            .with_permissions(self.permissions);
        store.put_role(role.clone());
        role
    }
}

/// Builder for creating test permissions
pub struct PermissionBuilder {
    permission: Permission,
}

impl PermissionBuilder {
    pub fn new(id: &str, resource_type: &str, action: &str) -> Self {
        Self {
            permission: Permission::new(id, resource_type, action),
        }
    }

    pub fn when(mut self, conditions: Value) -> Self {
        self.permission = self.permission.with_conditions(conditions);
        self
    }

    pub fn create(self, store: &MemoryStore) -> Permission {
        store.put_permission(self.permission.clone());
        self.permission
    }
}
