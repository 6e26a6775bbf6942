use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::authz::value::{AttrValue, Attributes};

/// Wildcard accepted in a permission's action and resource-type matchers.
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorStatus {
    #[default]
    Active,
    Inactive,
    Suspended,
    Deleted,
}

impl ActorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorStatus::Active => "active",
            ActorStatus::Inactive => "inactive",
            ActorStatus::Suspended => "suspended",
            ActorStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ActorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user (subject) that holds roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    #[serde(default)]
    pub status: ActorStatus,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ActorStatus::Active,
            attributes: Attributes::new(),
            domain: None,
            name: None,
            email: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ActorStatus::Active
    }

    /// The `user` block of an evaluation context. Identity fields are written
    /// last so free-form attributes cannot shadow them.
    pub fn context_block(&self) -> Attributes {
        let mut block = self.attributes.clone();
        block.insert("id".into(), AttrValue::from(self.id.as_str()));
        block.insert("status".into(), AttrValue::from(self.status.as_str()));
        block.insert("domain".into(), opt_string(&self.domain));
        if let Some(name) = &self.name {
            block.insert("name".into(), AttrValue::from(name.as_str()));
        }
        if let Some(email) = &self.email {
            block.insert("email".into(), AttrValue::from(email.as_str()));
        }
        block
    }
}

fn opt_string(value: &Option<String>) -> AttrValue {
    value
        .as_deref()
        .map(AttrValue::from)
        .unwrap_or(AttrValue::Null)
}

/// A named bundle of permission ids with at most one parent role.
///
/// Records are immutable; the `with_*` helpers build an updated copy to hand
/// back to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    #[serde(default)]
    pub domain: Option<String>,
}

impl Role {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            parent_id: None,
            permissions: BTreeSet::new(),
            domain: None,
        }
    }

    pub fn has_permission(&self, permission_id: &str) -> bool {
        self.permissions.contains(permission_id)
    }

    pub fn with_permissions<I, S>(&self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            permissions: permissions.into_iter().map(Into::into).collect(),
            ..self.clone()
        }
    }

    pub fn with_parent(&self, parent_id: Option<&str>) -> Self {
        Self {
            parent_id: parent_id.map(str::to_string),
            ..self.clone()
        }
    }

    pub fn with_domain(&self, domain: Option<&str>) -> Self {
        Self {
            domain: domain.map(str::to_string),
            ..self.clone()
        }
    }
}

/// An action on a resource type, optionally guarded by an ABAC condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    pub id: String,
    pub resource_type: String,
    pub action: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Serialized condition expression; see [`crate::authz::condition`].
    #[serde(default)]
    pub conditions: Option<serde_json::Value>,
}

impl Permission {
    pub fn new(
        id: impl Into<String>,
        resource_type: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            action: action.into(),
            description: None,
            conditions: None,
        }
    }

    pub fn with_conditions(mut self, conditions: serde_json::Value) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Wildcard-or-exact on both fields independently.
    pub fn matches(&self, resource_type: &str, action: &str) -> bool {
        self.matches_resource_type(resource_type)
            && (self.action == WILDCARD || self.action == action)
    }

    pub fn matches_resource_type(&self, resource_type: &str) -> bool {
        self.resource_type == WILDCARD || self.resource_type == resource_type
    }

    pub fn has_conditions(&self) -> bool {
        match &self.conditions {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::Object(obj)) => !obj.is_empty(),
            Some(_) => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub resource_type: String,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub domain: Option<String>,
}

impl Resource {
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            attributes: Attributes::new(),
            domain: None,
        }
    }

    pub fn context_block(&self) -> Attributes {
        let mut block = self.attributes.clone();
        block.insert("id".into(), AttrValue::from(self.id.as_str()));
        block.insert("type".into(), AttrValue::from(self.resource_type.as_str()));
        block.insert("domain".into(), opt_string(&self.domain));
        block
    }
}

/// Links an actor to a role. Expired assignments stay in storage but no
/// longer count toward effective roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub actor_id: String,
    pub role_id: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub granted_by: Option<String>,
}

impl RoleAssignment {
    pub fn new(actor_id: impl Into<String>, role_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            role_id: role_id.into(),
            domain: None,
            expires_at: None,
            granted_by: None,
        }
    }

    pub fn in_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn granted_by(mut self, actor_id: impl Into<String>) -> Self {
        self.granted_by = Some(actor_id.into());
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

// ---------- Engine request/response types ----------

/// One item of a batch check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRequest {
    /// e.g. "read"
    pub action: String,
    /// e.g. "document"
    pub resource_type: String,
    #[serde(default)]
    pub resource_id: Option<String>,
    /// Extra ABAC context merged under the built-in blocks
    #[serde(default)]
    pub context: Attributes,
}

impl CheckRequest {
    pub fn new(action: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: None,
            context: Attributes::new(),
        }
    }

    pub fn on(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_context(mut self, context: Attributes) -> Self {
        self.context = context;
        self
    }
}

/// Outcome of one authorization check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
    pub matched_permission_ids: Vec<String>,
    pub actor_id: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}
