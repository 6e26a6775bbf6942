use std::fmt;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The kind of entity a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    Role,
    Permission,
    Resource,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::User => "User",
            EntityKind::Role => "Role",
            EntityKind::Permission => "Permission",
            EntityKind::Resource => "Resource",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    #[error("{kind} `{id}` not found")]
    #[diagnostic(code(rolegate::authz::not_found))]
    NotFound { kind: EntityKind, id: String },

    #[error("Circular role dependency detected at role `{role_id}`")]
    #[diagnostic(
        code(rolegate::authz::circular_dependency),
        help("Check the `parent_id` chain of the named role; a role may not appear in its own ancestry")
    )]
    CircularDependency { role_id: String },

    #[error("Role hierarchy for `{role_id}` exceeds maximum depth ({depth} >= {max_depth})")]
    #[diagnostic(
        code(rolegate::authz::max_depth_exceeded),
        help("Flatten the role tree or raise `engine.max_depth` in the settings")
    )]
    MaxDepthExceeded {
        role_id: String,
        depth: usize,
        max_depth: usize,
    },

    #[error("Policy evaluation failed: {0}")]
    #[diagnostic(
        code(rolegate::authz::policy_evaluation),
        help("Supported operators: ==, !=, >, >=, <, <=, in, not_in, contains, not_contains, startswith, endswith, matches")
    )]
    PolicyEvaluation(String),

    #[error("Validation failed: {0}")]
    #[diagnostic(
        code(rolegate::authz::validation),
        help("A condition maps each attribute path (e.g. `resource.owner_id`) to an object of operator -> expected value")
    )]
    Validation(String),

    #[error("User `{actor_id}` cannot {action} on `{resource_type}`: {reason}")]
    #[diagnostic(code(rolegate::authz::permission_denied))]
    PermissionDenied {
        actor_id: String,
        action: String,
        resource_type: String,
        reason: String,
    },

    #[error("Storage error: {0}")]
    #[diagnostic(code(rolegate::authz::storage))]
    Storage(String),
}

impl AuthzError {
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        AuthzError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AuthzError::NotFound { .. })
    }

    /// Hierarchy integrity failures. These indicate corrupt configuration and
    /// are never absorbed by the engine.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AuthzError::CircularDependency { .. } | AuthzError::MaxDepthExceeded { .. }
        )
    }
}
