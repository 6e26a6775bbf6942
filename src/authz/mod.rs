//! Role-based and attribute-based authorization.
//!
//! [`AuthzEngine`] answers "may this actor do this action on this resource?"
//! by expanding the actor's roles through the role hierarchy and evaluating
//! the conditions attached to each candidate permission.

pub mod cache;
pub mod clock;
pub mod condition;
pub mod engine;
pub mod errors;
pub mod hierarchy;
pub mod store;
pub mod types;
pub mod value;

pub use cache::{MemoryRoleCache, NoopRoleCache, RoleCache, RoleCacheKey};
pub use clock::{Clock, FixedClock, SystemClock};
pub use condition::{Condition, Operator, PolicyEvaluator};
pub use engine::AuthzEngine;
pub use errors::{AuthzError, EntityKind};
pub use hierarchy::RoleHierarchyResolver;
pub use store::{AuthzStore, MemoryStore};
pub use types::{
    Actor, ActorStatus, CheckRequest, Decision, Permission, Resource, Role, RoleAssignment,
    WILDCARD,
};
pub use value::{attributes_from_json, AttrPath, AttrValue, Attributes};
