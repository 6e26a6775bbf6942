//! Rolegate - embeddable RBAC + ABAC authorization engine
//!
//! Roles form a single-parent hierarchy; permissions are `(resource_type,
//! action)` pairs with optional attribute conditions. Storage is supplied by
//! the host through [`authz::AuthzStore`].

pub mod authz;
pub mod settings;

pub use authz::{AuthzEngine, AuthzError, Decision};
pub use settings::{EngineSettings, Settings};
