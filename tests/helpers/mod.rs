pub mod builders;
pub mod fixture;

pub use builders::{ActorBuilder, PermissionBuilder, RoleBuilder};
pub use fixture::{fixed_now, TestAuthz};
