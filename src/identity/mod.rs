//! Access control for the lending admin panel: the role/permission graph, the
//! permission engine that answers checks against it, and failed-login lockouts.
//! Keep the public surface thin and split implementation across sub-modules.

pub mod model;
pub mod slug;
mod engine;
mod actor;
mod login_guard;
mod password;
pub mod catalog;

pub use model::{
    AssignedRole, GrantedPermission, NewPermission, NewRole, Permission, Role, RolePermission, User, UserProfile, UserRole,
};
pub use slug::{PermissionAction, PermissionSlug, Service, SlugKind};
pub use engine::{effective_permissions, EffectivePermission, EngineSettings, PermissionEngine};
pub use actor::{require_any_permission, require_permission, require_role, Actor, AuthorizedUser, EngineActor};
pub use login_guard::{AttemptResult, LockoutPolicy, LoginAttemptGuard};
pub use password::{hash_password, verify_password};
pub use catalog::{ensure_super_admin, seed_defaults, SeedReport};
