use chrono::{DateTime, Utc};

use crate::error::AppResult;
use crate::identity::model::{Permission, Role, RolePermission, User, UserProfile, UserRole};

/// Persistence collaborator for the access-control graph.
///
/// Lookups return `Ok(None)` when nothing matches; `Err` is reserved for backend
/// failures. Soft-deleted rows are never returned.
pub trait RbacRepository: Send + Sync {
    /// Load a user with every non-deleted role assignment and each role's
    /// non-deleted permission grants.
    fn find_user_by_id(&self, id: i64) -> AppResult<Option<UserProfile>>;
    fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>>;
    fn find_role_by_slug(&self, slug: &str, active_only: bool) -> AppResult<Option<Role>>;
    fn find_permission_by_slug(&self, slug: &str, active_only: bool) -> AppResult<Option<Permission>>;
    /// Number of active, non-deleted grants linking the role and the permission.
    fn count_role_permission(&self, role_id: i64, permission_id: i64) -> AppResult<i64>;

    fn insert_user(&self, user: User) -> AppResult<User>;
    fn insert_user_role(&self, row: UserRole) -> AppResult<UserRole>;
    /// Soft-delete every non-deleted assignment of `role_id` to `user_id`.
    fn delete_user_roles(&self, user_id: i64, role_id: i64, at: DateTime<Utc>) -> AppResult<usize>;
    fn insert_role(&self, role: Role) -> AppResult<Role>;
    fn insert_permission(&self, permission: Permission) -> AppResult<Permission>;
    fn insert_role_permission(&self, row: RolePermission) -> AppResult<RolePermission>;
    /// Soft-delete every non-deleted grant of `permission_id` to `role_id`.
    fn delete_role_permissions(&self, role_id: i64, permission_id: i64, at: DateTime<Utc>) -> AppResult<usize>;
}

/// Resolves the owning user of a resource instance for ownership-gated permissions.
pub trait OwnershipResolver: Send + Sync {
    /// `Ok(None)` when the resource is unknown or carries no owner.
    fn owner_of(&self, resource_type: &str, resource_id: i64) -> AppResult<Option<i64>>;
}
