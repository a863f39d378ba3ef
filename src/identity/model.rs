//! Entities of the access-control graph: users, roles, permissions and the two join rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub is_active: bool,
    #[serde(default)]
    pub is_super_admin: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Higher value = more authority.
    pub level: i32,
    pub is_active: bool,
    #[serde(default)]
    pub parent_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Permission {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub category: String,
    pub resource: String,
    pub action: String,
    #[serde(default)]
    pub description: Option<String>,
    pub is_active: bool,
    /// Grant only holds when the acting user owns the target resource.
    #[serde(default)]
    pub requires_ownership: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRole {
    pub id: i64,
    pub user_id: i64,
    pub role_id: i64,
    pub assigned_at: DateTime<Utc>,
    #[serde(default)]
    pub assigned_by: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl UserRole {
    /// Active, not soft-deleted and not past its expiry.
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.deleted_at.is_none() && self.expires_at.map_or(true, |exp| exp > now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RolePermission {
    pub id: i64,
    pub role_id: i64,
    pub permission_id: i64,
    pub granted_at: DateTime<Utc>,
    #[serde(default)]
    pub granted_by: Option<i64>,
    pub is_active: bool,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RolePermission {
    pub fn is_current(&self) -> bool { self.is_active && self.deleted_at.is_none() }
}

/// A permission together with the join row that grants it to a role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GrantedPermission {
    pub permission: Permission,
    pub grant: RolePermission,
}

/// A role held by a user, with its assignment row and its permission grants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssignedRole {
    pub role: Role,
    pub assignment: UserRole,
    #[serde(default)]
    pub permissions: Vec<GrantedPermission>,
}

impl AssignedRole {
    pub fn is_current(&self, now: DateTime<Utc>) -> bool { self.role.is_active && self.assignment.is_current(now) }
}

/// Eager-loaded user graph: the user and every non-deleted role assignment with the
/// role's non-deleted permission grants. Filtering by activity/expiry is left to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub user: User,
    #[serde(default)]
    pub roles: Vec<AssignedRole>,
}

impl UserProfile {
    pub fn current_roles(&self, now: DateTime<Utc>) -> impl Iterator<Item = &AssignedRole> {
        self.roles.iter().filter(move |r| r.is_current(now))
    }

    /// Highest level among the user's current roles; `None` when the user holds none.
    pub fn highest_role_level(&self, now: DateTime<Utc>) -> Option<i32> {
        self.current_roles(now).map(|r| r.role.level).max()
    }

    pub fn holds_role(&self, role_id: i64, now: DateTime<Utc>) -> bool {
        self.roles.iter().any(|r| r.role.id == role_id && r.assignment.is_current(now))
    }
}

/// Input for `PermissionEngine::create_role`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRole {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    pub level: i32,
    #[serde(default)]
    pub parent_slug: Option<String>,
}

/// Input for `PermissionEngine::create_permission`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPermission {
    pub name: String,
    pub slug: String,
    pub category: String,
    pub action: String,
    pub resource: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub requires_ownership: bool,
}
