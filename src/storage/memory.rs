//! In-memory implementation of the persistence collaborators.
//!
//! Tables live behind one `parking_lot::RwLock`; ids come from a single sequence.
//! Unique constraints mirror the relational schema: user email, role slug and
//! permission slug. Deletes on the join tables are soft (they stamp `deleted_at`).

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::{AppError, AppResult};
use crate::identity::model::{
    AssignedRole, GrantedPermission, Permission, Role, RolePermission, User, UserProfile, UserRole,
};
use super::repository::{OwnershipResolver, RbacRepository};
use super::StoreError;

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    users: BTreeMap<i64, User>,
    roles: BTreeMap<i64, Role>,
    permissions: BTreeMap<i64, Permission>,
    user_roles: Vec<UserRole>,
    role_permissions: Vec<RolePermission>,
    /// (resource_type, resource_id) -> owner user id
    owners: HashMap<(String, i64), i64>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn role_by_slug(&self, slug: &str) -> Option<&Role> { self.roles.values().find(|r| r.slug == slug) }

    fn permission_by_slug(&self, slug: &str) -> Option<&Permission> { self.permissions.values().find(|p| p.slug == slug) }

    fn grants_for_role(&self, role_id: i64) -> Vec<GrantedPermission> {
        self.role_permissions
            .iter()
            .filter(|rp| rp.role_id == role_id && rp.deleted_at.is_none())
            .filter_map(|rp| {
                self.permissions.get(&rp.permission_id).map(|p| GrantedPermission { permission: p.clone(), grant: rp.clone() })
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct MemoryRepository {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self { Self::default() }

    /// Simulate a backend outage: every call fails with `AppError::Io` while set.
    pub fn set_unavailable(&self, down: bool) { self.unavailable.store(down, Ordering::SeqCst); }

    fn check_up(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory repository marked unavailable".into()).into());
        }
        Ok(())
    }

    pub fn set_user_active(&self, user_id: i64, active: bool) -> AppResult<()> {
        self.check_up()?;
        let mut t = self.tables.write();
        let user = t.users.get_mut(&user_id).ok_or_else(|| AppError::not_found("user_not_found", format!("user {} not found", user_id)))?;
        user.is_active = active;
        Ok(())
    }

    pub fn set_role_active(&self, slug: &str, active: bool) -> AppResult<()> {
        self.check_up()?;
        let mut t = self.tables.write();
        let role = t
            .roles
            .values_mut()
            .find(|r| r.slug == slug)
            .ok_or_else(|| AppError::not_found("role_not_found", format!("role '{}' not found", slug)))?;
        role.is_active = active;
        Ok(())
    }

    pub fn set_permission_active(&self, slug: &str, active: bool) -> AppResult<()> {
        self.check_up()?;
        let mut t = self.tables.write();
        let perm = t
            .permissions
            .values_mut()
            .find(|p| p.slug == slug)
            .ok_or_else(|| AppError::not_found("permission_not_found", format!("permission '{}' not found", slug)))?;
        perm.is_active = active;
        Ok(())
    }

    /// Record the owner of a resource instance (e.g. the member who borrowed a book).
    pub fn set_owner(&self, resource_type: &str, resource_id: i64, owner_id: i64) {
        self.tables.write().owners.insert((resource_type.to_string(), resource_id), owner_id);
    }

    /// Non-deleted assignments of a user, including inactive ones.
    pub fn user_role_rows(&self, user_id: i64) -> Vec<UserRole> {
        self.tables.read().user_roles.iter().filter(|ur| ur.user_id == user_id && ur.deleted_at.is_none()).cloned().collect()
    }
}

impl RbacRepository for MemoryRepository {
    fn find_user_by_id(&self, id: i64) -> AppResult<Option<UserProfile>> {
        self.check_up()?;
        let t = self.tables.read();
        let Some(user) = t.users.get(&id).cloned() else { return Ok(None); };
        let roles = t
            .user_roles
            .iter()
            .filter(|ur| ur.user_id == id && ur.deleted_at.is_none())
            .filter_map(|ur| {
                t.roles.get(&ur.role_id).map(|role| AssignedRole {
                    role: role.clone(),
                    assignment: ur.clone(),
                    permissions: t.grants_for_role(role.id),
                })
            })
            .collect();
        Ok(Some(UserProfile { user, roles }))
    }

    fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        self.check_up()?;
        let t = self.tables.read();
        Ok(t.users.values().find(|u| u.email.eq_ignore_ascii_case(email.trim())).cloned())
    }

    fn find_role_by_slug(&self, slug: &str, active_only: bool) -> AppResult<Option<Role>> {
        self.check_up()?;
        let t = self.tables.read();
        Ok(t.role_by_slug(slug).filter(|r| !active_only || r.is_active).cloned())
    }

    fn find_permission_by_slug(&self, slug: &str, active_only: bool) -> AppResult<Option<Permission>> {
        self.check_up()?;
        let t = self.tables.read();
        Ok(t.permission_by_slug(slug).filter(|p| !active_only || p.is_active).cloned())
    }

    fn count_role_permission(&self, role_id: i64, permission_id: i64) -> AppResult<i64> {
        self.check_up()?;
        let t = self.tables.read();
        let n = t
            .role_permissions
            .iter()
            .filter(|rp| rp.role_id == role_id && rp.permission_id == permission_id && rp.is_current())
            .count();
        Ok(n as i64)
    }

    fn insert_user(&self, mut user: User) -> AppResult<User> {
        self.check_up()?;
        let mut t = self.tables.write();
        if t.users.values().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
            return Err(AppError::conflict("duplicate_email", format!("user with email '{}' already exists", user.email)));
        }
        user.id = t.next_id();
        t.users.insert(user.id, user.clone());
        Ok(user)
    }

    fn insert_user_role(&self, mut row: UserRole) -> AppResult<UserRole> {
        self.check_up()?;
        let mut t = self.tables.write();
        if !t.users.contains_key(&row.user_id) {
            return Err(AppError::not_found("user_not_found", format!("user {} not found", row.user_id)));
        }
        if !t.roles.contains_key(&row.role_id) {
            return Err(AppError::not_found("role_not_found", format!("role {} not found", row.role_id)));
        }
        row.id = t.next_id();
        t.user_roles.push(row.clone());
        Ok(row)
    }

    fn delete_user_roles(&self, user_id: i64, role_id: i64, at: DateTime<Utc>) -> AppResult<usize> {
        self.check_up()?;
        let mut t = self.tables.write();
        let mut n = 0usize;
        for ur in t.user_roles.iter_mut().filter(|ur| ur.user_id == user_id && ur.role_id == role_id && ur.deleted_at.is_none()) {
            ur.deleted_at = Some(at);
            ur.is_active = false;
            n += 1;
        }
        Ok(n)
    }

    fn insert_role(&self, mut role: Role) -> AppResult<Role> {
        self.check_up()?;
        let mut t = self.tables.write();
        if t.role_by_slug(&role.slug).is_some() {
            return Err(AppError::conflict("duplicate_role_slug", format!("role '{}' already exists", role.slug)));
        }
        role.id = t.next_id();
        t.roles.insert(role.id, role.clone());
        Ok(role)
    }

    fn insert_permission(&self, mut permission: Permission) -> AppResult<Permission> {
        self.check_up()?;
        let mut t = self.tables.write();
        if t.permission_by_slug(&permission.slug).is_some() {
            return Err(AppError::conflict("duplicate_permission_slug", format!("permission '{}' already exists", permission.slug)));
        }
        permission.id = t.next_id();
        t.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    fn insert_role_permission(&self, mut row: RolePermission) -> AppResult<RolePermission> {
        self.check_up()?;
        let mut t = self.tables.write();
        if !t.roles.contains_key(&row.role_id) || !t.permissions.contains_key(&row.permission_id) {
            return Err(AppError::not_found("grant_target_not_found", format!("role {} or permission {} not found", row.role_id, row.permission_id)));
        }
        row.id = t.next_id();
        t.role_permissions.push(row.clone());
        Ok(row)
    }

    fn delete_role_permissions(&self, role_id: i64, permission_id: i64, at: DateTime<Utc>) -> AppResult<usize> {
        self.check_up()?;
        let mut t = self.tables.write();
        let mut n = 0usize;
        for rp in t.role_permissions.iter_mut().filter(|rp| rp.role_id == role_id && rp.permission_id == permission_id && rp.deleted_at.is_none()) {
            rp.deleted_at = Some(at);
            rp.is_active = false;
            n += 1;
        }
        Ok(n)
    }
}

impl OwnershipResolver for MemoryRepository {
    fn owner_of(&self, resource_type: &str, resource_id: i64) -> AppResult<Option<i64>> {
        self.check_up()?;
        Ok(self.tables.read().owners.get(&(resource_type.to_string(), resource_id)).copied())
    }
}
