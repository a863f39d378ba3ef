//! Permission engine: the single authority for "may user U do A" decisions and for
//! mutating the user-role / role-permission graph.
//!
//! Checks (`has_permission`, `has_role`, `can_access_resource`, `can_manage_user`)
//! are total: repository failures are logged and resolve to a denial. Mutations
//! return `AppError` for authorization failures, unresolved slugs, duplicates and
//! backend errors.
//!
//! Caching: role-by-slug lookups are cached for `role_cache_ttl` (the whole map is
//! dropped once the window elapses) and any role/permission mutation clears the
//! cache. The per-user permission cache is off by default so that revocations
//! made directly in the repository take effect on the next check.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::storage::{OwnershipResolver, RbacRepository};
use super::model::{NewPermission, NewRole, Permission, Role, RolePermission, User, UserProfile, UserRole};
use super::slug::{resource_candidates, PermissionSlug, PERMISSIONS_GRANT, ROLES_ASSIGN, USERS_MANAGE};

const TARGET: &str = "lendbook::rbac";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub role_cache_ttl: Duration,
    pub permission_cache_enabled: bool,
    pub permission_cache_ttl: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            role_cache_ttl: Duration::minutes(15),
            permission_cache_enabled: false,
            permission_cache_ttl: Duration::minutes(1),
        }
    }
}

/// One entry of a user's effective permission set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EffectivePermission {
    pub slug: PermissionSlug,
    pub requires_ownership: bool,
}

/// Deduplicated union of the active permissions of the user's current roles.
/// Inactive users hold nothing.
pub fn effective_permissions(profile: &UserProfile, now: DateTime<Utc>) -> Vec<EffectivePermission> {
    if !profile.user.is_active { return Vec::new(); }
    let mut set: HashMap<&str, bool> = HashMap::new();
    for assigned in profile.current_roles(now) {
        for gp in assigned.permissions.iter().filter(|gp| gp.grant.is_current() && gp.permission.is_active) {
            set.insert(gp.permission.slug.as_str(), gp.permission.requires_ownership);
        }
    }
    set.into_iter()
        .map(|(slug, requires_ownership)| EffectivePermission { slug: PermissionSlug::parse(slug), requires_ownership })
        .collect()
}

fn grants(held: &[EffectivePermission], target: &str) -> bool { held.iter().any(|p| p.slug.matches(target)) }

#[derive(Debug)]
struct CachedPermissions {
    permissions: Vec<EffectivePermission>,
    cached_at: DateTime<Utc>,
}

#[derive(Debug)]
struct EngineCache {
    roles: HashMap<String, Role>,
    roles_refreshed_at: DateTime<Utc>,
    user_permissions: HashMap<i64, CachedPermissions>,
}

impl EngineCache {
    fn roles_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool { now - self.roles_refreshed_at >= ttl }
}

pub struct PermissionEngine {
    repo: Arc<dyn RbacRepository>,
    owners: Arc<dyn OwnershipResolver>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    cache: RwLock<EngineCache>,
}

impl std::fmt::Debug for PermissionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionEngine").field("settings", &self.settings).finish()
    }
}

impl PermissionEngine {
    pub fn new(
        repo: Arc<dyn RbacRepository>,
        owners: Arc<dyn OwnershipResolver>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        let cache = EngineCache { roles: HashMap::new(), roles_refreshed_at: clock.now(), user_permissions: HashMap::new() };
        Self { repo, owners, clock, settings, cache: RwLock::new(cache) }
    }

    /// Build an engine over a store that serves both the graph and resource ownership.
    pub fn over<S>(store: Arc<S>, clock: Arc<dyn Clock>, settings: EngineSettings) -> Self
    where
        S: RbacRepository + OwnershipResolver + 'static,
    {
        Self::new(store.clone(), store, clock, settings)
    }

    pub fn settings(&self) -> &EngineSettings { &self.settings }

    pub fn now(&self) -> DateTime<Utc> { self.clock.now() }

    // ----- reads -----

    fn load_profile(&self, user_id: i64) -> Option<UserProfile> {
        match self.repo.find_user_by_id(user_id) {
            Ok(p) => p,
            Err(e) => {
                warn!(target: TARGET, user_id, error = %e, "user lookup failed; treating as no permissions");
                None
            }
        }
    }

    fn cached_permissions(&self, user_id: i64, now: DateTime<Utc>) -> Option<Vec<EffectivePermission>> {
        let c = self.cache.read();
        c.user_permissions
            .get(&user_id)
            .filter(|hit| now - hit.cached_at < self.settings.permission_cache_ttl)
            .map(|hit| hit.permissions.clone())
    }

    fn load_user_permissions(&self, user_id: i64) -> Vec<EffectivePermission> {
        let now = self.clock.now();
        if self.settings.permission_cache_enabled {
            if let Some(hit) = self.cached_permissions(user_id, now) { return hit; }
        }
        let Some(profile) = self.load_profile(user_id) else { return Vec::new(); };
        let permissions = effective_permissions(&profile, now);
        if self.settings.permission_cache_enabled {
            self.cache
                .write()
                .user_permissions
                .insert(user_id, CachedPermissions { permissions: permissions.clone(), cached_at: now });
        }
        permissions
    }

    /// Snapshot of the user's graph and effective permissions, or `None` when the user
    /// cannot be loaded.
    pub fn authorize_user(&self, user_id: i64) -> Option<super::actor::AuthorizedUser> {
        let now = self.clock.now();
        let profile = self.load_profile(user_id)?;
        let permissions = effective_permissions(&profile, now);
        Some(super::actor::AuthorizedUser::new(profile, permissions, now))
    }

    pub fn has_permission(&self, user: &User, permission: &str) -> bool {
        if !user.is_active {
            debug!(target: TARGET, user_id = user.id, permission, "denied: inactive user");
            return false;
        }
        if user.is_super_admin {
            debug!(target: TARGET, user_id = user.id, permission, "allowed: super admin");
            return true;
        }
        let held = self.load_user_permissions(user.id);
        let allowed = grants(&held, permission);
        debug!(target: TARGET, user_id = user.id, permission, allowed, "permission check");
        allowed
    }

    pub fn has_role(&self, user: &User, role_slug: &str) -> bool {
        if !user.is_active { return false; }
        let now = self.clock.now();
        let Some(profile) = self.load_profile(user.id) else { return false; };
        profile.user.is_active && profile.current_roles(now).any(|r| r.role.slug == role_slug)
    }

    /// Resource-scoped check over the dotted candidates, most specific first. The
    /// first candidate the user holds decides: if the held permission record(s)
    /// covering it require ownership, the answer is the ownership check, with no
    /// fall-through to a broader candidate.
    pub fn can_access_resource(&self, user: &User, action: &str, resource_type: &str, resource_id: i64) -> bool {
        if !user.is_active { return false; }
        if user.is_super_admin { return true; }
        let held = self.load_user_permissions(user.id);
        for candidate in resource_candidates(resource_type, action) {
            let mut matching = held.iter().filter(|p| p.slug.matches(&candidate)).peekable();
            if matching.peek().is_none() { continue; }
            // Gated only when every held grant covering this candidate is ownership-gated
            if matching.all(|p| p.requires_ownership) {
                let owner = self.is_resource_owner(user, resource_type, resource_id);
                debug!(target: TARGET, user_id = user.id, candidate = %candidate, resource_id, owner, "ownership-gated access");
                return owner;
            }
            debug!(target: TARGET, user_id = user.id, candidate = %candidate, resource_id, "resource access granted");
            return true;
        }
        debug!(target: TARGET, user_id = user.id, action, resource_type, resource_id, "no candidate permission held");
        false
    }

    fn is_resource_owner(&self, user: &User, resource_type: &str, resource_id: i64) -> bool {
        match self.owners.owner_of(resource_type, resource_id) {
            Ok(Some(owner)) => owner == user.id,
            Ok(None) => false,
            Err(e) => {
                warn!(target: TARGET, resource_type, resource_id, error = %e, "owner lookup failed; denying");
                false
            }
        }
    }

    /// Manager must hold `users.manage` and outrank the target by highest role level.
    pub fn can_manage_user(&self, manager: &User, target: &User) -> bool {
        if !manager.is_active { return false; }
        if manager.is_super_admin { return true; }
        if target.is_super_admin { return false; }
        if !self.has_permission(manager, USERS_MANAGE) { return false; }
        let now = self.clock.now();
        let (Some(m), Some(t)) = (self.load_profile(manager.id), self.load_profile(target.id)) else { return false; };
        m.highest_role_level(now) > t.highest_role_level(now)
    }

    pub fn get_user_permissions(&self, user: &User) -> Vec<String> {
        self.load_user_permissions(user.id).into_iter().map(|p| p.slug.as_str().to_string()).collect()
    }

    /// Active role by slug, served from the cache while the expiry window is open.
    pub fn get_role_by_slug(&self, slug: &str) -> AppResult<Option<Role>> {
        let now = self.clock.now();
        {
            let c = self.cache.read();
            if !c.roles_expired(now, self.settings.role_cache_ttl) {
                if let Some(role) = c.roles.get(slug) { return Ok(Some(role.clone())); }
            }
        }
        // Not synchronized against concurrent misses: both fetch, last writer wins.
        let fetched = self.repo.find_role_by_slug(slug, true)?;
        let mut c = self.cache.write();
        if c.roles_expired(now, self.settings.role_cache_ttl) {
            c.roles.clear();
            c.roles_refreshed_at = now;
        }
        if let Some(role) = &fetched {
            c.roles.insert(slug.to_string(), role.clone());
        }
        Ok(fetched)
    }

    // ----- cache control -----

    pub fn invalidate_user(&self, user_id: i64) {
        self.cache.write().user_permissions.remove(&user_id);
    }

    pub fn invalidate_all(&self) {
        let now = self.clock.now();
        let mut c = self.cache.write();
        c.roles.clear();
        c.user_permissions.clear();
        c.roles_refreshed_at = now;
    }

    pub fn cached_role_count(&self) -> usize { self.cache.read().roles.len() }

    // ----- mutations -----

    fn require(&self, actor: Option<&User>, permission: &str) -> AppResult<()> {
        match actor {
            Some(a) if !self.has_permission(a, permission) => Err(AppError::forbidden(
                "missing_permission",
                format!("user {} lacks '{}'", a.id, permission),
            )),
            _ => Ok(()),
        }
    }

    fn require_role(&self, slug: &str) -> AppResult<Role> {
        self.get_role_by_slug(slug)?
            .ok_or_else(|| AppError::not_found("role_not_found", format!("role '{}' not found or inactive", slug)))
    }

    fn require_profile(&self, user_id: i64) -> AppResult<UserProfile> {
        self.repo
            .find_user_by_id(user_id)?
            .ok_or_else(|| AppError::not_found("user_not_found", format!("user {} not found", user_id)))
    }

    pub fn assign_role(&self, user: &User, role_slug: &str, assigned_by: Option<&User>) -> AppResult<UserRole> {
        self.require(assigned_by, ROLES_ASSIGN)?;
        let role = self.require_role(role_slug)?;
        let now = self.clock.now();
        let profile = self.require_profile(user.id)?;
        if profile.holds_role(role.id, now) {
            return Err(AppError::conflict(
                "role_already_assigned",
                format!("user {} already has role '{}'", user.id, role.slug),
            ));
        }
        if let Some(assigner) = assigned_by.filter(|a| !a.is_super_admin) {
            let level = self.require_profile(assigner.id)?.highest_role_level(now);
            if level <= Some(role.level) {
                return Err(AppError::forbidden(
                    "insufficient_role_level",
                    format!("user {} (level {:?}) cannot assign role '{}' (level {})", assigner.id, level, role.slug, role.level),
                ));
            }
        }
        let row = self.repo.insert_user_role(UserRole {
            id: 0,
            user_id: user.id,
            role_id: role.id,
            assigned_at: now,
            assigned_by: assigned_by.map(|a| a.id),
            expires_at: None,
            is_active: true,
            deleted_at: None,
        })?;
        self.invalidate_user(user.id);
        info!(target: TARGET, user_id = user.id, role = %role.slug, assigned_by = ?assigned_by.map(|a| a.id), "role assigned");
        Ok(row)
    }

    /// Soft-delete the user's assignments of the role. The role may be inactive.
    pub fn remove_role(&self, user: &User, role_slug: &str, removed_by: Option<&User>) -> AppResult<usize> {
        self.require(removed_by, ROLES_ASSIGN)?;
        let role = self
            .repo
            .find_role_by_slug(role_slug, false)?
            .ok_or_else(|| AppError::not_found("role_not_found", format!("role '{}' not found", role_slug)))?;
        let removed = self.repo.delete_user_roles(user.id, role.id, self.clock.now())?;
        self.invalidate_user(user.id);
        info!(target: TARGET, user_id = user.id, role = %role.slug, removed, "role removed");
        Ok(removed)
    }

    pub fn create_role(&self, new: NewRole) -> AppResult<Role> {
        if new.slug.trim().is_empty() {
            return Err(AppError::user("invalid_role_slug", "role slug must not be empty"));
        }
        let parent_id = match new.parent_slug.as_deref() {
            Some(parent) => Some(
                self.get_role_by_slug(parent)?
                    .ok_or_else(|| AppError::not_found("parent_role_not_found", format!("parent role '{}' not found", parent)))?
                    .id,
            ),
            None => None,
        };
        let role = self.repo.insert_role(Role {
            id: 0,
            name: new.name,
            slug: new.slug,
            description: new.description,
            level: new.level,
            is_active: true,
            parent_id,
        })?;
        self.invalidate_all();
        info!(target: TARGET, role = %role.slug, level = role.level, "role created");
        Ok(role)
    }

    pub fn create_permission(&self, new: NewPermission) -> AppResult<Permission> {
        if new.slug.trim().is_empty() {
            return Err(AppError::user("invalid_permission_slug", "permission slug must not be empty"));
        }
        let permission = self.repo.insert_permission(Permission {
            id: 0,
            name: new.name,
            slug: new.slug,
            category: new.category,
            resource: new.resource,
            action: new.action,
            description: new.description,
            is_active: true,
            requires_ownership: new.requires_ownership,
        })?;
        self.invalidate_all();
        info!(target: TARGET, permission = %permission.slug, "permission created");
        Ok(permission)
    }

    /// Re-granting an already active pair is a conflict, not a no-op.
    pub fn grant_permission_to_role(&self, role_slug: &str, permission_slug: &str, granted_by: Option<&User>) -> AppResult<RolePermission> {
        self.require(granted_by, PERMISSIONS_GRANT)?;
        let role = self.require_role(role_slug)?;
        let permission = self
            .repo
            .find_permission_by_slug(permission_slug, true)?
            .ok_or_else(|| AppError::not_found("permission_not_found", format!("permission '{}' not found or inactive", permission_slug)))?;
        if self.repo.count_role_permission(role.id, permission.id)? > 0 {
            return Err(AppError::conflict(
                "permission_already_granted",
                format!("role '{}' already has '{}'", role.slug, permission.slug),
            ));
        }
        let row = self.repo.insert_role_permission(RolePermission {
            id: 0,
            role_id: role.id,
            permission_id: permission.id,
            granted_at: self.clock.now(),
            granted_by: granted_by.map(|u| u.id),
            is_active: true,
            deleted_at: None,
        })?;
        self.invalidate_all();
        info!(target: TARGET, role = %role.slug, permission = %permission.slug, "permission granted");
        Ok(row)
    }

    pub fn revoke_permission_from_role(&self, role_slug: &str, permission_slug: &str, revoked_by: Option<&User>) -> AppResult<usize> {
        self.require(revoked_by, PERMISSIONS_GRANT)?;
        let role = self
            .repo
            .find_role_by_slug(role_slug, false)?
            .ok_or_else(|| AppError::not_found("role_not_found", format!("role '{}' not found", role_slug)))?;
        let permission = self
            .repo
            .find_permission_by_slug(permission_slug, false)?
            .ok_or_else(|| AppError::not_found("permission_not_found", format!("permission '{}' not found", permission_slug)))?;
        let removed = self.repo.delete_role_permissions(role.id, permission.id, self.clock.now())?;
        if removed == 0 {
            return Err(AppError::not_found(
                "grant_not_found",
                format!("role '{}' does not hold '{}'", role.slug, permission.slug),
            ));
        }
        self.invalidate_all();
        info!(target: TARGET, role = %role.slug, permission = %permission.slug, "permission revoked");
        Ok(removed)
    }
}
