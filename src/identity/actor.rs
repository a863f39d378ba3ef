use chrono::{DateTime, Utc};

use crate::error::{AppError, AppResult};
use super::engine::{EffectivePermission, PermissionEngine};
use super::model::{User, UserProfile};

/// Anything that can be asked for authorization facts.
pub trait Actor {
    fn user_id(&self) -> i64;
    fn is_active(&self) -> bool;
    fn is_super_admin(&self) -> bool;
    fn has_role(&self, role_slug: &str) -> bool;
    fn has_permission(&self, permission: &str) -> bool;
}

/// Live view of a user: every question goes to the engine.
#[derive(Debug, Clone, Copy)]
pub struct EngineActor<'a> {
    engine: &'a PermissionEngine,
    user: &'a User,
}

impl<'a> EngineActor<'a> {
    pub fn new(engine: &'a PermissionEngine, user: &'a User) -> Self { Self { engine, user } }
    pub fn user(&self) -> &User { self.user }
}

impl Actor for EngineActor<'_> {
    fn user_id(&self) -> i64 { self.user.id }
    fn is_active(&self) -> bool { self.user.is_active }
    fn is_super_admin(&self) -> bool { self.user.is_super_admin }
    fn has_role(&self, role_slug: &str) -> bool { self.engine.has_role(self.user, role_slug) }
    fn has_permission(&self, permission: &str) -> bool { self.engine.has_permission(self.user, permission) }
}

/// Point-in-time snapshot of a user's graph, taken once per request.
#[derive(Debug, Clone)]
pub struct AuthorizedUser {
    profile: UserProfile,
    permissions: Vec<EffectivePermission>,
    evaluated_at: DateTime<Utc>,
}

impl AuthorizedUser {
    pub(crate) fn new(profile: UserProfile, permissions: Vec<EffectivePermission>, evaluated_at: DateTime<Utc>) -> Self {
        Self { profile, permissions, evaluated_at }
    }

    pub fn user(&self) -> &User { &self.profile.user }
    pub fn profile(&self) -> &UserProfile { &self.profile }
    pub fn evaluated_at(&self) -> DateTime<Utc> { self.evaluated_at }

    pub fn permission_slugs(&self) -> Vec<&str> { self.permissions.iter().map(|p| p.slug.as_str()).collect() }

    pub fn role_slugs(&self) -> Vec<&str> {
        self.profile.current_roles(self.evaluated_at).map(|r| r.role.slug.as_str()).collect()
    }
}

impl Actor for AuthorizedUser {
    fn user_id(&self) -> i64 { self.profile.user.id }
    fn is_active(&self) -> bool { self.profile.user.is_active }
    fn is_super_admin(&self) -> bool { self.profile.user.is_super_admin }

    fn has_role(&self, role_slug: &str) -> bool {
        self.is_active() && self.profile.current_roles(self.evaluated_at).any(|r| r.role.slug == role_slug)
    }

    fn has_permission(&self, permission: &str) -> bool {
        if !self.is_active() { return false; }
        self.is_super_admin() || self.permissions.iter().any(|p| p.slug.matches(permission))
    }
}

fn ensure_active(actor: &dyn Actor) -> AppResult<()> {
    if actor.is_active() { Ok(()) } else { Err(AppError::forbidden("account_inactive", format!("user {} is deactivated", actor.user_id()))) }
}

pub fn require_permission(actor: &dyn Actor, permission: &str) -> AppResult<()> {
    ensure_active(actor)?;
    if actor.has_permission(permission) { return Ok(()); }
    Err(AppError::forbidden("missing_permission", format!("user {} lacks '{}'", actor.user_id(), permission)))
}

pub fn require_any_permission(actor: &dyn Actor, permissions: &[&str]) -> AppResult<()> {
    ensure_active(actor)?;
    if permissions.iter().any(|p| actor.has_permission(p)) { return Ok(()); }
    Err(AppError::forbidden(
        "missing_permission",
        format!("user {} lacks all of [{}]", actor.user_id(), permissions.join(", ")),
    ))
}

pub fn require_role(actor: &dyn Actor, role_slug: &str) -> AppResult<()> {
    ensure_active(actor)?;
    if actor.is_super_admin() || actor.has_role(role_slug) { return Ok(()); }
    Err(AppError::forbidden("missing_role", format!("user {} lacks role '{}'", actor.user_id(), role_slug)))
}
