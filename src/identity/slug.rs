//! Permission slug vocabulary and matching.
//!
//! Two spellings coexist in persisted rows:
//! - canonical `{service}_{action}` (e.g. `books_create`), built from the closed
//!   `Service` x `PermissionAction` vocabulary;
//! - dotted `{resource}.{action}` used by resource-scoped checks, where any
//!   segment may be `*`.
//!
//! `PermissionSlug` wraps both behind one type and one matching rule.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const WILDCARD: &str = "*";
pub const SEGMENT_SEP: char = '.';

/// Gate permissions consulted by the engine itself.
pub const USERS_MANAGE: &str = "users.manage";
pub const ROLES_ASSIGN: &str = "roles.assign";
pub const PERMISSIONS_GRANT: &str = "permissions.grant";

macro_rules! closed_vocabulary {
    ($(#[$meta:meta])* $name:ident, $what:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name { $($variant),+ }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self { $($name::$variant => $text),+ }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
        }

        impl FromStr for $name {
            type Err = AppError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(AppError::user(concat!("unknown_", $what), format!("unknown {} '{}'", $what, other))),
                }
            }
        }
    };
}

closed_vocabulary!(
    /// Service half of a canonical permission slug.
    Service, "service" {
        Books => "books",
        Users => "users",
        Roles => "roles",
        Permissions => "permissions",
        Reports => "reports",
        System => "system",
        Bundles => "bundles",
    }
);

closed_vocabulary!(
    /// Action half of a canonical permission slug.
    PermissionAction, "action" {
        Create => "create",
        Read => "read",
        Update => "update",
        Delete => "delete",
        Export => "export",
        BulkUpdate => "bulk_update",
        BulkDelete => "bulk_delete",
        Manage => "manage",
        View => "view",
    }
);

/// `{service}_{action}`, the canonical slug format of persisted permission rows.
pub fn build_permission_slug(service: Service, action: PermissionAction) -> String {
    format!("{}_{}", service.as_str(), action.as_str())
}

/// Fixed-arity glob over dot-separated segments. `*` matches exactly one segment;
/// patterns and targets with a different number of segments never match.
pub fn matches_wildcard(pattern: &str, target: &str) -> bool {
    let mut p = pattern.split(SEGMENT_SEP);
    let mut t = target.split(SEGMENT_SEP);
    loop {
        match (p.next(), t.next()) {
            (None, None) => return true,
            (Some(ps), Some(ts)) => {
                if ps != WILDCARD && ps != ts { return false; }
            }
            _ => return false,
        }
    }
}

/// Candidate permission strings for a resource-scoped check, most specific first.
pub fn resource_candidates(resource: &str, action: &str) -> [String; 5] {
    [
        format!("{resource}.{action}"),
        format!("{resource}.{action}.*"),
        format!("{resource}.*"),
        format!("*.{action}"),
        "*.*".to_string(),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlugKind {
    Exact,
    Pattern,
}

/// A permission slug as held by a role: either an exact name or a wildcard pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionSlug {
    raw: String,
    kind: SlugKind,
}

impl PermissionSlug {
    /// Classify a stored slug: any `*` segment makes it a pattern.
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let kind = if raw.split(SEGMENT_SEP).any(|s| s == WILDCARD) { SlugKind::Pattern } else { SlugKind::Exact };
        Self { raw, kind }
    }

    pub fn exact(raw: impl Into<String>) -> Self { Self { raw: raw.into(), kind: SlugKind::Exact } }

    pub fn pattern(raw: impl Into<String>) -> Self { Self { raw: raw.into(), kind: SlugKind::Pattern } }

    pub fn canonical(service: Service, action: PermissionAction) -> Self { Self::exact(build_permission_slug(service, action)) }

    pub fn as_str(&self) -> &str { &self.raw }
    pub fn kind(&self) -> SlugKind { self.kind }
    pub fn is_pattern(&self) -> bool { self.kind == SlugKind::Pattern }

    /// Whether holding this slug satisfies a check for `target`.
    pub fn matches(&self, target: &str) -> bool {
        match self.kind {
            SlugKind::Exact => self.raw == target,
            SlugKind::Pattern => self.raw == target || matches_wildcard(&self.raw, target),
        }
    }
}

impl Display for PermissionSlug {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(&self.raw) }
}

impl From<&str> for PermissionSlug {
    fn from(s: &str) -> Self { Self::parse(s) }
}

#[cfg(test)]
#[path = "slug_tests.rs"]
mod slug_tests;
