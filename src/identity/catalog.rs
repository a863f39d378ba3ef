//! Starting data: the canonical permission catalog, the default role ladder and the
//! grants between them. Seeding is idempotent; rows that already exist are skipped.

use serde::Serialize;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::storage::RbacRepository;
use super::engine::PermissionEngine;
use super::model::{NewPermission, NewRole, User};
use super::password::hash_password;
use super::slug::{build_permission_slug, PermissionAction, Service, PERMISSIONS_GRANT, ROLES_ASSIGN, USERS_MANAGE};

const TARGET: &str = "lendbook::rbac";

/// (slug, resource, action, requires_ownership) for the dotted resource-scoped permissions.
const RESOURCE_PERMISSIONS: &[(&str, &str, &str, bool)] = &[
    ("*.*", "*", "*", false),
    ("books.*", "books", "*", false),
    ("books.read", "books", "read", false),
    ("bundles.*", "bundles", "*", false),
    ("bundles.read", "bundles", "read", false),
    ("bundles.update", "bundles", "update", true),
    ("reports.*", "reports", "*", false),
    ("users.read", "users", "read", false),
];

/// (slug, name, level, parent) in creation order.
const ROLES: &[(&str, &str, i32, Option<&str>)] = &[
    ("admin", "Administrator", 80, None),
    ("manager", "Manager", 60, Some("admin")),
    ("librarian", "Librarian", 40, Some("manager")),
    ("member", "Member", 10, Some("librarian")),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub permissions_created: usize,
    pub roles_created: usize,
    pub grants_created: usize,
}

fn title(s: &str) -> String {
    s.split('_')
        .map(|w| {
            let mut c = w.chars();
            match c.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + c.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Every permission the default catalog defines.
pub fn default_permissions() -> Vec<NewPermission> {
    let mut out = Vec::new();
    for service in Service::ALL {
        for action in PermissionAction::ALL {
            out.push(NewPermission {
                name: format!("{} {}", title(service.as_str()), title(action.as_str())),
                slug: build_permission_slug(*service, *action),
                category: service.as_str().to_string(),
                action: action.as_str().to_string(),
                resource: service.as_str().to_string(),
                description: None,
                requires_ownership: false,
            });
        }
    }
    for (slug, category, action) in [(USERS_MANAGE, "users", "manage"), (ROLES_ASSIGN, "roles", "assign"), (PERMISSIONS_GRANT, "permissions", "grant")] {
        out.push(NewPermission {
            name: format!("{} {}", title(category), title(action)),
            slug: slug.to_string(),
            category: category.to_string(),
            action: action.to_string(),
            resource: category.to_string(),
            description: None,
            requires_ownership: false,
        });
    }
    for (slug, resource, action, requires_ownership) in RESOURCE_PERMISSIONS {
        out.push(NewPermission {
            name: format!("{} {}", title(resource), title(action)),
            slug: slug.to_string(),
            category: resource.to_string(),
            action: action.to_string(),
            resource: resource.to_string(),
            description: None,
            requires_ownership: *requires_ownership,
        });
    }
    out
}

fn canonical(service: Service, actions: &[PermissionAction]) -> impl Iterator<Item = String> + '_ {
    actions.iter().map(move |a| build_permission_slug(service, *a))
}

/// Permission slugs granted to a default role.
pub fn default_grants(role_slug: &str) -> Vec<String> {
    use PermissionAction::*;
    let mut out: Vec<String> = Vec::new();
    match role_slug {
        "admin" => {
            for s in Service::ALL { out.extend(canonical(*s, PermissionAction::ALL)); }
            out.extend([USERS_MANAGE, ROLES_ASSIGN, PERMISSIONS_GRANT, "*.*"].map(String::from));
        }
        "manager" => {
            for s in [Service::Books, Service::Reports, Service::Bundles] { out.extend(canonical(s, PermissionAction::ALL)); }
            out.extend(canonical(Service::Users, &[Read, View, Update]));
            out.extend([USERS_MANAGE, ROLES_ASSIGN, "books.*", "bundles.*", "reports.*", "users.read"].map(String::from));
        }
        "librarian" => {
            out.extend(canonical(Service::Books, &[Create, Read, Update, View, Export]));
            out.extend(canonical(Service::Bundles, &[Read, View]));
            out.extend(["books.*", "bundles.*"].map(String::from));
        }
        "member" => {
            out.extend(canonical(Service::Books, &[Read, View]));
            out.extend(canonical(Service::Bundles, &[Create, Read]));
            out.extend(["books.read", "bundles.read", "bundles.update"].map(String::from));
        }
        _ => {}
    }
    out
}

fn created<T>(res: AppResult<T>) -> AppResult<bool> {
    match res {
        Ok(_) => Ok(true),
        Err(e) if e.is_conflict() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Install the default catalog through the engine. Running it twice creates nothing.
pub fn seed_defaults(engine: &PermissionEngine) -> AppResult<SeedReport> {
    let mut report = SeedReport::default();
    for p in default_permissions() {
        if created(engine.create_permission(p))? { report.permissions_created += 1; }
    }
    for (slug, name, level, parent) in ROLES {
        let role = NewRole {
            name: name.to_string(),
            slug: slug.to_string(),
            description: None,
            level: *level,
            parent_slug: parent.map(String::from),
        };
        if created(engine.create_role(role))? { report.roles_created += 1; }
    }
    for (role, ..) in ROLES {
        for perm in default_grants(role) {
            if created(engine.grant_permission_to_role(role, &perm, None))? { report.grants_created += 1; }
        }
    }
    info!(
        target: TARGET,
        permissions = report.permissions_created,
        roles = report.roles_created,
        grants = report.grants_created,
        "default catalog seeded"
    );
    Ok(report)
}

/// Create the bootstrap super admin unless a user with that email already exists.
pub fn ensure_super_admin(repo: &dyn RbacRepository, email: &str, password: &str) -> AppResult<User> {
    let email = email.trim().to_ascii_lowercase();
    if email.is_empty() {
        return Err(AppError::user("invalid_email", "bootstrap admin email must not be empty"));
    }
    if let Some(existing) = repo.find_user_by_email(&email)? {
        return Ok(existing);
    }
    let user = repo.insert_user(User {
        id: 0,
        name: "Administrator".into(),
        email,
        password_hash: hash_password(password)?,
        is_active: true,
        is_super_admin: true,
    })?;
    info!(target: TARGET, user_id = user.id, email = %user.email, "bootstrap super admin created");
    Ok(user)
}
