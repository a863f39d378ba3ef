//! HTTP surface: login guarded by the lockout tracker, and permission checks
//! answered by the engine.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::LendbookConfig;
use crate::error::{AppError, AppResult};
use crate::identity::{self, AttemptResult, LoginAttemptGuard, PermissionEngine, User};
use crate::storage::{MemoryKvStore, MemoryRepository, OwnershipResolver, RbacRepository, TtlStore};

const TARGET: &str = "lendbook::server";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<PermissionEngine>,
    pub guard: Arc<LoginAttemptGuard>,
    pub repo: Arc<dyn RbacRepository>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(target: TARGET, code = self.code_str(), "{}", self.message());
        }
        (status, Json(serde_json::json!({"status": "error", "error": self}))).into_response()
    }
}

/// Wire the engine and the guard over the given stores, seed the default catalog
/// and create the bootstrap super admin when configured.
pub fn assemble<S>(config: &LendbookConfig, clock: Arc<dyn Clock>, store: Arc<S>, kv: Arc<dyn TtlStore>) -> AppResult<AppState>
where
    S: RbacRepository + OwnershipResolver + 'static,
{
    let settings = config.engine_settings().map_err(|e| AppError::user("invalid_config", format!("{:#}", e)))?;
    let policy = config.lockout_policy().map_err(|e| AppError::user("invalid_config", format!("{:#}", e)))?;
    let engine = Arc::new(PermissionEngine::over(store.clone(), clock.clone(), settings));
    identity::seed_defaults(&engine)?;
    if let (Some(email), Some(password)) = (&config.bootstrap_admin_email, &config.bootstrap_admin_password) {
        identity::ensure_super_admin(store.as_ref(), email, password)?;
    }
    let guard = Arc::new(LoginAttemptGuard::new(kv, clock, policy));
    Ok(AppState { engine, guard, repo: store })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "lendbook ok" }))
        .route("/api/auth/login", post(login))
        .route("/api/auth/status/{email}", get(login_status))
        .route("/api/users/{id}/permissions", get(user_permissions))
        .route("/api/authorize", post(authorize))
        .route("/api/authorize/resource", post(authorize_resource))
        .with_state(state)
}

pub async fn run(config: LendbookConfig) -> anyhow::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(MemoryRepository::new());
    let kv = Arc::new(MemoryKvStore::new(clock.clone()));
    let state = assemble(&config, clock, store, kv.clone())?;

    // Expired lockout keys are dropped lazily on access; sweep the rest periodically.
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            tick.tick().await;
            let dropped = kv.sweep();
            if dropped > 0 {
                tracing::debug!(target: TARGET, dropped, "swept expired login keys");
            }
        }
    });

    let app = router(state);
    let addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    info!(target: TARGET, "Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct LoginPayload {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
struct LoginOk {
    status: &'static str,
    user: User,
    roles: Vec<String>,
    permissions: Vec<String>,
}

fn attempt_response(status: StatusCode, label: &str, attempt: AttemptResult) -> Response {
    (status, Json(serde_json::json!({"status": label, "attempt": attempt}))).into_response()
}

fn authenticate(state: &AppState, payload: &LoginPayload) -> AppResult<Option<User>> {
    let user = state.repo.find_user_by_email(&payload.email)?;
    Ok(user.filter(|u| identity::verify_password(&u.password_hash, &payload.password)))
}

async fn login(State(state): State<AppState>, Json(payload): Json<LoginPayload>) -> Response {
    // The guard is consulted before credentials; a store failure refuses the login.
    let status = match state.guard.check_user_status(&payload.email) {
        Ok(s) => s,
        Err(e) => return e.into_response(),
    };
    if status.is_locked {
        return attempt_response(StatusCode::LOCKED, "locked", status);
    }

    let user = match authenticate(&state, &payload) {
        Ok(u) => u,
        Err(e) => return e.into_response(),
    };
    let Some(user) = user else {
        return match state.guard.record_failed_attempt(&payload.email) {
            Ok(r) if r.is_locked => attempt_response(StatusCode::LOCKED, "locked", r),
            Ok(r) => attempt_response(StatusCode::UNAUTHORIZED, "unauthorized", r),
            Err(e) => e.into_response(),
        };
    };
    if !user.is_active {
        warn!(target: TARGET, user_id = user.id, "login refused for deactivated account");
        return AppError::forbidden("account_inactive", "account is deactivated").into_response();
    }
    if let Err(e) = state.guard.clear_attempts(&payload.email) {
        return e.into_response();
    }

    let snapshot = state.engine.authorize_user(user.id);
    let roles: Vec<String> = snapshot.as_ref().map(|s| s.role_slugs().into_iter().map(String::from).collect()).unwrap_or_default();
    let permissions = state.engine.get_user_permissions(&user);
    info!(target: TARGET, user_id = user.id, "login ok");
    (StatusCode::OK, Json(LoginOk { status: "ok", user, roles, permissions })).into_response()
}

async fn login_status(State(state): State<AppState>, Path(email): Path<String>) -> AppResult<Json<AttemptResult>> {
    Ok(Json(state.guard.check_user_status(&email)?))
}

fn load_user(state: &AppState, user_id: i64) -> AppResult<User> {
    state
        .repo
        .find_user_by_id(user_id)?
        .map(|p| p.user)
        .ok_or_else(|| AppError::not_found("user_not_found", format!("user {} not found", user_id)))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserPermissions {
    pub user_id: i64,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

async fn user_permissions(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<UserPermissions>> {
    let user = load_user(&state, id)?;
    let mut permissions = state.engine.get_user_permissions(&user);
    permissions.sort();
    let roles: Vec<String> = state
        .engine
        .authorize_user(id)
        .map(|s| s.role_slugs().into_iter().map(String::from).collect())
        .unwrap_or_default();
    Ok(Json(UserPermissions { user_id: id, roles, permissions }))
}

#[derive(Debug, Deserialize)]
pub struct AuthorizePayload {
    pub user_id: i64,
    pub permission: String,
}

#[derive(Debug, Deserialize)]
pub struct ResourcePayload {
    pub user_id: i64,
    pub action: String,
    pub resource_type: String,
    pub resource_id: i64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
}

async fn authorize(State(state): State<AppState>, Json(payload): Json<AuthorizePayload>) -> AppResult<Json<Decision>> {
    let user = load_user(&state, payload.user_id)?;
    Ok(Json(Decision { allowed: state.engine.has_permission(&user, &payload.permission) }))
}

async fn authorize_resource(State(state): State<AppState>, Json(payload): Json<ResourcePayload>) -> AppResult<Json<Decision>> {
    let user = load_user(&state, payload.user_id)?;
    let allowed = state.engine.can_access_resource(&user, &payload.action, &payload.resource_type, payload.resource_id);
    Ok(Json(Decision { allowed }))
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod server_tests;
