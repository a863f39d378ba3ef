//! Runtime configuration. Defaults, then an optional JSON file named by
//! `LENDBOOK_CONFIG`, then individual `LENDBOOK_*` environment overrides.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::identity::{EngineSettings, LockoutPolicy};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LendbookConfig {
    pub http_port: u16,
    pub role_cache_ttl_secs: i64,
    pub permission_cache_enabled: bool,
    pub permission_cache_ttl_secs: i64,
    pub max_login_attempts: u32,
    pub attempt_window_secs: i64,
    pub first_lock_secs: i64,
    pub repeat_lock_secs: i64,
    pub bootstrap_admin_email: Option<String>,
    #[serde(skip_serializing)]
    pub bootstrap_admin_password: Option<String>,
}

impl Default for LendbookConfig {
    fn default() -> Self {
        Self {
            http_port: 7878,
            role_cache_ttl_secs: 15 * 60,
            permission_cache_enabled: false,
            permission_cache_ttl_secs: 60,
            max_login_attempts: 3,
            attempt_window_secs: 5 * 60,
            first_lock_secs: 60 * 60,
            repeat_lock_secs: 24 * 60 * 60,
            bootstrap_admin_email: None,
            bootstrap_admin_password: None,
        }
    }
}

/// Upper bound for any configured duration (ten years).
const MAX_DURATION_SECS: i64 = 10 * 365 * 24 * 60 * 60;

fn duration_secs(field: &str, secs: i64, min: i64) -> Result<Duration> {
    if secs < min || secs > MAX_DURATION_SECS {
        bail!("{} must be between {} and {} seconds, got {}", field, min, MAX_DURATION_SECS, secs);
    }
    Duration::try_seconds(secs).with_context(|| format!("{} out of range", field))
}

fn parsed<T: std::str::FromStr>(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse::<T>().ok())
}

impl LendbookConfig {
    /// Read a JSON config file; absent keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        let cfg: Self = serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg)
    }

    /// Full resolution against the process environment.
    pub fn from_env() -> Result<Self> {
        let base = match std::env::var("LENDBOOK_CONFIG") {
            Ok(p) if !p.trim().is_empty() => Self::load(Path::new(p.trim()))?,
            _ => Self::default(),
        };
        let cfg = base.with_overrides(&|k| std::env::var(k).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the engine or the guard cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.engine_settings()?;
        self.lockout_policy()?;
        Ok(())
    }

    /// Apply `LENDBOOK_*` overrides from `lookup`. Unparseable values are ignored.
    pub fn with_overrides(mut self, lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = parsed(lookup, "LENDBOOK_HTTP_PORT") { self.http_port = v; }
        if let Some(v) = parsed(lookup, "LENDBOOK_ROLE_CACHE_TTL_SECS") { self.role_cache_ttl_secs = v; }
        if let Some(v) = parsed(lookup, "LENDBOOK_PERMISSION_CACHE_ENABLED") { self.permission_cache_enabled = v; }
        if let Some(v) = parsed(lookup, "LENDBOOK_PERMISSION_CACHE_TTL_SECS") { self.permission_cache_ttl_secs = v; }
        if let Some(v) = parsed(lookup, "LENDBOOK_MAX_LOGIN_ATTEMPTS") { self.max_login_attempts = v; }
        if let Some(v) = parsed(lookup, "LENDBOOK_ATTEMPT_WINDOW_SECS") { self.attempt_window_secs = v; }
        if let Some(v) = parsed(lookup, "LENDBOOK_FIRST_LOCK_SECS") { self.first_lock_secs = v; }
        if let Some(v) = parsed(lookup, "LENDBOOK_REPEAT_LOCK_SECS") { self.repeat_lock_secs = v; }
        if let Some(v) = lookup("LENDBOOK_BOOTSTRAP_ADMIN_EMAIL") { self.bootstrap_admin_email = Some(v); }
        if let Some(v) = lookup("LENDBOOK_BOOTSTRAP_ADMIN_PASSWORD") { self.bootstrap_admin_password = Some(v); }
        self
    }

    pub fn engine_settings(&self) -> Result<EngineSettings> {
        Ok(EngineSettings {
            role_cache_ttl: duration_secs("role_cache_ttl_secs", self.role_cache_ttl_secs, 0)?,
            permission_cache_enabled: self.permission_cache_enabled,
            permission_cache_ttl: duration_secs("permission_cache_ttl_secs", self.permission_cache_ttl_secs, 0)?,
        })
    }

    pub fn lockout_policy(&self) -> Result<LockoutPolicy> {
        if self.max_login_attempts == 0 {
            bail!("max_login_attempts must be at least 1");
        }
        Ok(LockoutPolicy {
            max_attempts: self.max_login_attempts,
            attempt_window: duration_secs("attempt_window_secs", self.attempt_window_secs, 1)?,
            first_lock: duration_secs("first_lock_secs", self.first_lock_secs, 1)?,
            repeat_lock: duration_secs("repeat_lock_secs", self.repeat_lock_secs, 1)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_match_engine_and_policy_defaults() {
        let cfg = LendbookConfig::default();
        assert_eq!(cfg.engine_settings().unwrap(), EngineSettings::default());
        assert_eq!(cfg.lockout_policy().unwrap(), LockoutPolicy::default());
        cfg.validate().unwrap();
    }

    #[test]
    fn out_of_range_durations_are_rejected() {
        let huge = LendbookConfig { first_lock_secs: i64::MAX, ..LendbookConfig::default() };
        let err = huge.lockout_policy().unwrap_err();
        assert!(format!("{:#}", err).contains("first_lock_secs"));
        assert!(huge.validate().is_err());

        let zero_lock = LendbookConfig { repeat_lock_secs: 0, ..LendbookConfig::default() };
        assert!(zero_lock.lockout_policy().is_err());
        let no_attempts = LendbookConfig { max_login_attempts: 0, ..LendbookConfig::default() };
        assert!(no_attempts.lockout_policy().is_err());
        let negative_cache = LendbookConfig { role_cache_ttl_secs: -5, ..LendbookConfig::default() };
        assert!(negative_cache.engine_settings().is_err());

        // a zero cache TTL is allowed and disables caching
        let no_cache = LendbookConfig { role_cache_ttl_secs: 0, ..LendbookConfig::default() };
        assert_eq!(no_cache.engine_settings().unwrap().role_cache_ttl, Duration::zero());
    }

    #[test]
    fn file_then_env_overrides() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"http_port": 9000, "max_login_attempts": 5}}"#).unwrap();
        let cfg = LendbookConfig::load(f.path()).unwrap();
        assert_eq!(cfg.http_port, 9000);
        assert_eq!(cfg.max_login_attempts, 5);
        assert_eq!(cfg.first_lock_secs, 3600);

        let env: HashMap<&str, &str> = [
            ("LENDBOOK_HTTP_PORT", "9100"),
            ("LENDBOOK_PERMISSION_CACHE_ENABLED", "true"),
            ("LENDBOOK_FIRST_LOCK_SECS", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let cfg = cfg.with_overrides(&|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.http_port, 9100);
        assert!(cfg.permission_cache_enabled);
        assert_eq!(cfg.first_lock_secs, 3600);
    }

    #[test]
    fn malformed_file_reports_path() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{{ nope").unwrap();
        let err = LendbookConfig::load(f.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("parsing config"));
    }
}
