//! Failed-login tracking with escalating lockouts.
//!
//! All state lives in the injected `TtlStore`, keyed by normalized email:
//! - `login_attempts:{email}`: failure counter, TTL refreshed on every failure;
//! - `login_lock:{email}`: lock expiry (epoch millis), TTL = lock duration;
//! - `login_lock_day:{email}:{date}`: marks that the email was locked on that UTC day.
//!
//! A lockout while the day marker exists uses the repeat duration. The lock key is
//! written with `put_if_absent`, so concurrent failures at the limit create one lock.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::storage::{KvValue, TtlStore};

const TARGET: &str = "lendbook::login";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub max_attempts: u32,
    pub attempt_window: Duration,
    pub first_lock: Duration,
    pub repeat_lock: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_window: Duration::minutes(5),
            first_lock: Duration::hours(1),
            repeat_lock: Duration::hours(24),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptResult {
    pub is_locked: bool,
    pub remaining_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub should_warn: bool,
    pub attempt_count: u32,
}

pub struct LoginAttemptGuard {
    store: Arc<dyn TtlStore>,
    clock: Arc<dyn Clock>,
    policy: LockoutPolicy,
}

impl std::fmt::Debug for LoginAttemptGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginAttemptGuard").field("policy", &self.policy).finish()
    }
}

fn normalize(email: &str) -> String { email.trim().to_ascii_lowercase() }

fn attempts_key(email: &str) -> String { format!("login_attempts:{}", email) }
fn lock_key(email: &str) -> String { format!("login_lock:{}", email) }
fn day_key(email: &str, at: DateTime<Utc>) -> String { format!("login_lock_day:{}:{}", email, at.format("%Y-%m-%d")) }

impl LoginAttemptGuard {
    pub fn new(store: Arc<dyn TtlStore>, clock: Arc<dyn Clock>, policy: LockoutPolicy) -> Self {
        Self { store, clock, policy }
    }

    pub fn policy(&self) -> &LockoutPolicy { &self.policy }

    fn locked_result(&self, expires_at: Option<DateTime<Utc>>) -> AttemptResult {
        AttemptResult {
            is_locked: true,
            remaining_attempts: 0,
            lock_expires_at: expires_at,
            should_warn: false,
            attempt_count: self.policy.max_attempts,
        }
    }

    fn open_result(&self, count: u32) -> AttemptResult {
        AttemptResult {
            is_locked: false,
            remaining_attempts: self.policy.max_attempts.saturating_sub(count),
            lock_expires_at: None,
            should_warn: count > 0 && count + 1 == self.policy.max_attempts,
            attempt_count: count,
        }
    }

    /// Current lock expiry, if the lock key is live.
    fn active_lock(&self, email: &str) -> AppResult<Option<DateTime<Utc>>> {
        let Some(value) = self.store.get(&lock_key(email))? else { return Ok(None); };
        let expires = value.as_int().and_then(|ms| Utc.timestamp_millis_opt(ms).single());
        Ok(Some(expires.unwrap_or_else(|| self.clock.now())))
    }

    pub fn record_failed_attempt(&self, email: &str) -> AppResult<AttemptResult> {
        let email = normalize(email);
        if let Some(expires) = self.active_lock(&email)? {
            debug!(target: TARGET, email = %email, "failed attempt while locked; counters untouched");
            return Ok(self.locked_result(Some(expires)));
        }

        let count = self.store.increment(&attempts_key(&email), self.policy.attempt_window)?;
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        if count < self.policy.max_attempts {
            // A concurrent request may have locked the account after our first check.
            if let Some(expires) = self.active_lock(&email)? {
                self.store.forget(&attempts_key(&email))?;
                return Ok(self.locked_result(Some(expires)));
            }
            let result = self.open_result(count);
            debug!(target: TARGET, email = %email, count, should_warn = result.should_warn, "failed attempt recorded");
            return Ok(result);
        }

        let now = self.clock.now();
        let marker = day_key(&email, now);
        let duration = if self.store.has(&marker)? { self.policy.repeat_lock } else { self.policy.first_lock };
        let expires_at = now
            .checked_add_signed(duration)
            .ok_or_else(|| AppError::internal("lock_out_of_range", format!("lock of {} overflows the clock", duration)))?;

        // Only the request that creates the lock writes the day marker and resets the counter.
        let lock = KvValue::Int(expires_at.timestamp_millis());
        if let Some(existing) = self.store.put_if_absent(&lock_key(&email), lock, duration)? {
            self.store.forget(&attempts_key(&email))?;
            let expires = existing.as_int().and_then(|ms| Utc.timestamp_millis_opt(ms).single());
            debug!(target: TARGET, email = %email, "lock already set by a concurrent attempt");
            return Ok(self.locked_result(Some(expires.unwrap_or(now))));
        }
        self.store.forget(&attempts_key(&email))?;
        self.store.put(&marker, KvValue::Int(now.timestamp_millis()), Duration::hours(24))?;
        warn!(
            target: TARGET,
            email = %email,
            lock_minutes = duration.num_minutes(),
            expires_at = %expires_at,
            "account locked after repeated failed logins"
        );
        Ok(self.locked_result(Some(expires_at)))
    }

    /// Read-only view of the lock state and remaining attempts.
    pub fn check_user_status(&self, email: &str) -> AppResult<AttemptResult> {
        let email = normalize(email);
        if let Some(expires) = self.active_lock(&email)? {
            return Ok(self.locked_result(Some(expires)));
        }
        let count = self
            .store
            .get(&attempts_key(&email))?
            .and_then(|v| v.as_int())
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0);
        Ok(self.open_result(count))
    }

    /// Reset the failure counter after a successful login. An active lock is kept.
    pub fn clear_attempts(&self, email: &str) -> AppResult<()> {
        let email = normalize(email);
        self.store.forget(&attempts_key(&email))?;
        debug!(target: TARGET, email = %email, "attempts cleared");
        Ok(())
    }
}
