//! Login attempt guard: counting, lockouts, same-day escalation and store failures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};

use chrono::{Duration, TimeZone, Utc};

use lendbook::clock::{Clock, ManualClock};
use lendbook::identity::{LockoutPolicy, LoginAttemptGuard};
use lendbook::storage::{KvValue, MemoryKvStore, StoreError, TtlStore};

fn guard_with(policy: LockoutPolicy) -> (Arc<ManualClock>, LoginAttemptGuard) {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()));
    let store = Arc::new(MemoryKvStore::new(clock.clone()));
    (clock.clone(), LoginAttemptGuard::new(store, clock, policy))
}

fn guard() -> (Arc<ManualClock>, LoginAttemptGuard) { guard_with(LockoutPolicy::default()) }

#[test]
fn third_failure_locks_for_an_hour() {
    let (clock, g) = guard();
    let r1 = g.record_failed_attempt("a@x.com").unwrap();
    assert_eq!((r1.attempt_count, r1.remaining_attempts, r1.is_locked, r1.should_warn), (1, 2, false, false));

    let r2 = g.record_failed_attempt("a@x.com").unwrap();
    assert_eq!((r2.attempt_count, r2.remaining_attempts, r2.is_locked), (2, 1, false));
    assert!(r2.should_warn);

    let r3 = g.record_failed_attempt("a@x.com").unwrap();
    assert!(r3.is_locked);
    assert_eq!(r3.remaining_attempts, 0);
    assert_eq!(r3.attempt_count, 3);
    assert_eq!(r3.lock_expires_at, Some(clock.now() + Duration::hours(1)));

    let status = g.check_user_status("a@x.com").unwrap();
    assert!(status.is_locked);
    assert_eq!(status.lock_expires_at, r3.lock_expires_at);
}

#[test]
fn second_lock_on_the_same_day_lasts_a_day() {
    let (clock, g) = guard();
    for _ in 0..3 {
        g.record_failed_attempt("a@x.com").unwrap();
    }
    clock.advance(Duration::minutes(61));
    assert!(!g.check_user_status("a@x.com").unwrap().is_locked);

    g.record_failed_attempt("a@x.com").unwrap();
    g.record_failed_attempt("a@x.com").unwrap();
    let r = g.record_failed_attempt("a@x.com").unwrap();
    assert!(r.is_locked);
    assert_eq!(r.lock_expires_at, Some(clock.now() + Duration::hours(24)));
}

#[test]
fn lock_on_a_new_day_starts_at_an_hour() {
    let (clock, g) = guard();
    for _ in 0..3 {
        g.record_failed_attempt("a@x.com").unwrap();
    }
    clock.advance(Duration::hours(25));
    for _ in 0..2 {
        g.record_failed_attempt("a@x.com").unwrap();
    }
    let r = g.record_failed_attempt("a@x.com").unwrap();
    assert_eq!(r.lock_expires_at, Some(clock.now() + Duration::hours(1)));
}

#[test]
fn failures_while_locked_change_nothing() {
    let (clock, g) = guard();
    for _ in 0..3 {
        g.record_failed_attempt("a@x.com").unwrap();
    }
    let expiry = g.check_user_status("a@x.com").unwrap().lock_expires_at;
    clock.advance(Duration::minutes(10));
    for _ in 0..5 {
        let r = g.record_failed_attempt("a@x.com").unwrap();
        assert!(r.is_locked);
        assert_eq!(r.lock_expires_at, expiry);
    }
    // the counter was reset at lock time and stays empty once the lock lapses
    clock.advance(Duration::minutes(51));
    let status = g.check_user_status("a@x.com").unwrap();
    assert!(!status.is_locked);
    assert_eq!(status.attempt_count, 0);
}

#[test]
fn clearing_attempts_resets_the_count() {
    let (_clock, g) = guard();
    g.record_failed_attempt("a@x.com").unwrap();
    g.record_failed_attempt("a@x.com").unwrap();
    g.clear_attempts("a@x.com").unwrap();
    let status = g.check_user_status("a@x.com").unwrap();
    assert_eq!(status.attempt_count, 0);
    assert_eq!(status.remaining_attempts, 3);
    assert!(!status.is_locked);
}

#[test]
fn clearing_attempts_keeps_an_active_lock() {
    let (_clock, g) = guard();
    for _ in 0..3 {
        g.record_failed_attempt("a@x.com").unwrap();
    }
    g.clear_attempts("a@x.com").unwrap();
    assert!(g.check_user_status("a@x.com").unwrap().is_locked);
}

#[test]
fn attempts_expire_after_the_window() {
    let (clock, g) = guard();
    g.record_failed_attempt("a@x.com").unwrap();
    g.record_failed_attempt("a@x.com").unwrap();
    clock.advance(Duration::minutes(6));
    assert_eq!(g.check_user_status("a@x.com").unwrap().attempt_count, 0);
    let r = g.record_failed_attempt("a@x.com").unwrap();
    assert_eq!(r.attempt_count, 1);
    assert!(!r.is_locked);
}

#[test]
fn every_failure_refreshes_the_window() {
    let (clock, g) = guard();
    g.record_failed_attempt("a@x.com").unwrap();
    clock.advance(Duration::minutes(4));
    g.record_failed_attempt("a@x.com").unwrap();
    clock.advance(Duration::minutes(4));
    let r = g.record_failed_attempt("a@x.com").unwrap();
    assert!(r.is_locked);
}

#[test]
fn emails_are_normalized() {
    let (_clock, g) = guard();
    g.record_failed_attempt("A@X.com").unwrap();
    g.record_failed_attempt(" a@x.COM ").unwrap();
    assert_eq!(g.check_user_status("a@x.com").unwrap().attempt_count, 2);
    assert_eq!(g.check_user_status("b@x.com").unwrap().attempt_count, 0);
}

#[test]
fn unknown_email_status_is_clean() {
    let (_clock, g) = guard();
    let s = g.check_user_status("nobody@x.com").unwrap();
    assert!(!s.is_locked);
    assert!(!s.should_warn);
    assert_eq!(s.remaining_attempts, 3);
    assert_eq!(s.lock_expires_at, None);
}

#[test]
fn policy_is_configurable() {
    let (clock, g) = guard_with(LockoutPolicy { max_attempts: 5, first_lock: Duration::minutes(15), ..LockoutPolicy::default() });
    for i in 1..5 {
        let r = g.record_failed_attempt("a@x.com").unwrap();
        assert_eq!(r.attempt_count, i);
        assert_eq!(r.should_warn, i == 4);
    }
    let r = g.record_failed_attempt("a@x.com").unwrap();
    assert_eq!(r.lock_expires_at, Some(clock.now() + Duration::minutes(15)));
}

#[test]
fn result_serializes_without_empty_expiry() {
    let (_clock, g) = guard();
    let r = g.record_failed_attempt("a@x.com").unwrap();
    let v = serde_json::to_value(&r).unwrap();
    assert!(v.get("lock_expires_at").is_none());
    assert_eq!(v["remaining_attempts"], 2);
}

#[test]
fn concurrent_failures_are_all_counted() {
    let (_clock, g) = guard_with(LockoutPolicy { max_attempts: 1000, ..LockoutPolicy::default() });
    let g = Arc::new(g);
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let g = g.clone();
            std::thread::spawn(move || {
                for _ in 0..20 {
                    g.record_failed_attempt("a@x.com").unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(g.check_user_status("a@x.com").unwrap().attempt_count, 80);
}

struct DownStore;

impl TtlStore for DownStore {
    fn get(&self, _key: &str) -> Result<Option<KvValue>, StoreError> { Err(StoreError::Unavailable("down".into())) }
    fn put(&self, _key: &str, _value: KvValue, _ttl: Duration) -> Result<(), StoreError> { Err(StoreError::Unavailable("down".into())) }
    fn has(&self, _key: &str) -> Result<bool, StoreError> { Err(StoreError::Unavailable("down".into())) }
    fn forget(&self, _key: &str) -> Result<bool, StoreError> { Err(StoreError::Unavailable("down".into())) }
    fn increment(&self, _key: &str, _ttl: Duration) -> Result<i64, StoreError> { Err(StoreError::Unavailable("down".into())) }
    fn put_if_absent(&self, _key: &str, _value: KvValue, _ttl: Duration) -> Result<Option<KvValue>, StoreError> {
        Err(StoreError::Unavailable("down".into()))
    }
}

#[test]
fn store_failures_surface_as_io_errors() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let g = LoginAttemptGuard::new(Arc::new(DownStore), clock, LockoutPolicy::default());
    let err = g.record_failed_attempt("a@x.com").unwrap_err();
    assert_eq!(err.http_status(), 503);
    assert!(g.check_user_status("a@x.com").is_err());
    assert!(g.clear_attempts("a@x.com").is_err());
}

/// Memory store whose reads are slow, so concurrent callers interleave between their
/// lock check and their lock write.
struct SlowReads {
    inner: MemoryKvStore,
}

impl TtlStore for SlowReads {
    fn get(&self, key: &str) -> Result<Option<KvValue>, StoreError> {
        std::thread::sleep(std::time::Duration::from_millis(20));
        self.inner.get(key)
    }
    fn put(&self, key: &str, value: KvValue, ttl: Duration) -> Result<(), StoreError> { self.inner.put(key, value, ttl) }
    fn has(&self, key: &str) -> Result<bool, StoreError> { self.inner.has(key) }
    fn forget(&self, key: &str) -> Result<bool, StoreError> { self.inner.forget(key) }
    fn increment(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> { self.inner.increment(key, ttl) }
    fn put_if_absent(&self, key: &str, value: KvValue, ttl: Duration) -> Result<Option<KvValue>, StoreError> {
        self.inner.put_if_absent(key, value, ttl)
    }
}

#[test]
fn concurrent_failures_at_the_limit_lock_once() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()));
    let store: Arc<dyn TtlStore> = Arc::new(SlowReads { inner: MemoryKvStore::new(clock.clone()) });
    let g = Arc::new(LoginAttemptGuard::new(store, clock.clone(), LockoutPolicy::default()));
    g.record_failed_attempt("a@x.com").unwrap();
    g.record_failed_attempt("a@x.com").unwrap();

    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let (g, barrier) = (g.clone(), barrier.clone());
            std::thread::spawn(move || {
                barrier.wait();
                g.record_failed_attempt("a@x.com").unwrap()
            })
        })
        .collect();
    let first_lock = Some(clock.now() + Duration::hours(1));
    for h in handles {
        let r = h.join().unwrap();
        assert!(r.is_locked);
        assert_eq!(r.lock_expires_at, first_lock);
    }
    assert_eq!(g.check_user_status("a@x.com").unwrap().lock_expires_at, first_lock);

    clock.advance(Duration::minutes(61));
    let status = g.check_user_status("a@x.com").unwrap();
    assert!(!status.is_locked);
    assert_eq!(status.attempt_count, 0);
}

/// Memory store that refuses writes to lock keys while `fail_locks` is set.
struct FailingLocks {
    inner: MemoryKvStore,
    fail_locks: AtomicBool,
}

impl FailingLocks {
    fn check(&self, key: &str) -> Result<(), StoreError> {
        if self.fail_locks.load(Ordering::SeqCst) && key.starts_with("login_lock:") {
            return Err(StoreError::Unavailable("lock write refused".into()));
        }
        Ok(())
    }
}

impl TtlStore for FailingLocks {
    fn get(&self, key: &str) -> Result<Option<KvValue>, StoreError> { self.inner.get(key) }
    fn put(&self, key: &str, value: KvValue, ttl: Duration) -> Result<(), StoreError> {
        self.check(key)?;
        self.inner.put(key, value, ttl)
    }
    fn has(&self, key: &str) -> Result<bool, StoreError> { self.inner.has(key) }
    fn forget(&self, key: &str) -> Result<bool, StoreError> { self.inner.forget(key) }
    fn increment(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> { self.inner.increment(key, ttl) }
    fn put_if_absent(&self, key: &str, value: KvValue, ttl: Duration) -> Result<Option<KvValue>, StoreError> {
        self.check(key)?;
        self.inner.put_if_absent(key, value, ttl)
    }
}

#[test]
fn failed_lock_write_keeps_the_count() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()));
    let store = Arc::new(FailingLocks { inner: MemoryKvStore::new(clock.clone()), fail_locks: AtomicBool::new(true) });
    let g = LoginAttemptGuard::new(store.clone(), clock.clone(), LockoutPolicy::default());
    g.record_failed_attempt("a@x.com").unwrap();
    g.record_failed_attempt("a@x.com").unwrap();

    let err = g.record_failed_attempt("a@x.com").unwrap_err();
    assert_eq!(err.http_status(), 503);
    let status = g.check_user_status("a@x.com").unwrap();
    assert!(!status.is_locked);
    assert_eq!(status.attempt_count, 3);

    // once the store recovers, the next failure locks
    store.fail_locks.store(false, Ordering::SeqCst);
    let r = g.record_failed_attempt("a@x.com").unwrap();
    assert!(r.is_locked);
    assert_eq!(r.lock_expires_at, Some(clock.now() + Duration::hours(1)));
}

#[test]
fn lock_beyond_the_clock_range_is_an_error() {
    let (_clock, g) = guard_with(LockoutPolicy { first_lock: Duration::MAX, ..LockoutPolicy::default() });
    g.record_failed_attempt("a@x.com").unwrap();
    g.record_failed_attempt("a@x.com").unwrap();
    let err = g.record_failed_attempt("a@x.com").unwrap_err();
    assert_eq!(err.http_status(), 500);
    assert!(!g.check_user_status("a@x.com").unwrap().is_locked);
}
