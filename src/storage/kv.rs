use std::collections::HashMap as StdHashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use super::StoreError;

/// Value variants supported by the TTL key-value store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KvValue {
    Str(String),
    Int(i64),
    Json(serde_json::Value),
}

impl KvValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            KvValue::Int(i) => Some(*i),
            KvValue::Str(s) => s.parse().ok(),
            KvValue::Json(j) => j.as_i64(),
        }
    }
}

/// Key-value store with per-key TTL consumed by the login guard.
///
/// `increment` must be atomic with respect to concurrent callers on the same key;
/// the attempt counter relies on it to avoid lost updates.
pub trait TtlStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<KvValue>, StoreError>;
    fn put(&self, key: &str, value: KvValue, ttl: Duration) -> Result<(), StoreError>;
    fn has(&self, key: &str) -> Result<bool, StoreError>;
    fn forget(&self, key: &str) -> Result<bool, StoreError>;
    /// Store `value` only when no live entry exists, in one step. Returns `None` when
    /// this call wrote the key, otherwise the value already there.
    fn put_if_absent(&self, key: &str, value: KvValue, ttl: Duration) -> Result<Option<KvValue>, StoreError>;
    /// Add one to an integer key (missing or expired keys start at zero) and
    /// give the key a fresh TTL. Returns the new value.
    fn increment(&self, key: &str, ttl: Duration) -> Result<i64, StoreError>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: KvValue,
    expires_at: DateTime<Utc>,
}

/// In-memory TTL store. Expiry is lazy: a key past its deadline is removed on the
/// next access, or by `sweep`.
#[derive(Clone)]
pub struct MemoryKvStore {
    map: Arc<parking_lot::RwLock<StdHashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MemoryKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MemoryKvStore({} keys)", self.map.read().len())
    }
}

impl MemoryKvStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { map: Arc::new(parking_lot::RwLock::new(StdHashMap::new())), clock }
    }

    pub fn len(&self) -> usize { self.map.read().len() }
    pub fn is_empty(&self) -> bool { self.map.read().is_empty() }

    /// Remove expired keys. Returns number removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut w = self.map.write();
        let before = w.len();
        w.retain(|_, e| e.expires_at > now);
        before - w.len()
    }

    fn expiry(&self, key: &str, now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, StoreError> {
        if ttl <= Duration::zero() {
            return Err(StoreError::InvalidTtl { key: key.to_string() });
        }
        now.checked_add_signed(ttl).ok_or_else(|| StoreError::InvalidTtl { key: key.to_string() })
    }

    /// Live entry lookup; removes the key when it has expired.
    fn live(&self, key: &str) -> Option<KvValue> {
        let now = self.clock.now();
        {
            let r = self.map.read();
            match r.get(key) {
                None => return None,
                Some(ent) if ent.expires_at > now => return Some(ent.value.clone()),
                Some(_) => {}
            }
        }
        // Expired: drop it, re-checking under the write lock in case it was rewritten meanwhile
        let mut w = self.map.write();
        match w.get(key) {
            Some(ent) if ent.expires_at > now => Some(ent.value.clone()),
            Some(_) => { w.remove(key); None }
            None => None,
        }
    }
}

impl TtlStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<KvValue>, StoreError> { Ok(self.live(key)) }

    fn put(&self, key: &str, value: KvValue, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = self.expiry(key, self.clock.now(), ttl)?;
        self.map.write().insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool, StoreError> { Ok(self.live(key).is_some()) }

    fn forget(&self, key: &str) -> Result<bool, StoreError> { Ok(self.map.write().remove(key).is_some()) }

    fn put_if_absent(&self, key: &str, value: KvValue, ttl: Duration) -> Result<Option<KvValue>, StoreError> {
        let now = self.clock.now();
        let expires_at = self.expiry(key, now, ttl)?;
        let mut w = self.map.write();
        if let Some(ent) = w.get(key).filter(|e| e.expires_at > now) {
            return Ok(Some(ent.value.clone()));
        }
        w.insert(key.to_string(), Entry { value, expires_at });
        Ok(None)
    }

    fn increment(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let now = self.clock.now();
        let expires_at = self.expiry(key, now, ttl)?;
        let mut w = self.map.write();
        let current = match w.get(key) {
            Some(ent) if ent.expires_at > now => match ent.value.as_int() {
                Some(i) => i,
                None => return Err(StoreError::NotAnInteger { key: key.to_string() }),
            },
            _ => 0,
        };
        let next = current + 1;
        w.insert(key.to_string(), Entry { value: KvValue::Int(next), expires_at });
        Ok(next)
    }
}

#[cfg(test)]
#[path = "kv_tests.rs"]
mod kv_tests;
