use super::*;
use crate::clock::ManualClock;
use chrono::TimeZone;

fn store() -> (Arc<ManualClock>, MemoryKvStore) {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 4, 9, 30, 0).unwrap()));
    let kv = MemoryKvStore::new(clock.clone());
    (clock, kv)
}

#[test]
fn put_get_until_ttl_elapses() {
    let (clock, kv) = store();
    kv.put("k", KvValue::Str("v".into()), Duration::minutes(5)).unwrap();
    assert_eq!(kv.get("k").unwrap(), Some(KvValue::Str("v".into())));
    assert!(kv.has("k").unwrap());

    clock.advance(Duration::minutes(5));
    assert_eq!(kv.get("k").unwrap(), None);
    assert!(!kv.has("k").unwrap());
    // expired key was dropped on access
    assert!(kv.is_empty());
}

#[test]
fn increment_starts_from_zero_and_refreshes_ttl() {
    let (clock, kv) = store();
    assert_eq!(kv.increment("c", Duration::minutes(5)).unwrap(), 1);
    clock.advance(Duration::minutes(4));
    assert_eq!(kv.increment("c", Duration::minutes(5)).unwrap(), 2);
    // 4 more minutes: past the first deadline but inside the refreshed one
    clock.advance(Duration::minutes(4));
    assert_eq!(kv.get("c").unwrap().and_then(|v| v.as_int()), Some(2));

    clock.advance(Duration::minutes(2));
    assert_eq!(kv.increment("c", Duration::minutes(5)).unwrap(), 1);
}

#[test]
fn increment_rejects_non_integer_values() {
    let (_clock, kv) = store();
    kv.put("c", KvValue::Str("abc".into()), Duration::minutes(1)).unwrap();
    let err = kv.increment("c", Duration::minutes(1)).unwrap_err();
    assert!(matches!(err, StoreError::NotAnInteger { .. }));
}

#[test]
fn zero_ttl_is_rejected() {
    let (_clock, kv) = store();
    assert!(kv.put("k", KvValue::Int(1), Duration::zero()).is_err());
}

#[test]
fn ttl_past_the_clock_range_is_rejected() {
    let (_clock, kv) = store();
    let err = kv.put("k", KvValue::Int(1), Duration::MAX).unwrap_err();
    assert!(matches!(err, StoreError::InvalidTtl { .. }));
    assert!(kv.increment("c", Duration::MAX).is_err());
    assert!(kv.is_empty());
}

#[test]
fn put_if_absent_keeps_the_live_value() {
    let (clock, kv) = store();
    assert_eq!(kv.put_if_absent("lock", KvValue::Int(1), Duration::minutes(10)).unwrap(), None);
    assert_eq!(kv.put_if_absent("lock", KvValue::Int(2), Duration::minutes(10)).unwrap(), Some(KvValue::Int(1)));
    assert_eq!(kv.get("lock").unwrap(), Some(KvValue::Int(1)));

    // an expired entry counts as absent
    clock.advance(Duration::minutes(10));
    assert_eq!(kv.put_if_absent("lock", KvValue::Int(3), Duration::minutes(10)).unwrap(), None);
    assert_eq!(kv.get("lock").unwrap(), Some(KvValue::Int(3)));
    assert!(kv.put_if_absent("other", KvValue::Int(1), Duration::zero()).is_err());
}

#[test]
fn forget_and_sweep() {
    let (clock, kv) = store();
    kv.put("a", KvValue::Int(1), Duration::seconds(10)).unwrap();
    kv.put("b", KvValue::Int(2), Duration::hours(1)).unwrap();
    assert!(kv.forget("b").unwrap());
    assert!(!kv.forget("b").unwrap());

    kv.put("c", KvValue::Int(3), Duration::hours(1)).unwrap();
    clock.advance(Duration::seconds(11));
    assert_eq!(kv.sweep(), 1);
    assert_eq!(kv.len(), 1);
}

#[test]
fn concurrent_increments_do_not_lose_updates() {
    let (_clock, kv) = store();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let kv = kv.clone();
            std::thread::spawn(move || {
                for _ in 0..250 { kv.increment("hot", Duration::minutes(5)).unwrap(); }
            })
        })
        .collect();
    for h in handles { h.join().unwrap(); }
    assert_eq!(kv.get("hot").unwrap().and_then(|v| v.as_int()), Some(2000));
}
