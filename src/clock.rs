//! Wall-clock abstraction shared by the role cache, the TTL store and the login guard.
//! Production code uses `SystemClock`; tests drive expiry with `ManualClock`.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> { Utc::now() }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self { Self { now: RwLock::new(start) } }

    pub fn advance(&self, by: Duration) {
        let mut w = self.now.write();
        *w += by;
    }

    pub fn set(&self, at: DateTime<Utc>) { *self.now.write() = at; }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> { *self.now.read() }
}
