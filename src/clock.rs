//! Wall-clock seam for the Stream Writer.
//!
//! Production code always runs on [`SystemClock`]. Tests substitute
//! [`FixedClock`] to drive rotation across a UTC day boundary
//! deterministically (§8 P5, scenario 3) without sleeping real time.

use chrono::{DateTime, Utc};
use std::sync::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to a caller-controlled instant, mutable via `set`.
pub struct FixedClock(Mutex<DateTime<Utc>>);

impl FixedClock {
    pub fn new(initial: DateTime<Utc>) -> Self {
        Self(Mutex::new(initial))
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.0.lock().expect("FixedClock mutex poisoned") = at;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().expect("FixedClock mutex poisoned")
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_reports_set_value() {
        let t1 = DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let t2 = DateTime::parse_from_rfc3339("2030-01-02T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = FixedClock::new(t1);
        assert_eq!(clock.now(), t1);
        clock.set(t2);
        assert_eq!(clock.now(), t2);
    }
}
