//! Time source abstraction.
//!
//! Every service takes a shared [`Clock`] instead of calling `Utc::now()`
//! directly, so time-window and usage-accounting logic can be tested
//! deterministically.

use chrono::{DateTime, Local, NaiveDate, Utc};
use std::sync::{Arc, Mutex};

/// A source of the current time.
pub trait Clock: Send + Sync {
    /// Current instant in UTC.
    fn now(&self) -> DateTime<Utc>;

    /// Current calendar date in the device's local timezone.
    ///
    /// Daily usage limits reset on the local date, not the UTC date.
    fn today(&self) -> NaiveDate {
        self.now().with_timezone(&Local).date_naive()
    }

    /// Minutes since local midnight, for time-window evaluation.
    fn minute_of_day(&self) -> u32 {
        use chrono::Timelike;
        let local = self.now().with_timezone(&Local);
        local.hour() * 60 + local.minute()
    }
}

/// Wall-clock implementation used by the running agent.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests.
///
/// `today` and `minute_of_day` are derived from the set instant interpreted
/// as local time already, so tests can pin exact minutes.
#[derive(Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.inner.lock().unwrap();
        *guard += delta;
    }

    /// Jump to an absolute instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        let mut guard = self.inner.lock().unwrap();
        *guard = instant;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.inner.lock().unwrap()
    }

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    fn minute_of_day(&self) -> u32 {
        use chrono::Timelike;
        let now = self.now();
        now.hour() * 60 + now.minute()
    }
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;
