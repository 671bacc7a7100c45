//! Time source for breaker decisions.

use std::sync::Mutex;
use std::time::Duration;

use crate::UtcDateTime;

pub trait Clock: Send + Sync {
    fn now(&self) -> UtcDateTime;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UtcDateTime {
        UtcDateTime::now()
    }
}

/// Clock that only moves when told to. Used to drive cooldowns in tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<UtcDateTime>,
}

impl ManualClock {
    pub fn new(start: UtcDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("manual clock mutex poisoned");
        *now = now.saturating_add(by);
    }

    pub fn set(&self, to: UtcDateTime) {
        *self.now.lock().expect("manual clock mutex poisoned") = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(UtcDateTime::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> UtcDateTime {
        *self.now.lock().expect("manual clock mutex poisoned")
    }
}
