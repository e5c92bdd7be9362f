use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of the audit timestamps written by services.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to, for deterministic tests.
///
/// Clones share the same current time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current_ms: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn at(start: DateTime<Utc>) -> Self {
        Self {
            current_ms: Arc::new(AtomicI64::new(start.timestamp_millis())),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.current_ms.store(now.timestamp_millis(), Ordering::SeqCst);
    }

    /// Move forward; returns the new time.
    pub fn advance(&self, by: Duration) -> DateTime<Utc> {
        let ms = self
            .current_ms
            .fetch_add(by.num_milliseconds(), Ordering::SeqCst)
            + by.num_milliseconds();
        DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.current_ms.load(Ordering::SeqCst)).unwrap_or_default()
    }
}
