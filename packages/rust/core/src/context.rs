//! Run identity and the clock every processing stamp is taken from.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use legisync_shared::RunId;

/// Source of processing timestamps (`log_file_created`, orphan `last_seen`, ...).
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays.
pub struct FixedClock {
    at: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { at: Mutex::new(at) }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.at.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut at = self.at.lock().unwrap_or_else(|e| e.into_inner());
        *at += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.at.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Identity and start time of one run.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    clock: Arc<dyn Clock>,
}

impl RunContext {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            run_id: RunId::new(),
            started_at: clock.now(),
            clock,
        }
    }

    /// A context on the system clock.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_clock_drives_context() {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(FixedClock::new(start));
        let ctx = RunContext::new(clock.clone());
        assert_eq!(ctx.started_at, start);

        clock.advance(Duration::minutes(5));
        assert_eq!(ctx.now(), start + Duration::minutes(5));
        assert_eq!(ctx.started_at, start);
    }

    #[test]
    fn contexts_get_distinct_run_ids() {
        assert_ne!(RunContext::system().run_id, RunContext::system().run_id);
    }
}
