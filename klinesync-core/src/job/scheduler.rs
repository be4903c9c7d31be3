//! Recurring download job with non-overlapping firings.
//!
//! The job state lives behind a mutex owned by the scheduler. A firing takes
//! the lock with `try_lock`, so a firing that lands while a cycle is running
//! is dropped rather than queued.

use super::clock::Clock;
use super::cycle::{CycleReport, CycleRequest, DownloadCycle};
use crate::domain::{truncate_to_day, TimeWindow};
use chrono::{DateTime, Utc};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

/// Mutable job state, only reachable while holding the scheduler's lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobState {
    /// Inclusive start of the next cycle's window.
    pub from_date: DateTime<Utc>,
    /// Completed cycles.
    pub runs: u64,
}

#[derive(Debug)]
pub enum FireOutcome {
    Completed(CycleReport),
    /// A cycle was already running.
    Dropped,
    /// Window empty (end of the configured range reached).
    Idle,
    /// The cycle panicked; `from_date` was left unchanged.
    Panicked,
}

pub struct RecurringScheduler {
    cycle: DownloadCycle,
    request: CycleRequest,
    clock: Arc<dyn Clock>,
    end: Option<DateTime<Utc>>,
    state: Mutex<JobState>,
}

impl RecurringScheduler {
    pub fn new(
        cycle: DownloadCycle,
        request: CycleRequest,
        from_date: DateTime<Utc>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cycle,
            request,
            clock,
            end: None,
            state: Mutex::new(JobState { from_date, runs: 0 }),
        }
    }

    /// Cap every window at `end`.
    pub fn with_end(mut self, end: Option<DateTime<Utc>>) -> Self {
        self.end = end;
        self
    }

    /// Current state. Blocks while a cycle is running.
    pub fn state(&self) -> JobState {
        *self.lock()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state.try_lock(), Err(TryLockError::WouldBlock))
    }

    /// Run one cycle over `[from_date, min(now, end))` unless one is already running.
    ///
    /// `from_date` moves to the start of the day containing `to`, or to `end`
    /// itself once the window reaches it.
    pub fn fire(&self) -> FireOutcome {
        let mut state = match self.state.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                tracing::warn!("previous cycle still running, firing dropped");
                return FireOutcome::Dropped;
            }
        };

        let now = self.clock.now();
        let to = self.end.map_or(now, |end| end.min(now));
        let window = match TimeWindow::new(state.from_date, to) {
            Ok(w) if !w.is_empty() => w,
            _ => {
                tracing::info!(from = %state.from_date, to = %to, "nothing to download");
                return FireOutcome::Idle;
            }
        };

        tracing::info!(
            run = state.runs + 1,
            from = %window.from(),
            to = %window.to(),
            "firing download job"
        );

        match panic::catch_unwind(AssertUnwindSafe(|| self.cycle.run(&self.request, window))) {
            Ok(report) => {
                // a window capped by `end` is final and is not re-covered
                let capped = self.end.is_some_and(|end| to == end);
                state.from_date = if capped { to } else { truncate_to_day(to) };
                state.runs += 1;
                tracing::info!(
                    runs = state.runs,
                    next_from = %state.from_date,
                    "download job completed"
                );
                FireOutcome::Completed(report)
            }
            Err(payload) => {
                tracing::error!(
                    panic = panic_message(payload.as_ref()),
                    from = %state.from_date,
                    "download cycle panicked, window will be retried"
                );
                FireOutcome::Panicked
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
