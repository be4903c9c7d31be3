//! Fixed-interval trigger that fires the scheduler on background threads.

use super::scheduler::{FireOutcome, RecurringScheduler};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const STOP_POLL: Duration = Duration::from_millis(50);

/// Firing counts, by outcome.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TriggerStats {
    pub fired: u64,
    pub completed: u64,
    pub dropped: u64,
    pub idle: u64,
    pub panicked: u64,
}

impl TriggerStats {
    fn record(&mut self, outcome: &FireOutcome) {
        match outcome {
            FireOutcome::Completed(_) => self.completed += 1,
            FireOutcome::Dropped => self.dropped += 1,
            FireOutcome::Idle => self.idle += 1,
            FireOutcome::Panicked => self.panicked += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IntervalTrigger {
    interval: Duration,
    wait_for_completion: bool,
    start_now: bool,
    max_firings: Option<u64>,
}

impl Default for IntervalTrigger {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(12 * 3600),
            wait_for_completion: true,
            start_now: true,
            max_firings: None,
        }
    }
}

impl IntervalTrigger {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    /// When true, a firing waits for the previous cycle to finish.
    /// When false, firings go out on schedule and the scheduler drops overlaps.
    pub fn wait_for_completion(mut self, wait: bool) -> Self {
        self.wait_for_completion = wait;
        self
    }

    pub fn start_now(mut self, start_now: bool) -> Self {
        self.start_now = start_now;
        self
    }

    /// Stop on its own after `n` firings.
    pub fn max_firings(mut self, n: u64) -> Self {
        self.max_firings = Some(n);
        self
    }

    /// Fire `scheduler` every interval until `stop` is set.
    ///
    /// Each firing runs on its own named thread. The in-flight cycle is always
    /// joined before returning.
    pub fn run(
        &self,
        scheduler: Arc<RecurringScheduler>,
        stop: Arc<AtomicBool>,
    ) -> io::Result<TriggerStats> {
        let mut stats = TriggerStats::default();
        let mut pending: Vec<JoinHandle<FireOutcome>> = Vec::new();
        let mut next = if self.start_now {
            Instant::now()
        } else {
            Instant::now() + self.interval
        };

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            wait_for_completion = self.wait_for_completion,
            "trigger started"
        );

        while self.max_firings.map_or(true, |max| stats.fired < max) {
            if !sleep_until(next, &stop) {
                break;
            }

            if self.wait_for_completion {
                join_all(&mut pending, &mut stats);
                if stop.load(Ordering::SeqCst) {
                    break;
                }
            } else {
                reap_finished(&mut pending, &mut stats);
            }

            stats.fired += 1;
            let sched = Arc::clone(&scheduler);
            let handle = thread::Builder::new()
                .name(format!("klinesync-cycle-{}", stats.fired))
                .spawn(move || sched.fire())?;
            pending.push(handle);

            next = (next + self.interval).max(Instant::now());
        }

        join_all(&mut pending, &mut stats);
        tracing::info!(
            fired = stats.fired,
            completed = stats.completed,
            dropped = stats.dropped,
            "trigger stopped"
        );
        Ok(stats)
    }
}

/// Sleep until `deadline`. Returns false if `stop` was raised first.
fn sleep_until(deadline: Instant, stop: &AtomicBool) -> bool {
    loop {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(STOP_POLL));
    }
}

fn join_all(pending: &mut Vec<JoinHandle<FireOutcome>>, stats: &mut TriggerStats) {
    for handle in pending.drain(..) {
        join_one(handle, stats);
    }
}

fn reap_finished(pending: &mut Vec<JoinHandle<FireOutcome>>, stats: &mut TriggerStats) {
    let (done, running): (Vec<_>, Vec<_>) = pending.drain(..).partition(|h| h.is_finished());
    *pending = running;
    for handle in done {
        join_one(handle, stats);
    }
}

fn join_one(handle: JoinHandle<FireOutcome>, stats: &mut TriggerStats) {
    match handle.join() {
        Ok(outcome) => stats.record(&outcome),
        // fire() catches cycle panics; this only happens on a panic outside the cycle
        Err(_) => stats.panicked += 1,
    }
}
