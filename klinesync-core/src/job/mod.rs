//! The recurring download job: one cycle, its scheduler and its trigger.

pub mod clock;
pub mod cycle;
pub mod scheduler;
pub mod trigger;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cycle::{CycleReport, CycleRequest, DownloadCycle, TickerError, TickerOutcome, TickerReport};
pub use scheduler::{FireOutcome, JobState, RecurringScheduler};
pub use trigger::{IntervalTrigger, TriggerStats};
