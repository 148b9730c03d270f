//! Scheduling driver and the greedy strategies.
//!
//! [`Scheduler::schedule`] copies the input blocks, hands them to a
//! [`ScheduleStrategy`] and returns the entries in start-time order. Both
//! strategies here walk the window once, committing the best-scoring block at
//! each step and inserting transitions and gaps as needed.

mod core;
mod sequential;
mod state;
mod summing;

pub use self::core::{
    select_best, sort_by_start_time, ScheduleStrategy, Scheduler, SchedulerError,
    SchedulingContext,
};
pub use sequential::{product_score, SequentialScheduler};
pub use state::{PendingBlock, SAMPLES_PER_BLOCK};
pub use summing::{summing_score, SummingScheduler};
