//! Greedy scheduling by the priority-weighted sum of constraint scores.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::constraints::{Constraint, Observer};
use crate::models::{ObservingBlock, ScheduleEntry};
use crate::transitioner::Transitioner;

use super::core::{ScheduleStrategy, SchedulerError, SchedulingContext};
use super::state::PendingBlock;

/// Picks, at each step, the block with the largest `priority × Σ scores`.
///
/// Scores trade off against each other, except that a single zero still
/// vetoes the block for that step.
#[derive(Clone, Debug)]
pub struct SummingScheduler {
    context: SchedulingContext,
}

impl SummingScheduler {
    pub fn new(
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        constraints: Vec<Arc<dyn Constraint>>,
        observer: Observer,
        transitioner: Option<Transitioner>,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        let context = SchedulingContext::new(
            window_start,
            window_end,
            constraints,
            observer,
            transitioner,
            config,
        )?;
        Ok(Self { context })
    }

    /// Scheduler for a window of length `duration` centred on `center_time`.
    pub fn from_timespan(
        center_time: DateTime<Utc>,
        duration: Duration,
        constraints: Vec<Arc<dyn Constraint>>,
        observer: Observer,
        transitioner: Option<Transitioner>,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        let (start, end) = SchedulingContext::window_around(center_time, duration)?;
        Self::new(start, end, constraints, observer, transitioner, config)
    }

    pub fn context(&self) -> &SchedulingContext {
        &self.context
    }
}

/// `priority × Σ scores`, or exactly `0.0` if any score is zero.
pub fn summing_score(priority: f64, results: &[Vec<f64>]) -> f64 {
    let mut sum = 0.0;
    for &score in results.iter().flatten() {
        if score == 0.0 {
            return 0.0;
        }
        sum += score;
    }
    priority * sum
}

/// A negative score means the constraint broke its contract.
fn check_non_negative(candidate: &PendingBlock, results: &[Vec<f64>]) -> Result<(), SchedulerError> {
    for (constraint, row) in candidate.constraints.iter().zip(results) {
        if let Some(&score) = row.iter().find(|s| **s < 0.0) {
            return Err(SchedulerError::InvalidScore {
                constraint: constraint.name().to_string(),
                target: candidate.block.target.name.clone(),
                score,
            });
        }
    }
    Ok(())
}

impl ScheduleStrategy for SummingScheduler {
    fn make_schedule(
        &self,
        blocks: Vec<ObservingBlock>,
    ) -> Result<(Vec<ScheduleEntry>, bool), SchedulerError> {
        let entries = self.context.run_greedy("summing", blocks, |candidate, results| {
            check_non_negative(candidate, results)?;
            Ok(summing_score(candidate.block.priority, results))
        })?;
        Ok((entries, true))
    }
}
