//! Per-call working state for a block awaiting a slot.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::constraints::{Constraint, Observer};
use crate::models::ObservingBlock;

use super::core::{advance, SchedulerError};

/// Number of sample points inside a candidate's would-be occupancy.
pub const SAMPLES_PER_BLOCK: usize = 3;

/// A pending block together with the values derived for it once per call.
///
/// The effective constraints and sample offsets are kept here instead of on
/// the block so the block itself only ever gains its schedule fields.
#[derive(Clone, Debug)]
pub struct PendingBlock {
    pub block: ObservingBlock,
    /// Window-wide constraints first, then the block's own.
    pub constraints: Vec<Arc<dyn Constraint>>,
    /// Start, middle and end of the block relative to its start.
    pub offsets: [Duration; SAMPLES_PER_BLOCK],
}

impl PendingBlock {
    pub fn new(block: ObservingBlock, window_constraints: &[Arc<dyn Constraint>]) -> Self {
        let mut constraints: Vec<Arc<dyn Constraint>> = window_constraints.to_vec();
        if let Some(own) = &block.constraints {
            constraints.extend(own.iter().cloned());
        }
        let offsets = [Duration::zero(), block.duration / 2, block.duration];
        Self {
            block,
            constraints,
            offsets,
        }
    }

    /// Absolute sample times if the block were to start at `start`.
    pub fn sample_times(
        &self,
        start: DateTime<Utc>,
    ) -> Result<[DateTime<Utc>; SAMPLES_PER_BLOCK], SchedulerError> {
        let mut times = [start; SAMPLES_PER_BLOCK];
        for (time, offset) in times.iter_mut().zip(self.offsets) {
            *time = advance(start, offset)?;
        }
        Ok(times)
    }

    /// Evaluate every effective constraint at the sample times for a start at
    /// `start`. Row `i` holds the scores of constraint `i`, one per sample.
    /// Scores must be finite.
    pub fn evaluate(
        &self,
        observer: &Observer,
        start: DateTime<Utc>,
    ) -> Result<Vec<Vec<f64>>, SchedulerError> {
        let times = self.sample_times(start)?;
        let targets = std::slice::from_ref(&self.block.target);

        let mut results = Vec::with_capacity(self.constraints.len());
        for constraint in &self.constraints {
            let scores = constraint.compute(observer, targets, &times)?;
            if scores.len() != times.len() {
                return Err(SchedulerError::ScoreShape {
                    constraint: constraint.name().to_string(),
                    expected: times.len(),
                    got: scores.len(),
                });
            }
            if let Some(score) = scores.iter().copied().find(|s| !s.is_finite()) {
                return Err(SchedulerError::InvalidScore {
                    constraint: constraint.name().to_string(),
                    target: self.block.target.name.clone(),
                    score,
                });
            }
            results.push(scores);
        }
        Ok(results)
    }
}
