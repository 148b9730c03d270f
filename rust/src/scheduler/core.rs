//! Scheduling driver and the greedy loop shared by the strategies.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::config::SchedulerConfig;
use crate::constraints::{Constraint, ConstraintError, Observer};
use crate::models::{ModelError, ObservingBlock, ScheduleEntry, TransitionBlock};
use crate::transitioner::Transitioner;
use crate::{log_changes, log_checks, log_debug};

use super::state::PendingBlock;

/// Errors that can occur during scheduling.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Invalid scheduling window: start {start} is not before end {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Constraint {constraint} returned invalid score {score} for target {target}")]
    InvalidScore {
        constraint: String,
        target: String,
        score: f64,
    },
    #[error("Constraint {constraint} returned {got} scores for {expected} sample times")]
    ScoreShape {
        constraint: String,
        expected: usize,
        got: usize,
    },
    #[error(transparent)]
    Constraint(#[from] ConstraintError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("Two schedule entries start at {0}")]
    DuplicateStartTime(DateTime<Utc>),
    #[error("Schedule entry has no start time: {0}")]
    Unscheduled(String),
    #[error("Slew of {degrees} degrees at {rate} degrees per second is out of range")]
    SlewOutOfRange { degrees: f64, rate: f64 },
    #[error("Time {time} plus {step} is out of range")]
    TimeOverflow { time: DateTime<Utc>, step: Duration },
}

/// `time + step`, or `TimeOverflow` if the result is not representable.
pub(crate) fn advance(time: DateTime<Utc>, step: Duration) -> Result<DateTime<Utc>, SchedulerError> {
    time.checked_add_signed(step)
        .ok_or(SchedulerError::TimeOverflow { time, step })
}

/// The one operation a scheduling strategy has to provide.
pub trait ScheduleStrategy {
    /// Assign times to `blocks`, which are the driver's own copies.
    ///
    /// Returns the schedule entries and whether they are already in
    /// start-time order.
    fn make_schedule(
        &self,
        blocks: Vec<ObservingBlock>,
    ) -> Result<(Vec<ScheduleEntry>, bool), SchedulerError>;
}

/// Entry point for scheduling a set of blocks.
///
/// Implemented for every [`ScheduleStrategy`]; the caller's blocks are copied
/// and never modified.
pub trait Scheduler {
    fn schedule(&self, blocks: &[ObservingBlock]) -> Result<Vec<ScheduleEntry>, SchedulerError>;
}

impl<S: ScheduleStrategy + ?Sized> Scheduler for S {
    fn schedule(&self, blocks: &[ObservingBlock]) -> Result<Vec<ScheduleEntry>, SchedulerError> {
        let copied_blocks = blocks.to_vec();
        let (entries, already_sorted) = self.make_schedule(copied_blocks)?;
        if already_sorted {
            Ok(entries)
        } else {
            sort_by_start_time(entries)
        }
    }
}

/// Order entries by start time. Start times must be set and distinct.
pub fn sort_by_start_time(
    entries: Vec<ScheduleEntry>,
) -> Result<Vec<ScheduleEntry>, SchedulerError> {
    let mut keyed = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry.start_time() {
            Some(start) => keyed.push((start, entry)),
            None => return Err(SchedulerError::Unscheduled(entry.to_string())),
        }
    }
    keyed.sort_by_key(|(start, _)| *start);
    for pair in keyed.windows(2) {
        if pair[0].0 == pair[1].0 {
            return Err(SchedulerError::DuplicateStartTime(pair[0].0));
        }
    }
    Ok(keyed.into_iter().map(|(_, entry)| entry).collect())
}

/// Window, collaborators and settings shared by the greedy strategies.
#[derive(Clone, Debug)]
pub struct SchedulingContext {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Applied to every block, ahead of the block's own constraints.
    pub constraints: Vec<Arc<dyn Constraint>>,
    pub observer: Observer,
    pub transitioner: Option<Transitioner>,
    pub config: SchedulerConfig,
}

impl SchedulingContext {
    pub fn new(
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        constraints: Vec<Arc<dyn Constraint>>,
        observer: Observer,
        transitioner: Option<Transitioner>,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        if window_start >= window_end {
            return Err(SchedulerError::InvalidWindow {
                start: window_start,
                end: window_end,
            });
        }
        config.validate()?;
        Ok(Self {
            window_start,
            window_end,
            constraints,
            observer,
            transitioner,
            config,
        })
    }

    /// Window of length `duration` centred on `center`.
    pub fn window_around(
        center: DateTime<Utc>,
        duration: Duration,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>), SchedulerError> {
        let half = duration / 2;
        Ok((advance(center, -half)?, advance(center, half)?))
    }

    /// Run the greedy loop, scoring candidates with `score`.
    ///
    /// `score` receives the candidate and its constraint results (one row per
    /// effective constraint, one column per sample) and returns the aggregate;
    /// `0.0` means the candidate is not observable at this step.
    pub(crate) fn run_greedy<F>(
        &self,
        strategy: &str,
        blocks: Vec<ObservingBlock>,
        score: F,
    ) -> Result<Vec<ScheduleEntry>, SchedulerError>
    where
        F: Fn(&PendingBlock, &[Vec<f64>]) -> Result<f64, SchedulerError>,
    {
        let verbosity = self.config.verbosity;
        let gap_time = self.config.gap_time;

        let mut pending: Vec<PendingBlock> = blocks
            .into_iter()
            .map(|block| PendingBlock::new(block, &self.constraints))
            .collect();
        let mut scheduled: Vec<ScheduleEntry> = Vec::new();
        let mut current_time = self.window_start;

        log_changes!(
            verbosity,
            "{}: scheduling {} blocks from {} to {}",
            strategy,
            pending.len(),
            self.window_start,
            self.window_end
        );

        while !pending.is_empty() && current_time < self.window_end {
            log_checks!(verbosity, "Time: {}", current_time);

            let mut transitions: Vec<Option<TransitionBlock>> = Vec::with_capacity(pending.len());
            let mut scores: Vec<f64> = Vec::with_capacity(pending.len());

            for candidate in &pending {
                let transition = match (&self.transitioner, scheduled.last()) {
                    (Some(transitioner), Some(last)) => transitioner.compute(
                        Some(last),
                        &candidate.block,
                        current_time,
                        &self.observer,
                    )?,
                    _ => None,
                };
                let transition_time = transition
                    .as_ref()
                    .map_or(Duration::zero(), TransitionBlock::duration);

                let results =
                    candidate.evaluate(&self.observer, advance(current_time, transition_time)?)?;
                for (constraint, row) in candidate.constraints.iter().zip(&results) {
                    log_debug!(
                        verbosity,
                        "    {} / {}: {:?}",
                        candidate.block.target,
                        constraint.name(),
                        row
                    );
                }

                let value = score(candidate, &results)?;
                if value.is_nan() {
                    return Err(SchedulerError::InvalidScore {
                        constraint: strategy.to_string(),
                        target: candidate.block.target.name.clone(),
                        score: value,
                    });
                }
                log_checks!(
                    verbosity,
                    "  Considering {} (transition={}s, score={})",
                    candidate.block.target,
                    transition_time.num_seconds(),
                    value
                );

                transitions.push(transition);
                scores.push(value);
            }

            let Some((best_idx, best_score)) = select_best(&scores) else {
                break;
            };

            if best_score == 0.0 {
                if gap_time <= Duration::zero() {
                    log_changes!(
                        verbosity,
                        "  Nothing observable at {} and gap_time is zero, stopping",
                        current_time
                    );
                    break;
                }
                log_changes!(
                    verbosity,
                    "  Nothing observable at {}, inserting {}s gap",
                    current_time,
                    gap_time.num_seconds()
                );
                scheduled.push(TransitionBlock::nothing_observable(gap_time, current_time)?.into());
                current_time = advance(current_time, gap_time)?;
                continue;
            }

            if let Some(transition) = transitions.into_iter().nth(best_idx).flatten() {
                log_changes!(verbosity, "  Transition {}", transition);
                current_time = advance(current_time, transition.duration())?;
                scheduled.push(transition.into());
            }

            let mut winner = pending.remove(best_idx).block;
            winner.mark_scheduled(current_time, best_score)?;
            log_changes!(verbosity, "  Scheduled {} (score={})", winner, best_score);
            current_time = advance(advance(current_time, winner.duration)?, gap_time)?;
            scheduled.push(winner.into());
        }

        if !pending.is_empty() {
            log_changes!(
                verbosity,
                "{}: {} blocks left unscheduled at {}",
                strategy,
                pending.len(),
                current_time
            );
        }

        Ok(scheduled)
    }
}

/// Index and value of the highest score; the earliest index wins ties.
/// NaN scores are never selected.
pub fn select_best(scores: &[f64]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, &value) in scores.iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        match best {
            Some((_, best_value)) if value <= best_value => {}
            _ => best = Some((idx, value)),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Target;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn block(name: &str) -> ObservingBlock {
        ObservingBlock::new(Target::new(name), Duration::minutes(10), None, 1.0).unwrap()
    }

    /// Schedules blocks back to front so the driver has to sort them.
    struct Reversed;

    impl ScheduleStrategy for Reversed {
        fn make_schedule(
            &self,
            blocks: Vec<ObservingBlock>,
        ) -> Result<(Vec<ScheduleEntry>, bool), SchedulerError> {
            let mut entries = Vec::new();
            let n = blocks.len() as i32;
            for (i, mut b) in blocks.into_iter().enumerate() {
                b.mark_scheduled(t0() + Duration::hours(i64::from(n - i as i32)), 1.0)?;
                entries.push(ScheduleEntry::Observing(b));
            }
            Ok((entries, false))
        }
    }

    /// Puts every block at the same instant.
    struct Stacked;

    impl ScheduleStrategy for Stacked {
        fn make_schedule(
            &self,
            blocks: Vec<ObservingBlock>,
        ) -> Result<(Vec<ScheduleEntry>, bool), SchedulerError> {
            let entries = blocks
                .into_iter()
                .map(|mut b| {
                    b.mark_scheduled(t0(), 1.0)?;
                    Ok::<_, SchedulerError>(ScheduleEntry::Observing(b))
                })
                .collect::<Result<Vec<_>, SchedulerError>>()?;
            Ok((entries, false))
        }
    }

    #[test]
    fn test_driver_sorts_unsorted_results() {
        let blocks = vec![block("a"), block("b"), block("c")];
        let schedule = Reversed.schedule(&blocks).unwrap();
        let names: Vec<&str> = schedule
            .iter()
            .filter_map(|e| e.as_observing())
            .map(|b| b.target.name.as_str())
            .collect();
        assert_eq!(names, vec!["c", "b", "a"]);
        for pair in schedule.windows(2) {
            assert!(pair[0].start_time() < pair[1].start_time());
        }
    }

    #[test]
    fn test_driver_leaves_input_untouched() {
        let blocks = vec![block("a"), block("b")];
        let schedule = Reversed.schedule(&blocks).unwrap();
        assert_eq!(schedule.len(), 2);
        assert!(blocks.iter().all(|b| !b.is_scheduled()));
    }

    #[test]
    fn test_driver_rejects_shared_start_time() {
        let blocks = vec![block("a"), block("b")];
        assert!(matches!(
            Stacked.schedule(&blocks),
            Err(SchedulerError::DuplicateStartTime(t)) if t == t0()
        ));
    }

    #[test]
    fn test_sort_rejects_unscheduled_entries() {
        let entries = vec![ScheduleEntry::Observing(block("a"))];
        assert!(matches!(
            sort_by_start_time(entries),
            Err(SchedulerError::Unscheduled(_))
        ));
    }

    #[test]
    fn test_select_best_prefers_first_on_ties() {
        assert_eq!(select_best(&[]), None);
        assert_eq!(select_best(&[0.0, 0.0]), Some((0, 0.0)));
        assert_eq!(select_best(&[1.0, 3.0, 3.0, 2.0]), Some((1, 3.0)));
        assert_eq!(select_best(&[f64::NAN, 2.0]), Some((1, 2.0)));
        assert_eq!(select_best(&[2.0, f64::NAN]), Some((0, 2.0)));
        assert_eq!(select_best(&[f64::NAN]), None);
    }

    #[test]
    fn test_context_rejects_bad_window() {
        let err = SchedulingContext::new(
            t0(),
            t0(),
            vec![],
            Observer::default(),
            None,
            SchedulerConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidWindow { .. }));
    }

    #[test]
    fn test_context_rejects_negative_gap() {
        let config = SchedulerConfig::default().with_gap_time(Duration::minutes(-1));
        let err = SchedulingContext::new(
            t0(),
            t0() + Duration::hours(1),
            vec![],
            Observer::default(),
            None,
            config,
        )
        .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidConfig(_)));
    }

    #[test]
    fn test_window_around_is_symmetric() {
        let (start, end) = SchedulingContext::window_around(t0(), Duration::hours(4)).unwrap();
        assert_eq!(start, t0() - Duration::hours(2));
        assert_eq!(end, t0() + Duration::hours(2));
    }

    #[test]
    fn test_advance_reports_overflow() {
        assert_eq!(advance(t0(), Duration::minutes(5)).unwrap(), t0() + Duration::minutes(5));
        let far = Duration::days(365 * 300_000);
        assert!(matches!(
            advance(t0(), far),
            Err(SchedulerError::TimeOverflow { time, step }) if time == t0() && step == far
        ));
        assert!(SchedulingContext::window_around(t0(), far * 2).is_err());
    }
}
