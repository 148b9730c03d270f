//! Constraint capability consumed by the schedulers.
//!
//! A constraint scores each sampled time for a target: a non-negative weight,
//! where exactly `0.0` means the target cannot be observed at that time. What a
//! constraint actually measures (altitude, airmass, moon distance) lives
//! outside this crate; only the scoring contract is defined here.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::models::Target;

/// Failure reported by an external collaborator (constraint or separation model).
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{source_name} failed: {message}")]
pub struct ConstraintError {
    pub source_name: String,
    pub message: String,
}

impl ConstraintError {
    pub fn new(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}

/// Observing site. Threaded through to constraints untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Observer {
    pub name: String,
    pub longitude_deg: Option<f64>,
    pub latitude_deg: Option<f64>,
    pub elevation_m: Option<f64>,
}

impl Observer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn at_location(
        name: impl Into<String>,
        longitude_deg: f64,
        latitude_deg: f64,
        elevation_m: f64,
    ) -> Self {
        Self {
            name: name.into(),
            longitude_deg: Some(longitude_deg),
            latitude_deg: Some(latitude_deg),
            elevation_m: Some(elevation_m),
        }
    }
}

/// Scores the observability of targets at a list of times.
///
/// Implementations must return exactly one score per entry of `times`.
pub trait Constraint: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn compute(
        &self,
        observer: &Observer,
        targets: &[Target],
        times: &[DateTime<Utc>],
    ) -> Result<Vec<f64>, ConstraintError>;
}

type ScoreFn = dyn Fn(&Observer, &[Target], &[DateTime<Utc>]) -> Result<Vec<f64>, ConstraintError>
    + Send
    + Sync;

/// A named closure acting as a constraint.
#[derive(Clone)]
pub struct FnConstraint {
    name: String,
    func: Arc<ScoreFn>,
}

impl FnConstraint {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Observer, &[Target], &[DateTime<Utc>]) -> Result<Vec<f64>, ConstraintError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Wrap a closure that scores a single time and cannot fail.
    pub fn per_time<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(DateTime<Utc>) -> f64 + Send + Sync + 'static,
    {
        Self::new(name, move |_, _, times| {
            Ok(times.iter().map(|&t| func(t)).collect())
        })
    }
}

impl fmt::Debug for FnConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnConstraint")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Constraint for FnConstraint {
    fn name(&self) -> &str {
        &self.name
    }

    fn compute(
        &self,
        observer: &Observer,
        targets: &[Target],
        times: &[DateTime<Utc>],
    ) -> Result<Vec<f64>, ConstraintError> {
        (self.func)(observer, targets, times)
    }
}

/// Same score at every time.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstantConstraint {
    pub score: f64,
}

impl ConstantConstraint {
    pub fn new(score: f64) -> Self {
        Self { score }
    }

    pub fn always_observable() -> Self {
        Self::new(1.0)
    }

    pub fn never_observable() -> Self {
        Self::new(0.0)
    }
}

impl Constraint for ConstantConstraint {
    fn name(&self) -> &str {
        "constant"
    }

    fn compute(
        &self,
        _observer: &Observer,
        _targets: &[Target],
        times: &[DateTime<Utc>],
    ) -> Result<Vec<f64>, ConstraintError> {
        Ok(vec![self.score; times.len()])
    }
}

/// 1.0 inside `[start, end]`, 0.0 outside.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeWindowConstraint {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindowConstraint {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }
}

impl Constraint for TimeWindowConstraint {
    fn name(&self) -> &str {
        "time_window"
    }

    fn compute(
        &self,
        _observer: &Observer,
        _targets: &[Target],
        times: &[DateTime<Utc>],
    ) -> Result<Vec<f64>, ConstraintError> {
        Ok(times
            .iter()
            .map(|t| if *t >= self.start && *t <= self.end { 1.0 } else { 0.0 })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 22, 0, 0).unwrap()
    }

    #[test]
    fn test_constant_constraint_matches_sample_count() {
        let times = [t0(), t0() + Duration::minutes(5), t0() + Duration::minutes(10)];
        let scores = ConstantConstraint::new(0.25)
            .compute(&Observer::new("site"), &[Target::new("x")], &times)
            .unwrap();
        assert_eq!(scores, vec![0.25, 0.25, 0.25]);
    }

    #[test]
    fn test_time_window_is_inclusive() {
        let window = TimeWindowConstraint::new(t0(), t0() + Duration::hours(1));
        let times = [
            t0() - Duration::seconds(1),
            t0(),
            t0() + Duration::hours(1),
            t0() + Duration::hours(2),
        ];
        let scores = window
            .compute(&Observer::default(), &[Target::new("x")], &times)
            .unwrap();
        assert_eq!(scores, vec![0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_fn_constraint_sees_targets() {
        let constraint = FnConstraint::new("only_vega", |_, targets, times| {
            let score = if targets.iter().all(|t| t.name == "vega") { 1.0 } else { 0.0 };
            Ok(vec![score; times.len()])
        });
        let observer = Observer::at_location("lapalma", -17.88, 28.76, 2326.0);
        assert_eq!(constraint.name(), "only_vega");
        assert_eq!(
            constraint
                .compute(&observer, &[Target::new("vega")], &[t0()])
                .unwrap(),
            vec![1.0]
        );
        assert_eq!(
            constraint
                .compute(&observer, &[Target::new("deneb")], &[t0()])
                .unwrap(),
            vec![0.0]
        );
    }

    #[test]
    fn test_fn_constraint_propagates_failure() {
        let constraint = FnConstraint::new("broken", |_, _, _| {
            Err(ConstraintError::new("broken", "ephemeris unavailable"))
        });
        let err = constraint
            .compute(&Observer::default(), &[Target::new("x")], &[t0()])
            .unwrap_err();
        assert_eq!(err.to_string(), "broken failed: ephemeris unavailable");
    }
}
