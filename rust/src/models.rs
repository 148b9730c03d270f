//! Block data model: what gets scheduled and what fills the time between.

use chrono::{DateTime, Duration, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::constraints::Constraint;

/// Instrument state: configuration axis (e.g. "filter") -> state (e.g. "B").
pub type Configuration = FxHashMap<String, String>;

/// Component label used for forced gaps.
pub const NOTHING_OBSERVABLE: &str = "nothing_observable";

/// Invalid values handed to the model constructors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Duration must not be negative, got {0}")]
    NegativeDuration(Duration),
    #[error("Priority must be a finite non-negative number, got {0}")]
    InvalidPriority(f64),
    #[error("Duplicate transition component: {0}")]
    DuplicateComponent(String),
    #[error("Transition component {label:?} has negative cost {cost}")]
    NegativeComponent { label: String, cost: Duration },
    #[error("Exposure count {0} is too large")]
    ExposureCount(u32),
    #[error("Duration arithmetic overflowed")]
    DurationOverflow,
    #[error("Block starting at {start} with duration {duration} ends out of range")]
    EndOutOfRange {
        start: DateTime<Utc>,
        duration: Duration,
    },
}

/// Fixed equatorial position in degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Coordinates {
    pub ra_deg: f64,
    pub dec_deg: f64,
}

/// Something to point at. The scheduler only ever reads the name; the
/// position is for separation models and constraints.
#[derive(Clone, Debug, PartialEq)]
pub struct Target {
    pub name: String,
    pub coordinates: Option<Coordinates>,
}

impl Target {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            coordinates: None,
        }
    }

    pub fn with_coordinates(name: impl Into<String>, ra_deg: f64, dec_deg: f64) -> Self {
        Self {
            name: name.into(),
            coordinates: Some(Coordinates { ra_deg, dec_deg }),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

fn check_duration(duration: Duration) -> Result<Duration, ModelError> {
    if duration < Duration::zero() {
        Err(ModelError::NegativeDuration(duration))
    } else {
        Ok(duration)
    }
}

/// A set of images taken with one instrument configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageSet {
    pub duration: Duration,
    pub configuration: Configuration,
}

impl ImageSet {
    pub fn new(duration: Duration, configuration: Configuration) -> Result<Self, ModelError> {
        Ok(Self {
            duration: check_duration(duration)?,
            configuration,
        })
    }

    /// `count` exposures, each costing `time_per_exposure + overhead`.
    pub fn from_exposures(
        time_per_exposure: Duration,
        count: u32,
        overhead: Duration,
        configuration: Configuration,
    ) -> Result<Self, ModelError> {
        check_duration(time_per_exposure)?;
        check_duration(overhead)?;
        let factor = i32::try_from(count).map_err(|_| ModelError::ExposureCount(count))?;
        let duration = time_per_exposure
            .checked_add(&overhead)
            .and_then(|per_exposure| per_exposure.checked_mul(factor))
            .ok_or(ModelError::DurationOverflow)?;
        Self::new(duration, configuration)
    }
}

/// A request to observe a target for a fixed duration.
///
/// `start_time`, `end_time` and `constraints_value` are written once, by a
/// scheduling strategy, on the driver's private copy of the block.
#[derive(Clone, Debug)]
pub struct ObservingBlock {
    pub target: Target,
    pub duration: Duration,
    /// Constraints specific to this block, applied after the window-wide ones.
    pub constraints: Option<Vec<Arc<dyn Constraint>>>,
    pub priority: f64,
    pub configuration: Configuration,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    constraints_value: Option<f64>,
}

impl ObservingBlock {
    pub const DEFAULT_PRIORITY: f64 = 1.0;

    pub fn new(
        target: Target,
        duration: Duration,
        constraints: Option<Vec<Arc<dyn Constraint>>>,
        priority: f64,
    ) -> Result<Self, ModelError> {
        if !priority.is_finite() || priority < 0.0 {
            return Err(ModelError::InvalidPriority(priority));
        }
        Ok(Self {
            target,
            duration: check_duration(duration)?,
            constraints,
            priority,
            configuration: Configuration::default(),
            start_time: None,
            end_time: None,
            constraints_value: None,
        })
    }

    /// Build a block whose duration is the sum of the image sets.
    ///
    /// The configuration is the union of the image-set configurations; on a
    /// shared axis the later image set wins.
    pub fn from_imagesets(
        target: Target,
        imagesets: &[ImageSet],
        priority: f64,
    ) -> Result<Self, ModelError> {
        let duration = imagesets
            .iter()
            .try_fold(Duration::zero(), |acc, set| acc.checked_add(&set.duration))
            .ok_or(ModelError::DurationOverflow)?;
        let mut configuration = Configuration::default();
        for set in imagesets {
            configuration.extend(set.configuration.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Ok(Self::new(target, duration, None, priority)?.with_configuration(configuration))
    }

    pub fn with_configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// Aggregate score the block was committed with.
    pub fn constraints_value(&self) -> Option<f64> {
        self.constraints_value
    }

    pub fn is_scheduled(&self) -> bool {
        self.start_time.is_some()
    }

    /// Commit the block at `start`. Start and end are always set together.
    pub(crate) fn mark_scheduled(
        &mut self,
        start: DateTime<Utc>,
        constraints_value: f64,
    ) -> Result<(), ModelError> {
        let end = start
            .checked_add_signed(self.duration)
            .ok_or(ModelError::EndOutOfRange {
                start,
                duration: self.duration,
            })?;
        self.start_time = Some(start);
        self.end_time = Some(end);
        self.constraints_value = Some(constraints_value);
        Ok(())
    }
}

impl fmt::Display for ObservingBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => {
                write!(f, "ObservingBlock({}, {} to {})", self.target, start, end)
            }
            _ => write!(f, "ObservingBlock({}, unscheduled)", self.target),
        }
    }
}

/// Dead time between observations: slewing, reconfiguring, or waiting.
///
/// `duration` is derived from `components` and is recomputed on every
/// assignment of the components.
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionBlock {
    components: Vec<(String, Duration)>,
    duration: Duration,
    start_time: Option<DateTime<Utc>>,
}

impl TransitionBlock {
    pub fn new(
        components: Vec<(String, Duration)>,
        start_time: Option<DateTime<Utc>>,
    ) -> Result<Self, ModelError> {
        let mut block = Self {
            components: Vec::new(),
            duration: Duration::zero(),
            start_time,
        };
        block.set_components(components)?;
        Ok(block)
    }

    /// The forced step inserted when no block can be observed at `start`.
    pub fn nothing_observable(gap_time: Duration, start: DateTime<Utc>) -> Result<Self, ModelError> {
        Self::new(vec![(NOTHING_OBSERVABLE.to_string(), gap_time)], Some(start))
    }

    /// Replace the components. Rejected input leaves the block unchanged.
    pub fn set_components(&mut self, components: Vec<(String, Duration)>) -> Result<(), ModelError> {
        let mut seen: FxHashSet<&str> = FxHashSet::default();
        let mut duration = Duration::zero();
        for (label, cost) in &components {
            if !seen.insert(label.as_str()) {
                return Err(ModelError::DuplicateComponent(label.clone()));
            }
            if *cost < Duration::zero() {
                return Err(ModelError::NegativeComponent {
                    label: label.clone(),
                    cost: *cost,
                });
            }
            duration = duration
                .checked_add(cost)
                .ok_or(ModelError::DurationOverflow)?;
        }
        self.components = components;
        self.duration = duration;
        Ok(())
    }

    pub fn components(&self) -> &[(String, Duration)] {
        &self.components
    }

    pub fn component(&self, label: &str) -> Option<Duration> {
        self.components
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, cost)| *cost)
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn set_start_time(&mut self, start_time: Option<DateTime<Utc>>) {
        self.start_time = start_time;
    }

    /// `None` when unscheduled or when the end falls outside the time range.
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
            .and_then(|start| start.checked_add_signed(self.duration))
    }
}

impl fmt::Display for TransitionBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = self
            .components
            .iter()
            .map(|(label, cost)| format!("{}: {}s", label, cost.num_seconds()))
            .collect::<Vec<_>>()
            .join(", ");
        match (self.start_time, self.end_time()) {
            (Some(start), Some(end)) => write!(f, "TransitionBlock({}, {} to {})", info, start, end),
            _ => write!(f, "TransitionBlock({}, unscheduled)", info),
        }
    }
}

/// One entry of a produced schedule.
#[derive(Clone, Debug)]
pub enum ScheduleEntry {
    Observing(ObservingBlock),
    Transition(TransitionBlock),
}

impl ScheduleEntry {
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Observing(block) => block.start_time(),
            Self::Transition(block) => block.start_time(),
        }
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Observing(block) => block.end_time(),
            Self::Transition(block) => block.end_time(),
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Self::Observing(block) => block.duration,
            Self::Transition(block) => block.duration(),
        }
    }

    pub fn as_observing(&self) -> Option<&ObservingBlock> {
        match self {
            Self::Observing(block) => Some(block),
            Self::Transition(_) => None,
        }
    }

    pub fn as_transition(&self) -> Option<&TransitionBlock> {
        match self {
            Self::Transition(block) => Some(block),
            Self::Observing(_) => None,
        }
    }
}

impl From<ObservingBlock> for ScheduleEntry {
    fn from(block: ObservingBlock) -> Self {
        Self::Observing(block)
    }
}

impl From<TransitionBlock> for ScheduleEntry {
    fn from(block: TransitionBlock) -> Self {
        Self::Transition(block)
    }
}

impl fmt::Display for ScheduleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Observing(block) => fmt::Display::fmt(block, f),
            Self::Transition(block) => fmt::Display::fmt(block, f),
        }
    }
}
