//! Transition costs between consecutive schedule entries.

use chrono::{DateTime, Duration, Utc};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

use crate::constraints::{ConstraintError, Observer};
use crate::models::{ObservingBlock, ScheduleEntry, Target, TransitionBlock};
use crate::scheduler::SchedulerError;

/// Component label for telescope slews.
pub const SLEW_TIME: &str = "slew_time";

/// Reconfiguration costs: axis -> (old state, new state) -> time.
pub type ReconfigTable = FxHashMap<String, FxHashMap<(String, String), Duration>>;

/// Angular distance, in degrees, between two targets as seen from a site.
pub trait SeparationModel: fmt::Debug + Send + Sync {
    fn separation(
        &self,
        observer: &Observer,
        time: DateTime<Utc>,
        from: &Target,
        to: &Target,
    ) -> Result<f64, ConstraintError>;
}

/// Great-circle distance between the targets' fixed equatorial positions.
///
/// Ignores the site and the time. Targets without coordinates are an error.
#[derive(Clone, Copy, Debug, Default)]
pub struct GreatCircleSeparation;

impl SeparationModel for GreatCircleSeparation {
    fn separation(
        &self,
        _observer: &Observer,
        _time: DateTime<Utc>,
        from: &Target,
        to: &Target,
    ) -> Result<f64, ConstraintError> {
        let missing = |t: &Target| {
            ConstraintError::new("great_circle", format!("target {} has no coordinates", t.name))
        };
        let a = from.coordinates.ok_or_else(|| missing(from))?;
        let b = to.coordinates.ok_or_else(|| missing(to))?;

        let (ra1, dec1) = (a.ra_deg.to_radians(), a.dec_deg.to_radians());
        let (ra2, dec2) = (b.ra_deg.to_radians(), b.dec_deg.to_radians());
        let d_ra = ra2 - ra1;

        // Vincenty form, well conditioned at small and antipodal separations
        let num1 = dec2.cos() * d_ra.sin();
        let num2 = dec1.cos() * dec2.sin() - dec1.sin() * dec2.cos() * d_ra.cos();
        let den = dec1.sin() * dec2.sin() + dec1.cos() * dec2.cos() * d_ra.cos();
        Ok(num1.hypot(num2).atan2(den).to_degrees())
    }
}

/// `None` for negative, non-finite or out-of-range values.
fn seconds_to_duration(seconds: f64) -> Option<Duration> {
    let micros = (seconds * 1e6).round();
    if !micros.is_finite() || micros < 0.0 || micros >= i64::MAX as f64 {
        return None;
    }
    Some(Duration::microseconds(micros as i64))
}

/// Computes the dead time needed to move from one entry to the next block.
#[derive(Clone, Debug)]
pub struct Transitioner {
    /// Degrees per second.
    slew_rate: Option<f64>,
    instrument_reconfig_times: Option<ReconfigTable>,
    separation: Arc<dyn SeparationModel>,
}

impl Transitioner {
    pub fn new(
        slew_rate: Option<f64>,
        instrument_reconfig_times: Option<ReconfigTable>,
    ) -> Result<Self, SchedulerError> {
        if let Some(rate) = slew_rate {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(SchedulerError::InvalidConfig(format!(
                    "slew_rate must be a positive number of degrees per second, got {}",
                    rate
                )));
            }
        }
        if let Some(table) = &instrument_reconfig_times {
            for (axis, costs) in table {
                for ((old, new), cost) in costs {
                    if *cost < Duration::zero() {
                        return Err(SchedulerError::InvalidConfig(format!(
                            "reconfiguration {}:{} to {} has negative cost {}",
                            axis, old, new, cost
                        )));
                    }
                }
            }
        }
        Ok(Self {
            slew_rate,
            instrument_reconfig_times,
            separation: Arc::new(GreatCircleSeparation),
        })
    }

    /// Replace the separation model used for slew times.
    pub fn with_separation_model(mut self, separation: Arc<dyn SeparationModel>) -> Self {
        self.separation = separation;
        self
    }

    pub fn slew_rate(&self) -> Option<f64> {
        self.slew_rate
    }

    pub fn instrument_reconfig_times(&self) -> Option<&ReconfigTable> {
        self.instrument_reconfig_times.as_ref()
    }

    /// Transition from `previous` (the last scheduled entry, if any) to
    /// `new_block`, starting at `start_time`. `None` means no dead time.
    pub fn compute(
        &self,
        previous: Option<&ScheduleEntry>,
        new_block: &ObservingBlock,
        start_time: DateTime<Utc>,
        observer: &Observer,
    ) -> Result<Option<TransitionBlock>, SchedulerError> {
        let mut components: Vec<(String, Duration)> = Vec::new();

        if let Some(rate) = self.slew_rate {
            match previous {
                Some(ScheduleEntry::Observing(old_block)) => {
                    let separation = self.separation.separation(
                        observer,
                        start_time,
                        &old_block.target,
                        &new_block.target,
                    )?;
                    if !separation.is_finite() || separation < 0.0 {
                        return Err(ConstraintError::new(
                            "separation",
                            format!(
                                "invalid separation {} between {} and {}",
                                separation, old_block.target, new_block.target
                            ),
                        )
                        .into());
                    }
                    let slew = seconds_to_duration(separation / rate).ok_or(
                        SchedulerError::SlewOutOfRange {
                            degrees: separation,
                            rate,
                        },
                    )?;
                    components.push((SLEW_TIME.to_string(), slew));
                }
                // The slew happens during the preceding transition
                Some(ScheduleEntry::Transition(_)) => {
                    components.push((SLEW_TIME.to_string(), Duration::zero()));
                }
                None => {}
            }
        }

        if self.instrument_reconfig_times.is_some() {
            if let Some(ScheduleEntry::Observing(old_block)) = previous {
                components.extend(self.instrument_transitions(old_block, new_block));
            }
        }

        if components.is_empty() {
            Ok(None)
        } else {
            Ok(Some(TransitionBlock::new(components, Some(start_time))?))
        }
    }

    /// Reconfiguration components for every axis both blocks define and the
    /// table prices, labelled `"<axis>:<old> to <new>"`, in axis order.
    pub fn instrument_transitions(
        &self,
        old_block: &ObservingBlock,
        new_block: &ObservingBlock,
    ) -> Vec<(String, Duration)> {
        let Some(table) = &self.instrument_reconfig_times else {
            return Vec::new();
        };

        let mut axes: Vec<(&String, &String)> = old_block.configuration.iter().collect();
        axes.sort();

        let mut components = Vec::new();
        for (axis, old_state) in axes {
            let Some(new_state) = new_block.configuration.get(axis) else {
                continue;
            };
            let Some(costs) = table.get(axis) else {
                continue;
            };
            if let Some(cost) = costs.get(&(old_state.clone(), new_state.clone())) {
                components.push((format!("{}:{} to {}", axis, old_state, new_state), *cost));
            }
        }
        components
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Configuration;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 20, 0, 0).unwrap()
    }

    fn block(target: Target, config: &[(&str, &str)]) -> ObservingBlock {
        let configuration: Configuration = config
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ObservingBlock::new(target, Duration::minutes(10), None, 1.0)
            .unwrap()
            .with_configuration(configuration)
    }

    fn filter_table() -> ReconfigTable {
        let mut costs = FxHashMap::default();
        costs.insert(("B".to_string(), "V".to_string()), Duration::seconds(30));
        costs.insert(("V".to_string(), "B".to_string()), Duration::seconds(45));
        let mut table = ReconfigTable::default();
        table.insert("filter".to_string(), costs);
        table
    }

    #[derive(Debug)]
    struct FixedSeparation(f64);

    impl SeparationModel for FixedSeparation {
        fn separation(
            &self,
            _observer: &Observer,
            _time: DateTime<Utc>,
            _from: &Target,
            _to: &Target,
        ) -> Result<f64, ConstraintError> {
            Ok(self.0)
        }
    }

    #[test]
    fn test_unconfigured_transitioner_returns_none() {
        let transitioner = Transitioner::new(None, None).unwrap();
        let old: ScheduleEntry = block(Target::new("a"), &[("filter", "B")]).into();
        let new = block(Target::new("b"), &[("filter", "V")]);
        let result = transitioner
            .compute(Some(&old), &new, t0(), &Observer::default())
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_slew_time_from_separation() {
        let transitioner = Transitioner::new(Some(1.0), None)
            .unwrap()
            .with_separation_model(Arc::new(FixedSeparation(90.0)));
        let old: ScheduleEntry = block(Target::new("a"), &[]).into();
        let new = block(Target::new("b"), &[]);
        let transition = transitioner
            .compute(Some(&old), &new, t0(), &Observer::default())
            .unwrap()
            .unwrap();
        assert_eq!(transition.components().len(), 1);
        assert_eq!(transition.component(SLEW_TIME), Some(Duration::seconds(90)));
        assert_eq!(transition.start_time(), Some(t0()));
        assert_eq!(transition.end_time(), Some(t0() + Duration::seconds(90)));
    }

    #[test]
    fn test_slew_after_transition_is_free() {
        let transitioner = Transitioner::new(Some(2.0), None).unwrap();
        let gap: ScheduleEntry = TransitionBlock::nothing_observable(Duration::minutes(30), t0())
            .unwrap()
            .into();
        let new = block(Target::new("b"), &[]);
        let transition = transitioner
            .compute(Some(&gap), &new, t0(), &Observer::default())
            .unwrap()
            .unwrap();
        assert_eq!(transition.component(SLEW_TIME), Some(Duration::zero()));
        assert_eq!(transition.duration(), Duration::zero());
    }

    #[test]
    fn test_no_previous_entry_means_no_slew() {
        let transitioner = Transitioner::new(Some(2.0), Some(filter_table())).unwrap();
        let new = block(Target::new("b"), &[("filter", "V")]);
        let result = transitioner
            .compute(None, &new, t0(), &Observer::default())
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_great_circle_separation() {
        let model = GreatCircleSeparation;
        let observer = Observer::default();
        let pole = Target::with_coordinates("pole", 0.0, 90.0);
        let equator = Target::with_coordinates("equator", 123.0, 0.0);
        let sep = model.separation(&observer, t0(), &pole, &equator).unwrap();
        assert!((sep - 90.0).abs() < 1e-9);

        let a = Target::with_coordinates("a", 10.0, 0.0);
        let b = Target::with_coordinates("b", 40.0, 0.0);
        let sep = model.separation(&observer, t0(), &a, &b).unwrap();
        assert!((sep - 30.0).abs() < 1e-9);

        assert!(model
            .separation(&observer, t0(), &a, &Target::new("nowhere"))
            .is_err());
    }

    #[test]
    fn test_default_model_drives_slew() {
        let transitioner = Transitioner::new(Some(0.5), None).unwrap();
        let old: ScheduleEntry = block(Target::with_coordinates("a", 10.0, 0.0), &[]).into();
        let new = block(Target::with_coordinates("b", 40.0, 0.0), &[]);
        let transition = transitioner
            .compute(Some(&old), &new, t0(), &Observer::default())
            .unwrap()
            .unwrap();
        assert_eq!(transition.component(SLEW_TIME), Some(Duration::seconds(60)));
    }

    #[test]
    fn test_missing_coordinates_is_an_error() {
        let transitioner = Transitioner::new(Some(1.0), None).unwrap();
        let old: ScheduleEntry = block(Target::new("a"), &[]).into();
        let new = block(Target::new("b"), &[]);
        let err = transitioner
            .compute(Some(&old), &new, t0(), &Observer::default())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Constraint(_)));
    }

    #[test]
    fn test_instrument_reconfiguration() {
        let transitioner = Transitioner::new(None, Some(filter_table())).unwrap();
        let old: ScheduleEntry = block(Target::new("a"), &[("filter", "B"), ("binning", "1")]).into();
        let new = block(Target::new("b"), &[("filter", "V"), ("binning", "2")]);
        let transition = transitioner
            .compute(Some(&old), &new, t0(), &Observer::default())
            .unwrap()
            .unwrap();
        assert_eq!(
            transition.components(),
            &[("filter:B to V".to_string(), Duration::seconds(30))]
        );
    }

    #[test]
    fn test_unpriced_or_missing_axes_contribute_nothing() {
        let transitioner = Transitioner::new(None, Some(filter_table())).unwrap();
        let old = block(Target::new("a"), &[("filter", "B")]);
        let same = block(Target::new("b"), &[("filter", "B")]);
        let no_filter = block(Target::new("c"), &[("binning", "2")]);
        assert!(transitioner.instrument_transitions(&old, &same).is_empty());
        assert!(transitioner.instrument_transitions(&old, &no_filter).is_empty());

        let old: ScheduleEntry = old.into();
        assert!(transitioner
            .compute(Some(&old), &same, t0(), &Observer::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_slew_and_reconfiguration_combine() {
        let transitioner = Transitioner::new(Some(1.0), Some(filter_table()))
            .unwrap()
            .with_separation_model(Arc::new(FixedSeparation(15.0)));
        let old: ScheduleEntry = block(Target::new("a"), &[("filter", "V")]).into();
        let new = block(Target::new("b"), &[("filter", "B")]);
        let transition = transitioner
            .compute(Some(&old), &new, t0(), &Observer::default())
            .unwrap()
            .unwrap();
        assert_eq!(transition.components().len(), 2);
        assert_eq!(transition.component(SLEW_TIME), Some(Duration::seconds(15)));
        assert_eq!(transition.component("filter:V to B"), Some(Duration::seconds(45)));
        assert_eq!(transition.duration(), Duration::seconds(60));
    }

    #[test]
    fn test_bad_separation_is_an_error() {
        let old: ScheduleEntry = block(Target::new("a"), &[]).into();
        let new = block(Target::new("b"), &[]);
        for bad in [f64::NAN, f64::INFINITY, -1.0] {
            let transitioner = Transitioner::new(Some(1.0), None)
                .unwrap()
                .with_separation_model(Arc::new(FixedSeparation(bad)));
            let err = transitioner
                .compute(Some(&old), &new, t0(), &Observer::default())
                .unwrap_err();
            assert!(matches!(err, SchedulerError::Constraint(_)));
        }
    }

    #[test]
    fn test_unrepresentable_slew_is_an_error() {
        let transitioner = Transitioner::new(Some(1e-20), None)
            .unwrap()
            .with_separation_model(Arc::new(FixedSeparation(180.0)));
        let old: ScheduleEntry = block(Target::new("a"), &[]).into();
        let new = block(Target::new("b"), &[]);
        let err = transitioner
            .compute(Some(&old), &new, t0(), &Observer::default())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::SlewOutOfRange { .. }));
    }

    #[test]
    fn test_seconds_to_duration() {
        assert_eq!(seconds_to_duration(1.5), Some(Duration::milliseconds(1500)));
        assert_eq!(seconds_to_duration(0.0), Some(Duration::zero()));
        assert_eq!(seconds_to_duration(-1.0), None);
        assert_eq!(seconds_to_duration(f64::NAN), None);
        assert_eq!(seconds_to_duration(1e20), None);
    }

    #[test]
    fn test_invalid_configuration_rejected() {
        assert!(Transitioner::new(Some(0.0), None).is_err());
        assert!(Transitioner::new(Some(f64::INFINITY), None).is_err());

        let mut table = filter_table();
        table
            .get_mut("filter")
            .unwrap()
            .insert(("R".to_string(), "I".to_string()), Duration::seconds(-1));
        assert!(matches!(
            Transitioner::new(None, Some(table)),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }
}
