//! Python bindings.
//!
//! Constraints are plain Python callables taking `(target_names, times)` and
//! returning one float per time.

use chrono::{DateTime, Duration, Utc};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::constraints::{Constraint, ConstraintError, Observer};
use crate::models::{Configuration, ImageSet, ObservingBlock, ScheduleEntry, Target, TransitionBlock};
use crate::scheduler::{Scheduler, SequentialScheduler, SummingScheduler};
use crate::transitioner::{ReconfigTable, Transitioner};

fn to_py_err(err: impl fmt::Display) -> PyErr {
    PyValueError::new_err(err.to_string())
}

/// A Python callable acting as a constraint.
struct PyConstraint {
    name: String,
    callable: PyObject,
}

impl PyConstraint {
    fn new(py: Python<'_>, callable: PyObject) -> Self {
        let name = callable
            .getattr(py, "__name__")
            .and_then(|n| n.extract::<String>(py))
            .unwrap_or_else(|_| "python_constraint".to_string());
        Self { name, callable }
    }
}

impl fmt::Debug for PyConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PyConstraint")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Constraint for PyConstraint {
    fn name(&self) -> &str {
        &self.name
    }

    fn compute(
        &self,
        _observer: &Observer,
        targets: &[Target],
        times: &[DateTime<Utc>],
    ) -> Result<Vec<f64>, ConstraintError> {
        Python::with_gil(|py| {
            let names: Vec<String> = targets.iter().map(|t| t.name.clone()).collect();
            self.callable
                .call1(py, (names, times.to_vec()))
                .and_then(|scores| scores.extract::<Vec<f64>>(py))
                .map_err(|e| ConstraintError::new(self.name.clone(), e.to_string()))
        })
    }
}

fn wrap_constraints(py: Python<'_>, callables: Option<Vec<PyObject>>) -> Vec<Arc<dyn Constraint>> {
    callables
        .unwrap_or_default()
        .into_iter()
        .map(|c| Arc::new(PyConstraint::new(py, c)) as Arc<dyn Constraint>)
        .collect()
}

/// Transition cost model (PyO3 wrapper).
#[pyclass(name = "Transitioner")]
#[derive(Clone, Debug)]
pub struct PyTransitioner {
    inner: Transitioner,
}

#[pymethods]
impl PyTransitioner {
    /// `slew_rate` is in degrees per second; `instrument_reconfig_times` maps
    /// an axis name to `{(old_state, new_state): timedelta}`.
    #[new]
    #[pyo3(signature = (slew_rate=None, instrument_reconfig_times=None))]
    fn new(
        slew_rate: Option<f64>,
        instrument_reconfig_times: Option<HashMap<String, HashMap<(String, String), Duration>>>,
    ) -> PyResult<Self> {
        let table: Option<ReconfigTable> = instrument_reconfig_times.map(|table| {
            table
                .into_iter()
                .map(|(axis, costs)| (axis, costs.into_iter().collect()))
                .collect()
        });
        let inner = Transitioner::new(slew_rate, table).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    fn __repr__(&self) -> String {
        format!(
            "Transitioner(slew_rate={:?}, reconfig_axes={})",
            self.inner.slew_rate(),
            self.inner
                .instrument_reconfig_times()
                .map_or(0, |table| table.len())
        )
    }
}

fn to_configuration(configuration: Option<HashMap<String, String>>) -> Configuration {
    configuration.unwrap_or_default().into_iter().collect()
}

fn from_configuration(configuration: &Configuration) -> HashMap<String, String> {
    configuration
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn make_target(name: String, ra: Option<f64>, dec: Option<f64>) -> PyResult<Target> {
    match (ra, dec) {
        (Some(ra), Some(dec)) => Ok(Target::with_coordinates(name, ra, dec)),
        (None, None) => Ok(Target::new(name)),
        _ => Err(PyValueError::new_err("ra and dec must be given together")),
    }
}

/// Images taken with one instrument configuration (PyO3 wrapper).
#[pyclass(name = "ImageSet")]
#[derive(Clone, Debug)]
pub struct PyImageSet {
    inner: ImageSet,
}

#[pymethods]
impl PyImageSet {
    #[new]
    #[pyo3(signature = (duration, configuration=None))]
    fn new(duration: Duration, configuration: Option<HashMap<String, String>>) -> PyResult<Self> {
        let inner = ImageSet::new(duration, to_configuration(configuration)).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    /// `count` exposures, each costing `time_per_exposure + overhead`.
    #[staticmethod]
    #[pyo3(signature = (time_per_exposure, count, overhead=Duration::zero(), configuration=None))]
    fn from_exposures(
        time_per_exposure: Duration,
        count: u32,
        overhead: Duration,
        configuration: Option<HashMap<String, String>>,
    ) -> PyResult<Self> {
        let inner = ImageSet::from_exposures(
            time_per_exposure,
            count,
            overhead,
            to_configuration(configuration),
        )
        .map_err(to_py_err)?;
        Ok(Self { inner })
    }

    #[getter]
    fn duration(&self) -> Duration {
        self.inner.duration
    }

    #[getter]
    fn configuration(&self) -> HashMap<String, String> {
        from_configuration(&self.inner.configuration)
    }

    fn __repr__(&self) -> String {
        format!(
            "ImageSet(duration={}s, configuration={:?})",
            self.inner.duration.num_seconds(),
            self.configuration()
        )
    }
}

/// Observation request (PyO3 wrapper).
#[pyclass(name = "ObservingBlock")]
#[derive(Clone, Debug)]
pub struct PyObservingBlock {
    inner: ObservingBlock,
}

#[pymethods]
impl PyObservingBlock {
    #[new]
    #[pyo3(signature = (
        target,
        duration,
        constraints=None,
        priority=1.0,
        ra=None,
        dec=None,
        configuration=None
    ))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        py: Python<'_>,
        target: String,
        duration: Duration,
        constraints: Option<Vec<PyObject>>,
        priority: f64,
        ra: Option<f64>,
        dec: Option<f64>,
        configuration: Option<HashMap<String, String>>,
    ) -> PyResult<Self> {
        let target = make_target(target, ra, dec)?;
        let constraints = constraints.map(|c| wrap_constraints(py, Some(c)));
        let block = ObservingBlock::new(target, duration, constraints, priority)
            .map_err(to_py_err)?
            .with_configuration(to_configuration(configuration));
        Ok(Self { inner: block })
    }

    /// Block whose duration is the sum of `imagesets`; later image sets win
    /// on a shared configuration axis.
    #[staticmethod]
    #[pyo3(signature = (target, imagesets, priority=1.0, ra=None, dec=None))]
    fn from_imagesets(
        target: String,
        imagesets: Vec<PyImageSet>,
        priority: f64,
        ra: Option<f64>,
        dec: Option<f64>,
    ) -> PyResult<Self> {
        let target = make_target(target, ra, dec)?;
        let sets: Vec<ImageSet> = imagesets.into_iter().map(|set| set.inner).collect();
        let inner = ObservingBlock::from_imagesets(target, &sets, priority).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    #[getter]
    fn target(&self) -> String {
        self.inner.target.name.clone()
    }

    #[getter]
    fn duration(&self) -> Duration {
        self.inner.duration
    }

    #[getter]
    fn priority(&self) -> f64 {
        self.inner.priority
    }

    #[getter]
    fn configuration(&self) -> HashMap<String, String> {
        from_configuration(&self.inner.configuration)
    }

    #[getter]
    fn start_time(&self) -> Option<DateTime<Utc>> {
        self.inner.start_time()
    }

    #[getter]
    fn end_time(&self) -> Option<DateTime<Utc>> {
        self.inner.end_time()
    }

    #[getter]
    fn constraints_value(&self) -> Option<f64> {
        self.inner.constraints_value()
    }

    fn __repr__(&self) -> String {
        self.inner.to_string()
    }
}

/// Dead time between observations (PyO3 wrapper).
#[pyclass(name = "TransitionBlock")]
#[derive(Clone, Debug)]
pub struct PyTransitionBlock {
    inner: TransitionBlock,
}

#[pymethods]
impl PyTransitionBlock {
    #[getter]
    fn components(&self) -> HashMap<String, Duration> {
        self.inner.components().iter().cloned().collect()
    }

    #[getter]
    fn duration(&self) -> Duration {
        self.inner.duration()
    }

    #[getter]
    fn start_time(&self) -> Option<DateTime<Utc>> {
        self.inner.start_time()
    }

    #[getter]
    fn end_time(&self) -> Option<DateTime<Utc>> {
        self.inner.end_time()
    }

    fn __repr__(&self) -> String {
        self.inner.to_string()
    }
}

fn entries_to_py(py: Python<'_>, entries: Vec<ScheduleEntry>) -> PyResult<Vec<PyObject>> {
    entries
        .into_iter()
        .map(|entry| match entry {
            ScheduleEntry::Observing(inner) => {
                Ok(Py::new(py, PyObservingBlock { inner })?.into_py(py))
            }
            ScheduleEntry::Transition(inner) => {
                Ok(Py::new(py, PyTransitionBlock { inner })?.into_py(py))
            }
        })
        .collect()
}

fn unwrap_blocks(blocks: Vec<PyObservingBlock>) -> Vec<ObservingBlock> {
    blocks.into_iter().map(|b| b.inner).collect()
}

/// Schedule blocks with the product-of-constraints strategy.
///
/// # Returns
/// * List of ObservingBlock and TransitionBlock objects in start-time order
///
/// # Raises
/// * ValueError on an invalid window or configuration, or a failing constraint
#[pyfunction]
#[pyo3(signature = (blocks, start_time, end_time, constraints=None, transitioner=None, config=None, observer="site".to_string()))]
#[allow(clippy::too_many_arguments)]
fn sequential_schedule(
    py: Python<'_>,
    blocks: Vec<PyObservingBlock>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    constraints: Option<Vec<PyObject>>,
    transitioner: Option<PyTransitioner>,
    config: Option<SchedulerConfig>,
    observer: String,
) -> PyResult<Vec<PyObject>> {
    let scheduler = SequentialScheduler::new(
        start_time,
        end_time,
        wrap_constraints(py, constraints),
        Observer::new(observer),
        transitioner.map(|t| t.inner),
        config.unwrap_or_default(),
    )
    .map_err(to_py_err)?;
    let entries = scheduler
        .schedule(&unwrap_blocks(blocks))
        .map_err(to_py_err)?;
    entries_to_py(py, entries)
}

/// Schedule blocks with the priority-weighted-sum strategy.
///
/// # Raises
/// * ValueError on an invalid window or configuration, a failing constraint,
///   or a negative constraint score
#[pyfunction]
#[pyo3(signature = (blocks, start_time, end_time, constraints=None, transitioner=None, config=None, observer="site".to_string()))]
#[allow(clippy::too_many_arguments)]
fn summing_schedule(
    py: Python<'_>,
    blocks: Vec<PyObservingBlock>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    constraints: Option<Vec<PyObject>>,
    transitioner: Option<PyTransitioner>,
    config: Option<SchedulerConfig>,
    observer: String,
) -> PyResult<Vec<PyObject>> {
    let scheduler = SummingScheduler::new(
        start_time,
        end_time,
        wrap_constraints(py, constraints),
        Observer::new(observer),
        transitioner.map(|t| t.inner),
        config.unwrap_or_default(),
    )
    .map_err(to_py_err)?;
    let entries = scheduler
        .schedule(&unwrap_blocks(blocks))
        .map_err(to_py_err)?;
    entries_to_py(py, entries)
}

pub(crate) fn register(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyImageSet>()?;
    m.add_class::<PyObservingBlock>()?;
    m.add_class::<PyTransitionBlock>()?;
    m.add_class::<PyTransitioner>()?;
    m.add_class::<SchedulerConfig>()?;

    m.add_function(wrap_pyfunction!(sequential_schedule, m)?)?;
    m.add_function(wrap_pyfunction!(summing_schedule, m)?)?;
    Ok(())
}
