//! Intermediate capture during model evaluation.
//!
//! The integration strategies may evaluate the model far more often than
//! there are requested output times, through trial steps and internal stage
//! evaluations. Every evaluation that invokes the capture primitive appends
//! a [`Snapshot`]; reconciliation against the accepted evaluation times
//! happens after integration.

use is_close::is_close;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use crate::variable::{FloatValue, Time};

/// Absolute tolerance when matching snapshot times to accepted times.
pub const TIME_MATCH_ABS_TOL: f64 = 1e-9;

/// A captured, time-stamped mapping of requested output values from one
/// evaluation call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub time: Time,
    pub values: HashMap<String, FloatValue>,
}

/// How a model misused the capture primitive during a run.
///
/// Violations are surfaced at the end of the run; the computed results stand
/// but the run is flagged as unreliable.
#[derive(Debug, Clone, PartialEq)]
pub enum UsageViolation {
    /// `record` was called more than once within a single evaluation.
    DuplicateCapture { time: Time, count: usize },
    /// No snapshot matched an accepted evaluation time.
    MissingCapture { time: Time },
}

impl fmt::Display for UsageViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsageViolation::DuplicateCapture { time, count } => {
                write!(f, "capture called {count} times in one evaluation at t = {time}")
            }
            UsageViolation::MissingCapture { time } => {
                write!(f, "no capture at accepted time t = {time}")
            }
        }
    }
}

/// Append-only capture buffer scoped to a single run.
///
/// The buffer is cleared at run start by the integration driver. The driver
/// also brackets every model evaluation so that capture calls can be counted
/// per evaluation.
#[derive(Debug, Default)]
pub struct SnapshotRecorder {
    buffer: Vec<Snapshot>,
    records_in_call: usize,
    violations: Vec<UsageViolation>,
}

impl SnapshotRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the requested output values for the evaluation at `time`.
    ///
    /// Must be called at most once per model evaluation; additional calls
    /// are counted as usage violations and reported at the end of the run.
    pub fn record(&mut self, time: Time, values: HashMap<String, FloatValue>) {
        self.records_in_call += 1;
        self.buffer.push(Snapshot { time, values });
    }

    pub(crate) fn begin_evaluation(&mut self) {
        self.records_in_call = 0;
    }

    pub(crate) fn end_evaluation(&mut self, time: Time) {
        if self.records_in_call > 1 {
            self.violations.push(UsageViolation::DuplicateCapture {
                time,
                count: self.records_in_call,
            });
        }
    }

    /// Drop all captures and violations. Called at run start.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.violations.clear();
        self.records_in_call = 0;
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub(crate) fn take_violations(&mut self) -> Vec<UsageViolation> {
        std::mem::take(&mut self.violations)
    }
}

/// Reconcile raw captures against the accepted evaluation times.
///
/// For each accepted time the *last* matching snapshot wins: a later call at
/// an accepted time reflects the solver's final evaluation rather than an
/// earlier retried one. Snapshots at unaccepted times are discarded. `None`
/// marks an accepted time that no capture matched.
pub fn reconcile_last(snapshots: &[Snapshot], accepted_times: &[Time]) -> Vec<Option<Snapshot>> {
    accepted_times
        .iter()
        .map(|&time| {
            snapshots
                .iter()
                .rev()
                .find(|snapshot| {
                    is_close!(snapshot.time, time, rel_tol = 1e-12, abs_tol = TIME_MATCH_ABS_TOL)
                })
                .cloned()
        })
        .collect()
}
