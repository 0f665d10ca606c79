#![allow(dead_code)]

//! Hand-written mechanisms used by the crate's tests.

use std::cell::Cell;
use std::collections::HashMap;

use crate::ivp::Mechanism;
use crate::recorder::SnapshotRecorder;
use crate::variable::{FloatValue, Time};

/// dy/dt = -rate * y, with the analytic solution y0 * exp(-rate * t).
pub(crate) struct ExponentialDecay {
    pub rate: FloatValue,
}

impl Mechanism for ExponentialDecay {
    fn evaluate(
        &self,
        t: Time,
        y: &[FloatValue],
        recorder: &mut SnapshotRecorder,
    ) -> Vec<FloatValue> {
        recorder.record(t, HashMap::from([("y".to_string(), y[0])]));
        vec![-self.rate * y[0]]
    }
}

/// Exponential decay that stamps every capture with its call number, so
/// tests can tell which of several evaluations at the same time was last.
pub(crate) struct SpyMechanism {
    rate: FloatValue,
    calls: Cell<u64>,
}

impl SpyMechanism {
    pub fn new(rate: FloatValue) -> Self {
        Self {
            rate,
            calls: Cell::new(0),
        }
    }

    pub fn call_count(&self) -> u64 {
        self.calls.get()
    }
}

impl Mechanism for SpyMechanism {
    fn evaluate(
        &self,
        t: Time,
        y: &[FloatValue],
        recorder: &mut SnapshotRecorder,
    ) -> Vec<FloatValue> {
        let call = self.calls.get() + 1;
        self.calls.set(call);
        recorder.record(
            t,
            HashMap::from([
                ("call".to_string(), call as FloatValue),
                ("y".to_string(), y[0]),
            ]),
        );
        vec![-self.rate * y[0]]
    }
}

/// Returns a fixed number of differentials regardless of the state length.
pub(crate) struct ArityMismatch {
    pub n_differentials: usize,
}

impl Mechanism for ArityMismatch {
    fn evaluate(
        &self,
        _t: Time,
        _y: &[FloatValue],
        _recorder: &mut SnapshotRecorder,
    ) -> Vec<FloatValue> {
        vec![0.0; self.n_differentials]
    }
}

/// Captures more than once per evaluation, misusing the recorder.
pub(crate) struct DoubleCapture {
    pub rate: FloatValue,
}

impl Mechanism for DoubleCapture {
    fn evaluate(
        &self,
        t: Time,
        y: &[FloatValue],
        recorder: &mut SnapshotRecorder,
    ) -> Vec<FloatValue> {
        recorder.record(t, HashMap::from([("y".to_string(), y[0])]));
        recorder.record(t, HashMap::from([("y".to_string(), y[0])]));
        vec![-self.rate * y[0]]
    }
}
