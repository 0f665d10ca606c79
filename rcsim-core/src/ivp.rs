//! Integration strategies for advancing a mechanistic model through time.
//!
//! Two interchangeable strategies share one contract: delegate step
//! selection to the external adaptive solver, or advance with the
//! self-contained fixed-step RK4 integrator. Either way the model's
//! per-step evaluation is invoked many more times than there are requested
//! output points; the recorder captures every evaluation and reconciliation
//! against the accepted times happens afterwards (see [`crate::recorder`]).

use log::debug;
use nalgebra::DVector;
use ode_solvers::dopri5::Dopri5;
use std::cell::RefCell;

use crate::errors::{RcsimError, RcsimResult};
use crate::recorder::{SnapshotRecorder, TIME_MATCH_ABS_TOL};
use crate::variable::{FloatValue, Time};

/// State vector type shared with the external solver.
pub type State = DVector<FloatValue>;

/// Per-step evaluation of a mechanistic model.
///
/// Implementations compute the algebraic intermediates for `(t, y)`, capture
/// the requested outputs through `recorder` (exactly once per call when any
/// outputs were requested), and return one differential per state variable,
/// in state declaration order. The correspondence between `y` and the
/// returned differentials is positional; the driver validates it by length
/// before stepping begins.
pub trait Mechanism {
    fn evaluate(
        &self,
        t: Time,
        y: &[FloatValue],
        recorder: &mut SnapshotRecorder,
    ) -> Vec<FloatValue>;
}

/// Integration strategy selector, as named in run configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SolverKind {
    Adaptive,
    #[serde(rename = "RK4")]
    Rk4,
}

/// A strategy with its resolved options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Strategy {
    /// Delegate step selection to the external adaptive solver.
    Adaptive { rtol: FloatValue, atol: FloatValue },
    /// Self-contained explicit RK4 with sub-step interval `h`.
    FixedStepRk4 { h: FloatValue },
}

/// Accepted states, one per requested evaluation time.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub times: Vec<Time>,
    pub states: Vec<State>,
}

impl Trajectory {
    fn with_capacity(n: usize) -> Self {
        Self {
            times: Vec::with_capacity(n),
            states: Vec::with_capacity(n),
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn final_state(&self) -> Option<&State> {
        self.states.last()
    }
}

/// Advance `mechanism` from `initial_state` across `time_span`, producing
/// one accepted state per entry of `eval_times`.
///
/// The recorder is cleared at run start and accumulates one snapshot per
/// capture-invoking evaluation; callers reconcile it against the returned
/// trajectory. The differential/state length correspondence is validated by
/// a pre-flight evaluation before any stepping occurs.
pub fn advance<M: Mechanism>(
    mechanism: &M,
    initial_state: &[FloatValue],
    time_span: (Time, Time),
    eval_times: &[Time],
    strategy: Strategy,
    recorder: &mut SnapshotRecorder,
) -> RcsimResult<Trajectory> {
    validate_times(time_span, eval_times)?;
    if let Strategy::FixedStepRk4 { h } = strategy {
        validate_sub_step(h, time_span.0, eval_times)?;
    }
    if initial_state.is_empty() {
        return Err(RcsimError::Definition(
            "initial state is empty: the model declares no state variables".to_string(),
        ));
    }

    let t0 = time_span.0;
    let y0 = State::from_column_slice(initial_state);
    ensure_finite(&y0, t0)?;

    recorder.clear();

    // Pre-flight evaluation at the start of the span. Validates the
    // differential count before any stepping and guarantees a capture at t0
    // for the case where t0 itself is a requested time.
    recorder.begin_evaluation();
    let derivatives = mechanism.evaluate(t0, initial_state, recorder);
    recorder.end_evaluation(t0);
    if derivatives.len() != initial_state.len() {
        return Err(RcsimError::Definition(format!(
            "model returned {} differentials for {} state variables",
            derivatives.len(),
            initial_state.len()
        )));
    }

    match strategy {
        Strategy::Adaptive { rtol, atol } => {
            debug!("advancing with the adaptive delegate, rtol = {rtol}, atol = {atol}");
            advance_adaptive(mechanism, y0, t0, eval_times, rtol, atol, recorder)
        }
        Strategy::FixedStepRk4 { h } => {
            debug!("advancing with fixed-step RK4, h = {h}");
            advance_rk4(mechanism, y0, t0, eval_times, h, recorder)
        }
    }
}

fn validate_times(time_span: (Time, Time), eval_times: &[Time]) -> RcsimResult<()> {
    let (t0, t1) = time_span;
    if !(t1 > t0) {
        return Err(RcsimError::Definition(format!(
            "time span must be increasing, got ({t0}, {t1})"
        )));
    }
    if eval_times.is_empty() {
        return Err(RcsimError::Definition(
            "eval_times must contain at least one time".to_string(),
        ));
    }
    for pair in eval_times.windows(2) {
        if !(pair[1] > pair[0]) {
            return Err(RcsimError::Definition(format!(
                "eval_times must be strictly ascending, got {} then {}",
                pair[0], pair[1]
            )));
        }
    }
    let first = eval_times[0];
    let last = eval_times[eval_times.len() - 1];
    if first < t0 - TIME_MATCH_ABS_TOL || last > t1 + TIME_MATCH_ABS_TOL {
        return Err(RcsimError::Definition(format!(
            "eval_times [{first}, {last}] fall outside the time span ({t0}, {t1})"
        )));
    }
    Ok(())
}

fn validate_sub_step(h: FloatValue, t0: Time, eval_times: &[Time]) -> RcsimResult<()> {
    if !(h > 0.0) {
        return Err(RcsimError::Definition(format!(
            "sub-step interval must be positive, got {h}"
        )));
    }
    let mut previous = t0;
    for &time in eval_times {
        let spacing = time - previous;
        if spacing > TIME_MATCH_ABS_TOL && h >= spacing {
            return Err(RcsimError::Definition(format!(
                "sub-step interval {h} must be strictly smaller than the evaluation spacing {spacing}"
            )));
        }
        previous = time;
    }
    Ok(())
}

fn ensure_finite(y: &State, time: Time) -> RcsimResult<()> {
    match y.iter().position(|v| !v.is_finite()) {
        None => Ok(()),
        Some(index) => Err(RcsimError::Integration {
            time,
            reason: format!("state component {index} is non-finite"),
        }),
    }
}

/// Bracketed model evaluation used by the fixed-step integrator.
///
/// A differential count that changes mid-run cannot be reported from inside
/// a stage evaluation; the NaN state it produces fails the next finiteness
/// check instead.
fn eval<M: Mechanism>(
    mechanism: &M,
    t: Time,
    y: &State,
    recorder: &mut SnapshotRecorder,
) -> State {
    recorder.begin_evaluation();
    let derivatives = mechanism.evaluate(t, y.as_slice(), recorder);
    recorder.end_evaluation(t);
    if derivatives.len() == y.len() {
        State::from_vec(derivatives)
    } else {
        State::from_element(y.len(), FloatValue::NAN)
    }
}

/// Right-hand-side adapter handed to the external adaptive solver.
///
/// The solver invokes `system` an implementation-defined number of times;
/// each invocation is bracketed so the recorder can account for capture
/// calls per evaluation.
struct RhsAdapter<'a, M> {
    mechanism: &'a M,
    recorder: RefCell<&'a mut SnapshotRecorder>,
    n_states: usize,
}

impl<M: Mechanism> ode_solvers::System<Time, State> for RhsAdapter<'_, M> {
    fn system(&self, t: Time, y: &State, dy: &mut State) {
        let mut guard = self.recorder.borrow_mut();
        let recorder = &mut **guard;
        recorder.begin_evaluation();
        let derivatives = self.mechanism.evaluate(t, y.as_slice(), recorder);
        recorder.end_evaluation(t);
        if derivatives.len() != self.n_states {
            dy.fill(FloatValue::NAN);
            return;
        }
        for (slot, value) in dy.iter_mut().zip(derivatives) {
            *slot = value;
        }
    }
}

/// Delegate to the external adaptive solver, one leg per requested time.
///
/// Driving the solver between consecutive evaluation times keeps
/// non-uniform `eval_times` exact and makes every accepted time the
/// endpoint of a leg, where the solver's final (accepted) evaluation of the
/// right-hand side is also the chronologically last capture at that time.
fn advance_adaptive<M: Mechanism>(
    mechanism: &M,
    y0: State,
    t0: Time,
    eval_times: &[Time],
    rtol: FloatValue,
    atol: FloatValue,
    recorder: &mut SnapshotRecorder,
) -> RcsimResult<Trajectory> {
    let mut trajectory = Trajectory::with_capacity(eval_times.len());
    let n_states = y0.len();
    let mut y = y0;
    let mut t = t0;

    for &target in eval_times {
        if target - t > TIME_MATCH_ABS_TOL {
            let system = RhsAdapter {
                mechanism,
                recorder: RefCell::new(&mut *recorder),
                n_states,
            };
            let mut stepper = Dopri5::new(system, t, target, target - t, y.clone(), rtol, atol);
            match stepper.integrate() {
                Ok(stats) => {
                    debug!(
                        "leg ({t}, {target}): {} evaluations, {} accepted, {} rejected",
                        stats.num_eval, stats.accepted_steps, stats.rejected_steps
                    );
                    let tolerance = TIME_MATCH_ABS_TOL.max(target.abs() * 1e-12);
                    let reached = stepper.x_out().last().copied();
                    let state = stepper.y_out().last().cloned();
                    match (reached, state) {
                        (Some(reached), Some(state))
                            if (reached - target).abs() <= tolerance =>
                        {
                            y = state;
                        }
                        (Some(reached), Some(_)) => {
                            return Err(RcsimError::Integration {
                                time: target,
                                reason: format!(
                                    "solver stopped at t = {reached} before the requested time"
                                ),
                            });
                        }
                        _ => {
                            return Err(RcsimError::Integration {
                                time: target,
                                reason: "solver returned an empty trajectory".to_string(),
                            });
                        }
                    }
                }
                Err(err) => {
                    return Err(RcsimError::Integration {
                        time: t,
                        reason: err.to_string(),
                    });
                }
            }
            t = target;
        }
        ensure_finite(&y, target)?;
        trajectory.times.push(target);
        trajectory.states.push(y.clone());
    }

    Ok(trajectory)
}

/// Self-contained explicit fourth-order Runge-Kutta.
///
/// Each leg between consecutive requested times is covered by fixed
/// sub-steps of size `h` with a final partial sub-step when the leg is not
/// an exact multiple. No adaptive error control is performed; accuracy is
/// solely a function of `h`.
fn advance_rk4<M: Mechanism>(
    mechanism: &M,
    y0: State,
    t0: Time,
    eval_times: &[Time],
    h: FloatValue,
    recorder: &mut SnapshotRecorder,
) -> RcsimResult<Trajectory> {
    let mut trajectory = Trajectory::with_capacity(eval_times.len());
    let mut y = y0;
    let mut t = t0;

    for &target in eval_times {
        // The loop tolerance scales with the boundary magnitude so the final
        // partial sub-step cannot stall below the time resolution.
        let tolerance = TIME_MATCH_ABS_TOL.max(target.abs() * 4.0 * FloatValue::EPSILON);
        while target - t > tolerance {
            let step = FloatValue::min(h, target - t);
            y = rk4_step(mechanism, t, &y, step, recorder);
            t += step;
            ensure_finite(&y, t)?;
        }
        // Clamp accumulated floating-point drift at the boundary.
        t = target;
        trajectory.times.push(target);
        trajectory.states.push(y.clone());
    }

    // Closing evaluation at the final boundary. The last stage evaluation
    // inside the final sub-step used a trial state; this one carries the
    // accepted state, and last-wins reconciliation retains it. Interior
    // boundaries are covered by the k1 stage of the following leg.
    let _ = eval(mechanism, t, &y, recorder);

    Ok(trajectory)
}

fn rk4_step<M: Mechanism>(
    mechanism: &M,
    t: Time,
    y: &State,
    h: FloatValue,
    recorder: &mut SnapshotRecorder,
) -> State {
    let half = h / 2.0;
    let k1 = eval(mechanism, t, y, recorder);
    let k2 = eval(mechanism, t + half, &(y + &k1 * half), recorder);
    let k3 = eval(mechanism, t + half, &(y + &k2 * half), recorder);
    let k4 = eval(mechanism, t + h, &(y + &k3 * h), recorder);
    y + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (h / 6.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::example_mechanisms::{ArityMismatch, ExponentialDecay, SpyMechanism};
    use crate::recorder::reconcile_last;
    use is_close::is_close;

    fn decay_times() -> Vec<Time> {
        vec![0.0, 1.0, 2.0, 3.0, 4.0]
    }

    #[test]
    fn rk4_matches_the_analytic_solution() {
        let mechanism = ExponentialDecay { rate: 0.3 };
        let mut recorder = SnapshotRecorder::new();
        let trajectory = advance(
            &mechanism,
            &[1.0],
            (0.0, 4.0),
            &decay_times(),
            Strategy::FixedStepRk4 { h: 0.01 },
            &mut recorder,
        )
        .unwrap();

        assert_eq!(trajectory.len(), 5);
        for (time, state) in trajectory.times.iter().zip(&trajectory.states) {
            let expected = (-0.3 * time).exp();
            assert!(
                is_close!(state[0], expected, rel_tol = 1e-6),
                "y({time}) = {} but expected {expected}",
                state[0]
            );
        }
    }

    #[test]
    fn adaptive_matches_the_analytic_solution() {
        let mechanism = ExponentialDecay { rate: 0.3 };
        let mut recorder = SnapshotRecorder::new();
        let trajectory = advance(
            &mechanism,
            &[1.0],
            (0.0, 4.0),
            &decay_times(),
            Strategy::Adaptive {
                rtol: 1e-8,
                atol: 1e-10,
            },
            &mut recorder,
        )
        .unwrap();

        assert_eq!(trajectory.len(), 5);
        for (time, state) in trajectory.times.iter().zip(&trajectory.states) {
            let expected = (-0.3 * time).exp();
            assert!(
                is_close!(state[0], expected, rel_tol = 1e-6),
                "y({time}) = {} but expected {expected}",
                state[0]
            );
        }
    }

    #[test]
    fn rk4_is_deterministic() {
        let mechanism = ExponentialDecay { rate: 0.42 };
        let mut first = SnapshotRecorder::new();
        let mut second = SnapshotRecorder::new();
        let a = advance(
            &mechanism,
            &[2.0],
            (0.0, 4.0),
            &decay_times(),
            Strategy::FixedStepRk4 { h: 0.1 },
            &mut first,
        )
        .unwrap();
        let b = advance(
            &mechanism,
            &[2.0],
            (0.0, 4.0),
            &decay_times(),
            Strategy::FixedStepRk4 { h: 0.1 },
            &mut second,
        )
        .unwrap();
        // Bit-identical, not merely close.
        assert_eq!(a, b);
    }

    #[test]
    fn rk4_takes_a_partial_final_sub_step() {
        // 0.3 does not divide 1.0; the leg ends with a shorter sub-step.
        let mechanism = ExponentialDecay { rate: 1.0 };
        let mut recorder = SnapshotRecorder::new();
        let trajectory = advance(
            &mechanism,
            &[1.0],
            (0.0, 1.0),
            &[0.0, 1.0],
            Strategy::FixedStepRk4 { h: 0.3 },
            &mut recorder,
        )
        .unwrap();
        let expected = (-1.0f64).exp();
        assert!(is_close!(trajectory.states[1][0], expected, rel_tol = 1e-5));
    }

    #[test]
    fn differential_count_mismatch_fails_before_stepping() {
        let mechanism = ArityMismatch { n_differentials: 3 };
        let mut recorder = SnapshotRecorder::new();
        let err = advance(
            &mechanism,
            &[1.0, 1.0],
            (0.0, 1.0),
            &[0.0, 1.0],
            Strategy::FixedStepRk4 { h: 0.1 },
            &mut recorder,
        )
        .unwrap_err();
        assert!(matches!(err, RcsimError::Definition(_)));
        // Nothing was integrated: only the pre-flight capture exists.
        assert!(recorder.len() <= 1);
    }

    #[test]
    fn non_finite_state_aborts_with_an_integration_error() {
        // Explosive growth overflows to infinity well before t = 20.
        let mechanism = ExponentialDecay { rate: -500.0 };
        let mut recorder = SnapshotRecorder::new();
        let err = advance(
            &mechanism,
            &[1.0],
            (0.0, 20.0),
            &[0.0, 10.0, 20.0],
            Strategy::FixedStepRk4 { h: 0.5 },
            &mut recorder,
        )
        .unwrap_err();
        assert!(matches!(err, RcsimError::Integration { .. }));
    }

    #[test]
    fn eval_times_must_be_strictly_ascending() {
        let mechanism = ExponentialDecay { rate: 0.1 };
        let mut recorder = SnapshotRecorder::new();
        let err = advance(
            &mechanism,
            &[1.0],
            (0.0, 2.0),
            &[0.0, 1.0, 1.0],
            Strategy::Adaptive {
                rtol: 1e-6,
                atol: 1e-9,
            },
            &mut recorder,
        )
        .unwrap_err();
        assert!(matches!(err, RcsimError::Definition(_)));
    }

    #[test]
    fn sub_step_must_be_smaller_than_the_eval_spacing() {
        let mechanism = ExponentialDecay { rate: 0.1 };
        let mut recorder = SnapshotRecorder::new();
        let err = advance(
            &mechanism,
            &[1.0],
            (0.0, 2.0),
            &[0.0, 1.0, 2.0],
            Strategy::FixedStepRk4 { h: 1.0 },
            &mut recorder,
        )
        .unwrap_err();
        assert!(matches!(err, RcsimError::Definition(_)));
    }

    #[test]
    fn reconciled_snapshot_is_the_last_capture_at_each_accepted_time() {
        // The spy stamps every capture with a monotonically increasing call
        // number, so the reconciled snapshot exposes which evaluation won.
        let spy = SpyMechanism::new(0.3);
        let eval_times = decay_times();
        let mut recorder = SnapshotRecorder::new();
        let trajectory = advance(
            &spy,
            &[1.0],
            (0.0, 4.0),
            &eval_times,
            Strategy::Adaptive {
                rtol: 1e-6,
                atol: 1e-9,
            },
            &mut recorder,
        )
        .unwrap();

        // The solver evaluated more often than there are output points.
        assert!(recorder.len() > eval_times.len());

        let reconciled = reconcile_last(recorder.snapshots(), &trajectory.times);
        for (time, snapshot) in trajectory.times.iter().zip(&reconciled) {
            let snapshot = snapshot.as_ref().expect("snapshot at accepted time");
            let call = snapshot.values["call"];
            let last_call_at_time = recorder
                .snapshots()
                .iter()
                .filter(|s| is_close!(s.time, *time, abs_tol = TIME_MATCH_ABS_TOL))
                .map(|s| s.values["call"])
                .fold(FloatValue::NEG_INFINITY, FloatValue::max);
            assert_eq!(
                call, last_call_at_time,
                "snapshot at t = {time} is not the last capture"
            );
        }
    }

    #[test]
    fn rk4_boundary_snapshots_carry_the_accepted_state() {
        let spy = SpyMechanism::new(0.3);
        let eval_times = decay_times();
        let mut recorder = SnapshotRecorder::new();
        let trajectory = advance(
            &spy,
            &[1.0],
            (0.0, 4.0),
            &eval_times,
            Strategy::FixedStepRk4 { h: 0.25 },
            &mut recorder,
        )
        .unwrap();

        let reconciled = reconcile_last(recorder.snapshots(), &trajectory.times);
        for (snapshot, state) in reconciled.iter().zip(&trajectory.states) {
            let snapshot = snapshot.as_ref().unwrap();
            assert_eq!(snapshot.values["y"], state[0]);
        }
    }

    #[test]
    fn single_eval_time_at_the_span_start_is_captured() {
        let mechanism = ExponentialDecay { rate: 0.3 };
        let mut recorder = SnapshotRecorder::new();
        let trajectory = advance(
            &mechanism,
            &[1.0],
            (0.0, 1.0),
            &[0.0],
            Strategy::Adaptive {
                rtol: 1e-6,
                atol: 1e-9,
            },
            &mut recorder,
        )
        .unwrap();
        assert_eq!(trajectory.len(), 1);
        let reconciled = reconcile_last(recorder.snapshots(), &trajectory.times);
        assert!(reconciled[0].is_some());
    }
}
