//! Two-compartment decay model.
//!
//! Substance A converts to B at rate `kAB` with yield `YBAB`; B is
//! eliminated at rate `kBO`. Both compartments share a volume `vol`:
//!
//! ```text
//! dA/dt = -kAB * (A / vol)
//! dB/dt = YBAB * kAB * (A / vol) - kBO * (B / vol)
//! ```

use serde::{Deserialize, Serialize};

use rcsim_core::definition::ModelDefinition;
use rcsim_core::errors::RcsimResult;
use rcsim_core::model::Model;
use rcsim_core::variable::{FloatValue, Section};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoCompartmentParameters {
    /// Transfer rate from A to B.
    pub k_ab: FloatValue,
    /// Elimination rate from B.
    pub k_bo: FloatValue,
    /// Yield of B per unit of A transferred.
    pub y_bab: FloatValue,
    /// Shared compartment volume.
    pub vol: FloatValue,
}

impl Default for TwoCompartmentParameters {
    fn default() -> Self {
        Self {
            k_ab: 0.42,
            k_bo: 0.03,
            y_bab: 1.0,
            vol: 1.0,
        }
    }
}

/// Declare the two-compartment model.
///
/// The intermediates are deliberately not written in computation order; the
/// sorted section takes care of that.
pub fn definition(
    parameters: &TwoCompartmentParameters,
    initial_a: FloatValue,
    initial_b: FloatValue,
) -> ModelDefinition {
    ModelDefinition::builder("two_compartment")
        .constant("kAB", parameters.k_ab)
        .constant("kBO", parameters.k_bo)
        .constant("YBAB", parameters.y_bab)
        .constant("vol", parameters.vol)
        .section(Section::Dynamic)
        .intermediate("dAdt", &["UAAB"], |s| -s.get("UAAB"))
        .intermediate("UAAB", &["kAB", "concA"], |s| s.get("kAB") * s.get("concA"))
        .intermediate("dBdt", &["PBAB", "UBBO"], |s| s.get("PBAB") - s.get("UBBO"))
        .intermediate("PBAB", &["UAAB", "YBAB"], |s| s.get("UAAB") * s.get("YBAB"))
        .intermediate("UBBO", &["kBO", "concB"], |s| s.get("kBO") * s.get("concB"))
        .intermediate("concA", &["A", "vol"], |s| s.get("A") / s.get("vol"))
        .intermediate("concB", &["B", "vol"], |s| s.get("B") / s.get("vol"))
        .integ("A", "dAdt", initial_a)
        .integ("B", "dBdt", initial_b)
        .build()
        .expect("the two-compartment definition is well formed")
}

/// Compile the two-compartment model.
pub fn model(
    parameters: &TwoCompartmentParameters,
    initial_a: FloatValue,
    initial_b: FloatValue,
) -> RcsimResult<Model> {
    Model::from_definition(definition(parameters, initial_a, initial_b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use is_close::is_close;
    use rcsim_core::errors::RcsimError;
    use rcsim_core::model::RunConfig;
    use rcsim_core::variable::VariableKind;

    const INITIAL_A: FloatValue = 3.811004739069482;
    const INITIAL_B: FloatValue = 4.473254058347129;

    fn eval_times() -> Vec<FloatValue> {
        (0..=12).map(|i| (i * 10) as FloatValue).collect()
    }

    fn scenario_config() -> RunConfig {
        RunConfig::rk4((0.0, 120.0), eval_times(), 0.01)
            .with_outputs(&["t", "A", "B", "concA", "concB", "dAdt"])
    }

    #[test]
    fn classification_matches_the_declaration() {
        let model = model(&TwoCompartmentParameters::default(), INITIAL_A, INITIAL_B).unwrap();
        let constants = model
            .variables()
            .iter()
            .filter(|v| v.kind == VariableKind::Constant)
            .count();
        let states = model
            .variables()
            .iter()
            .filter(|v| v.kind == VariableKind::State)
            .count();
        let intermediates = model
            .variables()
            .iter()
            .filter(|v| v.kind == VariableKind::Intermediate)
            .count();
        assert_eq!((constants, states, intermediates), (4, 2, 7));
    }

    #[test]
    fn documented_decay_scenario() {
        let mut model =
            model(&TwoCompartmentParameters::default(), INITIAL_A, INITIAL_B).unwrap();
        let output = model.run(&scenario_config()).unwrap();
        assert!(output.is_reliable());

        let table = &output.table;
        assert_eq!(table.n_rows(), 13);
        assert_eq!(
            table.columns(),
            &["t", "A", "B", "concA", "concB", "dAdt"]
                .map(String::from)
        );

        // First row reflects the initial state.
        assert!(is_close!(table.value(0, "A").unwrap(), 3.811, abs_tol = 1e-2));
        assert!(is_close!(table.value(0, "B").unwrap(), 4.474, abs_tol = 1e-2));

        // A decays monotonically towards zero.
        let a: Vec<FloatValue> = table.column("A").unwrap().to_vec();
        assert!(a.windows(2).all(|w| w[1] < w[0]));
        assert!(a[12] < 1e-6);

        // B first rises, then decays towards zero.
        let b: Vec<FloatValue> = table.column("B").unwrap().to_vec();
        assert!(b[1] > b[0]);
        assert!(b[2..].windows(2).all(|w| w[1] < w[0]));
        assert!(b[12] < 0.3);

        // With vol = 1 the concentrations equal the amounts.
        assert_eq!(table.value(3, "concA"), table.value(3, "A"));

        // A(t) has the analytic solution A0 * exp(-kAB * t).
        for (row, time) in eval_times().iter().enumerate() {
            let expected = INITIAL_A * (-0.42 * time).exp();
            assert!(
                is_close!(table.value(row, "A").unwrap(), expected, rel_tol = 1e-4, abs_tol = 1e-9),
                "A({time}) deviates from the analytic solution"
            );
        }
    }

    #[test]
    fn adaptive_strategy_reproduces_the_scenario() {
        let mut model =
            model(&TwoCompartmentParameters::default(), INITIAL_A, INITIAL_B).unwrap();
        let config = RunConfig::adaptive((0.0, 120.0), eval_times())
            .with_outputs(&["A", "B"]);
        let output = model.run(&config).unwrap();

        assert_eq!(output.table.n_rows(), 13);
        for (row, time) in eval_times().iter().enumerate() {
            let expected = INITIAL_A * (-0.42 * time).exp();
            assert!(
                is_close!(output.table.value(row, "A").unwrap(), expected, rel_tol = 1e-3, abs_tol = 1e-8),
                "A({time}) deviates from the analytic solution"
            );
        }
    }

    #[test]
    fn constant_override_matches_an_originally_bound_run() {
        let parameters = TwoCompartmentParameters {
            k_ab: 0.1,
            ..TwoCompartmentParameters::default()
        };
        let mut overridden = model(&parameters, INITIAL_A, INITIAL_B).unwrap();
        let config = scenario_config().with_override("kAB", 0.42);
        let from_override = overridden.run(&config).unwrap();

        let mut bound =
            model(&TwoCompartmentParameters::default(), INITIAL_A, INITIAL_B).unwrap();
        let from_binding = bound.run(&scenario_config()).unwrap();

        assert_eq!(from_override.trajectory, from_binding.trajectory);
    }

    #[test]
    fn override_after_the_run_has_begun_is_rejected() {
        let mut model =
            model(&TwoCompartmentParameters::default(), INITIAL_A, INITIAL_B).unwrap();
        model.run(&scenario_config()).unwrap();
        let err = model.override_constant("kAB", 0.5).unwrap_err();
        assert!(matches!(err, RcsimError::State(_)));
    }

    #[test]
    fn restart_continues_from_a_previous_run() {
        let mut first =
            model(&TwoCompartmentParameters::default(), INITIAL_A, INITIAL_B).unwrap();
        let output = first.run(&scenario_config()).unwrap();
        let final_state = output.final_state().unwrap();
        let (a, b) = (final_state[0], final_state[1]);

        // New instance, faster transfer, picking up where the first run
        // stopped.
        let parameters = TwoCompartmentParameters {
            k_ab: 0.5,
            ..TwoCompartmentParameters::default()
        };
        let mut second = model(&parameters, a, b).unwrap();
        let times: Vec<FloatValue> = (12..=22).map(|i| (i * 10) as FloatValue).collect();
        let config = RunConfig::rk4((120.0, 220.0), times.clone(), 0.01)
            .with_outputs(&["t", "A", "B"]);
        let restarted = second.run(&config).unwrap();

        assert_eq!(restarted.table.n_rows(), 11);
        assert_eq!(restarted.table.times().to_vec(), times);
        assert_eq!(restarted.table.value(0, "A"), Some(a));
        assert_eq!(restarted.table.value(0, "B"), Some(b));
    }
}
