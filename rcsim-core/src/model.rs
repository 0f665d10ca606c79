//! Compiled models and run orchestration.
//!
//! A [`Model`] is a compiled [`ModelDefinition`]: variables classified, the
//! intermediate evaluation order fixed for the lifetime of the model. Each
//! [`run`](Model::run) evaluates the sorted section under the configured
//! integration strategy and reconciles the captured snapshots into a
//! [`ResultTable`].

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::constants::ConstantStore;
use crate::definition::{ModelDefinition, Scope, TIME_NAME};
use crate::errors::{RcsimError, RcsimResult};
use crate::ivp::{self, Mechanism, SolverKind, State, Strategy, Trajectory};
use crate::recorder::{reconcile_last, Snapshot, SnapshotRecorder, UsageViolation};
use crate::results::{assemble, ResultTable};
use crate::sort::sort_dependencies;
use crate::variable::{ConstantValue, FloatValue, Time, Variable};

fn default_rtol() -> FloatValue {
    1e-6
}

fn default_atol() -> FloatValue {
    1e-9
}

/// Configuration of a single run.
///
/// Loadable from TOML via [`RunConfig::from_toml_str`]; the tuple and map
/// fields follow the obvious TOML shapes (`time_span = [0.0, 120.0]`,
/// `[constant_overrides]` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub solver: SolverKind,
    pub time_span: (Time, Time),
    pub eval_times: Vec<Time>,
    /// Overrides the initial conditions declared by the integration markers.
    #[serde(default)]
    pub initial_state: Option<Vec<FloatValue>>,
    /// Sub-step interval for the RK4 strategy.
    #[serde(default)]
    pub sub_step_interval: Option<FloatValue>,
    /// Run-time constant overrides, applied once before the run starts.
    #[serde(default)]
    pub constant_overrides: HashMap<String, ConstantValue>,
    /// Requested outputs, in the order the result columns should appear.
    /// Empty means the state variables in declaration order.
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default = "default_rtol")]
    pub rtol: FloatValue,
    #[serde(default = "default_atol")]
    pub atol: FloatValue,
}

impl RunConfig {
    pub fn adaptive(time_span: (Time, Time), eval_times: Vec<Time>) -> Self {
        Self {
            solver: SolverKind::Adaptive,
            time_span,
            eval_times,
            initial_state: None,
            sub_step_interval: None,
            constant_overrides: HashMap::new(),
            outputs: Vec::new(),
            rtol: default_rtol(),
            atol: default_atol(),
        }
    }

    pub fn rk4(time_span: (Time, Time), eval_times: Vec<Time>, sub_step_interval: FloatValue) -> Self {
        Self {
            solver: SolverKind::Rk4,
            sub_step_interval: Some(sub_step_interval),
            ..Self::adaptive(time_span, eval_times)
        }
    }

    pub fn with_outputs(mut self, outputs: &[&str]) -> Self {
        self.outputs = outputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_override(mut self, name: &str, value: impl Into<ConstantValue>) -> Self {
        self.constant_overrides.insert(name.to_string(), value.into());
        self
    }

    pub fn with_initial_state(mut self, initial_state: Vec<FloatValue>) -> Self {
        self.initial_state = Some(initial_state);
        self
    }

    pub fn from_toml_str(source: &str) -> RcsimResult<Self> {
        toml::from_str(source)
            .map_err(|err| RcsimError::Definition(format!("invalid run configuration: {err}")))
    }

    fn strategy(&self) -> RcsimResult<Strategy> {
        match self.solver {
            SolverKind::Adaptive => Ok(Strategy::Adaptive {
                rtol: self.rtol,
                atol: self.atol,
            }),
            SolverKind::Rk4 => {
                let h = self.sub_step_interval.ok_or_else(|| {
                    RcsimError::Definition(
                        "the RK4 strategy requires sub_step_interval".to_string(),
                    )
                })?;
                Ok(Strategy::FixedStepRk4 { h })
            }
        }
    }
}

/// Output of a completed run.
#[derive(Debug)]
pub struct RunOutput {
    pub table: ResultTable,
    pub trajectory: Trajectory,
    /// Capture misuses observed during the run. Non-empty means the results
    /// stand but should not be trusted.
    pub usage_violations: Vec<UsageViolation>,
}

impl RunOutput {
    pub fn is_reliable(&self) -> bool {
        self.usage_violations.is_empty()
    }

    /// State vector at the final requested time.
    pub fn final_state(&self) -> Option<&State> {
        self.trajectory.final_state()
    }
}

/// A compiled mechanistic model.
///
/// Construction classifies the declared variables and computes the sorted
/// evaluation order once; the graph is static for the lifetime of the
/// model. Constants may be overridden until the first run starts, after
/// which they are frozen.
pub struct Model {
    definition: ModelDefinition,
    variables: Vec<Variable>,
    sorted_order: Vec<usize>,
    constants: ConstantStore,
}

impl Model {
    pub fn from_definition(definition: ModelDefinition) -> RcsimResult<Self> {
        let variables = definition.classify();

        let names: Vec<String> = definition.equations.iter().map(|e| e.name.clone()).collect();
        let reads: Vec<Vec<String>> = definition
            .equations
            .iter()
            .map(|e| e.reads.clone())
            .collect();
        let sorted_order = sort_dependencies(&names, &reads)?;
        debug!(
            "model {}: sorted section order {:?}",
            definition.name(),
            sorted_order.iter().map(|&i| &names[i]).collect::<Vec<_>>()
        );

        let mut constants = ConstantStore::new();
        for (name, value) in &definition.constants {
            constants.bind(name, *value)?;
        }

        Ok(Self {
            definition,
            variables,
            sorted_order,
            constants,
        })
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    /// The classified variables of the model.
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn constants(&self) -> &ConstantStore {
        &self.constants
    }

    /// Apply a run-time constant override. Fails once a run has started.
    pub fn override_constant(
        &mut self,
        name: &str,
        value: impl Into<ConstantValue>,
    ) -> RcsimResult<()> {
        self.constants.override_value(name, value.into())
    }

    /// Build and run the model under the configured strategy.
    pub fn run(&mut self, config: &RunConfig) -> RcsimResult<RunOutput> {
        for (name, value) in &config.constant_overrides {
            self.constants.override_value(name, *value)?;
        }
        self.constants.freeze();

        let initial_state: Vec<FloatValue> = match &config.initial_state {
            Some(values) => {
                if values.len() != self.definition.states.len() {
                    return Err(RcsimError::Definition(format!(
                        "initial state has {} components but the model declares {} state variables",
                        values.len(),
                        self.definition.states.len()
                    )));
                }
                values.clone()
            }
            None => self
                .definition
                .states
                .iter()
                .map(|s| s.initial_condition)
                .collect(),
        };

        let outputs: Vec<String> = if config.outputs.is_empty() {
            self.definition.state_names()
        } else {
            config.outputs.clone()
        };
        let declared = self.definition.declared_names();
        for name in &outputs {
            if !declared.contains(name) {
                return Err(RcsimError::Definition(format!(
                    "requested output {name} is not declared by model {}",
                    self.definition.name()
                )));
            }
        }

        debug!(
            "running model {} with the {:?} strategy over {:?}",
            self.definition.name(),
            config.solver,
            config.time_span
        );

        let evaluator = SortedEvaluator {
            definition: &self.definition,
            order: &self.sorted_order,
            constants: self.constants.as_scope_values(),
            outputs: &outputs,
        };
        run_mechanism(&evaluator, &initial_state, &outputs, config)
    }
}

/// Advance a mechanism and reconcile its captures into a result table.
///
/// This is the pipeline behind [`Model::run`]; hand-written [`Mechanism`]
/// implementations can use it directly. Only the strategy, time, and
/// tolerance fields of `config` are consulted here; constant overrides and
/// the initial-state override are the caller's concern.
pub fn run_mechanism<M: Mechanism>(
    mechanism: &M,
    initial_state: &[FloatValue],
    outputs: &[String],
    config: &RunConfig,
) -> RcsimResult<RunOutput> {
    let strategy = config.strategy()?;
    let mut recorder = SnapshotRecorder::new();
    let trajectory = ivp::advance(
        mechanism,
        initial_state,
        config.time_span,
        &config.eval_times,
        strategy,
        &mut recorder,
    )?;

    let mut usage_violations = recorder.take_violations();

    let accepted: Vec<Snapshot> = if outputs.is_empty() {
        // Nothing was requested; the rows carry times only.
        trajectory
            .times
            .iter()
            .map(|&time| Snapshot {
                time,
                values: HashMap::new(),
            })
            .collect()
    } else {
        let reconciled = reconcile_last(recorder.snapshots(), &trajectory.times);
        let mut accepted = Vec::with_capacity(reconciled.len());
        for (&time, snapshot) in trajectory.times.iter().zip(reconciled) {
            match snapshot {
                Some(snapshot) => accepted.push(snapshot),
                None => {
                    usage_violations.push(UsageViolation::MissingCapture { time });
                    warn!("no capture at accepted time t = {time}; rows are never padded");
                    return Err(RcsimError::Usage(format!(
                        "no snapshot was captured at accepted time t = {time}"
                    )));
                }
            }
        }
        accepted
    };

    if !usage_violations.is_empty() {
        warn!(
            "{} capture violations during the run; results are flagged unreliable",
            usage_violations.len()
        );
    }

    let table = assemble(&accepted, outputs)?;
    Ok(RunOutput {
        table,
        trajectory,
        usage_violations,
    })
}

/// Per-run evaluator over a compiled definition.
///
/// Seeds a fresh scope with constants, time, and the state vector, computes
/// the intermediates in sorted order, captures the requested outputs once,
/// and returns the differentials in state declaration order.
struct SortedEvaluator<'m> {
    definition: &'m ModelDefinition,
    order: &'m [usize],
    constants: HashMap<String, FloatValue>,
    outputs: &'m [String],
}

impl Mechanism for SortedEvaluator<'_> {
    fn evaluate(
        &self,
        t: Time,
        y: &[FloatValue],
        recorder: &mut SnapshotRecorder,
    ) -> Vec<FloatValue> {
        let capacity =
            self.constants.len() + 1 + y.len() + self.definition.equations.len();
        let mut scope = Scope::with_capacity(capacity);
        for (name, value) in &self.constants {
            scope.insert(name, *value);
        }
        scope.insert(TIME_NAME, t);
        for (state, value) in self.definition.states.iter().zip(y) {
            scope.insert(&state.name, *value);
        }
        for &index in self.order {
            let equation = &self.definition.equations[index];
            let value = (equation.expr)(&scope);
            scope.insert(&equation.name, value);
        }

        if !self.outputs.is_empty() {
            let values = self
                .outputs
                .iter()
                .map(|name| (name.clone(), scope.get(name)))
                .collect();
            recorder.record(t, values);
        }

        self.definition
            .states
            .iter()
            .map(|s| scope.get(&s.rate))
            .collect()
    }
}
