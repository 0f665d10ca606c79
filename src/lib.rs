//! Convenience facade over the rcsim workspace crates.

pub use rcsim_core::definition::{DefinitionBuilder, ModelDefinition, Scope};
pub use rcsim_core::errors::{RcsimError, RcsimResult};
pub use rcsim_core::ivp::{Mechanism, SolverKind, Strategy, Trajectory};
pub use rcsim_core::model::{run_mechanism, Model, RunConfig, RunOutput};
pub use rcsim_core::recorder::{Snapshot, SnapshotRecorder, UsageViolation};
pub use rcsim_core::results::ResultTable;
pub use rcsim_core::variable::{
    ConstantKind, ConstantValue, FloatValue, Section, Time, Variable, VariableKind,
};

pub use rcsim_models::two_compartment;
