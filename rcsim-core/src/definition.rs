//! Declarative model definitions.
//!
//! Rust cannot inspect the body of user code the way ACSL's sorted-section
//! machinery does, so a model declares its structure up front: constants in
//! the `Initial` section, algebraic intermediates and integration markers in
//! the `Dynamic` section. Classification and dependency sorting then run
//! once per definition, not once per evaluation.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::errors::{RcsimError, RcsimResult};
use crate::variable::{ConstantValue, FloatValue, Section, Variable, VariableKind};

/// Name reserved for the current model time inside every evaluation scope.
pub const TIME_NAME: &str = "t";

/// Resolved variable values visible to an equation while it is evaluated.
#[derive(Debug, Default)]
pub struct Scope {
    values: HashMap<String, FloatValue>,
}

impl Scope {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            values: HashMap::with_capacity(capacity),
        }
    }

    pub(crate) fn insert(&mut self, name: &str, value: FloatValue) {
        self.values.insert(name.to_string(), value);
    }

    /// Value of a previously computed quantity.
    ///
    /// Panics if `name` is not in scope; reads are validated against the
    /// declared names when the definition is built.
    pub fn get(&self, name: &str) -> FloatValue {
        match self.values.get(name) {
            Some(value) => *value,
            None => panic!("variable {name} is not in scope"),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }
}

/// Right-hand side of an intermediate assignment.
pub type Expr = Box<dyn Fn(&Scope) -> FloatValue + Send + Sync>;

/// One assignment of the sorted section.
pub(crate) struct Equation {
    pub name: String,
    pub reads: Vec<String>,
    pub expr: Expr,
}

impl fmt::Debug for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Equation")
            .field("name", &self.name)
            .field("reads", &self.reads)
            .finish()
    }
}

/// A state variable created by the integration marker.
#[derive(Debug, Clone)]
pub(crate) struct StateDeclaration {
    pub name: String,
    /// Name of the quantity supplying the derivative.
    pub rate: String,
    pub initial_condition: FloatValue,
}

/// A validated model definition: sections checked, every read resolved.
///
/// Produced by [`DefinitionBuilder`]; compiled into a runnable model by
/// [`crate::model::Model::from_definition`].
#[derive(Debug)]
pub struct ModelDefinition {
    pub(crate) name: String,
    pub(crate) constants: Vec<(String, ConstantValue)>,
    pub(crate) equations: Vec<Equation>,
    pub(crate) states: Vec<StateDeclaration>,
}

impl ModelDefinition {
    pub fn builder(name: &str) -> DefinitionBuilder {
        DefinitionBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Classify every declared name into constants, state variables, and
    /// intermediates, each tagged with its declaring section.
    pub fn classify(&self) -> Vec<Variable> {
        let mut variables = Vec::with_capacity(
            self.constants.len() + self.states.len() + self.equations.len(),
        );
        for (name, value) in &self.constants {
            variables.push(Variable {
                name: name.clone(),
                kind: VariableKind::Constant,
                declaring_section: Section::Initial,
                constant_type: Some(value.kind()),
            });
        }
        for state in &self.states {
            variables.push(Variable {
                name: state.name.clone(),
                kind: VariableKind::State,
                declaring_section: Section::Dynamic,
                constant_type: None,
            });
        }
        for equation in &self.equations {
            variables.push(Variable {
                name: equation.name.clone(),
                kind: VariableKind::Intermediate,
                declaring_section: Section::Dynamic,
                constant_type: None,
            });
        }
        variables
    }

    pub fn state_names(&self) -> Vec<String> {
        self.states.iter().map(|s| s.name.clone()).collect()
    }

    /// All names an evaluation scope will contain.
    pub(crate) fn declared_names(&self) -> HashSet<String> {
        let mut names = HashSet::new();
        names.insert(TIME_NAME.to_string());
        names.extend(self.constants.iter().map(|(name, _)| name.clone()));
        names.extend(self.states.iter().map(|s| s.name.clone()));
        names.extend(self.equations.iter().map(|e| e.name.clone()));
        names
    }
}

/// Builder for [`ModelDefinition`], enforcing section discipline.
///
/// The builder starts in the `Initial` section; switch with
/// [`section`](DefinitionBuilder::section). Violations are collected and
/// reported together by [`build`](DefinitionBuilder::build) so declaration
/// chains stay uncluttered.
pub struct DefinitionBuilder {
    name: String,
    section: Section,
    initial_closed: bool,
    constants: Vec<(String, ConstantValue)>,
    equations: Vec<Equation>,
    states: Vec<StateDeclaration>,
    defects: Vec<String>,
}

impl DefinitionBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            section: Section::Initial,
            initial_closed: false,
            constants: Vec::new(),
            equations: Vec::new(),
            states: Vec::new(),
            defects: Vec::new(),
        }
    }

    /// Switch to the given section. `Initial` cannot be reopened once left.
    pub fn section(mut self, section: Section) -> Self {
        match section {
            Section::Initial if self.initial_closed => {
                self.defects
                    .push("the Initial section cannot be reopened".to_string());
            }
            Section::Initial => {}
            Section::Dynamic => {
                self.initial_closed = true;
                self.section = Section::Dynamic;
            }
        }
        self
    }

    /// Bind a constant. Legal only in the `Initial` section.
    pub fn constant(mut self, name: &str, value: impl Into<ConstantValue>) -> Self {
        if self.section != Section::Initial {
            self.defects
                .push(format!("constant {name} bound outside the Initial section"));
            return self;
        }
        self.constants.push((name.to_string(), value.into()));
        self
    }

    /// Declare an algebraic intermediate of the sorted section.
    ///
    /// `reads` names the free variables of `expr`; the dependency graph is
    /// built from them.
    pub fn intermediate<F>(mut self, name: &str, reads: &[&str], expr: F) -> Self
    where
        F: Fn(&Scope) -> FloatValue + Send + Sync + 'static,
    {
        if self.section != Section::Dynamic {
            self.defects.push(format!(
                "intermediate {name} declared outside the Dynamic section"
            ));
            return self;
        }
        self.equations.push(Equation {
            name: name.to_string(),
            reads: reads.iter().map(|s| s.to_string()).collect(),
            expr: Box::new(expr),
        });
        self
    }

    /// The integration marker: declare a state variable whose derivative is
    /// the named sorted-section quantity. Legal only inside the sorted
    /// section.
    pub fn integ(mut self, state: &str, rate: &str, initial_condition: FloatValue) -> Self {
        if self.section != Section::Dynamic {
            self.defects.push(format!(
                "integration marker for {state} used outside the sorted section"
            ));
            return self;
        }
        self.states.push(StateDeclaration {
            name: state.to_string(),
            rate: rate.to_string(),
            initial_condition,
        });
        self
    }

    /// Validate the collected declarations.
    pub fn build(self) -> RcsimResult<ModelDefinition> {
        let mut defects = self.defects;

        let mut seen: HashSet<&str> = HashSet::from([TIME_NAME]);
        let declared_names = self
            .constants
            .iter()
            .map(|(name, _)| name.as_str())
            .chain(self.states.iter().map(|s| s.name.as_str()))
            .chain(self.equations.iter().map(|e| e.name.as_str()));
        for name in declared_names {
            if !seen.insert(name) {
                defects.push(format!("variable {name} is already defined"));
            }
        }

        for equation in &self.equations {
            for read in &equation.reads {
                if !seen.contains(read.as_str()) {
                    defects.push(format!(
                        "{} reads {read}, which is not declared",
                        equation.name
                    ));
                }
            }
        }
        for state in &self.states {
            if !seen.contains(state.rate.as_str()) {
                defects.push(format!(
                    "state {} integrates {}, which is not declared",
                    state.name, state.rate
                ));
            }
        }

        if self.states.is_empty() {
            defects.push("the model declares no state variables".to_string());
        }

        if let Some(first) = defects.first() {
            let message = if defects.len() == 1 {
                first.clone()
            } else {
                format!("{} (and {} more)", first, defects.len() - 1)
            };
            return Err(RcsimError::Definition(message));
        }

        Ok(ModelDefinition {
            name: self.name,
            constants: self.constants,
            equations: self.equations,
            states: self.states,
        })
    }
}
