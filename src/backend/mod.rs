//! Solver layer
//!
//! The optimizer describes its problem as a [`Model`]; a [`Backend`] turns it
//! into a concrete solver query and reads back a [`Solution`].

pub mod model;
pub mod z3;

use std::time::Duration;
use thiserror::Error;

pub use model::{
    BoolVar, Cmp, Constraint, ConstraintKind, IntVar, IntervalVar, LinearExpr, Lit, Model,
    ModelStats, Relation, Sense, Solution, SolveStatus, Term,
};
pub use self::z3::Z3Backend;

#[derive(Clone, Debug, Default)]
pub struct SolveParams {
    /// Wall-clock limit; the best solution found so far is returned on expiry
    pub timeout: Option<Duration>,
    pub random_seed: Option<u32>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("solver returned a model violating {count} constraints, first: {first}")]
    InvalidModel { count: usize, first: String },

    #[error("solver error: {0}")]
    Solver(String),
}

pub trait Backend {
    fn name(&self) -> &'static str;

    /// Solve the model, honouring its objective if it has one
    fn solve(&mut self, model: &Model, params: &SolveParams) -> Result<Solution, BackendError>;
}
