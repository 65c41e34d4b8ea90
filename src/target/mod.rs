//! Microarchitecture models
//!
//! A [`Target`] tells the optimizer how many instructions issue per cycle,
//! which execution units an instruction occupies and for how long, and how
//! long its results take to become available.

pub mod dual;

use crate::backend::{IntVar, LinearExpr, Model, Relation, Sense};
use crate::frontend::{Instruction, Role};
use std::fmt;

pub use dual::InOrderDual;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionUnit(pub &'static str);

impl fmt::Display for ExecutionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result latency between a producer and a consumer
#[derive(Clone, Copy, Debug)]
pub enum Latency {
    Fixed(i64),
    /// Generic latency, or an alternative forwarding path expressed over the
    /// producer and consumer issue cycles; exactly one of the two must hold
    WithException(i64, fn(IntVar, IntVar) -> Relation),
}

impl Latency {
    pub fn cycles(&self) -> i64 {
        match self {
            Latency::Fixed(n) | Latency::WithException(n, _) => *n,
        }
    }
}

/// Scheduling variables of one instruction
#[derive(Clone, Copy, Debug)]
pub struct NodeTiming {
    /// Position in program order
    pub pos: IntVar,
    /// Issue cycle, absent in functional-only mode
    pub cycle: Option<IntVar>,
    /// Issue slot within the cycle
    pub slot: Option<IntVar>,
}

/// An instruction together with its scheduling variables
pub struct ScheduledNode<'a> {
    pub inst: &'a Instruction,
    pub timing: NodeTiming,
}

/// Optimization goal contributed by a target
#[derive(Clone, Debug)]
pub struct TargetObjective {
    pub name: &'static str,
    pub sense: Sense,
    pub expr: LinearExpr,
}

pub trait Target {
    fn name(&self) -> &'static str;

    /// Instructions issued per cycle
    fn issue_rate(&self) -> usize;

    fn execution_units(&self) -> &'static [ExecutionUnit];

    /// Units occupied by the instruction: every inner list must be served by
    /// exactly one of its alternatives
    fn units(&self, inst: &Instruction) -> Vec<Vec<ExecutionUnit>>;

    /// Cycles a unit stays busy after issuing the instruction
    fn inverse_throughput(&self, inst: &Instruction) -> i64;

    /// Latency of result `slot` of `producer` as seen by `consumer`
    fn latency(&self, producer: &Instruction, slot: (Role, usize), consumer: &Instruction) -> Latency;

    /// Inject target-specific constraints
    fn add_further_constraints(&self, _nodes: &[ScheduledNode<'_>], _model: &mut Model) {}

    /// Target-specific objective, if the target has one
    fn min_max_objective(
        &self,
        _nodes: &[ScheduledNode<'_>],
        _model: &mut Model,
    ) -> Option<TargetObjective> {
        None
    }
}
