//! In-order dual-issue core
//!
//! Two integer ALUs, one multiplier, one load/store pipe and two vector
//! pipes of which only the first multiplies. Multiplies issue from the first
//! slot only. Multiply-accumulate chains forward the accumulator after one
//! cycle.

use super::{ExecutionUnit, Latency, ScheduledNode, Target, TargetObjective};
use crate::backend::{IntVar, LinearExpr, Model, Relation, Sense};
use crate::frontend::{InstrClass, Instruction, Role};

pub const ALU0: ExecutionUnit = ExecutionUnit("alu0");
pub const ALU1: ExecutionUnit = ExecutionUnit("alu1");
pub const MUL: ExecutionUnit = ExecutionUnit("mul");
pub const LSU: ExecutionUnit = ExecutionUnit("lsu");
pub const VEC0: ExecutionUnit = ExecutionUnit("vec0");
pub const VEC1: ExecutionUnit = ExecutionUnit("vec1");

const UNITS: [ExecutionUnit; 6] = [ALU0, ALU1, MUL, LSU, VEC0, VEC1];

#[derive(Clone, Copy, Debug, Default)]
pub struct InOrderDual;

fn accumulator_forwarding(producer_cycle: IntVar, consumer_cycle: IntVar) -> Relation {
    LinearExpr::from(consumer_cycle).ge(producer_cycle + 1)
}

fn is_mul(inst: &Instruction) -> bool {
    matches!(inst.class, InstrClass::IntMul | InstrClass::VecMul)
}

impl Target for InOrderDual {
    fn name(&self) -> &'static str {
        "in-order-dual"
    }

    fn issue_rate(&self) -> usize {
        2
    }

    fn execution_units(&self) -> &'static [ExecutionUnit] {
        &UNITS
    }

    fn units(&self, inst: &Instruction) -> Vec<Vec<ExecutionUnit>> {
        match inst.class {
            InstrClass::IntAlu | InstrClass::Move => vec![vec![ALU0, ALU1]],
            InstrClass::IntMul => vec![vec![MUL]],
            InstrClass::Load | InstrClass::Store | InstrClass::VecLoad | InstrClass::VecStore => {
                vec![vec![LSU]]
            }
            InstrClass::VecAlu | InstrClass::VecInsert => vec![vec![VEC0, VEC1]],
            InstrClass::VecMul => vec![vec![VEC0]],
            InstrClass::VirtualInput | InstrClass::VirtualOutput => Vec::new(),
        }
    }

    fn inverse_throughput(&self, inst: &Instruction) -> i64 {
        match inst.class {
            InstrClass::VecMul => 2,
            _ => 1,
        }
    }

    fn latency(&self, producer: &Instruction, slot: (Role, usize), consumer: &Instruction) -> Latency {
        // base register write-back of post-increment accesses
        if producer.is_load_store() && slot.0 == Role::InOut {
            return Latency::Fixed(1);
        }
        let cycles = match producer.class {
            InstrClass::IntAlu | InstrClass::Move => 1,
            InstrClass::IntMul => 3,
            InstrClass::Load => 3,
            InstrClass::VecLoad => 4,
            InstrClass::VecAlu | InstrClass::VecInsert => 2,
            InstrClass::VecMul => 4,
            InstrClass::Store | InstrClass::VecStore => 1,
            InstrClass::VirtualInput | InstrClass::VirtualOutput => 0,
        };

        let forwards = producer.mnemonic == "mla"
            && consumer.mnemonic == "mla"
            && slot.0 == Role::InOut
            && consumer.arg(Role::InOut, 0) == producer.arg(Role::InOut, slot.1);
        if forwards {
            Latency::WithException(cycles, accumulator_forwarding)
        } else {
            Latency::Fixed(cycles)
        }
    }

    fn add_further_constraints(&self, nodes: &[ScheduledNode<'_>], model: &mut Model) {
        for node in nodes.iter().filter(|n| is_mul(n.inst)) {
            if let Some(slot) = node.timing.slot {
                model.add_linear_constraint(LinearExpr::from(slot).eq(0));
            }
        }
    }

    /// Finish all stores as early as possible
    fn min_max_objective(
        &self,
        nodes: &[ScheduledNode<'_>],
        model: &mut Model,
    ) -> Option<TargetObjective> {
        let cycles: Vec<LinearExpr> = nodes
            .iter()
            .filter(|n| matches!(n.inst.class, InstrClass::Store | InstrClass::VecStore))
            .filter_map(|n| n.timing.cycle.map(LinearExpr::from))
            .collect();
        if cycles.is_empty() {
            return None;
        }
        let latest = model.add_int_var(-1, i64::from(i32::MAX), "latest_store");
        model.add_max_eq(latest, cycles);
        Some(TargetObjective {
            name: "latest store cycle",
            sense: Sense::Minimize,
            expr: latest.into(),
        })
    }
}
