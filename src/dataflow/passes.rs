//! Graph rewriting passes
//!
//! A pass inspects one node in the context of the whole graph and may return
//! a replacement instruction. The graph is rebuilt after every sweep that
//! changed something.

use super::{DataFlowGraph, NodeId};
use crate::frontend::{Instruction, Role};

pub trait Pass {
    fn name(&self) -> &'static str;

    /// Rebuild after each single rewrite instead of after a full sweep
    ///
    /// Needed when a rewrite invalidates the facts other rewrites depend on.
    fn one_at_a_time(&self) -> bool {
        false
    }

    fn apply(&self, dfg: &DataFlowGraph, node: NodeId) -> Option<Instruction>;
}

/// Treat the base register of post-increment loads and stores as read-only
///
/// The increment is compensated later by rewriting immediate offsets, so
/// memory accesses through the same pointer may be freely reordered. A load
/// must then not overwrite its own base register.
pub struct AddressRelaxation;

impl Pass for AddressRelaxation {
    fn name(&self) -> &'static str {
        "address-relaxation"
    }

    fn apply(&self, dfg: &DataFlowGraph, node: NodeId) -> Option<Instruction> {
        let inst = &dfg.node(node).inst;
        let mem = inst.mem.as_ref()?;
        mem.increment?;
        if mem.base.0 != Role::InOut {
            return None;
        }

        let mut relaxed = inst.clone();
        let idx = relaxed.move_operand(mem.base, Role::In)?;
        if mem.is_load {
            for out in 0..relaxed.num_out() {
                relaxed.args_in_out_different.push((out, idx));
            }
        }
        Some(relaxed)
    }
}
