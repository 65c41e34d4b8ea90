use crate::dataflow::passes::Pass;
use crate::dataflow::{DataFlowGraph, NodeId, RegisterSource};
use crate::frontend::{InstrClass, Instruction, Role};

/// Turn `ins v.d[0]` into a pure write when `ins v.d[1]` completes the register
///
/// Inserting both 64-bit lanes overwrites the whole vector, so the first
/// insert does not depend on the register's previous contents.
pub struct LaneFusion;

impl Pass for LaneFusion {
    fn name(&self) -> &'static str {
        "lane-fusion"
    }

    fn one_at_a_time(&self) -> bool {
        true
    }

    fn apply(&self, dfg: &DataFlowGraph, node: NodeId) -> Option<Instruction> {
        let t = dfg.node(node);
        if t.inst.class != InstrClass::VecInsert || t.inst.lane != Some(0) {
            return None;
        }
        let [consumer] = t.dst_in_out.first()?.as_slice() else {
            return None;
        };
        let u = dfg.node(*consumer);
        let completes = u.inst.class == InstrClass::VecInsert
            && u.inst.lane == Some(1)
            && u.src_in_out.first() == Some(&RegisterSource::in_out(node, 0));
        if !completes {
            return None;
        }

        let mut fused = t.inst.clone();
        fused.move_operand((Role::InOut, 0), Role::Out)?;
        Some(fused)
    }
}
