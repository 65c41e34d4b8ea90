//! Post-processing of optimized code
//!
//! Two repairs run after the solver: rewriting immediate offsets of memory
//! accesses that were moved across a post-increment of their base register,
//! and renaming registers in the preamble and postamble of software
//! pipelined loops whose values cross iteration boundaries.

use super::selfcheck::SELFCHECK_ITERATIONS;
use super::{OptimizationResult, Placement, VerifyError};
use crate::common::perm::iter_swaps;
use crate::common::source::SourceLine;
use crate::dataflow::{DataFlowGraph, NodeId, RegisterSource, SourceKind};
use crate::frontend::{Architecture, Instruction, Role};
use log::debug;
use std::collections::BTreeMap;

/// Rewrite offsets of loads and stores reordered across a base increment
///
/// When an access moves above a post-increment of its base register it sees
/// the base without the increment, and the increment is added to its
/// offset; moving below works the other way round.
pub fn offset_fixup(result: &mut OptimizationResult, arch: &dyn Architecture) -> Result<(), VerifyError> {
    let perm = result.checked_reordering()?;
    let (_, new) = result.checked_code();
    let dfg = DataFlowGraph::from_source(arch, &new, result.dataflow_config(arch, result.outputs()))?;
    let insts: Vec<&Instruction> = dfg.real_nodes().map(|t| &t.inst).collect();

    let mut fix: BTreeMap<usize, i64> = BTreeMap::new();
    for (_, _, ni, nj) in iter_swaps(&perm) {
        let (Some(t0), Some(t1)) = (insts.get(ni), insts.get(nj)) else {
            continue;
        };
        if !t0.is_load_store() || !t1.is_load_store() || t0.addr() != t1.addr() {
            continue;
        }
        match (t0.increment(), t1.increment()) {
            (Some(_), Some(_)) => {
                return Err(VerifyError::AddressFixup {
                    first: t0.to_string(),
                    second: t1.to_string(),
                })
            }
            (Some(inc), None) => *fix.entry(nj).or_insert(0) += inc,
            (None, Some(inc)) => *fix.entry(ni).or_insert(0) -= inc,
            (None, None) => {}
        }
    }
    fix.retain(|_, delta| *delta != 0);
    if fix.is_empty() {
        return Ok(());
    }

    let absorbs = result.config.absorb_spills;
    let mut lines = new;
    let mut real = 0;
    for line in lines.iter_mut() {
        if absorbs && (line.has_flag("is_spill") || line.has_flag("is_restore")) {
            continue;
        }
        let idx = real;
        real += 1;
        let (Some(&delta), Some(&inst)) = (fix.get(&idx), insts.get(idx)) else {
            continue;
        };
        let mut inst = inst.clone();
        if inst.increment().is_some() || !inst.adjust_offset(delta) {
            return Err(VerifyError::OffsetNotAdjustable {
                inst: inst.to_string(),
                delta,
            });
        }
        debug!("offset fixup: `{}` becomes `{}`", line.text, inst);
        *line = inst.to_source_line();
    }

    if result.pipelined() {
        split_unrolled(result, lines)
    } else {
        result.code = lines;
        Ok(())
    }
}

/// Store fixed up unrolled loop code back as preamble, kernel and postamble
fn split_unrolled(result: &mut OptimizationResult, lines: Vec<SourceLine>) -> Result<(), VerifyError> {
    let pre = result.preamble.len();
    let post = result.postamble.len();
    let size = result.code.len();
    let copies = SELFCHECK_ITERATIONS - result.num_exceptional_iterations();
    if lines.len() != pre + copies * size + post || size == 0 {
        return Err(VerifyError::UnstableKernel);
    }

    let kernel = &lines[pre..pre + copies * size];
    let first = &kernel[..size];
    let stable = kernel
        .chunks(size)
        .all(|copy| copy.iter().zip(first).all(|(a, b)| a.text == b.text));
    if !stable {
        return Err(VerifyError::UnstableKernel);
    }

    result.preamble = lines[..pre].to_vec();
    result.code = first.to_vec();
    result.postamble = lines[lines.len() - post..].to_vec();
    Ok(())
}

/// Repair register names in preamble and postamble
///
/// Early instructions of the first iteration must read the loop inputs
/// instead of values from a previous kernel iteration, and late results of
/// the last iteration must end up in the loop outputs.
pub fn fixup_preamble_postamble(
    result: &mut OptimizationResult,
    arch: &dyn Architecture,
) -> Result<(), VerifyError> {
    let iterations = result.num_exceptional_iterations();
    if !result.pipelined() || iterations == 0 {
        return Ok(());
    }
    let n = result.codesize();
    let kernel = result.get_unrolled_kernel(iterations);
    let perm = result.periodic_reordering_inv();
    let has_pre = result.num_pre() > 0;

    let orig = DataFlowGraph::from_source(
        arch,
        &result.orig_code,
        result.dataflow_config(arch, result.orig_outputs()),
    )?;
    let orig_insts = orig.instructions();
    let orig_name = |pos: usize, idx: usize| -> Option<String> {
        let i = perm.get(&(pos % n))?;
        orig_insts.get(*i)?.arg(Role::Out, idx).map(str::to_string)
    };

    let placement = |pos: usize| {
        perm.get(&(pos % n))
            .map(|&i| result.placement(i))
            .unwrap_or(Placement::Core)
    };
    let in_preamble = |pos: Option<usize>| {
        let Some(pos) = pos else { return false };
        let p = placement(pos);
        match (iterations, pos < n) {
            (2, true) => p == Placement::Pre,
            (2, false) => p != Placement::Post,
            _ if has_pre => p == Placement::Pre,
            _ => p != Placement::Post,
        }
    };
    let in_postamble = |pos: Option<usize>| {
        let Some(pos) = pos else { return false };
        let p = placement(pos);
        match (iterations, pos < n) {
            (2, true) => p != Placement::Pre,
            (2, false) => p == Placement::Post,
            _ if has_pre => p != Placement::Pre,
            _ => p == Placement::Post,
        }
    };

    let kernel_cfg = result.dataflow_config(arch, result.kernel_input_output.clone());

    // Values read by the preamble but produced outside of it come from the
    // loop inputs
    let mut dfg = DataFlowGraph::from_source(arch, &kernel, kernel_cfg.clone())?;
    let mut renames: Vec<(NodeId, Role, usize, String)> = Vec::new();
    for (consumer, src, role, idx) in dfg.dependencies() {
        let producer = dfg.reduce(src);
        let p = dfg.node(producer.node);
        if p.is_virtual() || producer.kind != SourceKind::Out {
            continue;
        }
        if !in_preamble(dfg.node(consumer).orig_pos) || in_preamble(p.orig_pos) {
            continue;
        }
        let Some(name) = p.orig_pos.and_then(|pos| orig_name(pos, producer.idx)) else {
            continue;
        };
        let name = result.input_renamings.get(&name).cloned().unwrap_or(name);
        renames.push((consumer, role, idx, name));
    }
    for (consumer, role, idx, name) in renames {
        debug!("preamble: {} now reads `{}`", dfg.node(consumer), name);
        dfg.node_mut(consumer).inst.set_arg(role, idx, &name);
    }
    let preamble: Vec<SourceLine> = dfg
        .real_nodes()
        .filter(|t| in_preamble(t.orig_pos))
        .map(|t| t.inst.to_source_line())
        .collect();
    let mut preamble_cfg = kernel_cfg.clone();
    preamble_cfg.inputs_are_outputs = false;
    DataFlowGraph::from_source(arch, &preamble, preamble_cfg)?;

    // Values produced by the postamble and read outside of it go to the
    // loop outputs
    let mut dfg = DataFlowGraph::from_source(arch, &kernel, kernel_cfg)?;
    let mut slots: BTreeMap<RegisterSource, String> = BTreeMap::new();
    for (consumer, src, _, _) in dfg.dependencies() {
        let producer = dfg.reduce(src);
        let p = dfg.node(producer.node);
        if producer.kind != SourceKind::Out || !in_postamble(p.orig_pos) {
            continue;
        }
        if in_postamble(dfg.node(consumer).orig_pos) {
            continue;
        }
        let Some(name) = p.orig_pos.and_then(|pos| orig_name(pos, producer.idx)) else {
            continue;
        };
        let name = result.output_renamings.get(&name).cloned().unwrap_or(name);
        slots.insert(producer, name);
    }
    let reads: Vec<(NodeId, Role, usize, String)> = dfg
        .dependencies()
        .filter_map(|(consumer, src, role, idx)| {
            slots
                .get(&dfg.reduce(src))
                .map(|name| (consumer, role, idx, name.clone()))
        })
        .collect();
    for (slot, name) in &slots {
        debug!("postamble: {} now writes `{}`", dfg.node(slot.node), name);
        dfg.node_mut(slot.node).inst.set_arg(Role::Out, slot.idx, name);
    }
    for (consumer, role, idx, name) in reads {
        dfg.node_mut(consumer).inst.set_arg(role, idx, &name);
    }
    let postamble: Vec<SourceLine> = dfg
        .real_nodes()
        .filter(|t| in_postamble(t.orig_pos))
        .map(|t| t.inst.to_source_line())
        .collect();
    DataFlowGraph::from_source(arch, &postamble, result.dataflow_config(arch, result.outputs()))?;

    result.preamble = preamble;
    result.postamble = postamble;
    Ok(())
}
