//! Reading a solution back into code
//!
//! Positions and loop placements come from the low copy of the body in loop
//! mode. Early instructions are reported one full window before their slot,
//! so that positions "with bubbles" reflect the iteration they execute for.

use super::builder::{alloc_of, BuiltModel};
use super::OptimizeError;
use crate::backend::{BoolVar, Solution};
use crate::common::source::SourceLine;
use crate::config::Config;
use crate::dataflow::{DataFlowGraph, NodeId, RegisterSource};
use crate::frontend::{Architecture, Instruction, RegType, Role};
use crate::verifier::{OptimizationResult, Placement};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// Tags that carry meaning for later passes and survive `keep_tags = false`
const PRESERVED_TAGS: [&str; 3] = ["is_spill", "is_restore", "ignore_useless_output"];

/// Instructions keyed by their slot in `0..=size`
///
/// Fails if two instructions share a slot or one lies outside the window,
/// since either would drop an instruction from the generated code.
fn slot_order(
    positions: impl IntoIterator<Item = (i64, NodeId)>,
    size: i64,
) -> Result<BTreeMap<i64, NodeId>, OptimizeError> {
    let mut order = BTreeMap::new();
    for (pos, id) in positions {
        if !(0..=size).contains(&pos) {
            return Err(OptimizeError::Internal(format!(
                "instruction {} at slot {} outside 0..={}",
                id.0, pos, size
            )));
        }
        if let Some(other) = order.insert(pos, id) {
            return Err(OptimizeError::Internal(format!(
                "instructions {} and {} share slot {}",
                other.0, id.0, pos
            )));
        }
    }
    Ok(order)
}

#[derive(Debug)]
struct Spill {
    reg: String,
    ty: RegType,
    spill_at: i64,
    restore_at: i64,
}

pub(crate) struct Extractor<'a> {
    arch: &'a dyn Architecture,
    config: &'a Config,
    issue_rate: usize,
    dfg: &'a DataFlowGraph,
    built: &'a BuiltModel,
    solution: &'a Solution,
}

impl<'a> Extractor<'a> {
    pub fn new(
        arch: &'a dyn Architecture,
        config: &'a Config,
        issue_rate: usize,
        dfg: &'a DataFlowGraph,
        built: &'a BuiltModel,
        solution: &'a Solution,
    ) -> Self {
        Extractor {
            arch,
            config,
            issue_rate,
            dfg,
            built,
            solution,
        }
    }

    fn chosen(
        &self,
        alloc: &BTreeMap<String, BoolVar>,
        what: impl Fn() -> String,
    ) -> Result<String, OptimizeError> {
        let mut regs = alloc
            .iter()
            .filter(|(_, b)| self.solution.bool_value(**b))
            .map(|(r, _)| r);
        match (regs.next(), regs.next()) {
            (Some(r), None) => Ok(r.clone()),
            _ => Err(OptimizeError::Internal(format!(
                "no unique register chosen for {}",
                what()
            ))),
        }
    }

    fn read_reg(&self, src: RegisterSource) -> Result<String, OptimizeError> {
        let alloc = alloc_of(self.dfg, &self.built.vars, src)?;
        self.chosen(alloc, || format!("the value read from {}", self.dfg.node(src.node)))
    }

    /// The node's instruction with every register replaced by its allocation
    fn renamed(&self, id: NodeId) -> Result<Instruction, OptimizeError> {
        let node = self.dfg.node(id);
        let mut inst = node.inst.clone();
        for (i, alloc) in self.built.vars[id.0].alloc_out.iter().enumerate() {
            let reg = self.chosen(alloc, || format!("output {} of {}", i, node))?;
            inst.set_arg(Role::Out, i, &reg);
        }
        for (i, src) in node.src_in.iter().enumerate() {
            inst.set_arg(Role::In, i, &self.read_reg(*src)?);
        }
        for (i, src) in node.src_in_out.iter().enumerate() {
            inst.set_arg(Role::InOut, i, &self.read_reg(*src)?);
        }
        Ok(inst)
    }

    fn line(&self, inst: &Instruction) -> SourceLine {
        let mut line = inst.to_source_line();
        if !self.config.keep_tags {
            line.tags.retain(|t, _| PRESERVED_TAGS.contains(&t.as_str()));
        }
        line
    }

    fn position(&self, id: NodeId) -> i64 {
        self.solution.eval(&self.built.vars[id.0].pos)
    }

    fn placement(&self, id: NodeId) -> Placement {
        match self.built.vars[id.0].flags {
            Some(f) if self.solution.bool_value(f.pre) => Placement::Pre,
            Some(f) if self.solution.bool_value(f.post) => Placement::Post,
            _ => Placement::Core,
        }
    }

    fn spills(&self) -> Result<Vec<Spill>, OptimizeError> {
        let mut spills = Vec::new();
        for &id in self.dfg.real_ids() {
            let node = self.dfg.node(id);
            let v = &self.built.vars[id.0];
            for (slot, s) in v.spills.iter().enumerate() {
                let Some(s) = s.filter(|s| self.solution.bool_value(s.spilled)) else {
                    continue;
                };
                let (Some(alloc), Some(op)) = (v.alloc_out.get(slot), node.inst.outs.get(slot)) else {
                    continue;
                };
                let spill = Spill {
                    reg: self.chosen(alloc, || format!("output {} of {}", slot, node))?,
                    ty: op.ty,
                    spill_at: self.solution.value(s.spill_at),
                    restore_at: self.solution.value(s.restore_at),
                };
                debug!(
                    "spilling `{}` of {}: stored before slot {}, restored after slot {}",
                    spill.reg, node, spill.spill_at, spill.restore_at
                );
                spills.push(spill);
            }
        }
        Ok(spills)
    }

    fn renamings(&self) -> Result<(BTreeMap<String, String>, BTreeMap<String, String>), OptimizeError> {
        let dfg = self.dfg;
        let mut inputs = BTreeMap::new();
        for &id in dfg.input_ids() {
            let node = dfg.node(id);
            let (Some(op), Some(alloc)) = (node.inst.orig_reg(), self.built.vars[id.0].alloc_out.first())
            else {
                continue;
            };
            inputs.insert(op.name.clone(), self.chosen(alloc, || node.to_string())?);
        }
        let mut outputs = BTreeMap::new();
        for &id in dfg.output_ids() {
            let node = dfg.node(id);
            let (Some(op), Some(src)) = (node.inst.orig_reg(), node.src_in.first()) else {
                continue;
            };
            outputs.insert(op.name.clone(), self.read_reg(*src)?);
        }
        Ok((inputs, outputs))
    }

    /// Straight-line code in slot order, with spills and restores in between
    ///
    /// Spills go right before their slot and restores right after theirs.
    /// Stack slots are handed out lowest first and reused once restored.
    fn straight_line_code(&self, size: i64, spills: &[Spill]) -> Result<Vec<SourceLine>, OptimizeError> {
        let order = slot_order(
            self.dfg.real_ids().iter().map(|&id| (self.position(id), id)),
            size,
        )?;

        let mut code = Vec::new();
        let mut used: BTreeSet<usize> = BTreeSet::new();
        let mut assigned: BTreeMap<usize, usize> = BTreeMap::new();
        for i in 0..=size {
            for (k, s) in spills.iter().enumerate().filter(|(_, s)| s.spill_at == i) {
                let slot = (0..=used.len()).find(|x| !used.contains(x)).unwrap_or(used.len());
                used.insert(slot);
                assigned.insert(k, slot);
                code.push(self.line(&self.arch.spill(&s.reg, s.ty, slot)));
            }
            for (k, s) in spills.iter().enumerate().filter(|(_, s)| s.restore_at == i - 1) {
                let slot = assigned.remove(&k).ok_or_else(|| {
                    OptimizeError::Internal(format!("restore of `{}` without a spill", s.reg))
                })?;
                used.remove(&slot);
                code.push(self.line(&self.arch.restore(&s.reg, s.ty, slot)));
            }
            if let Some(&id) = order.get(&i) {
                code.push(self.line(&self.renamed(id)?));
            }
        }
        Ok(code)
    }

    /// Kernel-ordered code of the instructions whose placement passes `filter`
    fn loop_code(
        &self,
        result: &OptimizationResult,
        filter: impl Fn(Placement) -> bool,
    ) -> Result<Vec<SourceLine>, OptimizeError> {
        let low = self.dfg.nodes_low();
        result
            .get_periodic_reordering_with_bubbles_inv(1)
            .into_values()
            .filter(|&i| filter(result.placement(i)))
            .map(|i| {
                let id = low
                    .get(i)
                    .ok_or_else(|| OptimizeError::Internal(format!("no loop instruction {}", i)))?;
                Ok(self.line(&self.renamed(*id)?))
            })
            .collect()
    }

    pub fn extract(&self, orig_code: Vec<SourceLine>) -> Result<OptimizationResult, OptimizeError> {
        let pipelined = self.config.sw_pipelining.enabled;
        let pad = &self.built.pad;
        let size = if pipelined {
            self.solution.eval(&pad.half)
        } else {
            self.solution.eval(&pad.size)
        };
        let nodes = if pipelined {
            self.dfg.nodes_low()
        } else {
            self.dfg.real_ids()
        };

        let mut reordering_with_bubbles = BTreeMap::new();
        let mut placements = BTreeMap::new();
        for (k, &id) in nodes.iter().enumerate() {
            let pos = self.position(id);
            let placement = self.placement(id);
            let pos = match placement {
                Placement::Pre => pos - 2 * size,
                _ => pos,
            };
            reordering_with_bubbles.insert(k, pos);
            if pipelined {
                placements.insert(k, placement);
            }
        }

        let (input_renamings, output_renamings) = self.renamings()?;
        let spills = self.spills()?;
        let mut result = OptimizationResult {
            config: self.config.clone(),
            issue_rate: self.issue_rate,
            orig_code,
            code: Vec::new(),
            preamble: Vec::new(),
            postamble: Vec::new(),
            codesize_with_bubbles: size,
            reordering_with_bubbles,
            placements,
            input_renamings,
            output_renamings,
            kernel_input_output: Vec::new(),
            stalls: pad.stalls.map(|s| self.solution.value(s)),
            status: self.solution.status,
            objective: self
                .built
                .objective
                .as_ref()
                .map(|o| self.solution.eval(&o.expr)),
            spills: spills.len(),
        };

        if !pipelined {
            result.code = self.straight_line_code(size, &spills)?;
            return Ok(result);
        }

        let (has_pre, has_post) = (result.num_pre() > 0, result.num_post() > 0);
        if has_pre {
            result.preamble.extend(self.loop_code(&result, |p| p == Placement::Pre)?);
            result.postamble.extend(self.loop_code(&result, |p| p != Placement::Pre)?);
        }
        if has_post {
            result.preamble.extend(self.loop_code(&result, |p| p != Placement::Post)?);
            result.postamble.extend(self.loop_code(&result, |p| p == Placement::Post)?);
        }
        result.code = self.loop_code(&result, |_| true)?;

        let mut cfg = result.dataflow_config(self.arch, result.outputs());
        cfg.inputs_are_outputs = true;
        let kernel = DataFlowGraph::from_source(self.arch, &result.code, cfg)?;
        result.kernel_input_output = kernel.input_registers().into_keys().collect();
        debug!("kernel inputs/outputs: {:?}", result.kernel_input_output);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_slot_order() {
        let order = slot_order([(2, NodeId(0)), (0, NodeId(1))], 3);
        assert_eq!(
            order.ok(),
            Some([(0, NodeId(1)), (2, NodeId(0))].into_iter().collect())
        );
    }

    #[test]
    fn test_shared_slot_is_an_error() {
        let order = slot_order([(4, NodeId(0)), (4, NodeId(1))], 5);
        assert!(matches!(order, Err(OptimizeError::Internal(msg)) if msg.contains("share slot 4")));
    }

    #[test]
    fn test_slot_outside_window_is_an_error() {
        assert!(matches!(
            slot_order([(0, NodeId(0)), (6, NodeId(1))], 5),
            Err(OptimizeError::Internal(_))
        ));
        assert!(matches!(
            slot_order([(-1, NodeId(0))], 5),
            Err(OptimizeError::Internal(_))
        ));
    }
}
