//! Data flow graph
//!
//! Built by a single linear scan over the source. A register state maps each
//! register name to the result slot that last wrote it; every read resolves
//! through this map, and a read of a never-written register synthesizes a
//! virtual input node first. Declared outputs become virtual output nodes
//! reading from the final state, which closes the graph.
//!
//! # Algorithm
//!
//! 1. For each source line, keep the candidate parses that typecheck against
//!    the register state, the architecture and the typing hints. Exactly one
//!    must remain.
//! 2. Resolve inputs, record the node as consumer of each producer, then
//!    point the register state at the node's own results.
//! 3. Add virtual outputs.
//! 4. Run rewriting passes; any change rebuilds the graph from scratch.
//! 5. Reject results that are never read and not declared as outputs.

pub mod error;
pub mod node;
pub mod passes;

#[cfg(test)]
mod tests;

use crate::common::source::SourceLine;
use crate::frontend::instr::SpillEvent;
use crate::frontend::{Architecture, Instruction, Operand, RegType, Role};
use log::{debug, warn};
use passes::{AddressRelaxation, Pass};
use std::collections::{BTreeMap, BTreeSet};

pub use error::DataflowError;
pub use node::{ComputationNode, NodeId, NodeKey, RegisterSource, SourceKind};

/// Upper bound on graph rebuilds triggered by rewriting passes
pub const MAX_REBUILDS: usize = 100;

/// Labelled dependency edge `(producer, consumer, slot)`
pub type Edge = (NodeKey, NodeKey, String);

/// Options controlling graph construction
#[derive(Clone, Debug, Default)]
pub struct DataflowConfig {
    pub outputs: BTreeSet<String>,
    /// Treat every live-in register as a live-out register as well
    pub inputs_are_outputs: bool,
    /// Registers exempt from SSA renaming
    pub locked_registers: BTreeSet<String>,
    pub typing_hints: BTreeMap<String, RegType>,
    pub allow_useless_instructions: bool,
    /// Interpret `@is_spill` / `@is_restore` lines as register redirections
    pub absorb_spills: bool,
    /// Model post-increment base registers as pure inputs
    pub address_offset_fixup: bool,
    pub register_aliases: BTreeMap<String, String>,
}

/// All candidate parses of one source line
#[derive(Clone, Debug)]
pub struct SourceEntry {
    pub line: SourceLine,
    pub candidates: Vec<Instruction>,
}

impl SourceEntry {
    pub fn new(line: SourceLine, candidates: Vec<Instruction>) -> Self {
        SourceEntry { line, candidates }
    }

    /// Entry for an already disambiguated instruction
    pub fn single(inst: Instruction) -> Self {
        SourceEntry {
            line: inst.source.clone(),
            candidates: vec![inst],
        }
    }
}

#[derive(Clone, Debug)]
pub struct DataFlowGraph {
    pub config: DataflowConfig,
    src: Vec<SourceEntry>,
    nodes: Vec<ComputationNode>,
    real: Vec<NodeId>,
    inputs: Vec<NodeId>,
    outputs: Vec<NodeId>,
    reg_state: im::HashMap<String, RegisterSource>,
    spilled: BTreeMap<String, RegisterSource>,
    reg_types: BTreeMap<String, RegType>,
}

impl DataFlowGraph {
    /// Parse and build a graph from source lines
    pub fn from_source(
        arch: &dyn Architecture,
        lines: &[SourceLine],
        config: DataflowConfig,
    ) -> Result<Self, DataflowError> {
        let mut aliases = arch.default_aliases();
        aliases.extend(config.register_aliases.clone());
        let entries = lines
            .iter()
            .map(|line| {
                let candidates = arch.parse_line(line, &aliases)?;
                Ok(SourceEntry::new(line.clone(), candidates))
            })
            .collect::<Result<Vec<_>, DataflowError>>()?;
        Self::new(arch, entries, config)
    }

    /// Build a graph from already parsed instructions
    pub fn from_instructions(
        arch: &dyn Architecture,
        insts: &[Instruction],
        config: DataflowConfig,
    ) -> Result<Self, DataflowError> {
        let entries = insts.iter().cloned().map(SourceEntry::single).collect();
        Self::new(arch, entries, config)
    }

    pub fn new(
        arch: &dyn Architecture,
        src: Vec<SourceEntry>,
        config: DataflowConfig,
    ) -> Result<Self, DataflowError> {
        let mut dfg = DataFlowGraph {
            config,
            src,
            nodes: Vec::new(),
            real: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            reg_state: im::HashMap::new(),
            spilled: BTreeMap::new(),
            reg_types: BTreeMap::new(),
        };
        dfg.build_graph(arch)?;

        let mut all_passes: Vec<Box<dyn Pass>> = Vec::new();
        if dfg.config.address_offset_fixup {
            all_passes.push(Box::new(AddressRelaxation));
        }
        all_passes.extend(arch.passes());
        dfg.apply_passes(arch, &all_passes)?;

        dfg.check_useless()?;
        Ok(dfg)
    }

    fn build_graph(&mut self, arch: &dyn Architecture) -> Result<(), DataflowError> {
        self.nodes.clear();
        self.real.clear();
        self.inputs.clear();
        self.outputs.clear();
        self.reg_state = im::HashMap::new();
        self.spilled.clear();
        self.reg_types.clear();

        for idx in 0..self.src.len() {
            let entry = self.src[idx].clone();
            self.add_from_candidates(arch, entry.candidates, &entry.line, Some(idx))?;
        }

        let mut outputs = self.config.outputs.clone();
        if self.config.inputs_are_outputs {
            outputs.extend(self.input_registers().into_keys());
        }
        for out in outputs {
            let candidates = arch
                .register_types()
                .iter()
                .map(|&ty| Instruction::virtual_output(&out, ty))
                .collect();
            let line = SourceLine::new(&format!("<output:{}>", out));
            self.add_from_candidates(arch, candidates, &line, None)?;
        }

        debug!(
            "built data flow graph: {} instructions, {} inputs, {} outputs",
            self.real.len(),
            self.inputs.len(),
            self.outputs.len()
        );
        Ok(())
    }

    fn add_from_candidates(
        &mut self,
        arch: &dyn Architecture,
        candidates: Vec<Instruction>,
        line: &SourceLine,
        src_idx: Option<usize>,
    ) -> Result<(), DataflowError> {
        let rendered: Vec<String> = candidates.iter().map(|c| format!("{:?}", c.class)).collect();
        let mut valid: Vec<Instruction> = candidates
            .into_iter()
            .filter(|c| self.typecheck(arch, c))
            .collect();

        match valid.len() {
            0 => Err(DataflowError::NoValidParse {
                line_no: line.line_no,
                text: line.text.clone(),
                candidates: rendered,
            }),
            1 => {
                let mut inst = valid.remove(0);
                if !inst.is_virtual() {
                    inst.source = line.clone();
                }
                self.add_node(inst, src_idx)
            }
            count => Err(DataflowError::AmbiguousParse {
                line_no: line.line_no,
                text: line.text.clone(),
                count,
            }),
        }
    }

    /// Check a candidate parse against everything known about its registers
    fn typecheck(&self, arch: &dyn Architecture, inst: &Instruction) -> bool {
        let fits = |op: &Operand, use_state: bool| {
            let mut expectations = Vec::new();
            if use_state {
                if let Some(src) = self.reg_state.get(&op.name) {
                    expectations.extend(self.source_type(*src));
                }
            }
            expectations.extend(arch.find_type(&op.name));
            expectations.extend(self.config.typing_hints.get(&op.name).copied());
            expectations.iter().all(|&ty| ty == op.ty)
        };
        inst.ins.iter().chain(&inst.in_outs).all(|op| fits(op, true))
            && inst.outs.iter().all(|op| fits(op, false))
    }

    fn remember_type(&mut self, reg: &str, ty: RegType) {
        match self.reg_types.get(reg) {
            None => {
                self.reg_types.insert(reg.to_string(), ty);
            }
            Some(&known) if known != ty => warn!(
                "register `{}` is used both as {} and as {}, this may confuse the optimizer",
                reg, known, ty
            ),
            Some(_) => {}
        }
    }

    fn find_source(
        &mut self,
        name: &str,
        ty: RegType,
    ) -> Result<RegisterSource, DataflowError> {
        if !self.reg_state.contains_key(name) {
            debug!("`{}` is a global input", name);
            self.add_node(Instruction::virtual_input(name, ty), None)?;
        }
        let src = self.reg_state.get(name).copied();
        match src.and_then(|s| self.source_type(s).map(|t| (s, t))) {
            Some((src, found)) if found == ty => Ok(src),
            found => Err(DataflowError::TypeMismatch {
                register: name.to_string(),
                expected: ty.to_string(),
                found: found.map_or_else(|| "untyped".to_string(), |(_, t)| t.to_string()),
            }),
        }
    }

    fn absorb_spill(&mut self, event: SpillEvent, ty: RegType) -> Result<(), DataflowError> {
        match event {
            SpillEvent::Spill { reg, loc } => {
                debug!("spill of `{}` to {}", reg, loc);
                let src = self.find_source(&reg, ty)?;
                if self.spilled.contains_key(&loc) {
                    return Err(DataflowError::SpillLocationInUse { location: loc });
                }
                self.spilled.insert(loc, src);
            }
            SpillEvent::Restore { reg, loc } => {
                debug!("restore of `{}` from {}", reg, loc);
                let src = self
                    .spilled
                    .remove(&loc)
                    .ok_or(DataflowError::UnknownSpillLocation { location: loc })?;
                self.remember_type(&reg, ty);
                self.reg_state.insert(reg, src);
            }
        }
        Ok(())
    }

    fn add_node(&mut self, inst: Instruction, src_idx: Option<usize>) -> Result<(), DataflowError> {
        if !inst.is_virtual() && self.config.absorb_spills {
            if let Some(event) = inst.spill_event() {
                let ty = match &event {
                    SpillEvent::Spill { .. } => inst.ins.first().map(|o| o.ty),
                    SpillEvent::Restore { .. } => inst.outs.first().map(|o| o.ty),
                };
                if let Some(ty) = ty {
                    return self.absorb_spill(event, ty);
                }
            }
        }

        let src_in = inst
            .ins
            .iter()
            .map(|op| self.find_source(&op.name, op.ty))
            .collect::<Result<Vec<_>, _>>()?;
        let src_in_out = inst
            .in_outs
            .iter()
            .map(|op| self.find_source(&op.name, op.ty))
            .collect::<Result<Vec<_>, _>>()?;

        let id = NodeId(self.nodes.len());
        let (key, orig_pos) = match (inst.orig_reg(), inst.is_virtual()) {
            (Some(op), true) if inst.num_out() > 0 => (NodeKey::Input(op.name.clone()), None),
            (Some(op), true) => (NodeKey::Output(op.name.clone()), None),
            _ => (NodeKey::Real(self.real.len()), Some(self.real.len())),
        };
        debug!("adding node {}: {}", key, inst);

        let mut depth = 0;
        for src in src_in.iter().chain(&src_in_out) {
            let producer = &mut self.nodes[src.node.0];
            depth = depth.max(producer.depth + 1);
            let lists = match src.kind {
                SourceKind::Out => &mut producer.dst_out,
                SourceKind::InOut => &mut producer.dst_in_out,
            };
            // one entry per reading operand, even if the same value is read twice
            if let Some(list) = lists.get_mut(src.idx) {
                list.push(id);
            }
        }

        let node = ComputationNode {
            id,
            key,
            orig_pos,
            src_idx,
            depth,
            src_in,
            src_in_out,
            dst_out: vec![Vec::new(); inst.num_out()],
            dst_in_out: vec![Vec::new(); inst.num_in_out()],
            is_locked: false,
            reg_state: self.reg_state.clone(),
            inst,
        };

        let writes: Vec<(String, RegType, RegisterSource)> = node
            .inst
            .outs
            .iter()
            .enumerate()
            .map(|(i, op)| (op.name.clone(), op.ty, RegisterSource::output(id, i)))
            .chain(
                node.inst
                    .in_outs
                    .iter()
                    .enumerate()
                    .map(|(i, op)| (op.name.clone(), op.ty, RegisterSource::in_out(id, i))),
            )
            .collect();

        match node.key {
            NodeKey::Real(_) => self.real.push(id),
            NodeKey::Input(_) => self.inputs.push(id),
            NodeKey::Output(_) => self.outputs.push(id),
        }
        self.nodes.push(node);

        for (reg, ty, src) in writes {
            self.remember_type(&reg, ty);
            self.reg_state.insert(reg, src);
        }
        Ok(())
    }

    fn apply_passes(
        &mut self,
        arch: &dyn Architecture,
        passes: &[Box<dyn Pass>],
    ) -> Result<(), DataflowError> {
        let mut rebuilds = 0;
        for pass in passes {
            loop {
                let mut changed = false;
                for id in self.real.clone() {
                    let Some(new_inst) = pass.apply(self, id) else {
                        continue;
                    };
                    let node = &self.nodes[id.0];
                    debug!("{}: rewrote {} to `{}`", pass.name(), node, new_inst);
                    if let Some(entry) = node.src_idx.and_then(|i| self.src.get_mut(i)) {
                        entry.candidates = vec![new_inst];
                        changed = true;
                    }
                    if pass.one_at_a_time() {
                        break;
                    }
                }
                if !changed {
                    break;
                }
                rebuilds += 1;
                if rebuilds >= MAX_REBUILDS {
                    return Err(DataflowError::RebuildLimit(MAX_REBUILDS));
                }
                self.build_graph(arch)?;
            }
        }
        Ok(())
    }

    /// Reject instructions whose results are neither read nor declared outputs
    ///
    /// Every offending instruction is logged; the error describes the first
    /// one and lists the lines of the others.
    fn check_useless(&self) -> Result<(), DataflowError> {
        let useless: Vec<&ComputationNode> = self
            .real_nodes()
            .filter(|t| {
                t.inst.num_out() + t.inst.num_in_out() > 0
                    && !t.has_consumers()
                    && !t.inst.source.has_flag("ignore_useless_output")
            })
            .collect();
        let Some((&t, rest)) = useless.split_first() else {
            return Ok(());
        };

        let result_registers = |t: &ComputationNode| -> Vec<String> {
            t.inst
                .outs
                .iter()
                .chain(&t.inst.in_outs)
                .map(|o| o.name.clone())
                .collect()
        };
        for &u in &useless {
            warn!(
                "the result registers {:?} of {} are neither used nor declared as outputs",
                result_registers(u),
                u
            );
        }
        if self.config.allow_useless_instructions {
            return Ok(());
        }
        let depends_on = t
            .inst
            .ins
            .iter()
            .chain(&t.inst.in_outs)
            .flat_map(|op| self.input_dependencies(t.id, &op.name))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Err(DataflowError::UselessInstruction {
            line_no: t.inst.source.line_no,
            text: t.inst.source.text.clone(),
            registers: result_registers(t),
            depends_on,
            other_lines: rest.iter().map(|u| u.inst.source.line_no).collect(),
        })
    }

    pub fn nodes(&self) -> &[ComputationNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> &ComputationNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut ComputationNode {
        &mut self.nodes[id.0]
    }

    /// Real instructions in program order
    pub fn real_nodes(&self) -> impl Iterator<Item = &ComputationNode> + '_ {
        self.real.iter().map(|id| &self.nodes[id.0])
    }

    pub fn real_ids(&self) -> &[NodeId] {
        &self.real
    }

    pub fn input_ids(&self) -> &[NodeId] {
        &self.inputs
    }

    pub fn output_ids(&self) -> &[NodeId] {
        &self.outputs
    }

    pub fn len(&self) -> usize {
        self.real.len()
    }

    pub fn is_empty(&self) -> bool {
        self.real.is_empty()
    }

    /// First half of the real nodes, when the source is a doubled loop body
    pub fn nodes_low(&self) -> &[NodeId] {
        &self.real[..self.real.len() / 2]
    }

    /// Second half of the real nodes
    pub fn nodes_high(&self) -> &[NodeId] {
        &self.real[self.real.len() / 2..]
    }

    /// Global input registers with their types
    pub fn input_registers(&self) -> BTreeMap<String, RegType> {
        self.inputs
            .iter()
            .filter_map(|id| self.nodes[id.0].inst.orig_reg())
            .map(|op| (op.name.clone(), op.ty))
            .collect()
    }

    /// Global output registers with their types
    pub fn output_registers(&self) -> BTreeMap<String, RegType> {
        self.outputs
            .iter()
            .filter_map(|id| self.nodes[id.0].inst.orig_reg())
            .map(|op| (op.name.clone(), op.ty))
            .collect()
    }

    /// Follow in-out sources back to the pure output they modify
    pub fn reduce(&self, mut src: RegisterSource) -> RegisterSource {
        while src.kind == SourceKind::InOut {
            match self.nodes[src.node.0].src_in_out.get(src.idx) {
                Some(next) => src = *next,
                None => break,
            }
        }
        src
    }

    pub fn source_name(&self, src: RegisterSource) -> Option<&str> {
        self.nodes.get(src.node.0)?.result_name(src.kind, src.idx)
    }

    pub fn source_type(&self, src: RegisterSource) -> Option<RegType> {
        self.nodes.get(src.node.0)?.result_type(src.kind, src.idx)
    }

    /// All `(consumer, producer, role, operand index)` dependencies
    pub fn dependencies(&self) -> impl Iterator<Item = (NodeId, RegisterSource, Role, usize)> + '_ {
        self.nodes.iter().flat_map(|t| {
            t.src_in
                .iter()
                .enumerate()
                .map(move |(i, s)| (t.id, *s, Role::In, i))
                .chain(
                    t.src_in_out
                        .iter()
                        .enumerate()
                        .map(move |(i, s)| (t.id, *s, Role::InOut, i)),
                )
        })
    }

    /// The set of labelled edges
    pub fn edges(&self) -> BTreeSet<Edge> {
        let mut edges = BTreeSet::new();
        for t in &self.nodes {
            for (kind, idx) in t.results() {
                for d in t.consumers(kind, idx) {
                    edges.insert((t.key.clone(), self.nodes[d.0].key.clone(), kind.label(idx)));
                }
            }
        }
        edges
    }

    /// Length of the longest dependency chain
    pub fn depth(&self) -> usize {
        self.real_nodes().map(|t| t.depth).max().unwrap_or(0)
    }

    /// Mark the first `prefix` and last `suffix` real instructions as immovable
    pub fn lock_prefix_suffix(&mut self, prefix: usize, suffix: usize) {
        let n = self.real.len();
        for (pos, id) in self.real.clone().into_iter().enumerate() {
            if pos < prefix || pos + suffix >= n {
                self.nodes[id.0].is_locked = true;
            }
        }
    }

    /// Global inputs a register value read by `consumer` was computed from
    ///
    /// The stack pointer is not followed.
    pub fn input_dependencies(&self, consumer: NodeId, reg: &str) -> BTreeSet<String> {
        if reg == "sp" {
            return BTreeSet::new();
        }
        let Some(src) = self.nodes[consumer.0].reg_state.get(reg) else {
            return BTreeSet::new();
        };
        let producer = &self.nodes[src.node.0];
        if producer.is_virtual_input() {
            return producer.inst.outs.iter().map(|o| o.name.clone()).collect();
        }
        producer
            .inst
            .ins
            .iter()
            .chain(&producer.inst.in_outs)
            .flat_map(|op| self.input_dependencies(producer.id, &op.name))
            .collect()
    }

    /// Give every non-output result a fresh `ssa_N` name
    ///
    /// Locked registers and producers of global outputs keep their names, as
    /// do results rejected by `keep`.
    pub fn ssa(&mut self, keep: impl Fn(&ComputationNode, usize) -> bool) {
        let no_ssa: BTreeSet<(NodeId, usize)> = self
            .outputs
            .iter()
            .filter_map(|id| self.nodes[id.0].src_in.first())
            .map(|src| self.reduce(*src))
            .filter(|src| !self.nodes[src.node.0].is_virtual_input())
            .map(|src| (src.node, src.idx))
            .collect();

        let mut counter = 0;
        for id in self.real.clone() {
            for i in 0..self.nodes[id.0].inst.num_out() {
                let node = &self.nodes[id.0];
                let name = &node.inst.outs[i].name;
                if self.config.locked_registers.contains(name)
                    || no_ssa.contains(&(id, i))
                    || keep(node, i)
                {
                    continue;
                }
                let fresh = format!("ssa_{}", counter);
                counter += 1;
                self.nodes[id.0].inst.outs[i].name = fresh;
            }
        }
        self.update_inputs();
    }

    /// Propagate result names to all reading operands
    pub fn update_inputs(&mut self) {
        for id in 0..self.nodes.len() {
            let ins: Vec<Option<String>> = self.nodes[id]
                .src_in
                .iter()
                .map(|s| self.source_name(self.reduce(*s)).map(str::to_string))
                .collect();
            let in_outs: Vec<Option<String>> = self.nodes[id]
                .src_in_out
                .iter()
                .map(|s| self.source_name(self.reduce(*s)).map(str::to_string))
                .collect();
            let inst = &mut self.nodes[id].inst;
            for (op, name) in inst.ins.iter_mut().zip(ins) {
                if let Some(name) = name {
                    op.name = name;
                }
            }
            for (op, name) in inst.in_outs.iter_mut().zip(in_outs) {
                if let Some(name) = name {
                    op.name = name;
                }
            }
        }
    }

    /// Real instructions in program order
    pub fn instructions(&self) -> Vec<Instruction> {
        self.real_nodes().map(|t| t.inst.clone()).collect()
    }
}
