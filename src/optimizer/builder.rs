//! Constraint model construction
//!
//! Every instruction gets a program position, and unless only functionality
//! is preserved, an issue cycle and slot with `pos = cycle * issue_rate +
//! slot`. Every result slot gets one boolean per candidate register and a
//! lifetime `[start, end)` which must cover all its readers. Lifetimes of
//! values allocated to the same register may not overlap, which is what
//! makes renaming sound.
//!
//! In loop mode the source holds two copies of the body. Each instruction is
//! either early (executed for the next iteration), core, or late (executed
//! for the previous iteration), and the two copies are tied together so the
//! result can be rolled back into a single kernel.

use super::renaming::RegisterPools;
use super::OptimizeError;
use crate::backend::{BoolVar, IntVar, IntervalVar, LinearExpr, Lit, Model, Sense};
use crate::config::{Config, Goal};
use crate::dataflow::{DataFlowGraph, NodeId, NodeKey, RegisterSource, SourceKind};
use crate::frontend::{Architecture, RegFilter, Role};
use crate::target::{ExecutionUnit, Latency, NodeTiming, ScheduledNode, Target};
use log::{debug, info};
use std::collections::BTreeMap;

/// Slack added to position bounds of lifetimes and cycles
const HORIZON_SLACK: i64 = 10;

/// Program size, possibly variable
#[derive(Clone, Debug)]
pub(crate) struct Padding {
    /// Number of issue slots in the scheduled window, including bubbles
    pub size: LinearExpr,
    /// Size of one body copy; equals `size` outside loop mode
    pub half: LinearExpr,
    /// Upper bound of `size`
    pub pad_const: i64,
    pub horizon: i64,
    pub cycle_horizon: i64,
    /// Stall cycles per body copy, when the size is a solver variable
    pub stalls: Option<IntVar>,
}

impl Padding {
    fn new(model: &mut Model, config: &Config, issue_rate: usize, num_real: usize) -> Self {
        let ir = issue_rate.max(1) as i64;
        let copies = if config.sw_pipelining.enabled { 2 } else { 1 };
        let pfactor = ir * copies;
        let n = num_real as i64;
        let min_cycles = (n + pfactor - 1) / pfactor;
        let min_slots = pfactor * min_cycles;
        let stalls_allowed = config.constraints.stalls_allowed as i64;
        let pad_max = pfactor * (min_cycles + stalls_allowed);

        let (size, half, stalls) = if config.variable_size {
            let stalls = model.add_int_var(0, stalls_allowed, "stalls");
            let size = model.add_int_var(min_slots, pad_max, "size");
            model.add_linear_constraint(
                LinearExpr::from(size).eq(LinearExpr::from(stalls * pfactor) + min_slots),
            );
            let half = if copies == 2 {
                let half = model.add_int_var(0, pad_max / 2, "size_half");
                model.add_linear_constraint(LinearExpr::from(size).eq(half * 2));
                LinearExpr::from(half)
            } else {
                LinearExpr::from(size)
            };
            (LinearExpr::from(size), half, Some(stalls))
        } else {
            (
                LinearExpr::constant(pad_max),
                LinearExpr::constant(pad_max / copies),
                None,
            )
        };

        debug!(
            "program size: {} instructions, at most {} slots, {} copies",
            n, pad_max, copies
        );
        Padding {
            size,
            half,
            pad_const: pad_max,
            horizon: pad_max + HORIZON_SLACK,
            cycle_horizon: pad_max / ir + HORIZON_SLACK,
            stalls,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct LoopFlags {
    pub pre: BoolVar,
    pub core: BoolVar,
    pub post: BoolVar,
}

/// Where a spilled value is stored and reloaded
#[derive(Clone, Copy, Debug)]
pub(crate) struct SpillVars {
    pub spilled: BoolVar,
    /// The spill is emitted right before this slot
    pub spill_at: IntVar,
    /// The restore is emitted right after this slot
    pub restore_at: IntVar,
}

/// Lifetime `[start, end)` of a result
#[derive(Clone, Debug)]
pub(crate) struct Lifetime {
    pub start: LinearExpr,
    pub end: IntVar,
}

/// All variables of one node
#[derive(Clone, Debug, Default)]
pub(crate) struct NodeVars {
    pub pos: LinearExpr,
    pub pos_var: Option<IntVar>,
    pub cycle: Option<IntVar>,
    pub slot: Option<IntVar>,
    pub flags: Option<LoopFlags>,
    pub out_life: Vec<Lifetime>,
    pub in_out_life: Vec<Lifetime>,
    /// Per output slot, one boolean per candidate register
    pub alloc_out: Vec<BTreeMap<String, BoolVar>>,
    pub spills: Vec<Option<SpillVars>>,
    pub displacement: Option<IntVar>,
}

/// Secondary optimization goal
#[derive(Clone, Debug)]
pub(crate) struct ObjectiveSpec {
    pub name: String,
    pub sense: Sense,
    pub expr: LinearExpr,
}

/// A finished model together with the variables needed to read a solution
pub(crate) struct BuiltModel {
    pub model: Model,
    pub pad: Padding,
    pub vars: Vec<NodeVars>,
    pub objective: Option<ObjectiveSpec>,
}

/// Register allocation booleans of the value read through `src`
pub(crate) fn alloc_of<'v>(
    dfg: &DataFlowGraph,
    vars: &'v [NodeVars],
    src: RegisterSource,
) -> Result<&'v BTreeMap<String, BoolVar>, OptimizeError> {
    let reduced = dfg.reduce(src);
    if reduced.kind != SourceKind::Out {
        return Err(OptimizeError::Internal(format!(
            "in-out source of node {} does not reduce to an output",
            dfg.node(src.node)
        )));
    }
    vars.get(reduced.node.0)
        .and_then(|v| v.alloc_out.get(reduced.idx))
        .ok_or_else(|| OptimizeError::Internal(format!("no allocation for {:?}", reduced)))
}

pub(crate) struct ModelBuilder<'a> {
    arch: &'a dyn Architecture,
    target: &'a dyn Target,
    config: &'a Config,
    pools: &'a RegisterPools<'a>,
    dfg: &'a DataFlowGraph,
    model: Model,
    pad: Padding,
    vars: Vec<NodeVars>,
    usage: BTreeMap<String, Vec<BoolVar>>,
}

impl<'a> ModelBuilder<'a> {
    pub fn new(
        arch: &'a dyn Architecture,
        target: &'a dyn Target,
        config: &'a Config,
        pools: &'a RegisterPools<'a>,
        dfg: &'a DataFlowGraph,
    ) -> Self {
        let mut model = Model::new();
        let pad = Padding::new(&mut model, config, target.issue_rate(), dfg.len());
        ModelBuilder {
            arch,
            target,
            config,
            pools,
            dfg,
            model,
            pad,
            vars: Vec::new(),
            usage: BTreeMap::new(),
        }
    }

    pub fn build(mut self) -> Result<BuiltModel, OptimizeError> {
        self.add_variables()?;
        self.add_position_constraints();
        self.add_dependency_constraints();
        self.add_renaming_constraints()?;
        self.add_register_usage();
        self.add_functional_units();
        self.add_loop_constraints();
        self.add_periodic_constraints()?;
        self.add_locked_ordering();
        self.add_source_annotations()?;
        self.add_displacement();
        self.add_spill_constraints();

        let nodes = self.scheduled_nodes();
        self.target.add_further_constraints(&nodes, &mut self.model);
        let objective = self.objective();

        info!("model: {}", self.model.stats());
        Ok(BuiltModel {
            model: self.model,
            pad: self.pad,
            vars: self.vars,
            objective,
        })
    }

    fn pipelining(&self) -> bool {
        self.config.sw_pipelining.enabled
    }

    fn is_low(&self, id: NodeId) -> bool {
        let half = self.dfg.len() / 2;
        self.pipelining() && self.dfg.node(id).orig_pos.map_or(false, |p| p < half)
    }

    fn is_high(&self, id: NodeId) -> bool {
        let half = self.dfg.len() / 2;
        self.pipelining() && self.dfg.node(id).orig_pos.map_or(false, |p| p >= half)
    }

    fn flags(&self, id: NodeId) -> Option<LoopFlags> {
        self.vars.get(id.0).and_then(|v| v.flags)
    }

    /// Enforcement literals for a constraint between a producer and a consumer
    ///
    /// `None` if the constraint does not apply at all: the early part of the
    /// first copy and the late part of the second copy really belong to
    /// other iterations.
    fn path_guard(&self, consumer: NodeId, producer: NodeId) -> Option<Vec<Lit>> {
        if !self.pipelining() {
            return Some(Vec::new());
        }
        if self.dfg.node(producer).is_virtual_input() && self.is_low(consumer) {
            return None;
        }
        if self.dfg.node(consumer).is_virtual_output() && self.is_high(producer) {
            return None;
        }
        let mut lits = Vec::new();
        if self.is_low(consumer) {
            lits.extend(self.flags(consumer).map(|f| f.pre.not()));
        }
        if self.is_low(producer) {
            lits.extend(self.flags(producer).map(|f| f.pre.not()));
        }
        if self.is_high(producer) {
            lits.extend(self.flags(producer).map(|f| f.post.not()));
        }
        if self.is_high(consumer) {
            lits.extend(self.flags(consumer).map(|f| f.post.not()));
        }
        Some(lits)
    }

    fn add_variables(&mut self) -> Result<(), OptimizeError> {
        let dfg = self.dfg;
        let ir = self.target.issue_rate().max(1) as i64;
        let functional_only = self.config.constraints.functional_only;
        let flexible_start = self.config.constraints.maximize_register_lifetimes;
        let displacement = !self.pipelining()
            && (self.config.constraints.max_displacement < 1.0
                || self.config.constraints.minimize_displacement);

        for node in dfg.nodes() {
            let name = node.key.to_string();
            let mut v = NodeVars::default();
            match node.key {
                NodeKey::Input(_) => v.pos = LinearExpr::constant(-1),
                NodeKey::Output(_) => v.pos = self.pad.size.clone(),
                NodeKey::Real(_) => {
                    let pos = self
                        .model
                        .add_int_var(0, self.pad.pad_const - 1, format!("{}_pos", name));
                    v.pos = pos.into();
                    v.pos_var = Some(pos);
                    if !functional_only {
                        let cycle = self.model.add_int_var(
                            0,
                            self.pad.cycle_horizon,
                            format!("{}_cycle", name),
                        );
                        let slot = self.model.add_int_var(0, ir - 1, format!("{}_slot", name));
                        self.model.add_linear_constraint(
                            LinearExpr::from(pos).eq(LinearExpr::from(cycle * ir) + slot),
                        );
                        v.cycle = Some(cycle);
                        v.slot = Some(slot);
                    }
                    if self.pipelining() {
                        v.flags = Some(LoopFlags {
                            pre: self.model.add_bool_var(format!("{}_pre", name)),
                            core: self.model.add_bool_var(format!("{}_core", name)),
                            post: self.model.add_bool_var(format!("{}_post", name)),
                        });
                    }
                    if displacement {
                        v.displacement = Some(self.model.add_int_var(
                            0,
                            self.pad.horizon,
                            format!("{}_displacement", name),
                        ));
                    }
                }
            }

            let text = node.inst.to_string();
            for (i, op) in node.inst.outs.iter().enumerate() {
                let regs = self.pools.candidates(op, node.is_locked, &text)?;
                let alloc = regs
                    .into_iter()
                    .map(|r| {
                        let b = self.model.add_bool_var(format!("{}_out{}_{}", name, i, r));
                        (r, b)
                    })
                    .collect();
                v.alloc_out.push(alloc);
                let slot_name = format!("{}_out{}", name, i);
                let flexible = flexible_start && !node.is_virtual();
                let life = self.lifetime(&v.pos, flexible, &slot_name);
                v.out_life.push(life);

                let spillable = self.config.constraints.allow_spills
                    && !node.is_virtual()
                    && self.arch.is_renamed(op.ty);
                v.spills.push(spillable.then(|| SpillVars {
                    spilled: self.model.add_bool_var(format!("{}_spilled", slot_name)),
                    spill_at: self
                        .model
                        .add_int_var(0, self.pad.horizon, format!("{}_spill_at", slot_name)),
                    restore_at: self
                        .model
                        .add_int_var(0, self.pad.horizon, format!("{}_restore_at", slot_name)),
                }));
            }
            for i in 0..node.inst.num_in_out() {
                let life = self.lifetime(&v.pos, false, &format!("{}_inout{}", name, i));
                v.in_out_life.push(life);
            }
            self.vars.push(v);
        }
        Ok(())
    }

    fn lifetime(&mut self, pos: &LinearExpr, flexible: bool, name: &str) -> Lifetime {
        let end = self
            .model
            .add_int_var(0, self.pad.horizon, format!("{}_end", name));
        self.model
            .add_linear_constraint(LinearExpr::from(end).le(self.pad.size.clone()));
        self.model
            .add_linear_constraint(LinearExpr::from(end).gt(pos.clone()));
        let start = if flexible {
            let start = self
                .model
                .add_int_var(-1, self.pad.horizon, format!("{}_start", name));
            self.model
                .add_linear_constraint(LinearExpr::from(start).le(pos.clone()));
            LinearExpr::from(start)
        } else {
            pos.clone()
        };
        Lifetime { start, end }
    }

    fn add_position_constraints(&mut self) {
        let dfg = self.dfg;
        let mut positions = Vec::new();
        for id in dfg.real_ids() {
            let pos = self.vars[id.0].pos.clone();
            self.model
                .add_linear_constraint(pos.clone().le(self.pad.size.clone() - 1));
            positions.push(pos);
        }
        if positions.len() > 1 {
            self.model.add_all_different(positions);
        }
    }

    fn add_dependency_constraints(&mut self) {
        let dfg = self.dfg;
        for (consumer, src, _, _) in dfg.dependencies() {
            let producer = src.node;
            let Some(guard) = self.path_guard(consumer, producer) else {
                continue;
            };
            let c_pos = self.vars[consumer.0].pos.clone();
            let pv = &self.vars[producer.0];
            let life = match src.kind {
                SourceKind::Out => pv.out_life.get(src.idx),
                SourceKind::InOut => pv.in_out_life.get(src.idx),
            };
            if let Some(life) = life {
                let end = life.end;
                self.model
                    .add_linear_constraint(LinearExpr::from(end).ge(c_pos.clone()))
                    .only_enforce_if(guard.clone());
            }

            let (p_node, c_node) = (dfg.node(producer), dfg.node(consumer));
            if p_node.is_virtual() || c_node.is_virtual() {
                continue;
            }
            let latency = self.config.models_latencies().then(|| {
                self.target
                    .latency(&p_node.inst, (src.kind.role(), src.idx), &c_node.inst)
            });
            if latency.map_or(true, |l| l.cycles() < 1) {
                let p_pos = self.vars[producer.0].pos.clone();
                self.model
                    .add_linear_constraint(c_pos.gt(p_pos))
                    .only_enforce_if(guard.clone());
            }

            let cycles = (self.vars[producer.0].cycle, self.vars[consumer.0].cycle);
            let (Some(latency), (Some(p_cycle), Some(c_cycle))) = (latency, cycles) else {
                continue;
            };
            match latency {
                Latency::Fixed(n) => {
                    self.model
                        .add_linear_constraint(LinearExpr::from(c_cycle).ge(p_cycle + n))
                        .only_enforce_if(guard);
                }
                Latency::WithException(n, alternative) => {
                    let generic = self.model.add_bool_var(format!("{}_lat_generic", c_node.key));
                    let exception = self.model.add_bool_var(format!("{}_lat_exception", c_node.key));
                    self.model.add_exactly_one([generic.lit(), exception.lit()]);
                    self.model
                        .add_linear_constraint(LinearExpr::from(c_cycle).ge(p_cycle + n))
                        .only_enforce_if(guard.iter().copied().chain([generic.lit()]));
                    self.model
                        .add_linear_constraint(alternative(p_cycle, c_cycle))
                        .only_enforce_if(guard.iter().copied().chain([exception.lit()]));
                }
            }
        }
    }

    fn add_renaming_constraints(&mut self) -> Result<(), OptimizeError> {
        let dfg = self.dfg;
        for node in dfg.nodes() {
            let text = node.inst.to_string();
            for alloc in &self.vars[node.id.0].alloc_out {
                self.model.add_exactly_one(alloc.values().map(|b| b.lit()));
            }

            for (role, srcs) in [(Role::In, &node.src_in), (Role::InOut, &node.src_in_out)] {
                for (idx, src) in srcs.iter().enumerate() {
                    let Some(op) = node.inst.operands(role).get(idx) else {
                        continue;
                    };
                    let allowed = self.pools.candidates(op, node.is_locked, &text)?;
                    let alloc = alloc_of(dfg, &self.vars, *src)?;
                    for (reg, b) in alloc {
                        if !allowed.contains(reg) {
                            self.model.fix(*b, false);
                        }
                    }
                }
            }

            for role in [Role::In, Role::Out, Role::InOut] {
                for comb in node.inst.combinations(role) {
                    let mut choices = Vec::new();
                    for (c, choice) in comb.choices.iter().enumerate() {
                        let b = self
                            .model
                            .add_bool_var(format!("{}_{:?}_comb{}", node.key, role, c));
                        choices.push(b.lit());
                        for (slot, reg) in comb.slots.iter().zip(choice) {
                            let alloc = match role {
                                Role::Out => self.vars[node.id.0].alloc_out.get(*slot),
                                Role::In => node
                                    .src_in
                                    .get(*slot)
                                    .map(|s| alloc_of(dfg, &self.vars, *s))
                                    .transpose()?,
                                Role::InOut => node
                                    .src_in_out
                                    .get(*slot)
                                    .map(|s| alloc_of(dfg, &self.vars, *s))
                                    .transpose()?,
                            };
                            match alloc.and_then(|a| a.get(reg)) {
                                Some(&a) => {
                                    self.model.add_implication(b, a);
                                }
                                None => self.model.fix(b, false),
                            }
                        }
                    }
                    self.model.add_exactly_one(choices);
                }
            }

            for &(o, i) in &node.inst.args_in_out_different {
                let (Some(out), Some(src)) = (self.vars[node.id.0].alloc_out.get(o), node.src_in.get(i))
                else {
                    continue;
                };
                let read = alloc_of(dfg, &self.vars, *src)?;
                for (reg, a) in out {
                    if let Some(b) = read.get(reg) {
                        self.model.add_implication(*a, b.not());
                    }
                }
            }
            for &(io, i) in &node.inst.args_in_inout_different {
                let (Some(modified), Some(src)) = (node.src_in_out.get(io), node.src_in.get(i)) else {
                    continue;
                };
                let modified = alloc_of(dfg, &self.vars, *modified)?;
                let read = alloc_of(dfg, &self.vars, *src)?;
                for (reg, a) in modified {
                    if let Some(b) = read.get(reg) {
                        self.model.add_implication(*a, b.not());
                    }
                }
            }
        }

        if self.config.inputs_are_outputs {
            for &input in dfg.input_ids() {
                let Some(reg) = dfg.node(input).inst.orig_reg().map(|o| o.name.clone()) else {
                    continue;
                };
                let output = dfg.output_ids().iter().find(|id| {
                    dfg.node(**id).inst.orig_reg().map(|o| o.name.as_str()) == Some(reg.as_str())
                });
                let Some(src) = output.and_then(|id| dfg.node(*id).src_in.first()) else {
                    continue;
                };
                let out_alloc = alloc_of(dfg, &self.vars, *src)?;
                let Some(in_alloc) = self.vars[input.0].alloc_out.first() else {
                    continue;
                };
                for (r, b) in in_alloc {
                    match out_alloc.get(r) {
                        Some(o) => {
                            self.model.add_implication(*b, *o);
                        }
                        None => self.model.fix(*b, false),
                    }
                }
            }
        }
        Ok(())
    }

    fn add_register_usage(&mut self) {
        let dfg = self.dfg;
        let mut intervals: BTreeMap<String, Vec<IntervalVar>> = BTreeMap::new();
        for node in dfg.nodes() {
            let v = &self.vars[node.id.0];
            for (slot, alloc) in v.alloc_out.iter().enumerate() {
                let life = &v.out_life[slot];
                let spill = v.spills.get(slot).copied().flatten();
                for (reg, b) in alloc {
                    let name = format!("{}_out{}_{}_usage", node.key, slot, reg);
                    let ivs = intervals.entry(reg.clone()).or_default();
                    match spill {
                        None => ivs.push(self.model.add_interval_var(
                            life.start.clone(),
                            life.end,
                            Some(b.lit()),
                            name,
                        )),
                        Some(s) => {
                            ivs.push(self.model.add_interval_var(
                                life.start.clone(),
                                s.spill_at,
                                Some(b.lit()),
                                format!("{}_head", name),
                            ));
                            ivs.push(self.model.add_interval_var(
                                s.restore_at,
                                life.end,
                                Some(b.lit()),
                                format!("{}_tail", name),
                            ));
                        }
                    }
                    self.usage.entry(reg.clone()).or_default().push(*b);
                }
            }
            for (slot, src) in node.src_in_out.iter().enumerate() {
                let life = &v.in_out_life[slot];
                let Ok(alloc) = alloc_of(dfg, &self.vars, *src) else {
                    continue;
                };
                for (reg, b) in alloc {
                    let iv = self.model.add_interval_var(
                        life.start.clone(),
                        life.end,
                        Some(b.lit()),
                        format!("{}_inout{}_{}_usage", node.key, slot, reg),
                    );
                    intervals.entry(reg.clone()).or_default().push(iv);
                }
            }
        }
        for ivs in intervals.into_values().filter(|ivs| ivs.len() > 1) {
            self.model.add_no_overlap(ivs);
        }
    }

    fn add_functional_units(&mut self) {
        if !self.config.models_functional_units() {
            return;
        }
        let dfg = self.dfg;
        let mut per_unit: BTreeMap<ExecutionUnit, Vec<IntervalVar>> = BTreeMap::new();
        for node in dfg.real_nodes() {
            let Some(cycle) = self.vars[node.id.0].cycle else {
                continue;
            };
            let busy = self.target.inverse_throughput(&node.inst);
            for (r, alternatives) in self.target.units(&node.inst).into_iter().enumerate() {
                match alternatives.as_slice() {
                    [] => {}
                    [unit] => {
                        let iv = self.model.add_interval_var(
                            cycle,
                            cycle + busy,
                            None,
                            format!("{}_{}", node.key, unit),
                        );
                        per_unit.entry(*unit).or_default().push(iv);
                    }
                    units => {
                        let mut choices = Vec::new();
                        for unit in units {
                            let b = self
                                .model
                                .add_bool_var(format!("{}_req{}_{}", node.key, r, unit));
                            choices.push(b.lit());
                            let iv = self.model.add_interval_var(
                                cycle,
                                cycle + busy,
                                Some(b.lit()),
                                format!("{}_{}", node.key, unit),
                            );
                            per_unit.entry(*unit).or_default().push(iv);
                        }
                        self.model.add_exactly_one(choices);
                    }
                }
            }
        }
        for ivs in per_unit.into_values().filter(|ivs| ivs.len() > 1) {
            self.model.add_no_overlap(ivs);
        }
    }

    fn add_loop_constraints(&mut self) {
        if !self.pipelining() {
            return;
        }
        let dfg = self.dfg;
        let sw = &self.config.sw_pipelining;
        let low: Vec<NodeId> = dfg.nodes_low().to_vec();
        let overlapping = LinearExpr::sum(
            low.iter()
                .filter_map(|id| self.flags(*id))
                .map(|f| f.core.not()),
        );
        if let Some(max) = sw.max_overlapping {
            self.model
                .add_linear_constraint(overlapping.clone().le(max as i64));
        }
        if let Some(min) = sw.min_overlapping {
            self.model.add_linear_constraint(overlapping.ge(min as i64));
        }

        for node in dfg.real_nodes() {
            let Some(f) = self.flags(node.id) else {
                continue;
            };
            self.model.add_exactly_one([f.pre.lit(), f.core.lit(), f.post.lit()]);
            let line = &node.inst.source;
            for (tag, var) in [("pre", f.pre), ("core", f.core), ("post", f.post)] {
                if let Some(forced) = line.flag(tag) {
                    debug!("forcing {}={} for {}", tag, forced, node);
                    self.model.fix(var, forced);
                }
            }
            if !sw.allow_pre {
                self.model.fix(f.pre, false);
            }
            if !sw.allow_post {
                self.model.fix(f.post, false);
            }
            if sw.max_pre < 1.0 && self.is_low(node.id) {
                let rel = node.orig_pos.unwrap_or(0) as f64 / low.len() as f64;
                if sw.max_pre < rel && rel < 1.0 {
                    self.model.fix(f.pre, false);
                }
            }
        }

        if sw.pre_before_post {
            for &t in &low {
                for &s in &low {
                    let (Some(ft), Some(fs)) = (self.flags(t), self.flags(s)) else {
                        continue;
                    };
                    if t == s {
                        continue;
                    }
                    let (tp, sp) = (self.vars[t.0].pos.clone(), self.vars[s.0].pos.clone());
                    self.model
                        .add_linear_constraint(tp.gt(sp))
                        .only_enforce_if([ft.pre.lit(), fs.post.lit()]);
                }
            }
        }

        for (consumer, src, _, _) in dfg.dependencies() {
            let producer = src.node;
            let (Some(fc), Some(fp)) = (self.flags(consumer), self.flags(producer)) else {
                continue;
            };
            if self.is_low(consumer) && self.is_low(producer) {
                self.model.add_implication(fp.post, fc.post);
                self.model.add_implication(fc.pre, fp.pre);
                self.model.add_implication(fp.pre, fc.post.not());
            } else if self.is_low(producer) {
                // forward dependency into the next iteration
                self.model.fix(fp.pre, false);
                self.model.fix(fc.post, false);
            }
        }
    }

    fn add_periodic_constraints(&mut self) -> Result<(), OptimizeError> {
        if !self.pipelining() {
            return Ok(());
        }
        let dfg = self.dfg;
        for (&t0, &t1) in dfg.nodes_low().iter().zip(dfg.nodes_high()) {
            let (Some(f0), Some(f1)) = (self.flags(t0), self.flags(t1)) else {
                continue;
            };
            for (a, b) in [(f0.pre, f1.pre), (f0.core, f1.core), (f0.post, f1.post)] {
                self.model
                    .add_linear_constraint(LinearExpr::from(a).eq(b));
            }
            let (p0, p1) = (self.vars[t0.0].pos.clone(), self.vars[t1.0].pos.clone());
            let half = self.pad.half.clone();
            self.model
                .add_linear_constraint(p0.clone().eq(p1.clone() + half.clone()))
                .only_enforce_if([f0.pre.lit()]);
            self.model
                .add_linear_constraint(p1.clone().eq(p0.clone() + half.clone()))
                .only_enforce_if([f0.core.lit()]);
            self.model
                .add_linear_constraint(p0.eq(p1 + half))
                .only_enforce_if([f0.post.lit()]);

            let n0 = dfg.node(t0);
            for (slot, a1) in self.vars[t1.0].alloc_out.iter().enumerate() {
                let a0 = &self.vars[t0.0].alloc_out[slot];
                if !a1.keys().all(|r| a0.contains_key(r)) {
                    return Err(OptimizeError::PeriodicCandidates {
                        inst: n0.inst.to_string(),
                        slot,
                    });
                }
                for (reg, b1) in a1 {
                    self.model
                        .add_linear_constraint(LinearExpr::from(a0[reg]).eq(*b1));
                }
            }
        }
        Ok(())
    }

    fn add_locked_ordering(&mut self) {
        let dfg = self.dfg;
        let allow_reordering = self.config.constraints.allow_reordering;
        let same_address_update = |a: NodeId, b: NodeId| {
            let (x, y) = (&dfg.node(a).inst, &dfg.node(b).inst);
            x.is_load_store()
                && y.is_load_store()
                && x.addr() == y.addr()
                && x.increment().is_some()
                && y.increment().is_some()
        };

        let real = dfg.real_ids();
        for (i, &t0) in real.iter().enumerate() {
            for &t1 in &real[i + 1..] {
                let locked = dfg.node(t0).is_locked || dfg.node(t1).is_locked;
                let same = same_address_update(t0, t1);
                if allow_reordering && !locked && !same {
                    continue;
                }
                if same {
                    debug!(
                        "keeping order of {} and {} to avoid address fixup",
                        dfg.node(t0),
                        dfg.node(t1)
                    );
                }
                if let (Some(f0), Some(f1)) = (self.flags(t0), self.flags(t1)) {
                    self.model.add_implication(f0.post, f1.post);
                    self.model.add_implication(f1.pre, f0.pre);
                    self.model.add_implication(f0.pre, f1.post.not());
                }
                self.add_order(t0, t1);
            }
        }
    }

    /// `first` comes strictly before `second`, subject to the path guard
    fn add_order(&mut self, first: NodeId, second: NodeId) {
        let Some(guard) = self.path_guard(second, first) else {
            return;
        };
        let (p0, p1) = (self.vars[first.0].pos.clone(), self.vars[second.0].pos.clone());
        self.model
            .add_linear_constraint(p0.lt(p1))
            .only_enforce_if(guard);
    }

    fn add_source_annotations(&mut self) -> Result<(), OptimizeError> {
        let dfg = self.dfg;
        let nodes: Vec<NodeId> = if self.pipelining() {
            dfg.nodes_low().to_vec()
        } else {
            dfg.real_ids().to_vec()
        };
        let find = |id: &str| {
            nodes
                .iter()
                .copied()
                .find(|n| {
                    dfg.node(*n)
                        .inst
                        .source
                        .tag("id")
                        .and_then(|t| t.as_ident())
                        .as_deref()
                        == Some(id)
                })
                .ok_or_else(|| OptimizeError::UnknownSourceId(id.to_string()))
        };
        let ids = |n: NodeId, tag: &str| -> Vec<String> {
            dfg.node(n)
                .inst
                .source
                .tag(tag)
                .and_then(|t| t.as_ident())
                .map(|s| s.split(',').map(|p| p.trim().to_string()).collect())
                .unwrap_or_default()
        };

        let mut orders = Vec::new();
        for (i, &t1) in nodes.iter().enumerate() {
            for id in ids(t1, "after") {
                orders.push((find(&id)?, t1));
            }
            if dfg.node(t1).inst.source.has_flag("after_last") && i > 0 {
                orders.push((nodes[i - 1], t1));
            }
        }
        for &t0 in &nodes {
            for id in ids(t0, "before") {
                orders.push((t0, find(&id)?));
            }
        }
        for (t0, t1) in orders {
            info!(
                "forcing {} before {} by source annotation",
                dfg.node(t0),
                dfg.node(t1)
            );
            self.add_order(t0, t1);
        }
        Ok(())
    }

    fn add_displacement(&mut self) {
        let dfg = self.dfg;
        let n = dfg.len().max(1) as i64;
        let max_disp = self.config.constraints.max_displacement;
        for node in dfg.real_nodes() {
            let v = &self.vars[node.id.0];
            let Some(disp) = v.displacement else {
                continue;
            };
            let orig = node.orig_pos.unwrap_or(0) as i64;
            let scaled = orig * self.pad.pad_const / n;
            let expr = v.pos.clone() - scaled;
            self.model.add_abs_eq(disp, expr);
            if max_disp < 1.0 {
                let bound = (max_disp * self.pad.pad_const as f64).floor() as i64;
                self.model
                    .add_linear_constraint(LinearExpr::from(disp).lt(bound));
            }
        }
    }

    fn add_spill_constraints(&mut self) {
        let dfg = self.dfg;
        for node in dfg.real_nodes() {
            for (slot, spill) in self.vars[node.id.0].spills.clone().into_iter().enumerate() {
                let Some(s) = spill else {
                    continue;
                };
                let after = self.vars[node.id.0].pos.clone() + 1;
                let kept = [s.spilled.not()];
                self.model
                    .add_linear_constraint(LinearExpr::from(s.spill_at).eq(after.clone()))
                    .only_enforce_if(kept);
                self.model
                    .add_linear_constraint(LinearExpr::from(s.restore_at).eq(after.clone()))
                    .only_enforce_if(kept);

                let spilled = [s.spilled.lit()];
                self.model
                    .add_linear_constraint(LinearExpr::from(s.spill_at).ge(after))
                    .only_enforce_if(spilled);
                self.model
                    .add_linear_constraint(LinearExpr::from(s.spill_at).le(s.restore_at))
                    .only_enforce_if(spilled);
                self.model
                    .add_linear_constraint(
                        LinearExpr::from(s.restore_at).le(self.pad.size.clone() - 1),
                    )
                    .only_enforce_if(spilled);
                for consumer in node.consumers(SourceKind::Out, slot) {
                    let c_pos = self.vars[consumer.0].pos.clone();
                    self.model
                        .add_linear_constraint(LinearExpr::from(s.restore_at).le(c_pos - 1))
                        .only_enforce_if(spilled);
                }
            }
        }
    }

    fn scheduled_nodes(&self) -> Vec<ScheduledNode<'a>> {
        let dfg = self.dfg;
        dfg.real_nodes()
            .filter_map(|node| {
                let v = &self.vars[node.id.0];
                v.pos_var.map(|pos| ScheduledNode {
                    inst: &node.inst,
                    timing: NodeTiming {
                        pos,
                        cycle: v.cycle,
                        slot: v.slot,
                    },
                })
            })
            .collect()
    }

    /// Whether a register is used at all, as a 0/1 expression
    fn register_used(&mut self, reg: &str) -> LinearExpr {
        let Some(bools) = self.usage.get(reg).filter(|b| !b.is_empty()) else {
            return LinearExpr::constant(0);
        };
        let exprs: Vec<LinearExpr> = bools.iter().map(|b| LinearExpr::from(*b)).collect();
        let used = self.model.add_int_var(0, 1, format!("{}_used", reg));
        self.model.add_max_eq(used, exprs);
        used.into()
    }

    fn objective(&mut self) -> Option<ObjectiveSpec> {
        let goal = self.config.objective()?;
        let dfg = self.dfg;
        let real = || dfg.real_ids().iter().map(|id| id.0);
        let (sense, expr) = match goal {
            Goal::MinimizeOverlapping => (
                Sense::Minimize,
                LinearExpr::sum(
                    dfg.nodes_low()
                        .iter()
                        .filter_map(|id| self.flags(*id))
                        .map(|f| f.core.not()),
                ),
            ),
            Goal::MaximizeRegisterLifetimes => (
                Sense::Maximize,
                LinearExpr::sum(
                    self.vars
                        .iter()
                        .flat_map(|v| &v.out_life)
                        .map(|l| LinearExpr::from(l.end) - l.start.clone()),
                ),
            ),
            Goal::MoveStallsToBottom => (
                Sense::Minimize,
                LinearExpr::sum(real().map(|i| self.vars[i].pos.clone())),
            ),
            Goal::MoveStallsToTop => (
                Sense::Maximize,
                LinearExpr::sum(real().map(|i| self.vars[i].pos.clone())),
            ),
            Goal::MinimizeRegisterUsage(ty) | Goal::MinimizeExtraRegisters(ty) => {
                let filter = match goal {
                    Goal::MinimizeRegisterUsage(_) => RegFilter::All,
                    _ => RegFilter::Extra,
                };
                let regs = self.arch.list_registers(ty, filter);
                let used: Vec<LinearExpr> = regs.iter().map(|r| self.register_used(r)).collect();
                (Sense::Minimize, LinearExpr::sum(used))
            }
            Goal::MinimizeDisplacement => (
                Sense::Minimize,
                LinearExpr::sum(self.vars.iter().filter_map(|v| v.displacement)),
            ),
            Goal::MinimizeSpills => (
                Sense::Minimize,
                LinearExpr::sum(
                    self.vars
                        .iter()
                        .flat_map(|v| v.spills.iter().flatten())
                        .map(|s| s.spilled),
                ),
            ),
            Goal::Target => {
                let nodes = self.scheduled_nodes();
                let obj = self.target.min_max_objective(&nodes, &mut self.model)?;
                return Some(ObjectiveSpec {
                    name: obj.name.to_string(),
                    sense: obj.sense,
                    expr: obj.expr,
                });
            }
        };
        Some(ObjectiveSpec {
            name: goal.to_string(),
            sense,
            expr,
        })
    }
}
