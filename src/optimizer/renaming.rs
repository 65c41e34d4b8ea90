//! Register pools and static renaming of global inputs and outputs

use super::OptimizeError;
use crate::config::{Config, Renaming, RenamingPolicy};
use crate::dataflow::DataFlowGraph;
use crate::frontend::{Architecture, Operand, RegFilter, RegType};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// Registers renaming may choose from, per register class
pub struct RegisterPools<'a> {
    arch: &'a dyn Architecture,
    avail: BTreeMap<RegType, Vec<String>>,
    locked: BTreeSet<String>,
    allow_renaming: bool,
}

impl<'a> RegisterPools<'a> {
    pub fn new(arch: &'a dyn Architecture, config: &Config) -> Self {
        let reserved = config.reserved(arch);
        let avail = arch
            .register_types()
            .iter()
            .map(|&ty| {
                let extra = config
                    .constraints
                    .allow_extra_registers
                    .get(&ty)
                    .copied()
                    .unwrap_or(0);
                let mut regs = arch.list_registers(ty, RegFilter::Normal);
                regs.extend(arch.list_registers(ty, RegFilter::Extra).into_iter().take(extra));
                regs.retain(|r| !reserved.contains(r));
                (ty, regs)
            })
            .collect();
        RegisterPools {
            arch,
            avail,
            locked: config.locked(arch),
            allow_renaming: config.constraints.allow_renaming,
        }
    }

    pub fn available(&self, ty: RegType) -> &[String] {
        self.avail.get(&ty).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether an operand must keep its current register
    fn is_fixed(&self, op: &Operand, node_locked: bool) -> bool {
        if !self.arch.is_renamed(op.ty) {
            return true;
        }
        if self.arch.find_type(&op.name) != Some(op.ty) {
            return false;
        }
        node_locked
            || self.locked.contains(&op.name)
            || !self.allow_renaming
            || !self.available(op.ty).contains(&op.name)
    }

    /// Architectural registers an operand may be renamed to
    pub fn candidates(
        &self,
        op: &Operand,
        node_locked: bool,
        inst: &str,
    ) -> Result<Vec<String>, OptimizeError> {
        let mut regs = if self.is_fixed(op, node_locked) {
            vec![op.name.clone()]
        } else {
            self.available(op.ty).to_vec()
        };
        if let Some(allowed) = &op.restriction {
            regs.retain(|r| allowed.contains(r));
        }
        if regs.is_empty() {
            return Err(OptimizeError::NoRenamingCandidates {
                inst: inst.to_string(),
                register: op.name.clone(),
                ty: op.ty,
                restriction: op.restriction.clone(),
            });
        }
        Ok(regs)
    }
}

fn lookup<'p>(
    policy: &'p RenamingPolicy,
    reg: &str,
    arch: &dyn Architecture,
    direction: &'static str,
) -> Result<&'p Renaming, OptimizeError> {
    let class = if arch.is_architectural(reg) {
        "arch"
    } else {
        "symbolic"
    };
    policy
        .get(reg)
        .or_else(|| policy.get(class))
        .or_else(|| policy.get("other"))
        .ok_or_else(|| OptimizeError::UnknownRegister {
            register: reg.to_string(),
            direction,
        })
}

/// Turn the input/output renaming policies into operand restrictions
///
/// Symbolic registers with a static policy are assigned a fixed free
/// register up front; a symbolic register that is both input and output
/// receives the same register on both sides.
pub fn apply_static_renaming(
    dfg: &mut DataFlowGraph,
    arch: &dyn Architecture,
    config: &Config,
    pools: &RegisterPools<'_>,
) -> Result<(), OptimizeError> {
    let inputs = dfg.input_registers();
    let outputs = dfg.output_registers();

    let mut policies: Vec<(&str, &RegType, &Renaming, bool)> = Vec::new();
    for (reg, ty) in &inputs {
        policies.push((reg, ty, lookup(&config.rename_inputs, reg, arch, "input")?, true));
    }
    for (reg, ty) in &outputs {
        policies.push((reg, ty, lookup(&config.rename_outputs, reg, arch, "output")?, false));
    }

    let taken: BTreeSet<&str> = policies
        .iter()
        .filter_map(|(reg, _, renaming, _)| match renaming {
            Renaming::Static if arch.is_architectural(reg) => Some(*reg),
            Renaming::Register(r) => Some(r.as_str()),
            _ => None,
        })
        .collect();
    let mut free: BTreeMap<RegType, Vec<String>> = arch
        .register_types()
        .iter()
        .map(|&ty| {
            let mut regs = pools.available(ty).to_vec();
            regs.retain(|r| !taken.contains(r.as_str()));
            (ty, regs)
        })
        .collect();

    let mut fresh: BTreeMap<String, String> = BTreeMap::new();
    let mut restrictions: BTreeMap<(String, bool), Option<Vec<String>>> = BTreeMap::new();
    for (reg, &ty, renaming, is_input) in policies {
        let restriction = match renaming {
            Renaming::Any => None,
            Renaming::Register(r) => Some(vec![r.clone()]),
            Renaming::Static if arch.is_architectural(reg) => Some(vec![reg.to_string()]),
            Renaming::Static => {
                let assigned = match fresh.get(reg) {
                    Some(r) => r.clone(),
                    None => {
                        let r = free
                            .get_mut(&ty)
                            .and_then(Vec::pop)
                            .ok_or(OptimizeError::OutOfRegisters(ty))?;
                        fresh.insert(reg.to_string(), r.clone());
                        r
                    }
                };
                debug!("statically assigning `{}` to `{}`", reg, assigned);
                Some(vec![assigned])
            }
        };
        restrictions.insert((reg.to_string(), is_input), restriction);
    }

    for id in dfg.input_ids().to_vec() {
        let node = dfg.node_mut(id);
        if let Some(op) = node.inst.outs.first_mut() {
            if let Some(r) = restrictions.get(&(op.name.clone(), true)) {
                op.restriction = r.clone();
            }
        }
    }
    for id in dfg.output_ids().to_vec() {
        let node = dfg.node_mut(id);
        if let Some(op) = node.inst.ins.first_mut() {
            if let Some(r) = restrictions.get(&(op.name.clone(), false)) {
                op.restriction = r.clone();
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::source::SourceLine;
    use crate::frontend::a64::A64;
    use pretty_assertions::assert_eq;

    fn graph(src: &str, config: &Config) -> DataFlowGraph {
        DataFlowGraph::from_source(&A64, &SourceLine::parse_all(src), config.dataflow_config(&A64))
            .unwrap()
    }

    #[test]
    fn test_pools_skip_reserved_and_extra() {
        let config = Config::default();
        let pools = RegisterPools::new(&A64, &config);
        let gpr = pools.available(RegType::Gpr);
        assert_eq!(gpr.len(), 18);
        assert!(gpr.contains(&"x17".to_string()));
        assert!(!gpr.contains(&"x19".to_string()));
        assert!(!pools.available(RegType::Vector).contains(&"v8".to_string()));

        let mut config = Config::default();
        config.constraints.allow_extra_registers.insert(RegType::Gpr, 2);
        config.reserved_regs = Some(["x0".to_string()].into_iter().collect());
        let pools = RegisterPools::new(&A64, &config);
        let gpr = pools.available(RegType::Gpr);
        assert!(!gpr.contains(&"x0".to_string()));
        assert!(gpr.contains(&"x20".to_string()));
        assert!(!gpr.contains(&"x21".to_string()));
    }

    #[test]
    fn test_candidates() {
        let mut config = Config::default();
        config.locked_registers.insert("x3".to_string());
        let pools = RegisterPools::new(&A64, &config);

        let sym = Operand::new("acc", RegType::Gpr);
        assert_eq!(pools.candidates(&sym, false, "").unwrap().len(), 18);
        let locked = Operand::new("x3", RegType::Gpr);
        assert_eq!(pools.candidates(&locked, false, "").unwrap(), vec!["x3"]);
        let arch = Operand::new("x4", RegType::Gpr);
        assert_eq!(pools.candidates(&arch, true, "").unwrap(), vec!["x4"]);
        let flags = Operand::new("flags", RegType::Flags);
        assert_eq!(pools.candidates(&flags, false, "").unwrap(), vec!["flags"]);
        let sp = Operand::new("sp", RegType::Gpr);
        assert_eq!(pools.candidates(&sp, false, "").unwrap(), vec!["sp"]);

        let mut restricted = Operand::new("acc", RegType::Gpr);
        restricted.restriction = Some(vec!["x1".to_string(), "v2".to_string()]);
        assert_eq!(pools.candidates(&restricted, false, "").unwrap(), vec!["x1"]);
        restricted.restriction = Some(vec!["v2".to_string()]);
        assert!(matches!(
            pools.candidates(&restricted, false, "add"),
            Err(OptimizeError::NoRenamingCandidates { .. })
        ));
    }

    #[test]
    fn test_static_renaming() {
        let mut config = Config::default();
        config.outputs = ["out".to_string(), "x2".to_string()].into_iter().collect();
        config.rename_inputs.insert("arch".to_string(), Renaming::Static);
        config.rename_inputs.insert("symbolic".to_string(), Renaming::Static);
        config.rename_outputs.insert("symbolic".to_string(), Renaming::Static);
        let mut dfg = graph("add out, a, x1\nadd x2, out, a", &config);
        let pools = RegisterPools::new(&A64, &config);
        apply_static_renaming(&mut dfg, &A64, &config, &pools).unwrap();

        let restriction = |name: &str| {
            dfg.input_ids()
                .iter()
                .chain(dfg.output_ids())
                .map(|id| dfg.node(*id))
                .find(|n| n.inst.orig_reg().map(|o| o.name.as_str()) == Some(name))
                .and_then(|n| n.inst.orig_reg())
                .and_then(|o| o.restriction.clone())
        };
        assert_eq!(restriction("x1"), Some(vec!["x1".to_string()]));
        assert_eq!(restriction("x2"), Some(vec!["x2".to_string()]));
        let a = restriction("a").unwrap();
        let out = restriction("out").unwrap();
        assert_eq!(a.len(), 1);
        assert_ne!(a, out);
        assert_ne!(a[0], "x1");
        assert_ne!(a[0], "x2");
    }

    #[test]
    fn test_missing_policy() {
        let mut config = Config::default();
        config.rename_inputs.clear();
        let mut dfg = graph("add x2, x1, x1", &config.with_outputs(["x2"]));
        let pools = RegisterPools::new(&A64, &config);
        assert!(matches!(
            apply_static_renaming(&mut dfg, &A64, &config, &pools),
            Err(OptimizeError::UnknownRegister { direction: "input", .. })
        ));
    }

    #[test]
    fn test_out_of_registers() {
        let mut config = Config::default();
        config.rename_inputs.insert("symbolic".to_string(), Renaming::Static);
        config.reserved_regs = Some(
            A64.list_registers(RegType::Gpr, RegFilter::All)
                .into_iter()
                .filter(|r| r != "x0")
                .collect(),
        );
        let config = config.with_outputs(["x0"]);
        let mut dfg = graph("add x0, a, b", &config);
        let pools = RegisterPools::new(&A64, &config);
        assert!(matches!(
            apply_static_renaming(&mut dfg, &A64, &config, &pools),
            Err(OptimizeError::OutOfRegisters(RegType::Gpr))
        ));
    }
}
