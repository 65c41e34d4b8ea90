//! Optimizer configuration
//!
//! A tree of plain structs, loadable from TOML and constructible in code via
//! `Default` plus field updates. Everything is checked up front by
//! [`Config::validate`]; the optimizer reads a validated copy and never
//! writes back.
//!
//! ```toml
//! outputs = ["x2"]
//! variable_size = true
//!
//! [sw_pipelining]
//! enabled = true
//! allow_post = true
//!
//! [constraints]
//! stalls_allowed = 4
//! ```

mod error;

use crate::dataflow::DataflowConfig;
use crate::frontend::{Architecture, RegType};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

pub use error::ConfigError;

/// How a global input or output may be renamed
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum Renaming {
    /// Architectural names are kept, symbolic names get a fixed register
    Static,
    /// Any register the solver picks
    Any,
    /// This architectural register
    Register(String),
}

impl From<String> for Renaming {
    fn from(s: String) -> Self {
        match s.as_str() {
            "static" => Renaming::Static,
            "any" => Renaming::Any,
            _ => Renaming::Register(s),
        }
    }
}

impl fmt::Display for Renaming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Renaming::Static => write!(f, "static"),
            Renaming::Any => write!(f, "any"),
            Renaming::Register(r) => write!(f, "{}", r),
        }
    }
}

/// Renaming policy keyed by register name, `arch`, `symbolic` or `other`
pub type RenamingPolicy = BTreeMap<String, Renaming>;

fn default_renaming() -> RenamingPolicy {
    [
        ("arch".to_string(), Renaming::Static),
        ("symbolic".to_string(), Renaming::Any),
    ]
    .into_iter()
    .collect()
}

/// The optimization goals a configuration can ask for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Goal {
    MinimizeOverlapping,
    MaximizeRegisterLifetimes,
    MoveStallsToBottom,
    MoveStallsToTop,
    MinimizeRegisterUsage(RegType),
    MinimizeExtraRegisters(RegType),
    MinimizeDisplacement,
    MinimizeSpills,
    Target,
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Goal::MinimizeOverlapping => write!(f, "minimize iteration overlapping"),
            Goal::MaximizeRegisterLifetimes => write!(f, "maximize register lifetimes"),
            Goal::MoveStallsToBottom => write!(f, "move stalls to bottom"),
            Goal::MoveStallsToTop => write!(f, "move stalls to top"),
            Goal::MinimizeRegisterUsage(ty) => write!(f, "minimize {} register usage", ty),
            Goal::MinimizeExtraRegisters(ty) => write!(f, "minimize use of extra {} registers", ty),
            Goal::MinimizeDisplacement => write!(f, "minimize displacement"),
            Goal::MinimizeSpills => write!(f, "minimize spills"),
            Goal::Target => write!(f, "target objective"),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SwPipelining {
    pub enabled: bool,
    /// Number of body copies optimized as one kernel
    pub unroll: usize,
    /// Allow instructions to be pulled into the previous iteration
    pub allow_pre: bool,
    /// Allow instructions to be deferred to the next iteration
    pub allow_post: bool,
    /// Late instructions of iteration N precede early ones of iteration N+2
    pub pre_before_post: bool,
    pub minimize_overlapping: bool,
    pub max_overlapping: Option<usize>,
    pub min_overlapping: Option<usize>,
    /// Only the leading fraction of the body may be early
    pub max_pre: f64,
}

impl Default for SwPipelining {
    fn default() -> Self {
        SwPipelining {
            enabled: false,
            unroll: 1,
            allow_pre: true,
            allow_post: false,
            pre_before_post: false,
            minimize_overlapping: false,
            max_overlapping: None,
            min_overlapping: None,
            max_pre: 1.0,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Constraints {
    /// Stall cycles allowed in fixed-size mode, upper bound in variable-size mode
    pub stalls_allowed: usize,
    pub stalls_minimum_attempt: usize,
    pub stalls_maximum_attempt: usize,
    pub stalls_first_attempt: usize,
    pub model_latencies: bool,
    pub model_functional_units: bool,
    /// Only preserve functionality: no cycles, latencies or units
    pub functional_only: bool,
    pub allow_reordering: bool,
    pub allow_renaming: bool,
    pub allow_spills: bool,
    pub minimize_spills: bool,
    /// Maximum displacement from the original position, as a fraction of the code size
    pub max_displacement: f64,
    pub minimize_displacement: bool,
    pub maximize_register_lifetimes: bool,
    pub move_stalls_to_top: bool,
    pub move_stalls_to_bottom: bool,
    pub minimize_register_usage: Option<RegType>,
    pub minimize_use_of_extra_registers: Option<RegType>,
    /// Number of extra (callee-saved) registers per class made available for renaming
    pub allow_extra_registers: BTreeMap<RegType, usize>,
    /// Ask the target for its own objective
    pub target_objective: bool,
}

impl Default for Constraints {
    fn default() -> Self {
        Constraints {
            stalls_allowed: 0,
            stalls_minimum_attempt: 0,
            stalls_maximum_attempt: 512,
            stalls_first_attempt: 0,
            model_latencies: true,
            model_functional_units: true,
            functional_only: false,
            allow_reordering: true,
            allow_renaming: true,
            allow_spills: false,
            minimize_spills: false,
            max_displacement: 1.0,
            minimize_displacement: false,
            maximize_register_lifetimes: false,
            move_stalls_to_top: false,
            move_stalls_to_bottom: false,
            minimize_register_usage: None,
            minimize_use_of_extra_registers: None,
            allow_extra_registers: BTreeMap::new(),
            target_objective: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub outputs: BTreeSet<String>,
    /// Every live-in register is also live-out (loop bodies)
    pub inputs_are_outputs: bool,
    pub rename_inputs: RenamingPolicy,
    pub rename_outputs: RenamingPolicy,
    /// Architectural registers whose uses are never renamed
    pub locked_registers: BTreeSet<String>,
    /// Registers never introduced by renaming; `None` uses the architecture default
    pub reserved_regs: Option<BTreeSet<String>>,
    pub reserved_regs_are_locked: bool,
    pub register_aliases: BTreeMap<String, String>,
    pub typing_hints: BTreeMap<String, RegType>,
    /// Make the number of stalls a solver variable and minimize it
    pub variable_size: bool,
    pub selfcheck: bool,
    pub allow_useless_instructions: bool,
    /// Model post-increment base registers as plain inputs
    pub address_offset_fixup: bool,
    /// Rewrite immediate offsets of reordered memory accesses
    pub do_address_fixup: bool,
    pub absorb_spills: bool,
    /// Solver timeout in seconds
    pub timeout: Option<u64>,
    pub random_seed: Option<u32>,
    pub ignore_objective: bool,
    pub keep_tags: bool,
    pub sw_pipelining: SwPipelining,
    pub constraints: Constraints,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            outputs: BTreeSet::new(),
            inputs_are_outputs: false,
            rename_inputs: default_renaming(),
            rename_outputs: default_renaming(),
            locked_registers: BTreeSet::new(),
            reserved_regs: None,
            reserved_regs_are_locked: true,
            register_aliases: BTreeMap::new(),
            typing_hints: BTreeMap::new(),
            variable_size: false,
            selfcheck: true,
            allow_useless_instructions: false,
            address_offset_fixup: true,
            do_address_fixup: true,
            absorb_spills: true,
            timeout: None,
            random_seed: None,
            ignore_objective: false,
            keep_tags: true,
            sw_pipelining: SwPipelining::default(),
            constraints: Constraints::default(),
        }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Copy of this configuration with different outputs
    pub fn with_outputs<S: Into<String>>(&self, outputs: impl IntoIterator<Item = S>) -> Self {
        let mut config = self.clone();
        config.outputs = outputs.into_iter().map(Into::into).collect();
        config
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }

    pub fn reserved(&self, arch: &dyn Architecture) -> BTreeSet<String> {
        self.reserved_regs
            .clone()
            .unwrap_or_else(|| arch.default_reserved())
    }

    /// Explicitly locked registers, plus the reserved ones if they are locked
    pub fn locked(&self, arch: &dyn Architecture) -> BTreeSet<String> {
        let mut locked = self.locked_registers.clone();
        if self.reserved_regs_are_locked {
            locked.extend(self.reserved(arch));
        }
        locked
    }

    pub fn models_latencies(&self) -> bool {
        self.constraints.model_latencies && !self.constraints.functional_only
    }

    pub fn models_functional_units(&self) -> bool {
        self.constraints.model_functional_units && !self.constraints.functional_only
    }

    pub fn dataflow_config(&self, arch: &dyn Architecture) -> DataflowConfig {
        DataflowConfig {
            outputs: self.outputs.clone(),
            inputs_are_outputs: self.inputs_are_outputs,
            locked_registers: self.locked(arch),
            typing_hints: self.typing_hints.clone(),
            allow_useless_instructions: self.allow_useless_instructions,
            absorb_spills: self.absorb_spills,
            address_offset_fixup: self.address_offset_fixup,
            register_aliases: self.register_aliases.clone(),
        }
    }

    /// All goals enabled besides stall minimization
    pub fn goals(&self) -> Vec<Goal> {
        let c = &self.constraints;
        let sw = &self.sw_pipelining;
        let mut goals = Vec::new();
        if sw.enabled && sw.minimize_overlapping {
            goals.push(Goal::MinimizeOverlapping);
        }
        if c.maximize_register_lifetimes {
            goals.push(Goal::MaximizeRegisterLifetimes);
        }
        if c.move_stalls_to_bottom {
            goals.push(Goal::MoveStallsToBottom);
        }
        if c.move_stalls_to_top {
            goals.push(Goal::MoveStallsToTop);
        }
        if let Some(ty) = c.minimize_register_usage {
            goals.push(Goal::MinimizeRegisterUsage(ty));
        }
        if let Some(ty) = c.minimize_use_of_extra_registers {
            goals.push(Goal::MinimizeExtraRegisters(ty));
        }
        if c.minimize_displacement {
            goals.push(Goal::MinimizeDisplacement);
        }
        if c.minimize_spills {
            goals.push(Goal::MinimizeSpills);
        }
        if c.target_objective {
            goals.push(Goal::Target);
        }
        goals
    }

    /// The goal to optimize for after stalls, if any
    pub fn objective(&self) -> Option<Goal> {
        if self.ignore_objective {
            return None;
        }
        self.goals().first().copied()
    }

    pub fn validate(&self, arch: &dyn Architecture) -> Result<(), ConfigError> {
        let goals = self.goals();
        if goals.len() > 1 {
            return Err(ConfigError::ConflictingObjectives(
                goals.iter().map(Goal::to_string).collect(),
            ));
        }

        let c = &self.constraints;
        let sw = &self.sw_pipelining;
        if !(0.0..=1.0).contains(&c.max_displacement) {
            return Err(ConfigError::OutOfRange {
                option: "constraints.max_displacement",
                value: c.max_displacement.to_string(),
                expected: "a value in [0, 1]",
            });
        }
        if !(0.0..=1.0).contains(&sw.max_pre) {
            return Err(ConfigError::OutOfRange {
                option: "sw_pipelining.max_pre",
                value: sw.max_pre.to_string(),
                expected: "a value in [0, 1]",
            });
        }
        if sw.unroll == 0 {
            return Err(ConfigError::OutOfRange {
                option: "sw_pipelining.unroll",
                value: "0".to_string(),
                expected: "at least 1",
            });
        }
        if let (Some(min), Some(max)) = (sw.min_overlapping, sw.max_overlapping) {
            if min > max {
                return Err(ConfigError::OutOfRange {
                    option: "sw_pipelining.min_overlapping",
                    value: min.to_string(),
                    expected: "at most sw_pipelining.max_overlapping",
                });
            }
        }
        if c.stalls_minimum_attempt > c.stalls_maximum_attempt {
            return Err(ConfigError::OutOfRange {
                option: "constraints.stalls_minimum_attempt",
                value: c.stalls_minimum_attempt.to_string(),
                expected: "at most constraints.stalls_maximum_attempt",
            });
        }

        if c.allow_spills && sw.enabled {
            return Err(ConfigError::Unsupported {
                option: "constraints.allow_spills",
                reason: "together with software pipelining",
            });
        }
        if c.allow_spills && !self.absorb_spills {
            return Err(ConfigError::Unsupported {
                option: "constraints.allow_spills",
                reason: "without absorb_spills",
            });
        }
        if c.functional_only && (c.move_stalls_to_top || c.move_stalls_to_bottom) {
            return Err(ConfigError::Unsupported {
                option: "constraints.move_stalls_to_*",
                reason: "in functional-only mode",
            });
        }
        if c.functional_only && c.target_objective {
            return Err(ConfigError::Unsupported {
                option: "constraints.target_objective",
                reason: "in functional-only mode",
            });
        }
        if c.maximize_register_lifetimes && c.allow_spills {
            return Err(ConfigError::Unsupported {
                option: "constraints.maximize_register_lifetimes",
                reason: "together with spilling",
            });
        }

        for (register, value) in self.rename_inputs.iter().chain(&self.rename_outputs) {
            if let Renaming::Register(reg) = value {
                if !arch.is_architectural(reg) {
                    return Err(ConfigError::InvalidRenaming {
                        register: register.clone(),
                        value: reg.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::a64::A64;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate(&A64).is_ok());
        assert_eq!(config.objective(), None);
        assert!(config.locked(&A64).contains("sp"));
    }

    #[test]
    fn test_load_toml() {
        let config = Config::from_toml(
            r#"
            outputs = ["x2"]
            variable_size = true
            rename_inputs = { x0 = "x5", other = "any" }

            [sw_pipelining]
            enabled = true
            allow_post = true

            [constraints]
            stalls_allowed = 3
            minimize_register_usage = "gpr"
            allow_extra_registers = { gpr = 2 }
            "#,
        )
        .unwrap();
        assert_eq!(config.outputs, ["x2".to_string()].into_iter().collect());
        assert!(config.sw_pipelining.enabled);
        assert!(config.sw_pipelining.allow_pre);
        assert_eq!(config.constraints.stalls_allowed, 3);
        assert_eq!(
            config.rename_inputs.get("x0"),
            Some(&Renaming::Register("x5".to_string()))
        );
        assert_eq!(config.rename_inputs.get("other"), Some(&Renaming::Any));
        assert_eq!(config.objective(), Some(Goal::MinimizeRegisterUsage(RegType::Gpr)));
        assert_eq!(config.constraints.allow_extra_registers.get(&RegType::Gpr), Some(&2));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = Config::from_toml("stals_allowed = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_conflicting_objectives() {
        let mut config = Config::default();
        config.constraints.move_stalls_to_top = true;
        config.constraints.minimize_spills = true;
        let err = config.validate(&A64).unwrap_err();
        match err {
            ConfigError::ConflictingObjectives(goals) => assert_eq!(
                goals,
                vec!["move stalls to top".to_string(), "minimize spills".to_string()]
            ),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_ignore_objective() {
        let mut config = Config::default();
        config.constraints.move_stalls_to_top = true;
        config.ignore_objective = true;
        assert_eq!(config.objective(), None);
    }

    #[test]
    fn test_ranges() {
        let mut config = Config::default();
        config.constraints.max_displacement = 1.5;
        assert!(matches!(
            config.validate(&A64),
            Err(ConfigError::OutOfRange { option: "constraints.max_displacement", .. })
        ));

        let mut config = Config::default();
        config.sw_pipelining.unroll = 0;
        assert!(config.validate(&A64).is_err());
    }

    #[test]
    fn test_spills_with_pipelining_unsupported() {
        let mut config = Config::default();
        config.sw_pipelining.enabled = true;
        config.constraints.allow_spills = true;
        assert!(matches!(
            config.validate(&A64),
            Err(ConfigError::Unsupported { .. })
        ));

        let mut config = Config::default();
        config.constraints.allow_spills = true;
        config.absorb_spills = false;
        assert!(matches!(
            config.validate(&A64),
            Err(ConfigError::Unsupported { option: "constraints.allow_spills", .. })
        ));
    }

    #[test]
    fn test_invalid_renaming_value() {
        let mut config = Config::default();
        config
            .rename_outputs
            .insert("x1".to_string(), Renaming::Register("q7".to_string()));
        assert!(matches!(
            config.validate(&A64),
            Err(ConfigError::InvalidRenaming { .. })
        ));
    }

    #[test]
    fn test_copy_is_independent() {
        let config = Config::default();
        let mut other = config.with_outputs(["x3"]);
        other.constraints.stalls_allowed = 7;
        assert!(config.outputs.is_empty());
        assert_eq!(config.constraints.stalls_allowed, 0);
    }
}
