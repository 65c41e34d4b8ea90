//! The superoptimizer core
//!
//! One [`Optimizer`] runs one optimization: build the data flow graph of the
//! input, turn it into a constraint model, solve it, read the solution back
//! into code and prove the result equivalent to the input.
//!
//! Solver infeasibility is not an error. [`Optimizer::optimize`] returns
//! `Ok(None)` so callers can retry with more stalls; everything else that
//! goes wrong is an [`OptimizeError`].

mod builder;
mod error;
mod extract;
pub mod renaming;

#[cfg(test)]
mod tests;

use crate::backend::{Backend, LinearExpr, Sense, SolveParams, Solution, Z3Backend};
use crate::common::source::SourceLine;
use crate::config::Config;
use crate::dataflow::DataFlowGraph;
use crate::frontend::Architecture;
use crate::target::Target;
use crate::verifier::{offset_fixup, selfcheck_with_fixup, OptimizationResult};
use builder::{BuiltModel, ModelBuilder};
use extract::Extractor;
use log::{info, warn};
use renaming::{apply_static_renaming, RegisterPools};

pub use error::OptimizeError;

pub struct Optimizer<'a, B: Backend = Z3Backend> {
    arch: &'a dyn Architecture,
    target: &'a dyn Target,
    config: Config,
    backend: B,
    used: bool,
}

impl<'a> Optimizer<'a, Z3Backend> {
    pub fn new(arch: &'a dyn Architecture, target: &'a dyn Target, config: Config) -> Self {
        Self::with_backend(arch, target, config, Z3Backend)
    }
}

impl<'a, B: Backend> Optimizer<'a, B> {
    pub fn with_backend(
        arch: &'a dyn Architecture,
        target: &'a dyn Target,
        config: Config,
        backend: B,
    ) -> Self {
        Optimizer {
            arch,
            target,
            config,
            backend,
            used: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Optimize straight-line code, or a loop body in loop mode
    pub fn optimize(
        &mut self,
        source: &[SourceLine],
    ) -> Result<Option<OptimizationResult>, OptimizeError> {
        self.optimize_with_locks(source, 0, 0)
    }

    /// Optimize, keeping the first `prefix` and last `suffix` instructions in place
    pub fn optimize_with_locks(
        &mut self,
        source: &[SourceLine],
        prefix: usize,
        suffix: usize,
    ) -> Result<Option<OptimizationResult>, OptimizeError> {
        if self.used {
            return Err(OptimizeError::AlreadyUsed);
        }
        self.used = true;

        let config = &self.config;
        config.validate(self.arch)?;
        let pipelining = config.sw_pipelining.enabled;

        let body: Vec<SourceLine> = if pipelining {
            (0..config.sw_pipelining.unroll)
                .flat_map(|_| source.iter().cloned())
                .collect()
        } else {
            source.to_vec()
        };
        let model_source: Vec<SourceLine> = if pipelining {
            body.iter().chain(&body).cloned().collect()
        } else {
            body.clone()
        };

        let mut dfg =
            DataFlowGraph::from_source(self.arch, &model_source, config.dataflow_config(self.arch))?;
        if prefix > 0 || suffix > 0 {
            if pipelining {
                return Err(OptimizeError::LockedRegionInLoop);
            }
            dfg.lock_prefix_suffix(prefix, suffix);
        }

        let pools = RegisterPools::new(self.arch, config);
        apply_static_renaming(&mut dfg, self.arch, config, &pools)?;

        let mut built = ModelBuilder::new(self.arch, self.target, config, &pools, &dfg).build()?;
        let Some(solution) = self.solve(&mut built)? else {
            info!("no solution");
            return Ok(None);
        };

        let config = &self.config;
        let extractor = Extractor::new(
            self.arch,
            config,
            self.target.issue_rate(),
            &dfg,
            &built,
            &solution,
        );
        let mut result = extractor.extract(body)?;
        selfcheck_with_fixup(&mut result, self.arch)?;
        if config.do_address_fixup && config.address_offset_fixup {
            offset_fixup(&mut result, self.arch)?;
        }
        info!(
            "optimized {} instructions into {} slots",
            result.codesize(),
            result.codesize_with_bubbles()
        );
        Ok(Some(result))
    }

    /// Solve the model; with a variable size, stalls are minimized first
    /// and the secondary objective is optimized for the minimal stall count.
    fn solve(&mut self, built: &mut BuiltModel) -> Result<Option<Solution>, OptimizeError> {
        let params = SolveParams {
            timeout: self.config.timeout(),
            random_seed: self.config.random_seed,
        };

        let Some(stalls) = built.pad.stalls else {
            match built.objective.clone() {
                Some(obj) => {
                    info!("objective: {}", obj.name);
                    set_objective(built, obj.sense, obj.expr);
                }
                None => built.model.clear_objective(),
            }
            let solution = self.backend.solve(&built.model, &params)?;
            info!(
                "{}: {:?}, objective {:?}, {:.2?}",
                self.backend.name(),
                solution.status,
                solution.objective,
                solution.wall_time
            );
            return Ok(solution.status.has_solution().then_some(solution));
        };

        built.model.minimize(stalls);
        let first = self.backend.solve(&built.model, &params)?;
        info!(
            "{}: {:?} with {} stalls, {:.2?}",
            self.backend.name(),
            first.status,
            first.value(stalls),
            first.wall_time
        );
        if !first.status.has_solution() {
            return Ok(None);
        }
        let Some(obj) = built.objective.clone() else {
            return Ok(Some(first));
        };

        info!("objective: {} at {} stalls", obj.name, first.value(stalls));
        built
            .model
            .add_linear_constraint(LinearExpr::from(stalls).eq(first.value(stalls)));
        set_objective(built, obj.sense, obj.expr);
        let second = self.backend.solve(&built.model, &params)?;
        if second.status.has_solution() {
            info!("{}: {:?}, objective {:?}", self.backend.name(), second.status, second.objective);
            Ok(Some(second))
        } else {
            warn!("no solution for the secondary objective, keeping the stall-minimal one");
            Ok(Some(first))
        }
    }
}

fn set_objective(built: &mut BuiltModel, sense: Sense, expr: LinearExpr) {
    match sense {
        Sense::Minimize => built.model.minimize(expr),
        Sense::Maximize => built.model.maximize(expr),
    }
}
