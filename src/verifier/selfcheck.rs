//! Dataflow self-check
//!
//! The optimized code must compute the same data flow graph as the original
//! code, up to the recorded reordering and register renaming. Loops are
//! compared over several fully unrolled iterations so that dependencies
//! between preamble, kernel and postamble are covered.

use super::fixup::fixup_preamble_postamble;
use super::{OptimizationResult, VerifyError};
use crate::common::perm::{is_permutation, strict_rank, to_positions, Permutation};
use crate::common::source::SourceLine;
use crate::dataflow::{DataFlowGraph, DataflowConfig, Edge, NodeKey};
use crate::frontend::Architecture;
use log::{debug, error, warn};
use std::collections::BTreeSet;

/// Loop iterations unrolled when checking a software pipelined result
pub const SELFCHECK_ITERATIONS: usize = 5;

impl OptimizationResult {
    /// The reordering the self-check is based on, covering all checked iterations
    pub(crate) fn checked_reordering(&self) -> Result<Permutation, VerifyError> {
        self.reordering_over(SELFCHECK_ITERATIONS)
    }

    /// Original and optimized code matching [`Self::checked_reordering`]
    pub(crate) fn checked_code(&self) -> (Vec<SourceLine>, Vec<SourceLine>) {
        self.code_over(SELFCHECK_ITERATIONS)
    }

    /// Reordering of `iterations` unrolled loop iterations, or of the code
    /// itself for straight-line results
    fn reordering_over(&self, iterations: usize) -> Result<Permutation, VerifyError> {
        let iterations = if self.pipelined() { iterations } else { 1 };
        let len = iterations * self.codesize();
        // distinct instructions must occupy distinct slots before ranking
        let slots = self.get_periodic_reordering_with_bubbles(iterations);
        if strict_rank(&slots).is_none() {
            return Err(VerifyError::NotAPermutation { len });
        }
        let perm = if self.pipelined() {
            to_positions(&self.get_reordering(iterations, true))
                .ok_or(VerifyError::NotAPermutation { len })?
        } else {
            self.reordering()
        };
        if !is_permutation(&perm, len) {
            return Err(VerifyError::NotAPermutation { len });
        }
        Ok(perm)
    }

    fn code_over(&self, iterations: usize) -> (Vec<SourceLine>, Vec<SourceLine>) {
        if self.pipelined() {
            self.get_fully_unrolled_loop(iterations)
        } else {
            (self.orig_code.clone(), self.code.clone())
        }
    }

    /// Graph options for rebuilding generated code
    pub(crate) fn dataflow_config<S: Into<String>>(
        &self,
        arch: &dyn Architecture,
        outputs: impl IntoIterator<Item = S>,
    ) -> DataflowConfig {
        let mut cfg = self.config.dataflow_config(arch);
        cfg.outputs = outputs.into_iter().map(Into::into).collect();
        cfg.allow_useless_instructions = true;
        cfg
    }

    fn rekey(&self, key: NodeKey, perm: &Permutation) -> NodeKey {
        match key {
            NodeKey::Real(i) => NodeKey::Real(perm.get(&i).copied().unwrap_or(i)),
            NodeKey::Input(r) => {
                NodeKey::Input(self.input_renamings.get(&r).cloned().unwrap_or(r))
            }
            NodeKey::Output(r) => {
                NodeKey::Output(self.output_renamings.get(&r).cloned().unwrap_or(r))
            }
        }
    }
}

/// Compare the data flow graphs of original and optimized code
pub fn selfcheck(result: &OptimizationResult, arch: &dyn Architecture) -> Result<(), VerifyError> {
    selfcheck_unrolled(result, arch, SELFCHECK_ITERATIONS)
}

/// [`selfcheck`] over a chosen number of loop iterations
///
/// Straight-line results ignore `iterations`.
pub fn selfcheck_unrolled(
    result: &OptimizationResult,
    arch: &dyn Architecture,
    iterations: usize,
) -> Result<(), VerifyError> {
    let perm = result.reordering_over(iterations)?;
    let (old, new) = result.code_over(iterations);

    let old_dfg =
        DataFlowGraph::from_source(arch, &old, result.dataflow_config(arch, result.orig_outputs()))?;
    let new_dfg =
        DataFlowGraph::from_source(arch, &new, result.dataflow_config(arch, result.outputs()))?;

    let old_edges: BTreeSet<Edge> = old_dfg
        .edges()
        .into_iter()
        .map(|(p, c, label)| (result.rekey(p, &perm), result.rekey(c, &perm), label))
        .collect();
    let new_edges = new_dfg.edges();

    if old_edges == new_edges {
        debug!("self-check passed");
        return Ok(());
    }

    let old_not_new: Vec<Edge> = old_edges.difference(&new_edges).cloned().collect();
    let new_not_old: Vec<Edge> = new_edges.difference(&old_edges).cloned().collect();
    for (p, c, label) in &old_not_new {
        error!("self-check: edge {} -> {} ({}) is missing in the optimized code", p, c, label);
    }
    for (p, c, label) in &new_not_old {
        error!("self-check: edge {} -> {} ({}) is new in the optimized code", p, c, label);
    }
    Err(VerifyError::SelfCheck {
        old_not_new,
        new_not_old,
    })
}

/// Self-check, repairing preamble and postamble of loops if needed
///
/// A failed check is only reported as an error if self-checking is enabled
/// in the configuration.
pub fn selfcheck_with_fixup(
    result: &mut OptimizationResult,
    arch: &dyn Architecture,
) -> Result<(), VerifyError> {
    let outcome = match selfcheck(result, arch) {
        Err(err) if result.pipelined() => {
            debug!("self-check failed ({}), fixing up preamble and postamble", err);
            fixup_preamble_postamble(result, arch)?;
            selfcheck(result, arch)
        }
        other => other,
    };
    match outcome {
        Err(err @ VerifyError::SelfCheck { .. }) if !result.config.selfcheck => {
            warn!("ignoring failed self-check: {}", err);
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::frontend::a64::A64;
    use pretty_assertions::assert_eq;

    fn straight_line(orig: &str, code: &str, positions: &[i64], outputs: &[&str]) -> OptimizationResult {
        let mut r = OptimizationResult::from_parts(
            Config::default(),
            SourceLine::parse_all(orig),
            SourceLine::parse_all(code),
            positions,
            &[],
            positions.len() as i64,
        );
        r.input_renamings = [("x0".to_string(), "x0".to_string())].into_iter().collect();
        r.output_renamings = outputs.iter().map(|o| (o.to_string(), o.to_string())).collect();
        r
    }

    #[test]
    fn test_independent_swap_passes() {
        let r = straight_line(
            "add x1, x0, #1\nadd x2, x0, #2\n",
            "add x2, x0, #2\nadd x1, x0, #1\n",
            &[1, 0],
            &["x1", "x2"],
        );
        assert_eq!(selfcheck(&r, &A64), Ok(()));
    }

    #[test]
    fn test_shared_slot_is_rejected() {
        let r = straight_line(
            "add x1, x0, #1\nadd x2, x0, #2\n",
            "add x1, x0, #1\n",
            &[3, 3],
            &["x1", "x2"],
        );
        assert_eq!(
            r.checked_reordering(),
            Err(VerifyError::NotAPermutation { len: 2 })
        );
        assert_eq!(selfcheck(&r, &A64), Err(VerifyError::NotAPermutation { len: 2 }));
    }

    #[test]
    fn test_shared_kernel_slot_in_loop_is_rejected() {
        use crate::verifier::Placement::*;
        let mut config = Config::default();
        config.sw_pipelining.enabled = true;
        // the early instruction wraps onto the slot of the first one
        let r = OptimizationResult::from_parts(
            config,
            SourceLine::parse_all("add x1, x0, #1\nadd x2, x0, #2\n"),
            SourceLine::parse_all("add x1, x0, #1\nadd x2, x0, #2\n"),
            &[0, -4],
            &[Core, Pre],
            2,
        );
        assert_eq!(
            r.checked_reordering(),
            Err(VerifyError::NotAPermutation { len: 2 * SELFCHECK_ITERATIONS })
        );
    }

    #[test]
    fn test_broken_dependency_fails() {
        let mut r = straight_line(
            "add x1, x0, #1\nadd x2, x1, #2\n",
            "add x2, x1, #2\nadd x1, x0, #1\n",
            &[1, 0],
            &["x2"],
        );
        match selfcheck(&r, &A64) {
            Err(VerifyError::SelfCheck { old_not_new, .. }) => {
                assert!(old_not_new.contains(&(NodeKey::Real(1), NodeKey::Real(0), "out0".to_string())));
            }
            other => panic!("unexpected self-check outcome {:?}", other),
        }

        r.config.selfcheck = false;
        assert_eq!(selfcheck_with_fixup(&mut r, &A64), Ok(()));
    }

    #[test]
    fn test_renamed_registers() {
        let mut r = straight_line(
            "add tmp, x0, #1\nadd out, tmp, #2\n",
            "add x7, x0, #1\nadd x3, x7, #2\n",
            &[0, 1],
            &["out"],
        );
        r.output_renamings = [("out".to_string(), "x3".to_string())].into_iter().collect();
        assert_eq!(selfcheck(&r, &A64), Ok(()));

        r.output_renamings = [("out".to_string(), "x4".to_string())].into_iter().collect();
        assert!(matches!(selfcheck(&r, &A64), Err(VerifyError::SelfCheck { .. })));
    }

    #[test]
    fn test_spill_lines_are_transparent() {
        let r = straight_line(
            "add x1, x0, #1\nadd x2, x1, #2\n",
            "add x1, x0, #1\n\
             str x1, [sp, #16] // @is_spill\n\
             ldr x5, [sp, #16] // @is_restore\n\
             add x2, x5, #2\n",
            &[0, 1],
            &["x2"],
        );
        assert_eq!(selfcheck(&r, &A64), Ok(()));
    }
}
