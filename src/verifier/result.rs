//! Optimization results
//!
//! Besides the optimized code, a result records where every original
//! instruction ended up. Positions "with bubbles" count issue slots, so they
//! may have gaps where the schedule stalls; in loop mode they may also fall
//! outside `[0, codesize_with_bubbles)` for instructions moved into the
//! previous or next iteration. The plain reorderings rank those positions
//! into permutations.

use crate::backend::SolveStatus;
use crate::common::perm::{invert, rank, Permutation};
use crate::common::source::SourceLine;
use crate::config::Config;
use crate::verifier::VerifyError;
use std::collections::BTreeMap;

/// Iteration an instruction of a software pipelined loop belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Executed one iteration ahead
    Pre,
    Core,
    /// Executed one iteration behind
    Post,
}

/// The outcome of one successful optimization
#[derive(Clone, Debug)]
pub struct OptimizationResult {
    pub(crate) config: Config,
    pub(crate) issue_rate: usize,
    pub(crate) orig_code: Vec<SourceLine>,
    pub(crate) code: Vec<SourceLine>,
    pub(crate) preamble: Vec<SourceLine>,
    pub(crate) postamble: Vec<SourceLine>,
    pub(crate) codesize_with_bubbles: i64,
    pub(crate) reordering_with_bubbles: BTreeMap<usize, i64>,
    pub(crate) placements: BTreeMap<usize, Placement>,
    pub(crate) input_renamings: BTreeMap<String, String>,
    pub(crate) output_renamings: BTreeMap<String, String>,
    pub(crate) kernel_input_output: Vec<String>,
    pub(crate) stalls: Option<i64>,
    pub(crate) status: SolveStatus,
    pub(crate) objective: Option<i64>,
    pub(crate) spills: usize,
}

impl OptimizationResult {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pipelined(&self) -> bool {
        self.config.sw_pipelining.enabled
    }

    /// Number of instructions in the original code (one loop body in loop mode)
    pub fn codesize(&self) -> usize {
        self.reordering_with_bubbles.len()
    }

    /// Issue slots used by the optimized code, stalls included
    pub fn codesize_with_bubbles(&self) -> i64 {
        self.codesize_with_bubbles
    }

    /// Stall cycles, when the code size was a solver variable
    pub fn stalls(&self) -> Option<i64> {
        self.stalls
    }

    pub fn status(&self) -> SolveStatus {
        self.status
    }

    /// Value of the secondary objective, if there was one
    pub fn objective(&self) -> Option<i64> {
        self.objective
    }

    /// Number of values spilled to the stack
    pub fn spills(&self) -> usize {
        self.spills
    }

    pub fn placement(&self, i: usize) -> Placement {
        self.placements.get(&i).copied().unwrap_or(Placement::Core)
    }

    pub fn is_pre(&self, i: usize) -> bool {
        self.placement(i) == Placement::Pre
    }

    pub fn is_core(&self, i: usize) -> bool {
        self.placement(i) == Placement::Core
    }

    pub fn is_post(&self, i: usize) -> bool {
        self.placement(i) == Placement::Post
    }

    fn count(&self, p: Placement) -> usize {
        self.placements.values().filter(|&&q| q == p).count()
    }

    pub fn num_pre(&self) -> usize {
        self.count(Placement::Pre)
    }

    pub fn num_core(&self) -> usize {
        self.codesize() - self.num_pre() - self.num_post()
    }

    pub fn num_post(&self) -> usize {
        self.count(Placement::Post)
    }

    /// Instructions moved across iterations, a measure of interleaving
    pub fn num_prepost(&self) -> usize {
        self.num_pre() + self.num_post()
    }

    /// Iterations executed by preamble and postamble instead of the kernel
    pub fn num_exceptional_iterations(&self) -> usize {
        let (pre, post) = (self.num_pre() > 0, self.num_post() > 0);
        usize::from(pre || post) + usize::from(pre && post)
    }

    /// Issue cycle of every instruction
    pub fn cycle_position_with_bubbles(&self) -> BTreeMap<usize, i64> {
        let ir = self.issue_rate.max(1) as i64;
        self.reordering_with_bubbles
            .iter()
            .map(|(&k, &v)| (k, v.div_euclid(ir)))
            .collect()
    }

    pub fn reordering_with_bubbles(&self) -> &BTreeMap<usize, i64> {
        &self.reordering_with_bubbles
    }

    /// Positions with bubbles of `copies` consecutive iterations
    pub fn get_reordering_with_bubbles(&self, copies: usize) -> BTreeMap<usize, i64> {
        let n = self.codesize();
        let h = self.codesize_with_bubbles;
        (0..copies)
            .flat_map(|k| {
                self.reordering_with_bubbles
                    .iter()
                    .map(move |(&i, &p)| (i + k * n, k as i64 * h + p))
            })
            .collect()
    }

    /// Like [`Self::get_reordering_with_bubbles`], with early and late
    /// instructions wrapped around into the window of `copies` iterations
    pub fn get_periodic_reordering_with_bubbles(&self, copies: usize) -> BTreeMap<usize, i64> {
        let mut res = self.get_reordering_with_bubbles(copies);
        if !self.pipelined() || copies == 0 {
            return res;
        }
        let n = self.codesize();
        let shift = copies as i64 * self.codesize_with_bubbles;
        for (&i, &p) in &self.placements {
            match p {
                Placement::Pre => {
                    if let Some(v) = res.get_mut(&i) {
                        *v += shift;
                    }
                }
                Placement::Post => {
                    if let Some(v) = res.get_mut(&((copies - 1) * n + i)) {
                        *v -= shift;
                    }
                }
                Placement::Core => {}
            }
        }
        res
    }

    pub fn get_periodic_reordering_with_bubbles_inv(&self, copies: usize) -> BTreeMap<i64, usize> {
        self.get_periodic_reordering_with_bubbles(copies)
            .into_iter()
            .map(|(k, v)| (v, k))
            .collect()
    }

    pub fn get_periodic_reordering(&self, copies: usize) -> Permutation {
        rank(&self.get_periodic_reordering_with_bubbles(copies))
    }

    pub fn get_periodic_reordering_inv(&self, copies: usize) -> Permutation {
        invert(&self.get_periodic_reordering(copies))
    }

    /// Positions of `copies` iterations in the fully unrolled optimized loop
    ///
    /// Early instructions of the first iteration land in the preamble and
    /// late instructions of the last iteration in the postamble. Without
    /// `no_gaps` the result keeps the shifted positions unranked.
    pub fn get_reordering(&self, copies: usize, no_gaps: bool) -> BTreeMap<usize, i64> {
        let mut res: BTreeMap<usize, i64> = self
            .get_periodic_reordering(copies)
            .into_iter()
            .map(|(k, v)| (k, v as i64))
            .collect();
        if !self.pipelined() || copies == 0 {
            return res;
        }
        let n = self.codesize();
        let shift = (copies * n) as i64;
        for (&i, &p) in &self.placements {
            match p {
                Placement::Pre => {
                    if let Some(v) = res.get_mut(&i) {
                        *v -= shift;
                    }
                }
                Placement::Post => {
                    if let Some(v) = res.get_mut(&((copies - 1) * n + i)) {
                        *v += shift;
                    }
                }
                Placement::Core => {}
            }
        }
        if no_gaps {
            rank(&res).into_iter().map(|(k, v)| (k, v as i64)).collect()
        } else {
            res
        }
    }

    /// Reordering of one iteration, without gaps
    pub fn reordering(&self) -> Permutation {
        rank(&self.get_reordering(1, true))
    }

    pub fn reordering_inv(&self) -> Permutation {
        invert(&self.reordering())
    }

    pub fn periodic_reordering(&self) -> Permutation {
        self.get_periodic_reordering(1)
    }

    pub fn periodic_reordering_inv(&self) -> Permutation {
        self.get_periodic_reordering_inv(1)
    }

    /// Issue slots of the kernel left empty
    pub fn stall_positions(&self) -> Vec<i64> {
        let used = self.get_periodic_reordering_with_bubbles_inv(1);
        (0..self.codesize_with_bubbles)
            .filter(|i| !used.contains_key(i))
            .collect()
    }

    pub fn orig_code(&self) -> &[SourceLine] {
        &self.orig_code
    }

    /// Optimized code; the loop kernel in loop mode
    pub fn code(&self) -> &[SourceLine] {
        &self.code
    }

    pub fn preamble(&self) -> Result<&[SourceLine], VerifyError> {
        self.require_pipelining("preamble")?;
        Ok(&self.preamble)
    }

    pub fn postamble(&self) -> Result<&[SourceLine], VerifyError> {
        self.require_pipelining("postamble")?;
        Ok(&self.postamble)
    }

    pub fn kernel(&self) -> Result<&[SourceLine], VerifyError> {
        self.require_pipelining("kernel")?;
        Ok(&self.code)
    }

    /// Registers live into the kernel
    pub fn kernel_input_output(&self) -> Result<&[String], VerifyError> {
        self.require_pipelining("kernel input/output")?;
        Ok(&self.kernel_input_output)
    }

    fn require_pipelining(&self, what: &'static str) -> Result<(), VerifyError> {
        if self.pipelined() {
            Ok(())
        } else {
            Err(VerifyError::NotPipelined(what))
        }
    }

    pub fn input_renamings(&self) -> &BTreeMap<String, String> {
        &self.input_renamings
    }

    pub fn output_renamings(&self) -> &BTreeMap<String, String> {
        &self.output_renamings
    }

    /// Input registers of the optimized code
    pub fn inputs(&self) -> Vec<String> {
        self.input_renamings.values().cloned().collect()
    }

    /// Output registers of the optimized code
    pub fn outputs(&self) -> Vec<String> {
        self.output_renamings.values().cloned().collect()
    }

    pub fn orig_inputs(&self) -> Vec<String> {
        self.input_renamings.keys().cloned().collect()
    }

    pub fn orig_outputs(&self) -> Vec<String> {
        self.output_renamings.keys().cloned().collect()
    }

    /// Original and optimized code of `iterations` loop iterations
    pub fn get_fully_unrolled_loop(&self, iterations: usize) -> (Vec<SourceLine>, Vec<SourceLine>) {
        let old: Vec<SourceLine> = (0..iterations).flat_map(|_| self.orig_code.clone()).collect();
        let kernel_copies = iterations.saturating_sub(self.num_exceptional_iterations());
        let mut new = self.preamble.clone();
        for _ in 0..kernel_copies {
            new.extend(self.code.iter().cloned());
        }
        new.extend(self.postamble.iter().cloned());
        (old, new)
    }

    pub fn get_unrolled_kernel(&self, iterations: usize) -> Vec<SourceLine> {
        (0..iterations).flat_map(|_| self.code.clone()).collect()
    }

    /// Instruction lines of the kernel, spill code excluded
    fn scheduled_lines(&self) -> Vec<&SourceLine> {
        self.code
            .iter()
            .filter(|l| !l.has_flag("is_spill") && !l.has_flag("is_restore"))
            .collect()
    }

    /// The kernel annotated with the original position of every instruction
    ///
    /// One line per issue slot: stalls appear as gap lines, and each
    /// instruction carries a marker at its original position, `*` for core,
    /// `e` for early and `l` for late instructions.
    pub fn visualized(&self) -> Vec<String> {
        let n = self.codesize();
        let at = self.get_periodic_reordering_with_bubbles_inv(1);
        let order = self.periodic_reordering();
        let lines = self.scheduled_lines();
        let width = lines.iter().map(|l| l.text.len()).max().unwrap_or(0) + 8;

        let mut out = Vec::new();
        for slot in 0..self.codesize_with_bubbles {
            let Some(&p) = at.get(&slot) else {
                out.push(format!("{:<width$} // {}", "// gap", ".".repeat(n), width = width));
                continue;
            };
            let Some(line) = order.get(&p).and_then(|&i| lines.get(i)) else {
                continue;
            };
            let mark = match self.placement(p) {
                Placement::Pre => 'e',
                Placement::Core => '*',
                Placement::Post => 'l',
            };
            let vis: String = (0..n).map(|j| if j == p { mark } else { '.' }).collect();
            out.push(format!("{:<width$} // {}", line.text, vis, width = width));
        }
        out
    }
}

#[cfg(test)]
impl OptimizationResult {
    /// A result with empty renamings, for tests of the derived views
    pub(crate) fn from_parts(
        config: Config,
        orig_code: Vec<SourceLine>,
        code: Vec<SourceLine>,
        positions: &[i64],
        placements: &[Placement],
        codesize_with_bubbles: i64,
    ) -> Self {
        OptimizationResult {
            config,
            issue_rate: 1,
            orig_code,
            code,
            preamble: Vec::new(),
            postamble: Vec::new(),
            codesize_with_bubbles,
            reordering_with_bubbles: positions.iter().copied().enumerate().collect(),
            placements: placements.iter().copied().enumerate().collect(),
            input_renamings: BTreeMap::new(),
            output_renamings: BTreeMap::new(),
            kernel_input_output: Vec::new(),
            stalls: None,
            status: SolveStatus::Optimal,
            objective: None,
            spills: 0,
        }
    }
}
