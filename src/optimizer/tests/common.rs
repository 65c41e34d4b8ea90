// Common test utilities for end-to-end optimizer tests

use crate::common::source::SourceLine;
use crate::config::Config;
use crate::frontend::a64::A64;
use crate::frontend::{Architecture, RegFilter, RegType};
use crate::optimizer::{OptimizeError, Optimizer};
use crate::target::InOrderDual;
use crate::verifier::OptimizationResult;
use std::collections::BTreeSet;

pub fn config(outputs: &[&str]) -> Config {
    Config::default().with_outputs(outputs.iter().copied())
}

pub fn optimize(src: &str, config: Config) -> Result<Option<OptimizationResult>, OptimizeError> {
    Optimizer::new(&A64, &InOrderDual, config).optimize(&SourceLine::parse_all(src))
}

#[track_caller]
pub fn optimize_ok(src: &str, config: Config) -> OptimizationResult {
    match optimize(src, config) {
        Ok(Some(result)) => result,
        Ok(None) => panic!("Expected a solution, the model is infeasible"),
        Err(e) => panic!("Expected a solution, got: {}", e),
    }
}

pub fn texts(lines: &[SourceLine]) -> Vec<String> {
    lines.iter().map(|l| l.text.clone()).collect()
}

/// Every general purpose register except `keep`
pub fn all_gprs_except(keep: &[&str]) -> BTreeSet<String> {
    A64.list_registers(RegType::Gpr, RegFilter::All)
        .into_iter()
        .filter(|r| !keep.contains(&r.as_str()))
        .collect()
}

/// Destination register of a rendered `add`
pub fn destination(line: &str) -> String {
    line.trim_start_matches("add ")
        .split(',')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}
