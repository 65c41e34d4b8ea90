// Common test utilities for data flow graph tests

use crate::common::source::SourceLine;
use crate::dataflow::{DataFlowGraph, DataflowConfig, DataflowError, NodeKey};
use crate::frontend::a64::A64;

pub fn config(outputs: &[&str]) -> DataflowConfig {
    DataflowConfig {
        outputs: outputs.iter().map(|s| s.to_string()).collect(),
        absorb_spills: true,
        ..DataflowConfig::default()
    }
}

pub fn build(src: &str, cfg: DataflowConfig) -> Result<DataFlowGraph, DataflowError> {
    DataFlowGraph::from_source(&A64, &SourceLine::parse_all(src), cfg)
}

#[track_caller]
pub fn build_ok(src: &str, outputs: &[&str]) -> DataFlowGraph {
    match build(src, config(outputs)) {
        Ok(dfg) => dfg,
        Err(e) => panic!("Expected graph to build, got: {}", e),
    }
}

pub fn edge(from: NodeKey, to: NodeKey, label: &str) -> (NodeKey, NodeKey, String) {
    (from, to, label.to_string())
}

pub fn input(reg: &str) -> NodeKey {
    NodeKey::Input(reg.to_string())
}

pub fn output(reg: &str) -> NodeKey {
    NodeKey::Output(reg.to_string())
}
