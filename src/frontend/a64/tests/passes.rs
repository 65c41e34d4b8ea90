use crate::common::source::SourceLine;
use crate::dataflow::{DataFlowGraph, DataflowConfig, NodeKey};
use crate::frontend::a64::A64;
use pretty_assertions::assert_eq;

fn config(outputs: &[&str]) -> DataflowConfig {
    DataflowConfig {
        outputs: outputs.iter().map(|s| s.to_string()).collect(),
        ..DataflowConfig::default()
    }
}

#[test]
fn test_lane_fusion_drops_stale_dependency() {
    let src = SourceLine::parse_all("ins v0.d[0], x1\nins v0.d[1], x2\n");
    let dfg = DataFlowGraph::from_source(&A64, &src, config(&["v0"])).unwrap();

    let first = dfg.real_nodes().next().unwrap();
    assert_eq!(first.inst.num_in_out(), 0);
    assert_eq!(first.inst.render(), "ins v0.d[0], x1");
    assert!(!dfg.input_registers().contains_key("v0"));
    assert!(dfg
        .edges()
        .contains(&(NodeKey::Real(0), NodeKey::Real(1), "out0".to_string())));
}

#[test]
fn test_lane_fusion_needs_both_lanes() {
    let src = SourceLine::parse_all("ins v0.d[0], x1\n");
    let dfg = DataFlowGraph::from_source(&A64, &src, config(&["v0"])).unwrap();
    assert!(dfg.input_registers().contains_key("v0"));
}

#[test]
fn test_address_relaxation() {
    let src = SourceLine::parse_all("ldr x1, [x0], #8\nldr x2, [x0], #8\nadd x3, x1, x2\n");
    let cfg = DataflowConfig {
        address_offset_fixup: true,
        ..config(&["x3"])
    };
    let dfg = DataFlowGraph::from_source(&A64, &src, cfg).unwrap();
    for node in dfg.real_nodes().take(2) {
        assert_eq!(node.inst.num_in_out(), 0);
        assert_eq!(node.inst.addr(), Some("x0"));
        assert_eq!(node.inst.args_in_out_different, vec![(0, 0)]);
    }
    // both loads now read the original pointer
    let edges = dfg.edges();
    let from_input: Vec<_> = edges
        .iter()
        .filter(|(src, _, _)| *src == NodeKey::Input("x0".to_string()))
        .collect();
    assert_eq!(from_input.len(), 2);
}
