use super::common::*;
use crate::dataflow::{DataflowConfig, DataflowError, NodeKey, SourceKind, MAX_REBUILDS};
use crate::frontend::RegType;
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;

#[test]
fn test_linear_chain_edges() {
    let dfg = build_ok("add x1, x0, #1\nadd x2, x1, #1\n", &["x2"]);
    let expected: BTreeSet<_> = [
        edge(input("x0"), NodeKey::Real(0), "out0"),
        edge(NodeKey::Real(0), NodeKey::Real(1), "out0"),
        edge(NodeKey::Real(1), output("x2"), "out0"),
    ]
    .into_iter()
    .collect();
    assert_eq!(dfg.edges(), expected);
    assert_eq!(dfg.depth(), 2);
}

#[test]
fn test_in_out_edges_are_labelled() {
    let dfg = build_ok("mla v0, v1, v2\nmla v0, v1, v3\n", &["v0"]);
    let edges = dfg.edges();
    assert!(edges.contains(&edge(NodeKey::Real(0), NodeKey::Real(1), "inout0")));
    assert!(edges.contains(&edge(NodeKey::Real(1), output("v0"), "inout0")));
    assert!(edges.contains(&edge(input("v0"), NodeKey::Real(0), "out0")));
}

#[test]
fn test_reduce_follows_in_out_chain() {
    let dfg = build_ok("mla v0, v1, v2\nmla v0, v1, v3\n", &["v0"]);
    let out = dfg.node(dfg.output_ids()[0]);
    let src = out.src_in[0];
    assert_eq!(src.kind, SourceKind::InOut);
    let reduced = dfg.reduce(src);
    assert_eq!(reduced.kind, SourceKind::Out);
    assert!(dfg.node(reduced.node).is_virtual_input());
}

#[test]
fn test_useless_instruction_is_fatal() {
    let src = "add x1, x0, #1\nadd x2, x1, #1\nadd x5, x0, #3\n";
    match build(src, config(&["x2"])) {
        Err(DataflowError::UselessInstruction {
            line_no,
            registers,
            depends_on,
            other_lines,
            ..
        }) => {
            assert_eq!(line_no, 3);
            assert!(other_lines.is_empty());
            assert_eq!(registers, vec!["x5".to_string()]);
            assert_eq!(depends_on, vec!["x0".to_string()]);
        }
        other => panic!("Expected useless instruction error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_all_useless_instructions_are_reported() {
    let src = "add x1, x0, #1\nadd x6, x0, #4\nadd x2, x1, #1\nadd x5, x0, #3\n";
    match build(src, config(&["x2"])) {
        Err(DataflowError::UselessInstruction {
            line_no,
            other_lines,
            ..
        }) => {
            assert_eq!(line_no, 2);
            assert_eq!(other_lines, vec![4]);
        }
        other => panic!("Expected useless instruction error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_useless_instruction_can_be_allowed() {
    let src = "add x1, x0, #1\nadd x2, x1, #1\nadd x5, x0, #3\n";
    let cfg = DataflowConfig {
        allow_useless_instructions: true,
        ..config(&["x2"])
    };
    assert!(build(src, cfg).is_ok());
}

#[test]
fn test_useless_instruction_tag() {
    let src = "add x2, x0, #1\nadd x5, x0, #3 // @ignore_useless_output\n";
    assert!(build(src, config(&["x2"])).is_ok());
}

#[test]
fn test_ambiguous_parse_needs_hint() {
    let src = "add c, a, b\n";
    assert!(matches!(
        build(src, config(&["c"])),
        Err(DataflowError::AmbiguousParse { count: 2, .. })
    ));

    let mut cfg = config(&["c"]);
    cfg.typing_hints.insert("a".to_string(), RegType::Vector);
    let dfg = build(src, cfg).unwrap();
    assert_eq!(dfg.output_registers()["c"], RegType::Vector);
}

#[test]
fn test_register_state_disambiguates() {
    // `t` is known to be a vector after the first line
    let dfg = build_ok("mov t, v1\nadd u, t, t\n", &["u"]);
    let add = dfg.real_nodes().nth(1).unwrap();
    assert_eq!(add.inst.outs[0].ty, RegType::Vector);
}

#[test]
fn test_inputs_are_outputs_adds_live_ins() {
    let cfg = DataflowConfig {
        inputs_are_outputs: true,
        ..config(&[])
    };
    let dfg = build("ldr x1, [x0], #8\nadd x2, x2, x1\n", cfg).unwrap();
    let outputs: Vec<String> = dfg.output_registers().into_keys().collect();
    assert_eq!(outputs, vec!["x0".to_string(), "x2".to_string()]);
}

#[test]
fn test_spill_and_restore_are_absorbed() {
    let src = "add x1, x0, #1\n\
               str x1, [sp, #16] // @is_spill\n\
               add x1, x0, #2\n\
               ldr x3, [sp, #16] // @is_restore\n\
               add x4, x3, x1\n";
    let dfg = build(src, config(&["x4"])).unwrap();
    assert_eq!(dfg.len(), 3);
    let edges = dfg.edges();
    assert!(edges.contains(&edge(NodeKey::Real(0), NodeKey::Real(2), "out0")));
    assert!(edges.contains(&edge(NodeKey::Real(1), NodeKey::Real(2), "out0")));
}

#[test]
fn test_restore_without_spill() {
    let src = "ldr x3, [sp, #16] // @is_restore\nadd x4, x3, x3\n";
    assert!(matches!(
        build(src, config(&["x4"])),
        Err(DataflowError::UnknownSpillLocation { .. })
    ));
}

#[test]
fn test_ssa_keeps_outputs() {
    let mut dfg = build_ok("add x1, x0, #1\nadd x2, x1, #1\n", &["x2"]);
    dfg.ssa(|_, _| false);
    let insts = dfg.instructions();
    assert_eq!(insts[0].render(), "add ssa_0, x0, #1");
    assert_eq!(insts[1].render(), "add x2, ssa_0, #1");
}

#[test]
fn test_lock_prefix_suffix() {
    let mut dfg = build_ok(
        "add x1, x0, #1\nadd x2, x1, #1\nadd x3, x2, #1\nadd x4, x3, #1\n",
        &["x4"],
    );
    dfg.lock_prefix_suffix(1, 1);
    let locked: Vec<bool> = dfg.real_nodes().map(|t| t.is_locked).collect();
    assert_eq!(locked, vec![true, false, false, true]);
}

#[test]
fn test_stack_pointer_not_followed() {
    let dfg = build_ok("ldr x1, [sp, #8]\nadd x2, x1, x0\n", &["x2"]);
    let add = dfg.real_ids()[1];
    assert_eq!(
        dfg.input_dependencies(add, "x1"),
        BTreeSet::new(),
        "loads from the stack depend on nothing but sp"
    );
    assert_eq!(
        dfg.input_dependencies(add, "x0"),
        ["x0".to_string()].into_iter().collect()
    );
}

#[test]
fn test_rebuild_limit_is_large_enough() {
    let src: String = (0..20)
        .map(|_| "ldr x1, [x0], #8\nadd x2, x2, x1\n")
        .collect();
    let cfg = DataflowConfig {
        address_offset_fixup: true,
        ..config(&["x2"])
    };
    assert!(build(&src, cfg).is_ok());
    assert!(MAX_REBUILDS > 1);
}
