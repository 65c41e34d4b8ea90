use super::common::*;
use crate::common::perm::identity;
use crate::common::source::SourceLine;
use crate::dataflow::DataflowError;
use crate::frontend::a64::A64;
use crate::optimizer::{OptimizeError, Optimizer};
use crate::target::InOrderDual;
use pretty_assertions::assert_eq;

#[test]
fn test_fixed_chain_is_unchanged() {
    let mut cfg = config(&["x2"]);
    cfg.constraints.allow_reordering = false;
    cfg.constraints.allow_renaming = false;
    cfg.constraints.stalls_allowed = 1;

    let r = optimize_ok("add x1, x0, #1\nadd x2, x1, #1\n", cfg);
    assert_eq!(texts(r.code()), vec!["add x1, x0, #1", "add x2, x1, #1"]);
    assert_eq!(r.reordering(), identity(2));
    assert_eq!(r.input_renamings().get("x0").map(String::as_str), Some("x0"));
    assert_eq!(r.output_renamings().get("x2").map(String::as_str), Some("x2"));
}

#[test]
fn test_reordering_disabled_keeps_order() {
    let mut cfg = config(&["x2"]);
    cfg.constraints.allow_reordering = false;
    cfg.constraints.stalls_allowed = 1;

    let r = optimize_ok("add x1, x0, #1\nadd x2, x1, #1\n", cfg);
    let code = texts(r.code());
    assert_eq!(r.reordering(), identity(2));
    assert_eq!(destination(&code[1]), "x2");
    assert_eq!(code[1], format!("add x2, {}, #1", destination(&code[0])));
}

#[test]
fn test_already_optimal_code_is_idempotent() {
    let mut cfg = config(&["x0"]);
    cfg.inputs_are_outputs = true;
    cfg.constraints.allow_reordering = false;
    cfg.constraints.allow_renaming = false;

    let r = optimize_ok("add x0, x0, #1\n", cfg);
    assert_eq!(texts(r.code()), vec!["add x0, x0, #1"]);
    assert_eq!(r.reordering(), identity(1));
}

#[test]
fn test_load_latency_is_respected() {
    let src = "ldr x1, [x0]\nadd x2, x1, #1\nadd x3, x4, #1\n";
    let mut cfg = config(&["x2", "x3"]);
    cfg.constraints.stalls_allowed = 2;

    let r = optimize_ok(src, cfg);
    let cycles = r.cycle_position_with_bubbles();
    assert!(
        cycles[&1] - cycles[&0] >= 3,
        "load result used too early: {:?}",
        cycles
    );
    assert_eq!(r.code().len(), 3);
}

#[test]
fn test_too_few_stalls_is_infeasible() {
    let src = "ldr x1, [x0]\nadd x2, x1, #1\nadd x3, x4, #1\n";
    let cfg = config(&["x2", "x3"]);
    assert!(matches!(optimize(src, cfg), Ok(None)));
}

#[test]
fn test_variable_size_finds_minimal_stalls() {
    let src = "ldr x1, [x0]\nadd x2, x1, #1\nadd x3, x4, #1\n";
    let mut cfg = config(&["x2", "x3"]);
    cfg.variable_size = true;
    cfg.constraints.stalls_allowed = 4;

    let r = optimize_ok(src, cfg);
    assert_eq!(r.stalls(), Some(2));
}

fn minimal_stalls(src: &str, outputs: &[&str]) -> Option<i64> {
    let mut cfg = config(outputs);
    cfg.variable_size = true;
    cfg.constraints.stalls_allowed = 6;
    optimize_ok(src, cfg).stalls()
}

#[test]
fn test_accumulator_forwarding_shortens_mla_chain() {
    // the second mla only needs the accumulator of the first
    let chained = minimal_stalls("mla v0, v1, v2\nmla v0, v1, v3\n", &["v0"]);
    // here the product feeds a multiplicand and waits the full latency
    let plain = minimal_stalls("mla v0, v1, v2\nmla v4, v0, v3\n", &["v4"]);
    assert_eq!(plain, Some(4));
    assert!(
        matches!((chained, plain), (Some(c), Some(p)) if c < p),
        "forwarded {:?}, plain {:?}",
        chained,
        plain
    );
}

#[test]
fn test_functional_only_ignores_latencies() {
    let mut cfg = config(&["x2"]);
    cfg.constraints.functional_only = true;

    let r = optimize_ok("add x1, x0, #1\nadd x2, x1, #1\n", cfg);
    assert_eq!(r.reordering(), identity(2));
}

#[test]
fn test_locked_prefix_and_suffix_stay_in_place() {
    let src = "add x1, x0, #1\nadd x2, x0, #2\nadd x3, x0, #3\n";
    let mut cfg = config(&["x1", "x2", "x3"]);
    cfg.constraints.stalls_allowed = 1;

    let mut opt = Optimizer::new(&A64, &InOrderDual, cfg);
    let r = match opt.optimize_with_locks(&SourceLine::parse_all(src), 1, 1) {
        Ok(Some(r)) => r,
        other => panic!("expected a solution, got {:?}", other.map(|r| r.is_some())),
    };
    assert_eq!(r.reordering(), identity(3));
}

#[test]
fn test_source_annotation_forces_order() {
    let src = "add x1, x0, #1 // @id=first\nadd x2, x0, #2 // @before=first\n";
    let r = optimize_ok(src, config(&["x1", "x2"]));
    assert_eq!(r.reordering(), [(0, 1), (1, 0)].into_iter().collect());
}

#[test]
fn test_optimizer_is_single_use() {
    let lines = SourceLine::parse_all("add x1, x0, #1\n");
    let mut opt = Optimizer::new(&A64, &InOrderDual, config(&["x1"]));
    assert!(opt.optimize(&lines).is_ok());
    assert!(matches!(opt.optimize(&lines), Err(OptimizeError::AlreadyUsed)));
}

#[test]
fn test_useless_instruction_is_rejected() {
    let src = "add x1, x0, #1\nadd x5, x0, #2\nadd x2, x1, #1\n";
    match optimize(src, config(&["x2"])) {
        Err(OptimizeError::Dataflow(DataflowError::UselessInstruction { line_no, registers, .. })) => {
            assert_eq!(line_no, 2);
            assert_eq!(registers, vec!["x5".to_string()]);
        }
        other => panic!("expected a useless instruction error, got {:?}", other.map(|r| r.is_some())),
    }
}
