use super::common::*;
use crate::common::source::SourceLine;
use crate::config::Config;
use crate::frontend::a64::A64;
use crate::optimizer::{OptimizeError, Optimizer};
use crate::target::InOrderDual;
use crate::verifier::{selfcheck_unrolled, Placement, VerifyError};
use pretty_assertions::assert_eq;

// The load is pinned to the previous iteration, hiding its latency
const LOOP: &str = "ldr x1, [x0], #8 // @pre\nadd x2, x2, x1\n";

fn loop_config() -> Config {
    let mut cfg = config(&[]);
    cfg.inputs_are_outputs = true;
    cfg.sw_pipelining.enabled = true;
    cfg.constraints.stalls_allowed = 3;
    cfg
}

#[test]
fn test_early_load_goes_to_preamble() {
    let r = optimize_ok(LOOP, loop_config());
    assert!(r.pipelined());
    assert_eq!(r.placement(0), Placement::Pre);
    assert_eq!(r.placement(1), Placement::Core);
    assert_eq!(r.num_exceptional_iterations(), 1);

    let kernel = r.kernel().map(|k| k.len());
    assert_eq!(kernel, Ok(2));
    let preamble = r.preamble().map(texts);
    let postamble = r.postamble().map(texts);
    assert_eq!(preamble.as_ref().map(Vec::len), Ok(1));
    assert_eq!(postamble.as_ref().map(Vec::len), Ok(1));
    assert!(preamble.map(|p| p[0].starts_with("ldr ")).unwrap_or(false));
    assert!(postamble.map(|p| p[0].starts_with("add ")).unwrap_or(false));
}

#[test]
fn test_kernel_runs_add_before_next_load() {
    let r = optimize_ok(LOOP, loop_config());
    let kernel = r.kernel().map(texts).unwrap_or_default();
    assert_eq!(kernel.len(), 2);
    assert!(kernel[0].starts_with("add "));
    assert!(kernel[1].starts_with("ldr "));
    assert!(r.kernel_input_output().map(|io| io.contains(&"x0".to_string())).unwrap_or(false));
}

#[test]
fn test_fully_unrolled_loop_has_all_iterations() {
    let r = optimize_ok(LOOP, loop_config());
    let (old, new) = r.get_fully_unrolled_loop(4);
    assert_eq!(old.len(), 8);
    assert_eq!(new.len(), 8);
}

#[test]
fn test_locked_region_rejected_in_loop_mode() {
    let mut opt = Optimizer::new(&A64, &InOrderDual, loop_config());
    assert!(matches!(
        opt.optimize_with_locks(&SourceLine::parse_all(LOOP), 1, 0),
        Err(OptimizeError::LockedRegionInLoop)
    ));
}

#[test]
fn test_straight_line_result_has_no_kernel() {
    let r = optimize_ok("add x1, x0, #1\n", config(&["x1"]));
    assert!(!r.pipelined());
    assert!(matches!(r.kernel(), Err(VerifyError::NotPipelined(_))));
}

#[test]
fn test_unrolled_loop_checks_for_any_iteration_count() {
    let r = optimize_ok(LOOP, loop_config());
    for k in 2..=6 {
        let (old, new) = r.get_fully_unrolled_loop(k);
        assert_eq!(old.len(), 2 * k);
        assert_eq!(new.len(), 2 * k);
        assert_eq!(selfcheck_unrolled(&r, &A64, k), Ok(()), "{} iterations", k);
    }
}

// The accumulation is deferred to the next iteration instead
const POST_LOOP: &str = "ldr x1, [x0], #8\nadd x2, x2, x1 // @post\n";

fn post_config() -> Config {
    let mut cfg = loop_config();
    cfg.sw_pipelining.allow_pre = false;
    cfg.sw_pipelining.allow_post = true;
    cfg
}

#[test]
fn test_late_add_goes_to_postamble() {
    let r = optimize_ok(POST_LOOP, post_config());
    assert_eq!(r.placement(0), Placement::Core);
    assert_eq!(r.placement(1), Placement::Post);
    assert_eq!(r.num_exceptional_iterations(), 1);

    let preamble = r.preamble().map(texts).unwrap_or_default();
    let postamble = r.postamble().map(texts).unwrap_or_default();
    assert_eq!(preamble.len(), 1);
    assert_eq!(postamble.len(), 1);
    assert!(preamble[0].starts_with("ldr "));
    assert!(postamble[0].starts_with("add "));
}

#[test]
fn test_post_only_loop_carries_values_across_iterations() {
    let r = optimize_ok(POST_LOOP, post_config());
    // x1 flows from one kernel copy into the next one
    for k in 2..=6 {
        assert_eq!(selfcheck_unrolled(&r, &A64, k), Ok(()), "{} iterations", k);
    }
}

#[test]
fn test_post_placement_needs_allow_post() {
    let mut cfg = post_config();
    cfg.sw_pipelining.allow_post = false;
    assert!(matches!(optimize(POST_LOOP, cfg), Ok(None)));
}

#[test]
fn test_early_instructions_follow_late_ones() {
    let src = "ldr x1, [x0], #8 // @pre\nadd x3, x1, #1\nadd x2, x2, x3 // @post\n";
    let mut cfg = loop_config();
    cfg.sw_pipelining.allow_post = true;
    cfg.sw_pipelining.pre_before_post = true;
    cfg.constraints.stalls_allowed = 4;

    let r = optimize_ok(src, cfg);
    assert_eq!(r.num_pre(), 1);
    assert_eq!(r.num_post(), 1);
    let kernel = r.kernel().map(texts).unwrap_or_default();
    let load = kernel.iter().position(|l| l.starts_with("ldr "));
    let acc = kernel.iter().position(|l| l.starts_with("add x2,"));
    assert!(
        matches!((load, acc), (Some(l), Some(a)) if l > a),
        "kernel order: {:?}",
        kernel
    );
}

#[test]
fn test_max_overlapping_excludes_forced_early_load() {
    let mut cfg = loop_config();
    cfg.sw_pipelining.max_overlapping = Some(0);
    assert!(matches!(optimize(LOOP, cfg), Ok(None)));
}

#[test]
fn test_min_overlapping_forces_an_early_instruction() {
    let mut cfg = loop_config();
    cfg.sw_pipelining.min_overlapping = Some(1);
    cfg.constraints.stalls_allowed = 6;

    let r = optimize_ok("ldr x1, [x0], #8\nadd x2, x2, x1\n", cfg);
    assert!(r.num_prepost() >= 1);
    assert_eq!(r.placement(0), Placement::Pre);
}

#[test]
fn test_minimize_overlapping_keeps_body_in_kernel() {
    let mut cfg = loop_config();
    cfg.sw_pipelining.minimize_overlapping = true;
    cfg.constraints.stalls_allowed = 6;

    let r = optimize_ok("ldr x1, [x0], #8\nadd x2, x2, x1\n", cfg);
    assert_eq!(r.objective(), Some(0));
    assert_eq!(r.num_prepost(), 0);
    assert_eq!(r.placement(0), Placement::Core);
    assert_eq!(r.placement(1), Placement::Core);
}
