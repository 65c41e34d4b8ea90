use super::common::*;
use crate::common::perm::identity;
use crate::frontend::RegType;
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;

/// Every register mentioned anywhere in `lines`
fn registers(lines: &[String]) -> BTreeSet<String> {
    lines
        .iter()
        .flat_map(|l| l.split(|c: char| !c.is_ascii_alphanumeric()))
        .filter(|tok| {
            tok.len() > 1
                && tok.starts_with(['x', 'v'])
                && tok[1..].chars().all(|c| c.is_ascii_digit())
        })
        .map(str::to_string)
        .collect()
}

#[test]
fn test_minimize_register_usage_reuses_registers() {
    let src = "add a, x0, #1\n\
               add b, a, #1\n\
               add c, b, #1\n\
               add d, c, #1\n\
               add x2, d, #1\n";
    let mut cfg = config(&["x2"]);
    cfg.constraints.functional_only = true;
    cfg.constraints.allow_reordering = false;
    cfg.constraints.minimize_register_usage = Some(RegType::Gpr);

    let r = optimize_ok(src, cfg);
    let used = registers(&texts(r.code()));
    // x0, x2 and at most two alternating temporaries
    assert!(used.len() <= 4, "registers used: {:?}", used);
    assert_eq!(r.objective(), Some(used.len() as i64));
}

#[test]
fn test_minimize_extra_registers_avoids_callee_saved() {
    let src = "add a, x0, #1\nadd x2, a, #1\n";
    let mut cfg = config(&["x2"]);
    cfg.constraints.functional_only = true;
    cfg.constraints.allow_extra_registers = [(RegType::Gpr, 2)].into_iter().collect();
    cfg.constraints.minimize_use_of_extra_registers = Some(RegType::Gpr);
    cfg.reserved_regs = Some(all_gprs_except(&["x0", "x1", "x2", "x19", "x20"]));

    let r = optimize_ok(src, cfg);
    assert_eq!(r.objective(), Some(0));
    let used = registers(&texts(r.code()));
    assert!(!used.contains("x19") && !used.contains("x20"), "registers used: {:?}", used);
}

#[test]
fn test_minimize_displacement_keeps_original_order() {
    let src = "add x1, x0, #1\nadd x2, x0, #2\nadd x3, x0, #3\nadd x4, x0, #4\n";
    let mut cfg = config(&["x1", "x2", "x3", "x4"]);
    cfg.constraints.functional_only = true;
    cfg.constraints.allow_renaming = false;
    cfg.constraints.minimize_displacement = true;

    let r = optimize_ok(src, cfg);
    assert_eq!(r.objective(), Some(0));
    assert_eq!(r.reordering(), identity(4));
}
