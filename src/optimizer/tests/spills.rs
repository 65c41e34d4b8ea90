use super::common::*;
use crate::config::Config;
use pretty_assertions::assert_eq;

// Three values are live after the third add, with only x1 and x2 to hold them
const PRESSURE: &str = "\
add ta, x0, #1
add tb, x0, #2
add tc, x0, #3
add td, tb, tc
add te, td, ta
";

fn pressure_config(allow_spills: bool) -> Config {
    let mut cfg = config(&["te"]);
    cfg.reserved_regs = Some(all_gprs_except(&["x1", "x2"]));
    cfg.constraints.functional_only = true;
    cfg.constraints.allow_reordering = false;
    cfg.constraints.allow_spills = allow_spills;
    cfg.constraints.minimize_spills = allow_spills;
    cfg
}

#[test]
fn test_register_pressure_without_spills_is_infeasible() {
    assert!(matches!(optimize(PRESSURE, pressure_config(false)), Ok(None)));
}

#[test]
fn test_single_spill_relieves_pressure() {
    let r = optimize_ok(PRESSURE, pressure_config(true));
    assert_eq!(r.spills(), 1);

    let code = r.code();
    assert_eq!(code.len(), 7);
    let spill = code.iter().position(|l| l.has_flag("is_spill"));
    let restore = code.iter().position(|l| l.has_flag("is_restore"));
    match (spill, restore) {
        (Some(s), Some(r)) => {
            assert!(s < r);
            assert!(code[s].text.starts_with("str "));
            assert!(code[r].text.starts_with("ldr "));
        }
        _ => panic!("missing spill or restore in {:?}", texts(code)),
    }
}
