use super::common::*;
use crate::common::perm::{invert, is_permutation};
use proptest::prelude::*;

fn arb_program() -> impl Strategy<Value = String> {
    prop::collection::vec((1u8..6, 0u8..6, 1u8..32), 1..5).prop_map(|insts| {
        insts
            .into_iter()
            .map(|(d, a, imm)| format!("add x{}, x{}, #{}\n", d, a, imm))
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Every solution is a valid reordering that passed the self-check
    #[test]
    fn test_solutions_are_permutations(src in arb_program()) {
        let mut cfg = config(&["x0", "x1", "x2", "x3", "x4", "x5"]);
        cfg.constraints.functional_only = true;
        cfg.allow_useless_instructions = true;

        let r = optimize_ok(&src, cfg);
        let n = src.lines().count();
        prop_assert_eq!(r.code().len(), n);
        let perm = r.reordering();
        prop_assert!(is_permutation(&perm, n));
        prop_assert_eq!(invert(&r.reordering_inv()), perm);
    }
}
