//! Verification and repair of optimization results
//!
//! The solver's answer is never trusted blindly. After extraction the
//! optimized code is rebuilt into a data flow graph and compared edge by
//! edge against the original ([`selfcheck`]). Loops whose preamble or
//! postamble disagree with the kernel are repaired first
//! ([`fixup_preamble_postamble`]), and memory offsets invalidated by moving
//! accesses across post-increments are rewritten ([`offset_fixup`]).

mod error;
mod fixup;
mod result;
mod selfcheck;

pub use error::VerifyError;
pub use fixup::{fixup_preamble_postamble, offset_fixup};
pub use result::{OptimizationResult, Placement};
pub use selfcheck::{selfcheck, selfcheck_unrolled, selfcheck_with_fixup, SELFCHECK_ITERATIONS};
