//! Verification error types
//!
//! Failures of the post-optimization checks: the dataflow isomorphism between
//! original and optimized code, and the fixups applied afterwards.

use crate::dataflow::{DataflowError, Edge};
use std::fmt;

/// Verification error
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyError {
    /// Optimized and original code compute different dataflow graphs
    SelfCheck {
        /// Edges of the original graph, remapped, missing from the new one
        old_not_new: Vec<Edge>,
        /// Edges of the new graph without a counterpart in the original
        new_not_old: Vec<Edge>,
    },

    /// Two reordered accesses both update the same base register
    AddressFixup { first: String, second: String },

    /// A reordered access needs an offset change its addressing mode cannot express
    OffsetNotAdjustable { inst: String, delta: i64 },

    /// Kernel copies differ after offset fixup
    UnstableKernel,

    /// Loop-only information requested from a straight-line result
    NotPipelined(&'static str),

    /// The recorded reordering is not a permutation
    NotAPermutation { len: usize },

    /// A graph could not be rebuilt from generated code
    Dataflow(DataflowError),
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyError::SelfCheck {
                old_not_new,
                new_not_old,
            } => {
                write!(
                    f,
                    "dataflow graphs of original and optimized code differ: {} edges missing, {} edges added",
                    old_not_new.len(),
                    new_not_old.len()
                )
            }
            VerifyError::AddressFixup { first, second } => {
                write!(
                    f,
                    "cannot reorder `{}` and `{}`: both modify the same address register",
                    first, second
                )
            }
            VerifyError::OffsetNotAdjustable { inst, delta } => {
                write!(f, "cannot adjust the offset of `{}` by {}", inst, delta)
            }
            VerifyError::UnstableKernel => {
                write!(f, "loop kernel is not stable after address offset fixup")
            }
            VerifyError::NotPipelined(what) => {
                write!(f, "{} only exists for software pipelined results", what)
            }
            VerifyError::NotAPermutation { len } => {
                write!(f, "reordering is not a permutation of {} instructions", len)
            }
            VerifyError::Dataflow(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for VerifyError {}

impl From<DataflowError> for VerifyError {
    fn from(e: DataflowError) -> Self {
        VerifyError::Dataflow(e)
    }
}
