pub mod perm;
pub mod source;

pub use perm::Permutation;
pub use source::{SourceLine, TagValue};
