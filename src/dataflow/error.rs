use crate::frontend::ParseError;
use thiserror::Error;

/// Errors raised while building a data flow graph
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DataflowError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("line {line_no}: none of the candidate parsings of `{text}` typechecks")]
    NoValidParse {
        line_no: usize,
        text: String,
        candidates: Vec<String>,
    },

    // Needs a typing hint for one of the symbolic registers
    #[error("line {line_no}: `{text}` can be parsed in {count} ways, add a typing hint")]
    AmbiguousParse {
        line_no: usize,
        text: String,
        count: usize,
    },

    #[error(
        "line {line_no}: the result registers {registers:?} of `{text}` are neither used nor declared as outputs"
    )]
    UselessInstruction {
        line_no: usize,
        text: String,
        registers: Vec<String>,
        /// Global inputs the useless value was computed from
        depends_on: Vec<String>,
        /// Line numbers of further useless instructions
        other_lines: Vec<usize>,
    },

    #[error("register `{register}` is used as {expected} but holds a {found} value")]
    TypeMismatch {
        register: String,
        expected: String,
        found: String,
    },

    #[error("restore from `{location}` without a preceding spill")]
    UnknownSpillLocation { location: String },

    #[error("spill to `{location}` overwrites a value that was never restored")]
    SpillLocationInUse { location: String },

    #[error("graph rewrites did not settle after {0} rebuilds")]
    RebuildLimit(usize),
}
