//! Frontend: from assembly text to typed instructions
//!
//! An [`Architecture`] describes a register file and knows how to turn a
//! [`SourceLine`] into one or more candidate [`Instruction`]s. Several
//! candidates are returned when the text alone does not determine the
//! operand types (e.g. `add a, b, c` on symbolic registers may be a scalar or
//! a vector add); the dataflow builder picks the one that typechecks.

pub mod a64;
pub mod instr;

use crate::common::source::SourceLine;
use crate::dataflow::passes::Pass;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Range;
use thiserror::Error;

pub use instr::{Combination, InstrClass, Instruction, MemAccess, Operand, Role};

/// Register class of an architecture
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegType {
    Gpr,
    Vector,
    Flags,
}

impl fmt::Display for RegType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RegType::Gpr => "gpr",
            RegType::Vector => "vector",
            RegType::Flags => "flags",
        };
        write!(f, "{}", s)
    }
}

/// Which part of a register class to list
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegFilter {
    All,
    /// Registers usable without save/restore obligations
    Normal,
    /// Callee-saved registers that cost extra to use
    Extra,
}

/// Failure to parse one line of assembly
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("line {line_no}: {message}")]
pub struct ParseError {
    pub line_no: usize,
    /// Byte range within the originating file
    pub span: Range<usize>,
    pub text: String,
    pub message: String,
}

impl ParseError {
    pub fn new(line: &SourceLine, span: Range<usize>, message: impl Into<String>) -> Self {
        ParseError {
            line_no: line.line_no,
            span: line.offset + span.start..line.offset + span.end,
            text: line.text.clone(),
            message: message.into(),
        }
    }
}

/// Architecture interface consumed by the dataflow builder and optimizer
pub trait Architecture {
    fn name(&self) -> &'static str;

    fn register_types(&self) -> &'static [RegType];

    fn list_registers(&self, ty: RegType, filter: RegFilter) -> Vec<String>;

    /// Type of an architectural register, `None` for symbolic names
    fn find_type(&self, reg: &str) -> Option<RegType>;

    /// Whether registers of this class take part in renaming
    fn is_renamed(&self, ty: RegType) -> bool;

    fn default_reserved(&self) -> BTreeSet<String>;

    fn default_aliases(&self) -> BTreeMap<String, String>;

    /// Parse a line into all instruction forms it could denote
    ///
    /// Register names are resolved through `aliases` first.
    fn parse_line(
        &self,
        line: &SourceLine,
        aliases: &BTreeMap<String, String>,
    ) -> Result<Vec<Instruction>, ParseError>;

    /// Store `reg` to spill slot `slot`
    fn spill(&self, reg: &str, ty: RegType, slot: usize) -> Instruction;

    /// Load `reg` back from spill slot `slot`
    fn restore(&self, reg: &str, ty: RegType, slot: usize) -> Instruction;

    /// Architecture-specific dataflow rewrites
    fn passes(&self) -> Vec<Box<dyn Pass>> {
        Vec::new()
    }

    fn is_architectural(&self, reg: &str) -> bool {
        self.find_type(reg).is_some()
    }

    /// Parse a whole program, keeping all candidates per line
    fn parse_program(
        &self,
        lines: &[SourceLine],
        aliases: &BTreeMap<String, String>,
    ) -> Result<Vec<Vec<Instruction>>, ParseError> {
        lines.iter().map(|l| self.parse_line(l, aliases)).collect()
    }
}
