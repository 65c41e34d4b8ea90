//! A small AArch64-flavoured architecture
//!
//! General purpose registers `x0`-`x30` and `sp`, vector registers `v0`-`v31`
//! and a single, never renamed, `flags` register. The instruction set covers
//! scalar and vector arithmetic, loads and stores with offset or
//! post-increment addressing, a two-register structure load and lane inserts.

mod forms;
mod fusion;
mod parser;
mod registers;

#[cfg(test)]
mod tests;

use crate::common::source::{SourceLine, TagValue};
use crate::dataflow::passes::Pass;
use crate::frontend::{Architecture, Instruction, ParseError, RegFilter, RegType, Role};
use chumsky::Parser;
use std::collections::{BTreeMap, BTreeSet};

pub use fusion::LaneFusion;
pub use registers::{FLAGS, SP};

/// Byte distance between consecutive spill slots
pub const SPILL_SLOT_SIZE: i64 = 16;

#[derive(Clone, Copy, Debug, Default)]
pub struct A64;

impl A64 {
    fn resolve_aliases(inst: &mut Instruction, aliases: &BTreeMap<String, String>) {
        for role in [Role::In, Role::Out, Role::InOut] {
            for op in inst.operands_mut(role) {
                if let Some(reg) = aliases.get(&op.name) {
                    op.name = reg.clone();
                }
            }
        }
    }

    fn tagged(mut inst: Instruction, tag: &str) -> Instruction {
        let mut line = SourceLine::default();
        line.set_tag(tag, TagValue::Flag(true));
        line.text = inst.render();
        inst.source = line;
        inst
    }
}

impl Architecture for A64 {
    fn name(&self) -> &'static str {
        "a64"
    }

    fn register_types(&self) -> &'static [RegType] {
        &[RegType::Gpr, RegType::Vector, RegType::Flags]
    }

    fn list_registers(&self, ty: RegType, filter: RegFilter) -> Vec<String> {
        registers::list(ty, filter)
    }

    fn find_type(&self, reg: &str) -> Option<RegType> {
        registers::find_type(reg)
    }

    fn is_renamed(&self, ty: RegType) -> bool {
        ty != RegType::Flags
    }

    fn default_reserved(&self) -> BTreeSet<String> {
        ["x18", "x29", "x30", SP]
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn default_aliases(&self) -> BTreeMap<String, String> {
        [("lr", "x30"), ("fp", "x29"), ("ip0", "x16"), ("ip1", "x17")]
            .into_iter()
            .map(|(a, r)| (a.to_string(), r.to_string()))
            .collect()
    }

    fn parse_line(
        &self,
        line: &SourceLine,
        aliases: &BTreeMap<String, String>,
    ) -> Result<Vec<Instruction>, ParseError> {
        let stmt = parser::statement()
            .parse(line.text.as_str())
            .into_result()
            .map_err(|errs| match errs.into_iter().next() {
                Some(e) => ParseError::new(line, e.span().start..e.span().end, e.to_string()),
                None => ParseError::new(line, 0..line.text.len(), "syntax error"),
            })?;

        let forms = forms::candidates(&stmt).map_err(|e| {
            let span = e.span.map_or(0..line.text.len(), |s| s.start..s.end);
            ParseError::new(line, span, e.message)
        })?;

        let candidates: Vec<Instruction> = forms
            .into_iter()
            .map(|mut inst| {
                Self::resolve_aliases(&mut inst, aliases);
                inst.source = line.clone();
                inst
            })
            .filter(forms::architecturally_typed)
            .collect();

        if candidates.is_empty() {
            return Err(ParseError::new(
                line,
                0..line.text.len(),
                format!("operands do not match any form of `{}`", stmt.mnemonic),
            ));
        }
        Ok(candidates)
    }

    fn spill(&self, reg: &str, ty: RegType, slot: usize) -> Instruction {
        let offset = SPILL_SLOT_SIZE * slot as i64;
        Self::tagged(
            forms::memory_form("str", reg, ty, SP, offset, None, false),
            "is_spill",
        )
    }

    fn restore(&self, reg: &str, ty: RegType, slot: usize) -> Instruction {
        let offset = SPILL_SLOT_SIZE * slot as i64;
        Self::tagged(
            forms::memory_form("ldr", reg, ty, SP, offset, None, true),
            "is_restore",
        )
    }

    fn passes(&self) -> Vec<Box<dyn Pass>> {
        vec![Box::new(LaneFusion)]
    }
}
