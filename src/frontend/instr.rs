//! Uniform instruction interface
//!
//! Every architecture lowers its textual instructions into [`Instruction`]
//! values. The optimizer only ever looks at this shape: three ordered operand
//! lists (inputs, outputs, in-place modified operands), their register types,
//! optional restrictions, and, for loads and stores, the addressing details
//! needed for post-scheduling offset fixup.
//!
//! Rendering goes through a [`Pattern`], so renaming an operand or moving it
//! between roles never requires re-parsing the text.

use crate::common::source::SourceLine;
use crate::frontend::RegType;
use std::fmt;

/// Operand role
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    /// Read only
    In,
    /// Write only
    Out,
    /// Read-modify-write
    InOut,
}

impl Role {
    fn placeholder(self) -> &'static str {
        match self {
            Role::In => "i",
            Role::Out => "o",
            Role::InOut => "io",
        }
    }
}

/// Coarse instruction classification consumed by target models
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InstrClass {
    IntAlu,
    IntMul,
    Move,
    Load,
    Store,
    VecAlu,
    VecMul,
    VecLoad,
    VecStore,
    VecInsert,
    VirtualInput,
    VirtualOutput,
}

/// A register operand
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operand {
    /// Current register name (architectural or symbolic)
    pub name: String,
    pub ty: RegType,
    /// Whitelist of architectural registers this operand may be renamed to
    pub restriction: Option<Vec<String>>,
}

impl Operand {
    pub fn new(name: impl Into<String>, ty: RegType) -> Self {
        Operand {
            name: name.into(),
            ty,
            restriction: None,
        }
    }
}

/// Joint restriction on several operands of the same role
///
/// The operands at `slots` must, together, be assigned one of `choices`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Combination {
    pub slots: Vec<usize>,
    pub choices: Vec<Vec<String>>,
}

/// Addressing information of a load or store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemAccess {
    /// Operand holding the base address
    pub base: (Role, usize),
    /// Immediate offset applied before the access
    pub offset: i64,
    /// Post-access increment of the base register
    pub increment: Option<i64>,
    /// Whether the immediate offset may be rewritten
    pub offset_adjustable: bool,
    pub is_load: bool,
}

/// One piece of an instruction's textual template
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatternPart {
    Lit(String),
    Arg(Role, usize),
    /// Memory offset, rendered as `, #N` (or nothing when zero)
    Offset,
}

/// Textual template of an instruction
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Pattern(pub Vec<PatternPart>);

impl Pattern {
    /// Parse a template such as `ldr {o0}, [{i0}{off}]`
    pub fn parse(template: &str) -> Self {
        let mut parts = Vec::new();
        let mut lit = String::new();
        let mut rest = template;
        while let Some(start) = rest.find('{') {
            let Some(len) = rest[start..].find('}') else {
                break;
            };
            let key = &rest[start + 1..start + len];
            let part = match key {
                "off" => Some(PatternPart::Offset),
                _ => parse_arg_key(key),
            };
            lit.push_str(&rest[..start]);
            match part {
                Some(part) => {
                    if !lit.is_empty() {
                        parts.push(PatternPart::Lit(std::mem::take(&mut lit)));
                    }
                    parts.push(part);
                    rest = &rest[start + len + 1..];
                }
                None => {
                    // literal brace, e.g. a register list
                    lit.push('{');
                    rest = &rest[start + 1..];
                }
            }
        }
        lit.push_str(rest);
        if !lit.is_empty() {
            parts.push(PatternPart::Lit(lit));
        }
        Pattern(parts)
    }

    /// Move the placeholder of operand `from` to role `to` at index `new_idx`,
    /// shifting the indices of later operands of the old role down by one
    fn move_arg(&mut self, from: (Role, usize), to: Role, new_idx: usize) {
        for part in &mut self.0 {
            if let PatternPart::Arg(role, idx) = part {
                if (*role, *idx) == from {
                    *role = to;
                    *idx = new_idx;
                } else if *role == from.0 && *idx > from.1 {
                    *idx -= 1;
                }
            }
        }
    }
}

fn parse_arg_key(key: &str) -> Option<PatternPart> {
    let (role, digits) = if let Some(d) = key.strip_prefix("io") {
        (Role::InOut, d)
    } else if let Some(d) = key.strip_prefix('i') {
        (Role::In, d)
    } else if let Some(d) = key.strip_prefix('o') {
        (Role::Out, d)
    } else {
        return None;
    };
    digits.parse().ok().map(|idx| PatternPart::Arg(role, idx))
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.0 {
            match part {
                PatternPart::Lit(s) => write!(f, "{}", s)?,
                PatternPart::Arg(role, idx) => write!(f, "{{{}{}}}", role.placeholder(), idx)?,
                PatternPart::Offset => write!(f, "{{off}}")?,
            }
        }
        Ok(())
    }
}

/// Spill or restore described by a tagged load/store
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpillEvent {
    Spill { reg: String, loc: String },
    Restore { reg: String, loc: String },
}

/// A parsed instruction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub mnemonic: String,
    pub class: InstrClass,
    pub pattern: Pattern,
    pub ins: Vec<Operand>,
    pub outs: Vec<Operand>,
    pub in_outs: Vec<Operand>,
    pub in_combinations: Vec<Combination>,
    pub out_combinations: Vec<Combination>,
    pub in_out_combinations: Vec<Combination>,
    /// `(output, input)` index pairs that must be renamed to different registers
    pub args_in_out_different: Vec<(usize, usize)>,
    /// `(in-out, input)` index pairs that must be renamed to different registers
    pub args_in_inout_different: Vec<(usize, usize)>,
    pub mem: Option<MemAccess>,
    /// Lane written by a partial (single-lane) vector write
    pub lane: Option<usize>,
    pub source: SourceLine,
}

impl Instruction {
    /// Create an instruction from a template with no operands yet
    pub fn new(mnemonic: &str, class: InstrClass, template: &str) -> Self {
        Instruction {
            mnemonic: mnemonic.to_string(),
            class,
            pattern: Pattern::parse(template),
            ins: Vec::new(),
            outs: Vec::new(),
            in_outs: Vec::new(),
            in_combinations: Vec::new(),
            out_combinations: Vec::new(),
            in_out_combinations: Vec::new(),
            args_in_out_different: Vec::new(),
            args_in_inout_different: Vec::new(),
            mem: None,
            lane: None,
            source: SourceLine::default(),
        }
    }

    pub fn with_in(mut self, name: &str, ty: RegType) -> Self {
        self.ins.push(Operand::new(name, ty));
        self
    }

    pub fn with_out(mut self, name: &str, ty: RegType) -> Self {
        self.outs.push(Operand::new(name, ty));
        self
    }

    pub fn with_in_out(mut self, name: &str, ty: RegType) -> Self {
        self.in_outs.push(Operand::new(name, ty));
        self
    }

    pub fn with_mem(mut self, mem: MemAccess) -> Self {
        self.mem = Some(mem);
        self
    }

    pub fn with_source(mut self, source: SourceLine) -> Self {
        self.source = source;
        self
    }

    /// Synthetic producer of a global input register
    pub fn virtual_input(reg: &str, ty: RegType) -> Self {
        Instruction::new("input", InstrClass::VirtualInput, "// input {o0}").with_out(reg, ty)
    }

    /// Synthetic consumer of a global output register
    pub fn virtual_output(reg: &str, ty: RegType) -> Self {
        Instruction::new("output", InstrClass::VirtualOutput, "// output {i0}").with_in(reg, ty)
    }

    pub fn is_virtual(&self) -> bool {
        matches!(
            self.class,
            InstrClass::VirtualInput | InstrClass::VirtualOutput
        )
    }

    pub fn operands(&self, role: Role) -> &[Operand] {
        match role {
            Role::In => &self.ins,
            Role::Out => &self.outs,
            Role::InOut => &self.in_outs,
        }
    }

    pub fn operands_mut(&mut self, role: Role) -> &mut Vec<Operand> {
        match role {
            Role::In => &mut self.ins,
            Role::Out => &mut self.outs,
            Role::InOut => &mut self.in_outs,
        }
    }

    pub fn combinations(&self, role: Role) -> &[Combination] {
        match role {
            Role::In => &self.in_combinations,
            Role::Out => &self.out_combinations,
            Role::InOut => &self.in_out_combinations,
        }
    }

    pub fn arg(&self, role: Role, idx: usize) -> Option<&str> {
        self.operands(role).get(idx).map(|o| o.name.as_str())
    }

    pub fn set_arg(&mut self, role: Role, idx: usize, name: &str) {
        if let Some(op) = self.operands_mut(role).get_mut(idx) {
            op.name = name.to_string();
        }
    }

    pub fn num_in(&self) -> usize {
        self.ins.len()
    }

    pub fn num_out(&self) -> usize {
        self.outs.len()
    }

    pub fn num_in_out(&self) -> usize {
        self.in_outs.len()
    }

    /// For virtual nodes, the global register they stand for
    pub fn orig_reg(&self) -> Option<&Operand> {
        match self.class {
            InstrClass::VirtualInput => self.outs.first(),
            InstrClass::VirtualOutput => self.ins.first(),
            _ => None,
        }
    }

    pub fn is_load_store(&self) -> bool {
        self.mem.is_some()
    }

    /// Name of the base address register of a load or store
    pub fn addr(&self) -> Option<&str> {
        let mem = self.mem.as_ref()?;
        self.arg(mem.base.0, mem.base.1)
    }

    pub fn increment(&self) -> Option<i64> {
        self.mem.as_ref().and_then(|m| m.increment)
    }

    /// Move an operand to a different role, keeping its name and type
    ///
    /// Returns the operand's index in its new role. Memory base references
    /// and the textual pattern follow the move.
    pub fn move_operand(&mut self, from: (Role, usize), to: Role) -> Option<usize> {
        if from.1 >= self.operands(from.0).len() {
            return None;
        }
        let op = self.operands_mut(from.0).remove(from.1);
        let new_idx = self.operands(to).len();
        self.operands_mut(to).push(op);
        self.pattern.move_arg(from, to, new_idx);

        if let Some(mem) = self.mem.as_mut() {
            if mem.base == from {
                mem.base = (to, new_idx);
            } else if mem.base.0 == from.0 && mem.base.1 > from.1 {
                mem.base.1 -= 1;
            }
        }
        Some(new_idx)
    }

    /// Add `delta` to the immediate offset of a load/store
    pub fn adjust_offset(&mut self, delta: i64) -> bool {
        match self.mem.as_mut() {
            Some(mem) if mem.offset_adjustable => {
                mem.offset += delta;
                true
            }
            _ => false,
        }
    }

    /// Interpret a spill/restore tagged load or store
    pub fn spill_event(&self) -> Option<SpillEvent> {
        let mem = self.mem.as_ref()?;
        let loc = format!("{}{:+}", self.addr()?, mem.offset);
        if self.source.has_flag("is_spill") && !mem.is_load {
            let reg = self.ins.first()?.name.clone();
            return Some(SpillEvent::Spill { reg, loc });
        }
        if self.source.has_flag("is_restore") && mem.is_load {
            let reg = self.outs.first()?.name.clone();
            return Some(SpillEvent::Restore { reg, loc });
        }
        None
    }

    /// Render the instruction text from its pattern and current operands
    pub fn render(&self) -> String {
        let mut out = String::new();
        for part in &self.pattern.0 {
            match part {
                PatternPart::Lit(s) => out.push_str(s),
                PatternPart::Arg(role, idx) => {
                    out.push_str(self.arg(*role, *idx).unwrap_or("?"));
                }
                PatternPart::Offset => {
                    let off = self.mem.as_ref().map(|m| m.offset).unwrap_or(0);
                    if off != 0 {
                        out.push_str(&format!(", #{}", off));
                    }
                }
            }
        }
        out
    }

    /// Render into a source line, keeping the original metadata
    pub fn to_source_line(&self) -> SourceLine {
        self.source.with_text(self.render())
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn post_increment_load() -> Instruction {
        Instruction::new("ldr", InstrClass::Load, "ldr {o0}, [{io0}], #8")
            .with_out("x1", RegType::Gpr)
            .with_in_out("x0", RegType::Gpr)
            .with_mem(MemAccess {
                base: (Role::InOut, 0),
                offset: 0,
                increment: Some(8),
                offset_adjustable: false,
                is_load: true,
            })
    }

    #[test]
    fn test_pattern_roundtrip() {
        let pattern = Pattern::parse("str {i0}, [{i1}{off}]");
        assert_eq!(pattern.to_string(), "str {i0}, [{i1}{off}]");
        assert_eq!(pattern.0.len(), 6);

        let list = Pattern::parse("ld2 {{o0}, {o1}}, [{i0}]");
        assert_eq!(list.0[0], PatternPart::Lit("ld2 {".to_string()));
        assert_eq!(list.0[1], PatternPart::Arg(Role::Out, 0));
    }

    #[test]
    fn test_render_with_offset() {
        let mut inst = Instruction::new("ldr", InstrClass::Load, "ldr {o0}, [{i0}{off}]")
            .with_out("x1", RegType::Gpr)
            .with_in("x0", RegType::Gpr)
            .with_mem(MemAccess {
                base: (Role::In, 0),
                offset: 0,
                increment: None,
                offset_adjustable: true,
                is_load: true,
            });
        assert_eq!(inst.render(), "ldr x1, [x0]");
        assert!(inst.adjust_offset(-16));
        assert_eq!(inst.render(), "ldr x1, [x0, #-16]");
    }

    #[test]
    fn test_move_operand_updates_pattern_and_base() {
        let mut inst = post_increment_load();
        let idx = inst.move_operand((Role::InOut, 0), Role::In);
        assert_eq!(idx, Some(0));
        assert!(inst.in_outs.is_empty());
        assert_eq!(inst.ins[0].name, "x0");
        assert_eq!(inst.addr(), Some("x0"));
        assert_eq!(inst.pattern.to_string(), "ldr {o0}, [{i0}], #8");
        inst.set_arg(Role::In, 0, "x7");
        assert_eq!(inst.render(), "ldr x1, [x7], #8");
    }

    #[test]
    fn test_post_increment_not_adjustable() {
        let mut inst = post_increment_load();
        assert!(!inst.adjust_offset(8));
        assert_eq!(inst.increment(), Some(8));
    }

    #[test]
    fn test_spill_event_requires_tag() {
        let store = Instruction::new("str", InstrClass::Store, "str {i0}, [{i1}{off}]")
            .with_in("x3", RegType::Gpr)
            .with_in("sp", RegType::Gpr)
            .with_mem(MemAccess {
                base: (Role::In, 1),
                offset: 32,
                increment: None,
                offset_adjustable: true,
                is_load: false,
            });
        assert_eq!(store.spill_event(), None);

        let tagged = store.with_source(SourceLine::new("str x3, [sp, #32] // @is_spill"));
        assert_eq!(
            tagged.spill_event(),
            Some(SpillEvent::Spill {
                reg: "x3".to_string(),
                loc: "sp+32".to_string()
            })
        );
    }
}
