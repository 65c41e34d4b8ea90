//! Instruction forms
//!
//! Maps a parsed [`Statement`] onto every [`Instruction`] shape it can denote.
//! Register-register arithmetic exists for both register files, so a line on
//! symbolic registers yields two candidates.

use super::parser::{Arg, Span, Spanned, Statement};
use super::registers;
use crate::frontend::instr::{Combination, InstrClass, Instruction, MemAccess, Role};
use crate::frontend::RegType;

/// Why a statement did not match any form
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormError {
    pub span: Option<Span>,
    pub message: String,
}

impl FormError {
    fn at(span: Span, message: impl Into<String>) -> Self {
        FormError {
            span: Some(span),
            message: message.into(),
        }
    }

    fn whole(message: impl Into<String>) -> Self {
        FormError {
            span: None,
            message: message.into(),
        }
    }
}

type Forms = Result<Vec<Instruction>, FormError>;

/// All forms the statement may denote, before register-class filtering
pub fn candidates(stmt: &Statement<'_>) -> Forms {
    let args = stmt.args.as_slice();
    let mnemonic = stmt.mnemonic.to_ascii_lowercase();
    let forms = match mnemonic.as_str() {
        "add" | "sub" | "eor" | "and" | "orr" | "mul" => arith(&mnemonic, args)?,
        "madd" => madd(args)?,
        "mla" => mla(args)?,
        "mov" => mov(args)?,
        "subs" => subs(args)?,
        "cmp" => cmp(args)?,
        "csel" => csel(args)?,
        "ldr" | "str" => load_store(&mnemonic, args)?,
        "ld2" => ld2(args)?,
        "ins" => ins(args)?,
        other => return Err(FormError::whole(format!("unknown mnemonic `{}`", other))),
    };
    Ok(forms)
}

/// Whether every architectural register sits in an operand of its own class
pub(super) fn architecturally_typed(inst: &Instruction) -> bool {
    [Role::In, Role::Out, Role::InOut].iter().all(|&role| {
        inst.operands(role).iter().all(|op| {
            registers::find_type(&op.name).map_or(true, |ty| ty == op.ty)
        })
    })
}

fn arity(args: &[Spanned<Arg<'_>>], n: usize, what: &str) -> Result<(), FormError> {
    if args.len() == n {
        Ok(())
    } else {
        Err(FormError::whole(format!(
            "`{}` expects {} operands, found {}",
            what,
            n,
            args.len()
        )))
    }
}

fn reg<'a>(arg: &Spanned<Arg<'a>>) -> Result<&'a str, FormError> {
    match &arg.0 {
        Arg::Reg(r) => Ok(r),
        _ => Err(FormError::at(arg.1, "expected a register")),
    }
}

fn imm(arg: &Spanned<Arg<'_>>) -> Result<i64, FormError> {
    match &arg.0 {
        Arg::Imm(n) => Ok(*n),
        _ => Err(FormError::at(arg.1, "expected an immediate")),
    }
}

fn arith(mnemonic: &str, args: &[Spanned<Arg<'_>>]) -> Forms {
    arity(args, 3, mnemonic)?;
    let dst = reg(&args[0])?;
    let lhs = reg(&args[1])?;

    if let Arg::Imm(n) = args[2].0 {
        if mnemonic != "add" && mnemonic != "sub" {
            return Err(FormError::at(args[2].1, "immediate operand not supported here"));
        }
        let template = format!("{} {{o0}}, {{i0}}, #{}", mnemonic, n);
        return Ok(vec![Instruction::new(mnemonic, InstrClass::IntAlu, &template)
            .with_out(dst, RegType::Gpr)
            .with_in(lhs, RegType::Gpr)]);
    }

    let rhs = reg(&args[2])?;
    let template = format!("{} {{o0}}, {{i0}}, {{i1}}", mnemonic);
    let (scalar, vector) = if mnemonic == "mul" {
        (InstrClass::IntMul, InstrClass::VecMul)
    } else {
        (InstrClass::IntAlu, InstrClass::VecAlu)
    };
    Ok([(RegType::Gpr, scalar), (RegType::Vector, vector)]
        .into_iter()
        .map(|(ty, class)| {
            Instruction::new(mnemonic, class, &template)
                .with_out(dst, ty)
                .with_in(lhs, ty)
                .with_in(rhs, ty)
        })
        .collect())
}

fn madd(args: &[Spanned<Arg<'_>>]) -> Forms {
    arity(args, 4, "madd")?;
    let mut inst = Instruction::new("madd", InstrClass::IntMul, "madd {o0}, {i0}, {i1}, {i2}")
        .with_out(reg(&args[0])?, RegType::Gpr);
    for arg in &args[1..] {
        inst = inst.with_in(reg(arg)?, RegType::Gpr);
    }
    Ok(vec![inst])
}

fn mla(args: &[Spanned<Arg<'_>>]) -> Forms {
    arity(args, 3, "mla")?;
    Ok(vec![Instruction::new("mla", InstrClass::VecMul, "mla {io0}, {i0}, {i1}")
        .with_in_out(reg(&args[0])?, RegType::Vector)
        .with_in(reg(&args[1])?, RegType::Vector)
        .with_in(reg(&args[2])?, RegType::Vector)])
}

fn mov(args: &[Spanned<Arg<'_>>]) -> Forms {
    arity(args, 2, "mov")?;
    let dst = reg(&args[0])?;
    if let Arg::Imm(n) = args[1].0 {
        let template = format!("mov {{o0}}, #{}", n);
        return Ok(vec![
            Instruction::new("mov", InstrClass::Move, &template).with_out(dst, RegType::Gpr)
        ]);
    }
    let src = reg(&args[1])?;
    Ok([(RegType::Gpr, InstrClass::Move), (RegType::Vector, InstrClass::VecAlu)]
        .into_iter()
        .map(|(ty, class)| {
            Instruction::new("mov", class, "mov {o0}, {i0}")
                .with_out(dst, ty)
                .with_in(src, ty)
        })
        .collect())
}

fn subs(args: &[Spanned<Arg<'_>>]) -> Forms {
    arity(args, 3, "subs")?;
    let n = imm(&args[2])?;
    let template = format!("subs {{o0}}, {{i0}}, #{}", n);
    Ok(vec![Instruction::new("subs", InstrClass::IntAlu, &template)
        .with_out(reg(&args[0])?, RegType::Gpr)
        .with_out(registers::FLAGS, RegType::Flags)
        .with_in(reg(&args[1])?, RegType::Gpr)])
}

fn cmp(args: &[Spanned<Arg<'_>>]) -> Forms {
    arity(args, 2, "cmp")?;
    let n = imm(&args[1])?;
    let template = format!("cmp {{i0}}, #{}", n);
    Ok(vec![Instruction::new("cmp", InstrClass::IntAlu, &template)
        .with_out(registers::FLAGS, RegType::Flags)
        .with_in(reg(&args[0])?, RegType::Gpr)])
}

fn csel(args: &[Spanned<Arg<'_>>]) -> Forms {
    arity(args, 4, "csel")?;
    let cond = reg(&args[3])?;
    if !registers::is_condition(cond) {
        return Err(FormError::at(args[3].1, format!("unknown condition `{}`", cond)));
    }
    let template = format!("csel {{o0}}, {{i0}}, {{i1}}, {}", cond);
    Ok(vec![Instruction::new("csel", InstrClass::IntAlu, &template)
        .with_out(reg(&args[0])?, RegType::Gpr)
        .with_in(reg(&args[1])?, RegType::Gpr)
        .with_in(reg(&args[2])?, RegType::Gpr)
        .with_in(registers::FLAGS, RegType::Flags)])
}

fn load_store(mnemonic: &str, args: &[Spanned<Arg<'_>>]) -> Forms {
    if args.len() != 2 && args.len() != 3 {
        return Err(FormError::whole(format!(
            "`{}` expects 2 or 3 operands, found {}",
            mnemonic,
            args.len()
        )));
    }
    let data = reg(&args[0])?;
    let (base, offset) = match &args[1].0 {
        Arg::Mem {
            writeback: true, ..
        } => {
            return Err(FormError::at(
                args[1].1,
                "pre-indexed addressing is not supported",
            ))
        }
        Arg::Mem { base, offset, .. } => (*base, *offset),
        _ => return Err(FormError::at(args[1].1, "expected a memory operand")),
    };
    let increment = match args.get(2) {
        Some(arg) => {
            if offset != 0 {
                return Err(FormError::at(
                    args[1].1,
                    "post-increment with a base offset is not supported",
                ));
            }
            Some(imm(arg)?)
        }
        None => None,
    };
    let is_load = mnemonic == "ldr";

    Ok([RegType::Gpr, RegType::Vector]
        .into_iter()
        .map(|ty| memory_form(mnemonic, data, ty, base, offset, increment, is_load))
        .collect())
}

/// Build a single-register load or store
pub(super) fn memory_form(
    mnemonic: &str,
    data: &str,
    ty: RegType,
    base: &str,
    offset: i64,
    increment: Option<i64>,
    is_load: bool,
) -> Instruction {
    let class = match (is_load, ty) {
        (true, RegType::Vector) => InstrClass::VecLoad,
        (true, _) => InstrClass::Load,
        (false, RegType::Vector) => InstrClass::VecStore,
        (false, _) => InstrClass::Store,
    };
    let data_slot = if is_load { "{o0}" } else { "{i0}" };

    let (template, base_slot) = match increment {
        Some(inc) => (
            format!("{} {}, [{{io0}}], #{}", mnemonic, data_slot, inc),
            (Role::InOut, 0),
        ),
        None if is_load => (format!("{} {}, [{{i0}}{{off}}]", mnemonic, data_slot), (Role::In, 0)),
        None => (format!("{} {}, [{{i1}}{{off}}]", mnemonic, data_slot), (Role::In, 1)),
    };

    let mut inst = Instruction::new(mnemonic, class, &template);
    inst = if is_load {
        inst.with_out(data, ty)
    } else {
        inst.with_in(data, ty)
    };
    inst = match increment {
        Some(_) => inst.with_in_out(base, RegType::Gpr),
        None => inst.with_in(base, RegType::Gpr),
    };
    inst.with_mem(MemAccess {
        base: base_slot,
        offset,
        increment,
        offset_adjustable: increment.is_none(),
        is_load,
    })
}

fn ld2(args: &[Spanned<Arg<'_>>]) -> Forms {
    if args.len() != 2 && args.len() != 3 {
        return Err(FormError::whole("`ld2` expects 2 or 3 operands"));
    }
    let regs = match &args[0].0 {
        Arg::List(regs) if regs.len() == 2 => regs.clone(),
        _ => return Err(FormError::at(args[0].1, "expected a list of two registers")),
    };
    let base = match &args[1].0 {
        Arg::Mem {
            base,
            offset: 0,
            writeback: false,
        } => *base,
        _ => return Err(FormError::at(args[1].1, "expected `[base]`")),
    };
    let increment = args.get(2).map(imm).transpose()?;

    let (template, base_slot) = match increment {
        Some(inc) => (format!("ld2 {{{{o0}}, {{o1}}}}, [{{io0}}], #{}", inc), (Role::InOut, 0)),
        None => ("ld2 {{o0}, {o1}}, [{i0}]".to_string(), (Role::In, 0)),
    };
    let mut inst = Instruction::new("ld2", InstrClass::VecLoad, &template)
        .with_out(regs[0], RegType::Vector)
        .with_out(regs[1], RegType::Vector);
    inst = match increment {
        Some(_) => inst.with_in_out(base, RegType::Gpr),
        None => inst.with_in(base, RegType::Gpr),
    };
    inst.out_combinations.push(Combination {
        slots: vec![0, 1],
        choices: registers::consecutive_vector_pairs(),
    });
    Ok(vec![inst.with_mem(MemAccess {
        base: base_slot,
        offset: 0,
        increment,
        offset_adjustable: false,
        is_load: true,
    })])
}

fn ins(args: &[Spanned<Arg<'_>>]) -> Forms {
    arity(args, 2, "ins")?;
    let (dst, elem, lane) = match &args[0].0 {
        Arg::Lane { reg, elem, lane } => (*reg, *elem, *lane),
        _ => return Err(FormError::at(args[0].1, "expected a vector lane")),
    };
    if elem != "d" || lane > 1 {
        return Err(FormError::at(args[0].1, "only `.d[0]` and `.d[1]` lanes are supported"));
    }
    let template = format!("ins {{io0}}.d[{}], {{i0}}", lane);
    let mut inst = Instruction::new("ins", InstrClass::VecInsert, &template)
        .with_in_out(dst, RegType::Vector)
        .with_in(reg(&args[1])?, RegType::Gpr);
    inst.lane = Some(lane);
    Ok(vec![inst])
}
