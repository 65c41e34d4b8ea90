use chumsky::prelude::*;

pub type Span = SimpleSpan<usize>;
pub type Spanned<T> = (T, Span);

type Extra<'src> = extra::Err<Rich<'src, char, Span>>;

/// One syntactic operand
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Arg<'src> {
    /// Register, symbolic register or condition code
    Reg(&'src str),
    /// `#imm`
    Imm(i64),
    /// `[base]`, `[base, #off]`, `[base, #off]!`
    Mem {
        base: &'src str,
        offset: i64,
        writeback: bool,
    },
    /// `{v0, v1}`
    List(Vec<&'src str>),
    /// `v0.d[1]`
    Lane {
        reg: &'src str,
        elem: &'src str,
        lane: usize,
    },
}

/// A parsed assembly statement: mnemonic plus comma-separated operands
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statement<'src> {
    pub mnemonic: &'src str,
    pub args: Vec<Spanned<Arg<'src>>>,
}

fn ident<'src>() -> impl Parser<'src, &'src str, &'src str, Extra<'src>> + Clone {
    // text::ascii::ident() does not accept digits after a leading letter in
    // every alpha release, so spell it out
    any()
        .filter(|c: &char| c.is_ascii_alphabetic() || *c == '_')
        .then(
            any()
                .filter(|c: &char| c.is_ascii_alphanumeric() || *c == '_')
                .repeated(),
        )
        .to_slice()
}

fn number<'src>() -> impl Parser<'src, &'src str, i64, Extra<'src>> + Clone {
    let hex = just("0x")
        .ignore_then(text::digits(16).to_slice())
        .try_map(|digits: &str, span| {
            i64::from_str_radix(digits, 16).map_err(|e| Rich::custom(span, e))
        });
    let dec = text::int(10)
        .to_slice()
        .try_map(|digits: &str, span| digits.parse::<i64>().map_err(|e| Rich::custom(span, e)));

    just('-')
        .or_not()
        .then(hex.or(dec))
        .map(|(neg, n)| if neg.is_some() { -n } else { n })
}

// Statement parser
pub fn statement<'src>() -> impl Parser<'src, &'src str, Statement<'src>, Extra<'src>> {
    let imm = just('#').ignore_then(number()).labelled("immediate");

    let mem = ident()
        .padded()
        .then(just(',').ignore_then(imm.clone().padded()).or_not())
        .delimited_by(just('['), just(']'))
        .then(just('!').or_not())
        .map(|((base, offset), bang)| Arg::Mem {
            base,
            offset: offset.unwrap_or(0),
            writeback: bang.is_some(),
        })
        .labelled("memory operand");

    let list = ident()
        .padded()
        .separated_by(just(','))
        .at_least(1)
        .collect::<Vec<_>>()
        .delimited_by(just('{'), just('}'))
        .map(Arg::List)
        .labelled("register list");

    let lane = ident()
        .then_ignore(just('.'))
        .then(ident())
        .then(text::int(10).to_slice().delimited_by(just('['), just(']')))
        .try_map(|((reg, elem), idx): ((&str, &str), &str), span| {
            let lane = idx.parse::<usize>().map_err(|e| Rich::custom(span, e))?;
            Ok(Arg::Lane { reg, elem, lane })
        })
        .labelled("vector lane");

    let reg = ident().map(Arg::Reg).labelled("register");

    let arg = choice((mem, list, imm.map(Arg::Imm), lane, reg))
        .map_with(|arg, e| (arg, e.span()))
        .padded();

    ident()
        .padded()
        .then(arg.separated_by(just(',')).collect::<Vec<_>>())
        .then_ignore(end())
        .map(|(mnemonic, args)| Statement { mnemonic, args })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(src: &str) -> Statement<'_> {
        statement().parse(src).into_result().unwrap()
    }

    fn args<'a>(stmt: &Statement<'a>) -> Vec<Arg<'a>> {
        stmt.args.iter().map(|(a, _)| a.clone()).collect()
    }

    #[test]
    fn test_three_registers() {
        let stmt = parse("add x1, x2, tmp_3");
        assert_eq!(stmt.mnemonic, "add");
        assert_eq!(
            args(&stmt),
            vec![Arg::Reg("x1"), Arg::Reg("x2"), Arg::Reg("tmp_3")]
        );
    }

    #[test]
    fn test_immediates() {
        let stmt = parse("sub x0, x0, #0x10");
        assert_eq!(args(&stmt)[2], Arg::Imm(16));
        let stmt = parse("add x0, x0, #-4");
        assert_eq!(args(&stmt)[2], Arg::Imm(-4));
    }

    #[test]
    fn test_memory_operands() {
        let stmt = parse("ldr x1, [x0, #8]");
        assert_eq!(
            args(&stmt)[1],
            Arg::Mem {
                base: "x0",
                offset: 8,
                writeback: false
            }
        );

        let stmt = parse("str q0, [ptr], #16");
        assert_eq!(
            args(&stmt),
            vec![
                Arg::Reg("q0"),
                Arg::Mem {
                    base: "ptr",
                    offset: 0,
                    writeback: false
                },
                Arg::Imm(16)
            ]
        );

        let stmt = parse("ldr x1, [ x0 , #8 ]!");
        assert!(matches!(args(&stmt)[1], Arg::Mem { writeback: true, .. }));
    }

    #[test]
    fn test_list_and_lane() {
        let stmt = parse("ld2 {a, b}, [src]");
        assert_eq!(args(&stmt)[0], Arg::List(vec!["a", "b"]));

        let stmt = parse("ins v3.d[1], x4");
        assert_eq!(
            args(&stmt)[0],
            Arg::Lane {
                reg: "v3",
                elem: "d",
                lane: 1
            }
        );
    }

    #[test]
    fn test_spans_point_into_text() {
        let src = "mul x1, x2, x3";
        let stmt = parse(src);
        let (_, span) = &stmt.args[1];
        assert_eq!(&src[span.start..span.end], "x2");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(statement().parse("add x1,, x2").into_result().is_err());
        assert!(statement().parse("ldr x1, [x0").into_result().is_err());
    }
}
