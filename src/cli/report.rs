// Error reporting with source highlighting using ariadne

use ariadne::{Color, Label, Report, ReportKind, Source};
use asmsched::dataflow::DataflowError;
use asmsched::optimizer::OptimizeError;
use asmsched::pipeline::PipelineError;
use std::ops::Range;

/// Report an error, highlighting the offending line when there is one
pub fn report_error(filename: &str, source: &str, error: &PipelineError) {
    let Some(report) = build_report(source, error) else {
        eprintln!("error: {}", error);
        return;
    };
    if report.eprint(Source::from(source)).is_err() {
        eprintln!("error: {}", error);
    }
    eprintln!("  --> {}", filename);
}

/// Byte range of the instruction text on line `line_no`
fn line_span(source: &str, line_no: usize, text: &str) -> Range<usize> {
    let mut offset = 0;
    for (idx, raw) in source.split('\n').enumerate() {
        if idx + 1 == line_no {
            let start = offset + raw.find(text).unwrap_or(0);
            return start..start + text.len().max(1);
        }
        offset += raw.len() + 1;
    }
    source.len()..source.len()
}

fn build_report(source: &str, error: &PipelineError) -> Option<Report<'static, Range<usize>>> {
    let PipelineError::Optimize(OptimizeError::Dataflow(error)) = error else {
        return None;
    };
    let report = match error {
        DataflowError::Parse(e) => Report::build(ReportKind::Error, e.span.clone())
            .with_code("E001")
            .with_message(format!("Cannot parse `{}`", e.text))
            .with_label(
                Label::new(e.span.clone())
                    .with_message(e.message.clone())
                    .with_color(Color::Red),
            )
            .finish(),

        DataflowError::NoValidParse {
            line_no,
            text,
            candidates,
        } => {
            let span = line_span(source, *line_no, text);
            Report::build(ReportKind::Error, span.clone())
                .with_code("E002")
                .with_message("No parsing of this instruction typechecks")
                .with_label(
                    Label::new(span)
                        .with_message("register types do not fit any instruction form")
                        .with_color(Color::Red),
                )
                .with_note(format!("Tried: {}", candidates.join("; ")))
                .finish()
        }

        DataflowError::AmbiguousParse {
            line_no,
            text,
            count,
        } => {
            let span = line_span(source, *line_no, text);
            Report::build(ReportKind::Error, span.clone())
                .with_code("E003")
                .with_message("Ambiguous instruction")
                .with_label(
                    Label::new(span)
                        .with_message(format!("{} parsings typecheck", count))
                        .with_color(Color::Red),
                )
                .with_help("Add a typing hint for the symbolic registers")
                .finish()
        }

        DataflowError::UselessInstruction {
            line_no,
            text,
            registers,
            depends_on,
            other_lines,
        } => {
            let span = line_span(source, *line_no, text);
            let mut report = Report::build(ReportKind::Error, span.clone())
                .with_code("E004")
                .with_message("Useless instruction")
                .with_label(
                    Label::new(span)
                        .with_message(format!(
                            "{} is neither read nor an output",
                            registers.join(", ")
                        ))
                        .with_color(Color::Yellow),
                )
                .with_help("Declare the register as an output or remove the instruction");
            if !depends_on.is_empty() {
                report = report.with_note(format!("Computed from {}", depends_on.join(", ")));
            }
            for &other in other_lines {
                let text = source
                    .split('\n')
                    .nth(other.saturating_sub(1))
                    .and_then(|l| l.split("//").next())
                    .unwrap_or("")
                    .trim();
                report = report.with_label(
                    Label::new(line_span(source, other, text))
                        .with_message("also unused")
                        .with_color(Color::Yellow),
                );
            }
            report.finish()
        }

        _ => return None,
    };
    Some(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_line_span() {
        let src = "add x1, x0, #1\n    add x2, x1, #1 // @id=a\n";
        assert_eq!(line_span(src, 2, "add x2, x1, #1"), 19..33);
        assert_eq!(&src[line_span(src, 1, "add x1, x0, #1")], "add x1, x0, #1");
    }

    #[test]
    fn test_every_useless_line_is_labelled() {
        let src = "add x6, x0, #4\nadd x2, x0, #1\nadd x5, x0, #3 // @id=c\n";
        let error = PipelineError::Optimize(OptimizeError::Dataflow(
            DataflowError::UselessInstruction {
                line_no: 1,
                text: "add x6, x0, #4".to_string(),
                registers: vec!["x6".to_string()],
                depends_on: vec!["x0".to_string()],
                other_lines: vec![3],
            },
        ));
        let mut out = Vec::new();
        let written = build_report(src, &error).map(|r| r.write(Source::from(src), &mut out));
        assert!(matches!(written, Some(Ok(()))));
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("E004"));
        assert!(text.contains("also unused"));
    }
}
