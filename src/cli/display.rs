use asmsched::common::SourceLine;
use asmsched::heuristics::StallSearch;
use asmsched::verifier::OptimizationResult;
use std::collections::BTreeMap;

fn print_lines(title: &str, lines: &[SourceLine]) {
    println!("// {}", title);
    for line in lines {
        println!("        {}", line);
    }
}

fn print_renamings(title: &str, renamings: &BTreeMap<String, String>) {
    let changed: Vec<String> = renamings
        .iter()
        .filter(|(from, to)| from != to)
        .map(|(from, to)| format!("{} -> {}", from, to))
        .collect();
    if !changed.is_empty() {
        println!("// {}: {}", title, changed.join(", "));
    }
}

fn print_loop(result: &OptimizationResult) {
    for (title, part) in [
        ("preamble", result.preamble()),
        ("kernel", result.kernel()),
        ("postamble", result.postamble()),
    ] {
        if let Ok(lines) = part {
            print_lines(title, lines);
        }
    }
    println!(
        "// {} early, {} late, {} exceptional iteration(s)",
        result.num_pre(),
        result.num_post(),
        result.num_exceptional_iterations()
    );
    if let Ok(regs) = result.kernel_input_output() {
        println!("// kernel inputs/outputs: {}", regs.join(", "));
    }
}

/// Print the optimized code and what was done to it
pub fn print_outcome(outcome: &StallSearch) {
    let result = &outcome.result;
    println!(
        "// {} instructions, {} stalls, found in {} attempt(s)",
        result.codesize(),
        outcome.stalls,
        outcome.attempts
    );
    if let Some(objective) = result.objective() {
        println!("// objective: {}", objective);
    }
    if result.spills() > 0 {
        println!("// {} spilled value(s)", result.spills());
    }

    if result.pipelined() {
        print_loop(result);
    } else {
        print_lines("optimized", result.code());
    }
    print_renamings("inputs", result.input_renamings());
    print_renamings("outputs", result.output_renamings());

    println!("// schedule");
    for line in result.visualized() {
        println!("// {}", line);
    }
}
