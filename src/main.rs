mod cli;

use asmsched::frontend::a64::A64;
use asmsched::pipeline::{load_config, read_file, Pipeline};
use asmsched::target::InOrderDual;
use clap::Parser;
use cli::{print_outcome, report_error, Args};
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let filename = args.input.display().to_string();
    let src = match read_file(&args.input) {
        Ok(src) => src,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    args.apply(&mut config);

    match Pipeline::new(&A64, &InOrderDual, config).run(&src) {
        Ok(outcome) => {
            print_outcome(&outcome);
            ExitCode::SUCCESS
        }
        Err(e) => {
            report_error(&filename, &src, &e);
            ExitCode::FAILURE
        }
    }
}
