use asmsched::config::Config;
use clap::Parser;
use std::path::PathBuf;

/// Schedule, rename and software-pipeline assembly with a constraint solver
#[derive(Debug, Parser)]
#[command(name = "asmsched", version)]
pub struct Args {
    /// Assembly file to optimize
    pub input: PathBuf,

    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Registers live after the code, comma separated
    #[arg(short, long, value_delimiter = ',')]
    pub outputs: Vec<String>,

    /// Treat the input as a loop body and software-pipeline it
    #[arg(long)]
    pub pipeline: bool,

    /// Use exactly this many stalls instead of searching for the minimum
    #[arg(long)]
    pub stalls: Option<usize>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Command line settings take precedence over the configuration file
    pub fn apply(&self, config: &mut Config) {
        config.outputs.extend(self.outputs.iter().cloned());
        if self.pipeline {
            config.sw_pipelining.enabled = true;
            config.inputs_are_outputs = true;
        }
        if let Some(stalls) = self.stalls {
            let c = &mut config.constraints;
            c.stalls_first_attempt = stalls;
            c.stalls_minimum_attempt = stalls;
            c.stalls_maximum_attempt = stalls;
        }
    }
}
