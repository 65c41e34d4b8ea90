//! End-to-end optimization pipeline
//!
//! # Pipeline Stages
//!
//! ```text
//! Assembly text (&str)          TOML (&str)
//!     │                              │
//!     ▼ SourceLine::parse_all        ▼ Config::from_toml + validate
//! Vec<SourceLine>                 Config
//!     │                              │
//!     └──────────────┬───────────────┘
//!                    ▼ heuristics::stall_search
//!       OptimizationResult (self-checked, fixed up)
//! ```

use crate::common::source::SourceLine;
use crate::config::{Config, ConfigError};
use crate::frontend::Architecture;
use crate::heuristics::{stall_search, StallSearch};
use crate::optimizer::OptimizeError;
use crate::target::Target;
use log::info;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Everything that can stop the pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cannot read `{path}`: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Optimize(#[from] OptimizeError),

    #[error("no solution with at most {max_stalls} stalls")]
    NoSolution { max_stalls: usize },
}

pub fn read_file(path: &Path) -> Result<String, PipelineError> {
    fs::read_to_string(path).map_err(|source| PipelineError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Load a configuration file, or the defaults when there is none
pub fn load_config(path: Option<&Path>) -> Result<Config, PipelineError> {
    match path {
        Some(path) => Ok(Config::from_toml(&read_file(path)?)?),
        None => Ok(Config::default()),
    }
}

/// One architecture/target pair and the configuration to optimize with
pub struct Pipeline<'a> {
    arch: &'a dyn Architecture,
    target: &'a dyn Target,
    config: Config,
}

impl<'a> Pipeline<'a> {
    pub fn new(arch: &'a dyn Architecture, target: &'a dyn Target, config: Config) -> Self {
        Pipeline {
            arch,
            target,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Optimize `source` with the smallest feasible number of stalls
    pub fn run(&self, source: &str) -> Result<StallSearch, PipelineError> {
        self.config.validate(self.arch)?;
        let lines = SourceLine::parse_all(source);
        info!(
            "optimizing {} lines for {} on {}",
            lines.len(),
            self.arch.name(),
            self.target.name()
        );
        stall_search(self.arch, self.target, &lines, &self.config)?.ok_or(
            PipelineError::NoSolution {
                max_stalls: self.config.constraints.stalls_maximum_attempt,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::a64::A64;
    use crate::target::InOrderDual;
    use pretty_assertions::assert_eq;

    fn pipeline(toml: &str) -> Pipeline<'static> {
        match Config::from_toml(toml) {
            Ok(config) => Pipeline::new(&A64, &InOrderDual, config),
            Err(e) => panic!("bad test config: {}", e),
        }
    }

    #[test]
    fn test_run_straight_line() {
        let p = pipeline("outputs = [\"x2\", \"x3\"]\n");
        let found = p.run("ldr x1, [x0]\nadd x2, x1, #1\nadd x3, x4, #1\n");
        assert_eq!(found.as_ref().map(|s| s.stalls).ok(), Some(2));
    }

    #[test]
    fn test_run_loop_from_toml() {
        let p = pipeline(
            "inputs_are_outputs = true\n\
             [sw_pipelining]\n\
             enabled = true\n",
        );
        let found = p.run("ldr x1, [x0], #8 // @pre\nadd x2, x2, x1\n");
        assert!(found.map(|s| s.result.pipelined()).unwrap_or(false));
    }

    #[test]
    fn test_invalid_config_stops_early() {
        let p = pipeline(
            "[constraints]\n\
             minimize_spills = true\n\
             maximize_register_lifetimes = true\n",
        );
        assert!(matches!(
            p.run("add x1, x0, #1\n"),
            Err(PipelineError::Config(ConfigError::ConflictingObjectives(_)))
        ));
    }

    #[test]
    fn test_no_solution() {
        let p = pipeline(
            "outputs = [\"x2\"]\n\
             [constraints]\n\
             stalls_maximum_attempt = 0\n",
        );
        assert!(matches!(
            p.run("ldr x1, [x0]\nadd x2, x1, #1\n"),
            Err(PipelineError::NoSolution { max_stalls: 0 })
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            read_file(Path::new("/nonexistent/input.s")),
            Err(PipelineError::Io { .. })
        ));
    }
}
