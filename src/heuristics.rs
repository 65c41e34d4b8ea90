//! Search strategies that call the optimizer repeatedly
//!
//! The core solves one problem with a fixed stall budget. [`stall_search`]
//! looks for the smallest budget that admits a solution: it tries
//! exponentially growing budgets until one succeeds and then bisects between
//! the last failure and that success. Every attempt runs a fresh [`Optimizer`].

use crate::common::source::SourceLine;
use crate::config::Config;
use crate::frontend::Architecture;
use crate::optimizer::{OptimizeError, Optimizer};
use crate::target::Target;
use crate::verifier::OptimizationResult;
use log::{debug, info, warn};

/// The cheapest result found by [`stall_search`]
#[derive(Debug)]
pub struct StallSearch {
    pub stalls: usize,
    pub result: OptimizationResult,
    /// Number of optimizer runs
    pub attempts: usize,
}

struct Attempts<'a> {
    arch: &'a dyn Architecture,
    target: &'a dyn Target,
    source: &'a [SourceLine],
    config: &'a Config,
    attempts: usize,
}

impl Attempts<'_> {
    fn attempt(&mut self, stalls: usize) -> Result<Option<OptimizationResult>, OptimizeError> {
        let mut config = self.config.clone();
        config.constraints.stalls_allowed = stalls;
        self.attempts += 1;
        info!("attempt {}: {} stalls", self.attempts, stalls);
        let result = Optimizer::new(self.arch, self.target, config).optimize(self.source)?;
        debug!(
            "{} stalls: {}",
            stalls,
            if result.is_some() { "success" } else { "infeasible" }
        );
        Ok(result)
    }
}

/// Minimal number of stalls in `[stalls_minimum_attempt, stalls_maximum_attempt]`
///
/// Starts at `stalls_first_attempt`. Returns `Ok(None)` if even the maximum
/// budget is infeasible. With `variable_size` the solver minimizes stalls
/// itself, so a single run with the maximum budget is made.
pub fn stall_search(
    arch: &dyn Architecture,
    target: &dyn Target,
    source: &[SourceLine],
    config: &Config,
) -> Result<Option<StallSearch>, OptimizeError> {
    let c = &config.constraints;
    let (min, max) = (c.stalls_minimum_attempt, c.stalls_maximum_attempt);
    let mut runs = Attempts {
        arch,
        target,
        source,
        config,
        attempts: 0,
    };

    if config.variable_size {
        let Some(result) = runs.attempt(max)? else {
            warn!("no solution with up to {} stalls", max);
            return Ok(None);
        };
        let stalls = result.stalls().map_or(max, |s| s.max(0) as usize);
        return Ok(Some(StallSearch {
            stalls,
            result,
            attempts: runs.attempts,
        }));
    }

    let mut lo = min;
    let mut budget = c.stalls_first_attempt.clamp(min, max);
    let mut best = loop {
        match runs.attempt(budget)? {
            Some(result) => break (budget, result),
            None if budget >= max => {
                warn!("no solution with up to {} stalls", max);
                return Ok(None);
            }
            None => {
                lo = budget + 1;
                budget = (budget.max(1) * 2).min(max);
            }
        }
    };

    let mut hi = best.0;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match runs.attempt(mid)? {
            Some(result) => {
                hi = mid;
                best = (mid, result);
            }
            None => lo = mid + 1,
        }
    }

    info!("minimal stalls: {} after {} attempts", best.0, runs.attempts);
    Ok(Some(StallSearch {
        stalls: best.0,
        result: best.1,
        attempts: runs.attempts,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::a64::A64;
    use crate::target::InOrderDual;
    use pretty_assertions::assert_eq;

    const LOAD_USE: &str = "ldr x1, [x0]\nadd x2, x1, #1\nadd x3, x4, #1\n";

    fn search(config: &Config) -> Option<StallSearch> {
        match stall_search(&A64, &InOrderDual, &SourceLine::parse_all(LOAD_USE), config) {
            Ok(found) => found,
            Err(e) => panic!("search failed: {}", e),
        }
    }

    fn config() -> Config {
        Config::default().with_outputs(["x2", "x3"])
    }

    #[test]
    fn test_finds_minimal_stalls() {
        let found = search(&config());
        assert_eq!(found.as_ref().map(|s| s.stalls), Some(2));
        // 0 fails, 2 succeeds, 1 fails
        assert_eq!(found.map(|s| s.attempts), Some(3));
    }

    #[test]
    fn test_first_attempt_above_minimum() {
        let mut cfg = config();
        cfg.constraints.stalls_first_attempt = 8;
        let found = search(&cfg);
        assert_eq!(found.map(|s| s.stalls), Some(2));
    }

    #[test]
    fn test_maximum_too_small() {
        let mut cfg = config();
        cfg.constraints.stalls_maximum_attempt = 1;
        assert!(search(&cfg).is_none());
    }

    #[test]
    fn test_variable_size_single_run() {
        let mut cfg = config();
        cfg.variable_size = true;
        cfg.constraints.stalls_maximum_attempt = 4;
        let found = search(&cfg);
        assert_eq!(found.as_ref().map(|s| s.stalls), Some(2));
        assert_eq!(found.map(|s| s.attempts), Some(1));
    }
}
