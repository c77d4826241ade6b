//! The ambient pass-running machinery shared by every transform in
//! `ssa-opt`: a `PassConfig` knob for verbosity, a `FunctionPass` trait, and
//! a small `ChangeResult` idiom for tracking whether a pass did anything.
//!
//! Grounded on the teacher's `hir::pass::{Pass, PassInfo}` and
//! `hir::pass::statistics` modules, and on `hir-analysis::lattice`'s
//! `ChangeResult` enum, scaled down: the teacher's `Pass` trait threads a
//! `RewriteTracker` and diagnostics through an MLIR-style
//! `PatternRewriter`; none of that applies to a direct-mutation pass over a
//! concrete `Function`, so only the logging/stats/config idiom survives.

use std::fmt;

use crate::function::Function;

/// Whether a transformation actually modified the function. Mirrors the
/// teacher's `ChangeResult::{Changed, Unchanged}`, used throughout SCCP,
/// CSE, and LICM to decide whether another fixed-point iteration is
/// needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeResult {
    Changed,
    Unchanged,
}

impl ChangeResult {
    pub fn changed(self) -> bool {
        matches!(self, ChangeResult::Changed)
    }

    pub fn or(self, other: ChangeResult) -> ChangeResult {
        if self.changed() || other.changed() {
            ChangeResult::Changed
        } else {
            ChangeResult::Unchanged
        }
    }
}

impl std::ops::BitOr for ChangeResult {
    type Output = ChangeResult;
    fn bitor(self, rhs: ChangeResult) -> ChangeResult {
        self.or(rhs)
    }
}

impl std::ops::BitOrAssign for ChangeResult {
    fn bitor_assign(&mut self, rhs: ChangeResult) {
        *self = self.or(rhs);
    }
}

/// Per-pass verbosity knobs, threaded by reference into every pass entry
/// point. `debug` gates `log::trace!`/`log::debug!` call sites inline
/// (checked before formatting any argument, so a `debug: 0` run pays no
/// cost); `stats` gates whether counters get logged at `info` level when
/// the pass finishes, positive meaning "emit" (spec §6).
#[derive(Debug, Clone, Copy, Default)]
pub struct PassConfig {
    pub debug: u8,
    pub stats: u8,
}

impl PassConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debug(mut self, level: u8) -> Self {
        self.debug = level;
        self
    }

    pub fn with_stats(mut self, stats: u8) -> Self {
        self.stats = stats;
        self
    }
}

/// A single named counter a pass reports when it finishes, e.g. `("LICM
/// MOVES", 3)`. Logged at `info` level, gated by `PassConfig::stats`.
#[derive(Debug, Clone)]
pub struct Stats {
    pass_name: &'static str,
    counters: Vec<(&'static str, u64)>,
}

impl Stats {
    pub fn new(pass_name: &'static str) -> Self {
        Self { pass_name, counters: Vec::new() }
    }

    pub fn bump(&mut self, name: &'static str, amount: u64) {
        if let Some(entry) = self.counters.iter_mut().find(|(n, _)| *n == name) {
            entry.1 += amount;
        } else {
            self.counters.push((name, amount));
        }
    }

    pub fn incr(&mut self, name: &'static str) {
        self.bump(name, 1);
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counters.iter().find(|(n, _)| *n == name).map_or(0, |(_, c)| *c)
    }

    /// Logs every nonzero counter at `info` level, formatted
    /// `"<pass> <NAME>: <count>"`, matching the teacher's
    /// `statistics::report` convention.
    pub fn report(&self, config: &PassConfig) {
        if config.stats == 0 {
            return;
        }
        for &(name, count) in &self.counters {
            if count > 0 {
                log::info!("{} {name}: {count}", self.pass_name);
            }
        }
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pass_name)?;
        for (name, count) in &self.counters {
            write!(f, " [{name}: {count}]")?;
        }
        Ok(())
    }
}

/// A transform over a single [`Function`]. Each pass in `ssa-opt` implements
/// this, following the teacher's one-function-at-a-time `Pass` convention
/// (no whole-module/call-graph passes are in scope here, spec §1).
pub trait FunctionPass {
    const NAME: &'static str;

    /// Runs the pass to its own internal fixed point (if any) and reports
    /// whether it changed anything.
    fn run(func: &mut Function, config: &PassConfig) -> ChangeResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_result_or_is_sticky() {
        let mut acc = ChangeResult::Unchanged;
        acc |= ChangeResult::Unchanged;
        assert!(!acc.changed());
        acc |= ChangeResult::Changed;
        assert!(acc.changed());
        acc |= ChangeResult::Unchanged;
        assert!(acc.changed());
    }

    #[test]
    fn stats_accumulate_across_bumps() {
        let mut stats = Stats::new("TEST");
        stats.incr("X");
        stats.bump("X", 4);
        assert_eq!(stats.get("X"), 5);
        assert_eq!(stats.get("Y"), 0);
    }
}
