//! The four coupled SSA middle-end passes plus the ambient dead-code
//! supplement, wired into the fixed pipeline order spec §2 names: SCCP →
//! DCE → CSE+hoist → LICM → trim.
//!
//! Grounded on the teacher's `hir::pass::PassManager` driver (a fixed,
//! hand-written pass sequence rather than a generic registry, since this
//! crate's pipeline order is load-bearing and never reordered at runtime).

pub mod cse;
pub mod dce;
pub mod licm;
pub mod sccp;
pub mod trim;

pub use cse::Cse;
pub use dce::Dce;
pub use licm::Licm;
pub use sccp::Sccp;
pub use trim::Trim;

use ssa_ir::{ChangeResult, Function, FunctionPass, PassConfig};

/// Runs every pass once, in the fixed order SCCP → DCE → CSE+hoist → LICM →
/// trim, re-running DCE immediately after CSE+hoist if hoisting left behind
/// any `Copy`/`Invalid` husks worth sweeping before LICM sees the function
/// (spec §4.7). Returns whether any pass changed anything.
pub fn run_pipeline(func: &mut Function, config: &PassConfig) -> ChangeResult {
    let mut changed = ChangeResult::Unchanged;

    changed |= Sccp::run(func, config);
    changed |= Dce::run(func, config);
    let cse_changed = Cse::run(func, config);
    changed |= cse_changed;
    if cse_changed.changed() {
        changed |= Dce::run(func, config);
    }
    changed |= Licm::run(func, config);
    changed |= Trim::run(func, config);

    changed
}

/// Runs [`run_pipeline`] to a fixed point: repeats the full sequence until a
/// round makes no further change, bounded by `max_rounds` as a safety net
/// against a pass pair that could otherwise oscillate forever.
pub fn run_pipeline_to_fixed_point(func: &mut Function, config: &PassConfig, max_rounds: u32) -> u32 {
    let mut rounds = 0;
    while rounds < max_rounds {
        rounds += 1;
        if !run_pipeline(func, config).changed() {
            break;
        }
    }
    rounds
}

/// Initializes a best-effort test logger from `SSA_OPT_TRACE`, so a failing
/// test can be re-run with that env var set to see every pass's
/// `log::trace!`/`debug!` output. Safe to call from more than one test in a
/// binary; only the first call wins.
#[cfg(test)]
pub(crate) fn init_test_logger() {
    let _ = env_logger::Builder::from_env("SSA_OPT_TRACE").format_timestamp(None).is_test(true).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssa_ir::{BlockKind, Opcode, Type};

    /// Spec §8's "pipeline idempotence" property: a second full run over
    /// the first run's output changes nothing.
    #[test]
    fn second_pipeline_run_is_a_no_op() {
        init_test_logger();
        let mut func = Function::new("f");
        let entry = func.entry();
        let a = func.new_const(entry, Opcode::Const32, Type::I32, 3);
        let b = func.new_const(entry, Opcode::Const32, Type::I32, 4);
        let sum = func.new_value(entry, Opcode::Add, Type::I32, [a, b]);
        func.set_control(entry, Some(sum));
        let ret = func.create_block(BlockKind::Ret);
        func.add_edge(entry, ret);

        let config = PassConfig::new();
        run_pipeline_to_fixed_point(&mut func, &config, 8);
        let changed = run_pipeline(&mut func, &config);
        assert!(!changed.changed());
    }

    /// SCCP folds the constant add, then DCE removes the now-unreferenced
    /// original addends, across a single call to the driver.
    #[test]
    fn pipeline_folds_and_cleans_up_in_one_pass() {
        let mut func = Function::new("f");
        let entry = func.entry();
        let a = func.new_const(entry, Opcode::Const32, Type::I32, 3);
        let b = func.new_const(entry, Opcode::Const32, Type::I32, 4);
        let sum = func.new_value(entry, Opcode::Add, Type::I32, [a, b]);
        func.set_control(entry, Some(sum));

        let config = PassConfig::new();
        let changed = run_pipeline(&mut func, &config);
        assert!(changed.changed());
        assert_eq!(func.value(sum).opcode, Opcode::Const32);
        assert_eq!(func.value(sum).aux_int, 7);
    }
}
