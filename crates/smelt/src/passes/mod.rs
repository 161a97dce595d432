//! IR transformation passes.
//!
//! `FunctionPass` mirrors the classic function-pass shape: an `init` hook
//! that observes the whole module once, then a `run` per defined function
//! returning whether anything changed. Materialization units carry a list of
//! boxed passes that the engine runs right before lowering.

mod const_fold;
mod dce;
mod inline;
mod instrument;
mod simplify_cfg;
mod specialize;

pub use const_fold::ConstFold;
pub use dce::Dce;
pub use inline::Inline;
pub use instrument::InstrumentPass;
pub use simplify_cfg::SimplifyCfg;
pub use specialize::SpecializePass;

use crate::flags::is_debug_flag;
use crate::ir;

pub trait FunctionPass {
    fn name(&self) -> &'static str;

    /// Called once per module before any `run`.
    fn init(&mut self, _module: &ir::Module) {}

    /// Transform one function body. Returns true when the body changed.
    fn run(&mut self, func: &mut ir::Function) -> bool;
}

/// Run each pass once, in order, over every defined function.
pub fn run_passes<'p>(module: &mut ir::Module, passes: &mut [Box<dyn FunctionPass + 'p>]) -> bool {
    let mut changed = false;
    for pass in passes {
        pass.init(module);
        for func in module.funcs.iter_mut() {
            if !func.is_decl() {
                changed |= pass.run(func);
            }
        }
    }
    changed
}

/// The post-specialization cleanup chain, iterated to a fixpoint.
///
/// Folding exposes constant arguments, inlining replaces a constant-argument
/// call with the callee's body, CFG simplification threads the folded
/// branches and substitutes block parameters, and DCE sweeps the leftovers.
/// Iterating the four collapses bounded recursion on a frozen argument into
/// a constant return.
pub struct CleanupPipeline {
    fold: ConstFold,
    inline: Inline,
    simplify: SimplifyCfg,
    dce: Dce,
}

/// Upper bound on cleanup rounds per materialization. Each inlining step
/// needs one round to fold the next call's argument, so this also bounds the
/// recursion depth that can be collapsed.
const CLEANUP_MAX_ROUNDS: u32 = 96;

impl CleanupPipeline {
    pub fn new(inline_env: std::collections::HashMap<String, ir::Function>) -> Self {
        CleanupPipeline {
            fold: ConstFold,
            inline: Inline::new(inline_env),
            simplify: SimplifyCfg,
            dce: Dce,
        }
    }
}

impl FunctionPass for CleanupPipeline {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    fn run(&mut self, func: &mut ir::Function) -> bool {
        let mut changed = false;
        for _ in 0..CLEANUP_MAX_ROUNDS {
            let mut round = false;
            round |= self.fold.run(func);
            round |= self.inline.run(func);
            round |= self.simplify.run(func);
            round |= self.dce.run(func);
            if !round {
                break;
            }
            changed = true;
        }
        if is_debug_flag("-log-spec") {
            eprintln!("smelt: after cleanup:\n{func}");
        }
        changed
    }
}
