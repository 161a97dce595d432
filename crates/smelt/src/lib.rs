//! smelt: a profile-guided runtime specializer.
//!
//! A lazy Cranelift-backed JIT augmented with two cooperating passes and a
//! runtime dispatcher: the instrumentation pass rewrites direct calls to
//! tracked functions into indirect calls through the resolver; the resolver
//! counts (function, argument) pairs and, once a pair has recurred
//! `SPECIALIZATION_THRESHOLD` times, clones the function's IR with that
//! argument frozen to a constant, runs the cleanup pipeline over it, and
//! publishes the specialized code under a mangled symbol. Subsequent calls
//! with the same argument dispatch straight to the specialized address.

mod driver;
mod flags;
mod intmap;
pub mod ir;
mod jit;
mod passes;
mod profile;
mod registry;
mod specializer;

pub use driver::{run_module, with_session};
pub use flags::{add_debug_flag, is_debug_flag};
pub use intmap::IntMap;
pub use jit::{Engine, MaterializationUnit};
pub use passes::{
    run_passes, CleanupPipeline, ConstFold, Dce, FunctionPass, Inline, InstrumentPass,
    SimplifyCfg, SpecializePass,
};
pub use profile::{ArgState, ProfileTable, SPECIALIZATION_THRESHOLD};
pub use registry::SymbolRegistry;
pub use specializer::{Session, RESOLVE_NAME};

#[derive(Debug, thiserror::Error)]
pub enum SmeltError {
    #[error("codegen error: {0}")]
    Codegen(String),
    #[error("symbol lookup failed: {0}")]
    Lookup(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}
