//! The session coordinator and runtime resolver.
//!
//! `Session` owns the symbol registry, the profile table, and the JIT
//! engine. Instrumented code calls the C-ABI `resolve` with the generic
//! function address, the observed argument, and a pointer to the function's
//! name; the resolver counts (function, argument) pairs and, when a pair
//! crosses `SPECIALIZATION_THRESHOLD`, drives the specialization pipeline
//! and redirects the call site to the compiled result.
//!
//! All session state is confined to one thread (the resolver reaches it
//! through a thread-local installed by the driver), which is what makes a
//! concurrent specialization of the same pair impossible by construction.

use std::ffi::{c_char, CStr};

use crate::flags::is_debug_flag;
use crate::ir;
use crate::jit::{Engine, MaterializationUnit};
use crate::passes::{run_passes, CleanupPipeline, FunctionPass, InstrumentPass, SpecializePass};
use crate::profile::{ArgState, ProfileTable, SPECIALIZATION_THRESHOLD};
use crate::registry::SymbolRegistry;
use crate::SmeltError;

/// Name under which the resolver is declared in user modules and registered
/// with the JIT's absolute-symbols map.
pub const RESOLVE_NAME: &str = "resolve";

/// `i64 resolve(i64 fn, i64 arg, i8* name)`.
pub(crate) fn resolve_signature() -> ir::Signature {
    ir::Signature::new(
        vec![ir::Type::I64, ir::Type::I64, ir::Type::Ptr],
        Some(ir::Type::I64),
    )
}

/// C-ABI entry point invoked from instrumented call sites. Never unwinds
/// into JIT code: any internal failure falls back to the generic address.
pub(crate) extern "C" fn resolve_entry(fn_addr: u64, arg: u64, name: *const c_char) -> u64 {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        if name.is_null() {
            return fn_addr;
        }
        let name = unsafe { CStr::from_ptr(name) };
        let Ok(name) = name.to_str() else {
            return fn_addr;
        };
        crate::driver::with_active(|session| session.resolve_call(fn_addr, arg, name))
            .unwrap_or(fn_addr)
    }));
    outcome.unwrap_or_else(|_| {
        eprintln!("smelt: resolver panicked; dispatching generic code");
        fn_addr
    })
}

pub struct Session {
    registry: SymbolRegistry,
    profile: ProfileTable,
    engine: Engine,
    /// Every symbol of the user module with its signature; specialization
    /// modules re-declare these so cloned bodies link.
    user_sigs: Vec<(String, ir::Signature)>,
    specialization_attempts: usize,
    specializations_compiled: usize,
    pending_faults: u32,
}

impl Session {
    /// Set up a session for one user module: snapshot the pristine IR, track
    /// every defined function, declare the resolver prototype, instrument
    /// call sites, and publish each function as a lazy materialization unit.
    pub fn new(mut user: ir::Module) -> Result<Session, SmeltError> {
        let mut registry = SymbolRegistry::new();
        for func in user.defined_funcs() {
            registry.track(&func.name);
            registry.define(&func.name, func.clone());
        }
        for data in &user.data {
            registry.define_data(data.clone());
        }

        user.declare_function(RESOLVE_NAME, resolve_signature());

        let mut passes: Vec<Box<dyn FunctionPass + '_>> =
            vec![Box::new(InstrumentPass::new(&registry))];
        run_passes(&mut user, &mut passes);
        drop(passes);
        if is_debug_flag("-log-inst") {
            for func in user.defined_funcs() {
                eprintln!("smelt: instrumented {}:\n{func}", func.name);
            }
        }

        let engine = Engine::new(&[(RESOLVE_NAME, resolve_entry as *const u8)])?;
        let user_sigs: Vec<(String, ir::Signature)> = user
            .funcs
            .iter()
            .map(|f| (f.name.clone(), f.sig.clone()))
            .collect();

        let mut session = Session {
            registry,
            profile: ProfileTable::new(),
            engine,
            user_sigs,
            specialization_attempts: 0,
            specializations_compiled: 0,
            pending_faults: 0,
        };

        // Partition the instrumented module per function so each compiles on
        // first reference.
        let data = std::mem::take(&mut user.data);
        let module_name = user.name.clone();
        for func in std::mem::take(&mut user.funcs) {
            if func.is_decl() {
                continue;
            }
            let mut unit_module = ir::Module::new(format!("{}#{}", module_name, func.name));
            for (name, sig) in &session.user_sigs {
                if name != &func.name {
                    unit_module.declare_function(name, sig.clone());
                }
            }
            unit_module.data = data.clone();
            let name = func.name.clone();
            unit_module.push_function(func);
            session.engine.define(MaterializationUnit {
                name,
                module: unit_module,
                passes: Vec::new(),
            })?;
        }
        Ok(session)
    }

    /// Blocking symbol lookup in the engine's dylib.
    pub fn lookup(&mut self, name: &str) -> Result<u64, SmeltError> {
        self.engine.lookup(name)
    }

    /// Whether the engine has already emitted native code for a symbol.
    pub fn is_function_compiled(&self, name: &str) -> bool {
        self.engine.is_compiled(name)
    }

    /// The resolver state machine, keyed on `(fn_addr, arg)`.
    pub fn resolve_call(&mut self, fn_addr: u64, arg: u64, name: &str) -> u64 {
        match self.profile.arg_state(fn_addr, arg) {
            None => {
                self.profile.record(fn_addr, arg, 1);
                fn_addr
            }
            Some(ArgState::Compiled(addr)) => addr,
            Some(ArgState::Count(count)) => {
                let bumped = count + 1;
                if bumped >= SPECIALIZATION_THRESHOLD && self.registry.ir_of(name).is_some() {
                    let addr = self.compile_function(name, arg);
                    if addr != 0 {
                        match ArgState::Compiled(addr).encode() {
                            Some(raw) => {
                                self.profile.record(fn_addr, arg, raw);
                                return addr;
                            }
                            None => {
                                // An address at or below the threshold cannot
                                // share the count slot; treat as a failure.
                                eprintln!(
                                    "smelt: specialized address {addr:#x} for {name} \
                                     is not representable; dispatching generic code"
                                );
                            }
                        }
                    }
                }
                // Not yet at the threshold, or compilation failed: keep
                // counting, clamped at the threshold so the next call
                // re-enters the trigger branch.
                self.profile
                    .record(fn_addr, arg, bumped.min(SPECIALIZATION_THRESHOLD));
                fn_addr
            }
        }
    }

    /// The specialization pipeline: clone the pristine IR under a mangled
    /// name into a fresh module, publish a materialization unit whose passes
    /// freeze the argument and clean up, and force it with a blocking
    /// lookup. Returns 0 on any failure; the resolver retries later.
    pub fn compile_function(&mut self, name: &str, arg: u64) -> u64 {
        self.specialization_attempts += 1;
        let mangled = format!("{name}_{arg}");
        if self.pending_faults > 0 {
            self.pending_faults -= 1;
            eprintln!("smelt: injected materialization fault for {mangled}");
            return 0;
        }
        let Some(origin) = self.registry.ir_of(name) else {
            return 0;
        };

        let mut module = ir::Module::new(mangled.clone());
        module.declare_function(RESOLVE_NAME, resolve_signature());
        for (decl_name, sig) in &self.user_sigs {
            module.declare_function(decl_name, sig.clone());
        }
        for data in self.registry.data() {
            module.data.push(data.clone());
        }
        let mut copy = origin.clone();
        copy.name = mangled.clone();
        module.push_function(copy);

        let passes: Vec<Box<dyn FunctionPass>> = vec![
            Box::new(SpecializePass::new(arg)),
            Box::new(CleanupPipeline::new(self.registry.functions_snapshot())),
        ];
        if let Err(e) = self.engine.define(MaterializationUnit {
            name: mangled.clone(),
            module,
            passes,
        }) {
            eprintln!("smelt: cannot publish specialization {mangled}: {e}");
            return 0;
        }
        match self.engine.lookup(&mangled) {
            Ok(addr) => {
                self.specializations_compiled += 1;
                addr
            }
            Err(e) => {
                eprintln!("smelt: specialization of {mangled} failed: {e}");
                0
            }
        }
    }

    /// Force the next `n` specialization attempts to fail before reaching
    /// the engine. Exercises the transient-failure retry path.
    pub fn inject_compile_faults(&mut self, n: u32) {
        self.pending_faults += n;
    }

    pub fn registry(&self) -> &SymbolRegistry {
        &self.registry
    }

    pub fn profile(&self) -> &ProfileTable {
        &self.profile
    }

    /// Signature the user module declared for `name`, if any.
    pub fn user_signature(&self, name: &str) -> Option<&ir::Signature> {
        self.user_sigs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, sig)| sig)
    }

    /// Times the specialization pipeline was entered (including injected
    /// faults and failed materializations).
    pub fn specialization_attempts(&self) -> usize {
        self.specialization_attempts
    }

    /// Specializations that produced native code.
    pub fn specializations_compiled(&self) -> usize {
        self.specializations_compiled
    }
}
