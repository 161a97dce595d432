//! The lazy JIT engine.
//!
//! Plays the execution-session/dylib role the specializer consumes: symbols
//! are published as materialization units (an IR module providing one
//! defined function, plus the passes to run on it), and a blocking `lookup`
//! materializes on first request (passes, lowering, definition, then a
//! single finalization that also pulls in any referenced pending symbols).
//! Functions that are never referenced are never compiled.
//!
//! Native code generation and linking are Cranelift's `JITModule`.
//! Builder-registered symbols (the resolver) and the host process's own
//! symbols (`libc`, via the module's dlsym fallback) satisfy imports that no
//! unit provides.

mod lower;

use std::collections::HashMap;
use std::io::Write;

use cranelift_codegen::Context;
use cranelift_frontend::FunctionBuilderContext;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{default_libcall_names, DataDescription, FuncId, Linkage, Module};

use crate::flags::is_debug_flag;
use crate::ir;
use crate::passes::{run_passes, FunctionPass};
use crate::SmeltError;

/// A pending symbol definition: the module that provides it and the
/// transforms to run when it is first looked up.
pub struct MaterializationUnit {
    pub name: String,
    pub module: ir::Module,
    pub passes: Vec<Box<dyn FunctionPass>>,
}

enum SymbolState {
    Pending(MaterializationUnit),
    /// Materialization in progress further up the call stack; references to
    /// this symbol resolve through the in-flight definition.
    Materializing,
    Compiled(u64),
}

pub struct Engine {
    jit: JITModule,
    ctx: Context,
    fctx: FunctionBuilderContext,
    symbols: HashMap<String, SymbolState>,
    data_ids: HashMap<String, cranelift_module::DataId>,
}

impl Engine {
    /// Build the engine with the given absolute symbols pre-registered
    /// (name -> native address); this is how the resolver's address reaches
    /// generated code.
    pub fn new(absolute_symbols: &[(&str, *const u8)]) -> Result<Engine, SmeltError> {
        let mut builder = JITBuilder::new(default_libcall_names())
            .map_err(|e| SmeltError::Codegen(format!("jit builder init failed: {e}")))?;
        for &(name, ptr) in absolute_symbols {
            builder.symbol(name, ptr);
        }
        let jit = JITModule::new(builder);
        let ctx = jit.make_context();
        Ok(Engine {
            jit,
            ctx,
            fctx: FunctionBuilderContext::new(),
            symbols: HashMap::new(),
            data_ids: HashMap::new(),
        })
    }

    /// Publish a unit. Each symbol may be defined exactly once.
    pub fn define(&mut self, unit: MaterializationUnit) -> Result<(), SmeltError> {
        if self.symbols.contains_key(&unit.name) {
            return Err(SmeltError::Codegen(format!(
                "duplicate symbol definition: {}",
                unit.name
            )));
        }
        if is_debug_flag("-dbgloads") {
            eprintln!("smelt: pending unit {}", unit.name);
        }
        self.symbols.insert(unit.name.clone(), SymbolState::Pending(unit));
        Ok(())
    }

    pub fn is_compiled(&self, name: &str) -> bool {
        matches!(self.symbols.get(name), Some(SymbolState::Compiled(_)))
    }

    /// Blocking lookup: materializes the symbol (and everything its code
    /// references) if necessary and returns the native address.
    pub fn lookup(&mut self, name: &str) -> Result<u64, SmeltError> {
        if let Some(SymbolState::Compiled(addr)) = self.symbols.get(name) {
            return Ok(*addr);
        }
        let mut newly: Vec<(String, FuncId)> = Vec::new();
        self.materialize(name, &mut newly)?;
        self.jit
            .finalize_definitions()
            .map_err(|e| SmeltError::Codegen(format!("finalize failed: {e}")))?;
        for (n, id) in newly {
            let addr = self.jit.get_finalized_function(id) as u64;
            if is_debug_flag("-dbgloads") {
                eprintln!("smelt: loaded {n} at {addr:#x}");
            }
            self.symbols.insert(n, SymbolState::Compiled(addr));
        }
        if is_debug_flag("-dumpjd") {
            let mut err = std::io::stderr().lock();
            let _ = self.dump(&mut err);
        }
        match self.symbols.get(name) {
            Some(SymbolState::Compiled(addr)) => Ok(*addr),
            _ => Err(SmeltError::Lookup(format!(
                "symbol did not materialize: {name}"
            ))),
        }
    }

    fn materialize(
        &mut self,
        name: &str,
        newly: &mut Vec<(String, FuncId)>,
    ) -> Result<(), SmeltError> {
        match self.symbols.get(name) {
            Some(SymbolState::Compiled(_)) | Some(SymbolState::Materializing) => return Ok(()),
            Some(SymbolState::Pending(_)) => {}
            None => {
                return Err(SmeltError::Lookup(format!(
                    "no materialization unit for {name}"
                )))
            }
        }
        let mut unit = match self
            .symbols
            .insert(name.to_string(), SymbolState::Materializing)
        {
            Some(SymbolState::Pending(unit)) => unit,
            _ => return Ok(()),
        };
        if is_debug_flag("-dbgloads") {
            eprintln!("smelt: materializing {name}");
        }
        run_passes(&mut unit.module, &mut unit.passes);
        if let Err(e) = self.lower_unit(&unit.module, newly) {
            // Re-arm the unit so a later lookup can retry.
            self.symbols.insert(name.to_string(), SymbolState::Pending(unit));
            return Err(e);
        }
        Ok(())
    }

    fn lower_unit(
        &mut self,
        module: &ir::Module,
        newly: &mut Vec<(String, FuncId)>,
    ) -> Result<(), SmeltError> {
        for d in &module.data {
            if self.data_ids.contains_key(&d.name) {
                continue;
            }
            let id = self
                .jit
                .declare_data(&d.name, Linkage::Local, false, false)
                .map_err(|e| SmeltError::Codegen(format!("declare data {}: {e}", d.name)))?;
            let mut desc = DataDescription::new();
            desc.define(d.bytes.clone().into_boxed_slice());
            self.jit
                .define_data(id, &desc)
                .map_err(|e| SmeltError::Codegen(format!("define data {}: {e}", d.name)))?;
            self.data_ids.insert(d.name.clone(), id);
        }

        let mut all_refs: Vec<String> = Vec::new();
        for func in module.defined_funcs() {
            let sig = lower::make_sig(&self.jit, &func.sig);
            let fid = self
                .jit
                .declare_function(&func.name, Linkage::Export, &sig)
                .map_err(|e| SmeltError::Codegen(format!("declare {}: {e}", func.name)))?;
            self.jit.clear_context(&mut self.ctx);
            lower::lower_function(
                &mut self.jit,
                &mut self.ctx,
                &mut self.fctx,
                module,
                func,
                &self.data_ids,
            )?;
            self.jit
                .define_function(fid, &mut self.ctx)
                .map_err(|e| SmeltError::Codegen(format!("define {}: {e}", func.name)))?;
            newly.push((func.name.clone(), fid));
            all_refs.extend(func.referenced_funcs());
        }

        // Pull referenced pending symbols in before finalization; anything
        // unknown here resolves externally at link time.
        for r in all_refs {
            if matches!(self.symbols.get(&r), Some(SymbolState::Pending(_))) {
                self.materialize(&r, newly)?;
            }
        }
        Ok(())
    }

    /// Write the dylib's contents, one symbol per line.
    pub fn dump(&self, io: &mut dyn Write) -> std::io::Result<()> {
        writeln!(io, "smelt: jit dylib contents:")?;
        let mut names: Vec<&String> = self.symbols.keys().collect();
        names.sort();
        for name in names {
            match &self.symbols[name] {
                SymbolState::Pending(_) => writeln!(io, "  {name}: pending")?,
                SymbolState::Materializing => writeln!(io, "  {name}: materializing")?,
                SymbolState::Compiled(addr) => writeln!(io, "  {name}: {addr:#x}")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, Signature, Type};

    fn const_unit(name: &str, value: i64) -> MaterializationUnit {
        let mut module = ir::Module::new(name);
        let sig = Signature::new(vec![], Some(Type::I32));
        let mut fb = FunctionBuilder::new(name, sig);
        let k = fb.iconst(Type::I32, value);
        fb.ret(Some(k));
        module.push_function(fb.finish());
        MaterializationUnit {
            name: name.to_string(),
            module,
            passes: Vec::new(),
        }
    }

    #[test]
    fn lookup_materializes_and_returns_callable_code() {
        let mut engine = Engine::new(&[]).expect("engine");
        engine.define(const_unit("forty_two", 42)).expect("define");
        assert!(!engine.is_compiled("forty_two"));
        let addr = engine.lookup("forty_two").expect("lookup");
        assert!(engine.is_compiled("forty_two"));
        let f: extern "C" fn() -> i32 = unsafe { std::mem::transmute(addr as usize) };
        assert_eq!(f(), 42);
        // Second lookup is a cache hit on the same address.
        assert_eq!(engine.lookup("forty_two").expect("cached"), addr);
    }

    #[test]
    fn duplicate_symbol_definition_is_rejected() {
        let mut engine = Engine::new(&[]).expect("engine");
        engine.define(const_unit("twice", 1)).expect("first define");
        assert!(engine.define(const_unit("twice", 2)).is_err());
    }

    #[test]
    fn unknown_symbol_lookup_fails() {
        let mut engine = Engine::new(&[]).expect("engine");
        assert!(engine.lookup("missing").is_err());
    }

    #[test]
    fn dump_lists_symbol_states() {
        let mut engine = Engine::new(&[]).expect("engine");
        engine.define(const_unit("a", 1)).expect("define");
        engine.define(const_unit("b", 2)).expect("define");
        engine.lookup("a").expect("lookup");
        let mut out = Vec::new();
        engine.dump(&mut out).expect("dump");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("a: 0x"));
        assert!(text.contains("b: pending"));
    }
}
