//! Tracked-symbol registry.
//!
//! Records which function names belong to the active module (and may
//! therefore be trampolined by the instrumentation pass), keeps a pristine
//! pre-instrumentation clone of each function's IR for the specializer to
//! re-clone, and owns the NUL-terminated name buffers whose addresses the
//! instrumentation pass embeds into generated code. The `CString` heap
//! buffers never move once interned, so an embedded pointer stays valid for
//! as long as the registry (i.e. the session) lives.

use std::collections::HashMap;
use std::ffi::{c_char, CString};
use std::io::Write;

use crate::ir;

#[derive(Default)]
pub struct SymbolRegistry {
    tracked: HashMap<String, CString>,
    functions: HashMap<String, ir::Function>,
    data: Vec<ir::DataDecl>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        SymbolRegistry::default()
    }

    /// Register a name as belonging to the active module. Idempotent. Names
    /// with interior NUL bytes cannot be handed to the C-ABI resolver and are
    /// ignored.
    pub fn track(&mut self, name: &str) {
        if self.tracked.contains_key(name) {
            return;
        }
        match CString::new(name) {
            Ok(interned) => {
                self.tracked.insert(name.to_string(), interned);
            }
            Err(_) => {
                eprintln!("smelt: cannot track symbol with interior NUL: {name:?}");
            }
        }
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        self.tracked.contains_key(name)
    }

    /// Stable address of the tracked name's NUL-terminated bytes.
    pub fn name_ptr(&self, name: &str) -> Option<*const c_char> {
        self.tracked.get(name).map(|s| s.as_ptr())
    }

    /// Record the pristine IR for a name. Later definitions replace earlier
    /// ones.
    pub fn define(&mut self, name: &str, func: ir::Function) {
        self.functions.insert(name.to_string(), func);
    }

    pub fn ir_of(&self, name: &str) -> Option<&ir::Function> {
        self.functions.get(name)
    }

    pub fn define_data(&mut self, data: ir::DataDecl) {
        self.data.push(data);
    }

    pub fn data(&self) -> &[ir::DataDecl] {
        &self.data
    }

    pub fn functions(&self) -> impl Iterator<Item = (&str, &ir::Function)> {
        self.functions.iter().map(|(n, f)| (n.as_str(), f))
    }

    /// Owned copy of the pristine function map, handed to the inliner inside
    /// a materialization unit.
    pub fn functions_snapshot(&self) -> HashMap<String, ir::Function> {
        self.functions.clone()
    }

    /// Write all tracked symbols, one per line.
    pub fn log_symbols(&self, io: &mut dyn Write) -> std::io::Result<()> {
        let mut names: Vec<&str> = self.tracked.keys().map(String::as_str).collect();
        names.sort_unstable();
        for name in names {
            writeln!(io, "{name}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Signature, Type};

    #[test]
    fn track_is_idempotent_and_pointer_stable() {
        let mut reg = SymbolRegistry::new();
        reg.track("factorial");
        let p1 = reg.name_ptr("factorial").expect("tracked");
        reg.track("factorial");
        // Force a rehash of the backing map; the interned buffer must not move.
        for i in 0..256 {
            reg.track(&format!("filler_{i}"));
        }
        let p2 = reg.name_ptr("factorial").expect("tracked");
        assert_eq!(p1, p2);
        assert!(reg.is_tracked("factorial"));
        assert!(!reg.is_tracked("untracked"));
    }

    #[test]
    fn name_ptr_is_nul_terminated() {
        let mut reg = SymbolRegistry::new();
        reg.track("gcd");
        let ptr = reg.name_ptr("gcd").expect("tracked");
        let s = unsafe { std::ffi::CStr::from_ptr(ptr) };
        assert_eq!(s.to_str().ok(), Some("gcd"));
    }

    #[test]
    fn define_and_lookup_ir() {
        let mut reg = SymbolRegistry::new();
        let f = ir::Function::new_decl("f", Signature::new(vec![Type::I32], None));
        reg.define("f", f);
        assert!(reg.ir_of("f").is_some());
        assert!(reg.ir_of("g").is_none());
    }

    #[test]
    fn log_symbols_lists_each_name() {
        let mut reg = SymbolRegistry::new();
        reg.track("b");
        reg.track("a");
        let mut out = Vec::new();
        reg.log_symbols(&mut out).expect("write");
        assert_eq!(String::from_utf8(out).ok().as_deref(), Some("a\nb\n"));
    }
}
