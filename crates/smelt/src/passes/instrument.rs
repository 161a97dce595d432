//! Call-site instrumentation.
//!
//! Rewrites direct calls to tracked functions into indirect calls resolved
//! at runtime: the generic callee address, the selected scalar-integer
//! argument, and a pointer to the callee's name are passed to the resolver,
//! and the call goes through whatever address it returns. Calls that are
//! indirect, untracked, or have no scalar-integer argument are left alone;
//! the pass never fails.

use std::collections::HashMap;
use std::mem;

use super::FunctionPass;
use crate::flags::is_debug_flag;
use crate::ir::{self, Inst, InstData, Signature, Type};
use crate::registry::SymbolRegistry;
use crate::specializer::RESOLVE_NAME;

pub struct InstrumentPass<'a> {
    registry: &'a SymbolRegistry,
    resolve_present: bool,
    sigs: HashMap<String, Signature>,
}

impl<'a> InstrumentPass<'a> {
    pub fn new(registry: &'a SymbolRegistry) -> Self {
        InstrumentPass {
            registry,
            resolve_present: false,
            sigs: HashMap::new(),
        }
    }
}

/// Index of the first scalar-integer (<= 64 bit) parameter, if any.
pub(crate) fn find_specialized_arg(sig: &Signature) -> Option<usize> {
    sig.params.iter().position(|t| t.is_scalar_int())
}

impl FunctionPass for InstrumentPass<'_> {
    fn name(&self) -> &'static str {
        "instrument"
    }

    fn init(&mut self, module: &ir::Module) {
        self.resolve_present = module.func(RESOLVE_NAME).is_some();
        self.sigs = module
            .funcs
            .iter()
            .map(|f| (f.name.clone(), f.sig.clone()))
            .collect();
    }

    fn run(&mut self, func: &mut ir::Function) -> bool {
        if !self.resolve_present || is_debug_flag("-no-inst") {
            return false;
        }
        let mut changed = false;
        for b in 0..func.blocks.len() {
            let old = mem::take(&mut func.blocks[b].insts);
            let mut insts = Vec::with_capacity(old.len());
            for inst_data in old {
                let rewrite = match &inst_data.inst {
                    Inst::Call { func: callee, args } if callee != RESOLVE_NAME => self
                        .rewrite_plan(callee, args)
                        .map(|(sig, argidx, name_ptr)| {
                            (callee.clone(), args.clone(), sig, argidx, name_ptr)
                        }),
                    _ => None,
                };
                match rewrite {
                    None => insts.push(inst_data),
                    Some((callee, args, callee_sig, argidx, name_ptr)) => {
                        // Name pointer immediate, then the generic address and
                        // argument widened to the resolver's i64 ABI.
                        let name_v = func.new_value(Type::Ptr);
                        insts.push(InstData {
                            result: Some(name_v),
                            inst: Inst::Iconst {
                                ty: Type::Ptr,
                                bits: name_ptr as u64,
                            },
                        });
                        let fn_ptr = func.new_value(Type::Ptr);
                        insts.push(InstData {
                            result: Some(fn_ptr),
                            inst: Inst::FuncAddr {
                                func: callee.clone(),
                            },
                        });
                        let fn_int = func.new_value(Type::I64);
                        insts.push(InstData {
                            result: Some(fn_int),
                            inst: Inst::Bitcast {
                                ty: Type::I64,
                                value: fn_ptr,
                            },
                        });
                        let arg = args[argidx];
                        let arg_int = if func.value_type(arg) == Type::I64 {
                            arg
                        } else {
                            let widened = func.new_value(Type::I64);
                            insts.push(InstData {
                                result: Some(widened),
                                inst: Inst::Sext {
                                    ty: Type::I64,
                                    value: arg,
                                },
                            });
                            widened
                        };
                        let addr_int = func.new_value(Type::I64);
                        insts.push(InstData {
                            result: Some(addr_int),
                            inst: Inst::Call {
                                func: RESOLVE_NAME.to_string(),
                                args: vec![fn_int, arg_int, name_v],
                            },
                        });
                        let addr = func.new_value(Type::Ptr);
                        insts.push(InstData {
                            result: Some(addr),
                            inst: Inst::Bitcast {
                                ty: Type::Ptr,
                                value: addr_int,
                            },
                        });
                        insts.push(InstData {
                            result: inst_data.result,
                            inst: Inst::CallIndirect {
                                sig: callee_sig,
                                callee: addr,
                                args,
                            },
                        });
                        changed = true;
                    }
                }
            }
            func.blocks[b].insts = insts;
        }
        changed
    }
}

impl InstrumentPass<'_> {
    /// Decide whether a direct call to `callee` is rewritten, and with what.
    fn rewrite_plan(
        &self,
        callee: &str,
        args: &[ir::Value],
    ) -> Option<(Signature, usize, *const std::ffi::c_char)> {
        if !self.registry.is_tracked(callee) {
            return None;
        }
        let sig = self.sigs.get(callee)?;
        let argidx = find_specialized_arg(sig)?;
        if argidx >= args.len() {
            return None;
        }
        let name_ptr = self.registry.name_ptr(callee)?;
        Some((sig.clone(), argidx, name_ptr))
    }
}
