//! Argument freezing.
//!
//! Replaces every use of a function's first scalar-integer parameter with a
//! literal constant, the argument value the resolver observed crossing the
//! specialization threshold. The parameter selection matches the
//! instrumentation pass, so the frozen parameter is exactly the one the
//! profile table keys on. The signature is left untouched; the parameter
//! simply becomes unread and downstream cleanup prunes whatever depended on
//! it.
//!
//! Each pass instance carries its own argument value, so materializations
//! never share mutable state.

use super::instrument::find_specialized_arg;
use super::FunctionPass;
use crate::flags::is_debug_flag;
use crate::ir::{self, Inst, InstData};

pub struct SpecializePass {
    arg: u64,
}

impl SpecializePass {
    pub fn new(arg: u64) -> Self {
        SpecializePass { arg }
    }
}

impl FunctionPass for SpecializePass {
    fn name(&self) -> &'static str {
        "specialize"
    }

    fn run(&mut self, func: &mut ir::Function) -> bool {
        if is_debug_flag("-no-spec") {
            return false;
        }
        if func.sig.params.is_empty() {
            return false;
        }
        let Some(idx) = find_specialized_arg(&func.sig) else {
            return false;
        };
        let param = func.blocks[0].params[idx];
        let ty = func.value_type(param);
        let frozen = func.new_value(ty);
        func.blocks[0].insts.insert(
            0,
            InstData {
                result: Some(frozen),
                inst: Inst::Iconst {
                    ty,
                    // Low bits only when the parameter is narrower than 64.
                    bits: self.arg & ty.mask(),
                },
            },
        );
        func.replace_uses(param, frozen);
        if is_debug_flag("-log-spec") {
            eprintln!("smelt: specialized {} for argument {}:\n{func}", func.name, self.arg);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{add_debug_flag, remove_debug_flag, TEST_FLAGS_LOCK};
    use crate::ir::{BinOp, FunctionBuilder, Signature, Type};

    fn add_one_fn() -> ir::Function {
        let sig = Signature::new(vec![Type::I32], Some(Type::I32));
        let mut fb = FunctionBuilder::new("add_one", sig);
        let n = fb.block_params(fb.entry_block())[0];
        let one = fb.iconst(Type::I32, 1);
        let out = fb.binary(BinOp::Add, n, one);
        fb.ret(Some(out));
        fb.finish()
    }

    #[test]
    fn freezes_first_integer_parameter() {
        let _guard = TEST_FLAGS_LOCK.lock();
        let mut func = add_one_fn();
        let param = func.entry_params()[0];
        assert!(SpecializePass::new(41).run(&mut func));
        // First instruction is the frozen constant, and the add no longer
        // reads the parameter.
        match &func.blocks[0].insts[0].inst {
            Inst::Iconst { bits, .. } => assert_eq!(*bits, 41),
            other => panic!("expected iconst, got {other:?}"),
        }
        let mut param_used = false;
        for block in &func.blocks {
            for inst in &block.insts {
                inst.inst.visit_operands(|v| param_used |= v == param);
            }
        }
        assert!(!param_used);
        // The signature is unchanged.
        assert_eq!(func.sig.params, vec![Type::I32]);
    }

    #[test]
    fn truncates_to_parameter_width() {
        let _guard = TEST_FLAGS_LOCK.lock();
        let sig = Signature::new(vec![Type::I8], Some(Type::I8));
        let mut fb = FunctionBuilder::new("narrow", sig);
        let n = fb.block_params(fb.entry_block())[0];
        fb.ret(Some(n));
        let mut func = fb.finish();
        assert!(SpecializePass::new(0x1234).run(&mut func));
        match &func.blocks[0].insts[0].inst {
            Inst::Iconst { bits, .. } => assert_eq!(*bits, 0x34),
            other => panic!("expected iconst, got {other:?}"),
        }
    }

    #[test]
    fn no_parameters_is_a_noop() {
        let _guard = TEST_FLAGS_LOCK.lock();
        let sig = Signature::new(vec![], Some(Type::I32));
        let mut fb = FunctionBuilder::new("nullary", sig);
        let k = fb.iconst(Type::I32, 3);
        fb.ret(Some(k));
        let mut func = fb.finish();
        assert!(!SpecializePass::new(5).run(&mut func));
    }

    #[test]
    fn float_only_parameters_is_a_noop() {
        let _guard = TEST_FLAGS_LOCK.lock();
        let sig = Signature::new(vec![Type::F64], Some(Type::F64));
        let mut fb = FunctionBuilder::new("floaty", sig);
        let x = fb.block_params(fb.entry_block())[0];
        fb.ret(Some(x));
        let mut func = fb.finish();
        assert!(!SpecializePass::new(5).run(&mut func));
    }

    #[test]
    fn no_spec_flag_disables_pass() {
        let _guard = TEST_FLAGS_LOCK.lock();
        let mut func = add_one_fn();
        add_debug_flag("-no-spec");
        let changed = SpecializePass::new(41).run(&mut func);
        remove_debug_flag("-no-spec");
        assert!(!changed);
    }
}
