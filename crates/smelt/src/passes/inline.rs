//! Bounded inlining of constant-argument calls.
//!
//! A direct call is inlined when every argument is a known constant and the
//! callee's body is available in the pass's environment (the pristine
//! functions held by the symbol registry). Interleaved with constant folding
//! this peels one level of recursion per round: after the specialization
//! pass freezes `n`, `factorial(n - 1)` folds to `factorial(9)`, which gets
//! inlined, folds to `factorial(8)`, and so on until the body is a constant
//! return. Calls with any runtime argument are left as direct calls to the
//! generic (instrumented) code.

use std::collections::HashMap;

use super::const_fold::known_constants;
use super::FunctionPass;
use crate::ir::{self, BlockData, BlockId, Inst, InstData, Terminator, Value};

/// Maximum number of call sites expanded per materialization.
const INLINE_BUDGET: u32 = 256;

pub struct Inline {
    env: HashMap<String, ir::Function>,
    budget: u32,
}

impl Inline {
    pub fn new(env: HashMap<String, ir::Function>) -> Self {
        Inline {
            env,
            budget: INLINE_BUDGET,
        }
    }
}

impl FunctionPass for Inline {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn run(&mut self, func: &mut ir::Function) -> bool {
        let mut changed = false;
        while self.budget > 0 {
            let Some((block, index)) = find_candidate(func, &self.env) else {
                break;
            };
            let (callee_name, args, result) = match &func.blocks[block].insts[index] {
                InstData {
                    result,
                    inst: Inst::Call { func: name, args },
                } => (name.clone(), args.clone(), *result),
                _ => break,
            };
            let callee = match self.env.get(&callee_name) {
                Some(callee) => callee.clone(),
                None => break,
            };
            inline_site(func, block, index, result, &args, &callee);
            self.budget -= 1;
            changed = true;
        }
        changed
    }
}

/// First call site whose callee is in the environment and whose arguments
/// are all constants.
fn find_candidate(
    func: &ir::Function,
    env: &HashMap<String, ir::Function>,
) -> Option<(usize, usize)> {
    let consts = known_constants(func);
    for (b, block) in func.blocks.iter().enumerate() {
        for (i, inst) in block.insts.iter().enumerate() {
            let Inst::Call { func: name, args } = &inst.inst else {
                continue;
            };
            let Some(callee) = env.get(name) else {
                continue;
            };
            if callee.is_decl()
                || callee.sig.params.len() != args.len()
                || callee.sig.ret.is_some() != inst.result.is_some()
                || callee.blocks.iter().any(|b| b.terminator.is_none())
            {
                continue;
            }
            if args.iter().all(|a| consts.contains_key(a)) {
                return Some((b, i));
            }
        }
    }
    None
}

/// Splice the callee's body in place of the call at `blocks[block].insts[index]`.
///
/// The caller block is split at the call: instructions after it move to a
/// fresh continuation block whose single parameter is the call's old result
/// value (so no uses need rewriting). The callee's blocks are appended with
/// values and block ids remapped; its entry parameters are substituted with
/// the (constant) argument values and its returns become jumps to the
/// continuation.
fn inline_site(
    func: &mut ir::Function,
    block: usize,
    index: usize,
    result: Option<Value>,
    args: &[Value],
    callee: &ir::Function,
) {
    // Split the caller block.
    let rest = func.blocks[block].insts.split_off(index + 1);
    func.blocks[block].insts.pop();
    let caller_term = func.blocks[block].terminator.take();
    let cont = BlockId(func.blocks.len() as u32);
    func.blocks.push(BlockData {
        params: result.into_iter().collect(),
        insts: rest,
        terminator: caller_term,
    });

    // Remap callee values and blocks into the caller.
    let value_offset = func.value_types.len() as u32;
    let block_offset = func.blocks.len() as u32;
    func.value_types.extend(callee.value_types.iter().copied());
    let entry_params = callee.blocks[0].params.clone();
    let map_val = |v: Value| -> Value {
        match entry_params.iter().position(|&p| p == v) {
            Some(k) => args[k],
            None => Value(value_offset + v.0),
        }
    };
    let map_block = |b: BlockId| BlockId(block_offset + b.0);

    for (bi, cblock) in callee.blocks.iter().enumerate() {
        let params = if bi == 0 {
            Vec::new()
        } else {
            cblock.params.iter().map(|&p| map_val(p)).collect()
        };
        let insts = cblock
            .insts
            .iter()
            .map(|id| {
                let mut inst = id.inst.clone();
                inst.map_operands(map_val);
                InstData {
                    result: id.result.map(map_val),
                    inst,
                }
            })
            .collect();
        let terminator = cblock.terminator.as_ref().map(|term| match term {
            Terminator::Return { value } => Terminator::Jump {
                dest: cont,
                args: value.map(map_val).into_iter().collect(),
            },
            other => {
                let mut t = other.clone();
                t.map_operands(map_val);
                t.map_successors(map_block);
                t
            }
        });
        func.blocks.push(BlockData {
            params,
            insts,
            terminator,
        });
    }

    func.blocks[block].terminator = Some(Terminator::Jump {
        dest: BlockId(block_offset),
        args: Vec::new(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOp, FunctionBuilder, IntCc, Signature, Type};
    use crate::passes::{ConstFold, Dce, SimplifyCfg};

    fn double_fn() -> ir::Function {
        let sig = Signature::new(vec![Type::I32], Some(Type::I32));
        let mut fb = FunctionBuilder::new("double", sig);
        let n = fb.block_params(fb.entry_block())[0];
        let out = fb.binary(BinOp::Add, n, n);
        fb.ret(Some(out));
        fb.finish()
    }

    fn factorial_fn() -> ir::Function {
        let sig = Signature::new(vec![Type::I32], Some(Type::I32));
        let mut fb = FunctionBuilder::new("factorial", sig.clone());
        let n = fb.block_params(fb.entry_block())[0];
        let zero = fb.iconst(Type::I32, 0);
        let is_zero = fb.icmp(IntCc::Eq, n, zero);
        let base = fb.create_block();
        let recurse = fb.create_block();
        fb.brif(is_zero, base, &[], recurse, &[]);
        fb.switch_to_block(base);
        let one = fb.iconst(Type::I32, 1);
        fb.ret(Some(one));
        fb.switch_to_block(recurse);
        let one2 = fb.iconst(Type::I32, 1);
        let m = fb.binary(BinOp::Sub, n, one2);
        let rec = fb.call("factorial", &sig, &[m]);
        let prod = fb.binary(BinOp::Mul, n, rec.expect("result"));
        fb.ret(Some(prod));
        fb.finish()
    }

    #[test]
    fn inlines_constant_call() {
        let mut env = HashMap::new();
        env.insert("double".to_string(), double_fn());

        let sig = Signature::new(vec![], Some(Type::I32));
        let mut fb = FunctionBuilder::new("caller", sig);
        let k = fb.iconst(Type::I32, 21);
        let callee_sig = Signature::new(vec![Type::I32], Some(Type::I32));
        let r = fb.call("double", &callee_sig, &[k]);
        fb.ret(r);
        let mut func = fb.finish();

        let mut pass = Inline::new(env);
        assert!(pass.run(&mut func));
        // No calls remain; after fold+merge the body is a constant return.
        for block in &func.blocks {
            for inst in &block.insts {
                assert!(!matches!(inst.inst, Inst::Call { .. }));
            }
        }
        ConstFold.run(&mut func);
        SimplifyCfg.run(&mut func);
        ConstFold.run(&mut func);
        Dce.run(&mut func);
        assert_eq!(func.blocks.len(), 1);
    }

    #[test]
    fn runtime_arguments_block_inlining() {
        let mut env = HashMap::new();
        env.insert("double".to_string(), double_fn());

        let sig = Signature::new(vec![Type::I32], Some(Type::I32));
        let mut fb = FunctionBuilder::new("caller", sig);
        let x = fb.block_params(fb.entry_block())[0];
        let callee_sig = Signature::new(vec![Type::I32], Some(Type::I32));
        let r = fb.call("double", &callee_sig, &[x]);
        fb.ret(r);
        let mut func = fb.finish();

        let mut pass = Inline::new(env);
        assert!(!pass.run(&mut func));
    }

    #[test]
    fn iterated_rounds_collapse_bounded_recursion() {
        let mut env = HashMap::new();
        env.insert("factorial".to_string(), factorial_fn());

        let sig = Signature::new(vec![], Some(Type::I32));
        let mut fb = FunctionBuilder::new("caller", sig);
        let five = fb.iconst(Type::I32, 5);
        let callee_sig = Signature::new(vec![Type::I32], Some(Type::I32));
        let r = fb.call("factorial", &callee_sig, &[five]);
        fb.ret(r);
        let mut func = fb.finish();

        let mut inline = Inline::new(env);
        for _ in 0..32 {
            let mut round = false;
            round |= ConstFold.run(&mut func);
            round |= inline.run(&mut func);
            round |= SimplifyCfg.run(&mut func);
            round |= Dce.run(&mut func);
            if !round {
                break;
            }
        }

        assert_eq!(func.blocks.len(), 1);
        let block = &func.blocks[0];
        assert_eq!(block.insts.len(), 1);
        match (&block.insts[0].inst, &block.terminator) {
            (Inst::Iconst { bits, .. }, Some(Terminator::Return { value: Some(_) })) => {
                assert_eq!(*bits, 120);
            }
            other => panic!("expected constant return, got {other:?}"),
        }
    }
}
