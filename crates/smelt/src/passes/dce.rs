//! Dead-code elimination.
//!
//! Removes pure instructions whose results are never used. Calls are always
//! kept; block parameters are part of the function's control-flow interface
//! and are never pruned (an unused entry parameter after specialization
//! simply stays unread, leaving the signature intact).

use std::collections::{HashMap, HashSet};

use super::FunctionPass;
use crate::ir::{self, Value};

pub struct Dce;

impl FunctionPass for Dce {
    fn name(&self) -> &'static str {
        "dce"
    }

    fn run(&mut self, func: &mut ir::Function) -> bool {
        // Map each result value to its defining instruction site.
        let mut def_site: HashMap<Value, (usize, usize)> = HashMap::new();
        for (b, block) in func.blocks.iter().enumerate() {
            for (i, inst) in block.insts.iter().enumerate() {
                if let Some(r) = inst.result {
                    def_site.insert(r, (b, i));
                }
            }
        }

        let mut live_values: HashSet<Value> = HashSet::new();
        let mut worklist: Vec<Value> = Vec::new();
        let mut seed = |v: Value| worklist.push(v);
        for block in &func.blocks {
            for inst in &block.insts {
                if inst.inst.has_side_effects() {
                    inst.inst.visit_operands(&mut seed);
                }
            }
            if let Some(term) = &block.terminator {
                term.visit_operands(&mut seed);
            }
        }

        let mut live_insts: HashSet<(usize, usize)> = HashSet::new();
        while let Some(v) = worklist.pop() {
            if !live_values.insert(v) {
                continue;
            }
            if let Some(&site) = def_site.get(&v) {
                if live_insts.insert(site) {
                    let (b, i) = site;
                    func.blocks[b].insts[i]
                        .inst
                        .visit_operands(|op| worklist.push(op));
                }
            }
        }

        let mut changed = false;
        for block in &mut func.blocks {
            let before = block.insts.len();
            block.insts.retain(|inst| {
                inst.inst.has_side_effects()
                    || inst.result.is_some_and(|r| live_values.contains(&r))
            });
            changed |= block.insts.len() != before;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOp, FunctionBuilder, Signature, Type};

    #[test]
    fn removes_unused_pure_chain() {
        let sig = Signature::new(vec![], Some(Type::I32));
        let mut fb = FunctionBuilder::new("f", sig);
        let used = fb.iconst(Type::I32, 1);
        let dead_a = fb.iconst(Type::I32, 2);
        let _dead_b = fb.binary(BinOp::Add, dead_a, dead_a);
        fb.ret(Some(used));
        let mut func = fb.finish();

        assert!(Dce.run(&mut func));
        assert_eq!(func.blocks[0].insts.len(), 1);
    }

    #[test]
    fn keeps_calls_with_unused_results() {
        let sig = Signature::new(vec![], None);
        let mut fb = FunctionBuilder::new("f", sig);
        let callee_sig = Signature::new(vec![], Some(Type::I32));
        let _ignored = fb.call("effectful", &callee_sig, &[]);
        fb.ret(None);
        let mut func = fb.finish();

        assert!(!Dce.run(&mut func));
        assert_eq!(func.blocks[0].insts.len(), 1);
    }

    #[test]
    fn keeps_operands_of_live_instructions() {
        let sig = Signature::new(vec![], Some(Type::I32));
        let mut fb = FunctionBuilder::new("f", sig);
        let a = fb.iconst(Type::I32, 3);
        let b = fb.iconst(Type::I32, 4);
        let sum = fb.binary(BinOp::Add, a, b);
        fb.ret(Some(sum));
        let mut func = fb.finish();

        assert!(!Dce.run(&mut func));
        assert_eq!(func.blocks[0].insts.len(), 3);
    }
}
