//! Control-flow graph simplification.
//!
//! Removes blocks unreachable from the entry (typically left behind by
//! folded conditional branches) and merges single-predecessor jump targets
//! into their predecessor, substituting block parameters with the jump's
//! arguments. The merge is what lets constants flow through block parameters
//! after a branch has been folded.

use std::collections::VecDeque;

use super::FunctionPass;
use crate::ir::{self, BlockId, Terminator};

pub struct SimplifyCfg;

impl FunctionPass for SimplifyCfg {
    fn name(&self) -> &'static str {
        "simplify-cfg"
    }

    fn run(&mut self, func: &mut ir::Function) -> bool {
        let mut changed = drop_unreachable(func);
        while merge_one(func) {
            changed = true;
            drop_unreachable(func);
        }
        changed
    }
}

/// Remove blocks unreachable from the entry, remapping block ids.
fn drop_unreachable(func: &mut ir::Function) -> bool {
    let n = func.blocks.len();
    let mut reachable = vec![false; n];
    let mut queue = VecDeque::from([0usize]);
    reachable[0] = true;
    while let Some(b) = queue.pop_front() {
        if let Some(term) = &func.blocks[b].terminator {
            for succ in term.successors() {
                let s = succ.index();
                if !reachable[s] {
                    reachable[s] = true;
                    queue.push_back(s);
                }
            }
        }
    }
    if reachable.iter().all(|&r| r) {
        return false;
    }

    let mut remap = vec![BlockId(0); n];
    let mut kept = Vec::with_capacity(n);
    for (i, block) in std::mem::take(&mut func.blocks).into_iter().enumerate() {
        if reachable[i] {
            remap[i] = BlockId(kept.len() as u32);
            kept.push(block);
        }
    }
    for block in &mut kept {
        if let Some(term) = &mut block.terminator {
            term.map_successors(|b| remap[b.index()]);
        }
    }
    func.blocks = kept;
    true
}

/// Merge one single-predecessor jump target into its predecessor. Returns
/// true when a merge happened.
fn merge_one(func: &mut ir::Function) -> bool {
    let n = func.blocks.len();
    let mut pred_edges = vec![0usize; n];
    for block in &func.blocks {
        if let Some(term) = &block.terminator {
            for succ in term.successors() {
                pred_edges[succ.index()] += 1;
            }
        }
    }

    for b in 0..n {
        let (dest, args) = match &func.blocks[b].terminator {
            Some(Terminator::Jump { dest, args }) => (*dest, args.clone()),
            _ => continue,
        };
        let d = dest.index();
        if d == 0 || d == b || pred_edges[d] != 1 {
            continue;
        }
        let params = func.blocks[d].params.clone();
        if params.len() != args.len() {
            continue;
        }
        for (&param, &arg) in params.iter().zip(args.iter()) {
            func.replace_uses(param, arg);
        }
        let insts = std::mem::take(&mut func.blocks[d].insts);
        let term = func.blocks[d].terminator.take();
        func.blocks[d].params.clear();
        func.blocks[b].insts.extend(insts);
        func.blocks[b].terminator = term;
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOp, FunctionBuilder, Inst, Signature, Type};

    #[test]
    fn merges_jump_chain_and_substitutes_params() {
        let sig = Signature::new(vec![], Some(Type::I32));
        let mut fb = FunctionBuilder::new("f", sig);
        let ten = fb.iconst(Type::I32, 10);
        let mid = fb.create_block_with_params(&[Type::I32]);
        fb.jump(mid, &[ten]);
        fb.switch_to_block(mid);
        let x = fb.block_params(mid)[0];
        let doubled = fb.binary(BinOp::Add, x, x);
        fb.ret(Some(doubled));
        let mut func = fb.finish();

        assert!(SimplifyCfg.run(&mut func));
        assert_eq!(func.blocks.len(), 1);
        // The add now reads the constant directly.
        match &func.blocks[0].insts[1].inst {
            Inst::Binary { lhs, rhs, .. } => {
                assert_eq!(*lhs, ten);
                assert_eq!(*rhs, ten);
            }
            other => panic!("expected add, got {other:?}"),
        }
    }

    #[test]
    fn drops_unreachable_branch_arm() {
        let sig = Signature::new(vec![], Some(Type::I32));
        let mut fb = FunctionBuilder::new("f", sig);
        let one = fb.iconst(Type::I32, 1);
        let dead = fb.create_block();
        let live = fb.create_block();
        fb.jump(live, &[]);
        fb.switch_to_block(dead);
        fb.ret(Some(one));
        fb.switch_to_block(live);
        fb.ret(Some(one));
        let mut func = fb.finish();

        assert!(SimplifyCfg.run(&mut func));
        assert_eq!(func.blocks.len(), 1);
    }

    #[test]
    fn keeps_diamond_with_two_predecessors() {
        let sig = Signature::new(vec![Type::I8], Some(Type::I32));
        let mut fb = FunctionBuilder::new("f", sig);
        let c = fb.block_params(fb.entry_block())[0];
        let a = fb.iconst(Type::I32, 1);
        let b = fb.iconst(Type::I32, 2);
        let t = fb.create_block();
        let e = fb.create_block();
        let join = fb.create_block_with_params(&[Type::I32]);
        fb.brif(c, t, &[], e, &[]);
        fb.switch_to_block(t);
        fb.jump(join, &[a]);
        fb.switch_to_block(e);
        fb.jump(join, &[b]);
        fb.switch_to_block(join);
        let out = fb.block_params(join)[0];
        fb.ret(Some(out));
        let mut func = fb.finish();

        // Join has two predecessors; nothing merges.
        assert!(!SimplifyCfg.run(&mut func));
        assert_eq!(func.blocks.len(), 4);
    }
}
