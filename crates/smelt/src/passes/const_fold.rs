//! Constant folding.
//!
//! Folds integer arithmetic, comparisons, and width conversions whose
//! operands are constants, and rewrites conditional branches on a constant
//! condition into unconditional jumps. One forward sweep per invocation;
//! the enclosing pipeline iterates to a fixpoint.

use std::collections::HashMap;

use super::FunctionPass;
use crate::ir::{self, BinOp, Inst, IntCc, Terminator, Type, Value};

pub struct ConstFold;

/// Sign-extend a `ty`-wide bit pattern to i64.
pub(crate) fn sext_bits(ty: Type, bits: u64) -> i64 {
    let w = ty.bits();
    if w == 64 {
        bits as i64
    } else {
        let shift = 64 - w;
        ((bits << shift) as i64) >> shift
    }
}

/// Evaluate a binary op on two `ty`-wide bit patterns. `None` when the op is
/// not foldable (division by zero, shift housekeeping aside).
pub(crate) fn eval_binary(op: BinOp, ty: Type, lhs: u64, rhs: u64) -> Option<u64> {
    let mask = ty.mask();
    let sl = sext_bits(ty, lhs);
    let sr = sext_bits(ty, rhs);
    let shift_amt = (rhs % ty.bits() as u64) as u32;
    let raw = match op {
        BinOp::Add => lhs.wrapping_add(rhs),
        BinOp::Sub => lhs.wrapping_sub(rhs),
        BinOp::Mul => lhs.wrapping_mul(rhs),
        BinOp::Sdiv => {
            if sr == 0 {
                return None;
            }
            sl.wrapping_div(sr) as u64
        }
        BinOp::Srem => {
            if sr == 0 {
                return None;
            }
            sl.wrapping_rem(sr) as u64
        }
        BinOp::Udiv => {
            if (rhs & mask) == 0 {
                return None;
            }
            (lhs & mask) / (rhs & mask)
        }
        BinOp::Urem => {
            if (rhs & mask) == 0 {
                return None;
            }
            (lhs & mask) % (rhs & mask)
        }
        BinOp::And => lhs & rhs,
        BinOp::Or => lhs | rhs,
        BinOp::Xor => lhs ^ rhs,
        BinOp::Shl => (lhs & mask) << shift_amt,
        BinOp::Ushr => (lhs & mask) >> shift_amt,
        BinOp::Sshr => (sext_bits(ty, lhs) >> shift_amt) as u64,
    };
    Some(raw & mask)
}

pub(crate) fn eval_icmp(cc: IntCc, ty: Type, lhs: u64, rhs: u64) -> bool {
    let (sl, sr) = (sext_bits(ty, lhs), sext_bits(ty, rhs));
    let (ul, ur) = (lhs & ty.mask(), rhs & ty.mask());
    match cc {
        IntCc::Eq => ul == ur,
        IntCc::Ne => ul != ur,
        IntCc::Slt => sl < sr,
        IntCc::Sle => sl <= sr,
        IntCc::Sgt => sl > sr,
        IntCc::Sge => sl >= sr,
        IntCc::Ult => ul < ur,
        IntCc::Ule => ul <= ur,
        IntCc::Ugt => ul > ur,
        IntCc::Uge => ul >= ur,
    }
}

/// Map from value to known constant, seeded from every `Iconst` in the body.
pub(crate) fn known_constants(func: &ir::Function) -> HashMap<Value, (Type, u64)> {
    let mut consts = HashMap::new();
    for block in &func.blocks {
        for inst in &block.insts {
            if let (Some(result), Inst::Iconst { ty, bits }) = (inst.result, &inst.inst) {
                consts.insert(result, (*ty, *bits));
            }
        }
    }
    consts
}

impl FunctionPass for ConstFold {
    fn name(&self) -> &'static str {
        "const-fold"
    }

    fn run(&mut self, func: &mut ir::Function) -> bool {
        let mut consts = known_constants(func);
        let mut changed = false;

        for block in &mut func.blocks {
            for inst_data in &mut block.insts {
                let folded: Option<(Type, u64)> = match &inst_data.inst {
                    Inst::Binary { op, lhs, rhs } => {
                        match (consts.get(lhs), consts.get(rhs)) {
                            (Some(&(ty, l)), Some(&(_, r))) => {
                                eval_binary(*op, ty, l, r).map(|bits| (ty, bits))
                            }
                            _ => None,
                        }
                    }
                    Inst::Icmp { cc, lhs, rhs } => {
                        match (consts.get(lhs), consts.get(rhs)) {
                            (Some(&(ty, l)), Some(&(_, r))) => {
                                Some((Type::I8, eval_icmp(*cc, ty, l, r) as u64))
                            }
                            _ => None,
                        }
                    }
                    Inst::Sext { ty, value } => consts
                        .get(value)
                        .map(|&(from, bits)| (*ty, (sext_bits(from, bits) as u64) & ty.mask())),
                    Inst::Trunc { ty, value } => {
                        consts.get(value).map(|&(_, bits)| (*ty, bits & ty.mask()))
                    }
                    Inst::Bitcast { ty, value } => {
                        if ty.is_scalar_int() || *ty == Type::Ptr {
                            consts.get(value).map(|&(_, bits)| (*ty, bits & ty.mask()))
                        } else {
                            None
                        }
                    }
                    _ => None,
                };
                if let (Some((ty, bits)), Some(result)) = (folded, inst_data.result) {
                    inst_data.inst = Inst::Iconst { ty, bits };
                    consts.insert(result, (ty, bits));
                    changed = true;
                }
            }

            if let Some(Terminator::Brif {
                cond,
                then_dest,
                then_args,
                else_dest,
                else_args,
            }) = &block.terminator
            {
                if let Some(&(_, bits)) = consts.get(cond) {
                    let (dest, args) = if bits != 0 {
                        (*then_dest, then_args.clone())
                    } else {
                        (*else_dest, else_args.clone())
                    };
                    block.terminator = Some(Terminator::Jump { dest, args });
                    changed = true;
                }
            }
        }
        changed
    }
}
