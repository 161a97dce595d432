//! Lowering from the specializer IR to Cranelift.
//!
//! Block-parameter SSA maps one-to-one onto Cranelift blocks; values are
//! translated in a single forward walk. Call targets and address-of
//! references are declared as imports by name; the engine resolves them to
//! JIT-defined code, builder-registered symbols, or host-process symbols at
//! link time.

use std::collections::HashMap;

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{types, AbiParam, InstBuilder};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::JITModule;
use cranelift_module::{DataId, Linkage, Module};

use crate::ir::{self, BinOp, Inst, IntCc, Terminator};
use crate::SmeltError;

fn clif_type(jit: &JITModule, ty: ir::Type) -> cranelift_codegen::ir::Type {
    match ty {
        ir::Type::I8 => types::I8,
        ir::Type::I16 => types::I16,
        ir::Type::I32 => types::I32,
        ir::Type::I64 => types::I64,
        ir::Type::F32 => types::F32,
        ir::Type::F64 => types::F64,
        ir::Type::Ptr => jit.target_config().pointer_type(),
    }
}

pub(crate) fn make_sig(jit: &JITModule, sig: &ir::Signature) -> cranelift_codegen::ir::Signature {
    let mut out = jit.make_signature();
    for &ty in &sig.params {
        out.params.push(AbiParam::new(clif_type(jit, ty)));
    }
    if let Some(ret) = sig.ret {
        out.returns.push(AbiParam::new(clif_type(jit, ret)));
    }
    out
}

fn clif_cc(cc: IntCc) -> IntCC {
    match cc {
        IntCc::Eq => IntCC::Equal,
        IntCc::Ne => IntCC::NotEqual,
        IntCc::Slt => IntCC::SignedLessThan,
        IntCc::Sle => IntCC::SignedLessThanOrEqual,
        IntCc::Sgt => IntCC::SignedGreaterThan,
        IntCc::Sge => IntCC::SignedGreaterThanOrEqual,
        IntCc::Ult => IntCC::UnsignedLessThan,
        IntCc::Ule => IntCC::UnsignedLessThanOrEqual,
        IntCc::Ugt => IntCC::UnsignedGreaterThan,
        IntCc::Uge => IntCC::UnsignedGreaterThanOrEqual,
    }
}

/// Immediate for `iconst`: the type-masked bits, sign-extended so narrow
/// immediates stay in range.
fn sext_imm(ty: ir::Type, bits: u64) -> i64 {
    let w = ty.bits();
    if w == 64 {
        bits as i64
    } else {
        let shift = 64 - w;
        ((bits << shift) as i64) >> shift
    }
}

/// Translate one function body into `ctx.func`. The caller is responsible
/// for declaring the function itself and calling `define_function`.
pub(crate) fn lower_function(
    jit: &mut JITModule,
    ctx: &mut cranelift_codegen::Context,
    fctx: &mut FunctionBuilderContext,
    unit: &ir::Module,
    func: &ir::Function,
    data_ids: &HashMap<String, DataId>,
) -> Result<(), SmeltError> {
    let ptr_ty = jit.target_config().pointer_type();
    ctx.func.signature = make_sig(jit, &func.sig);

    let mut builder = FunctionBuilder::new(&mut ctx.func, fctx);
    let mut values: HashMap<ir::Value, cranelift_codegen::ir::Value> = HashMap::new();
    let mut func_refs: HashMap<String, cranelift_codegen::ir::FuncRef> = HashMap::new();

    let blocks: Vec<cranelift_codegen::ir::Block> =
        func.blocks.iter().map(|_| builder.create_block()).collect();

    builder.append_block_params_for_function_params(blocks[0]);
    let entry_params = builder.block_params(blocks[0]).to_vec();
    if entry_params.len() != func.blocks[0].params.len() {
        return Err(SmeltError::Codegen(format!(
            "{}: entry block has {} params for a {}-param signature",
            func.name,
            func.blocks[0].params.len(),
            entry_params.len()
        )));
    }
    for (&ir_v, &clif_v) in func.blocks[0].params.iter().zip(entry_params.iter()) {
        values.insert(ir_v, clif_v);
    }
    for (bi, block) in func.blocks.iter().enumerate().skip(1) {
        for &p in &block.params {
            let ty = clif_type(jit, func.value_type(p));
            let v = builder.append_block_param(blocks[bi], ty);
            values.insert(p, v);
        }
    }

    // Resolve a FuncRef for a named callee, declaring the import on first use.
    macro_rules! func_ref {
        ($name:expr) => {{
            let name: &str = $name;
            match func_refs.get(name) {
                Some(&fr) => fr,
                None => {
                    let sig = unit.signature_of(name).ok_or_else(|| {
                        SmeltError::Codegen(format!(
                            "{}: no declaration for callee {name}",
                            func.name
                        ))
                    })?;
                    let clif_sig = make_sig(jit, sig);
                    let fid = jit
                        .declare_function(name, Linkage::Import, &clif_sig)
                        .map_err(|e| {
                            SmeltError::Codegen(format!("declare {name}: {e}"))
                        })?;
                    let fr = jit.declare_func_in_func(fid, builder.func);
                    func_refs.insert(name.to_string(), fr);
                    fr
                }
            }
        }};
    }
    macro_rules! use_val {
        ($v:expr) => {{
            let v: ir::Value = $v;
            *values.get(&v).ok_or_else(|| {
                SmeltError::Codegen(format!("{}: use of undefined value {v}", func.name))
            })?
        }};
    }

    for (bi, block) in func.blocks.iter().enumerate() {
        builder.switch_to_block(blocks[bi]);
        for inst_data in &block.insts {
            let result: Option<cranelift_codegen::ir::Value> = match &inst_data.inst {
                Inst::Iconst { ty, bits } => {
                    Some(builder.ins().iconst(clif_type(jit, *ty), sext_imm(*ty, *bits)))
                }
                Inst::Fconst { ty, bits } => Some(match ty {
                    ir::Type::F32 => builder.ins().f32const(f32::from_bits(*bits as u32)),
                    _ => builder.ins().f64const(f64::from_bits(*bits)),
                }),
                Inst::Binary { op, lhs, rhs } => {
                    let (a, b) = (use_val!(*lhs), use_val!(*rhs));
                    let ins = builder.ins();
                    Some(match op {
                        BinOp::Add => ins.iadd(a, b),
                        BinOp::Sub => ins.isub(a, b),
                        BinOp::Mul => ins.imul(a, b),
                        BinOp::Sdiv => ins.sdiv(a, b),
                        BinOp::Srem => ins.srem(a, b),
                        BinOp::Udiv => ins.udiv(a, b),
                        BinOp::Urem => ins.urem(a, b),
                        BinOp::And => ins.band(a, b),
                        BinOp::Or => ins.bor(a, b),
                        BinOp::Xor => ins.bxor(a, b),
                        BinOp::Shl => ins.ishl(a, b),
                        BinOp::Sshr => ins.sshr(a, b),
                        BinOp::Ushr => ins.ushr(a, b),
                    })
                }
                Inst::Icmp { cc, lhs, rhs } => {
                    let (a, b) = (use_val!(*lhs), use_val!(*rhs));
                    Some(builder.ins().icmp(clif_cc(*cc), a, b))
                }
                Inst::Sext { ty, value } => {
                    let v = use_val!(*value);
                    Some(builder.ins().sextend(clif_type(jit, *ty), v))
                }
                Inst::Trunc { ty, value } => {
                    let v = use_val!(*value);
                    Some(builder.ins().ireduce(clif_type(jit, *ty), v))
                }
                Inst::Bitcast { ty, value } => {
                    // Int and pointer share a representation at machine level;
                    // a same-width bitcast is a rename.
                    let v = use_val!(*value);
                    let from = func.value_type(*value);
                    if ty.bits() != from.bits() {
                        return Err(SmeltError::Codegen(format!(
                            "{}: bitcast between widths {} and {}",
                            func.name,
                            from.bits(),
                            ty.bits()
                        )));
                    }
                    Some(v)
                }
                Inst::FuncAddr { func: callee } => {
                    let fr = func_ref!(callee);
                    Some(builder.ins().func_addr(ptr_ty, fr))
                }
                Inst::DataAddr { data } => {
                    let id = data_ids.get(data).ok_or_else(|| {
                        SmeltError::Codegen(format!("{}: unknown data {data}", func.name))
                    })?;
                    let gv = jit.declare_data_in_func(*id, builder.func);
                    Some(builder.ins().global_value(ptr_ty, gv))
                }
                Inst::Call { func: callee, args } => {
                    let fr = func_ref!(callee);
                    let mut clif_args = Vec::with_capacity(args.len());
                    for &a in args {
                        clif_args.push(use_val!(a));
                    }
                    let call = builder.ins().call(fr, &clif_args);
                    builder.inst_results(call).first().copied()
                }
                Inst::CallIndirect { sig, callee, args } => {
                    let clif_sig = make_sig(jit, sig);
                    let sig_ref = builder.import_signature(clif_sig);
                    let target = use_val!(*callee);
                    let mut clif_args = Vec::with_capacity(args.len());
                    for &a in args {
                        clif_args.push(use_val!(a));
                    }
                    let call = builder.ins().call_indirect(sig_ref, target, &clif_args);
                    builder.inst_results(call).first().copied()
                }
            };
            if let (Some(ir_result), Some(clif_result)) = (inst_data.result, result) {
                values.insert(ir_result, clif_result);
            }
        }

        let term = block.terminator.as_ref().ok_or_else(|| {
            SmeltError::Codegen(format!("{}: block{bi} is unterminated", func.name))
        })?;
        match term {
            Terminator::Jump { dest, args } => {
                let mut clif_args = Vec::with_capacity(args.len());
                for &a in args {
                    clif_args.push(use_val!(a));
                }
                builder.ins().jump(blocks[dest.index()], &clif_args);
            }
            Terminator::Brif {
                cond,
                then_dest,
                then_args,
                else_dest,
                else_args,
            } => {
                let c = use_val!(*cond);
                let mut t_args = Vec::with_capacity(then_args.len());
                for &a in then_args {
                    t_args.push(use_val!(a));
                }
                let mut e_args = Vec::with_capacity(else_args.len());
                for &a in else_args {
                    e_args.push(use_val!(a));
                }
                builder.ins().brif(
                    c,
                    blocks[then_dest.index()],
                    &t_args,
                    blocks[else_dest.index()],
                    &e_args,
                );
            }
            Terminator::Return { value } => {
                match value {
                    Some(v) => {
                        let rv = use_val!(*v);
                        builder.ins().return_(&[rv]);
                    }
                    None => {
                        builder.ins().return_(&[]);
                    }
                };
            }
        }
    }

    builder.seal_all_blocks();
    builder.finalize();
    Ok(())
}
