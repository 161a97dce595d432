//! Programmatic construction of IR functions.
//!
//! Mirrors the shape of `cranelift_frontend::FunctionBuilder`: create blocks,
//! switch to one, append instructions, terminate. Builder misuse (emitting
//! into a terminated block, finishing with an unterminated block) is a
//! programming error and panics with a descriptive message.

use super::{
    BinOp, BlockData, BlockId, Function, Inst, InstData, IntCc, Signature, Terminator, Type, Value,
};

pub struct FunctionBuilder {
    func: Function,
    current: BlockId,
}

impl FunctionBuilder {
    /// Start a function. The entry block is created with one parameter per
    /// signature parameter and selected as the current block.
    pub fn new(name: impl Into<String>, sig: Signature) -> Self {
        let mut func = Function {
            name: name.into(),
            sig,
            blocks: vec![BlockData::default()],
            value_types: Vec::new(),
        };
        let params: Vec<Value> = func
            .sig
            .params
            .clone()
            .into_iter()
            .map(|ty| func.new_value(ty))
            .collect();
        func.blocks[0].params = params;
        FunctionBuilder {
            func,
            current: BlockId(0),
        }
    }

    pub fn entry_block(&self) -> BlockId {
        BlockId(0)
    }

    /// Create an empty block with no parameters.
    pub fn create_block(&mut self) -> BlockId {
        self.func.blocks.push(BlockData::default());
        BlockId(self.func.blocks.len() as u32 - 1)
    }

    /// Create a block with the given parameter types.
    pub fn create_block_with_params(&mut self, tys: &[Type]) -> BlockId {
        let params: Vec<Value> = tys.iter().map(|&ty| self.func.new_value(ty)).collect();
        self.func.blocks.push(BlockData {
            params,
            ..BlockData::default()
        });
        BlockId(self.func.blocks.len() as u32 - 1)
    }

    pub fn block_params(&self, block: BlockId) -> &[Value] {
        &self.func.blocks[block.index()].params
    }

    pub fn switch_to_block(&mut self, block: BlockId) {
        self.current = block;
    }

    fn push(&mut self, result: Option<Type>, inst: Inst) -> Option<Value> {
        let block = self.current.index();
        assert!(
            self.func.blocks[block].terminator.is_none(),
            "emitting into terminated {}",
            self.current
        );
        let result = result.map(|ty| self.func.new_value(ty));
        self.func.blocks[block].insts.push(InstData { result, inst });
        result
    }

    /// `push` for instructions that always produce a value.
    fn push_value(&mut self, ty: Type, inst: Inst) -> Value {
        match self.push(Some(ty), inst) {
            Some(v) => v,
            None => unreachable!(),
        }
    }

    fn terminate(&mut self, term: Terminator) {
        let block = self.current.index();
        assert!(
            self.func.blocks[block].terminator.is_none(),
            "{} already terminated",
            self.current
        );
        self.func.blocks[block].terminator = Some(term);
    }

    // -- instructions -------------------------------------------------------

    pub fn iconst(&mut self, ty: Type, imm: i64) -> Value {
        let bits = (imm as u64) & ty.mask();
        self.push_value(ty, Inst::Iconst { ty, bits })
    }

    pub fn fconst(&mut self, ty: Type, bits: u64) -> Value {
        self.push_value(ty, Inst::Fconst { ty, bits })
    }

    /// Result type follows the left operand.
    pub fn binary(&mut self, op: BinOp, lhs: Value, rhs: Value) -> Value {
        let ty = self.func.value_type(lhs);
        self.push_value(ty, Inst::Binary { op, lhs, rhs })
    }

    pub fn icmp(&mut self, cc: IntCc, lhs: Value, rhs: Value) -> Value {
        self.push_value(Type::I8, Inst::Icmp { cc, lhs, rhs })
    }

    pub fn sext(&mut self, ty: Type, value: Value) -> Value {
        self.push_value(ty, Inst::Sext { ty, value })
    }

    pub fn trunc(&mut self, ty: Type, value: Value) -> Value {
        self.push_value(ty, Inst::Trunc { ty, value })
    }

    pub fn bitcast(&mut self, ty: Type, value: Value) -> Value {
        self.push_value(ty, Inst::Bitcast { ty, value })
    }

    pub fn func_addr(&mut self, func: &str) -> Value {
        self.push_value(Type::Ptr, Inst::FuncAddr { func: func.into() })
    }

    pub fn data_addr(&mut self, data: &str) -> Value {
        self.push_value(Type::Ptr, Inst::DataAddr { data: data.into() })
    }

    /// Direct call; returns the result value when the callee signature has
    /// one.
    pub fn call(&mut self, func: &str, sig: &Signature, args: &[Value]) -> Option<Value> {
        self.push(
            sig.ret,
            Inst::Call {
                func: func.into(),
                args: args.to_vec(),
            },
        )
    }

    pub fn call_indirect(
        &mut self,
        sig: Signature,
        callee: Value,
        args: &[Value],
    ) -> Option<Value> {
        let ret = sig.ret;
        self.push(
            ret,
            Inst::CallIndirect {
                sig,
                callee,
                args: args.to_vec(),
            },
        )
    }

    // -- terminators --------------------------------------------------------

    pub fn jump(&mut self, dest: BlockId, args: &[Value]) {
        self.terminate(Terminator::Jump {
            dest,
            args: args.to_vec(),
        });
    }

    pub fn brif(
        &mut self,
        cond: Value,
        then_dest: BlockId,
        then_args: &[Value],
        else_dest: BlockId,
        else_args: &[Value],
    ) {
        self.terminate(Terminator::Brif {
            cond,
            then_dest,
            then_args: then_args.to_vec(),
            else_dest,
            else_args: else_args.to_vec(),
        });
    }

    pub fn ret(&mut self, value: Option<Value>) {
        self.terminate(Terminator::Return { value });
    }

    /// Finish construction. Panics if any block is unterminated.
    pub fn finish(self) -> Function {
        for (i, block) in self.func.blocks.iter().enumerate() {
            assert!(
                block.terminator.is_some(),
                "block{i} of {} is unterminated",
                self.func.name
            );
        }
        self.func
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_two_block_function() {
        let sig = Signature::new(vec![Type::I32], Some(Type::I32));
        let mut fb = FunctionBuilder::new("abs_ish", sig);
        let n = fb.block_params(fb.entry_block())[0];
        let zero = fb.iconst(Type::I32, 0);
        let neg = fb.icmp(IntCc::Slt, n, zero);
        let flip = fb.create_block();
        let done = fb.create_block_with_params(&[Type::I32]);
        fb.brif(neg, flip, &[], done, &[n]);
        fb.switch_to_block(flip);
        let negated = fb.binary(BinOp::Sub, zero, n);
        fb.jump(done, &[negated]);
        fb.switch_to_block(done);
        let out = fb.block_params(done)[0];
        fb.ret(Some(out));

        let func = fb.finish();
        assert_eq!(func.blocks.len(), 3);
        assert_eq!(func.entry_params().len(), 1);
        assert_eq!(func.blocks[2].params.len(), 1);
    }

    #[test]
    #[should_panic(expected = "unterminated")]
    fn finish_rejects_unterminated_blocks() {
        let sig = Signature::new(vec![], None);
        let fb = FunctionBuilder::new("oops", sig);
        let _ = fb.finish();
    }
}
