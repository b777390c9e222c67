use crate::{
    constant::ConstData,
    func::{Block, Func, FuncId, GlobalId, InsertAt, Inst, Value},
    instr::{
        self, Bitcast, CmpPred, Ext, ExtKind, InstrData, Intrinsic, IntrinsicCall, PredefReg,
        Unary,
    },
    region::Region,
    typ::{ElemKind, Type},
};
use compact_str::CompactString;
use cranelift_entity::EntityList;

/// Builder API for a `Func`.
pub struct FuncBuilder {
    func: Func,
    current_block: Block,
}

impl FuncBuilder {
    pub fn new(
        name: impl Into<CompactString>,
        arg_types: Vec<Type>,
        ret_type: Option<Type>,
    ) -> Self {
        let func = Func::new(name, arg_types, ret_type);
        let current_block = func.entry;
        FuncBuilder {
            func,
            current_block,
        }
    }

    pub fn func(&mut self) -> &mut Func {
        &mut self.func
    }

    pub fn arg(&self, idx: usize) -> Value {
        self.func.arg_value(idx)
    }

    pub fn create_block(&mut self) -> Block {
        self.func.add_block(None)
    }

    pub fn switch_to_block(&mut self, block: Block) {
        self.current_block = block;
    }

    pub fn append_block_param(&mut self, block: Block, typ: Type) -> Value {
        self.func.append_block_param(block, typ)
    }

    pub fn splat(&mut self, typ: Type, bits: u64) -> Value {
        self.func.make_const(ConstData::splat(typ, bits))
    }

    pub fn undef(&mut self, typ: Type) -> Value {
        self.func.undef(typ)
    }

    pub fn instr(&mut self) -> FuncInstrBuilder<'_> {
        FuncInstrBuilder {
            block: self.current_block,
            func: &mut self.func,
        }
    }

    pub fn finish(self) -> Func {
        self.func
    }
}

pub struct FuncInstrBuilder<'a> {
    func: &'a mut Func,
    block: Block,
}

impl<'a> FuncInstrBuilder<'a> {
    fn push(&mut self, data: InstrData, result_ty: Option<Type>) -> Inst {
        self.func
            .insert_inst(data, result_ty, InsertAt::Append(self.block))
    }

    fn push_val(&mut self, data: InstrData, result_ty: Type) -> Value {
        let inst = self.push(data, Some(result_ty));
        self.func.inst_result(inst).unwrap()
    }

    fn typ(&self, value: Value) -> Type {
        self.func.value_type(value)
    }

    pub fn rd_region(&mut self, src: Value, region: Region) -> Value {
        let typ = region.access_type();
        self.push_val(InstrData::RdRegion(instr::RdRegion { src, region }), typ)
    }

    pub fn wr_region(&mut self, old: Value, new: Value, region: Region) -> Value {
        let typ = self.typ(old);
        self.push_val(
            InstrData::WrRegion(instr::WrRegion { old, new, region }),
            typ,
        )
    }

    pub fn rd_pred_region(&mut self, src: Value, offset: u32, num: u32) -> Value {
        self.push_val(
            InstrData::RdPredRegion(instr::RdPredRegion { src, offset, num }),
            Type::pred(num),
        )
    }

    pub fn wr_pred_region(&mut self, old: Value, new: Value, offset: u32) -> Value {
        let typ = self.typ(old);
        self.push_val(
            InstrData::WrPredRegion(instr::WrPredRegion { old, new, offset }),
            typ,
        )
    }

    pub fn wr_pred_pred_region(
        &mut self,
        old: Value,
        new: Value,
        offset: u32,
        enable: Value,
    ) -> Value {
        let typ = self.typ(old);
        self.push_val(
            InstrData::WrPredPredRegion(instr::WrPredPredRegion {
                old,
                new,
                offset,
                enable,
            }),
            typ,
        )
    }

    pub fn neg(&mut self, src: Value) -> Value {
        let typ = self.typ(src);
        self.push_val(InstrData::Neg(Unary { src }), typ)
    }

    pub fn abs(&mut self, src: Value) -> Value {
        let typ = self.typ(src);
        self.push_val(InstrData::Abs(Unary { src }), typ)
    }

    pub fn not_mod(&mut self, src: Value) -> Value {
        let typ = self.typ(src);
        self.push_val(InstrData::NotMod(Unary { src }), typ)
    }

    pub fn sat(&mut self, src: Value) -> Value {
        let typ = self.typ(src);
        self.push_val(InstrData::Sat(Unary { src }), typ)
    }

    pub fn ext(&mut self, src: Value, kind: ExtKind, to: Type) -> Value {
        self.push_val(InstrData::Ext(Ext { src, kind, to }), to)
    }

    pub fn sext(&mut self, src: Value, to: Type) -> Value {
        self.ext(src, ExtKind::Sext, to)
    }

    pub fn zext(&mut self, src: Value, to: Type) -> Value {
        self.ext(src, ExtKind::Zext, to)
    }

    pub fn trunc(&mut self, src: Value, to: Type) -> Value {
        self.push_val(InstrData::Trunc(Unary { src }), to)
    }

    pub fn bitcast(&mut self, src: Value, to: Type) -> Value {
        self.push_val(InstrData::Bitcast(Bitcast { src, to }), to)
    }

    pub fn add(&mut self, src1: Value, src2: Value) -> Value {
        let typ = self.typ(src1);
        self.push_val(InstrData::Add(instr::Binary { src1, src2 }), typ)
    }

    pub fn sub(&mut self, src1: Value, src2: Value) -> Value {
        let typ = self.typ(src1);
        self.push_val(InstrData::Sub(instr::Binary { src1, src2 }), typ)
    }

    pub fn mul(&mut self, src1: Value, src2: Value) -> Value {
        let typ = self.typ(src1);
        self.push_val(InstrData::Mul(instr::Binary { src1, src2 }), typ)
    }

    pub fn mulh(&mut self, src1: Value, src2: Value) -> Value {
        let typ = self.typ(src1);
        self.push_val(InstrData::MulH(instr::Binary { src1, src2 }), typ)
    }

    pub fn mad(&mut self, src1: Value, src2: Value, src3: Value) -> Value {
        let typ = self.typ(src1);
        self.push_val(
            InstrData::Mad(instr::Ternary { src1, src2, src3 }),
            typ,
        )
    }

    pub fn shl(&mut self, src1: Value, src2: Value) -> Value {
        let typ = self.typ(src1);
        self.push_val(InstrData::Shl(instr::Binary { src1, src2 }), typ)
    }

    pub fn lshr(&mut self, src1: Value, src2: Value) -> Value {
        let typ = self.typ(src1);
        self.push_val(InstrData::LShr(instr::Binary { src1, src2 }), typ)
    }

    pub fn ashr(&mut self, src1: Value, src2: Value) -> Value {
        let typ = self.typ(src1);
        self.push_val(InstrData::AShr(instr::Binary { src1, src2 }), typ)
    }

    pub fn and(&mut self, src1: Value, src2: Value) -> Value {
        let typ = self.typ(src1);
        self.push_val(InstrData::And(instr::Binary { src1, src2 }), typ)
    }

    pub fn or(&mut self, src1: Value, src2: Value) -> Value {
        let typ = self.typ(src1);
        self.push_val(InstrData::Or(instr::Binary { src1, src2 }), typ)
    }

    pub fn xor(&mut self, src1: Value, src2: Value) -> Value {
        let typ = self.typ(src1);
        self.push_val(InstrData::Xor(instr::Binary { src1, src2 }), typ)
    }

    pub fn cmp(&mut self, pred: CmpPred, src1: Value, src2: Value) -> Value {
        let is_float = self.typ(src1).elem().is_float();
        let typ = Type::pred(self.typ(src1).len());
        self.push_val(
            InstrData::Cmp(instr::Cmp {
                pred,
                src1,
                src2,
                is_float,
            }),
            typ,
        )
    }

    pub fn select(&mut self, cond: Value, tval: Value, fval: Value) -> Value {
        let typ = self.typ(tval);
        self.push_val(InstrData::Select(instr::Select { cond, tval, fval }), typ)
    }

    pub fn all(&mut self, src: Value) -> Value {
        self.push_val(InstrData::All(Unary { src }), Type::pred(1))
    }

    pub fn any(&mut self, src: Value) -> Value {
        self.push_val(InstrData::Any(Unary { src }), Type::pred(1))
    }

    pub fn not_pred(&mut self, src: Value) -> Value {
        let typ = self.typ(src);
        self.push_val(InstrData::NotPred(Unary { src }), typ)
    }

    pub fn shuffle_pred(&mut self, src: Value, len: u32) -> Value {
        self.push_val(InstrData::ShufflePred(Unary { src }), Type::pred(len))
    }

    pub fn convert_addr(&mut self, src: Value) -> Value {
        let typ = self.typ(src).with_elem(ElemKind::I16);
        self.push_val(InstrData::ConvertAddr(Unary { src }), typ)
    }

    pub fn addr_add(&mut self, src1: Value, src2: Value) -> Value {
        let typ = self.typ(src1);
        self.push_val(InstrData::AddrAdd(instr::Binary { src1, src2 }), typ)
    }

    pub fn addr_or(&mut self, src1: Value, src2: Value) -> Value {
        let typ = self.typ(src1);
        self.push_val(InstrData::AddrOr(instr::Binary { src1, src2 }), typ)
    }

    pub fn jump(&mut self, target: Block, args: impl IntoIterator<Item = Value>) {
        let args = EntityList::from_iter(args, &mut self.func.val_lists);
        self.push(InstrData::Jump(instr::Jump { target, args }), None);
    }

    pub fn branch(&mut self, cond: Value, target_true: Block, target_false: Block) {
        self.push(
            InstrData::Branch(instr::Branch {
                cond,
                target_true,
                target_false,
                args_true: EntityList::new(),
                args_false: EntityList::new(),
            }),
            None,
        );
    }

    pub fn branch_with_args(
        &mut self,
        cond: Value,
        target_true: Block,
        target_false: Block,
        args_true: impl IntoIterator<Item = Value>,
        args_false: impl IntoIterator<Item = Value>,
    ) {
        let args_true = EntityList::from_iter(args_true, &mut self.func.val_lists);
        let args_false = EntityList::from_iter(args_false, &mut self.func.val_lists);
        self.push(
            InstrData::Branch(instr::Branch {
                cond,
                target_true,
                target_false,
                args_true,
                args_false,
            }),
            None,
        );
    }

    pub fn goto(&mut self, exec_mask: Value, cond: Value) -> Value {
        self.push_val(
            InstrData::Goto(instr::MaskCtl { exec_mask, cond }),
            Type::Ctl,
        )
    }

    pub fn join(&mut self, exec_mask: Value, cond: Value) -> Value {
        self.push_val(
            InstrData::Join(instr::MaskCtl { exec_mask, cond }),
            Type::Ctl,
        )
    }

    pub fn extract_mask(&mut self, src: Value, len: u32) -> Value {
        self.push_val(InstrData::ExtractMask(Unary { src }), Type::pred(len))
    }

    pub fn extract_cond(&mut self, src: Value) -> Value {
        self.push_val(InstrData::ExtractCond(Unary { src }), Type::pred(1))
    }

    pub fn ret(&mut self, value: Option<Value>) {
        self.push(InstrData::Return(instr::Return { value }), None);
    }

    pub fn load_global(&mut self, global: GlobalId, typ: Type) -> Value {
        self.push_val(InstrData::LoadGlobal(instr::LoadGlobal { global }), typ)
    }

    pub fn store_global(&mut self, global: GlobalId, value: Value) {
        self.push(
            InstrData::StoreGlobal(instr::StoreGlobal { global, value }),
            None,
        );
    }

    pub fn read_predef(&mut self, preg: PredefReg, typ: Type) -> Value {
        self.push_val(
            InstrData::ReadPredefReg(instr::ReadPredefReg { preg, typ }),
            typ,
        )
    }

    pub fn write_predef(&mut self, preg: PredefReg, value: Value) {
        self.push(
            InstrData::WritePredefReg(instr::WritePredefReg { preg, value }),
            None,
        );
    }

    pub fn call(
        &mut self,
        callee: FuncId,
        ret: Option<Type>,
        args: impl IntoIterator<Item = Value>,
    ) -> Option<Value> {
        let args = EntityList::from_iter(args, &mut self.func.val_lists);
        let inst = self.push(InstrData::Call(instr::Call { callee, args }), ret);
        self.func.inst_result(inst)
    }

    pub fn intrinsic(
        &mut self,
        intr: Intrinsic,
        args: impl IntoIterator<Item = Value>,
        ret: Option<Type>,
    ) -> Option<Value> {
        let args = EntityList::from_iter(args, &mut self.func.val_lists);
        let inst = self.push(
            InstrData::Intrinsic(IntrinsicCall { intr, args, ret }),
            ret,
        );
        self.func.inst_result(inst)
    }
}
