use crate::{
    func::{Block, FuncId, GlobalId, Value},
    region::Region,
    typ::Type,
};
use cranelift_entity::{EntityList, ListPool};

/// One IR instruction. Instructions that produce a value define it as
/// the instruction's result (`ValueDef::Result`); there are no
/// destination operands.
///
/// Operand indices are payload-field order and are stable per opcode;
/// they are the coordinate system shared by the use table and by
/// fusion bitmasks. Variable-length argument lists (calls, branch
/// args) occupy the indices after the fixed operands.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum InstrData {
    // Region access.
    RdRegion(RdRegion),
    WrRegion(WrRegion),
    RdPredRegion(RdPredRegion),
    WrPredRegion(WrPredRegion),
    WrPredPredRegion(WrPredPredRegion),

    // Source modifiers.
    Neg(Unary),
    Abs(Unary),
    NotMod(Unary),
    Sat(Unary),
    Ext(Ext),
    Trunc(Unary),
    Bitcast(Bitcast),

    // Arithmetic and logic.
    Add(Binary),
    Sub(Binary),
    Mul(Binary),
    MulH(Binary),
    Mad(Ternary),
    Shl(Binary),
    LShr(Binary),
    AShr(Binary),
    And(Binary),
    Or(Binary),
    Xor(Binary),

    // Predicates.
    Cmp(Cmp),
    Select(Select),
    All(Unary),
    Any(Unary),
    NotPred(Unary),
    ShufflePred(Unary),

    // Address registers.
    ConvertAddr(Unary),
    AddrAdd(Binary),
    AddrOr(Binary),

    // Control flow.
    Jump(Jump),
    Branch(Branch),
    Goto(MaskCtl),
    Join(MaskCtl),
    ExtractMask(Unary),
    ExtractCond(Unary),
    Return(Return),

    // Memory and calls.
    LoadGlobal(LoadGlobal),
    StoreGlobal(StoreGlobal),
    ReadPredefReg(ReadPredefReg),
    WritePredefReg(WritePredefReg),
    Call(Call),
    Intrinsic(IntrinsicCall),
}

/// Read of a strided region of `src`. Operands: 0 = src, 1 = index.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RdRegion {
    pub src: Value,
    pub region: Region,
}

/// Write of `new` into a strided region of `old`, producing the
/// updated value. Operands: 0 = old, 1 = new, 2 = index, 3 = mask.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WrRegion {
    pub old: Value,
    pub new: Value,
    pub region: Region,
}

/// Read of a subvector of a predicate. Element-indexed; predicates
/// have no byte layout. Operand: 0 = src.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RdPredRegion {
    pub src: Value,
    pub offset: u32,
    pub num: u32,
}

/// Write of a predicate subvector. Operands: 0 = old, 1 = new.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WrPredRegion {
    pub old: Value,
    pub new: Value,
    pub offset: u32,
}

/// Write of a predicate subvector under a second, enabling predicate.
/// Operands: 0 = old, 1 = new, 2 = enable.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WrPredPredRegion {
    pub old: Value,
    pub new: Value,
    pub offset: u32,
    pub enable: Value,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Unary {
    pub src: Value,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Binary {
    pub src1: Value,
    pub src2: Value,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ternary {
    pub src1: Value,
    pub src2: Value,
    pub src3: Value,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExtKind {
    Sext,
    Zext,
}

/// Integer widening. Operand: 0 = src.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ext {
    pub src: Value,
    pub kind: ExtKind,
    pub to: Type,
}

/// Bit-for-bit reinterpretation. Operand: 0 = src.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Bitcast {
    pub src: Value,
    pub to: Type,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CmpPred {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Lane-wise comparison producing a predicate. Operands: 0, 1.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Cmp {
    pub pred: CmpPred,
    pub src1: Value,
    pub src2: Value,
    pub is_float: bool,
}

/// Lane-wise select. Operands: 0 = cond, 1 = if-true, 2 = if-false.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Select {
    pub cond: Value,
    pub tval: Value,
    pub fval: Value,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Jump {
    pub target: Block,
    pub args: EntityList<Value>,
}

/// Conditional branch. Operands: 0 = cond, then the per-successor
/// argument lists.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Branch {
    pub cond: Value,
    pub target_true: Block,
    pub target_false: Block,
    pub args_true: EntityList<Value>,
    pub args_false: EntityList<Value>,
}

/// Goto/join SIMD control instruction producing the opaque control
/// struct. Operands: 0 = exec mask, 1 = cond.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MaskCtl {
    pub exec_mask: Value,
    pub cond: Value,
}

/// Operand: 0 = value (absent for void returns).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Return {
    pub value: Option<Value>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LoadGlobal {
    pub global: GlobalId,
}

/// Operand: 0 = value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct StoreGlobal {
    pub global: GlobalId,
    pub value: Value,
}

/// Hardware special registers addressable by the predef-reg idioms.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PredefReg {
    Sp,
    Fp,
    Arg,
    Ret,
    Ce,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReadPredefReg {
    pub preg: PredefReg,
    pub typ: Type,
}

/// Operand: 0 = value, which must be a raw operand.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct WritePredefReg {
    pub preg: PredefReg,
    pub value: Value,
}

/// Direct call. Operands: the arguments, from index 0.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Call {
    pub callee: FuncId,
    pub args: EntityList<Value>,
}

/// The closed set of memory/send intrinsics. Each has a static operand
/// kind signature consulted by instruction selection.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    Gather,
    Scatter,
    RawSend,
    Timestamp,
}

/// Operands: the arguments, from index 0, per `Intrinsic::operand_kinds`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IntrinsicCall {
    pub intr: Intrinsic,
    pub args: EntityList<Value>,
    pub ret: Option<Type>,
}

/// Which source-modifier chain an operand position accepts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ModClass {
    None,
    Arith,
    Logic,
    ExtOnly,
}

/// Classification of an intrinsic operand position.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OperandKind {
    General(ModClass),
    /// Must be a whole, register-aligned, contiguous operand.
    Raw,
    /// Must occupy the same register as the result.
    TwoAddr,
    Predication,
}

impl Intrinsic {
    pub fn operand_kinds(self) -> &'static [OperandKind] {
        match self {
            Intrinsic::Gather => &[OperandKind::Raw, OperandKind::Predication],
            Intrinsic::Scatter => &[
                OperandKind::Raw,
                OperandKind::Raw,
                OperandKind::Predication,
            ],
            Intrinsic::RawSend => &[
                OperandKind::TwoAddr,
                OperandKind::Raw,
                OperandKind::Predication,
            ],
            Intrinsic::Timestamp => &[],
        }
    }

    /// Index of the partial-write (two-address) operand, if any.
    pub fn two_addr_operand(self) -> Option<u16> {
        self.operand_kinds()
            .iter()
            .position(|k| matches!(k, OperandKind::TwoAddr))
            .map(|i| i as u16)
    }

    pub fn may_read_memory(self) -> bool {
        matches!(self, Intrinsic::Gather | Intrinsic::RawSend)
    }

    pub fn may_write_memory(self) -> bool {
        matches!(self, Intrinsic::Scatter | Intrinsic::RawSend)
    }
}

impl InstrData {
    pub fn name(&self) -> &'static str {
        match self {
            InstrData::RdRegion(_) => "rdregion",
            InstrData::WrRegion(_) => "wrregion",
            InstrData::RdPredRegion(_) => "rdpredregion",
            InstrData::WrPredRegion(_) => "wrpredregion",
            InstrData::WrPredPredRegion(_) => "wrpredpredregion",
            InstrData::Neg(_) => "neg",
            InstrData::Abs(_) => "abs",
            InstrData::NotMod(_) => "not",
            InstrData::Sat(_) => "sat",
            InstrData::Ext(ext) => match ext.kind {
                ExtKind::Sext => "sext",
                ExtKind::Zext => "zext",
            },
            InstrData::Trunc(_) => "trunc",
            InstrData::Bitcast(_) => "bitcast",
            InstrData::Add(_) => "add",
            InstrData::Sub(_) => "sub",
            InstrData::Mul(_) => "mul",
            InstrData::MulH(_) => "mulh",
            InstrData::Mad(_) => "mad",
            InstrData::Shl(_) => "shl",
            InstrData::LShr(_) => "lshr",
            InstrData::AShr(_) => "ashr",
            InstrData::And(_) => "and",
            InstrData::Or(_) => "or",
            InstrData::Xor(_) => "xor",
            InstrData::Cmp(_) => "cmp",
            InstrData::Select(_) => "select",
            InstrData::All(_) => "all",
            InstrData::Any(_) => "any",
            InstrData::NotPred(_) => "notp",
            InstrData::ShufflePred(_) => "shufflepred",
            InstrData::ConvertAddr(_) => "convaddr",
            InstrData::AddrAdd(_) => "addradd",
            InstrData::AddrOr(_) => "addror",
            InstrData::Jump(_) => "jump",
            InstrData::Branch(_) => "branch",
            InstrData::Goto(_) => "goto",
            InstrData::Join(_) => "join",
            InstrData::ExtractMask(_) => "extractmask",
            InstrData::ExtractCond(_) => "extractcond",
            InstrData::Return(_) => "return",
            InstrData::LoadGlobal(_) => "load.global",
            InstrData::StoreGlobal(_) => "store.global",
            InstrData::ReadPredefReg(_) => "read.predef",
            InstrData::WritePredefReg(_) => "write.predef",
            InstrData::Call(_) => "call",
            InstrData::Intrinsic(call) => match call.intr {
                Intrinsic::Gather => "gather",
                Intrinsic::Scatter => "scatter",
                Intrinsic::RawSend => "raw.send",
                Intrinsic::Timestamp => "timestamp",
            },
        }
    }

    /// Small dense discriminant, used for hashing and ordering bales.
    /// Listed explicitly so ids survive variant reordering.
    pub fn opcode_id(&self) -> u16 {
        match self {
            InstrData::RdRegion(_) => 0,
            InstrData::WrRegion(_) => 1,
            InstrData::RdPredRegion(_) => 2,
            InstrData::WrPredRegion(_) => 3,
            InstrData::WrPredPredRegion(_) => 4,
            InstrData::Neg(_) => 5,
            InstrData::Abs(_) => 6,
            InstrData::NotMod(_) => 7,
            InstrData::Sat(_) => 8,
            InstrData::Ext(ext) => match ext.kind {
                ExtKind::Sext => 9,
                ExtKind::Zext => 10,
            },
            InstrData::Trunc(_) => 11,
            InstrData::Bitcast(_) => 12,
            InstrData::Add(_) => 13,
            InstrData::Sub(_) => 14,
            InstrData::Mul(_) => 15,
            InstrData::MulH(_) => 16,
            InstrData::Mad(_) => 17,
            InstrData::Shl(_) => 18,
            InstrData::LShr(_) => 19,
            InstrData::AShr(_) => 20,
            InstrData::And(_) => 21,
            InstrData::Or(_) => 22,
            InstrData::Xor(_) => 23,
            InstrData::Cmp(_) => 24,
            InstrData::Select(_) => 25,
            InstrData::All(_) => 26,
            InstrData::Any(_) => 27,
            InstrData::NotPred(_) => 28,
            InstrData::ShufflePred(_) => 29,
            InstrData::ConvertAddr(_) => 30,
            InstrData::AddrAdd(_) => 31,
            InstrData::AddrOr(_) => 32,
            InstrData::Jump(_) => 33,
            InstrData::Branch(_) => 34,
            InstrData::Goto(_) => 35,
            InstrData::Join(_) => 36,
            InstrData::ExtractMask(_) => 37,
            InstrData::ExtractCond(_) => 38,
            InstrData::Return(_) => 39,
            InstrData::LoadGlobal(_) => 40,
            InstrData::StoreGlobal(_) => 41,
            InstrData::ReadPredefReg(_) => 42,
            InstrData::WritePredefReg(_) => 43,
            InstrData::Call(_) => 44,
            InstrData::Intrinsic(call) => 45 + call.intr as u16,
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstrData::Jump(_) | InstrData::Branch(_) | InstrData::Return(_)
        )
    }

    pub fn visit_successors(&self, mut visit: impl FnMut(Block)) {
        match self {
            InstrData::Jump(ins) => visit(ins.target),
            InstrData::Branch(ins) => {
                visit(ins.target_true);
                visit(ins.target_false);
            }
            _ => {}
        }
    }

    /// Whether the instruction may read memory other than module-scope
    /// globals.
    pub fn may_read_memory(&self) -> bool {
        match self {
            InstrData::Intrinsic(call) => call.intr.may_read_memory(),
            InstrData::Call(_) => true,
            _ => false,
        }
    }

    /// Whether the instruction may write memory other than module-scope
    /// globals.
    pub fn may_write_memory(&self) -> bool {
        match self {
            InstrData::Intrinsic(call) => call.intr.may_write_memory(),
            InstrData::Call(_) => true,
            _ => false,
        }
    }

    /// Module-scope global accesses never alias ordinary loads/stores
    /// in this memory model.
    pub fn is_global_access(&self) -> bool {
        matches!(self, InstrData::LoadGlobal(_) | InstrData::StoreGlobal(_))
    }

    pub fn has_side_effect(&self) -> bool {
        self.may_write_memory()
            || self.is_terminator()
            || matches!(
                self,
                InstrData::StoreGlobal(_)
                    | InstrData::WritePredefReg(_)
                    | InstrData::Intrinsic(IntrinsicCall {
                        intr: Intrinsic::Timestamp,
                        ..
                    })
            )
    }

    /// True for the pure source-modifier opcodes that can fold into a
    /// consumer's operand encoding.
    pub fn is_modifier(&self) -> bool {
        matches!(
            self,
            InstrData::Neg(_)
                | InstrData::Abs(_)
                | InstrData::NotMod(_)
                | InstrData::Sat(_)
                | InstrData::Ext(_)
        )
    }

    /// The modifier class each operand position accepts.
    pub fn operand_mod_class(&self, idx: u16) -> ModClass {
        match self {
            InstrData::Add(_)
            | InstrData::Sub(_)
            | InstrData::Mul(_)
            | InstrData::Mad(_)
            | InstrData::Cmp(_) => ModClass::Arith,
            // Wide multiplies require exact operand width categories, so
            // they refuse extend fusion; plain modifiers are fine.
            InstrData::MulH(_) => ModClass::Arith,
            InstrData::And(_)
            | InstrData::Or(_)
            | InstrData::Xor(_)
            | InstrData::Shl(_)
            | InstrData::LShr(_)
            | InstrData::AShr(_) => ModClass::Logic,
            InstrData::Ext(_) => ModClass::ExtOnly,
            InstrData::Sat(_) => ModClass::Arith,
            InstrData::WrRegion(_) if idx == WrRegion::NEW => ModClass::Arith,
            InstrData::Intrinsic(call) => match call.intr.operand_kinds().get(idx as usize) {
                Some(OperandKind::General(class)) => *class,
                _ => ModClass::None,
            },
            _ => ModClass::None,
        }
    }

    pub fn visit_operands(&self, pool: &ListPool<Value>, mut visit: impl FnMut(u16, Value)) {
        match self {
            InstrData::RdRegion(ins) => {
                visit(RdRegion::SRC, ins.src);
                if let Some(index) = ins.region.index {
                    visit(RdRegion::INDEX, index);
                }
            }
            InstrData::WrRegion(ins) => {
                visit(WrRegion::OLD, ins.old);
                visit(WrRegion::NEW, ins.new);
                if let Some(index) = ins.region.index {
                    visit(WrRegion::INDEX, index);
                }
                if let Some(mask) = ins.region.mask {
                    visit(WrRegion::MASK, mask);
                }
            }
            InstrData::RdPredRegion(ins) => visit(0, ins.src),
            InstrData::WrPredRegion(ins) => {
                visit(0, ins.old);
                visit(1, ins.new);
            }
            InstrData::WrPredPredRegion(ins) => {
                visit(0, ins.old);
                visit(1, ins.new);
                visit(2, ins.enable);
            }
            InstrData::Neg(ins)
            | InstrData::Abs(ins)
            | InstrData::NotMod(ins)
            | InstrData::Sat(ins)
            | InstrData::Trunc(ins)
            | InstrData::All(ins)
            | InstrData::Any(ins)
            | InstrData::NotPred(ins)
            | InstrData::ShufflePred(ins)
            | InstrData::ConvertAddr(ins)
            | InstrData::ExtractMask(ins)
            | InstrData::ExtractCond(ins) => visit(0, ins.src),
            InstrData::Ext(ins) => visit(0, ins.src),
            InstrData::Bitcast(ins) => visit(0, ins.src),
            InstrData::Add(ins)
            | InstrData::Sub(ins)
            | InstrData::Mul(ins)
            | InstrData::MulH(ins)
            | InstrData::Shl(ins)
            | InstrData::LShr(ins)
            | InstrData::AShr(ins)
            | InstrData::And(ins)
            | InstrData::Or(ins)
            | InstrData::Xor(ins)
            | InstrData::AddrAdd(ins)
            | InstrData::AddrOr(ins) => {
                visit(0, ins.src1);
                visit(1, ins.src2);
            }
            InstrData::Mad(ins) => {
                visit(0, ins.src1);
                visit(1, ins.src2);
                visit(2, ins.src3);
            }
            InstrData::Cmp(ins) => {
                visit(0, ins.src1);
                visit(1, ins.src2);
            }
            InstrData::Select(ins) => {
                visit(Select::COND, ins.cond);
                visit(Select::TVAL, ins.tval);
                visit(Select::FVAL, ins.fval);
            }
            InstrData::Jump(ins) => {
                for (i, &arg) in ins.args.as_slice(pool).iter().enumerate() {
                    visit(i as u16, arg);
                }
            }
            InstrData::Branch(ins) => {
                visit(Branch::COND, ins.cond);
                let mut idx = 1;
                for &arg in ins.args_true.as_slice(pool) {
                    visit(idx, arg);
                    idx += 1;
                }
                for &arg in ins.args_false.as_slice(pool) {
                    visit(idx, arg);
                    idx += 1;
                }
            }
            InstrData::Goto(ins) | InstrData::Join(ins) => {
                visit(0, ins.exec_mask);
                visit(1, ins.cond);
            }
            InstrData::Return(ins) => {
                if let Some(value) = ins.value {
                    visit(0, value);
                }
            }
            InstrData::LoadGlobal(_) | InstrData::ReadPredefReg(_) => {}
            InstrData::StoreGlobal(ins) => visit(0, ins.value),
            InstrData::WritePredefReg(ins) => visit(0, ins.value),
            InstrData::Call(ins) => {
                for (i, &arg) in ins.args.as_slice(pool).iter().enumerate() {
                    visit(i as u16, arg);
                }
            }
            InstrData::Intrinsic(ins) => {
                for (i, &arg) in ins.args.as_slice(pool).iter().enumerate() {
                    visit(i as u16, arg);
                }
            }
        }
    }

    /// Rewrites every operand in place through `map`. The mapper
    /// receives the stable operand index alongside the current value.
    pub fn map_operands(&mut self, pool: &mut ListPool<Value>, mut map: impl FnMut(u16, Value) -> Value) {
        match self {
            InstrData::RdRegion(ins) => {
                ins.src = map(RdRegion::SRC, ins.src);
                if let Some(index) = ins.region.index {
                    ins.region.index = Some(map(RdRegion::INDEX, index));
                }
            }
            InstrData::WrRegion(ins) => {
                ins.old = map(WrRegion::OLD, ins.old);
                ins.new = map(WrRegion::NEW, ins.new);
                if let Some(index) = ins.region.index {
                    ins.region.index = Some(map(WrRegion::INDEX, index));
                }
                if let Some(mask) = ins.region.mask {
                    ins.region.mask = Some(map(WrRegion::MASK, mask));
                }
            }
            InstrData::RdPredRegion(ins) => ins.src = map(0, ins.src),
            InstrData::WrPredRegion(ins) => {
                ins.old = map(0, ins.old);
                ins.new = map(1, ins.new);
            }
            InstrData::WrPredPredRegion(ins) => {
                ins.old = map(0, ins.old);
                ins.new = map(1, ins.new);
                ins.enable = map(2, ins.enable);
            }
            InstrData::Neg(ins)
            | InstrData::Abs(ins)
            | InstrData::NotMod(ins)
            | InstrData::Sat(ins)
            | InstrData::Trunc(ins)
            | InstrData::All(ins)
            | InstrData::Any(ins)
            | InstrData::NotPred(ins)
            | InstrData::ShufflePred(ins)
            | InstrData::ConvertAddr(ins)
            | InstrData::ExtractMask(ins)
            | InstrData::ExtractCond(ins) => ins.src = map(0, ins.src),
            InstrData::Ext(ins) => ins.src = map(0, ins.src),
            InstrData::Bitcast(ins) => ins.src = map(0, ins.src),
            InstrData::Add(ins)
            | InstrData::Sub(ins)
            | InstrData::Mul(ins)
            | InstrData::MulH(ins)
            | InstrData::Shl(ins)
            | InstrData::LShr(ins)
            | InstrData::AShr(ins)
            | InstrData::And(ins)
            | InstrData::Or(ins)
            | InstrData::Xor(ins)
            | InstrData::AddrAdd(ins)
            | InstrData::AddrOr(ins) => {
                ins.src1 = map(0, ins.src1);
                ins.src2 = map(1, ins.src2);
            }
            InstrData::Mad(ins) => {
                ins.src1 = map(0, ins.src1);
                ins.src2 = map(1, ins.src2);
                ins.src3 = map(2, ins.src3);
            }
            InstrData::Cmp(ins) => {
                ins.src1 = map(0, ins.src1);
                ins.src2 = map(1, ins.src2);
            }
            InstrData::Select(ins) => {
                ins.cond = map(Select::COND, ins.cond);
                ins.tval = map(Select::TVAL, ins.tval);
                ins.fval = map(Select::FVAL, ins.fval);
            }
            InstrData::Jump(ins) => {
                for (i, arg) in ins.args.as_mut_slice(pool).iter_mut().enumerate() {
                    *arg = map(i as u16, *arg);
                }
            }
            InstrData::Branch(ins) => {
                ins.cond = map(Branch::COND, ins.cond);
                let mut idx = 1;
                for arg in ins.args_true.as_mut_slice(pool) {
                    *arg = map(idx, *arg);
                    idx += 1;
                }
                for arg in ins.args_false.as_mut_slice(pool) {
                    *arg = map(idx, *arg);
                    idx += 1;
                }
            }
            InstrData::Goto(ins) | InstrData::Join(ins) => {
                ins.exec_mask = map(0, ins.exec_mask);
                ins.cond = map(1, ins.cond);
            }
            InstrData::Return(ins) => {
                if let Some(value) = ins.value {
                    ins.value = Some(map(0, value));
                }
            }
            InstrData::LoadGlobal(_) | InstrData::ReadPredefReg(_) => {}
            InstrData::StoreGlobal(ins) => ins.value = map(0, ins.value),
            InstrData::WritePredefReg(ins) => ins.value = map(0, ins.value),
            InstrData::Call(ins) => {
                for (i, arg) in ins.args.as_mut_slice(pool).iter_mut().enumerate() {
                    *arg = map(i as u16, *arg);
                }
            }
            InstrData::Intrinsic(ins) => {
                for (i, arg) in ins.args.as_mut_slice(pool).iter_mut().enumerate() {
                    *arg = map(i as u16, *arg);
                }
            }
        }
    }

    pub fn operand(&self, idx: u16, pool: &ListPool<Value>) -> Option<Value> {
        let mut found = None;
        self.visit_operands(pool, |i, v| {
            if i == idx {
                found = Some(v);
            }
        });
        found
    }

    pub fn set_operand(&mut self, idx: u16, value: Value, pool: &mut ListPool<Value>) {
        let mut hit = false;
        self.map_operands(pool, |i, v| {
            if i == idx {
                hit = true;
                value
            } else {
                v
            }
        });
        assert!(hit, "set_operand: no operand at index {idx}");
    }

    /// Deep-copies any operand lists into `new_pool`, for cloning an
    /// instruction or moving it between functions.
    #[must_use]
    pub fn move_to_list_pool(&self, old_pool: &ListPool<Value>, new_pool: &mut ListPool<Value>) -> Self {
        fn mv(list: &mut EntityList<Value>, old_pool: &ListPool<Value>, new_pool: &mut ListPool<Value>) {
            *list = EntityList::from_slice(list.as_slice(old_pool), new_pool);
        }

        let mut this = self.clone();
        match &mut this {
            InstrData::Jump(ins) => mv(&mut ins.args, old_pool, new_pool),
            InstrData::Branch(ins) => {
                mv(&mut ins.args_true, old_pool, new_pool);
                mv(&mut ins.args_false, old_pool, new_pool);
            }
            InstrData::Call(ins) => mv(&mut ins.args, old_pool, new_pool),
            InstrData::Intrinsic(ins) => mv(&mut ins.args, old_pool, new_pool),
            _ => {}
        }
        this
    }

    /// Argument list passed to `successor`, for threading block params.
    pub fn successor_args(&self, successor: Block) -> Option<&EntityList<Value>> {
        match self {
            InstrData::Jump(ins) if ins.target == successor => Some(&ins.args),
            InstrData::Branch(ins) if ins.target_true == successor => Some(&ins.args_true),
            InstrData::Branch(ins) if ins.target_false == successor => Some(&ins.args_false),
            _ => None,
        }
    }
}

impl RdRegion {
    pub const SRC: u16 = 0;
    pub const INDEX: u16 = 1;
}

impl WrRegion {
    pub const OLD: u16 = 0;
    pub const NEW: u16 = 1;
    pub const INDEX: u16 = 2;
    pub const MASK: u16 = 3;
}

impl Select {
    pub const COND: u16 = 0;
    pub const TVAL: u16 = 1;
    pub const FVAL: u16 = 2;
}

impl Branch {
    pub const COND: u16 = 0;
}
