use crate::{
    constant::ConstData,
    entity_ref,
    hash::FxHashMap,
    instr::InstrData,
    typ::Type,
};
use compact_str::CompactString;
use cranelift_entity::{
    packed_option::PackedOption, EntityList, EntitySet, ListPool, PrimaryMap, SecondaryMap,
};
use smallvec::SmallVec;

entity_ref! {
    pub struct Block;
}

entity_ref! {
    pub struct Inst;
}

entity_ref! {
    pub struct Value;
}

entity_ref! {
    pub struct ConstId;
}

entity_ref! {
    pub struct GlobalId;
}

entity_ref! {
    pub struct FuncId;
}

/// One use of a value: the instruction and the stable operand index.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Use {
    pub inst: Inst,
    pub idx: u16,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueDef {
    /// Result of an instruction.
    Result(Inst),
    /// Parameter of a basic block (the phi-node form of this IR; the
    /// incoming values are the predecessors' terminator arguments).
    BlockParam(Block, u16),
    /// Incoming function argument.
    FuncArg(u16),
    /// Materialized constant.
    Const(ConstId),
}

#[derive(Clone, Debug)]
pub struct ValueData {
    pub typ: Type,
    pub def: ValueDef,
    /// Optional name, for debugging and testing.
    pub name: Option<CompactString>,
}

#[derive(Clone, Debug, Default)]
pub struct BlockData {
    pub name: Option<CompactString>,
    pub params: EntityList<Value>,
    /// Instruction ids in program order.
    pub insts: Vec<Inst>,
}

#[derive(Clone, Debug)]
struct InstNode {
    data: InstrData,
    /// Block the instruction currently lives in; none once erased.
    block: PackedOption<Block>,
    result: PackedOption<Value>,
}

#[derive(Clone, Debug)]
pub struct GlobalData {
    pub name: CompactString,
    pub typ: Type,
}

/// Where to place a newly created instruction.
#[derive(Copy, Clone, Debug)]
pub enum InsertAt {
    Append(Block),
    Before(Inst),
    After(Inst),
}

/// A function: SSA instruction stream plus the value/use bookkeeping
/// the analyses depend on.
///
/// All operand mutation goes through the editing API here so the use
/// table can never go stale; passes hold no hidden side tables on the
/// IR itself.
#[derive(Clone)]
pub struct Func {
    pub name: CompactString,
    pub arg_types: Vec<Type>,
    pub ret_type: Option<Type>,

    pub blocks: PrimaryMap<Block, BlockData>,
    pub entry: Block,
    insts: PrimaryMap<Inst, InstNode>,
    pub values: PrimaryMap<Value, ValueData>,
    pub val_lists: ListPool<Value>,

    consts: PrimaryMap<ConstId, ConstData>,
    const_dedup: FxHashMap<ConstData, Value>,

    uses: SecondaryMap<Value, SmallVec<[Use; 4]>>,
    arg_values: Vec<Value>,
}

impl Func {
    pub fn new(name: impl Into<CompactString>, arg_types: Vec<Type>, ret_type: Option<Type>) -> Self {
        let mut blocks = PrimaryMap::new();
        let entry = blocks.push(BlockData::default());
        let mut func = Func {
            name: name.into(),
            arg_types: arg_types.clone(),
            ret_type,
            blocks,
            entry,
            insts: PrimaryMap::new(),
            values: PrimaryMap::new(),
            val_lists: ListPool::new(),
            consts: PrimaryMap::new(),
            const_dedup: FxHashMap::default(),
            uses: SecondaryMap::new(),
            arg_values: Vec::new(),
        };
        for (i, typ) in arg_types.into_iter().enumerate() {
            let value = func.values.push(ValueData {
                typ,
                def: ValueDef::FuncArg(i as u16),
                name: None,
            });
            func.arg_values.push(value);
        }
        func
    }

    pub fn arg_value(&self, idx: usize) -> Value {
        self.arg_values[idx]
    }

    pub fn num_args(&self) -> usize {
        self.arg_values.len()
    }

    // ---- values ----------------------------------------------------

    pub fn value_type(&self, value: Value) -> Type {
        self.values[value].typ
    }

    pub fn value_def(&self, value: Value) -> &ValueDef {
        &self.values[value].def
    }

    /// The defining instruction, for instruction results.
    pub fn def_inst(&self, value: Value) -> Option<Inst> {
        match self.values[value].def {
            ValueDef::Result(inst) => Some(inst),
            _ => None,
        }
    }

    pub fn set_value_name(&mut self, value: Value, name: impl Into<CompactString>) {
        self.values[value].name = Some(name.into());
    }

    /// Materializes (or reuses) a constant value.
    pub fn make_const(&mut self, data: ConstData) -> Value {
        if let Some(&value) = self.const_dedup.get(&data) {
            return value;
        }
        let typ = data.typ;
        let id = self.consts.push(data.clone());
        let value = self.values.push(ValueData {
            typ,
            def: ValueDef::Const(id),
            name: None,
        });
        self.const_dedup.insert(data, value);
        value
    }

    pub fn undef(&mut self, typ: Type) -> Value {
        self.make_const(ConstData::undef(typ))
    }

    /// The constant data behind a value, if it is a constant.
    pub fn as_const(&self, value: Value) -> Option<&ConstData> {
        match self.values[value].def {
            ValueDef::Const(id) => Some(&self.consts[id]),
            _ => None,
        }
    }

    // ---- uses ------------------------------------------------------

    pub fn uses(&self, value: Value) -> &[Use] {
        &self.uses[value]
    }

    pub fn num_uses(&self, value: Value) -> usize {
        self.uses[value].len()
    }

    pub fn has_one_use(&self, value: Value) -> bool {
        self.uses[value].len() == 1
    }

    pub fn single_use(&self, value: Value) -> Option<Use> {
        match self.uses[value].as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    fn register_uses(&mut self, inst: Inst) {
        let mut found = SmallVec::<[(u16, Value); 8]>::new();
        self.insts[inst]
            .data
            .visit_operands(&self.val_lists, |idx, value| found.push((idx, value)));
        for (idx, value) in found {
            self.uses[value].push(Use { inst, idx });
        }
    }

    fn unregister_uses(&mut self, inst: Inst) {
        let mut found = SmallVec::<[(u16, Value); 8]>::new();
        self.insts[inst]
            .data
            .visit_operands(&self.val_lists, |idx, value| found.push((idx, value)));
        for (idx, value) in found {
            let list = &mut self.uses[value];
            if let Some(pos) = list.iter().position(|u| *u == Use { inst, idx }) {
                list.swap_remove(pos);
            }
        }
    }

    // ---- blocks ----------------------------------------------------

    pub fn add_block(&mut self, name: Option<CompactString>) -> Block {
        self.blocks.push(BlockData {
            name,
            ..Default::default()
        })
    }

    pub fn append_block_param(&mut self, block: Block, typ: Type) -> Value {
        let idx = self.blocks[block].params.len(&self.val_lists) as u16;
        let value = self.values.push(ValueData {
            typ,
            def: ValueDef::BlockParam(block, idx),
            name: None,
        });
        let mut params = self.blocks[block].params;
        params.push(value, &mut self.val_lists);
        self.blocks[block].params = params;
        value
    }

    pub fn block_params(&self, block: Block) -> &[Value] {
        self.blocks[block].params.as_slice(&self.val_lists)
    }

    pub fn visit_block_successors(&self, block: Block, visit: impl FnMut(Block)) {
        if let Some(&term) = self.blocks[block].insts.last() {
            self.insts[term].data.visit_successors(visit);
        }
    }

    pub fn terminator(&self, block: Block) -> Option<Inst> {
        self.blocks[block]
            .insts
            .last()
            .copied()
            .filter(|&inst| self.insts[inst].data.is_terminator())
    }

    pub fn compute_predecessors(&self) -> SecondaryMap<Block, SmallVec<[Block; 2]>> {
        let mut preds: SecondaryMap<Block, SmallVec<[Block; 2]>> = SecondaryMap::new();
        for (block, _) in &self.blocks {
            self.visit_block_successors(block, |suc| {
                if !preds[suc].contains(&block) {
                    preds[suc].push(block);
                }
            });
        }
        preds
    }

    /// Preorder depth-first visit of the CFG from the entry block.
    /// With SSA def-before-use (phi incomings excepted), every
    /// definition is visited before its non-phi uses.
    pub fn preorder_blocks(&self) -> Vec<Block> {
        let mut order = Vec::with_capacity(self.blocks.len());
        let mut visited = EntitySet::<Block>::new();
        let mut stack = vec![self.entry];
        while let Some(block) = stack.pop() {
            if visited.contains(block) {
                continue;
            }
            visited.insert(block);
            order.push(block);
            let mut succs = SmallVec::<[Block; 2]>::new();
            self.visit_block_successors(block, |suc| succs.push(suc));
            // Push in reverse so the first successor is visited first.
            for suc in succs.into_iter().rev() {
                if !visited.contains(suc) {
                    stack.push(suc);
                }
            }
        }
        order
    }

    /// Postorder over the CFG: successors before their predecessors
    /// (modulo cycles).
    pub fn postorder_blocks(&self) -> Vec<Block> {
        let mut order = Vec::with_capacity(self.blocks.len());
        let mut visited = EntitySet::<Block>::new();
        // (block, children already expanded?)
        let mut stack = vec![(self.entry, false)];
        while let Some((block, expanded)) = stack.pop() {
            if expanded {
                order.push(block);
                continue;
            }
            if visited.contains(block) {
                continue;
            }
            visited.insert(block);
            stack.push((block, true));
            self.visit_block_successors(block, |suc| {
                if !visited.contains(suc) {
                    stack.push((suc, false));
                }
            });
        }
        order
    }

    /// Immediate dominators, by iterated intersection over reverse
    /// postorder. The entry block maps to itself.
    pub fn compute_idom(&self) -> SecondaryMap<Block, PackedOption<Block>> {
        let preds = self.compute_predecessors();
        let mut rpo = self.postorder_blocks();
        rpo.reverse();
        let mut rpo_index: SecondaryMap<Block, u32> = SecondaryMap::new();
        for (i, &block) in rpo.iter().enumerate() {
            rpo_index[block] = i as u32;
        }

        let mut idom: SecondaryMap<Block, PackedOption<Block>> = SecondaryMap::new();
        idom[self.entry] = Some(self.entry).into();

        let intersect = |idom: &SecondaryMap<Block, PackedOption<Block>>,
                         rpo_index: &SecondaryMap<Block, u32>,
                         mut a: Block,
                         mut b: Block| {
            while a != b {
                while rpo_index[a] > rpo_index[b] {
                    a = idom[a].expand().unwrap();
                }
                while rpo_index[b] > rpo_index[a] {
                    b = idom[b].expand().unwrap();
                }
            }
            a
        };

        let mut changed = true;
        while changed {
            changed = false;
            for &block in rpo.iter().skip(1) {
                let mut new_idom: Option<Block> = None;
                for &pred in preds[block].iter() {
                    if idom[pred].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(cur) => intersect(&idom, &rpo_index, cur, pred),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if idom[block].expand() != Some(new_idom) {
                        idom[block] = Some(new_idom).into();
                        changed = true;
                    }
                }
            }
        }
        idom
    }

    /// Whether block `a` dominates block `b`.
    pub fn dominates(
        &self,
        idom: &SecondaryMap<Block, PackedOption<Block>>,
        a: Block,
        b: Block,
    ) -> bool {
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match idom[cur].expand() {
                Some(parent) if parent != cur => cur = parent,
                _ => return false,
            }
        }
    }

    // ---- instructions ----------------------------------------------

    pub fn inst_data(&self, inst: Inst) -> &InstrData {
        &self.insts[inst].data
    }

    pub fn inst_block(&self, inst: Inst) -> Option<Block> {
        self.insts[inst].block.expand()
    }

    pub fn inst_result(&self, inst: Inst) -> Option<Value> {
        self.insts[inst].result.expand()
    }

    pub fn is_erased(&self, inst: Inst) -> bool {
        self.insts[inst].block.is_none()
    }

    pub fn inst_ids(&self) -> impl Iterator<Item = Inst> + '_ {
        self.insts.keys()
    }

    /// Position of an instruction within its block's ordered list.
    pub fn pos_in_block(&self, inst: Inst) -> usize {
        let block = self.insts[inst].block.expand().expect("erased instruction");
        self.blocks[block]
            .insts
            .iter()
            .position(|&i| i == inst)
            .expect("instruction not in its block list")
    }

    pub fn insert_inst(&mut self, data: InstrData, result_ty: Option<Type>, at: InsertAt) -> Inst {
        let inst = self.insts.push(InstNode {
            data,
            block: None.into(),
            result: None.into(),
        });
        if let Some(typ) = result_ty {
            let value = self.values.push(ValueData {
                typ,
                def: ValueDef::Result(inst),
                name: None,
            });
            self.insts[inst].result = Some(value).into();
        }
        let (block, pos) = match at {
            InsertAt::Append(block) => (block, self.blocks[block].insts.len()),
            InsertAt::Before(other) => {
                let block = self.insts[other].block.expand().expect("erased anchor");
                (block, self.pos_in_block(other))
            }
            InsertAt::After(other) => {
                let block = self.insts[other].block.expand().expect("erased anchor");
                (block, self.pos_in_block(other) + 1)
            }
        };
        self.blocks[block].insts.insert(pos, inst);
        self.insts[inst].block = Some(block).into();
        self.register_uses(inst);
        inst
    }

    /// Removes an instruction from its block and drops its operand
    /// uses. The result value, if any, must be dead.
    pub fn erase_inst(&mut self, inst: Inst) {
        if let Some(result) = self.insts[inst].result.expand() {
            assert!(
                self.uses[result].is_empty(),
                "erasing instruction whose result still has uses"
            );
        }
        self.unregister_uses(inst);
        let block = self.insts[inst].block.expand().expect("already erased");
        let pos = self.pos_in_block(inst);
        self.blocks[block].insts.remove(pos);
        self.insts[inst].block = None.into();
    }

    /// Replaces the operand at `idx` of `inst`, keeping uses coherent.
    pub fn set_operand(&mut self, inst: Inst, idx: u16, new: Value) {
        self.unregister_uses(inst);
        let mut data = self.insts[inst].data.clone();
        data.set_operand(idx, new, &mut self.val_lists);
        self.insts[inst].data = data;
        self.register_uses(inst);
    }

    /// Replaces the whole payload of an instruction in place (same
    /// opcode family or not), keeping uses coherent. The result value
    /// keeps its type.
    pub fn replace_inst_data(&mut self, inst: Inst, data: InstrData) {
        self.unregister_uses(inst);
        self.insts[inst].data = data;
        self.register_uses(inst);
    }

    pub fn replace_use(&mut self, u: Use, new: Value) {
        self.set_operand(u.inst, u.idx, new);
    }

    pub fn replace_all_uses(&mut self, old: Value, new: Value) {
        assert_ne!(old, new);
        while let Some(&u) = self.uses[old].first() {
            self.set_operand(u.inst, u.idx, new);
        }
    }

    /// Clones an instruction (fresh result value) immediately before
    /// the original. Operand lists are deep-copied.
    pub fn clone_inst(&mut self, inst: Inst) -> Inst {
        let data = {
            let data = self.insts[inst].data.clone();
            let mut scratch = ListPool::new();
            let detached = data.move_to_list_pool(&self.val_lists, &mut scratch);
            detached.move_to_list_pool(&scratch, &mut self.val_lists)
        };
        let result_ty = self
            .insts[inst]
            .result
            .expand()
            .map(|value| self.values[value].typ);
        self.insert_inst(data, result_ty, InsertAt::Before(inst))
    }
}

/// A function group: one kernel head plus the subroutines it can
/// reach, compiled as a unit. Owns the module-scope globals.
pub struct FuncGroup {
    pub funcs: PrimaryMap<FuncId, Func>,
    pub head: FuncId,
    pub globals: PrimaryMap<GlobalId, GlobalData>,
}

impl FuncGroup {
    pub fn new(head: Func) -> Self {
        let mut funcs = PrimaryMap::new();
        let head = funcs.push(head);
        FuncGroup {
            funcs,
            head,
            globals: PrimaryMap::new(),
        }
    }

    pub fn add_func(&mut self, func: Func) -> FuncId {
        self.funcs.push(func)
    }

    pub fn add_global(&mut self, name: impl Into<CompactString>, typ: Type) -> GlobalId {
        self.globals.push(GlobalData {
            name: name.into(),
            typ,
        })
    }

    /// Direct callees of a function, in instruction order.
    pub fn callees(&self, func: FuncId) -> Vec<FuncId> {
        let f = &self.funcs[func];
        let mut out = Vec::new();
        for (_, block) in &f.blocks {
            for &inst in &block.insts {
                if let InstrData::Call(call) = f.inst_data(inst) {
                    if !out.contains(&call.callee) {
                        out.push(call.callee);
                    }
                }
            }
        }
        out
    }

    /// All functions transitively reachable from `func`, excluding
    /// `func` itself unless it is self-recursive.
    pub fn transitive_callees(&self, func: FuncId) -> Vec<FuncId> {
        let mut out = Vec::new();
        let mut stack = self.callees(func);
        while let Some(callee) = stack.pop() {
            if out.contains(&callee) {
                continue;
            }
            out.push(callee);
            stack.extend(self.callees(callee));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{instr::Binary, typ::ElemKind};

    fn v4i32() -> Type {
        Type::vec(ElemKind::I32, 4)
    }

    #[test]
    fn use_table_tracks_edits() {
        let mut func = Func::new("f", vec![v4i32(), v4i32()], Some(v4i32()));
        let a = func.arg_value(0);
        let b = func.arg_value(1);

        let add = func.insert_inst(
            InstrData::Add(Binary { src1: a, src2: b }),
            Some(v4i32()),
            InsertAt::Append(func.entry),
        );
        let add_val = func.inst_result(add).unwrap();
        let sub = func.insert_inst(
            InstrData::Sub(Binary {
                src1: add_val,
                src2: a,
            }),
            Some(v4i32()),
            InsertAt::Append(func.entry),
        );

        assert_eq!(func.num_uses(a), 2);
        assert_eq!(func.num_uses(add_val), 1);
        assert_eq!(
            func.single_use(add_val),
            Some(Use { inst: sub, idx: 0 })
        );

        // Redirect sub's second operand from a to b.
        func.set_operand(sub, 1, b);
        assert_eq!(func.num_uses(a), 1);
        assert_eq!(func.num_uses(b), 2);

        // Clone the add; the clone has a fresh, unused result.
        let clone = func.clone_inst(add);
        let clone_val = func.inst_result(clone).unwrap();
        assert_ne!(clone_val, add_val);
        assert_eq!(func.num_uses(clone_val), 0);
        assert_eq!(func.num_uses(a), 2);
        assert_eq!(func.pos_in_block(clone), 0);

        // Redirect the single use of add to the clone, then erase add.
        func.replace_all_uses(add_val, clone_val);
        assert_eq!(func.num_uses(add_val), 0);
        func.erase_inst(add);
        assert!(func.is_erased(add));
    }

    #[test]
    fn traversal_orders() {
        let mut func = Func::new("f", vec![], None);
        let b1 = func.add_block(None);
        let b2 = func.add_block(None);
        let exit = func.add_block(None);

        let cond = func.make_const(ConstData::splat(Type::pred(1), 1));
        func.insert_inst(
            InstrData::Branch(crate::instr::Branch {
                cond,
                target_true: b1,
                target_false: b2,
                args_true: EntityList::new(),
                args_false: EntityList::new(),
            }),
            None,
            InsertAt::Append(func.entry),
        );
        for block in [b1, b2] {
            func.insert_inst(
                InstrData::Jump(crate::instr::Jump {
                    target: exit,
                    args: EntityList::new(),
                }),
                None,
                InsertAt::Append(block),
            );
        }
        func.insert_inst(
            InstrData::Return(crate::instr::Return { value: None }),
            None,
            InsertAt::Append(exit),
        );

        let pre = func.preorder_blocks();
        assert_eq!(pre[0], func.entry);
        assert_eq!(pre.len(), 4);

        let post = func.postorder_blocks();
        assert_eq!(*post.last().unwrap(), func.entry);

        let idom = func.compute_idom();
        assert_eq!(idom[exit].expand(), Some(func.entry));
        assert!(func.dominates(&idom, func.entry, exit));
        assert!(!func.dominates(&idom, b1, exit));
    }
}
