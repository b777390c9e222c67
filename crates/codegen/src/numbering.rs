//! Global instruction numbering with reserved copy slots.
//!
//! Every instruction in a function group gets a dense, monotonically
//! increasing number in program order. Extra numbers are reserved as
//! insertion slots for the copies later phases may materialize:
//! per-argument pre-copy slots and one return post-copy slot around
//! calls, one pre-copy slot before a two-address intrinsic, one
//! pre-copy slot before a return, and one phi-copy slot per
//! (successor, parameter) pair before each block terminator. This
//! numbering is the coordinate system for all live-range segments.

use ir::{
    func::Block,
    hash::FxHashMap,
    instr::InstrData,
    Func, FuncGroup, FuncId, Inst,
};

/// An instruction identified across a whole function group.
pub type GInst = (FuncId, Inst);

pub struct Numbering {
    numbers: FxHashMap<GInst, u32>,
    block_range: FxHashMap<(FuncId, Block), (u32, u32)>,
    func_range: FxHashMap<FuncId, (u32, u32)>,
    /// First phi-copy slot before each block's terminator.
    phi_base: FxHashMap<(FuncId, Block), u32>,
    /// First argument pre-copy slot of each call.
    call_base: FxHashMap<GInst, u32>,
    /// Reserved pre-copy slots of two-address intrinsics, for the
    /// allocator's overlap tolerance query.
    two_addr_sites: FxHashMap<u32, GInst>,
}

impl Numbering {
    pub fn compute(group: &FuncGroup) -> Numbering {
        let mut n = Numbering {
            numbers: FxHashMap::default(),
            block_range: FxHashMap::default(),
            func_range: FxHashMap::default(),
            phi_base: FxHashMap::default(),
            call_base: FxHashMap::default(),
            two_addr_sites: FxHashMap::default(),
        };

        let mut counter = 0u32;
        // The head function first, then subroutines in table order.
        let mut order = vec![group.head];
        order.extend(group.funcs.keys().filter(|&id| id != group.head));

        for func_id in order {
            let func = &group.funcs[func_id];
            let func_start = counter;
            for block in func.preorder_blocks() {
                counter = n.number_block(func, func_id, block, counter);
            }
            n.func_range.insert(func_id, (func_start, counter));
        }
        n
    }

    fn number_block(&mut self, func: &Func, func_id: FuncId, block: Block, mut counter: u32) -> u32 {
        let start = counter;
        for &inst in &func.blocks[block].insts {
            let data = func.inst_data(inst);
            match data {
                InstrData::Call(call) => {
                    // One pre-copy slot per argument, then the call,
                    // then the return post-copy slot.
                    let nargs = call.args.len(&func.val_lists) as u32;
                    self.call_base.insert((func_id, inst), counter);
                    counter += nargs;
                    self.numbers.insert((func_id, inst), counter);
                    counter += 2;
                }
                InstrData::Intrinsic(call) if call.intr.two_addr_operand().is_some() => {
                    // Reserve the two-address pre-copy slot.
                    self.two_addr_sites.insert(counter, (func_id, inst));
                    counter += 1;
                    self.numbers.insert((func_id, inst), counter);
                    counter += 1;
                }
                InstrData::Return(_) => {
                    // Reserve the return pre-copy slot.
                    counter += 1;
                    self.numbers.insert((func_id, inst), counter);
                    counter += 1;
                }
                data if data.is_terminator() => {
                    // Phi-copy slots: one per (successor, parameter).
                    let mut total = 0u32;
                    data.visit_successors(|suc| {
                        total += func.block_params(suc).len() as u32;
                    });
                    self.phi_base.insert((func_id, block), counter);
                    counter += total;
                    self.numbers.insert((func_id, inst), counter);
                    counter += 1;
                }
                _ => {
                    self.numbers.insert((func_id, inst), counter);
                    counter += 1;
                }
            }
        }
        self.block_range.insert((func_id, block), (start, counter));
        counter
    }

    pub fn number_of(&self, func: FuncId, inst: Inst) -> u32 {
        self.numbers[&(func, inst)]
    }

    pub fn block_range(&self, func: FuncId, block: Block) -> (u32, u32) {
        self.block_range[&(func, block)]
    }

    pub fn func_range(&self, func: FuncId) -> (u32, u32) {
        self.func_range[&func]
    }

    /// The reserved slot immediately before a two-address intrinsic.
    pub fn two_addr_slot(&self, func: FuncId, inst: Inst) -> u32 {
        self.number_of(func, inst) - 1
    }

    /// The two-address intrinsic owning a reserved slot, if any.
    pub fn two_addr_site(&self, slot: u32) -> Option<GInst> {
        self.two_addr_sites.get(&slot).copied()
    }

    /// The pre-copy slot of a call argument.
    pub fn arg_precopy_slot(&self, func: FuncId, call: Inst, arg_idx: u16) -> u32 {
        self.call_base[&(func, call)] + arg_idx as u32
    }

    /// The post-copy slot for a call's return value.
    pub fn ret_postcopy_slot(&self, func: FuncId, call: Inst) -> u32 {
        self.number_of(func, call) + 1
    }

    /// The pre-copy slot before a return instruction.
    pub fn ret_precopy_slot(&self, func: FuncId, ret: Inst) -> u32 {
        self.number_of(func, ret) - 1
    }

    /// The phi-copy insertion slot in `pred` for `(succ, param_idx)`.
    pub fn phi_copy_slot(
        &self,
        group: &FuncGroup,
        func: FuncId,
        pred: Block,
        succ: Block,
        param_idx: u16,
    ) -> u32 {
        let f = &group.funcs[func];
        let base = self.phi_base[&(func, pred)];
        let mut offset = 0u32;
        let mut found = None;
        let term = f.terminator(pred).expect("predecessor has no terminator");
        f.inst_data(term).visit_successors(|s| {
            if found.is_none() {
                if s == succ {
                    found = Some(offset + param_idx as u32);
                } else {
                    offset += f.block_params(s).len() as u32;
                }
            }
        });
        base + found.expect("not a successor of pred")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{builder::FuncBuilder, instr::Intrinsic, ElemKind, Type};
    use cranelift_entity::EntityRef;

    fn v8() -> Type {
        Type::vec(ElemKind::I32, 8)
    }

    #[test]
    fn call_and_return_slots() {
        let callee = FuncId::new(1);
        let mut b = FuncBuilder::new("f", vec![v8(), v8()], Some(v8()));
        let (x, y) = (b.arg(0), b.arg(1));
        let sum = b.instr().add(x, y);
        let r = b.instr().call(callee, Some(v8()), [sum, y]).unwrap();
        b.instr().ret(Some(r));
        let f = b.finish();

        let mut sub = FuncBuilder::new("g", vec![v8(), v8()], Some(v8()));
        let a0 = sub.arg(0);
        sub.instr().ret(Some(a0));
        let g = sub.finish();

        let mut group = ir::FuncGroup::new(f);
        assert_eq!(group.add_func(g), callee);

        let n = Numbering::compute(&group);
        let f = &group.funcs[group.head];
        let add_inst = f.def_inst(sum).unwrap();
        let call_inst = f.def_inst(r).unwrap();
        let ret_inst = f.terminator(f.entry).unwrap();

        // add, two arg pre-copy slots, call, post-copy slot, return
        // pre-copy slot, return.
        assert_eq!(n.number_of(group.head, add_inst), 0);
        assert_eq!(n.arg_precopy_slot(group.head, call_inst, 0), 1);
        assert_eq!(n.arg_precopy_slot(group.head, call_inst, 1), 2);
        assert_eq!(n.number_of(group.head, call_inst), 3);
        assert_eq!(n.ret_postcopy_slot(group.head, call_inst), 4);
        assert_eq!(n.ret_precopy_slot(group.head, ret_inst), 5);
        assert_eq!(n.number_of(group.head, ret_inst), 6);

        let (fs, fe) = n.func_range(group.head);
        assert_eq!((fs, fe), (0, 7));
        // The subroutine is numbered after the head.
        let (gs, _) = n.func_range(callee);
        assert_eq!(gs, 7);
    }

    #[test]
    fn two_addr_slot_is_reserved() {
        let mut b = FuncBuilder::new("f", vec![v8(), v8(), Type::pred(8)], Some(v8()));
        let (base, payload, mask) = (b.arg(0), b.arg(1), b.arg(2));
        let send = b
            .instr()
            .intrinsic(Intrinsic::RawSend, [base, payload, mask], Some(v8()))
            .unwrap();
        b.instr().ret(Some(send));
        let func = b.finish();

        let group = ir::FuncGroup::new(func);
        let n = Numbering::compute(&group);
        let f = &group.funcs[group.head];
        let send_inst = f.def_inst(send).unwrap();

        assert_eq!(n.number_of(group.head, send_inst), 1);
        assert_eq!(n.two_addr_slot(group.head, send_inst), 0);
        assert_eq!(n.two_addr_site(0), Some((group.head, send_inst)));
        assert_eq!(n.two_addr_site(1), None);
    }

    #[test]
    fn phi_copy_slots_precede_the_terminator() {
        let mut b = FuncBuilder::new("f", vec![v8(), Type::pred(1)], Some(v8()));
        let (x, c) = (b.arg(0), b.arg(1));
        let t = b.create_block();
        let e = b.create_block();
        let p1 = b.append_block_param(t, v8());
        let _p2 = b.append_block_param(e, v8());

        let a = b.instr().add(x, x);
        b.instr().branch_with_args(c, t, e, [a], [x]);
        b.switch_to_block(t);
        b.instr().ret(Some(p1));
        b.switch_to_block(e);
        b.instr().ret(Some(x));
        let func = b.finish();

        let group = ir::FuncGroup::new(func);
        let n = Numbering::compute(&group);
        let f = &group.funcs[group.head];
        let branch = f.terminator(f.entry).unwrap();

        // add(0), slot for (t, param0) = 1, slot for (e, param0) = 2,
        // branch = 3.
        let slot_t = n.phi_copy_slot(&group, group.head, f.entry, t, 0);
        let slot_e = n.phi_copy_slot(&group, group.head, f.entry, e, 0);
        assert_eq!(slot_t, 1);
        assert_eq!(slot_e, 2);
        assert_eq!(n.number_of(group.head, branch), 3);
    }
}
