//! Liveness: per-value interval live ranges over the global
//! instruction numbering, with the interference and coalescing queries
//! the register allocator consumes.
//!
//! Number-space conventions: a definition occupies `[def, def+1)`; a
//! use extends liveness up to (exclusive) the consuming slot, so the
//! source and destination of one instruction do not overlap. Special
//! slots from [`crate::Numbering`] relocate particular defs and uses:
//! two-address results start one slot early, call results move to the
//! return post-copy slot, call arguments end at their pre-copy slots,
//! return operands at the return pre-copy slot, and phi incomings at
//! the predecessor's phi-copy slot.

use crate::{
    live_range::{Category, GValue, LiveRange, Segment, Strength},
    numbering::Numbering,
};
use ir::{
    func::Block,
    hash::{FxHashMap, FxHashSet},
    instr::InstrData,
    Func, FuncGroup, FuncId, Inst, Value, ValueDef,
};
use smallvec::SmallVec;

pub type RangeId = usize;

#[derive(Default)]
pub struct Liveness {
    ranges: Vec<Option<LiveRange>>,
    value_map: FxHashMap<GValue, RangeId>,
    /// Per-function subroutine spans: the function's own numbering
    /// range plus those of all transitively called subroutines.
    subr_cache: FxHashMap<FuncId, Vec<(u32, u32)>>,
}

impl Liveness {
    pub fn new() -> Self {
        Liveness::default()
    }

    pub fn range(&self, id: RangeId) -> &LiveRange {
        self.ranges[id].as_ref().expect("coalesced-away range id")
    }

    pub fn range_of_value(&self, gv: GValue) -> Option<RangeId> {
        self.value_map.get(&gv).copied()
    }

    /// Removes a (deleted) value from the tracking tables.
    pub fn remove_value(&mut self, gv: GValue) {
        if let Some(id) = self.value_map.remove(&gv) {
            if let Some(range) = self.ranges[id].as_mut() {
                range.values.retain(|v| *v != gv);
            }
        }
    }

    /// Creates (if absent) and (re)computes the live range for one
    /// value. Querying an unregistered value creates a fresh range
    /// rather than failing.
    pub fn build_live_range(
        &mut self,
        group: &FuncGroup,
        numbering: &Numbering,
        gv: GValue,
    ) -> RangeId {
        let id = match self.value_map.get(&gv) {
            Some(&id) => id,
            None => {
                let id = self.ranges.len();
                let mut range = LiveRange::default();
                range.values.push(gv);
                let func = &group.funcs[gv.0];
                range.category = category_of(func, gv.1);
                range.log_align = alignment_of(func, gv.1);
                self.ranges.push(Some(range));
                self.value_map.insert(gv, id);
                id
            }
        };
        self.rebuild(group, numbering, id);
        id
    }

    /// Recomputes segments for a range whose cached data was
    /// invalidated by IR mutation: iterates each constituent value,
    /// re-derives its contribution, then sorts and merges.
    pub fn rebuild(&mut self, group: &FuncGroup, numbering: &Numbering, id: RangeId) {
        let values: SmallVec<[GValue; 2]> = self.range(id).values.clone();
        let mut segments = Vec::new();
        for gv in &values {
            self.derive_value(group, numbering, *gv, &mut segments);
        }

        // Conservatively extend across spanned calls with the callees'
        // weak subroutine ranges.
        let mut merged = crate::live_range::sort_and_merge(segments);
        let mut weak_extra: Vec<Segment> = Vec::new();
        let mut owner_funcs: SmallVec<[FuncId; 2]> = SmallVec::new();
        for (fid, _) in &values {
            if !owner_funcs.contains(fid) {
                owner_funcs.push(*fid);
            }
        }
        for fid in owner_funcs {
            let func = &group.funcs[fid];
            for (_, block) in &func.blocks {
                for &inst in &block.insts {
                    let InstrData::Call(call) = func.inst_data(inst) else {
                        continue;
                    };
                    let cn = numbering.number_of(fid, inst);
                    let spans_call = merged
                        .iter()
                        .any(|s| s.strength == Strength::Strong && s.contains(cn));
                    if !spans_call {
                        continue;
                    }
                    for &(start, end) in self.subroutine_spans(group, numbering, call.callee) {
                        weak_extra.push(Segment::weak(start, end));
                    }
                }
            }
        }
        if !weak_extra.is_empty() {
            merged.extend(weak_extra);
            merged = crate::live_range::sort_and_merge(merged);
        }

        let range = self.ranges[id].as_mut().unwrap();
        range.segments = merged;
        range.test_live_ranges();
    }

    /// The precomputed subroutine live span of a function: its own
    /// numbering range unioned with all transitively called
    /// subroutines' ranges.
    fn subroutine_spans(
        &mut self,
        group: &FuncGroup,
        numbering: &Numbering,
        func: FuncId,
    ) -> &[(u32, u32)] {
        if !self.subr_cache.contains_key(&func) {
            let mut spans = vec![numbering.func_range(func)];
            for callee in group.transitive_callees(func) {
                spans.push(numbering.func_range(callee));
            }
            spans.sort_unstable();
            self.subr_cache.insert(func, spans);
        }
        &self.subr_cache[&func]
    }

    // ---- per-value segment derivation ------------------------------

    fn derive_value(
        &mut self,
        group: &FuncGroup,
        numbering: &Numbering,
        gv: GValue,
        out: &mut Vec<Segment>,
    ) {
        let (fid, value) = gv;
        let func = &group.funcs[fid];

        // The definition point.
        let def_loc = match func.value_def(value) {
            ValueDef::Const(_) => return,
            ValueDef::Result(inst) => {
                if func.is_erased(*inst) {
                    return;
                }
                let d = numbering.number_of(fid, *inst);
                match func.inst_data(*inst) {
                    // A call result is copied out at the post-copy slot.
                    InstrData::Call(_) => {
                        let slot = numbering.ret_postcopy_slot(fid, *inst);
                        out.push(Segment::strong(slot, slot + 1));
                        (func.inst_block(*inst).unwrap(), slot)
                    }
                    // A two-address result reserves room for a pre-copy.
                    InstrData::Intrinsic(call) if call.intr.two_addr_operand().is_some() => {
                        out.push(Segment::strong(d - 1, d + 1));
                        (func.inst_block(*inst).unwrap(), d - 1)
                    }
                    _ => {
                        out.push(Segment::strong(d, d + 1));
                        (func.inst_block(*inst).unwrap(), d)
                    }
                }
            }
            ValueDef::BlockParam(block, idx) => {
                let (bs, _) = numbering.block_range(fid, *block);
                out.push(Segment::strong(bs, bs + 1));
                // The to-be-inserted copies at the end of each
                // predecessor, as single-point PHICPY segments.
                let preds = func.compute_predecessors();
                for &pred in preds[*block].iter() {
                    let slot = numbering.phi_copy_slot(group, fid, pred, *block, *idx);
                    out.push(Segment::phicpy(slot));
                }
                (*block, bs)
            }
            ValueDef::FuncArg(_) => {
                let (fs, _) = numbering.func_range(fid);
                out.push(Segment::strong(fs, fs + 1));
                (func.entry, fs)
            }
        };

        // Each use extends or creates a segment in its block, then
        // flood-fills backward through predecessors (explicit
        // worklist) until hitting the defining block or a block whose
        // live-out is already registered. Termination follows from the
        // dominance of the defining point.
        let preds = func.compute_predecessors();
        let mut liveout_done: FxHashSet<Block> = FxHashSet::default();

        for u in func.uses(value) {
            if func.is_erased(u.inst) {
                continue;
            }
            let user_block = func.inst_block(u.inst).unwrap();
            let use_point = self.use_point(func, numbering, group, fid, u.inst, u.idx);

            let (def_block, def_num) = def_loc;
            if def_block == user_block && def_num <= use_point {
                if use_point > def_num {
                    out.push(Segment::strong(def_num, use_point));
                }
                continue;
            }

            let (bs, _) = numbering.block_range(fid, user_block);
            if use_point > bs {
                out.push(Segment::strong(bs, use_point));
            }

            let mut stack: SmallVec<[Block; 8]> =
                preds[user_block].iter().copied().collect();
            while let Some(b) = stack.pop() {
                if !liveout_done.insert(b) {
                    continue;
                }
                let (pbs, pbe) = numbering.block_range(fid, b);
                if b == def_block {
                    out.push(Segment::strong(def_num, pbe));
                } else {
                    out.push(Segment::strong(pbs, pbe));
                    stack.extend(preds[b].iter().copied());
                }
            }
        }
    }

    /// The number-space point a particular use consumes its value at.
    fn use_point(
        &self,
        func: &Func,
        numbering: &Numbering,
        group: &FuncGroup,
        fid: FuncId,
        user: Inst,
        idx: u16,
    ) -> u32 {
        let data = func.inst_data(user);
        if let Some((succ, pidx)) = decode_terminator_arg(func, user, idx) {
            let pred = func.inst_block(user).unwrap();
            return numbering.phi_copy_slot(group, fid, pred, succ, pidx);
        }
        match data {
            InstrData::Call(_) => numbering.arg_precopy_slot(fid, user, idx),
            InstrData::Return(_) => numbering.ret_precopy_slot(fid, user),
            InstrData::Intrinsic(call) if call.intr.two_addr_operand() == Some(idx) => {
                numbering.two_addr_slot(fid, user)
            }
            _ => numbering.number_of(fid, user),
        }
    }

    // ---- interference ----------------------------------------------

    /// Two ranges interfere iff some pair of overlapping segments are
    /// not both weak, with the PHICPY refinement of
    /// [`Self::check_overlapping_segments_interfere`]. Commutative.
    pub fn interfere(
        &self,
        group: &FuncGroup,
        numbering: &Numbering,
        a: RangeId,
        b: RangeId,
    ) -> bool {
        self.interfere_inner(group, numbering, a, b, false)
    }

    /// Like `interfere`, but tolerates a single-slot overlap at a
    /// two-address pre-copy slot when the two-address operand is in
    /// one range and the result in the other, allowing coalescing
    /// across the two-address constraint.
    pub fn two_addr_interfere(
        &self,
        group: &FuncGroup,
        numbering: &Numbering,
        a: RangeId,
        b: RangeId,
    ) -> bool {
        self.interfere_inner(group, numbering, a, b, true)
    }

    fn interfere_inner(
        &self,
        group: &FuncGroup,
        numbering: &Numbering,
        a: RangeId,
        b: RangeId,
        tolerate_two_addr: bool,
    ) -> bool {
        assert_ne!(a, b, "interference query against the same range");
        let ra = self.range(a);
        let rb = self.range(b);
        for sa in &ra.segments {
            for sb in &rb.segments {
                if !sa.overlaps(sb) {
                    continue;
                }
                if sa.strength == Strength::Weak && sb.strength == Strength::Weak {
                    continue;
                }
                if tolerate_two_addr
                    && self.is_tolerated_two_addr_overlap(group, numbering, ra, rb, sa, sb)
                {
                    continue;
                }
                if self.check_overlapping_segments_interfere(group, numbering, ra, sa, rb, sb) {
                    return true;
                }
            }
        }
        false
    }

    /// The PHICPY refinement: a PHICPY segment in one range does not
    /// interfere with the other range if the phi node it models
    /// belongs to the PHICPY range and the corresponding incoming
    /// value belongs to the other range. The check is asymmetric by
    /// construction; operands are swapped once to normalize.
    fn check_overlapping_segments_interfere<'a>(
        &self,
        group: &FuncGroup,
        numbering: &Numbering,
        mut r1: &'a LiveRange,
        mut s1: &'a Segment,
        mut r2: &'a LiveRange,
        mut s2: &'a Segment,
    ) -> bool {
        if s1.strength != Strength::PhiCpy {
            std::mem::swap(&mut r1, &mut r2);
            std::mem::swap(&mut s1, &mut s2);
        }
        if s1.strength != Strength::PhiCpy {
            return true;
        }

        // Locate the phi whose copy slot this segment models.
        for &(fid, v) in &r1.values {
            let func = &group.funcs[fid];
            let ValueDef::BlockParam(block, idx) = *func.value_def(v) else {
                continue;
            };
            let preds = func.compute_predecessors();
            for &pred in preds[block].iter() {
                let slot = numbering.phi_copy_slot(group, fid, pred, block, idx);
                if slot != s1.start {
                    continue;
                }
                let Some(incoming) = incoming_value(func, pred, block, idx) else {
                    continue;
                };
                if r2.values.contains(&(fid, incoming)) {
                    return false;
                }
            }
        }
        true
    }

    fn is_tolerated_two_addr_overlap(
        &self,
        group: &FuncGroup,
        numbering: &Numbering,
        ra: &LiveRange,
        rb: &LiveRange,
        sa: &Segment,
        sb: &Segment,
    ) -> bool {
        let lo = sa.start.max(sb.start);
        let hi = sa.end.min(sb.end);
        if hi - lo != 1 {
            return false;
        }
        let Some((fid, inst)) = numbering.two_addr_site(lo) else {
            return false;
        };
        let func = &group.funcs[fid];
        let InstrData::Intrinsic(call) = func.inst_data(inst) else {
            return false;
        };
        let Some(t) = call.intr.two_addr_operand() else {
            return false;
        };
        let Some(&operand) = call.args.as_slice(&func.val_lists).get(t as usize) else {
            return false;
        };
        let Some(result) = func.inst_result(inst) else {
            return false;
        };
        let op_gv = (fid, operand);
        let res_gv = (fid, result);
        (ra.values.contains(&op_gv) && rb.values.contains(&res_gv))
            || (rb.values.contains(&op_gv) && ra.values.contains(&res_gv))
    }

    /// Non-commutative: true if `a` contains a phi node one of whose
    /// copy-insertion points falls inside a segment of `b`. Used to
    /// forbid unsafe copy elision across a phi.
    pub fn copy_interfere(
        &self,
        group: &FuncGroup,
        numbering: &Numbering,
        a: RangeId,
        b: RangeId,
    ) -> bool {
        let ra = self.range(a);
        let rb = self.range(b);
        for &(fid, v) in &ra.values {
            let func = &group.funcs[fid];
            let ValueDef::BlockParam(block, idx) = *func.value_def(v) else {
                continue;
            };
            let preds = func.compute_predecessors();
            for &pred in preds[block].iter() {
                let slot = numbering.phi_copy_slot(group, fid, pred, block, idx);
                if rb.contains_point(slot) {
                    return true;
                }
            }
        }
        false
    }

    // ---- coalescing ------------------------------------------------

    /// Merges `b` into `a`. The caller must have checked interference
    /// first; coalescing interfering or category-conflicting ranges is
    /// a programming error.
    pub fn coalesce(
        &mut self,
        group: &FuncGroup,
        numbering: &Numbering,
        a: RangeId,
        b: RangeId,
    ) -> RangeId {
        assert!(
            !self.interfere(group, numbering, a, b),
            "coalescing interfering ranges"
        );
        assert_eq!(
            self.range(a).category,
            self.range(b).category,
            "coalescing across register categories"
        );

        let dead = self.ranges[b].take().expect("coalesced-away range id");
        let keep = self.ranges[a].as_mut().unwrap();
        keep.segments.extend(dead.segments);
        keep.log_align = keep.log_align.max(dead.log_align);
        for gv in dead.values {
            keep.values.push(gv);
            self.value_map.insert(gv, a);
        }
        keep.sort_and_merge();
        keep.test_live_ranges();
        a
    }
}

/// The successor block and parameter index a terminator argument
/// feeds, if the operand is a phi incoming.
fn decode_terminator_arg(func: &Func, inst: Inst, idx: u16) -> Option<(Block, u16)> {
    match func.inst_data(inst) {
        InstrData::Jump(j) => Some((j.target, idx)),
        InstrData::Branch(b) => {
            if idx == 0 {
                return None;
            }
            let nt = b.args_true.len(&func.val_lists) as u16;
            let i = idx - 1;
            if i < nt {
                Some((b.target_true, i))
            } else {
                Some((b.target_false, i - nt))
            }
        }
        _ => None,
    }
}

/// The value a predecessor passes into `(block, param_idx)`.
fn incoming_value(func: &Func, pred: Block, block: Block, param_idx: u16) -> Option<Value> {
    let term = func.terminator(pred)?;
    let args = func.inst_data(term).successor_args(block)?;
    args.as_slice(&func.val_lists).get(param_idx as usize).copied()
}

/// Register category a value must live in.
pub fn category_of(func: &Func, value: Value) -> Category {
    let typ = func.value_type(value);
    if typ.is_ctl() {
        return Category::Special;
    }
    if typ.is_predicate() {
        return Category::Predicate;
    }
    if let Some(def) = func.def_inst(value) {
        match func.inst_data(def) {
            InstrData::ConvertAddr(_) | InstrData::AddrAdd(_) | InstrData::AddrOr(_) => {
                return Category::Address
            }
            InstrData::ReadPredefReg(_) => return Category::Special,
            _ => {}
        }
    }
    Category::General
}

/// Required alignment in log2 bytes: the value's size rounded to a
/// power of two, capped at one register unit.
pub fn alignment_of(func: &Func, value: Value) -> u32 {
    let Some(bytes) = func.value_type(value).total_bytes() else {
        return 0;
    };
    let clamped = bytes.next_power_of_two().min(32);
    clamped.trailing_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live_range::Strength;
    use ir::{builder::FuncBuilder, ElemKind, FuncGroup, Type};

    fn v8() -> Type {
        Type::vec(ElemKind::I32, 8)
    }

    #[test]
    fn querying_unregistered_values_is_permissive() {
        let mut b = FuncBuilder::new("f", vec![v8()], Some(v8()));
        let x = b.arg(0);
        let y = b.instr().add(x, x);
        b.instr().ret(Some(y));
        let func = b.finish();

        let group = FuncGroup::new(func);
        let numbering = Numbering::compute(&group);
        let mut liveness = Liveness::new();

        // Queries work in any order; each creates a fresh range.
        assert_eq!(liveness.range_of_value((group.head, y)), None);
        let id = liveness.build_live_range(&group, &numbering, (group.head, y));
        assert_eq!(liveness.range_of_value((group.head, y)), Some(id));
        assert_eq!(liveness.range(id).values.as_slice(), &[(group.head, y)]);
    }

    #[test]
    fn rebuild_refreshes_after_mutation() {
        let mut b = FuncBuilder::new("f", vec![v8(), v8()], Some(v8()));
        let (x, z) = (b.arg(0), b.arg(1));
        let y = b.instr().add(x, x);
        let q = b.instr().sub(y, z);
        b.instr().ret(Some(q));
        let mut func = b.finish();

        {
            let group_view = FuncGroup::new(func.clone());
            let numbering = Numbering::compute(&group_view);
            let mut liveness = Liveness::new();
            let id = liveness.build_live_range(&group_view, &numbering, (group_view.head, y));
            assert_eq!(liveness.range(id).segments, vec![Segment::strong(0, 1)]);
        }

        // Retarget the subtraction to consume x instead, then insert a
        // later use of y; its range must follow the new shape.
        let q_inst = func.def_inst(q).unwrap();
        func.set_operand(q_inst, 0, x);
        let y_user = func.insert_inst(
            ir::InstrData::Xor(ir::instr::Binary { src1: y, src2: z }),
            Some(v8()),
            ir::func::InsertAt::After(q_inst),
        );
        let _ = y_user;

        let group = FuncGroup::new(func);
        let numbering = Numbering::compute(&group);
        let mut liveness = Liveness::new();
        let id = liveness.build_live_range(&group, &numbering, (group.head, y));
        // y now lives from its def to the xor at number 2.
        assert_eq!(liveness.range(id).segments, vec![Segment::strong(0, 2)]);
        liveness.range(id).test_live_ranges();
    }

    #[test]
    fn remove_value_drops_tracking() {
        let mut b = FuncBuilder::new("f", vec![v8()], Some(v8()));
        let x = b.arg(0);
        let y = b.instr().add(x, x);
        b.instr().ret(Some(y));
        let func = b.finish();

        let group = FuncGroup::new(func);
        let numbering = Numbering::compute(&group);
        let mut liveness = Liveness::new();
        let id = liveness.build_live_range(&group, &numbering, (group.head, y));
        liveness.remove_value((group.head, y));
        assert_eq!(liveness.range_of_value((group.head, y)), None);
        assert!(liveness.range(id).values.is_empty());
    }

    #[test]
    fn weak_pairs_do_not_interfere() {
        // Two values in the head, both live across the same call, only
        // overlap inside the callee's weak span: no interference there,
        // but their strong head-side segments do overlap.
        let callee = {
            let mut b = FuncBuilder::new("g", vec![], None);
            b.instr().ret(None);
            b.finish()
        };

        let mut b = FuncBuilder::new("f", vec![v8(), v8()], Some(v8()));
        let (x, z) = (b.arg(0), b.arg(1));
        let a = b.instr().add(x, x);
        let c = b.instr().add(z, z);
        let g_id = {
            use cranelift_entity::EntityRef;
            ir::FuncId::new(1)
        };
        b.instr().call(g_id, None, []);
        let s = b.instr().sub(a, c);
        b.instr().ret(Some(s));
        let func = b.finish();

        let mut group = FuncGroup::new(func);
        assert_eq!(group.add_func(callee), g_id);
        let numbering = Numbering::compute(&group);
        let mut liveness = Liveness::new();

        let a_range = liveness.build_live_range(&group, &numbering, (group.head, a));
        let c_range = liveness.build_live_range(&group, &numbering, (group.head, c));

        // Both carry a weak span over the callee.
        for id in [a_range, c_range] {
            assert!(liveness
                .range(id)
                .segments
                .iter()
                .any(|s| s.strength == Strength::Weak));
        }
        // They still interfere because their strong segments overlap in
        // the head function.
        assert!(liveness.interfere(&group, &numbering, a_range, c_range));
    }
}
