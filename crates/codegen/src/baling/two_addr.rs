//! Two-address send fusion: the deferred second pass over intrinsics
//! with a partial-write operand.
//!
//! The pattern is `read-region(X) -> intrinsic -> write-region` where
//! the read and write regions are structurally identical and both
//! ultimately address the same value. The legalizer may have split
//! either side into a chain of partial accesses; a logical
//! read-write-region sequence reconstructs the whole-value access so
//! split and unsplit forms are matched the same way.

use super::Baling;
use crate::{bale::BaleKind, ident};
use ir::{instr::InstrData, Func, Inst, Region, Value};
use smallvec::SmallVec;

/// A logical whole-value read: either one read-region, or a chain of
/// partial writes from `undef`, each copying a region of the same
/// base into the matching region of the accumulator.
struct ReadSeq {
    base: Value,
    regions: SmallVec<[Region; 4]>,
    /// Defining instruction of the operand (the read, or the chain
    /// head write).
    head: Inst,
    head_kind: BaleKind,
}

/// A logical whole-value write of an intrinsic result back into a
/// base value: either one write-region, or a chain of
/// read-of-result / write-into-base pairs.
struct WriteSeq {
    base: Value,
    regions: SmallVec<[Region; 4]>,
    /// The write-region consuming the result directly, for the
    /// unsplit form.
    direct_head: Option<Inst>,
}

impl ReadSeq {
    fn of(func: &Func, value: Value) -> Option<ReadSeq> {
        let def = func.def_inst(value)?;
        match func.inst_data(def) {
            InstrData::RdRegion(rd) => Some(ReadSeq {
                base: rd.src,
                regions: SmallVec::from_elem(rd.region.clone(), 1),
                head: def,
                head_kind: BaleKind::RdRegion,
            }),
            InstrData::WrRegion(_) => {
                // Walk the chain of partial writes down to undef.
                let mut regions: SmallVec<[Region; 4]> = SmallVec::new();
                let mut base: Option<Value> = None;
                let mut cur = def;
                loop {
                    let InstrData::WrRegion(wr) = func.inst_data(cur) else {
                        return None;
                    };
                    // Each piece must copy a region of the base into
                    // the same region of the accumulator.
                    let piece = func.def_inst(wr.new)?;
                    let InstrData::RdRegion(rd) = func.inst_data(piece) else {
                        return None;
                    };
                    if rd.region != wr.region || wr.region.mask.is_some() {
                        return None;
                    }
                    match base {
                        None => base = Some(rd.src),
                        Some(b) if b == rd.src => {}
                        Some(_) => return None,
                    }
                    regions.push(wr.region.clone());

                    if func.as_const(wr.old).is_some_and(|c| c.is_undef()) {
                        break;
                    }
                    let prev = func.def_inst(wr.old)?;
                    if !func.has_one_use(wr.old) {
                        return None;
                    }
                    cur = prev;
                }
                let base = base?;
                let total = func.value_type(base).len();
                if !regions_tile_whole(&regions, total) {
                    return None;
                }
                Some(ReadSeq {
                    base,
                    regions,
                    head: def,
                    head_kind: BaleKind::WrRegion,
                })
            }
            _ => None,
        }
    }
}

impl WriteSeq {
    fn of(func: &Func, result: Value) -> Option<WriteSeq> {
        // Unsplit: the single use is a write-region's new value.
        if let Some(u) = func.single_use(result) {
            if let InstrData::WrRegion(wr) = func.inst_data(u.inst) {
                if u.idx == ir::instr::WrRegion::NEW && wr.region.mask.is_none() {
                    return Some(WriteSeq {
                        base: wr.old,
                        regions: SmallVec::from_elem(wr.region.clone(), 1),
                        direct_head: Some(u.inst),
                    });
                }
            }
        }

        // Split: every use is a read of a piece of the result, feeding
        // a chain of writes into the same base.
        let mut pairs: SmallVec<[(Inst, Region); 4]> = SmallVec::new();
        for u in func.uses(result) {
            let InstrData::RdRegion(rd) = func.inst_data(u.inst) else {
                return None;
            };
            let piece = func.inst_result(u.inst)?;
            let wu = func.single_use(piece)?;
            let InstrData::WrRegion(wr) = func.inst_data(wu.inst) else {
                return None;
            };
            if wu.idx != ir::instr::WrRegion::NEW || wr.region != rd.region {
                return None;
            }
            pairs.push((wu.inst, wr.region.clone()));
        }
        if pairs.is_empty() {
            return None;
        }

        // The writes must chain through their old values to one base.
        let mut base = None;
        for (wr_inst, _) in &pairs {
            let InstrData::WrRegion(wr) = func.inst_data(*wr_inst) else {
                unreachable!();
            };
            let old_def = func.def_inst(wr.old);
            let chains_to_pair = old_def
                .is_some_and(|d| pairs.iter().any(|(other, _)| *other == d));
            if !chains_to_pair {
                if base.is_some() {
                    return None;
                }
                base = Some(wr.old);
            }
        }
        let base = base?;
        let regions: SmallVec<[Region; 4]> = pairs.into_iter().map(|(_, r)| r).collect();
        let total = func.value_type(base).len();
        if !regions_tile_whole(&regions, total) {
            return None;
        }
        Some(WriteSeq {
            base,
            regions,
            direct_head: None,
        })
    }
}

/// Whether a set of contiguous one-row regions exactly tiles a value
/// of `total` elements.
fn regions_tile_whole(regions: &[Region], total: u32) -> bool {
    if regions.iter().any(|r| !r.is_contiguous() || r.is_indirect()) {
        return false;
    }
    let mut spans: SmallVec<[(i64, i64); 4]> = regions
        .iter()
        .map(|r| {
            let b = r.elem_bytes() as i64;
            (r.offset as i64, r.offset as i64 + r.num_elements as i64 * b)
        })
        .collect();
    spans.sort_unstable();
    let elem_bytes = regions[0].elem_bytes() as i64;
    let mut expected = 0;
    for (lo, hi) in spans {
        if lo != expected {
            return false;
        }
        expected = hi;
    }
    expected == total as i64 * elem_bytes
}

/// Structural identity of two region lists, offset-sorted.
fn regions_match(a: &[Region], b: &[Region]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a: Vec<&Region> = a.iter().collect();
    let mut b: Vec<&Region> = b.iter().collect();
    a.sort_by_key(|r| r.offset);
    b.sort_by_key(|r| r.offset);
    a.iter().zip(b.iter()).all(|(ra, rb)| {
        ra.elem == rb.elem
            && ra.num_elements == rb.num_elements
            && ra.width == rb.width
            && ra.stride == rb.stride
            && ra.vstride == rb.vstride
            && ra.offset == rb.offset
            && ra.index == rb.index
    })
}

impl Baling {
    pub(crate) fn process_deferred_two_addr(&mut self, func: &mut Func) {
        let candidates = std::mem::take(&mut self.deferred_two_addr);
        for inst in candidates {
            if func.is_erased(inst) {
                continue;
            }
            self.try_two_addr(func, inst);
        }
    }

    fn try_two_addr(&mut self, func: &mut Func, inst: Inst) {
        let call = match func.inst_data(inst) {
            InstrData::Intrinsic(call) => call.clone(),
            _ => return,
        };
        let Some(t) = call.intr.two_addr_operand() else {
            return;
        };
        let Some(&operand) = call.args.as_slice(&func.val_lists).get(t as usize) else {
            return;
        };

        let Some(read) = ReadSeq::of(func, operand) else {
            return;
        };
        let Some(result) = func.inst_result(inst) else {
            return;
        };
        let Some(write) = WriteSeq::of(func, result) else {
            return;
        };

        if !regions_match(&read.regions, &write.regions) {
            return;
        }
        // The read's source and the write's old value must denote the
        // same storage, after stripping copy-preserving casts.
        if !ident::bitwise_identical(func, read.base, write.base) {
            return;
        }

        tracing::debug!(?inst, "two-address send fusion");
        self.set_operand_baled(inst, t);
        self.set_kind(read.head, read.head_kind);
        if func.num_uses(operand) > 1 {
            self.to_clone.push(read.head);
        }

        // In the unsplit form the intrinsic also fuses into the final
        // write; the split form leaves the result multi-use.
        if let Some(wr_head) = write.direct_head {
            if func.has_one_use(result) {
                self.set_operand_baled(wr_head, ir::instr::WrRegion::NEW);
            }
        }

        self.do_clones(func);
    }
}

#[cfg(test)]
mod tests {
    use crate::{baling::Baling, subtarget::Subtarget};
    use ir::{
        builder::FuncBuilder,
        instr::{InstrData, Intrinsic},
        ElemKind, Region, Type,
    };

    fn v(n: u32) -> Type {
        Type::vec(ElemKind::I32, n)
    }

    /// Legalizer-split form: the payload is assembled from two partial
    /// reads of the base, and the result is scattered back through two
    /// partial writes of the same regions. The logical whole-value
    /// sequences still match and the two-address operand fuses.
    #[test]
    fn split_read_write_sequences_fuse() {
        let mut b = FuncBuilder::new(
            "f",
            vec![v(8), v(8), Type::pred(8)],
            Some(v(8)),
        );
        let (base, payload, mask) = (b.arg(0), b.arg(1), b.arg(2));
        let lo = Region::row(ElemKind::I32, 4, 1, 0);
        let hi = Region::row(ElemKind::I32, 4, 1, 16);

        // Payload chain: undef <- piece(lo) <- piece(hi).
        let u = b.undef(v(8));
        let rd_lo = b.instr().rd_region(base, lo.clone());
        let w1 = b.instr().wr_region(u, rd_lo, lo.clone());
        let rd_hi = b.instr().rd_region(base, hi.clone());
        let w2 = b.instr().wr_region(w1, rd_hi, hi.clone());

        let send = b
            .instr()
            .intrinsic(Intrinsic::RawSend, [w2, payload, mask], Some(v(8)))
            .unwrap();

        // Result scattered back into the base through the same regions.
        let r_lo = b.instr().rd_region(send, lo.clone());
        let o1 = b.instr().wr_region(base, r_lo, lo);
        let r_hi = b.instr().rd_region(send, hi.clone());
        let o2 = b.instr().wr_region(o1, r_hi, hi);
        b.instr().ret(Some(o2));
        let mut func = b.finish();

        let mut baling = Baling::new(Subtarget::base());
        baling.process_function(&mut func);

        let send_inst = func.def_inst(send).unwrap();
        assert!(baling.info(send_inst).is_operand_baled(0));
        // The chain head keeps its write-region role.
        let w2_inst = func.def_inst(w2).unwrap();
        assert_eq!(
            baling.info(w2_inst).kind,
            crate::bale::BaleKind::WrRegion
        );
        // The split result is multi-use, so the intrinsic itself stays
        // a bale head.
        assert!(!baling.is_baled(&func, send_inst));
        assert!(matches!(func.inst_data(send_inst), InstrData::Intrinsic(_)));
    }

    /// Mismatched regions on the two sides refuse the fusion.
    #[test]
    fn mismatched_regions_refuse() {
        let mut b = FuncBuilder::new("f", vec![v(8), v(8), Type::pred(8)], Some(v(8)));
        let (base, payload, mask) = (b.arg(0), b.arg(1), b.arg(2));
        let rd = b.instr().rd_region(base, Region::row(ElemKind::I32, 8, 1, 0));
        let send = b
            .instr()
            .intrinsic(Intrinsic::RawSend, [rd, payload, mask], Some(v(4)))
            .unwrap();
        // Writes back through a narrower region than was read.
        let w = b
            .instr()
            .wr_region(base, send, Region::row(ElemKind::I32, 4, 1, 0));
        b.instr().ret(Some(w));
        let mut func = b.finish();

        let mut baling = Baling::new(Subtarget::base());
        baling.process_function(&mut func);

        let send_inst = func.def_inst(send).unwrap();
        assert!(!baling.info(send_inst).is_operand_baled(0));
    }
}
