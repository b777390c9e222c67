//! The bale model: which role each fused instruction plays, and the
//! transient container describing one machine instruction's worth of
//! fused IR.

use ir::{
    hash::{FxBuildHasher, IterHashExt},
    Inst,
};
use smallvec::SmallVec;
use std::cmp::Ordering;

/// Role of one instruction inside a bale.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BaleKind {
    /// The instruction that becomes the machine instruction's opcode.
    MainInst,
    WrRegion,
    WrPredRegion,
    WrPredPredRegion,
    RdRegion,
    RdPredRegion,
    Saturate,
    AddrAdd,
    AddrOr,
    /// Sign or zero extension folded into an operand encoding.
    Extend,
    NegMod,
    AbsMod,
    NotMod,
    /// Compare whose destination is fused into a select.
    CmpDst,
    /// all/any predicate reduction fused into its consumer.
    AllAny,
    NotPred,
    /// Store to a module-scope global wrapping a write-region chain.
    GStore,
    /// Replicating predicate shuffle fused into a predication operand.
    ShufflePred,
    /// Read/write of a predefined register fused with its region access.
    RegIntrinsic,
}

/// Per-instruction fusion record: the instruction's role plus one bit
/// per operand position that is baled in rather than a real data
/// dependency.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BaleInfo {
    pub kind: BaleKind,
    pub bits: u16,
}

impl BaleInfo {
    pub fn new(kind: BaleKind) -> Self {
        BaleInfo { kind, bits: 0 }
    }

    pub fn is_operand_baled(&self, idx: u16) -> bool {
        assert!(idx < 16, "operand index out of bitmask range");
        self.bits & (1 << idx) != 0
    }

    pub fn set_operand_baled(&mut self, idx: u16) {
        assert!(idx < 16, "operand index out of bitmask range");
        self.bits |= 1 << idx;
    }

    pub fn clear_operand_baled(&mut self, idx: u16) {
        assert!(idx < 16, "operand index out of bitmask range");
        self.bits &= !(1 << idx);
    }
}

impl Default for BaleInfo {
    fn default() -> Self {
        BaleInfo::new(BaleKind::MainInst)
    }
}

#[derive(Copy, Clone, Debug)]
pub struct BaleInst {
    pub inst: Inst,
    pub info: BaleInfo,
    /// Opcode discriminant captured at build time, so equivalence and
    /// ordering do not need the function.
    pub opcode: u16,
}

/// One machine instruction's worth of fused IR instructions, in
/// depth-first order with the bale head last.
///
/// Built transiently per query by [`crate::Baling::build_bale`]; never
/// stored. Carries a structural hash so later bale-equivalence passes
/// can bucket bales cheaply.
#[derive(Clone, Debug, Default)]
pub struct Bale {
    insts: SmallVec<[BaleInst; 8]>,
    hash: u64,
}

impl Bale {
    pub(crate) fn push(&mut self, inst: BaleInst) {
        self.insts.push(inst);
    }

    pub(crate) fn finish(&mut self) {
        self.hash = FxBuildHasher::default().hash_one_iter(
            self.insts
                .iter()
                .map(|member| (member.info.kind, member.opcode, member.info.bits)),
        );
    }

    pub fn insts(&self) -> &[BaleInst] {
        &self.insts
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// The bale head: the instruction whose result is the bale's
    /// externally visible value.
    pub fn head(&self) -> BaleInst {
        *self.insts.last().expect("empty bale")
    }

    /// The main instruction: the unique member left with the
    /// main-instruction role once the wrapper kinds (write-region,
    /// global-store, saturate, address computations) are walked
    /// through from the head. A bale of nothing but wrappers (e.g. a
    /// lone write of a constant) has none.
    pub fn main_inst(&self) -> Option<BaleInst> {
        let mut seen = None;
        for member in &self.insts {
            if member.info.kind == BaleKind::MainInst {
                debug_assert!(seen.is_none(), "bale contains more than one main instruction");
                seen = Some(*member);
            }
        }
        seen
    }

    pub fn structural_hash(&self) -> u64 {
        self.hash
    }

    /// Structural equivalence: same member roles and opcodes in the
    /// same order. Distinct instructions compare equal when they would
    /// emit the same machine-instruction shape.
    pub fn equivalent(&self, other: &Bale) -> bool {
        self.hash == other.hash
            && self.insts.len() == other.insts.len()
            && self
                .insts
                .iter()
                .zip(other.insts.iter())
                .all(|(a, b)| a.info == b.info && a.opcode == b.opcode)
    }

    /// Total order consistent with `equivalent`, for sorted buckets.
    pub fn total_cmp(&self, other: &Bale) -> Ordering {
        self.hash
            .cmp(&other.hash)
            .then_with(|| self.insts.len().cmp(&other.insts.len()))
            .then_with(|| {
                for (a, b) in self.insts.iter().zip(other.insts.iter()) {
                    let ord = (a.info.kind, a.opcode, a.info.bits).cmp(&(
                        b.info.kind,
                        b.opcode,
                        b.info.bits,
                    ));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    fn member(kind: BaleKind, opcode: u16, bits: u16, i: usize) -> BaleInst {
        BaleInst {
            inst: Inst::new(i),
            info: BaleInfo { kind, bits },
            opcode,
        }
    }

    #[test]
    fn bitmask_roundtrip() {
        let mut info = BaleInfo::new(BaleKind::MainInst);
        assert!(!info.is_operand_baled(0));
        info.set_operand_baled(0);
        info.set_operand_baled(3);
        assert!(info.is_operand_baled(0));
        assert!(info.is_operand_baled(3));
        assert!(!info.is_operand_baled(1));
        info.clear_operand_baled(0);
        assert!(!info.is_operand_baled(0));
    }

    #[test]
    fn equivalence_ignores_instruction_identity() {
        let mut a = Bale::default();
        a.push(member(BaleKind::MainInst, 13, 0, 0));
        a.push(member(BaleKind::WrRegion, 1, 1 << 1, 1));
        a.finish();

        let mut b = Bale::default();
        b.push(member(BaleKind::MainInst, 13, 0, 7));
        b.push(member(BaleKind::WrRegion, 1, 1 << 1, 9));
        b.finish();

        assert!(a.equivalent(&b));
        assert_eq!(a.structural_hash(), b.structural_hash());
        assert_eq!(a.total_cmp(&b), Ordering::Equal);

        let mut c = Bale::default();
        c.push(member(BaleKind::MainInst, 14, 0, 0));
        c.push(member(BaleKind::WrRegion, 1, 1 << 1, 1));
        c.finish();
        assert!(!a.equivalent(&c));
        assert_ne!(a.total_cmp(&c), Ordering::Equal);
    }
}
