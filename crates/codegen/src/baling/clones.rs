//! Post-traversal cloning that restores the single-use invariant for
//! fused values.

use super::Baling;
use ir::{instr::InstrData, Func, Use};
use smallvec::SmallVec;

impl Baling {
    /// Drains the pending-clone worklist in LIFO order, so nested
    /// fusions are cloned after their cloned parent exists. Cloning a
    /// multi-use instruction redirects exactly one use to the fresh
    /// clone, then re-checks the clone's own fused operands, which have
    /// gained a use.
    pub(crate) fn do_clones(&mut self, func: &mut Func) {
        while let Some(inst) = self.to_clone.pop() {
            if func.is_erased(inst) {
                continue;
            }
            let Some(result) = func.inst_result(inst) else {
                continue;
            };

            // Extends and address computations are kept single-use for
            // every consumer, fused or not; other instructions only
            // need exclusive copies for their fusion edges.
            let force = matches!(
                func.inst_data(inst),
                InstrData::Ext(_)
                    | InstrData::AddrAdd(_)
                    | InstrData::AddrOr(_)
                    | InstrData::ConvertAddr(_)
            );

            loop {
                if func.num_uses(result) <= 1 {
                    break;
                }
                let split: Option<Use> = func
                    .uses(result)
                    .iter()
                    .copied()
                    .find(|u| force || self.is_fusion_edge(*u));
                let Some(u) = split else {
                    break;
                };

                let clone = func.clone_inst(inst);
                let info = self.info(inst);
                self.set_info(clone, info);
                let clone_result = func.inst_result(clone).unwrap();
                func.replace_use(u, clone_result);
                tracing::trace!(?inst, ?clone, "cloned for exclusive use");

                // The clone shares the original's operands; any operand
                // baled into it is now multi-use and must be cloned in
                // turn.
                let mut fused_defs: SmallVec<[ir::Inst; 4]> = SmallVec::new();
                func.inst_data(clone).visit_operands(&func.val_lists, |idx, value| {
                    if info.is_operand_baled(idx) {
                        if let Some(def) = func.def_inst(value) {
                            fused_defs.push(def);
                        }
                    }
                });
                self.to_clone.extend(fused_defs);
            }
        }
    }

    fn is_fusion_edge(&self, u: Use) -> bool {
        self.info(u.inst).is_operand_baled(u.idx)
    }
}
