use crate::{
    func::{Func, ValueDef},
    validation::ValidationError,
};

/// Verifies the SSA discipline: every instruction-result operand is
/// defined by an instruction that dominates the use. Terminator
/// arguments (phi incomings) are evaluated at the end of the
/// predecessor, so the ordinary dominance requirement covers them too.
pub fn verify_ssa(func: &Func) -> Result<(), ValidationError> {
    let idom = func.compute_idom();

    for (block, block_data) in &func.blocks {
        for (pos, &inst) in block_data.insts.iter().enumerate() {
            let mut err = None;
            func.inst_data(inst).visit_operands(&func.val_lists, |_idx, value| {
                if err.is_some() {
                    return;
                }
                match func.value_def(value) {
                    ValueDef::Result(def) => {
                        let def_block = match func.inst_block(*def) {
                            Some(b) => b,
                            None => {
                                err = Some(format!("use of erased instruction result {value:?}"));
                                return;
                            }
                        };
                        let dominated = if def_block == block {
                            func.pos_in_block(*def) < pos
                        } else {
                            func.dominates(&idom, def_block, block)
                        };
                        if !dominated {
                            err = Some(format!(
                                "definition of {value:?} does not dominate its use in {inst:?}"
                            ));
                        }
                    }
                    ValueDef::BlockParam(param_block, _) => {
                        let dominated =
                            *param_block == block || func.dominates(&idom, *param_block, block);
                        if !dominated {
                            err = Some(format!(
                                "block param {value:?} used outside its dominance region"
                            ));
                        }
                    }
                    ValueDef::FuncArg(_) | ValueDef::Const(_) => {}
                }
            });
            if let Some(err) = err {
                return Err(ValidationError::new(err));
            }
        }
    }

    Ok(())
}
