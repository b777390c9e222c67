use crate::{func::Func, validation::ValidationError};

/// Verifies that basic blocks all end in terminators, and terminators
/// only appear as the last instruction in a basic block.
pub fn verify_cfg_integrity(func: &Func) -> Result<(), ValidationError> {
    for (block, block_data) in &func.blocks {
        if block_data.insts.is_empty() {
            return Err(ValidationError::new(format!(
                "basic block {block:?} cannot be empty"
            )));
        }
        for &inst in &block_data.insts[..block_data.insts.len() - 1] {
            if func.inst_data(inst).is_terminator() {
                return Err(ValidationError::new(
                    "terminators can only appear as the last instruction in a basic block",
                ));
            }
        }
        let last = *block_data.insts.last().unwrap();
        if !func.inst_data(last).is_terminator() {
            return Err(ValidationError::new(
                "the last instruction in a basic block must be a terminator",
            ));
        }
    }

    Ok(())
}
