use crate::{
    func::{Func, Use},
    validation::ValidationError,
};
use smallvec::SmallVec;

/// Verifies that the use table matches a from-scratch scan of every
/// live instruction's operands.
pub fn verify_uses(func: &Func) -> Result<(), ValidationError> {
    let mut expected: Vec<(crate::Value, Use)> = Vec::new();
    for (_, block_data) in &func.blocks {
        for &inst in &block_data.insts {
            func.inst_data(inst).visit_operands(&func.val_lists, |idx, value| {
                expected.push((value, Use { inst, idx }));
            });
        }
    }

    for (value, u) in &expected {
        if !func.uses(*value).contains(u) {
            return Err(ValidationError::new(format!(
                "missing use record for {value:?} at {u:?}"
            )));
        }
    }

    for (value, _) in func.values.iter() {
        let recorded: SmallVec<[Use; 4]> = func.uses(value).iter().copied().collect();
        let scanned = expected
            .iter()
            .filter(|(v, _)| *v == value)
            .count();
        if recorded.len() != scanned {
            return Err(ValidationError::new(format!(
                "stale use records for {value:?}: table has {}, scan found {scanned}",
                recorded.len(),
            )));
        }
    }

    Ok(())
}
