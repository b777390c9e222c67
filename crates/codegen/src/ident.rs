//! Copy stripping and conservative memory-identity checks, shared by
//! the baling safety-of-fusion scan and the collapsing pass's
//! nested-write preconditions.

use ir::{Func, GlobalId, Inst, InstrData, Value};
use ir::func::Block;
use cranelift_entity::EntitySet;
use smallvec::SmallVec;

/// Follows bit-for-bit copy instructions (bitcasts) back to the
/// ultimate source value.
pub fn strip_bitcasts(func: &Func, mut value: Value) -> Value {
    while let Some(def) = func.def_inst(value) {
        match func.inst_data(def) {
            InstrData::Bitcast(b) => value = b.src,
            _ => break,
        }
    }
    value
}

/// The global a value is a direct (volatile-style) load of, if any,
/// looking through bitcasts.
pub fn as_global_load(func: &Func, value: Value) -> Option<(Inst, GlobalId)> {
    let value = strip_bitcasts(func, value);
    let def = func.def_inst(value)?;
    match func.inst_data(def) {
        InstrData::LoadGlobal(load) => Some((def, load.global)),
        _ => None,
    }
}

/// Whether every path from `from` to `to` is free of instructions for
/// which `kills` returns true. Conservative: paths that loop back to
/// `from`'s block cannot be proven clear and fail the check.
///
/// The scan is a forward DFS over successor blocks bounded by the two
/// endpoint instructions, short-circuiting on the first forbidden
/// instruction found.
pub fn is_path_clear(
    func: &Func,
    from: Inst,
    to: Inst,
    mut kills: impl FnMut(&InstrData) -> bool,
) -> bool {
    let from_block = match func.inst_block(from) {
        Some(b) => b,
        None => return false,
    };
    let to_block = match func.inst_block(to) {
        Some(b) => b,
        None => return false,
    };

    let scan = |func: &Func, block: Block, start: usize, end: usize, kills: &mut dyn FnMut(&InstrData) -> bool| {
        func.blocks[block].insts[start..end]
            .iter()
            .all(|&inst| !kills(func.inst_data(inst)))
    };

    let from_pos = func.pos_in_block(from);
    let to_pos = func.pos_in_block(to);

    if from_block == to_block && from_pos < to_pos {
        return scan(func, from_block, from_pos + 1, to_pos, &mut kills);
    }

    // Tail of the defining block.
    let from_len = func.blocks[from_block].insts.len();
    if !scan(func, from_block, from_pos + 1, from_len, &mut kills) {
        return false;
    }

    let mut visited = EntitySet::<Block>::new();
    visited.insert(from_block);
    let mut stack = SmallVec::<[Block; 8]>::new();
    func.visit_block_successors(from_block, |suc| stack.push(suc));

    // `to` must actually be reached: an unreachable endpoint proves
    // nothing.
    let mut reached = false;
    while let Some(block) = stack.pop() {
        if block == from_block {
            // A cycle back through the definition: cannot prove clear.
            return false;
        }
        if visited.contains(block) {
            continue;
        }
        visited.insert(block);

        let end = if block == to_block {
            reached = true;
            to_pos
        } else {
            func.blocks[block].insts.len()
        };
        if !scan(func, block, 0, end, &mut kills) {
            return false;
        }
        if block != to_block {
            func.visit_block_successors(block, |suc| stack.push(suc));
        }
    }

    reached
}

/// Whether two values denote the same bits in the same storage: either
/// the same SSA value after bitcast stripping, or two volatile-style
/// loads of the same module-scope global with no store to that global
/// (and no opaque call) on any path between them.
pub fn bitwise_identical(func: &Func, a: Value, b: Value) -> bool {
    let a = strip_bitcasts(func, a);
    let b = strip_bitcasts(func, b);
    if a == b {
        return true;
    }

    let (Some((load_a, global_a)), Some((load_b, global_b))) =
        (as_global_load(func, a), as_global_load(func, b))
    else {
        return false;
    };
    if global_a != global_b {
        return false;
    }

    let kills = |data: &InstrData| match data {
        InstrData::StoreGlobal(store) => store.global == global_a,
        InstrData::Call(_) => true,
        other => other.may_write_memory(),
    };

    // The scan direction follows whichever load comes first; if neither
    // order can be established cheaply, fail closed.
    is_path_clear(func, load_a, load_b, kills) || is_path_clear(func, load_b, load_a, kills)
}
