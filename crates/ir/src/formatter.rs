//! Plain-text dumps of functions, for tests and debugging.

use crate::{
    func::{Block, Func, Value},
    instr::InstrData,
    region::Region,
};
use cranelift_entity::EntityRef;
use std::fmt::Write;

pub fn format_value(func: &Func, value: Value) -> String {
    match &func.values[value].name {
        Some(name) => format!("%{name}"),
        None => format!("%v{}", value.index()),
    }
}

fn format_region(func: &Func, region: &Region) -> String {
    let mut s = format!(
        "[off={}, n={}, w={}, s={}, vs={}",
        region.offset, region.num_elements, region.width, region.stride, region.vstride
    );
    if let Some(index) = region.index {
        write!(s, ", idx={}", format_value(func, index)).unwrap();
    }
    if let Some(mask) = region.mask {
        write!(s, ", mask={}", format_value(func, mask)).unwrap();
    }
    s.push(']');
    s
}

pub fn format_inst(func: &Func, inst: crate::func::Inst) -> String {
    let data = func.inst_data(inst);
    let mut line = String::new();
    if let Some(result) = func.inst_result(inst) {
        write!(line, "{} = ", format_value(func, result)).unwrap();
    }
    line.push_str(data.name());

    let mut operands = Vec::new();
    data.visit_operands(&func.val_lists, |_, value| {
        operands.push(format_value(func, value));
    });
    if !operands.is_empty() {
        write!(line, " {}", operands.join(", ")).unwrap();
    }

    match data {
        InstrData::RdRegion(ins) => {
            write!(line, " {}", format_region(func, &ins.region)).unwrap()
        }
        InstrData::WrRegion(ins) => {
            write!(line, " {}", format_region(func, &ins.region)).unwrap()
        }
        InstrData::RdPredRegion(ins) => {
            write!(line, " [off={}, n={}]", ins.offset, ins.num).unwrap()
        }
        InstrData::WrPredRegion(ins) => write!(line, " [off={}]", ins.offset).unwrap(),
        InstrData::WrPredPredRegion(ins) => write!(line, " [off={}]", ins.offset).unwrap(),
        InstrData::Jump(ins) => write!(line, " -> block{}", ins.target.index()).unwrap(),
        InstrData::Branch(ins) => write!(
            line,
            " -> block{}, block{}",
            ins.target_true.index(),
            ins.target_false.index()
        )
        .unwrap(),
        _ => {}
    }

    line
}

fn block_header(func: &Func, block: Block) -> String {
    let mut s = match &func.blocks[block].name {
        Some(name) => format!("{name}"),
        None => format!("block{}", block.index()),
    };
    let params = func.block_params(block);
    if !params.is_empty() {
        let params: Vec<_> = params.iter().map(|&p| format_value(func, p)).collect();
        write!(s, "({})", params.join(", ")).unwrap();
    }
    s.push(':');
    s
}

pub fn format_func(func: &Func) -> String {
    let mut out = format!("func {}:\n", func.name);
    for block in func.preorder_blocks() {
        out.push_str(&block_header(func, block));
        out.push('\n');
        for &inst in &func.blocks[block].insts {
            out.push_str("  ");
            out.push_str(&format_inst(func, inst));
            out.push('\n');
        }
    }
    out
}
