//! Building a function through the builder API, dumping it, and
//! running the validation passes over it.

use ir::{
    builder::FuncBuilder,
    formatter::format_func,
    instr::CmpPred,
    validation, ElemKind, Region, Type,
};
use pretty_assertions::assert_eq;

fn v4() -> Type {
    Type::vec(ElemKind::I32, 4)
}

#[test]
fn straight_line_dump() {
    tracing_subscriber::fmt::try_init().ok();

    let mut b = FuncBuilder::new("f", vec![v4(), v4()], Some(v4()));
    let (x, y) = (b.arg(0), b.arg(1));
    let sum = b.instr().add(x, y);
    b.instr().ret(Some(sum));
    let func = b.finish();

    validation::validate(&func).unwrap();
    assert_eq!(
        format_func(&func),
        "func f:\n\
         block0:\n\
         \x20 %v2 = add %v0, %v1\n\
         \x20 return %v2\n"
    );
}

#[test]
fn region_ops_dump_their_shape() {
    let mut b = FuncBuilder::new("g", vec![Type::vec(ElemKind::I32, 16)], Some(v4()));
    let big = b.arg(0);
    let r = b
        .instr()
        .rd_region(big, Region::row(ElemKind::I32, 4, 2, 8));
    b.instr().ret(Some(r));
    let func = b.finish();

    validation::validate(&func).unwrap();
    let dump = format_func(&func);
    assert!(dump.contains("rdregion %v0 [off=8, n=4, w=4, s=2, vs=0]"), "{dump}");
}

#[test]
fn validation_rejects_missing_terminator() {
    let mut b = FuncBuilder::new("bad", vec![v4(), v4()], None);
    let (x, y) = (b.arg(0), b.arg(1));
    b.instr().add(x, y);
    let func = b.finish();

    assert!(validation::validate(&func).is_err());
}

#[test]
fn validation_accepts_branching_flow() {
    let mut b = FuncBuilder::new("h", vec![v4(), v4()], Some(Type::pred(4)));
    let (x, y) = (b.arg(0), b.arg(1));
    let t = b.create_block();
    let e = b.create_block();
    let c = b.instr().cmp(CmpPred::Lt, x, y);
    let any = b.instr().any(c);
    b.instr().branch(any, t, e);
    b.switch_to_block(t);
    b.instr().ret(Some(c));
    b.switch_to_block(e);
    b.instr().ret(Some(c));
    let func = b.finish();

    validation::validate(&func).unwrap();
}
