//! End-to-end scenarios over built function groups: collapse, bale,
//! number, then query liveness the way the register allocator would.

use codegen::{baling::Baling, collapse, liveness::Liveness, Numbering, Subtarget};
use ir::{
    builder::FuncBuilder,
    instr::InstrData,
    ElemKind, FuncGroup, FuncId, Region, Type,
};
use cranelift_entity::EntityRef;

fn v8() -> Type {
    Type::vec(ElemKind::I32, 8)
}

/// Liveness across calls: F calls G, G calls H. A value live across
/// F's call to G picks up H's span transitively (weak), and interferes
/// with a value live inside H's body.
#[test]
fn liveness_across_call_chain() {
    tracing_subscriber::fmt::try_init().ok();

    // Forward ids: F is the group head (0), then G (1), H (2).
    let g_id = FuncId::new(1);
    let h_id = FuncId::new(2);

    let mut fb = FuncBuilder::new("F", vec![v8()], None);
    let a = fb.arg(0);
    let x = fb.instr().add(a, a);
    fb.instr().call(g_id, None, []);
    let _y = fb.instr().sub(x, a);
    fb.instr().ret(None);
    let f = fb.finish();

    let mut gb = FuncBuilder::new("G", vec![], None);
    gb.instr().call(h_id, None, []);
    gb.instr().ret(None);
    let g = gb.finish();

    let mut hb = FuncBuilder::new("H", vec![v8()], Some(v8()));
    let b = hb.arg(0);
    let hv = hb.instr().add(b, b);
    hb.instr().ret(Some(hv));
    let h = hb.finish();

    let mut group = FuncGroup::new(f);
    assert_eq!(group.add_func(g), g_id);
    assert_eq!(group.add_func(h), h_id);

    let numbering = Numbering::compute(&group);
    let mut liveness = Liveness::new();

    let x_range = liveness.build_live_range(&group, &numbering, (group.head, x));
    let hv_range = liveness.build_live_range(&group, &numbering, (h_id, hv));

    // x's range now contains weak segments covering H's numbering
    // range, via G's transitive subroutine span.
    let (h_start, h_end) = numbering.func_range(h_id);
    let covers_h = liveness
        .range(x_range)
        .segments
        .iter()
        .any(|s| {
            s.strength == codegen::live_range::Strength::Weak
                && s.start <= h_start
                && s.end >= h_end
        });
    assert!(covers_h, "weak subroutine span of H missing from x");

    // A weak-vs-strong overlap is interference.
    assert!(liveness.interfere(&group, &numbering, x_range, hv_range));
    assert!(liveness.interfere(&group, &numbering, hv_range, x_range));
}

/// Phi critical-edge non-interference: the PHICPY segment at the end
/// of the predecessor does not make the incoming value and the phi
/// interfere, and copy-interference stays non-commutative.
#[test]
fn phi_critical_edge_coalescing() {
    tracing_subscriber::fmt::try_init().ok();

    let mut fb = FuncBuilder::new("f", vec![v8(), Type::pred(1)], Some(v8()));
    let (x, c) = (fb.arg(0), fb.arg(1));
    let b1 = fb.create_block();
    let b3 = fb.create_block();
    let p = fb.append_block_param(b3, v8());

    // entry: v, then a critical edge straight into b3.
    let vval = fb.instr().add(x, x);
    fb.instr().branch_with_args(c, b3, b1, [vval], []);

    fb.switch_to_block(b1);
    let w = fb.instr().sub(vval, x);
    fb.instr().jump(b3, [w]);

    fb.switch_to_block(b3);
    fb.instr().ret(Some(p));
    let func = fb.finish();

    ir::validation::validate(&func).unwrap();
    let group = FuncGroup::new(func);
    let numbering = Numbering::compute(&group);
    let mut liveness = Liveness::new();

    let v_range = liveness.build_live_range(&group, &numbering, (group.head, vval));
    let p_range = liveness.build_live_range(&group, &numbering, (group.head, p));
    let w_range = liveness.build_live_range(&group, &numbering, (group.head, w));

    // The incoming value does not interfere with the phi despite the
    // PHICPY point at the end of the predecessor; the query is
    // commutative.
    assert!(!liveness.interfere(&group, &numbering, v_range, p_range));
    assert!(!liveness.interfere(&group, &numbering, p_range, v_range));

    // copy_interfere is not commutative: the phi's copy point lies
    // inside the incoming value's segment, but not the other way
    // round.
    assert!(liveness.copy_interfere(&group, &numbering, p_range, v_range));
    assert!(!liveness.copy_interfere(&group, &numbering, v_range, p_range));

    // The other incoming value coalesces with the phi, and coverage is
    // the exact union of both ranges.
    let before: Vec<u32> = {
        let mut pts = Vec::new();
        for id in [w_range, p_range] {
            for seg in &liveness.range(id).segments {
                pts.extend(seg.start..seg.end);
            }
        }
        pts
    };
    assert!(!liveness.interfere(&group, &numbering, p_range, w_range));
    let merged = liveness.coalesce(&group, &numbering, p_range, w_range);
    for pt in &before {
        assert!(
            liveness.range(merged).contains_point(*pt),
            "coalescing lost point {pt}"
        );
    }
    let covered: u32 = liveness
        .range(merged)
        .segments
        .iter()
        .map(|s| s.end - s.start)
        .sum();
    let mut unique = before.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(covered as usize, unique.len(), "coalescing gained points");
    liveness.range(merged).test_live_ranges();
}

/// The full pipeline on a region chain: collapse merges the reads,
/// baling fuses the arithmetic into the write, and liveness builds
/// clean ranges for every remaining value.
#[test]
fn collapse_then_bale_then_liveness() {
    tracing_subscriber::fmt::try_init().ok();

    let mut fb = FuncBuilder::new("kernel", vec![Type::vec(ElemKind::I32, 32), v8()], Some(v8()));
    let (big, y) = (fb.arg(0), fb.arg(1));
    let r1 = fb
        .instr()
        .rd_region(big, Region::grid(ElemKind::I32, 16, 8, 1, 8, 0));
    let r2 = fb.instr().rd_region(r1, Region::row(ElemKind::I32, 8, 1, 8 * 4));
    let sum = fb.instr().add(r2, y);
    let out = fb.instr().wr_region(y, sum, Region::row(ElemKind::I32, 8, 1, 0));
    fb.instr().ret(Some(out));
    let mut func = fb.finish();

    let subtarget = Subtarget::base();
    let mut baling = Baling::new(subtarget.clone());
    let changed = collapse::run_function(&mut func, &subtarget, &mut baling);
    assert!(changed);
    ir::validation::validate(&func).unwrap();

    // The inner read now reads the big value directly and the chain's
    // first read is gone.
    let r2_inst = func.def_inst(r2).unwrap();
    let InstrData::RdRegion(rd) = func.inst_data(r2_inst) else {
        panic!();
    };
    assert_eq!(rd.src, big);
    assert_eq!(rd.region.offset, 8 * 4);
    assert!(func.is_erased(func.def_inst(r1).unwrap()));

    baling.process_function(&mut func);
    let out_inst = func.def_inst(out).unwrap();
    let bale = baling.build_bale(&func, out_inst);
    // wrregion <- add <- rdregion fused into one bale.
    assert_eq!(bale.len(), 3);
    let main = bale.main_inst().unwrap();
    assert!(matches!(func.inst_data(main.inst), InstrData::Add(_)));

    let group = FuncGroup::new(func);
    let numbering = Numbering::compute(&group);
    let mut liveness = Liveness::new();
    let func = &group.funcs[group.head];
    let values: Vec<_> = func
        .inst_ids()
        .filter(|&i| !func.is_erased(i))
        .filter_map(|i| func.inst_result(i))
        .collect();
    for value in values {
        let id = liveness.build_live_range(&group, &numbering, (group.head, value));
        liveness.range(id).test_live_ranges();
    }
}

/// Interference is commutative across a spread of ranges.
#[test]
fn interference_symmetry() {
    tracing_subscriber::fmt::try_init().ok();

    let mut fb = FuncBuilder::new("f", vec![v8(), v8()], Some(v8()));
    let (a, b) = (fb.arg(0), fb.arg(1));
    let x = fb.instr().add(a, b);
    let y = fb.instr().sub(x, a);
    let z = fb.instr().mul(x, y);
    let q = fb.instr().xor(z, b);
    fb.instr().ret(Some(q));
    let func = fb.finish();

    let group = FuncGroup::new(func);
    let numbering = Numbering::compute(&group);
    let mut liveness = Liveness::new();

    let ids: Vec<_> = [x, y, z, q]
        .into_iter()
        .map(|value| liveness.build_live_range(&group, &numbering, (group.head, value)))
        .collect();

    for (i, &ra) in ids.iter().enumerate() {
        for &rb in &ids[i + 1..] {
            assert_eq!(
                liveness.interfere(&group, &numbering, ra, rb),
                liveness.interfere(&group, &numbering, rb, ra),
            );
        }
    }
}

/// Group-level driving: one baling state per function, so equal
/// instruction ids in different functions never share records.
#[test]
fn group_level_collapse_and_bale() {
    tracing_subscriber::fmt::try_init().ok();

    let mut fb = FuncBuilder::new("head", vec![Type::vec(ElemKind::I32, 32), v8()], Some(v8()));
    let (big, y) = (fb.arg(0), fb.arg(1));
    let r1 = fb.instr().rd_region(big, Region::row(ElemKind::I32, 16, 2, 0));
    let r2 = fb.instr().rd_region(r1, Region::row(ElemKind::I32, 8, 1, 0));
    let sum = fb.instr().add(r2, y);
    let out = fb.instr().wr_region(y, sum, Region::row(ElemKind::I32, 8, 1, 0));
    fb.instr().ret(Some(out));
    let head = fb.finish();

    let mut gb = FuncBuilder::new("sub", vec![v8(), v8()], Some(v8()));
    let (a, b) = (gb.arg(0), gb.arg(1));
    // Same instruction ids as the head's first instructions, but a
    // completely different shape: nothing here may fuse.
    let s1 = gb.instr().sub(a, b);
    let s2 = gb.instr().mul(s1, s1);
    gb.instr().ret(Some(s2));
    let sub_func = gb.finish();

    let mut group = FuncGroup::new(head);
    let sub_id = group.add_func(sub_func);

    let subtarget = Subtarget::base();
    let mut baling = codegen::GroupBaling::new(subtarget.clone());
    collapse::run_group(&mut group, &subtarget, &mut baling);
    baling.process_group(&mut group);

    // Head: the read chain merged and the write fused its arithmetic.
    let head_func = &group.funcs[group.head];
    let out_inst = head_func.def_inst(out).unwrap();
    let head_baling = baling.func(group.head).unwrap();
    let bale = head_baling.build_bale(head_func, out_inst);
    assert_eq!(bale.len(), 3);
    assert!(head_func.is_erased(head_func.def_inst(r1).unwrap()));

    pretty_assertions::assert_eq!(
        ir::formatter::format_func(head_func),
        "func head:\n\
         block0:\n\
         \x20 %v3 = rdregion %v0 [off=0, n=8, w=8, s=2, vs=0]\n\
         \x20 %v4 = add %v3, %v1\n\
         \x20 %v5 = wrregion %v1, %v4 [off=0, n=8, w=8, s=1, vs=0]\n\
         \x20 return %v5\n"
    );

    // Subroutine: its records are independent; s1 is multi-use and
    // nothing is marked fused.
    let sub_f = &group.funcs[sub_id];
    let sub_baling = baling.func(sub_id).unwrap();
    for inst in sub_f.inst_ids() {
        assert_eq!(sub_baling.info(inst).bits, 0);
        assert!(!sub_baling.is_baled(sub_f, inst));
    }
}
