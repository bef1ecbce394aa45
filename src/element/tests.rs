use super::*;
use crate::config::KernelConfiguration;
use crate::error::ErrorCategory;
use crate::hardware::Directory;

fn queues() -> (Queue, Queue) {
    let dir = Directory::reference();
    (dir.default_queue().unwrap(), dir.default_queue().unwrap())
}

fn emit_with(graph: &Graph, config: &KernelConfiguration, id: ElementId) -> String {
    Emitter::new(graph, config).emit_statement(id).unwrap()
}

fn emit(graph: &Graph, id: ElementId) -> String {
    emit_with(graph, &KernelConfiguration::default(), id)
}

// ─── Compatibility ─────────────────────────────────────────────────

#[test]
fn test_size_and_device_compatibility() {
    assert!(size_compatible(5, 5));
    assert!(size_compatible(0, 7));
    assert!(size_compatible(7, 0));
    assert!(!size_compatible(5, 4));

    let (q0, q1) = queues();
    assert!(device_compatible(Some(&q0), Some(&q0)));
    assert!(device_compatible(None, Some(&q1)));
    assert!(!device_compatible(Some(&q0), Some(&q1)));
}

#[test]
fn test_operator_takes_max_length_and_concrete_device() {
    let (q, _) = queues();
    let mut g = Graph::new();
    let a = MemBlock::allocate(5, ScalarType::Float32, &q).unwrap();
    let x = g.global(&a);
    let one = g.constant(1.0f32);
    let sum = g.add(x, one).unwrap();
    assert_eq!(g.get(sum).length(), 5);
    assert!(g.get(sum).queue().unwrap().same_as(&q));
    assert_eq!(g.get(sum).scalar_type(), ScalarType::Float32);
}

#[test]
fn test_size_mismatch_creates_nothing() {
    let (q, _) = queues();
    let mut g = Graph::new();
    let a = MemBlock::allocate(5, ScalarType::Int32, &q).unwrap();
    let b = MemBlock::allocate(4, ScalarType::Int32, &q).unwrap();
    let (x, y) = (g.global(&a), g.global(&b));
    let before = g.len();
    let err = g.add(x, y).unwrap_err();
    assert!(matches!(err, Error::SizeMismatch { left: 5, right: 4, .. }));
    assert_eq!(err.category(), ErrorCategory::Construction);
    assert_eq!(g.len(), before);
}

#[test]
fn test_device_mismatch() {
    let (q0, q1) = queues();
    let mut g = Graph::new();
    let a = MemBlock::allocate(3, ScalarType::Int32, &q0).unwrap();
    let b = MemBlock::allocate(3, ScalarType::Int32, &q1).unwrap();
    let (x, y) = (g.global(&a), g.global(&b));
    assert!(matches!(g.add(x, y), Err(Error::DeviceMismatch { .. })));
}

#[test]
fn test_comparison_yields_int() {
    let mut g = Graph::new();
    let a = g.constant(1.5f64);
    let b = g.constant(2.5f64);
    let lt = g.less(a, b).unwrap();
    assert_eq!(g.get(lt).scalar_type(), ScalarType::Int32);
    let c = g.convert(a, ScalarType::Float32).unwrap();
    assert_eq!(g.get(c).scalar_type(), ScalarType::Float32);
}

// ─── Division ──────────────────────────────────────────────────────

#[test]
fn test_literal_zero_detection() {
    assert!(literal_is_zero("0"));
    assert!(literal_is_zero("0u"));
    assert!(literal_is_zero("0.0f"));
    assert!(literal_is_zero("(-0.0)"));
    assert!(literal_is_zero("0L"));
    assert!(!literal_is_zero("1"));
    assert!(!literal_is_zero("0.5f"));
    assert!(!literal_is_zero("buf0[index]"));
}

#[test]
fn test_zero_numerator_folds() {
    let mut g = Graph::new();
    let zero = g.constant(0.0f32);
    let i = g.index();
    let x = g.convert(i, ScalarType::Float32).unwrap();
    let q = g.div(zero, x).unwrap();
    assert!(matches!(g.kind(q), ElementKind::Constant(_)));
    assert_eq!(emit(&g, q), "0.0f;");
}

#[test]
fn test_zero_numerator_fold_keeps_shape() {
    let (q0, q1) = queues();
    let mut g = Graph::new();
    let a = MemBlock::allocate(8, ScalarType::Int32, &q0).unwrap();
    let b = MemBlock::allocate(8, ScalarType::Int32, &q1).unwrap();
    let (x, y) = (g.global(&a), g.global(&b));
    let zero = g.constant(0i32);

    let folded = g.div(zero, x).unwrap();
    assert_ne!(folded, zero);
    assert_eq!(g.get(folded).length(), 8);
    assert!(g.get(folded).queue().unwrap().same_as(&q0));
    assert_eq!(g.get(zero).length(), 0);
    assert!(g.get(zero).queue().is_none());

    assert!(matches!(
        g.add(folded, y),
        Err(Error::DeviceMismatch { .. })
    ));
}

#[test]
fn test_zero_denominator_is_an_error() {
    let mut g = Graph::new();
    let i = g.index();
    let zero = g.constant(0i32);
    let err = g.div(i, zero).unwrap_err();
    assert!(matches!(err, Error::DivisionByZero(_)));
    assert_eq!(err.category(), ErrorCategory::Construction);

    let other_zero = g.constant(0i32);
    assert!(matches!(
        g.div(other_zero, zero),
        Err(Error::DivisionByZero(_))
    ));
}

// ─── Writability ───────────────────────────────────────────────────

#[test]
fn test_assign_to_expression_is_forbidden() {
    let mut g = Graph::new();
    let a = g.constant(1i32);
    let b = g.constant(2i32);
    let err = g.assign(a, b).unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));
}

#[test]
fn test_atomic_requires_integer_array_target() {
    let (q, _) = queues();
    let mut g = Graph::new();
    let f = MemBlock::allocate(4, ScalarType::Float32, &q).unwrap();
    let fx = g.global(&f);
    let one = g.constant(1.0f32);
    assert!(matches!(g.atomic_add(fx, one), Err(Error::Forbidden(_))));

    let v = g.private_variable(ScalarType::Int32);
    let k = g.constant(1i32);
    assert!(matches!(g.atomic_add(v, k), Err(Error::Forbidden(_))));
}

// ─── Emission ──────────────────────────────────────────────────────

#[test]
fn test_emit_assignment() {
    let (q, _) = queues();
    let mut g = Graph::new();
    let a = MemBlock::allocate(8, ScalarType::Float32, &q).unwrap();
    let b = MemBlock::allocate(8, ScalarType::Float32, &q).unwrap();
    let (x, y) = (g.global(&a), g.global(&b));
    let two = g.constant(2.0f32);
    let rhs = g.mul(y, two).unwrap();
    let stmt = g.assign(x, rhs).unwrap();
    insta::assert_snapshot!(emit(&g, stmt), @"buf0[index] = (buf1[index] * 2.0f);");
}

#[test]
fn test_shared_block_shares_one_name() {
    let (q, _) = queues();
    let mut g = Graph::new();
    let a = MemBlock::allocate(4, ScalarType::Int32, &q).unwrap();
    let x1 = g.global(&a);
    let x2 = g.global(&a);
    let stmt = g.add_assign(x1, x2).unwrap();
    insta::assert_snapshot!(emit(&g, stmt), @"buf0[index] += buf0[index];");
}

#[test]
fn test_emit_vectorized_unaligned() {
    let (q, _) = queues();
    let mut g = Graph::new();
    let a = MemBlock::allocate(8, ScalarType::Float32, &q).unwrap();
    let b = MemBlock::allocate(8, ScalarType::Float32, &q).unwrap();
    let (x, y) = (g.global(&a), g.global(&b));
    let stmt = g.assign(x, y).unwrap();
    let config = KernelConfiguration::default().with_vector_width(4);
    insta::assert_snapshot!(
        emit_with(&g, &config, stmt),
        @"vstore4(vload4(index, buf1), index, buf0);"
    );
}

#[test]
fn test_emit_vector_pointers() {
    let (q, _) = queues();
    let mut g = Graph::new();
    let a = MemBlock::allocate(8, ScalarType::Float32, &q).unwrap();
    let x = g.global(&a);
    let one = g.constant(1.0f32);
    let stmt = g.add_assign(x, one).unwrap();
    let config = KernelConfiguration::default()
        .with_vector_width(4)
        .with_unaligned_access(false);
    assert_eq!(emit_with(&g, &config, stmt), "buf0[index] += 1.0f;");
    let mut e = Emitter::new(&g, &config);
    assert_eq!(e.argument_signature(x), "__global float4 *buf0");
}

#[test]
fn test_emit_vectorized_compound_assignment() {
    let (q, _) = queues();
    let mut g = Graph::new();
    let a = MemBlock::allocate(8, ScalarType::Int32, &q).unwrap();
    let x = g.global(&a);
    let one = g.constant(1i32);
    let stmt = g.add_assign(x, one).unwrap();
    let config = KernelConfiguration::default().with_vector_width(2);
    assert_eq!(
        emit_with(&g, &config, stmt),
        "vstore2((vload2(index, buf0) + 1), index, buf0);"
    );
}

#[test]
fn test_emit_extended_index() {
    let mut g = Graph::new();
    let e = g.extended_index();
    let config = KernelConfiguration::default().with_vector_width(4);
    assert_eq!(
        Emitter::new(&g, &config).emit(e).unwrap(),
        "(index * 4 + (int4)(0, 1, 2, 3))"
    );
    assert_eq!(emit(&g, e), "index;");
}

#[test]
fn test_emit_function_forms() {
    let mut g = Graph::new();
    let f = g.constant(2.0f32);
    let h = g.constant(3.0f32);
    let i = g.constant(7i32);
    let j = g.constant(2i32);

    let fmin = g.binary(BinaryOp::Min, f, h).unwrap();
    let imin = g.binary(BinaryOp::Min, i, j).unwrap();
    let frem = g.binary(BinaryOp::Rem, f, h).unwrap();
    let irem = g.binary(BinaryOp::Rem, i, j).unwrap();
    let fmad = g.mad(f, h, f).unwrap();
    let imad = g.mad(i, j, i).unwrap();
    let sel = g.select(j, f, h).unwrap();

    let config = KernelConfiguration::default();
    let mut e = Emitter::new(&g, &config);
    assert_eq!(e.emit(fmin).unwrap(), "fmin(2.0f, 3.0f)");
    assert_eq!(e.emit(imin).unwrap(), "min(7, 2)");
    assert_eq!(e.emit(frem).unwrap(), "fmod(2.0f, 3.0f)");
    assert_eq!(e.emit(irem).unwrap(), "(7 % 2)");
    assert_eq!(e.emit(fmad).unwrap(), "mad(2.0f, 3.0f, 2.0f)");
    assert_eq!(e.emit(imad).unwrap(), "(7 * 2 + 7)");
    assert_eq!(e.emit(sel).unwrap(), "(2 ? 2.0f : 3.0f)");
}

#[test]
fn test_emit_atomic() {
    let (q, _) = queues();
    let mut g = Graph::new();
    let a = MemBlock::allocate(1, ScalarType::Int32, &q).unwrap();
    let b = MemBlock::allocate(1, ScalarType::Int64, &q).unwrap();
    let (x, y) = (g.global(&a), g.global(&b));
    let one = g.constant(1i32);
    let one_l = g.constant(1i64);
    let s1 = g.atomic_add(x, one).unwrap();
    let s2 = g.atomic_add(y, one_l).unwrap();

    let config = KernelConfiguration::default();
    let mut e = Emitter::new(&g, &config);
    assert_eq!(e.emit(s1).unwrap(), "atomic_add(&buf0[index], 1)");
    assert_eq!(e.emit(s2).unwrap(), "atom_add(&buf1[index], 1L)");

    let wide = KernelConfiguration::default().with_vector_width(2);
    let err = Emitter::new(&g, &wide).emit(s1).unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));
}

#[test]
fn test_declarations() {
    let mut g = Graph::new();
    let loc = g.local_array(ScalarType::Float32, 64).unwrap();
    let arr = g.private_array(ScalarType::Int32, 16).unwrap();
    let var = g.variable(3i32);
    let zero_var = g.private_variable(ScalarType::Float32);

    let config = KernelConfiguration::default();
    let mut e = Emitter::new(&g, &config);
    assert_eq!(e.local_declaration(loc).unwrap(), "__local float loc0[65]");
    assert_eq!(e.local_declaration(arr).unwrap(), "__private int arr0[16]");
    assert_eq!(e.local_declaration(var).unwrap(), "__private int var0 = 3");
    assert_eq!(
        e.local_declaration(zero_var).unwrap(),
        "__private float var1 = 0.0f"
    );
    assert_eq!(e.argument_signature(loc), "");
    assert_eq!(e.declared_name(loc), "loc0");

    let wide = KernelConfiguration::default().with_vector_width(4);
    let mut e = Emitter::new(&g, &wide);
    assert_eq!(e.local_declaration(loc).unwrap(), "__local float loc0[68]");
    assert!(matches!(
        e.local_declaration(arr),
        Err(Error::Forbidden(_))
    ));
}

#[test]
fn test_local_array_uses_local_id() {
    let (q, _) = queues();
    let mut g = Graph::new();
    let a = MemBlock::allocate(8, ScalarType::Float32, &q).unwrap();
    let x = g.global(&a);
    let loc = g.local_array(ScalarType::Float32, 16).unwrap();
    let stmt = g.assign(loc, x).unwrap();
    assert_eq!(
        emit(&g, stmt),
        "loc0[(int)get_local_id(0)] = buf0[index];"
    );

    let wide = KernelConfiguration::default().with_vector_width(4);
    assert_eq!(
        emit_with(&g, &wide, stmt),
        "vstore4(vload4(index, buf0), (int)get_local_id(0), loc0);"
    );

    let origin = g.constant(2i32);
    let i = g.index();
    let shifted = g.sub(i, origin).unwrap();
    let rebased = g.excerpt(stmt, shifted).unwrap();
    assert_eq!(
        emit(&g, rebased),
        "loc0[(int)get_local_id(0)] = buf0[((index - 2))];"
    );
}

#[test]
fn test_host_scalar_signature() {
    let mut g = Graph::new();
    let s = HostScalar::new(2.5f32);
    let v = g.host_scalar(&s);
    let config = KernelConfiguration::default();
    let mut e = Emitter::new(&g, &config);
    assert_eq!(e.argument_signature(v), "const float val0");
    assert_eq!(e.emit(v).unwrap(), "val0");
    s.set(4i32);
    assert_eq!(s.get(), crate::types::Value::Float32(4.0));
}

// ─── Control structures ────────────────────────────────────────────

#[test]
fn test_empty_if_emits_nothing() {
    let mut g = Graph::new();
    let i = g.index();
    let four = g.constant(4i32);
    let cond = g.less(i, four).unwrap();
    let branch = g.if_then(cond).unwrap();
    assert_eq!(emit(&g, branch), "");
}

#[test]
fn test_if_else_emission() {
    let (q, _) = queues();
    let mut g = Graph::new();
    let a = MemBlock::allocate(8, ScalarType::Int32, &q).unwrap();
    let x = g.global(&a);
    let i = g.index();
    let four = g.constant(4i32);
    let cond = g.less(i, four).unwrap();
    let branch = g.if_then(cond).unwrap();
    let one = g.constant(1i32);
    let two = g.constant(2i32);
    let s1 = g.assign(x, one).unwrap();
    let s2 = g.assign(x, two).unwrap();
    g.push_body(branch, s1).unwrap();
    g.push_else(branch, s2).unwrap();
    assert_eq!(
        emit(&g, branch),
        "if ((index < 4)) {\n    buf0[index] = 1;\n} else {\n    buf0[index] = 2;\n}"
    );
    assert!(g.get(branch).queue().unwrap().same_as(&q));
}

#[test]
fn test_control_body_device_checked() {
    let (q0, q1) = queues();
    let mut g = Graph::new();
    let a = MemBlock::allocate(8, ScalarType::Int32, &q0).unwrap();
    let b = MemBlock::allocate(8, ScalarType::Int32, &q1).unwrap();
    let (x, y) = (g.global(&a), g.global(&b));
    let cond = g.less(x, x).unwrap();
    let branch = g.if_then(cond).unwrap();
    let one = g.constant(1i32);
    let s = g.assign(y, one).unwrap();
    assert!(matches!(
        g.push_body(branch, s),
        Err(Error::DeviceMismatch { .. })
    ));
}

#[test]
fn test_control_body_size_checked() {
    let (q, _) = queues();
    let mut g = Graph::new();
    let small = MemBlock::allocate(4, ScalarType::Int32, &q).unwrap();
    let large = MemBlock::allocate(10, ScalarType::Int32, &q).unwrap();
    let (x, y) = (g.global(&small), g.global(&large));
    let i = g.index();
    let limit = g.constant(100i32);
    let cond = g.less(i, limit).unwrap();
    let branch = g.if_then(cond).unwrap();
    assert_eq!(g.get(branch).length(), 0);

    let s1 = g.assign(x, i).unwrap();
    g.push_body(branch, s1).unwrap();
    assert_eq!(g.get(branch).length(), 4);

    let s2 = g.assign(y, i).unwrap();
    assert!(matches!(
        g.push_else(branch, s2),
        Err(Error::SizeMismatch { left: 4, right: 10, .. })
    ));
    assert_eq!(g.get(branch).length(), 4);

    let origin = g.constant(0i32);
    let rebased = g.add(i, origin).unwrap();
    let gathered = g.excerpt(s2, rebased).unwrap();
    g.push_else(branch, gathered).unwrap();
}

#[test]
fn test_control_cannot_contain_itself() {
    let mut g = Graph::new();
    let one = g.constant(1i32);
    let branch = g.if_then(one).unwrap();
    assert!(matches!(
        g.push_body(branch, branch),
        Err(Error::Forbidden(_))
    ));
}

#[test]
fn test_loop_emission() {
    let mut g = Graph::new();
    let acc = g.variable(0i32);
    let start = g.constant(0i32);
    let end = g.constant(3i32);
    let (lp, counter) = g.for_range(start, end).unwrap();
    assert_eq!(emit(&g, lp), "");
    let s = g.add_assign(acc, counter).unwrap();
    g.push_body(lp, s).unwrap();
    assert_eq!(
        emit(&g, lp),
        "for (int it0 = 0; it0 < 3; ++it0) {\n    var0 += it0;\n}"
    );

    let (mut args, mut decls) = (Vec::new(), Vec::new());
    g.classify(lp, &mut args, &mut decls);
    assert!(args.is_empty());
    assert_eq!(decls, vec![acc]);
}

#[test]
fn test_nested_blocks_indent() {
    let mut g = Graph::new();
    let acc = g.variable(0i32);
    let start = g.constant(0i32);
    let end = g.constant(2i32);
    let (outer, _) = g.for_range(start, end).unwrap();
    let (inner, j) = g.for_range(start, end).unwrap();
    let s = g.add_assign(acc, j).unwrap();
    g.push_body(inner, s).unwrap();
    g.push_body(outer, inner).unwrap();
    assert_eq!(
        emit(&g, outer),
        "for (int it0 = 0; it0 < 2; ++it0) {\n    for (int it1 = 0; it1 < 2; ++it1) {\n        var0 += it1;\n    }\n}"
    );
}

#[test]
fn test_barrier() {
    let mut g = Graph::new();
    let b = g.barrier();
    assert_eq!(emit(&g, b), "barrier(CLK_LOCAL_MEM_FENCE);");
}

// ─── Excerpt & parser ──────────────────────────────────────────────

#[test]
fn test_replace_token_whole_word() {
    assert_eq!(
        replace_token("a[index] + reindex + index_2 + index", "index", "(i)"),
        "a[(i)] + reindex + index_2 + (i)"
    );
    assert_eq!(replace_token("indexindex", "index", "x"), "indexindex");
}

#[test]
fn test_excerpt_gather() {
    let (q, _) = queues();
    let mut g = Graph::new();
    let a = MemBlock::allocate(10, ScalarType::Float32, &q).unwrap();
    let x = g.global(&a);
    let i = g.index();
    let two = g.constant(2i32);
    let stride = g.mul(i, two).unwrap();
    let gathered = g.excerpt(x, stride).unwrap();
    assert_eq!(g.get(gathered).length(), 0);
    assert!(g.get(gathered).writable());
    assert_eq!(
        Emitter::new(&g, &KernelConfiguration::default())
            .emit(gathered)
            .unwrap(),
        "buf0[((index * 2))]"
    );
}

#[test]
fn test_excerpt_store_target() {
    let (q, _) = queues();
    let mut g = Graph::new();
    let a = MemBlock::allocate(8, ScalarType::Float32, &q).unwrap();
    let x = g.global(&a);
    let i = g.index();
    let one = g.constant(1i32);
    let shifted = g.add(i, one).unwrap();
    let target = g.excerpt(x, shifted).unwrap();
    let value = g.constant(5.0f32);
    let stmt = g.assign(target, value).unwrap();
    let config = KernelConfiguration::default().with_vector_width(4);
    assert_eq!(
        emit_with(&g, &config, stmt),
        "vstore4(5.0f, ((index + 1)), buf0);"
    );
}

#[test]
fn test_excerpt_rebases_whole_statement() {
    let (q, _) = queues();
    let mut g = Graph::new();
    let a = MemBlock::allocate(5, ScalarType::Int32, &q).unwrap();
    let x = g.global(&a);
    let i = g.index();
    let stmt = g.assign(x, i).unwrap();
    let three = g.constant(3i32);
    let rebase = g.sub(i, three).unwrap();
    let moved = g.excerpt(stmt, rebase).unwrap();
    assert_eq!(emit(&g, moved), "buf0[((index - 3))] = ((index - 3));");
}

#[test]
fn test_parser_substitution() {
    let (q, _) = queues();
    let mut g = Graph::new();
    let a = MemBlock::allocate(6, ScalarType::Float32, &q).unwrap();
    let b = MemBlock::allocate(6, ScalarType::Float32, &q).unwrap();
    let (x, y) = (g.global(&a), g.global(&b));
    let p = g
        .parser("$out = native_sin($in) + $in2", &[(x, "$out"), (y, "$in"), (y, "$in2")])
        .unwrap();
    assert_eq!(g.get(p).length(), 6);
    assert_eq!(
        emit(&g, p),
        "buf0[index] = native_sin(buf1[index]) + buf1[index];"
    );
}

#[test]
fn test_parser_checks_bindings() {
    let (q, _) = queues();
    let mut g = Graph::new();
    let a = MemBlock::allocate(6, ScalarType::Float32, &q).unwrap();
    let b = MemBlock::allocate(5, ScalarType::Float32, &q).unwrap();
    let (x, y) = (g.global(&a), g.global(&b));
    assert!(matches!(
        g.parser("$a = $b", &[(x, "$a"), (y, "$b")]),
        Err(Error::SizeMismatch { .. })
    ));
}

// ─── Classification ────────────────────────────────────────────────

#[test]
fn test_collect_into_partitions_leaves() {
    let (q, _) = queues();
    let mut g = Graph::new();
    let a = MemBlock::allocate(8, ScalarType::Float32, &q).unwrap();
    let x = g.global(&a);
    let s = HostScalar::new(2.0f32);
    let v = g.host_scalar(&s);
    let loc = g.local_array(ScalarType::Float32, 8).unwrap();
    let prod = g.mul(x, v).unwrap();
    let stmt = g.assign(loc, prod).unwrap();

    let (mut args, mut decls) = (Vec::new(), Vec::new());
    g.collect_into(stmt, &mut args, &mut decls);
    assert_eq!(decls, vec![loc]);
    assert_eq!(args, vec![x, v]);
    assert!(g.get(x).is_argument());
    assert!(g.get(loc).is_local_declaration());
    assert!(!g.get(prod).is_declarable());
}

#[test]
fn test_view_becomes_subrange() {
    let (q, _) = queues();
    let mut g = Graph::new();
    let parent = MemBlock::allocate(13, ScalarType::Int32, &q).unwrap();
    let view = g.subrange(&parent, 5, 8).unwrap();
    assert!(matches!(g.kind(view), ElementKind::SubRange(_)));
    assert_eq!(g.get(view).length(), 8);
    assert!(g.subrange(&parent, 10, 8).is_err());
}
