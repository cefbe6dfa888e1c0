//! Tests for array buffers, typed arrays and binary value serialization

use hako::TypedArrayType;

use super::{RecordingHost, create_test_context, create_test_runtime, eval, eval_string, set_global};

#[test]
fn array_buffer_bytes_are_copied_out() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let buffer = eval(ctx, "new Uint8Array([5, 6, 7]).buffer");
    assert!(ctx.is_array_buffer(&buffer));
    assert!(!ctx.is_typed_array(&buffer));
    assert_eq!(ctx.copy_array_buffer(&buffer).unwrap(), vec![5, 6, 7]);

    let plain = ctx.new_object().unwrap();
    assert!(!ctx.is_array_buffer(&plain));
    let error = ctx.copy_array_buffer(&plain).unwrap_err();
    assert_eq!(error.as_exception().unwrap().name, "TypeError");
}

#[test]
fn typed_array_types_are_reported() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    for (source, expected) in [
        ("new Uint8Array(1)", TypedArrayType::Uint8),
        ("new Uint8ClampedArray(1)", TypedArrayType::Uint8Clamped),
        ("new Int16Array(2)", TypedArrayType::Int16),
        ("new Float64Array(1)", TypedArrayType::Float64),
        ("new BigInt64Array(1)", TypedArrayType::BigInt64),
    ] {
        let array = eval(ctx, source);
        assert!(ctx.is_typed_array(&array), "{}", source);
        assert_eq!(ctx.typed_array_type(&array), Some(expected), "{}", source);
    }
    assert_eq!(ctx.typed_array_type(&eval(ctx, "[1, 2]")), None);
    assert_eq!(ctx.typed_array_type(&eval(ctx, "new ArrayBuffer(4)")), None);
    assert_eq!(TypedArrayType::Int16.name(), "Int16Array");
}

#[test]
fn uint8_view_copies_only_its_window() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let view = eval(ctx, "new Uint8Array(new Uint8Array([1, 2, 3, 4, 5]).buffer, 1, 3)");
    assert_eq!(ctx.copy_typed_array_buffer(&view).unwrap(), vec![2, 3, 4]);

    let signed = eval(ctx, "new Int8Array([1, 2])");
    let error = ctx.copy_typed_array_buffer(&signed).unwrap_err();
    let exception = error.as_exception().unwrap();
    assert_eq!(exception.name, "TypeError");
    assert_eq!(exception.message, "Not a Uint8Array");
}

#[test]
fn bjson_preserves_structure() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let value = eval(ctx, "({ a: 1, list: [1, 'two', null], when: new Date(0), big: 12n })");
    let encoded = ctx.bjson_encode(&value).unwrap().into_result().unwrap();
    assert!(ctx.is_array_buffer(&encoded));
    assert!(!ctx.copy_array_buffer(&encoded).unwrap().is_empty());

    let decoded = ctx.bjson_decode(&encoded).unwrap().into_result().unwrap();
    set_global(ctx, "decoded", &decoded);
    let summary = eval_string(
        ctx,
        "[decoded.a, decoded.list[1], typeof decoded.big, decoded.when instanceof Date].join()",
    );
    assert_eq!(summary, "1,two,bigint,true");
}

#[test]
fn bjson_failures_are_exception_handles() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let function = eval(ctx, "(function () { return 1; })");
    assert!(ctx.bjson_encode(&function).unwrap().is_exception());
    assert!(ctx.get_last_error(None).unwrap().is_some());

    let garbage = ctx.new_array_buffer(b"\xff\xff\xff\xff").unwrap();
    let decoded = ctx.bjson_decode(&garbage).unwrap();
    assert!(decoded.is_exception());
    decoded.into_result().unwrap_err();

    let not_a_buffer = ctx.new_string("bytes").unwrap();
    let error = ctx.bjson_decode(&not_a_buffer).unwrap().into_result().unwrap_err();
    assert_eq!(error.as_exception().unwrap().name, "TypeError");
}
