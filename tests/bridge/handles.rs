//! Tests for the handle allocator and ownership protocol

use std::process::Command;

use hako::handle::{self, Constant};
use hako::qjs;

use super::{RecordingHost, create_test_context, create_test_runtime, eval};

#[test]
fn constants_have_stable_addresses() {
    for constant in Constant::ALL {
        assert_eq!(constant.handle(), constant.handle());
        assert_eq!(Constant::at(constant.handle()), Some(constant));
    }
    assert_ne!(Constant::True.handle(), Constant::False.handle());
}

#[test]
fn constants_hold_their_primitive_values() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let undefined = ctx.undefined().unwrap();
    let null = ctx.null().unwrap();
    let yes = ctx.boolean(true).unwrap();
    let no = ctx.boolean(false).unwrap();
    assert_eq!(ctx.type_of(&undefined), "undefined");
    assert_eq!(ctx.type_of(&null), "object");
    assert!(ctx.get_bool(&yes).unwrap());
    assert!(!ctx.get_bool(&no).unwrap());

    // The Rust surface boxes fresh cells, never the static slots.
    assert!(!handle::is_sentinel(undefined.as_raw()));
    assert!(!handle::is_sentinel(yes.as_raw()));
}

#[test]
fn box_then_unbox_gives_back_the_value() {
    let raw = handle::box_value(qjs::JS_NewFloat64(42.5));
    assert!(!raw.is_null());
    assert!(!handle::is_sentinel(raw));
    let value = unsafe { handle::take(raw) };
    assert_eq!(unsafe { qjs::JS_VALUE_GET_TAG(value) }, qjs::JS_TAG_FLOAT64);
    assert_eq!(unsafe { qjs::JS_VALUE_GET_FLOAT64(value) }, 42.5);
}

#[test]
fn duplicates_are_independent_cells() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let original = eval(ctx, "({ answer: 42 })");
    let copy = original.duplicate().unwrap();
    assert_ne!(original.as_raw(), copy.as_raw());

    // Releasing one leaves the other usable.
    drop(original);
    let answer = ctx.get_prop_str(&copy, "answer").unwrap().unwrap();
    assert_eq!(ctx.get_float64(&answer).unwrap(), 42.0);
}

#[test]
fn raw_duplicate_and_release_balance() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let object = eval(ctx, "[1, 2, 3]");
    let raw = object.into_raw();
    let second = unsafe { handle::duplicate(ctx.as_ptr(), raw) };
    assert!(!second.is_null());
    unsafe {
        handle::release(ctx.as_ptr(), raw);
        assert!(qjs::JS_IsArray(handle::unbox(second)));
        handle::release(ctx.as_ptr(), second);
    }
    runtime.run_gc();
}

#[test]
fn releasing_null_is_ignored() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    unsafe { handle::release(context.as_ptr(), std::ptr::null_mut()) };
    unsafe { handle::release_rt(runtime.as_ptr(), std::ptr::null_mut()) };
}

#[test]
fn into_raw_then_from_raw_keeps_ownership() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let raw = ctx.new_string("kept").unwrap().into_raw();
    let back = unsafe { hako::OwnedHandle::from_raw(ctx, raw) }.unwrap();
    assert_eq!(ctx.to_string(&back).unwrap(), "kept");
    assert!(unsafe { hako::OwnedHandle::from_raw(ctx, std::ptr::null_mut()) }.is_none());
}

#[test]
fn exception_handles_are_flagged() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let result = ctx
        .eval("throw new Error('nope')", "throw.js", false, hako::EvalFlags::GLOBAL)
        .unwrap();
    assert!(result.is_exception());
    let error = ctx.get_last_error(Some(&result)).unwrap().unwrap();
    assert!(ctx.is_error(&error));
    // Taken once, gone afterwards.
    assert!(ctx.get_last_error(None).unwrap().is_none());
}

const ABORT_CHILD: &str = "HAKO_TEST_RELEASE_SENTINEL";

#[test]
fn releasing_a_static_handle_aborts() {
    if std::env::var_os(ABORT_CHILD).is_some() {
        let runtime = create_test_runtime(RecordingHost::new());
        let context = create_test_context(&runtime);
        unsafe { handle::release(context.as_ptr(), Constant::Undefined.handle()) };
        // Only reached if the release returned.
        std::process::exit(0);
    }

    let exe = std::env::current_exe().unwrap();
    let output = Command::new(exe)
        .args([
            "handles::releasing_a_static_handle_aborts",
            "--exact",
            "--nocapture",
            "--test-threads=1",
        ])
        .env(ABORT_CHILD, "1")
        .output()
        .unwrap();

    assert!(!output.status.success(), "child exited cleanly after releasing a static handle");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("PROTOCOL VIOLATION"), "stderr was: {}", stderr);
    assert!(stderr.contains("Undefined"), "stderr was: {}", stderr);
}
