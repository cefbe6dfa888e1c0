//! Tests for compiling to bytecode and running it back

use hako::{EvalFlags, LoaderOptions};

use super::{RecordingHost, create_test_context, create_test_runtime, eval_string};

#[test]
fn script_round_trip() {
    let runtime = create_test_runtime(RecordingHost::new());
    let bytes = {
        let context = create_test_context(&runtime);
        context
            .ctx()
            .compile_to_bytecode("const a = 6; a * 7", "calc.js", false, EvalFlags::GLOBAL)
            .unwrap()
    };
    assert!(!bytes.is_empty());

    let context = create_test_context(&runtime);
    let ctx = context.ctx();
    let result = ctx.evaluate_bytecode(&bytes, false).unwrap().into_result().unwrap();
    assert_eq!(ctx.get_float64(&result).unwrap(), 42.0);
}

#[test]
fn compiling_does_not_run_the_code() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    ctx.compile_to_bytecode("globalThis.ran = true;", "side.js", false, EvalFlags::GLOBAL)
        .unwrap();
    assert_eq!(eval_string(ctx, "typeof ran"), "undefined");
}

#[test]
fn compiled_module_does_not_shadow_later_eval() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let source = "export const main = import.meta.main;";
    ctx.compile_to_bytecode(source, "x.mjs", true, EvalFlags::GLOBAL).unwrap();
    let namespace =
        ctx.eval(source, "x.mjs", true, EvalFlags::GLOBAL).unwrap().into_result().unwrap();
    let main = ctx.get_prop_str(&namespace, "main").unwrap().unwrap();
    assert!(!ctx.get_bool(&main).unwrap());
}

#[test]
fn compiled_module_is_not_importable_by_name() {
    let host = RecordingHost::new();
    host.add_module("lib.js", "export const v = 41;");
    let runtime = create_test_runtime(host.clone());
    runtime.enable_module_loader(LoaderOptions::default());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    ctx.compile_to_bytecode("export const v = 1;", "lib.js", false, EvalFlags::MODULE)
        .unwrap();
    let namespace = ctx
        .eval(
            "import { v } from 'lib.js'; export const w = v + 1;",
            "main.js",
            false,
            EvalFlags::MODULE,
        )
        .unwrap()
        .into_result()
        .unwrap();
    let w = ctx.get_prop_str(&namespace, "w").unwrap().unwrap();
    assert_eq!(ctx.get_float64(&w).unwrap(), 42.0);
    assert_eq!(host.load_names(), vec!["lib.js".to_string()]);
}

#[test]
fn module_round_trip_is_program_entry() {
    let runtime = create_test_runtime(RecordingHost::new());
    let bytes = {
        let context = create_test_context(&runtime);
        context
            .ctx()
            .compile_to_bytecode(
                "export const main = import.meta.main; export const url = import.meta.url;",
                "/srv/app.js",
                true,
                EvalFlags::GLOBAL,
            )
            .unwrap()
    };

    let context = create_test_context(&runtime);
    let ctx = context.ctx();
    let namespace = ctx.evaluate_bytecode(&bytes, false).unwrap().into_result().unwrap();
    let main = ctx.get_prop_str(&namespace, "main").unwrap().unwrap();
    assert!(ctx.get_bool(&main).unwrap());
    let url = ctx.get_prop_str(&namespace, "url").unwrap().unwrap();
    assert_eq!(ctx.to_string(&url).unwrap(), "file:///srv/app.js");
}

#[test]
fn module_with_dependency_loads_it_when_read() {
    let host = RecordingHost::new();
    host.add_module("dep.js", "export const base = 40;");
    let runtime = create_test_runtime(host.clone());
    runtime.enable_module_loader(LoaderOptions::default());

    let bytes = {
        let context = create_test_context(&runtime);
        context
            .ctx()
            .compile_to_bytecode(
                "import { base } from './dep.js'; export const total = base + 2;",
                "main.js",
                false,
                EvalFlags::MODULE,
            )
            .unwrap()
    };

    let context = create_test_context(&runtime);
    let ctx = context.ctx();
    let namespace = ctx.evaluate_bytecode(&bytes, false).unwrap().into_result().unwrap();
    let total = ctx.get_prop_str(&namespace, "total").unwrap().unwrap();
    assert_eq!(ctx.get_float64(&total).unwrap(), 42.0);
    // Once per context: at compile time and again when read back.
    assert_eq!(host.load_names(), vec!["dep.js".to_string(), "dep.js".to_string()]);
}

#[test]
fn compile_error_is_returned_as_err() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let error = ctx
        .compile_to_bytecode("function (", "broken.js", false, EvalFlags::GLOBAL)
        .unwrap_err();
    assert_eq!(error.as_exception().unwrap().name, "SyntaxError");
}

#[test]
fn load_only_returns_module_record() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let bytes = ctx
        .compile_to_bytecode("export const x = 1;", "lazy.mjs", true, EvalFlags::GLOBAL)
        .unwrap();

    let other = create_test_context(&runtime);
    let other_ctx = other.ctx();
    let loaded = other_ctx.evaluate_bytecode(&bytes, true).unwrap().into_result().unwrap();
    let module = other_ctx.module_def_of(&loaded).unwrap();
    assert_eq!(other_ctx.module_name(module), "lazy.mjs");
}

#[test]
fn load_only_script_is_not_run() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let bytes = ctx
        .compile_to_bytecode("globalThis.touched = 1;", "lazy.js", false, EvalFlags::GLOBAL)
        .unwrap();
    let loaded = ctx.evaluate_bytecode(&bytes, true).unwrap().into_result().unwrap();
    assert!(ctx.module_def_of(&loaded).is_none());
    assert_eq!(eval_string(ctx, "typeof touched"), "undefined");
}

#[test]
fn runtime_error_in_bytecode_is_exception_handle() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let bytes = ctx
        .compile_to_bytecode("null.property", "npe.js", false, EvalFlags::GLOBAL)
        .unwrap();
    let result = ctx.evaluate_bytecode(&bytes, false).unwrap();
    assert!(result.is_exception());
    let error = result.into_result().unwrap_err();
    assert_eq!(error.as_exception().unwrap().name, "TypeError");
}

#[test]
fn garbage_buffer_is_exception_handle() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let result = ctx.evaluate_bytecode(b"definitely not bytecode", false).unwrap();
    assert!(result.is_exception());
    let empty = ctx.evaluate_bytecode(&[], false).unwrap();
    assert!(empty.is_exception());
}
