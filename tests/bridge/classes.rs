//! Tests for host-backed functions and classes

use hako::{ClassId, Ctx, Runtime};

use super::{
    RecordingHost, create_test_context, create_test_runtime, eval, eval_number, eval_string,
    functions, set_global,
};

fn install_function(ctx: Ctx<'_>, name: &str, id: i32) {
    let function = ctx.new_function(id, name).unwrap().into_result().unwrap();
    set_global(ctx, name, &function);
}

fn install_class(ctx: Ctx<'_>, name: &str) -> ClassId {
    let class_id = ctx.allocate_class_id();
    let constructor = ctx.new_class(class_id, name, true).unwrap().into_result().unwrap();
    set_global(ctx, name, &constructor);
    class_id
}

#[test]
fn function_calls_reach_host_with_arguments() {
    let host = RecordingHost::new();
    let runtime = create_test_runtime(host.clone());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    install_function(ctx, "sum", functions::SUM);
    assert_eq!(eval_number(ctx, "sum(1, 2, 3)"), 6.0);
    assert_eq!(eval_number(ctx, "sum()"), 0.0);
    assert_eq!(*host.calls.borrow(), vec![(functions::SUM, 3), (functions::SUM, 0)]);
    assert_eq!(eval_string(ctx, "sum.name"), "sum");
}

#[test]
fn missing_result_is_undefined() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    install_function(ctx, "nothing", functions::NOTHING);
    assert_eq!(eval_string(ctx, "typeof nothing(1)"), "undefined");
}

#[test]
fn returned_handles_are_adopted() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    install_function(ctx, "echo", functions::ECHO);
    install_function(ctx, "yes", functions::TRUE);
    assert_eq!(eval_number(ctx, "const o = { a: 11 }; echo(o) === o ? echo(o).a : -1"), 11.0);
    assert_eq!(eval_string(ctx, "String(yes() === true)"), "true");
    runtime.run_gc();
}

#[test]
fn host_errors_are_thrown_into_script() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    install_function(ctx, "fail", functions::FAIL);
    install_function(ctx, "unknown", 99);
    let message = eval_string(
        ctx,
        "try { fail(); 'no throw' } catch (e) { (e instanceof TypeError ? 'type: ' : 'plain: ') + e.message }",
    );
    assert_eq!(message, "plain: host function failed");
    let kind = eval_string(ctx, "try { unknown(); 'no throw' } catch (e) { e.name }");
    assert_eq!(kind, "TypeError");
}

#[test]
fn constructor_builds_instances_through_host() {
    let host = RecordingHost::new();
    let runtime = create_test_runtime(host.clone());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let class_id = install_class(ctx, "Point");
    let point = eval(ctx, "new Point(7, 8)");
    assert_eq!(ctx.class_id_of(&point), Some(class_id));
    let tag = ctx.get_opaque(&point, class_id).unwrap();
    assert_eq!(unsafe { *tag.cast::<u32>().as_ref() }, 7);
    assert_eq!(*host.constructions.borrow(), vec![(class_id.raw(), 2)]);
    assert_eq!(eval_string(ctx, "String(new Point(1) instanceof Point)"), "true");
}

#[test]
fn prototype_methods_are_shared() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    install_class(ctx, "Counter");
    let result = eval_number(
        ctx,
        "Counter.prototype.twice = function (n) { return n * 2; }; new Counter(1).twice(21)",
    );
    assert_eq!(result, 42.0);
}

#[test]
fn subclass_instances_use_derived_prototype() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let class_id = install_class(ctx, "Base");
    let derived = eval(
        ctx,
        "class Derived extends Base { kind() { return 'derived'; } }; new Derived(3)",
    );
    assert_eq!(ctx.class_id_of(&derived), Some(class_id));
    let kind = ctx.get_prop_str(&derived, "kind").unwrap().unwrap();
    assert!(ctx.is_function(&kind));
}

#[test]
fn collected_instances_are_finalized() {
    let host = RecordingHost::new();
    let runtime = create_test_runtime(host.clone());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let class_id = install_class(ctx, "Resource");
    let instance = eval(ctx, "new Resource(9)");
    assert!(host.finalized.borrow().is_empty());
    drop(instance);
    runtime.run_gc();
    runtime.run_gc();
    assert_eq!(*host.finalized.borrow(), vec![(9, class_id.raw())]);
}

#[test]
fn live_instances_are_finalized_with_the_runtime() {
    let host = RecordingHost::new();
    let class_id;
    {
        let runtime: Runtime = create_test_runtime(host.clone());
        let context = create_test_context(&runtime);
        let ctx = context.ctx();
        class_id = install_class(ctx, "Held");
        eval(ctx, "globalThis.kept = new Held(4);");
    }
    assert!(host.finalized.borrow().contains(&(4, class_id.raw())));
}

#[test]
fn registering_a_class_twice_fails() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let class_id = ctx.allocate_class_id();
    ctx.new_class(class_id, "Once", true).unwrap().into_result().unwrap();
    let again = ctx.new_class(class_id, "Once", true).unwrap();
    assert!(again.is_exception());
    let exception = again.into_result().unwrap_err();
    let exception = exception.as_exception().unwrap();
    assert_eq!(exception.name, "InternalError");
    assert!(exception.message.contains("already registered"), "{}", exception.message);
}

#[test]
fn class_ids_are_distinct() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let first = ctx.allocate_class_id();
    let second = ctx.allocate_class_id();
    assert_ne!(first, second);
}

#[test]
fn opaque_requires_matching_class() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let class_id = install_class(ctx, "Owned");
    let plain = ctx.new_object().unwrap();
    let error = ctx.set_opaque(&plain, class_id, std::ptr::null_mut()).unwrap_err();
    assert_eq!(error.as_exception().unwrap().name, "TypeError");
    assert!(ctx.get_opaque(&plain, class_id).is_none());

    let number = ctx.new_float64(1.0).unwrap();
    assert_eq!(ctx.class_id_of(&number), None);
}

#[test]
fn unregistered_class_cannot_be_instantiated() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let class_id = ctx.allocate_class_id();
    let result = ctx.new_object_class(class_id, None).unwrap();
    assert!(result.is_exception());
    assert_eq!(result.into_result().unwrap_err().as_exception().unwrap().name, "TypeError");
}
