//! Tests for value construction, inspection, properties and calls

use hako::{Equality, PromiseState, PropertyFlags};

use super::{RecordingHost, create_test_context, create_test_runtime, eval, eval_string, set_global};

#[test]
fn constructors_produce_expected_types() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    assert_eq!(ctx.type_of(&ctx.new_float64(1.5).unwrap()), "number");
    assert_eq!(ctx.type_of(&ctx.new_string("text").unwrap()), "string");
    assert_eq!(ctx.type_of(&ctx.new_object().unwrap()), "object");
    assert_eq!(ctx.type_of(&ctx.new_symbol("tag", false).unwrap()), "symbol");
    assert_eq!(ctx.type_of(&ctx.boolean(false).unwrap()), "boolean");
    assert_eq!(ctx.type_of(&eval(ctx, "10n")), "bigint");
    assert_eq!(ctx.type_of(&eval(ctx, "() => 1")), "function");

    let array = ctx.new_array().unwrap();
    assert!(ctx.is_array(&array));
    assert_eq!(ctx.get_length(&array).unwrap(), 0);

    let error = ctx.new_error().unwrap();
    assert!(ctx.is_error(&error));
}

#[test]
fn strings_keep_unicode() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let text = ctx.new_string("héllo wörld ✓").unwrap();
    assert_eq!(ctx.to_string(&text).unwrap(), "héllo wörld ✓");
    assert_eq!(ctx.get_length(&text).unwrap(), 13);
}

#[test]
fn integral_floats_stay_numbers() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let whole = ctx.new_float64(3.0).unwrap();
    set_global(ctx, "whole", &whole);
    assert_eq!(eval_string(ctx, "String(Number.isInteger(whole))"), "true");
    let nan = ctx.new_float64(f64::NAN).unwrap();
    assert!(ctx.get_float64(&nan).unwrap().is_nan());
}

#[test]
fn global_symbols_are_shared() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let registered = ctx.new_symbol("app.key", true).unwrap();
    set_global(ctx, "registered", &registered);
    assert_eq!(eval_string(ctx, "String(registered === Symbol.for('app.key'))"), "true");

    let local = ctx.new_symbol("app.key", false).unwrap();
    set_global(ctx, "local", &local);
    assert_eq!(eval_string(ctx, "String(local === Symbol.for('app.key'))"), "false");
}

#[test]
fn equality_algorithms_differ_on_edge_cases() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let nan = ctx.new_float64(f64::NAN).unwrap();
    let zero = ctx.new_float64(0.0).unwrap();
    let negative_zero = ctx.new_float64(-0.0).unwrap();
    let one = ctx.new_float64(1.0).unwrap();
    let one_text = ctx.new_string("1").unwrap();

    assert!(!ctx.is_equal(&nan, &nan, Equality::Strict).unwrap());
    assert!(ctx.is_equal(&nan, &nan, Equality::SameValue).unwrap());
    assert!(ctx.is_equal(&nan, &nan, Equality::SameValueZero).unwrap());

    assert!(ctx.is_equal(&zero, &negative_zero, Equality::Strict).unwrap());
    assert!(!ctx.is_equal(&zero, &negative_zero, Equality::SameValue).unwrap());
    assert!(ctx.is_equal(&zero, &negative_zero, Equality::SameValueZero).unwrap());

    assert!(!ctx.is_equal(&one, &one_text, Equality::Strict).unwrap());
    assert!(ctx.is_equal(&one, &one_text, Equality::Loose).unwrap());
}

#[test]
fn json_round_trip() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let parsed = ctx.parse_json(r#"{"name":"hako","tags":["a","b"],"n":1}"#, "input.json").unwrap();
    let name = ctx.get_prop_str(&parsed, "name").unwrap().unwrap();
    assert_eq!(ctx.to_string(&name).unwrap(), "hako");

    let compact = ctx.to_json(&parsed, 0).unwrap().unwrap();
    assert_eq!(compact, r#"{"name":"hako","tags":["a","b"],"n":1}"#);
    let pretty = ctx.to_json(&parsed, 2).unwrap().unwrap();
    assert!(pretty.contains("\n  \"name\": \"hako\""));

    let function = eval(ctx, "() => 1");
    assert_eq!(ctx.to_json(&function, 0).unwrap(), None);
}

#[test]
fn invalid_json_is_exception_handle() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let result = ctx.parse_json("{ not json", "bad.json").unwrap();
    assert!(result.is_exception());
    let error = result.into_result().unwrap_err();
    assert_eq!(error.as_exception().unwrap().name, "SyntaxError");
}

#[test]
fn cyclic_value_cannot_be_stringified() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let cyclic = eval(ctx, "const c = {}; c.self = c; c");
    let error = ctx.to_json(&cyclic, 0).unwrap_err();
    assert_eq!(error.as_exception().unwrap().name, "TypeError");
}

#[test]
fn missing_property_is_none() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let object = eval(ctx, "({ present: undefined })");
    assert!(ctx.get_prop_str(&object, "absent").unwrap().is_none());
    // Present but undefined is still a property.
    let present = ctx.get_prop_str(&object, "present").unwrap().unwrap();
    assert_eq!(ctx.type_of(&present), "undefined");

    let inherited = ctx.get_prop_str(&object, "toString").unwrap().unwrap();
    assert!(ctx.is_function(&inherited));
}

#[test]
fn properties_by_key_and_index() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let object = ctx.new_object().unwrap();
    let key = ctx.new_string("answer").unwrap();
    let value = ctx.new_float64(42.0).unwrap();
    ctx.set_prop(&object, &key, &value).unwrap();
    let read = ctx.get_prop(&object, &key).unwrap().unwrap();
    assert_eq!(ctx.get_float64(&read).unwrap(), 42.0);
    // The caller's handle is still valid after the set.
    assert_eq!(ctx.get_float64(&value).unwrap(), 42.0);

    let array = ctx.new_array().unwrap();
    ctx.set_prop_index(&array, 0, &value).unwrap();
    ctx.set_prop_index(&array, 2, &key).unwrap();
    assert_eq!(ctx.get_length(&array).unwrap(), 3);
    let second = ctx.get_prop_index(&array, 2).unwrap();
    assert_eq!(ctx.to_string(&second).unwrap(), "answer");
}

#[test]
fn throwing_getter_yields_exception_handle() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let object = eval(ctx, "({ get boom() { throw new Error('getter'); } })");
    let result = ctx.get_prop_str(&object, "boom").unwrap().unwrap();
    assert!(result.is_exception());
    assert_eq!(result.into_result().unwrap_err().as_exception().unwrap().message, "getter");
}

#[test]
fn defined_properties_honor_flags() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let object = ctx.new_object().unwrap();
    let visible = ctx.new_string("visible").unwrap();
    let hidden = ctx.new_string("hidden").unwrap();
    let value = ctx.new_float64(1.0).unwrap();
    ctx.define_prop(&object, &visible, &value, PropertyFlags::DEFAULT).unwrap();
    let frozen = PropertyFlags {
        configurable: false,
        writable: false,
        enumerable: false,
    };
    ctx.define_prop(&object, &hidden, &value, frozen).unwrap();

    assert_eq!(ctx.get_own_property_names(&object, true).unwrap(), vec!["visible".to_string()]);
    assert_eq!(
        ctx.get_own_property_names(&object, false).unwrap(),
        vec!["visible".to_string(), "hidden".to_string()]
    );

    set_global(ctx, "frozenHolder", &object);
    let result = eval_string(
        ctx,
        "'use strict'; (() => { 'use strict'; try { frozenHolder.hidden = 2; return 'written'; } catch (e) { return e.name; } })()",
    );
    assert_eq!(result, "TypeError");
}

#[test]
fn call_passes_this_and_arguments() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let function = eval(ctx, "(function (a, b) { return this.base + a * b; })");
    let this = eval(ctx, "({ base: 2 })");
    let a = ctx.new_float64(4.0).unwrap();
    let b = ctx.new_float64(10.0).unwrap();
    let result = ctx.call(&function, &this, &[&a, &b]).unwrap().into_result().unwrap();
    assert_eq!(ctx.get_float64(&result).unwrap(), 42.0);

    let thrower = eval(ctx, "(() => { throw new SyntaxError('from call'); })");
    let undefined = ctx.undefined().unwrap();
    let failed = ctx.call(&thrower, &undefined, &[]).unwrap();
    assert!(failed.is_exception());
    let error = ctx.get_last_error(Some(&failed)).unwrap().unwrap();
    assert_eq!(ctx.exception_details(&error).name, "SyntaxError");
}

#[test]
fn throw_then_take_last_error() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let error = ctx.new_error_with("ValidationError", "field is required").unwrap();
    let marker = ctx.throw(&error).unwrap();
    assert!(marker.is_exception());

    // A non-exception handle does not consume the pending error.
    let plain = ctx.new_float64(1.0).unwrap();
    assert!(ctx.get_last_error(Some(&plain)).unwrap().is_none());

    let taken = ctx.get_last_error(None).unwrap().unwrap();
    let details = ctx.exception_details(&taken);
    assert_eq!(details.name, "ValidationError");
    assert_eq!(details.message, "field is required");
    assert!(ctx.get_last_error(None).unwrap().is_none());
}

#[test]
fn dump_follows_error_causes() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let error = eval(ctx, "new Error('outer', { cause: new TypeError('inner') })");
    let dumped: serde_json::Value = serde_json::from_str(&ctx.dump(&error).unwrap()).unwrap();
    assert_eq!(dumped["name"], "Error");
    assert_eq!(dumped["message"], "outer");
    assert_eq!(dumped["cause"]["name"], "TypeError");
    assert_eq!(dumped["cause"]["message"], "inner");

    let plain = eval(ctx, "({ a: [1, 2] })");
    let dumped: serde_json::Value = serde_json::from_str(&ctx.dump(&plain).unwrap()).unwrap();
    assert_eq!(dumped, serde_json::json!({ "a": [1, 2] }));
}

#[test]
fn promise_capability_settles_from_host() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let (promise, resolve, _reject) = ctx.new_promise_capability().unwrap();
    assert_eq!(ctx.promise_state(&promise), PromiseState::Pending);
    set_global(ctx, "hostPromise", &promise);
    eval(ctx, "globalThis.seen = null; hostPromise.then(v => { seen = v; });");

    let value = ctx.new_string("done").unwrap();
    let undefined = ctx.undefined().unwrap();
    ctx.call(&resolve, &undefined, &[&value]).unwrap().into_result().unwrap();
    assert_eq!(ctx.promise_state(&promise), PromiseState::Fulfilled);
    let result = ctx.promise_result(&promise).unwrap();
    assert_eq!(ctx.to_string(&result).unwrap(), "done");

    runtime.execute_pending_jobs(None).unwrap();
    assert_eq!(eval_string(ctx, "seen"), "done");
}

#[test]
fn promise_capability_rejects_from_host() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let (promise, _resolve, reject) = ctx.new_promise_capability().unwrap();
    let reason = ctx.new_error_with("Error", "rejected by host").unwrap();
    let undefined = ctx.undefined().unwrap();
    ctx.call(&reject, &undefined, &[&reason]).unwrap().into_result().unwrap();
    assert_eq!(ctx.promise_state(&promise), PromiseState::Rejected);

    let plain = ctx.new_object().unwrap();
    assert_eq!(ctx.promise_state(&plain), PromiseState::NotAPromise);
}

#[test]
fn array_buffer_copies_bytes() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let mut bytes = vec![1u8, 2, 3, 250];
    let buffer = ctx.new_array_buffer(&bytes).unwrap();
    bytes[0] = 99;
    set_global(ctx, "buffer", &buffer);
    assert_eq!(eval_string(ctx, "Array.from(new Uint8Array(buffer)).join(',')"), "1,2,3,250");
    assert_eq!(eval_string(ctx, "String(buffer.byteLength)"), "4");
}

#[test]
fn object_with_prototype() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let proto = eval(ctx, "({ greet() { return 'hi ' + this.who; } })");
    let object = ctx.new_object_proto(&proto).unwrap();
    let who = ctx.new_string("there").unwrap();
    ctx.set_prop_str(&object, "who", &who).unwrap();
    let greet = ctx.get_prop_str(&object, "greet").unwrap().unwrap();
    let result = ctx.call(&greet, &object, &[]).unwrap();
    assert_eq!(ctx.to_string(&result).unwrap(), "hi there");
}

#[test]
fn global_object_is_shared_with_script() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    eval(ctx, "globalThis.fromScript = 'yes';");
    let global = ctx.global_object().unwrap();
    let value = ctx.get_prop_str(&global, "fromScript").unwrap().unwrap();
    assert_eq!(ctx.to_string(&value).unwrap(), "yes");
}

#[test]
fn bigints_cover_the_full_64_bit_range() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let negative = ctx.new_bigint(i64::MIN).unwrap();
    assert_eq!(ctx.type_of(&negative), "bigint");
    assert_eq!(ctx.to_string(&negative).unwrap(), "-9223372036854775808");
    let unsigned = ctx.new_biguint(u64::MAX).unwrap();
    assert_eq!(ctx.to_string(&unsigned).unwrap(), "18446744073709551615");
}

#[test]
fn dates_from_epoch_milliseconds() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let date = ctx.new_date(86_400_000.0).unwrap();
    assert!(ctx.is_date(&date));
    set_global(ctx, "when", &date);
    assert_eq!(eval_string(ctx, "when.toISOString()"), "1970-01-02T00:00:00.000Z");
    assert!(!ctx.is_date(&ctx.new_object().unwrap()));
}

#[test]
fn instance_of_follows_prototype_chain() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    eval(
        ctx,
        "globalThis.Shape = class Shape {}; globalThis.Square = class Square extends Shape {};",
    );
    let square = eval(ctx, "new Square()");
    let shape = eval(ctx, "Shape");
    let array = eval(ctx, "Array");
    assert!(ctx.is_instance_of(&square, &shape).unwrap());
    assert!(!ctx.is_instance_of(&square, &array).unwrap());

    let not_callable = ctx.new_object().unwrap();
    let error = ctx.is_instance_of(&square, &not_callable).unwrap_err();
    assert_eq!(error.as_exception().unwrap().name, "TypeError");
}

#[test]
fn symbols_report_registry_key_or_description() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let registered = eval(ctx, "Symbol.for('app.key')");
    assert!(ctx.is_global_symbol(&registered).unwrap());
    assert_eq!(ctx.symbol_description_or_key(&registered).unwrap(), "app.key");

    let local = ctx.new_symbol("local", false).unwrap();
    assert!(!ctx.is_global_symbol(&local).unwrap());
    assert_eq!(ctx.symbol_description_or_key(&local).unwrap(), "local");
    let anonymous = eval(ctx, "Symbol()");
    assert_eq!(ctx.symbol_description_or_key(&anonymous).unwrap(), "");

    let text = ctx.new_string("app.key").unwrap();
    assert!(!ctx.is_global_symbol(&text).unwrap());
    let error = ctx.symbol_description_or_key(&text).unwrap_err();
    assert_eq!(error.as_exception().unwrap().name, "TypeError");
}

#[test]
fn proxy_lookup_runs_has_trap_only_for_undefined() {
    let runtime = create_test_runtime(RecordingHost::new());
    let context = create_test_context(&runtime);
    let ctx = context.ctx();

    let proxy = eval(
        ctx,
        "globalThis.traps = [];
         new Proxy({ a: 1, u: undefined }, {
             get(target, key) { traps.push('get:' + key); return target[key]; },
             has(target, key) { traps.push('has:' + key); return key in target; },
         })",
    );
    let a = ctx.get_prop_str(&proxy, "a").unwrap().unwrap();
    assert_eq!(ctx.get_float64(&a).unwrap(), 1.0);
    assert_eq!(eval_string(ctx, "traps.join()"), "get:a");

    assert!(ctx.get_prop_str(&proxy, "missing").unwrap().is_none());
    let present = ctx.get_prop_str(&proxy, "u").unwrap().unwrap();
    assert_eq!(ctx.type_of(&present), "undefined");
    assert_eq!(eval_string(ctx, "traps.join()"), "get:a,get:missing,has:missing,get:u,has:u");
}
