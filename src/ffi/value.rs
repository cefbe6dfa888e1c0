//! Handles, value construction and inspection.

use std::ffi::{c_char, c_int};
use std::ptr;

use crate::handle::{self, Constant};
use crate::error::Result;
use crate::value::{Equality, PromiseState, PropertyFlags};

use super::{HakoContext, HakoHandle, HakoRuntime, borrowed, into_c_string, str_arg};

fn context<'a>(ctx: *mut HakoContext) -> Option<&'a HakoContext> {
    unsafe { ctx.as_ref() }
}

// ============================================================================
// Handles
// ============================================================================

/// Static `undefined` handle. Never free it.
#[unsafe(no_mangle)]
pub extern "C" fn hako_get_undefined() -> HakoHandle {
    Constant::Undefined.handle()
}

/// Static `null` handle. Never free it.
#[unsafe(no_mangle)]
pub extern "C" fn hako_get_null() -> HakoHandle {
    Constant::Null.handle()
}

/// Static `false` handle. Never free it.
#[unsafe(no_mangle)]
pub extern "C" fn hako_get_false() -> HakoHandle {
    Constant::False.handle()
}

/// Static `true` handle. Never free it.
#[unsafe(no_mangle)]
pub extern "C" fn hako_get_true() -> HakoHandle {
    Constant::True.handle()
}

/// Second, independently freed handle to the same value. NULL on allocation failure.
#[unsafe(no_mangle)]
pub extern "C" fn hako_dup_value(ctx: *mut HakoContext, value: HakoHandle) -> HakoHandle {
    let Some(hako) = context(ctx) else {
        return ptr::null_mut();
    };
    if value.is_null() {
        return ptr::null_mut();
    }
    unsafe { handle::duplicate(hako.context.as_ptr(), value) }
}

/// Release a handle. Passing one of the four static handles aborts the process.
#[unsafe(no_mangle)]
pub extern "C" fn hako_free_value(ctx: *mut HakoContext, value: HakoHandle) {
    if let Some(hako) = context(ctx) {
        unsafe { handle::release(hako.context.as_ptr(), value) };
    }
}

/// [`hako_free_value`] for callers holding only the runtime
#[unsafe(no_mangle)]
pub extern "C" fn hako_free_value_rt(rt: *mut HakoRuntime, value: HakoHandle) {
    if let Some(rt) = unsafe { rt.as_ref() } {
        unsafe { handle::release_rt(rt.runtime.as_ptr(), value) };
    }
}

/// Whether `value` is the exception marker
#[unsafe(no_mangle)]
pub extern "C" fn hako_is_exception(value: HakoHandle) -> bool {
    !value.is_null() && unsafe { rquickjs::qjs::JS_IsException(handle::unbox(value)) }
}

// ============================================================================
// Construction
// ============================================================================

#[unsafe(no_mangle)]
pub extern "C" fn hako_new_object(ctx: *mut HakoContext) -> HakoHandle {
    context(ctx).map_or(ptr::null_mut(), |hako| hako.handle_result(hako.ctx().new_object()))
}

#[unsafe(no_mangle)]
pub extern "C" fn hako_new_object_proto(ctx: *mut HakoContext, proto: HakoHandle) -> HakoHandle {
    let Some(hako) = context(ctx) else {
        return ptr::null_mut();
    };
    let ctx = hako.ctx();
    let Some(proto) = borrowed(ctx, proto) else {
        return ptr::null_mut();
    };
    hako.handle_result(ctx.new_object_proto(&proto))
}

#[unsafe(no_mangle)]
pub extern "C" fn hako_new_array(ctx: *mut HakoContext) -> HakoHandle {
    context(ctx).map_or(ptr::null_mut(), |hako| hako.handle_result(hako.ctx().new_array()))
}

#[unsafe(no_mangle)]
pub extern "C" fn hako_new_float64(ctx: *mut HakoContext, number: f64) -> HakoHandle {
    context(ctx).map_or(ptr::null_mut(), |hako| hako.handle_result(hako.ctx().new_float64(number)))
}

/// New string from `len` bytes of UTF-8
#[unsafe(no_mangle)]
pub extern "C" fn hako_new_string(
    ctx: *mut HakoContext,
    text: *const c_char,
    len: usize,
) -> HakoHandle {
    let Some(hako) = context(ctx) else {
        return ptr::null_mut();
    };
    let bytes = if text.is_null() {
        &[][..]
    } else {
        unsafe { std::slice::from_raw_parts(text.cast::<u8>(), len) }
    };
    let Ok(text) = std::str::from_utf8(bytes) else {
        hako.set_error(&crate::BridgeError::InvalidUtf8);
        return ptr::null_mut();
    };
    hako.handle_result(hako.ctx().new_string(text))
}

#[unsafe(no_mangle)]
pub extern "C" fn hako_new_symbol(
    ctx: *mut HakoContext,
    description: *const c_char,
    global: bool,
) -> HakoHandle {
    let Some(hako) = context(ctx) else {
        return ptr::null_mut();
    };
    hako.handle_result(hako.ctx().new_symbol(str_arg(description).unwrap_or(""), global))
}

#[unsafe(no_mangle)]
pub extern "C" fn hako_new_error(ctx: *mut HakoContext) -> HakoHandle {
    context(ctx).map_or(ptr::null_mut(), |hako| hako.handle_result(hako.ctx().new_error()))
}

/// New `ArrayBuffer` holding a copy of `len` bytes
#[unsafe(no_mangle)]
pub extern "C" fn hako_new_array_buffer(
    ctx: *mut HakoContext,
    bytes: *const u8,
    len: usize,
) -> HakoHandle {
    let Some(hako) = context(ctx) else {
        return ptr::null_mut();
    };
    let bytes = if bytes.is_null() {
        &[][..]
    } else {
        unsafe { std::slice::from_raw_parts(bytes, len) }
    };
    hako.handle_result(hako.ctx().new_array_buffer(bytes))
}

/// BigInt from the two 32-bit halves of a signed 64-bit integer
#[unsafe(no_mangle)]
pub extern "C" fn hako_new_bigint(ctx: *mut HakoContext, low: i32, high: i32) -> HakoHandle {
    let value = (i64::from(high) << 32) | i64::from(low as u32);
    context(ctx).map_or(ptr::null_mut(), |hako| hako.handle_result(hako.ctx().new_bigint(value)))
}

/// BigInt from the two 32-bit halves of an unsigned 64-bit integer
#[unsafe(no_mangle)]
pub extern "C" fn hako_new_biguint(ctx: *mut HakoContext, low: u32, high: u32) -> HakoHandle {
    let value = (u64::from(high) << 32) | u64::from(low);
    context(ctx).map_or(ptr::null_mut(), |hako| hako.handle_result(hako.ctx().new_biguint(value)))
}

#[unsafe(no_mangle)]
pub extern "C" fn hako_new_date(ctx: *mut HakoContext, epoch_ms: f64) -> HakoHandle {
    context(ctx).map_or(ptr::null_mut(), |hako| hako.handle_result(hako.ctx().new_date(epoch_ms)))
}

#[unsafe(no_mangle)]
pub extern "C" fn hako_get_global_object(ctx: *mut HakoContext) -> HakoHandle {
    context(ctx).map_or(ptr::null_mut(), |hako| hako.handle_result(hako.ctx().global_object()))
}

/// New pending promise. The resolving functions are stored in
/// `out_resolve` and `out_reject`, each a handle the caller frees.
#[unsafe(no_mangle)]
pub extern "C" fn hako_new_promise_capability(
    ctx: *mut HakoContext,
    out_resolve: *mut HakoHandle,
    out_reject: *mut HakoHandle,
) -> HakoHandle {
    let Some(hako) = context(ctx) else {
        return ptr::null_mut();
    };
    match hako.ctx().new_promise_capability() {
        Ok((promise, resolve, reject)) => {
            match unsafe { out_resolve.as_mut() } {
                Some(out) => *out = resolve.into_raw(),
                None => drop(resolve),
            }
            match unsafe { out_reject.as_mut() } {
                Some(out) => *out = reject.into_raw(),
                None => drop(reject),
            }
            promise.into_raw()
        }
        Err(error) => hako.handle_result(Err(error)),
    }
}

/// Parse `len` bytes of JSON. A syntax error yields an exception handle.
#[unsafe(no_mangle)]
pub extern "C" fn hako_parse_json(
    ctx: *mut HakoContext,
    json: *const c_char,
    len: usize,
    filename: *const c_char,
) -> HakoHandle {
    let Some(hako) = context(ctx) else {
        return ptr::null_mut();
    };
    let bytes = if json.is_null() {
        &[][..]
    } else {
        unsafe { std::slice::from_raw_parts(json.cast::<u8>(), len) }
    };
    let Ok(json) = std::str::from_utf8(bytes) else {
        hako.set_error(&crate::BridgeError::InvalidUtf8);
        return ptr::null_mut();
    };
    hako.handle_result(hako.ctx().parse_json(json, str_arg(filename).unwrap_or("<json>")))
}

// ============================================================================
// Inspection
// ============================================================================

/// Numeric value, or NaN when conversion throws
#[unsafe(no_mangle)]
pub extern "C" fn hako_get_float64(ctx: *mut HakoContext, value: HakoHandle) -> f64 {
    let Some(hako) = context(ctx) else {
        return f64::NAN;
    };
    let ctx = hako.ctx();
    borrowed(ctx, value)
        .and_then(|value| ctx.get_float64(&value).ok())
        .unwrap_or(f64::NAN)
}

/// `String(value)`. Free with `hako_free_string()`. NULL when conversion throws.
#[unsafe(no_mangle)]
pub extern "C" fn hako_to_cstring(ctx: *mut HakoContext, value: HakoHandle) -> *mut c_char {
    let Some(hako) = context(ctx) else {
        return ptr::null_mut();
    };
    let ctx = hako.ctx();
    let Some(value) = borrowed(ctx, value) else {
        return ptr::null_mut();
    };
    match ctx.to_string(&value) {
        Ok(text) => into_c_string(text),
        Err(error) => {
            hako.set_error(&error);
            ptr::null_mut()
        }
    }
}

/// `typeof value`. Free with `hako_free_string()`.
#[unsafe(no_mangle)]
pub extern "C" fn hako_typeof(ctx: *mut HakoContext, value: HakoHandle) -> *mut c_char {
    let Some(hako) = context(ctx) else {
        return ptr::null_mut();
    };
    let ctx = hako.ctx();
    borrowed(ctx, value).map_or(ptr::null_mut(), |value| {
        into_c_string(ctx.type_of(&value).to_string())
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn hako_is_error(ctx: *mut HakoContext, value: HakoHandle) -> bool {
    context(ctx).is_some_and(|hako| {
        let ctx = hako.ctx();
        borrowed(ctx, value).is_some_and(|value| ctx.is_error(&value))
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn hako_is_array(ctx: *mut HakoContext, value: HakoHandle) -> bool {
    context(ctx).is_some_and(|hako| {
        let ctx = hako.ctx();
        borrowed(ctx, value).is_some_and(|value| ctx.is_array(&value))
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn hako_is_promise(ctx: *mut HakoContext, value: HakoHandle) -> bool {
    context(ctx).is_some_and(|hako| {
        let ctx = hako.ctx();
        borrowed(ctx, value).is_some_and(|value| ctx.is_promise(&value))
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn hako_is_date(ctx: *mut HakoContext, value: HakoHandle) -> bool {
    context(ctx).is_some_and(|hako| {
        let ctx = hako.ctx();
        borrowed(ctx, value).is_some_and(|value| ctx.is_date(&value))
    })
}

/// `value instanceof constructor`: 1, 0, or -1 with an exception pending
#[unsafe(no_mangle)]
pub extern "C" fn hako_is_instance_of(
    ctx: *mut HakoContext,
    value: HakoHandle,
    constructor: HakoHandle,
) -> c_int {
    let Some(hako) = context(ctx) else {
        return -1;
    };
    let ctx = hako.ctx();
    let (Some(value), Some(constructor)) = (borrowed(ctx, value), borrowed(ctx, constructor)) else {
        return -1;
    };
    match ctx.is_instance_of(&value, &constructor) {
        Ok(found) => c_int::from(found),
        Err(error) => hako.status_result(Err(error)),
    }
}

/// 1 for a `Symbol.for` symbol, 0 for anything else, -1 on error
#[unsafe(no_mangle)]
pub extern "C" fn hako_is_global_symbol(ctx: *mut HakoContext, value: HakoHandle) -> c_int {
    let Some(hako) = context(ctx) else {
        return -1;
    };
    let ctx = hako.ctx();
    let Some(value) = borrowed(ctx, value) else {
        return -1;
    };
    match ctx.is_global_symbol(&value) {
        Ok(global) => c_int::from(global),
        Err(error) => hako.status_result(Err(error)),
    }
}

/// Registry key of a global symbol, else its description. Free with
/// `hako_free_string()`. NULL with a `TypeError` pending for non-symbols.
#[unsafe(no_mangle)]
pub extern "C" fn hako_get_symbol_description_or_key(
    ctx: *mut HakoContext,
    value: HakoHandle,
) -> *mut c_char {
    let Some(hako) = context(ctx) else {
        return ptr::null_mut();
    };
    let ctx = hako.ctx();
    let Some(value) = borrowed(ctx, value) else {
        return ptr::null_mut();
    };
    match ctx.symbol_description_or_key(&value) {
        Ok(text) => into_c_string(text),
        Err(error) => {
            hako.status_result(Err(error));
            ptr::null_mut()
        }
    }
}

/// -1 not a promise, 0 pending, 1 fulfilled, 2 rejected
#[unsafe(no_mangle)]
pub extern "C" fn hako_promise_state(ctx: *mut HakoContext, value: HakoHandle) -> c_int {
    let state = context(ctx).and_then(|hako| {
        let ctx = hako.ctx();
        borrowed(ctx, value).map(|value| ctx.promise_state(&value))
    });
    match state {
        Some(PromiseState::Pending) => 0,
        Some(PromiseState::Fulfilled) => 1,
        Some(PromiseState::Rejected) => 2,
        Some(PromiseState::NotAPromise) | None => -1,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn hako_promise_result(ctx: *mut HakoContext, value: HakoHandle) -> HakoHandle {
    let Some(hako) = context(ctx) else {
        return ptr::null_mut();
    };
    let ctx = hako.ctx();
    borrowed(ctx, value).map_or(ptr::null_mut(), |value| {
        hako.handle_result(ctx.promise_result(&value))
    })
}

/// `value.length`, or -1 with an exception pending
#[unsafe(no_mangle)]
pub extern "C" fn hako_get_length(ctx: *mut HakoContext, value: HakoHandle) -> i64 {
    let Some(hako) = context(ctx) else {
        return -1;
    };
    let ctx = hako.ctx();
    let Some(value) = borrowed(ctx, value) else {
        return -1;
    };
    match ctx.get_length(&value) {
        Ok(length) => length,
        Err(error) => i64::from(hako.status_result(Err(error))),
    }
}

/// `op`: 0 strict, 1 same-value, 2 same-value-zero, 3 loose.
/// Returns 1 if equal, 0 if not, -1 on error.
#[unsafe(no_mangle)]
pub extern "C" fn hako_is_equal(
    ctx: *mut HakoContext,
    a: HakoHandle,
    b: HakoHandle,
    op: c_int,
) -> c_int {
    let Some(hako) = context(ctx) else {
        return -1;
    };
    let ctx = hako.ctx();
    let (Some(a), Some(b)) = (borrowed(ctx, a), borrowed(ctx, b)) else {
        return -1;
    };
    let op = match op {
        0 => Equality::Strict,
        1 => Equality::SameValue,
        2 => Equality::SameValueZero,
        3 => Equality::Loose,
        _ => return -1,
    };
    match ctx.is_equal(&a, &b, op) {
        Ok(equal) => c_int::from(equal),
        Err(error) => hako.status_result(Err(error)),
    }
}

/// `JSON.stringify(value, null, indent)`. Free with `hako_free_string()`.
/// NULL when the value has no JSON form or stringifying throws.
#[unsafe(no_mangle)]
pub extern "C" fn hako_to_json(
    ctx: *mut HakoContext,
    value: HakoHandle,
    indent: u32,
) -> *mut c_char {
    let Some(hako) = context(ctx) else {
        return ptr::null_mut();
    };
    let ctx = hako.ctx();
    let Some(value) = borrowed(ctx, value) else {
        return ptr::null_mut();
    };
    match ctx.to_json(&value, indent) {
        Ok(Some(json)) => into_c_string(json),
        Ok(None) => ptr::null_mut(),
        Err(error) => {
            hako.status_result(Err(error));
            ptr::null_mut()
        }
    }
}

/// Error summary (`name`, `message`, `stack`, `cause`) or JSON of a plain
/// value. Free with `hako_free_string()`.
#[unsafe(no_mangle)]
pub extern "C" fn hako_dump(ctx: *mut HakoContext, value: HakoHandle) -> *mut c_char {
    let Some(hako) = context(ctx) else {
        return ptr::null_mut();
    };
    let ctx = hako.ctx();
    let Some(value) = borrowed(ctx, value) else {
        return ptr::null_mut();
    };
    match ctx.dump(&value) {
        Ok(dump) => into_c_string(dump),
        Err(error) => {
            hako.set_error(&error);
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Properties and Calls
// ============================================================================

/// `object[key]`. NULL when the property does not exist; an exception handle
/// when the lookup throws.
#[unsafe(no_mangle)]
pub extern "C" fn hako_get_prop(
    ctx: *mut HakoContext,
    object: HakoHandle,
    key: HakoHandle,
) -> HakoHandle {
    let Some(hako) = context(ctx) else {
        return ptr::null_mut();
    };
    let ctx = hako.ctx();
    let (Some(object), Some(key)) = (borrowed(ctx, object), borrowed(ctx, key)) else {
        return ptr::null_mut();
    };
    match ctx.get_prop(&object, &key) {
        Ok(Some(value)) => value.into_raw(),
        Ok(None) => ptr::null_mut(),
        Err(error) => hako.handle_result(Err(error)),
    }
}

/// `object[key] = value`. Returns 0, or -1 with an exception pending.
#[unsafe(no_mangle)]
pub extern "C" fn hako_set_prop(
    ctx: *mut HakoContext,
    object: HakoHandle,
    key: HakoHandle,
    value: HakoHandle,
) -> c_int {
    let Some(hako) = context(ctx) else {
        return -1;
    };
    let ctx = hako.ctx();
    let (Some(object), Some(key), Some(value)) =
        (borrowed(ctx, object), borrowed(ctx, key), borrowed(ctx, value))
    else {
        return -1;
    };
    hako.status_result(ctx.set_prop(&object, &key, &value))
}

/// Define a data property. `flags` uses the engine's `JS_PROP_*` bits
/// (configurable 1, writable 2, enumerable 4).
#[unsafe(no_mangle)]
pub extern "C" fn hako_define_prop(
    ctx: *mut HakoContext,
    object: HakoHandle,
    key: HakoHandle,
    value: HakoHandle,
    flags: c_int,
) -> c_int {
    let Some(hako) = context(ctx) else {
        return -1;
    };
    let ctx = hako.ctx();
    let (Some(object), Some(key), Some(value)) =
        (borrowed(ctx, object), borrowed(ctx, key), borrowed(ctx, value))
    else {
        return -1;
    };
    let flags = PropertyFlags {
        configurable: flags & 1 != 0,
        writable: flags & 2 != 0,
        enumerable: flags & 4 != 0,
    };
    hako.status_result(ctx.define_prop(&object, &key, &value, flags))
}

/// Own string keys as a JSON array. Free with `hako_free_string()`.
#[unsafe(no_mangle)]
pub extern "C" fn hako_get_own_property_names(
    ctx: *mut HakoContext,
    object: HakoHandle,
    enumerable_only: bool,
) -> *mut c_char {
    let Some(hako) = context(ctx) else {
        return ptr::null_mut();
    };
    let ctx = hako.ctx();
    let Some(object) = borrowed(ctx, object) else {
        return ptr::null_mut();
    };
    let names = ctx
        .get_own_property_names(&object, enumerable_only)
        .and_then(|names| Ok(serde_json::to_string(&names)?));
    match names {
        Ok(json) => into_c_string(json),
        Err(error) => {
            hako.status_result(Err(error));
            ptr::null_mut()
        }
    }
}

/// `func.apply(this, argv)`. A throw yields an exception handle.
#[unsafe(no_mangle)]
pub extern "C" fn hako_call(
    ctx: *mut HakoContext,
    func: HakoHandle,
    this: HakoHandle,
    argc: c_int,
    argv: *const HakoHandle,
) -> HakoHandle {
    let Some(hako) = context(ctx) else {
        return ptr::null_mut();
    };
    let ctx = hako.ctx();
    let (Some(func), Some(this)) = (borrowed(ctx, func), borrowed(ctx, this)) else {
        return ptr::null_mut();
    };
    let raw_args = if argv.is_null() || argc <= 0 {
        &[][..]
    } else {
        unsafe { std::slice::from_raw_parts(argv, argc as usize) }
    };
    let args = raw_args.iter().map(|arg| borrowed(ctx, *arg));
    let Some(args) = args.collect::<Option<Vec<_>>>() else {
        return ptr::null_mut();
    };
    let args: Vec<_> = args.iter().map(|arg| &**arg).collect();
    hako.handle_result(ctx.call(&func, &this, &args))
}

/// Throw `error` and return the exception marker
#[unsafe(no_mangle)]
pub extern "C" fn hako_throw(ctx: *mut HakoContext, error: HakoHandle) -> HakoHandle {
    let Some(hako) = context(ctx) else {
        return ptr::null_mut();
    };
    let ctx = hako.ctx();
    let Some(error) = borrowed(ctx, error) else {
        return ptr::null_mut();
    };
    hako.handle_result(ctx.throw(&error))
}

/// Take the pending exception. With a non-NULL `maybe_exception`, only when
/// that handle is the exception marker. NULL when there is nothing to take.
#[unsafe(no_mangle)]
pub extern "C" fn hako_get_last_error(
    ctx: *mut HakoContext,
    maybe_exception: HakoHandle,
) -> HakoHandle {
    let Some(hako) = context(ctx) else {
        return ptr::null_mut();
    };
    let ctx = hako.ctx();
    let marker = borrowed(ctx, maybe_exception);
    match ctx.get_last_error(marker.as_deref()) {
        Ok(Some(error)) => error.into_raw(),
        Ok(None) => ptr::null_mut(),
        Err(error) => {
            hako.set_error(&error);
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Binary Data
// ============================================================================

#[unsafe(no_mangle)]
pub extern "C" fn hako_is_array_buffer(ctx: *mut HakoContext, value: HakoHandle) -> bool {
    context(ctx).is_some_and(|hako| {
        let ctx = hako.ctx();
        borrowed(ctx, value).is_some_and(|value| ctx.is_array_buffer(&value))
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn hako_is_typed_array(ctx: *mut HakoContext, value: HakoHandle) -> bool {
    context(ctx).is_some_and(|hako| {
        let ctx = hako.ctx();
        borrowed(ctx, value).is_some_and(|value| ctx.is_typed_array(&value))
    })
}

/// Element type code (see [`crate::TypedArrayType::code`]); 0 when `value` is
/// not a typed array
#[unsafe(no_mangle)]
pub extern "C" fn hako_get_typed_array_type(ctx: *mut HakoContext, value: HakoHandle) -> c_int {
    let kind = context(ctx).and_then(|hako| {
        let ctx = hako.ctx();
        borrowed(ctx, value).and_then(|value| ctx.typed_array_type(&value))
    });
    kind.map_or(0, |kind| kind.code())
}

/// Copy of an `ArrayBuffer`'s bytes. Free with `hako_free_buffer()`. NULL
/// with a `TypeError` pending for anything else.
#[unsafe(no_mangle)]
pub extern "C" fn hako_copy_array_buffer(
    ctx: *mut HakoContext,
    value: HakoHandle,
    out_len: *mut usize,
) -> *mut u8 {
    let Some(hako) = context(ctx) else {
        return ptr::null_mut();
    };
    let ctx = hako.ctx();
    let Some(value) = borrowed(ctx, value) else {
        return ptr::null_mut();
    };
    buffer_result(hako, ctx.copy_array_buffer(&value), out_len)
}

/// Copy of the bytes a `Uint8Array` views. Free with `hako_free_buffer()`.
/// NULL with a `TypeError` pending for any other value.
#[unsafe(no_mangle)]
pub extern "C" fn hako_copy_typed_array_buffer(
    ctx: *mut HakoContext,
    value: HakoHandle,
    out_len: *mut usize,
) -> *mut u8 {
    let Some(hako) = context(ctx) else {
        return ptr::null_mut();
    };
    let ctx = hako.ctx();
    let Some(value) = borrowed(ctx, value) else {
        return ptr::null_mut();
    };
    buffer_result(hako, ctx.copy_typed_array_buffer(&value), out_len)
}

/// Serialize `value` into a new `ArrayBuffer` in the engine's binary format
#[unsafe(no_mangle)]
pub extern "C" fn hako_bjson_encode(ctx: *mut HakoContext, value: HakoHandle) -> HakoHandle {
    let Some(hako) = context(ctx) else {
        return ptr::null_mut();
    };
    let ctx = hako.ctx();
    borrowed(ctx, value).map_or(ptr::null_mut(), |value| {
        hako.handle_result(ctx.bjson_encode(&value))
    })
}

/// Read back a value from an `ArrayBuffer` written by `hako_bjson_encode()`
#[unsafe(no_mangle)]
pub extern "C" fn hako_bjson_decode(ctx: *mut HakoContext, buffer: HakoHandle) -> HakoHandle {
    let Some(hako) = context(ctx) else {
        return ptr::null_mut();
    };
    let ctx = hako.ctx();
    borrowed(ctx, buffer).map_or(ptr::null_mut(), |buffer| {
        hako.handle_result(ctx.bjson_decode(&buffer))
    })
}

/// Boxed byte buffer for the host, or NULL with the error reported
fn buffer_result(hako: &HakoContext, bytes: Result<Vec<u8>>, out_len: *mut usize) -> *mut u8 {
    match bytes {
        Ok(bytes) => {
            let bytes = bytes.into_boxed_slice();
            if let Some(out_len) = unsafe { out_len.as_mut() } {
                *out_len = bytes.len();
            }
            Box::into_raw(bytes).cast::<u8>()
        }
        Err(error) => {
            hako.status_result(Err(error));
            ptr::null_mut()
        }
    }
}
