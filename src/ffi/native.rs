//! Native functions and classes backed by host callbacks.

use std::ffi::{c_char, c_int, c_void};
use std::ptr;

use crate::class::ClassId;

use super::{HakoContext, HakoHandle, HakoRuntime, borrowed, str_arg};

/// Reserve a class id for `hako_new_class()`
#[unsafe(no_mangle)]
pub extern "C" fn hako_allocate_class_id(ctx: *mut HakoContext) -> u32 {
    unsafe { ctx.as_ref() }.map_or(0, |hako| hako.ctx().allocate_class_id().raw())
}

/// Whether `class_id` has been registered on `rt`
#[unsafe(no_mangle)]
pub extern "C" fn hako_is_registered_class(rt: *mut HakoRuntime, class_id: u32) -> bool {
    unsafe { rt.as_ref() }.is_some_and(|rt| unsafe {
        rquickjs::qjs::JS_IsRegisteredClass(rt.runtime.as_ptr(), class_id)
    })
}

/// Function whose calls reach the `call_function` callback with `function_id`
#[unsafe(no_mangle)]
pub extern "C" fn hako_new_function(
    ctx: *mut HakoContext,
    function_id: c_int,
    name: *const c_char,
) -> HakoHandle {
    let Some(hako) = (unsafe { ctx.as_ref() }) else {
        return ptr::null_mut();
    };
    hako.handle_result(hako.ctx().new_function(function_id, str_arg(name).unwrap_or("")))
}

/// Register a class and return its constructor. `new` reaches the
/// `construct` callback; with `has_finalizer`, collected instances reach
/// `finalize`. Registering an id twice yields an exception handle.
#[unsafe(no_mangle)]
pub extern "C" fn hako_new_class(
    ctx: *mut HakoContext,
    class_id: u32,
    name: *const c_char,
    has_finalizer: bool,
) -> HakoHandle {
    let Some(hako) = (unsafe { ctx.as_ref() }) else {
        return ptr::null_mut();
    };
    let name = str_arg(name).unwrap_or("");
    hako.handle_result(hako.ctx().new_class(ClassId::from_raw(class_id), name, has_finalizer))
}

/// Instance of `class_id` for use inside the `construct` callback.
/// `new_target` may be NULL.
#[unsafe(no_mangle)]
pub extern "C" fn hako_new_object_class(
    ctx: *mut HakoContext,
    class_id: u32,
    new_target: HakoHandle,
) -> HakoHandle {
    let Some(hako) = (unsafe { ctx.as_ref() }) else {
        return ptr::null_mut();
    };
    let ctx = hako.ctx();
    let new_target = borrowed(ctx, new_target);
    hako.handle_result(ctx.new_object_class(ClassId::from_raw(class_id), new_target.as_deref()))
}

/// Attach `opaque` to an instance of `class_id`. 0 on success, -1 with a
/// `TypeError` pending otherwise.
#[unsafe(no_mangle)]
pub extern "C" fn hako_set_opaque(
    ctx: *mut HakoContext,
    object: HakoHandle,
    class_id: u32,
    opaque: *mut c_void,
) -> c_int {
    let Some(hako) = (unsafe { ctx.as_ref() }) else {
        return -1;
    };
    let ctx = hako.ctx();
    let Some(object) = borrowed(ctx, object) else {
        return -1;
    };
    hako.status_result(ctx.set_opaque(&object, ClassId::from_raw(class_id), opaque))
}

/// Pointer attached with `hako_set_opaque()`, or NULL
#[unsafe(no_mangle)]
pub extern "C" fn hako_get_opaque(
    ctx: *mut HakoContext,
    object: HakoHandle,
    class_id: u32,
) -> *mut c_void {
    let Some(hako) = (unsafe { ctx.as_ref() }) else {
        return ptr::null_mut();
    };
    let ctx = hako.ctx();
    borrowed(ctx, object)
        .and_then(|object| ctx.get_opaque(&object, ClassId::from_raw(class_id)))
        .map_or(ptr::null_mut(), |opaque| opaque.as_ptr())
}

/// Class id of an object, 0 for primitives
#[unsafe(no_mangle)]
pub extern "C" fn hako_get_class_id(ctx: *mut HakoContext, object: HakoHandle) -> u32 {
    let Some(hako) = (unsafe { ctx.as_ref() }) else {
        return 0;
    };
    let ctx = hako.ctx();
    borrowed(ctx, object)
        .and_then(|object| ctx.class_id_of(&object))
        .map_or(0, ClassId::raw)
}
