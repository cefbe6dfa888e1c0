//! Runtime and context lifecycle, evaluation, bytecode and the job queue.

use std::cell::RefCell;
use std::ffi::{c_char, c_int};
use std::ptr;
use std::rc::Rc;

use rquickjs::qjs;

use crate::config::{ContextOptions, LoaderOptions, RuntimeOptions};
use crate::eval::EvalFlags;
use crate::runtime::{Ctx, JobsOutcome, Runtime};

use super::{
    CallbackHost, HakoContext, HakoHandle, HakoHostCallbacks, HakoRuntime, into_c_string, str_arg,
};

// ============================================================================
// Runtime
// ============================================================================

/// Create a runtime.
///
/// `callbacks` may be NULL for a host without callbacks. `options_json` is
/// an optional JSON object (`memory_limit`, `gc_threshold`, `max_stack_size`).
/// Returns NULL on failure.
#[unsafe(no_mangle)]
pub extern "C" fn hako_runtime_new(
    callbacks: *const HakoHostCallbacks,
    options_json: *const c_char,
) -> *mut HakoRuntime {
    let callbacks = unsafe { callbacks.as_ref() }.copied().unwrap_or_default();
    let options = match str_arg(options_json) {
        Some(json) => match RuntimeOptions::from_json(json) {
            Ok(options) => options,
            Err(error) => {
                tracing::warn!(%error, "invalid runtime options");
                return ptr::null_mut();
            }
        },
        None => RuntimeOptions::default(),
    };
    match Runtime::new(Rc::new(CallbackHost::new(callbacks)), &options) {
        Ok(runtime) => Box::into_raw(Box::new(HakoRuntime { runtime })),
        Err(error) => {
            tracing::warn!(%error, "runtime creation failed");
            ptr::null_mut()
        }
    }
}

/// Free a runtime. All of its contexts must have been freed.
#[unsafe(no_mangle)]
pub extern "C" fn hako_runtime_free(rt: *mut HakoRuntime) {
    if !rt.is_null() {
        drop(unsafe { Box::from_raw(rt) });
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn hako_runtime_set_memory_limit(rt: *mut HakoRuntime, limit: usize) {
    if let Some(rt) = unsafe { rt.as_ref() } {
        rt.runtime.set_memory_limit(limit);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn hako_runtime_set_gc_threshold(rt: *mut HakoRuntime, threshold: usize) {
    if let Some(rt) = unsafe { rt.as_ref() } {
        rt.runtime.set_gc_threshold(threshold);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn hako_runtime_set_max_stack_size(rt: *mut HakoRuntime, size: usize) {
    if let Some(rt) = unsafe { rt.as_ref() } {
        rt.runtime.set_max_stack_size(size);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn hako_runtime_run_gc(rt: *mut HakoRuntime) {
    if let Some(rt) = unsafe { rt.as_ref() } {
        rt.runtime.run_gc();
    }
}

/// Memory counters as JSON. Free with `hako_free_string()`.
#[unsafe(no_mangle)]
pub extern "C" fn hako_runtime_memory_usage(rt: *mut HakoRuntime) -> *mut c_char {
    let Some(rt) = (unsafe { rt.as_ref() }) else {
        return ptr::null_mut();
    };
    rt.runtime
        .memory_usage()
        .to_json()
        .map_or(ptr::null_mut(), into_c_string)
}

#[unsafe(no_mangle)]
pub extern "C" fn hako_runtime_enable_interrupt_handler(rt: *mut HakoRuntime) {
    if let Some(rt) = unsafe { rt.as_ref() } {
        rt.runtime.enable_interrupt_handler();
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn hako_runtime_disable_interrupt_handler(rt: *mut HakoRuntime) {
    if let Some(rt) = unsafe { rt.as_ref() } {
        rt.runtime.disable_interrupt_handler();
    }
}

/// Route module loading through the `load_module` callback.
///
/// With `custom_normalize` the `normalize_module` callback replaces the
/// engine's normalizer; with `use_resolver` the `resolve_module` callback is
/// consulted first and NULL from it means "not found".
#[unsafe(no_mangle)]
pub extern "C" fn hako_runtime_enable_module_loader(
    rt: *mut HakoRuntime,
    custom_normalize: bool,
    use_resolver: bool,
) {
    if let Some(rt) = unsafe { rt.as_ref() } {
        rt.runtime.enable_module_loader(LoaderOptions {
            custom_normalize,
            use_resolver,
        });
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn hako_runtime_disable_module_loader(rt: *mut HakoRuntime) {
    if let Some(rt) = unsafe { rt.as_ref() } {
        rt.runtime.disable_module_loader();
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn hako_runtime_is_job_pending(rt: *mut HakoRuntime) -> bool {
    unsafe { rt.as_ref() }.is_some_and(|rt| rt.runtime.is_job_pending())
}

/// Run up to `max_jobs` queued jobs (all of them when negative).
///
/// Returns a number handle with the count of jobs run, or an exception handle
/// when a job threw. The exception is moved onto `ctx` if it was raised in
/// another context of the same runtime.
#[unsafe(no_mangle)]
pub extern "C" fn hako_execute_pending_jobs(ctx: *mut HakoContext, max_jobs: c_int) -> HakoHandle {
    let Some(hako) = (unsafe { ctx.as_ref() }) else {
        return ptr::null_mut();
    };
    let ctx = hako.ctx();
    let max = usize::try_from(max_jobs).ok();
    match hako.context.runtime().drain_jobs(max) {
        JobsOutcome::Completed(executed) => hako.handle_result(ctx.new_float64(executed as f64)),
        JobsOutcome::Failed(failed) => {
            if !failed.is_null() && failed != ctx.as_ptr() {
                unsafe {
                    let exception = qjs::JS_GetException(failed);
                    qjs::JS_Throw(ctx.as_ptr(), exception);
                }
            }
            hako.handle_result(ctx.exception_handle())
        }
    }
}

// ============================================================================
// Context
// ============================================================================

/// Create a context on `rt`.
///
/// `options_json` optionally selects intrinsics and a stack limit, e.g.
/// `{"intrinsics": {"eval": false}}`. Returns NULL on failure.
#[unsafe(no_mangle)]
pub extern "C" fn hako_context_new(
    rt: *mut HakoRuntime,
    options_json: *const c_char,
) -> *mut HakoContext {
    let Some(rt) = (unsafe { rt.as_ref() }) else {
        return ptr::null_mut();
    };
    let options = match str_arg(options_json) {
        Some(json) => match ContextOptions::from_json(json) {
            Ok(options) => options,
            Err(error) => {
                tracing::warn!(%error, "invalid context options");
                return ptr::null_mut();
            }
        },
        None => ContextOptions::default(),
    };
    let context = match rt.runtime.context(&options) {
        Ok(context) => context,
        Err(error) => {
            tracing::warn!(%error, "context creation failed");
            return ptr::null_mut();
        }
    };
    let raw = context.as_ptr();
    let hako = Box::into_raw(Box::new(HakoContext {
        context,
        last_error: RefCell::new(None),
    }));
    unsafe { qjs::JS_SetContextOpaque(raw, hako.cast()) };
    hako
}

#[unsafe(no_mangle)]
pub extern "C" fn hako_context_free(ctx: *mut HakoContext) {
    if !ctx.is_null() {
        drop(unsafe { Box::from_raw(ctx) });
    }
}

/// Message of the last bridge-level failure on `ctx` (allocation, invalid
/// UTF-8, NUL in a name), or NULL. Valid until the next failure.
///
/// Script exceptions are not reported here; see `hako_get_last_error()`.
#[unsafe(no_mangle)]
pub extern "C" fn hako_last_bridge_error(ctx: *mut HakoContext) -> *const c_char {
    let Some(hako) = (unsafe { ctx.as_ref() }) else {
        return ptr::null();
    };
    hako.last_error.borrow().as_ref().map_or(ptr::null(), |message| message.as_ptr())
}

#[unsafe(no_mangle)]
pub extern "C" fn hako_clear_bridge_error(ctx: *mut HakoContext) {
    if let Some(hako) = unsafe { ctx.as_ref() } {
        hako.clear_error();
    }
}

// ============================================================================
// Evaluation and Bytecode
// ============================================================================

/// Borrow `len` bytes of source as UTF-8
fn source_arg<'a>(hako: &HakoContext, source: *const c_char, len: usize) -> Option<&'a str> {
    if source.is_null() {
        return Some("");
    }
    let bytes = unsafe { std::slice::from_raw_parts(source.cast::<u8>(), len) };
    match std::str::from_utf8(bytes) {
        Ok(text) => Some(text),
        Err(_) => {
            hako.set_error(&crate::BridgeError::InvalidUtf8);
            None
        }
    }
}

fn filename_arg<'a>(filename: *const c_char) -> &'a str {
    str_arg(filename).unwrap_or("<eval>")
}

/// Evaluate `len` bytes of source. See [`Ctx::eval`].
#[unsafe(no_mangle)]
pub extern "C" fn hako_eval(
    ctx: *mut HakoContext,
    source: *const c_char,
    len: usize,
    filename: *const c_char,
    detect_module: bool,
    flags: u32,
) -> HakoHandle {
    let Some(hako) = (unsafe { ctx.as_ref() }) else {
        return ptr::null_mut();
    };
    let Some(source) = source_arg(hako, source, len) else {
        return ptr::null_mut();
    };
    let ctx: Ctx<'_> = hako.ctx();
    let flags = EvalFlags::from_bits(flags);
    hako.handle_result(ctx.eval(source, filename_arg(filename), detect_module, flags))
}

/// Compile and serialize source. Stores the length in `out_len` and returns
/// a buffer to free with `hako_free_buffer()`, or NULL on failure (with the
/// compile error pending on `ctx`).
#[unsafe(no_mangle)]
pub extern "C" fn hako_compile_to_bytecode(
    ctx: *mut HakoContext,
    source: *const c_char,
    len: usize,
    filename: *const c_char,
    detect_module: bool,
    flags: u32,
    out_len: *mut usize,
) -> *mut u8 {
    let Some(hako) = (unsafe { ctx.as_ref() }) else {
        return ptr::null_mut();
    };
    let Some(source) = source_arg(hako, source, len) else {
        return ptr::null_mut();
    };
    let ctx = hako.ctx();
    let flags = EvalFlags::from_bits(flags);
    let bytes = ctx.compile_to_bytecode(source, filename_arg(filename), detect_module, flags);
    match bytes {
        Ok(bytes) => {
            let bytes = bytes.into_boxed_slice();
            if let Some(out_len) = unsafe { out_len.as_mut() } {
                *out_len = bytes.len();
            }
            Box::into_raw(bytes).cast::<u8>()
        }
        Err(error) => {
            // Leaves the compile error pending, as an exception handle would.
            let marker = hako.handle_result(Err(error));
            unsafe { crate::handle::release(ctx.as_ptr(), marker) };
            ptr::null_mut()
        }
    }
}

/// Read and (unless `load_only`) run bytecode. See [`Ctx::evaluate_bytecode`].
#[unsafe(no_mangle)]
pub extern "C" fn hako_eval_bytecode(
    ctx: *mut HakoContext,
    buffer: *const u8,
    len: usize,
    load_only: bool,
) -> HakoHandle {
    let Some(hako) = (unsafe { ctx.as_ref() }) else {
        return ptr::null_mut();
    };
    let bytes = if buffer.is_null() {
        &[][..]
    } else {
        unsafe { std::slice::from_raw_parts(buffer, len) }
    };
    hako.handle_result(hako.ctx().evaluate_bytecode(bytes, load_only))
}
