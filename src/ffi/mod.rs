//! C ABI for embedding the bridge.
//!
//! All engine values cross this boundary as handles (`HakoHandle`, the
//! address of a bridge-owned cell). Buffers cross as pointer plus length.
//! The host plugs in behavior through a [`HakoHostCallbacks`] table.
//!
//! # Thread Safety
//!
//! This library is NOT thread-safe. A runtime, its contexts and every handle
//! they produce must stay on one thread.
//!
//! # Memory Management
//!
//! - `HakoRuntime`: created by `hako_runtime_new()`, freed by `hako_runtime_free()`
//!   after all of its contexts
//! - `HakoContext`: created by `hako_context_new()`, freed by `hako_context_free()`
//! - Handles: freed by `hako_free_value()`, except the four static handles
//!   from `hako_get_undefined()` and friends, which must never be freed
//! - Strings returned by the bridge: freed by `hako_free_string()`
//! - Bytecode buffers: freed by `hako_free_buffer()`
//! - Module source descriptors: created by `hako_module_source_*()` and
//!   consumed by the bridge when returned from the `load_module` callback

mod context;
mod module;
mod native;
mod value;

use std::cell::RefCell;
use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::mem::ManuallyDrop;
use std::ptr;

use rquickjs::qjs;

use crate::error::{BridgeError, HostError, HostResult, JsException};
use crate::handle::{Constant, OwnedHandle, RawHandle};
use crate::host::{Construct, Finalize, FunctionCall, Host, ModuleRequest, ModuleSource};
use crate::module::ModuleDef;
use crate::runtime::{Context, Ctx, Runtime};

pub use context::*;
pub use module::*;
pub use native::*;
pub use value::*;

// ============================================================================
// Version
// ============================================================================

/// Library version string
const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

/// Returns the library version string.
///
/// The returned string is valid for the lifetime of the library.
#[unsafe(no_mangle)]
pub extern "C" fn hako_version() -> *const c_char {
    VERSION.as_ptr().cast()
}

/// Engine version string. Static, never freed.
#[unsafe(no_mangle)]
pub extern "C" fn hako_engine_version() -> *const c_char {
    unsafe { qjs::JS_GetVersion() }
}

/// Build information as JSON. Free with `hako_free_string()`.
#[unsafe(no_mangle)]
pub extern "C" fn hako_build_info() -> *mut c_char {
    crate::build_info()
        .to_json()
        .map_or(ptr::null_mut(), into_c_string)
}

// ============================================================================
// Opaque Types
// ============================================================================

/// Handle as seen from C
pub type HakoHandle = RawHandle;

/// Module record as seen from C
pub type HakoModuleDef = qjs::JSModuleDef;

/// Opaque runtime: the engine runtime plus the callback table.
pub struct HakoRuntime {
    pub(crate) runtime: Runtime,
}

/// Opaque context.
///
/// Stored as the engine context's opaque pointer, so callbacks receive the
/// same `HakoContext` the host created.
pub struct HakoContext {
    pub(crate) context: Context,
    pub(crate) last_error: RefCell<Option<CString>>,
}

impl HakoContext {
    pub(crate) fn ctx(&self) -> Ctx<'_> {
        self.context.ctx()
    }

    /// Record a bridge failure for `hako_last_bridge_error()`
    pub(crate) fn set_error(&self, error: &BridgeError) {
        let message = CString::new(error.to_string())
            .unwrap_or_else(|_| CString::from(c"bridge error message contained NUL"));
        tracing::debug!(%error, "bridge error reported to host");
        self.last_error.replace(Some(message));
    }

    pub(crate) fn clear_error(&self) {
        self.last_error.replace(None);
    }

    /// Handle out of a bridge result: the owned cell on success, an exception
    /// handle for script exceptions, null (with the last error set) otherwise
    pub(crate) fn handle_result(&self, result: crate::Result<OwnedHandle<'_>>) -> HakoHandle {
        match result {
            Ok(handle) => handle.into_raw(),
            Err(BridgeError::Exception(exception)) => self.rethrow(&exception),
            Err(error) => {
                self.set_error(&error);
                ptr::null_mut()
            }
        }
    }

    /// Status code out of a bridge result: 0, or -1 with an exception pending
    /// or the last error set
    pub(crate) fn status_result(&self, result: crate::Result<()>) -> c_int {
        match result {
            Ok(()) => 0,
            Err(BridgeError::Exception(exception)) => {
                let marker = self.rethrow(&exception);
                unsafe { crate::handle::release(self.context.as_ptr(), marker) };
                -1
            }
            Err(error) => {
                self.set_error(&error);
                -1
            }
        }
    }

    /// Put a summarised exception back on the context as an `Error`
    fn rethrow(&self, exception: &JsException) -> HakoHandle {
        let ctx = self.ctx();
        let thrown = ctx
            .new_error_with(&exception.name, &exception.message)
            .and_then(|error| {
                if let Some(stack) = &exception.stack {
                    ctx.set_prop_str(&error, "stack", &ctx.new_string(stack)?)?;
                }
                ctx.throw(&error)
            });
        match thrown {
            Ok(marker) => marker.into_raw(),
            Err(error) => {
                self.set_error(&error);
                ptr::null_mut()
            }
        }
    }
}

/// Look up the `HakoContext` stored on an engine context
pub(crate) fn hako_context_of(ctx: Ctx<'_>) -> *mut HakoContext {
    unsafe { qjs::JS_GetContextOpaque(ctx.as_ptr()) }.cast()
}

/// Borrow a host-held handle without taking ownership
pub(crate) fn borrowed<'js>(
    ctx: Ctx<'js>,
    handle: HakoHandle,
) -> Option<ManuallyDrop<OwnedHandle<'js>>> {
    // SAFETY: never dropped, so neither the cell nor a static slot is released.
    unsafe { OwnedHandle::from_raw(ctx, handle) }.map(ManuallyDrop::new)
}

/// Take ownership of a handle returned by a host callback. Static handles
/// are copied into a fresh cell.
pub(crate) fn adopt<'js>(
    ctx: Ctx<'js>,
    handle: HakoHandle,
) -> Option<crate::Result<OwnedHandle<'js>>> {
    if handle.is_null() {
        return None;
    }
    if let Some(constant) = Constant::at(handle) {
        return Some(ctx.constant(constant));
    }
    unsafe { OwnedHandle::from_raw(ctx, handle) }.map(Ok)
}

/// Borrow a C string, `None` for null or invalid UTF-8
pub(crate) fn str_arg<'a>(text: *const c_char) -> Option<&'a str> {
    if text.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(text) }.to_str().ok()
}

/// Hand a Rust string to C. Free with `hako_free_string()`.
pub(crate) fn into_c_string(text: String) -> *mut c_char {
    CString::new(text).map_or(ptr::null_mut(), CString::into_raw)
}

// ============================================================================
// Strings and Buffers
// ============================================================================

/// Copy `len` bytes into a bridge-owned NUL-terminated string.
///
/// Use this for strings the bridge takes ownership of (normalize and resolve
/// callback results).
#[unsafe(no_mangle)]
pub extern "C" fn hako_string_new(text: *const c_char, len: usize) -> *mut c_char {
    if text.is_null() {
        return ptr::null_mut();
    }
    let bytes = unsafe { std::slice::from_raw_parts(text.cast::<u8>(), len) };
    CString::new(bytes).map_or(ptr::null_mut(), CString::into_raw)
}

/// Free a string returned by the bridge or created by `hako_string_new()`.
///
/// # Safety
/// `text` must come from this library and not be freed twice.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hako_free_string(text: *mut c_char) {
    if !text.is_null() {
        drop(unsafe { CString::from_raw(text) });
    }
}

/// Free a bytecode buffer from `hako_compile_to_bytecode()`.
///
/// # Safety
/// `buffer` and `len` must be exactly what the bridge returned.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hako_free_buffer(buffer: *mut u8, len: usize) {
    if !buffer.is_null() {
        drop(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(buffer, len)) });
    }
}

// ============================================================================
// Host Callbacks
// ============================================================================

/// Native function call. Argument handles belong to the bridge and are only
/// valid during the call. The returned handle (NULL for `undefined`) is
/// released by the bridge.
pub type HakoCallFunctionFn = unsafe extern "C" fn(
    ctx: *mut HakoContext,
    this: HakoHandle,
    argc: c_int,
    argv: *mut HakoHandle,
    function_id: i32,
    userdata: *mut c_void,
) -> HakoHandle;

/// Return non-zero to interrupt the running script
pub type HakoInterruptFn = unsafe extern "C" fn(userdata: *mut c_void) -> c_int;

/// Module load. `attributes_json` is a JSON object of import attributes.
/// Return a descriptor from `hako_module_source_*()`; the bridge frees it.
pub type HakoLoadModuleFn = unsafe extern "C" fn(
    ctx: *mut HakoContext,
    specifier: *const c_char,
    attributes_json: *const c_char,
    userdata: *mut c_void,
) -> *mut HakoModuleSource;

/// Module name normalization. Return a string from `hako_string_new()`.
pub type HakoNormalizeModuleFn = unsafe extern "C" fn(
    base: *const c_char,
    specifier: *const c_char,
    userdata: *mut c_void,
) -> *mut c_char;

/// Module resolution. `current` is NULL at top level. Return NULL when the
/// module does not exist, otherwise a string from `hako_string_new()`.
pub type HakoResolveModuleFn = unsafe extern "C" fn(
    specifier: *const c_char,
    current: *const c_char,
    userdata: *mut c_void,
) -> *mut c_char;

/// `new` on a native class. Argument handles behave as for `call_function`.
/// The returned instance handle is released by the bridge.
pub type HakoConstructFn = unsafe extern "C" fn(
    ctx: *mut HakoContext,
    new_target: HakoHandle,
    argc: c_int,
    argv: *mut HakoHandle,
    class_id: u32,
    userdata: *mut c_void,
) -> HakoHandle;

/// Instance collected. Must not call back into the bridge.
pub type HakoFinalizeFn =
    unsafe extern "C" fn(opaque: *mut c_void, class_id: u32, userdata: *mut c_void);

/// Native module linking. Return 0 on success.
pub type HakoInitModuleFn = unsafe extern "C" fn(
    ctx: *mut HakoContext,
    module: *mut HakoModuleDef,
    userdata: *mut c_void,
) -> c_int;

/// Host callback table. Unset entries fall back to the default behavior
/// (calls and constructs throw, loads report "not found").
#[repr(C)]
#[derive(Clone, Copy)]
pub struct HakoHostCallbacks {
    pub userdata: *mut c_void,
    pub call_function: Option<HakoCallFunctionFn>,
    pub interrupt: Option<HakoInterruptFn>,
    pub load_module: Option<HakoLoadModuleFn>,
    pub normalize_module: Option<HakoNormalizeModuleFn>,
    pub resolve_module: Option<HakoResolveModuleFn>,
    pub construct: Option<HakoConstructFn>,
    pub finalize: Option<HakoFinalizeFn>,
    pub init_module: Option<HakoInitModuleFn>,
}

impl Default for HakoHostCallbacks {
    fn default() -> Self {
        HakoHostCallbacks {
            userdata: ptr::null_mut(),
            call_function: None,
            interrupt: None,
            load_module: None,
            normalize_module: None,
            resolve_module: None,
            construct: None,
            finalize: None,
            init_module: None,
        }
    }
}

/// [`Host`] backed by a C callback table
pub(crate) struct CallbackHost {
    callbacks: HakoHostCallbacks,
}

impl CallbackHost {
    pub(crate) fn new(callbacks: HakoHostCallbacks) -> Self {
        CallbackHost { callbacks }
    }
}

/// Give the host raw handles for a call; they return to Rust ownership
/// (and are released) when the returned guard drops
struct ArgvGuard<'js> {
    ctx: Ctx<'js>,
    handles: Vec<HakoHandle>,
}

impl<'js> ArgvGuard<'js> {
    fn new(ctx: Ctx<'js>, first: OwnedHandle<'js>, rest: Vec<OwnedHandle<'js>>) -> Self {
        let mut handles = Vec::with_capacity(rest.len() + 1);
        handles.push(first.into_raw());
        handles.extend(rest.into_iter().map(OwnedHandle::into_raw));
        ArgvGuard { ctx, handles }
    }

    fn first(&self) -> HakoHandle {
        self.handles.first().copied().unwrap_or(ptr::null_mut())
    }

    fn argc(&self) -> c_int {
        self.handles.len().saturating_sub(1) as c_int
    }

    fn argv(&mut self) -> *mut HakoHandle {
        self.handles.get_mut(1..).map_or(ptr::null_mut(), <[HakoHandle]>::as_mut_ptr)
    }
}

impl Drop for ArgvGuard<'_> {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            unsafe { crate::handle::release(self.ctx.as_ptr(), handle) };
        }
    }
}

fn null_result(what: &'static str, specifier: impl Into<String>) -> HostError {
    HostError::null_result(what, specifier)
}

impl Host for CallbackHost {
    fn call_function<'js>(
        &self,
        ctx: Ctx<'js>,
        call: FunctionCall<'js>,
    ) -> HostResult<Option<OwnedHandle<'js>>> {
        let Some(callback) = self.callbacks.call_function else {
            return Err(HostError::Unsupported("call_function"));
        };
        let mut argv = ArgvGuard::new(ctx, call.this, call.args);
        let result = unsafe {
            callback(
                hako_context_of(ctx),
                argv.first(),
                argv.argc(),
                argv.argv(),
                call.function_id,
                self.callbacks.userdata,
            )
        };
        drop(argv);
        match adopt(ctx, result) {
            None => Ok(None),
            Some(Ok(handle)) => Ok(Some(handle)),
            Some(Err(error)) => Err(HostError::message(error.to_string())),
        }
    }

    fn interrupt(&self) -> bool {
        self.callbacks
            .interrupt
            .is_some_and(|callback| unsafe { callback(self.callbacks.userdata) } != 0)
    }

    fn load_module<'js>(
        &self,
        ctx: Ctx<'js>,
        request: ModuleRequest<'_>,
    ) -> HostResult<ModuleSource<'js>> {
        let Some(callback) = self.callbacks.load_module else {
            return Ok(ModuleSource::NotFound);
        };
        let specifier =
            CString::new(request.specifier).map_err(|_| HostError::not_found(request.specifier))?;
        let attributes = serde_json::to_string(request.attributes)
            .ok()
            .and_then(|json| CString::new(json).ok())
            .unwrap_or_else(|| CString::from(c"{}"));
        let source = unsafe {
            callback(
                hako_context_of(ctx),
                specifier.as_ptr(),
                attributes.as_ptr(),
                self.callbacks.userdata,
            )
        };
        if source.is_null() {
            return Err(null_result("module source", request.specifier));
        }
        // The descriptor is ours now; dropping it frees any text payload.
        let source = *unsafe { Box::from_raw(source) };
        source.into_module_source(request.specifier)
    }

    fn normalize_module(&self, base: &str, specifier: &str) -> HostResult<String> {
        let Some(callback) = self.callbacks.normalize_module else {
            return Err(HostError::Unsupported("normalize_module"));
        };
        let base_c = CString::new(base).map_err(|_| HostError::not_found(specifier))?;
        let specifier_c = CString::new(specifier).map_err(|_| HostError::not_found(specifier))?;
        let normalized =
            unsafe { callback(base_c.as_ptr(), specifier_c.as_ptr(), self.callbacks.userdata) };
        if normalized.is_null() {
            return Err(null_result("normalized module name", specifier));
        }
        let normalized = unsafe { CString::from_raw(normalized) };
        Ok(normalized.to_string_lossy().into_owned())
    }

    fn resolve_module(&self, specifier: &str, current: Option<&str>) -> HostResult<Option<String>> {
        let Some(callback) = self.callbacks.resolve_module else {
            return Ok(None);
        };
        let specifier_c = CString::new(specifier).map_err(|_| HostError::not_found(specifier))?;
        let current_c =
            current.map(CString::new).transpose().map_err(|_| HostError::not_found(specifier))?;
        let resolved = unsafe {
            callback(
                specifier_c.as_ptr(),
                current_c.as_ref().map_or(ptr::null(), |c| c.as_ptr()),
                self.callbacks.userdata,
            )
        };
        if resolved.is_null() {
            return Ok(None);
        }
        let resolved = unsafe { CString::from_raw(resolved) };
        Ok(Some(resolved.to_string_lossy().into_owned()))
    }

    fn construct<'js>(
        &self,
        ctx: Ctx<'js>,
        construct: Construct<'js>,
    ) -> HostResult<OwnedHandle<'js>> {
        let Some(callback) = self.callbacks.construct else {
            return Err(HostError::Unsupported("construct"));
        };
        let class_id = construct.class_id;
        let mut argv = ArgvGuard::new(ctx, construct.new_target, construct.args);
        let result = unsafe {
            callback(
                hako_context_of(ctx),
                argv.first(),
                argv.argc(),
                argv.argv(),
                class_id.raw(),
                self.callbacks.userdata,
            )
        };
        drop(argv);
        match adopt(ctx, result) {
            None => Err(null_result("instance", format!("class {}", class_id))),
            Some(Ok(handle)) => Ok(handle),
            Some(Err(error)) => Err(HostError::message(error.to_string())),
        }
    }

    fn finalize(&self, finalize: Finalize) {
        if let Some(callback) = self.callbacks.finalize {
            unsafe { callback(finalize.opaque, finalize.class_id.raw(), self.callbacks.userdata) };
        }
    }

    fn init_module<'js>(&self, ctx: Ctx<'js>, module: ModuleDef<'js>) -> HostResult<()> {
        let Some(callback) = self.callbacks.init_module else {
            return Ok(());
        };
        let status =
            unsafe { callback(hako_context_of(ctx), module.as_ptr(), self.callbacks.userdata) };
        if status != 0 {
            // Keep whatever the host threw; otherwise report a generic failure.
            if unsafe { qjs::JS_HasException(ctx.as_ptr()) } {
                let exception = ctx.take_exception();
                return Err(HostError::message(exception.message));
            }
            return Err(HostError::message(format!(
                "native module '{}' failed to initialize",
                ctx.module_name(module)
            )));
        }
        Ok(())
    }
}
