//! Engine runtime and context ownership.
//!
//! A [`Runtime`] owns one engine runtime plus the bridge state the engine
//! calls back into (the host, class registrations, loader settings). Contexts
//! keep their runtime alive; [`Ctx`] is the borrowed view every operation and
//! every host callback works through.

use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::rc::Rc;

use rquickjs::qjs;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::class::{ClassEntry, ClassId};
use crate::config::{ContextOptions, Intrinsics, LoaderOptions, RuntimeOptions};
use crate::error::{BridgeError, Result};
use crate::handle::OwnedHandle;
use crate::host::Host;
use crate::module::{self, ImportAttributes};

/// Bridge state stored as the engine runtime's opaque pointer
pub(crate) struct RuntimeState {
    pub(crate) host: Rc<dyn Host>,
    pub(crate) classes: RefCell<FxHashMap<ClassId, ClassEntry>>,
    pub(crate) loader: Cell<Option<LoaderOptions>>,
    /// Attributes of the host-driven import currently being loaded
    pub(crate) pending_attributes: RefCell<Option<ImportAttributes>>,
    pub(crate) interrupt_enabled: Cell<bool>,
}

struct RuntimeInner {
    raw: NonNull<qjs::JSRuntime>,
    state: NonNull<RuntimeState>,
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        tracing::debug!(runtime = ?self.raw, "freeing runtime");
        // SAFETY: every context holds an Rc to self, so none is alive. The
        // state outlives JS_FreeRuntime because finalizers still reach it.
        unsafe {
            qjs::JS_FreeRuntime(self.raw.as_ptr());
            drop(Box::from_raw(self.state.as_ptr()));
        }
    }
}

/// An engine runtime: heap, GC, job queue, class table and module loader
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    pub fn new(host: Rc<dyn Host>, options: &RuntimeOptions) -> Result<Runtime> {
        // SAFETY: plain constructor; null means failure.
        let raw =
            NonNull::new(unsafe { qjs::JS_NewRuntime() }).ok_or(BridgeError::RuntimeCreation)?;
        let state = Box::new(RuntimeState {
            host,
            classes: RefCell::new(FxHashMap::default()),
            loader: Cell::new(None),
            pending_attributes: RefCell::new(None),
            interrupt_enabled: Cell::new(false),
        });
        let state = NonNull::from(Box::leak(state));
        unsafe { qjs::JS_SetRuntimeOpaque(raw.as_ptr(), state.as_ptr().cast()) };
        let runtime = Runtime {
            inner: Rc::new(RuntimeInner { raw, state }),
        };

        if let Some(limit) = options.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(threshold) = options.gc_threshold {
            runtime.set_gc_threshold(threshold);
        }
        if let Some(size) = options.max_stack_size {
            runtime.set_max_stack_size(size);
        }
        tracing::debug!(runtime = ?raw, ?options, "created runtime");
        Ok(runtime)
    }

    pub fn as_ptr(&self) -> *mut qjs::JSRuntime {
        self.inner.raw.as_ptr()
    }

    pub(crate) fn state(&self) -> &RuntimeState {
        // SAFETY: the state lives as long as inner.
        unsafe { self.inner.state.as_ref() }
    }

    pub fn host(&self) -> Rc<dyn Host> {
        self.state().host.clone()
    }

    /// Create a context with the requested intrinsics
    pub fn context(&self, options: &ContextOptions) -> Result<Context> {
        let rt = self.as_ptr();
        let raw = unsafe {
            if options.intrinsics.is_all() {
                qjs::JS_NewContext(rt)
            } else {
                qjs::JS_NewContextRaw(rt)
            }
        };
        let raw = NonNull::new(raw).ok_or(BridgeError::ContextCreation)?;
        if !options.intrinsics.is_all() {
            // SAFETY: raw is a fresh context of this runtime.
            unsafe { add_intrinsics(raw.as_ptr(), &options.intrinsics) };
        }
        if let Some(size) = options.max_stack_size {
            self.set_max_stack_size(size);
        }
        tracing::debug!(context = ?raw, "created context");
        Ok(Context {
            raw,
            runtime: self.clone(),
        })
    }

    /// Heap limit in bytes; `usize::MAX` removes the limit
    pub fn set_memory_limit(&self, limit: usize) {
        unsafe { qjs::JS_SetMemoryLimit(self.as_ptr(), limit as qjs::size_t) };
    }

    pub fn set_gc_threshold(&self, threshold: usize) {
        unsafe { qjs::JS_SetGCThreshold(self.as_ptr(), threshold as qjs::size_t) };
    }

    /// Native stack budget in bytes; 0 disables the check
    pub fn set_max_stack_size(&self, size: usize) {
        unsafe { qjs::JS_SetMaxStackSize(self.as_ptr(), size as qjs::size_t) };
    }

    pub fn run_gc(&self) {
        unsafe { qjs::JS_RunGC(self.as_ptr()) };
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        // SAFETY: JSMemoryUsage is plain integers; the engine fills every field.
        let mut usage: qjs::JSMemoryUsage = unsafe { std::mem::zeroed() };
        unsafe { qjs::JS_ComputeMemoryUsage(self.as_ptr(), &mut usage) };
        MemoryUsage::from(usage)
    }

    /// Start polling [`Host::interrupt`] during script execution. Idempotent.
    pub fn enable_interrupt_handler(&self) {
        let state = self.state();
        if state.interrupt_enabled.replace(true) {
            return;
        }
        unsafe {
            qjs::JS_SetInterruptHandler(
                self.as_ptr(),
                Some(interrupt_trampoline),
                std::ptr::null_mut(),
            )
        };
        tracing::debug!(runtime = ?self.inner.raw, "interrupt handler enabled");
    }

    /// Stop polling the host. Idempotent.
    pub fn disable_interrupt_handler(&self) {
        let state = self.state();
        if !state.interrupt_enabled.replace(false) {
            return;
        }
        unsafe { qjs::JS_SetInterruptHandler(self.as_ptr(), None, std::ptr::null_mut()) };
        tracing::debug!(runtime = ?self.inner.raw, "interrupt handler disabled");
    }

    pub fn is_interrupt_handler_enabled(&self) -> bool {
        self.state().interrupt_enabled.get()
    }

    /// Route module normalization and loading through the host
    pub fn enable_module_loader(&self, options: LoaderOptions) {
        // SAFETY: the runtime is live.
        unsafe { module::install_loader(self.as_ptr(), options) };
        self.state().loader.set(Some(options));
        tracing::debug!(runtime = ?self.inner.raw, ?options, "module loader enabled");
    }

    pub fn disable_module_loader(&self) {
        unsafe { qjs::JS_SetModuleLoaderFunc(self.as_ptr(), None, None, std::ptr::null_mut()) };
        self.state().loader.set(None);
        tracing::debug!(runtime = ?self.inner.raw, "module loader disabled");
    }

    pub fn loader_options(&self) -> Option<LoaderOptions> {
        self.state().loader.get()
    }

    pub fn is_job_pending(&self) -> bool {
        unsafe { qjs::JS_IsJobPending(self.as_ptr()) }
    }

    /// Run queued promise jobs.
    ///
    /// Runs at most `max` jobs, or until the queue is empty when `max` is
    /// `None`. Returns how many ran. A job that throws stops the loop and its
    /// exception is returned instead.
    pub fn execute_pending_jobs(&self, max: Option<usize>) -> Result<usize> {
        match self.drain_jobs(max) {
            JobsOutcome::Completed(executed) => Ok(executed),
            JobsOutcome::Failed(ctx) => {
                // SAFETY: the engine reported ctx as the context of the failed job.
                let ctx = unsafe { Ctx::from_raw(ctx) };
                Err(BridgeError::Exception(ctx.take_exception()))
            }
        }
    }

    pub(crate) fn drain_jobs(&self, max: Option<usize>) -> JobsOutcome {
        let mut executed = 0usize;
        while max.is_none_or(|max| executed < max) {
            let mut job_ctx: *mut qjs::JSContext = std::ptr::null_mut();
            let status = unsafe { qjs::JS_ExecutePendingJob(self.as_ptr(), &mut job_ctx) };
            if status < 0 {
                tracing::trace!(executed, "pending job threw");
                return JobsOutcome::Failed(job_ctx);
            }
            if status == 0 {
                break;
            }
            executed += 1;
        }
        JobsOutcome::Completed(executed)
    }
}

pub(crate) enum JobsOutcome {
    Completed(usize),
    Failed(*mut qjs::JSContext),
}

unsafe fn add_intrinsics(ctx: *mut qjs::JSContext, intrinsics: &Intrinsics) {
    unsafe {
        qjs::JS_AddIntrinsicBaseObjects(ctx);
        if intrinsics.date {
            qjs::JS_AddIntrinsicDate(ctx);
        }
        if intrinsics.eval {
            qjs::JS_AddIntrinsicEval(ctx);
        }
        if intrinsics.regexp_compiler {
            qjs::JS_AddIntrinsicRegExpCompiler(ctx);
        }
        if intrinsics.regexp {
            qjs::JS_AddIntrinsicRegExp(ctx);
        }
        if intrinsics.json {
            qjs::JS_AddIntrinsicJSON(ctx);
        }
        if intrinsics.proxy {
            qjs::JS_AddIntrinsicProxy(ctx);
        }
        if intrinsics.map_set {
            qjs::JS_AddIntrinsicMapSet(ctx);
        }
        if intrinsics.typed_arrays {
            qjs::JS_AddIntrinsicTypedArrays(ctx);
        }
        if intrinsics.promise {
            qjs::JS_AddIntrinsicPromise(ctx);
        }
        if intrinsics.bigint {
            qjs::JS_AddIntrinsicBigInt(ctx);
        }
        if intrinsics.weak_ref {
            qjs::JS_AddIntrinsicWeakRef(ctx);
        }
        if intrinsics.dom_exception {
            qjs::JS_AddIntrinsicDOMException(ctx);
        }
        if intrinsics.performance {
            qjs::JS_AddPerformance(ctx);
        }
    }
}

unsafe extern "C" fn interrupt_trampoline(rt: *mut qjs::JSRuntime, _opaque: *mut c_void) -> i32 {
    // SAFETY: the engine only calls this for runtimes created by Runtime::new.
    let Some(state) = (unsafe { state_of(rt) }) else {
        return 0;
    };
    let host = state.host.clone();
    i32::from(host.interrupt())
}

/// Bridge state for an engine runtime, if it was created by [`Runtime::new`]
///
/// # Safety
/// `rt` must be a live runtime.
pub(crate) unsafe fn state_of<'a>(rt: *mut qjs::JSRuntime) -> Option<&'a RuntimeState> {
    let opaque = unsafe { qjs::JS_GetRuntimeOpaque(rt) };
    // SAFETY: only Runtime::new sets the opaque pointer, to a RuntimeState.
    unsafe { opaque.cast::<RuntimeState>().as_ref() }
}

/// A script context: global object, intrinsics, module namespace table
pub struct Context {
    raw: NonNull<qjs::JSContext>,
    runtime: Runtime,
}

impl Context {
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn as_ptr(&self) -> *mut qjs::JSContext {
        self.raw.as_ptr()
    }

    /// Borrowed view used for every operation on this context
    pub fn ctx(&self) -> Ctx<'_> {
        Ctx {
            raw: self.raw,
            marker: PhantomData,
        }
    }

    /// Run `f` with this context's [`Ctx`]
    pub fn with<R>(&self, f: impl FnOnce(Ctx<'_>) -> R) -> R {
        f(self.ctx())
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        tracing::debug!(context = ?self.raw, "freeing context");
        unsafe { qjs::JS_FreeContext(self.raw.as_ptr()) };
    }
}

/// Borrowed, copyable view of a live context.
///
/// The `'js` lifetime ties handles to the context that produced them.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Ctx<'js> {
    raw: NonNull<qjs::JSContext>,
    marker: PhantomData<&'js qjs::JSContext>,
}

impl<'js> Ctx<'js> {
    /// Wrap a raw context pointer.
    ///
    /// # Safety
    /// `raw` must be non-null and stay live for `'js`.
    pub unsafe fn from_raw(raw: *mut qjs::JSContext) -> Ctx<'js> {
        Ctx {
            // SAFETY: guaranteed non-null by the caller.
            raw: unsafe { NonNull::new_unchecked(raw) },
            marker: PhantomData,
        }
    }

    pub fn as_ptr(&self) -> *mut qjs::JSContext {
        self.raw.as_ptr()
    }

    pub fn runtime_ptr(&self) -> *mut qjs::JSRuntime {
        unsafe { qjs::JS_GetRuntime(self.as_ptr()) }
    }

    pub(crate) fn state(&self) -> Option<&'js RuntimeState> {
        // SAFETY: the runtime outlives every context it owns.
        unsafe { state_of(self.runtime_ptr()) }
    }

    /// The host of the owning runtime, for runtimes created by [`Runtime::new`]
    pub fn host(&self) -> Option<Rc<dyn Host>> {
        self.state().map(|state| state.host.clone())
    }

    /// Box a raw value owned by the caller
    pub(crate) fn wrap(&self, value: qjs::JSValue) -> Result<OwnedHandle<'js>> {
        OwnedHandle::new(*self, value)
    }
}

impl std::fmt::Debug for Ctx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Ctx").field(&self.raw).finish()
    }
}

/// Snapshot of the engine's allocation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub malloc_size: i64,
    pub malloc_limit: i64,
    pub memory_used_size: i64,
    pub malloc_count: i64,
    pub memory_used_count: i64,
    pub atom_count: i64,
    pub atom_size: i64,
    pub str_count: i64,
    pub str_size: i64,
    pub obj_count: i64,
    pub obj_size: i64,
    pub prop_count: i64,
    pub prop_size: i64,
    pub shape_count: i64,
    pub shape_size: i64,
    pub js_func_count: i64,
    pub js_func_size: i64,
    pub js_func_code_size: i64,
    pub js_func_pc2line_count: i64,
    pub js_func_pc2line_size: i64,
    pub c_func_count: i64,
    pub array_count: i64,
    pub fast_array_count: i64,
    pub fast_array_elements: i64,
    pub binary_object_count: i64,
    pub binary_object_size: i64,
}

impl MemoryUsage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<qjs::JSMemoryUsage> for MemoryUsage {
    fn from(usage: qjs::JSMemoryUsage) -> Self {
        MemoryUsage {
            malloc_size: usage.malloc_size,
            malloc_limit: usage.malloc_limit,
            memory_used_size: usage.memory_used_size,
            malloc_count: usage.malloc_count,
            memory_used_count: usage.memory_used_count,
            atom_count: usage.atom_count,
            atom_size: usage.atom_size,
            str_count: usage.str_count,
            str_size: usage.str_size,
            obj_count: usage.obj_count,
            obj_size: usage.obj_size,
            prop_count: usage.prop_count,
            prop_size: usage.prop_size,
            shape_count: usage.shape_count,
            shape_size: usage.shape_size,
            js_func_count: usage.js_func_count,
            js_func_size: usage.js_func_size,
            js_func_code_size: usage.js_func_code_size,
            js_func_pc2line_count: usage.js_func_pc2line_count,
            js_func_pc2line_size: usage.js_func_pc2line_size,
            c_func_count: usage.c_func_count,
            array_count: usage.array_count,
            fast_array_count: usage.fast_array_count,
            fast_array_elements: usage.fast_array_elements,
            binary_object_count: usage.binary_object_count,
            binary_object_size: usage.binary_object_size,
        }
    }
}
