//! Integration tests for the bridge, organized by area
//!
//! These tests drive the engine through the public Rust surface with a
//! recording host standing in for the embedder.
//!
//! ## Aggressive Test Defaults
//!
//! Runtimes are created with `GC_THRESHOLD=1` unless overridden, so a
//! collection can run on nearly every allocation and handle ownership bugs
//! show up as crashes instead of leaks:
//!
//! ```bash
//! cargo test                           # Default: aggressive settings
//! GC_THRESHOLD=1000000 cargo test      # Less aggressive GC for faster runs
//! ```

mod binary;
mod bytecode;
mod classes;
mod handles;
mod values;

use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::rc::Rc;

use hako::{
    Construct, Context, ContextOptions, Ctx, EvalFlags, Finalize, FunctionCall, Host, HostError,
    HostResult, ImportAttributes, ModuleDef, ModuleRequest, ModuleSource, OwnedHandle, Runtime,
    RuntimeOptions,
};
use rustc_hash::FxHashMap;

/// Function ids understood by [`RecordingHost::call_function`]
pub mod functions {
    /// Sum of all arguments as numbers
    pub const SUM: i32 = 1;
    /// Returns nothing, so the call evaluates to `undefined`
    pub const NOTHING: i32 = 2;
    /// Fails with a plain host error
    pub const FAIL: i32 = 3;
    /// Returns its first argument
    pub const ECHO: i32 = 4;
    /// Returns `true` through a constant handle
    pub const TRUE: i32 = 5;
}

/// Test double for the embedder. Every callback is logged.
#[derive(Default)]
pub struct RecordingHost {
    /// Module sources by normalized name
    pub modules: RefCell<FxHashMap<String, String>>,
    /// Native modules by name: export name and numeric value
    pub native_modules: RefCell<FxHashMap<String, Vec<(String, f64)>>>,
    /// Resolver table; specifiers missing from it are not found
    pub resolutions: RefCell<FxHashMap<String, String>>,

    pub loads: RefCell<Vec<(String, ImportAttributes)>>,
    pub normalizations: RefCell<Vec<(String, String)>>,
    pub resolves: RefCell<Vec<(String, Option<String>)>>,
    pub calls: RefCell<Vec<(i32, usize)>>,
    pub constructions: RefCell<Vec<(u32, usize)>>,
    /// Tags of finalized instances with their class id
    pub finalized: RefCell<Vec<(u32, u32)>>,
    pub initialized: RefCell<Vec<String>>,

    /// When set, `interrupt` answers `true`
    pub interrupt: Cell<bool>,
    pub interrupt_polls: Cell<usize>,
}

impl RecordingHost {
    pub fn new() -> Rc<RecordingHost> {
        Rc::new(RecordingHost::default())
    }

    pub fn add_module(&self, name: &str, source: &str) {
        self.modules.borrow_mut().insert(name.to_string(), source.to_string());
    }

    pub fn add_native_module(&self, name: &str, exports: &[(&str, f64)]) {
        let exports = exports.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        self.native_modules.borrow_mut().insert(name.to_string(), exports);
    }

    pub fn load_names(&self) -> Vec<String> {
        self.loads.borrow().iter().map(|(name, _)| name.clone()).collect()
    }
}

impl Host for RecordingHost {
    fn call_function<'js>(
        &self,
        ctx: Ctx<'js>,
        call: FunctionCall<'js>,
    ) -> HostResult<Option<OwnedHandle<'js>>> {
        self.calls.borrow_mut().push((call.function_id, call.args.len()));
        let out_of_memory = |e: hako::BridgeError| HostError::message(e.to_string());
        match call.function_id {
            functions::SUM => {
                let mut sum = 0.0;
                for arg in &call.args {
                    sum += ctx.get_float64(arg).map_err(out_of_memory)?;
                }
                ctx.new_float64(sum).map(Some).map_err(out_of_memory)
            }
            functions::NOTHING => Ok(None),
            functions::FAIL => Err(HostError::message("host function failed")),
            functions::ECHO => Ok(call.args.into_iter().next()),
            functions::TRUE => ctx.boolean(true).map(Some).map_err(out_of_memory),
            other => Err(HostError::type_error(format!("unknown function id {}", other))),
        }
    }

    fn interrupt(&self) -> bool {
        self.interrupt_polls.set(self.interrupt_polls.get() + 1);
        self.interrupt.get()
    }

    fn load_module<'js>(
        &self,
        ctx: Ctx<'js>,
        request: ModuleRequest<'_>,
    ) -> HostResult<ModuleSource<'js>> {
        self.loads
            .borrow_mut()
            .push((request.specifier.to_string(), request.attributes.clone()));
        if let Some(source) = self.modules.borrow().get(request.specifier) {
            return Ok(ModuleSource::Source(source.clone()));
        }
        let exports = self.native_modules.borrow().get(request.specifier).cloned();
        if let Some(exports) = exports {
            let module = ctx
                .new_native_module(request.specifier)
                .map_err(|e| HostError::message(e.to_string()))?;
            for (name, _) in &exports {
                ctx.add_module_export(module, name)
                    .map_err(|e| HostError::message(e.to_string()))?;
            }
            return Ok(ModuleSource::Precompiled(module));
        }
        Ok(ModuleSource::NotFound)
    }

    fn normalize_module(&self, base: &str, specifier: &str) -> HostResult<String> {
        self.normalizations
            .borrow_mut()
            .push((base.to_string(), specifier.to_string()));
        if specifier == "empty" {
            return Ok(String::new());
        }
        Ok(specifier.trim_start_matches("./").to_string())
    }

    fn resolve_module(&self, specifier: &str, current: Option<&str>) -> HostResult<Option<String>> {
        self.resolves
            .borrow_mut()
            .push((specifier.to_string(), current.map(str::to_string)));
        Ok(self.resolutions.borrow().get(specifier).cloned())
    }

    fn construct<'js>(
        &self,
        ctx: Ctx<'js>,
        construct: Construct<'js>,
    ) -> HostResult<OwnedHandle<'js>> {
        let class_id = construct.class_id;
        self.constructions
            .borrow_mut()
            .push((class_id.raw(), construct.args.len()));
        let instance = ctx
            .new_object_class(class_id, Some(&construct.new_target))
            .map_err(|e| HostError::message(e.to_string()))?;
        let tag = match construct.args.first() {
            Some(arg) => ctx.get_float64(arg).unwrap_or(0.0) as u32,
            None => 0,
        };
        let opaque = Box::into_raw(Box::new(tag)).cast::<c_void>();
        ctx.set_opaque(&instance, class_id, opaque)
            .map_err(|e| HostError::message(e.to_string()))?;
        Ok(instance)
    }

    fn finalize(&self, finalize: Finalize) {
        if finalize.opaque.is_null() {
            return;
        }
        let tag = unsafe { Box::from_raw(finalize.opaque.cast::<u32>()) };
        self.finalized.borrow_mut().push((*tag, finalize.class_id.raw()));
    }

    fn init_module<'js>(&self, ctx: Ctx<'js>, module: ModuleDef<'js>) -> HostResult<()> {
        let name = ctx.module_name(module);
        self.initialized.borrow_mut().push(name.clone());
        let exports = self.native_modules.borrow().get(&name).cloned().unwrap_or_default();
        for (export, value) in exports {
            let value = ctx.new_float64(value).map_err(|e| HostError::message(e.to_string()))?;
            ctx.set_module_export(module, &export, &value)
                .map_err(|e| HostError::message(e.to_string()))?;
        }
        Ok(())
    }
}

/// Runtime with aggressive GC settings for testing.
///
/// `GC_THRESHOLD` overrides the default threshold of 1 byte.
pub fn create_test_runtime(host: Rc<RecordingHost>) -> Runtime {
    let gc_threshold = std::env::var("GC_THRESHOLD")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1);
    let options = RuntimeOptions {
        gc_threshold: Some(gc_threshold),
        ..RuntimeOptions::default()
    };
    Runtime::new(host, &options).unwrap()
}

pub fn create_test_context(runtime: &Runtime) -> Context {
    runtime.context(&ContextOptions::default()).unwrap()
}

/// Evaluate a global script and return its value, panicking on exceptions
pub fn eval<'js>(ctx: Ctx<'js>, source: &str) -> OwnedHandle<'js> {
    ctx.eval(source, "test.js", false, EvalFlags::GLOBAL)
        .unwrap()
        .into_result()
        .unwrap_or_else(|e| panic!("script threw: {}", e))
}

pub fn eval_number(ctx: Ctx<'_>, source: &str) -> f64 {
    let value = eval(ctx, source);
    ctx.get_float64(&value).unwrap()
}

pub fn eval_string(ctx: Ctx<'_>, source: &str) -> String {
    let value = eval(ctx, source);
    ctx.to_string(&value).unwrap()
}

/// Evaluate and return the exception summary, panicking if nothing was thrown
pub fn eval_exception(
    ctx: Ctx<'_>,
    source: &str,
    filename: &str,
    flags: EvalFlags,
) -> hako::JsException {
    let result = ctx.eval(source, filename, false, flags).unwrap();
    assert!(result.is_exception(), "expected `{}` to throw", source);
    match result.into_result() {
        Err(hako::BridgeError::Exception(exception)) => exception,
        other => panic!("expected an exception, got {:?}", other),
    }
}

/// Set a global property from the host side
pub fn set_global<'js>(ctx: Ctx<'js>, name: &str, value: &OwnedHandle<'js>) {
    let global = ctx.global_object().unwrap();
    ctx.set_prop_str(&global, name, value).unwrap();
}
