//! Handle-based embedding bridge for a sandboxed JavaScript engine
//!
//! Every engine value the host sees is a *handle*: the address of a
//! bridge-owned cell holding one value. Handles are released exactly once;
//! the four static constants (`undefined`, `null`, `false`, `true`) are never
//! released at all.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use hako::{ContextOptions, EvalFlags, NoopHost, Runtime, RuntimeOptions};
//!
//! let runtime = Runtime::new(Rc::new(NoopHost), &RuntimeOptions::default()).unwrap();
//! let context = runtime.context(&ContextOptions::default()).unwrap();
//! let ctx = context.ctx();
//! let result = ctx.eval("1 + 1", "example.js", true, EvalFlags::GLOBAL).unwrap();
//! assert_eq!(ctx.get_float64(&result).unwrap(), 2.0);
//! ```

pub mod binary;
pub mod bytecode;
pub mod class;
pub mod config;
pub mod error;
pub mod eval;
pub mod handle;
pub mod host;
pub mod module;
pub mod runtime;
pub mod value;

#[cfg(feature = "c-api")]
pub mod ffi;

pub use binary::TypedArrayType;
pub use class::ClassId;
pub use config::{ContextOptions, Intrinsics, LoaderOptions, RuntimeOptions};
pub use error::{BridgeError, HostError, HostResult, JsException, Result};
pub use eval::EvalFlags;
pub use handle::{Constant, OwnedHandle, RawHandle};
pub use host::{Construct, Finalize, FunctionCall, Host, ModuleRequest, ModuleSource, NoopHost};
pub use module::{ImportAttributes, ModuleDef};
pub use runtime::{Context, Ctx, MemoryUsage, Runtime};
pub use value::{Completion, Equality, PromiseState, PropertyFlags};

/// Re-export of the raw engine bindings the handles wrap
pub use rquickjs::qjs;

use std::ffi::CStr;

use serde::Serialize;

/// Crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Version string of the embedded engine
pub fn engine_version() -> String {
    // SAFETY: the engine returns a static NUL-terminated string.
    let version = unsafe { qjs::JS_GetVersion() };
    if version.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(version) }.to_string_lossy().into_owned()
}

/// What this build of the bridge contains
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub engine_version: String,
    pub debug: bool,
    pub features: Vec<&'static str>,
}

impl BuildInfo {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

pub fn build_info() -> BuildInfo {
    let mut features = Vec::new();
    if cfg!(feature = "c-api") {
        features.push("c-api");
    }
    if cfg!(feature = "cli") {
        features.push("cli");
    }
    BuildInfo {
        version: version(),
        engine_version: engine_version(),
        debug: cfg!(debug_assertions),
        features,
    }
}
