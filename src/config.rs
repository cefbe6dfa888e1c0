//! Runtime, context and module loader configuration.
//!
//! Every option struct deserializes from JSON so embedders that cannot build
//! Rust structs (the C ABI, the command line runner) configure the bridge the
//! same way.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Limits applied to an engine runtime when it is created
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeOptions {
    /// Heap limit in bytes. `None` leaves the engine unlimited.
    pub memory_limit: Option<usize>,
    /// Allocation volume between automatic GC passes
    pub gc_threshold: Option<usize>,
    /// Native stack budget for script execution in bytes
    pub max_stack_size: Option<usize>,
}

impl RuntimeOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Options for a new context inside a runtime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContextOptions {
    pub intrinsics: Intrinsics,
    /// Overrides the runtime stack budget once this context exists
    pub max_stack_size: Option<usize>,
}

impl ContextOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Which standard built-ins a context starts with.
///
/// Base objects (Object, Function, Array, Error, ...) are always present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Intrinsics {
    pub date: bool,
    pub eval: bool,
    pub regexp_compiler: bool,
    pub regexp: bool,
    pub json: bool,
    pub proxy: bool,
    pub map_set: bool,
    pub typed_arrays: bool,
    pub promise: bool,
    pub bigint: bool,
    pub weak_ref: bool,
    pub dom_exception: bool,
    pub performance: bool,
}

impl Intrinsics {
    pub const ALL: Intrinsics = Intrinsics {
        date: true,
        eval: true,
        regexp_compiler: true,
        regexp: true,
        json: true,
        proxy: true,
        map_set: true,
        typed_arrays: true,
        promise: true,
        bigint: true,
        weak_ref: true,
        dom_exception: true,
        performance: true,
    };

    /// Base objects only. Scripts cannot be evaluated from source without `eval`.
    pub const NONE: Intrinsics = Intrinsics {
        date: false,
        eval: false,
        regexp_compiler: false,
        regexp: false,
        json: false,
        proxy: false,
        map_set: false,
        typed_arrays: false,
        promise: false,
        bigint: false,
        weak_ref: false,
        dom_exception: false,
        performance: false,
    };

    pub fn is_all(&self) -> bool {
        *self == Intrinsics::ALL
    }
}

impl Default for Intrinsics {
    fn default() -> Self {
        Intrinsics::ALL
    }
}

/// How module specifiers are turned into module names before loading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderOptions {
    /// Route normalization through [`Host::normalize_module`](crate::Host::normalize_module)
    /// instead of the engine's relative-path normalizer
    pub custom_normalize: bool,
    /// Consult [`Host::resolve_module`](crate::Host::resolve_module) first;
    /// a resolver miss means the module does not exist
    pub use_resolver: bool,
}

impl LoaderOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Whether the bridge needs its own normalize hook at all
    pub(crate) fn hooks_normalize(&self) -> bool {
        self.custom_normalize || self.use_resolver
    }
}
