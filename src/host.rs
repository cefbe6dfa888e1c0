//! Host callbacks.
//!
//! Everything the engine needs from the embedder arrives through one trait.
//! Each callback receives a request struct and answers with a
//! [`HostResult`]; the bridge turns errors into thrown script exceptions and
//! owns every handle it passes in.

use std::ffi::c_void;

use crate::class::ClassId;
use crate::error::{HostError, HostResult};
use crate::handle::OwnedHandle;
use crate::module::{ImportAttributes, ModuleDef};
use crate::runtime::Ctx;

/// Script called a function created by [`Ctx::new_function`]
#[derive(Debug)]
pub struct FunctionCall<'js> {
    pub this: OwnedHandle<'js>,
    pub args: Vec<OwnedHandle<'js>>,
    /// Identifier given at registration, passed through untouched
    pub function_id: i32,
}

/// Script ran `new` on a class created by [`Ctx::new_class`]
#[derive(Debug)]
pub struct Construct<'js> {
    pub new_target: OwnedHandle<'js>,
    pub args: Vec<OwnedHandle<'js>>,
    pub class_id: ClassId,
}

/// An instance of a finalizable class was collected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Finalize {
    /// Pointer stored with [`Ctx::set_opaque`], or null if none was set
    pub opaque: *mut c_void,
    pub class_id: ClassId,
}

/// The engine wants the contents of a module
#[derive(Debug, Clone, Copy)]
pub struct ModuleRequest<'a> {
    /// Normalized module name
    pub specifier: &'a str,
    /// Attributes of the import that triggered this load (empty for nested imports)
    pub attributes: &'a ImportAttributes,
}

/// How the host supplied a requested module
pub enum ModuleSource<'js> {
    /// Module source text, compiled by the bridge
    Source(String),
    /// An already compiled or native module, adopted as is
    Precompiled(ModuleDef<'js>),
    NotFound,
}

impl std::fmt::Debug for ModuleSource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleSource::Source(text) => f.debug_tuple("Source").field(&text.len()).finish(),
            ModuleSource::Precompiled(module) => {
                f.debug_tuple("Precompiled").field(module).finish()
            }
            ModuleSource::NotFound => f.write_str("NotFound"),
        }
    }
}

/// Embedder callbacks.
///
/// All methods have defaults, so a host only implements what it registers:
/// a host that never creates native functions need not answer `call_function`.
pub trait Host {
    /// Returning `Ok(None)` makes the call evaluate to `undefined`
    fn call_function<'js>(
        &self,
        ctx: Ctx<'js>,
        call: FunctionCall<'js>,
    ) -> HostResult<Option<OwnedHandle<'js>>> {
        let _ = (ctx, call);
        Err(HostError::Unsupported("call_function"))
    }

    /// Polled while script runs once the interrupt handler is enabled.
    /// `true` aborts the running script with an uncatchable error.
    fn interrupt(&self) -> bool {
        false
    }

    fn load_module<'js>(
        &self,
        ctx: Ctx<'js>,
        request: ModuleRequest<'_>,
    ) -> HostResult<ModuleSource<'js>> {
        let _ = (ctx, request);
        Ok(ModuleSource::NotFound)
    }

    fn normalize_module(&self, base: &str, specifier: &str) -> HostResult<String> {
        let _ = (base, specifier);
        Err(HostError::Unsupported("normalize_module"))
    }

    /// `Ok(None)` means no such module
    fn resolve_module(&self, specifier: &str, current: Option<&str>) -> HostResult<Option<String>> {
        let _ = (specifier, current);
        Ok(None)
    }

    /// Build the instance for `new Class(...)`, usually via [`Ctx::new_object_class`]
    fn construct<'js>(
        &self,
        ctx: Ctx<'js>,
        construct: Construct<'js>,
    ) -> HostResult<OwnedHandle<'js>> {
        let _ = (ctx, construct);
        Err(HostError::Unsupported("construct"))
    }

    /// Runs during garbage collection. The engine must not be re-entered.
    fn finalize(&self, finalize: Finalize) {
        let _ = finalize;
    }

    /// A native module from [`Ctx::new_native_module`] is being linked;
    /// fill its exports with [`Ctx::set_module_export`]
    fn init_module<'js>(&self, ctx: Ctx<'js>, module: ModuleDef<'js>) -> HostResult<()> {
        let _ = (ctx, module);
        Ok(())
    }
}

/// Host that answers every callback with its default
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHost;

impl Host for NoopHost {}
