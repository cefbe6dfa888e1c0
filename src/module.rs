//! Module loader indirection.
//!
//! The engine asks the bridge to normalize and load modules; the bridge asks
//! the [`Host`](crate::Host). A host answers a load with source text, an
//! already compiled (or native) module, or "not found". Import attributes are
//! validated before any load happens; `type` is the only key accepted.

use std::ffi::{CStr, c_char, c_void};
use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};

use indexmap::IndexMap;
use rquickjs::qjs;
use serde::{Deserialize, Serialize};

use crate::config::LoaderOptions;
use crate::error::{BridgeError, HostError, HostResult, Result, Thrown};
use crate::eval::{EvalFlags, Unit};
use crate::handle::OwnedHandle;
use crate::host::{ModuleRequest, ModuleSource};
use crate::runtime::Ctx;
use crate::value::{atom_to_string, c_string};

/// Attribute keys an import may carry
pub const SUPPORTED_ATTRIBUTES: &[&str] = &["type"];

/// Engine module record. Valid for as long as its context.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ModuleDef<'js> {
    ptr: NonNull<qjs::JSModuleDef>,
    marker: PhantomData<Ctx<'js>>,
}

impl<'js> ModuleDef<'js> {
    pub(crate) fn new(ptr: NonNull<qjs::JSModuleDef>) -> ModuleDef<'js> {
        ModuleDef {
            ptr,
            marker: PhantomData,
        }
    }

    pub fn as_ptr(&self) -> *mut qjs::JSModuleDef {
        self.ptr.as_ptr()
    }
}

impl fmt::Debug for ModuleDef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ModuleDef").field(&self.ptr).finish()
    }
}

/// Validated `with { ... }` attributes of an import, in source order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImportAttributes(IndexMap<String, String>);

impl ImportAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from key/value pairs, rejecting any key outside [`SUPPORTED_ATTRIBUTES`]
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> HostResult<Self>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut attributes = ImportAttributes::new();
        for (key, value) in pairs {
            let key = key.into();
            check_attribute_key(&key)?;
            attributes.0.insert(key, value.into());
        }
        Ok(attributes)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// The `type` attribute, e.g. `"json"`
    pub fn module_type(&self) -> Option<&str> {
        self.get("type")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Reject attribute keys the loader does not understand
pub fn check_attribute_key(key: &str) -> HostResult<()> {
    if SUPPORTED_ATTRIBUTES.contains(&key) {
        Ok(())
    } else {
        Err(HostError::type_error(format!(
            "Unsupported import attribute: '{}'",
            key
        )))
    }
}

/// Point the engine's module hooks at the bridge.
///
/// The normalize hook is only installed when `options` asks for host
/// normalization or resolution; otherwise the engine's relative-path
/// normalizer stays in charge.
///
/// # Safety
/// `rt` must be a live runtime created by [`Runtime::new`](crate::Runtime::new).
pub(crate) unsafe fn install_loader(rt: *mut qjs::JSRuntime, options: LoaderOptions) {
    let normalize: qjs::JSModuleNormalizeFunc = if options.hooks_normalize() {
        Some(normalize_trampoline)
    } else {
        None
    };
    unsafe { qjs::JS_SetModuleLoaderFunc(rt, normalize, Some(load_trampoline), ptr::null_mut()) };
}

/// Lossy copy of a C string owned by the engine
fn lossy(text: *const c_char) -> String {
    if text.is_null() {
        return String::new();
    }
    // SAFETY: the engine passes NUL-terminated strings.
    unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned()
}

unsafe extern "C" fn normalize_trampoline(
    ctx: *mut qjs::JSContext,
    base: *const c_char,
    name: *const c_char,
    _opaque: *mut c_void,
) -> *mut c_char {
    // SAFETY: the engine only calls hooks with a live context.
    let ctx = unsafe { Ctx::from_raw(ctx) };
    let base = lossy(base);
    let name = lossy(name);
    let Some(state) = ctx.state() else {
        ctx.throw_internal_error("module loader called on a foreign runtime");
        return ptr::null_mut();
    };
    let options = state.loader.get().unwrap_or_default();
    let host = state.host.clone();

    let resolved = if options.use_resolver {
        let current = (!base.is_empty()).then_some(base.as_str());
        match host.resolve_module(&name, current) {
            Ok(Some(resolved)) => Ok(resolved),
            Ok(None) => Err(HostError::not_found(&name)),
            Err(error) => Err(error),
        }
    } else {
        host.normalize_module(&base, &name)
    };
    tracing::trace!(base, specifier = name, ?resolved, "normalize module");

    match resolved {
        Ok(resolved) if resolved.is_empty() => {
            ctx.throw_host_error(&HostError::null_result("normalized module name", &name));
            ptr::null_mut()
        }
        // js_strndup allocates with the engine allocator, which frees the result.
        Ok(resolved) => unsafe {
            qjs::js_strndup(ctx.as_ptr(), resolved.as_ptr().cast(), resolved.len() as _)
        },
        Err(error) => {
            ctx.throw_host_error(&error);
            ptr::null_mut()
        }
    }
}

unsafe extern "C" fn load_trampoline(
    ctx: *mut qjs::JSContext,
    name: *const c_char,
    _opaque: *mut c_void,
) -> *mut qjs::JSModuleDef {
    // SAFETY: the engine only calls hooks with a live context.
    let ctx = unsafe { Ctx::from_raw(ctx) };
    let name = lossy(name);
    let Some(state) = ctx.state() else {
        ctx.throw_internal_error("module loader called on a foreign runtime");
        return ptr::null_mut();
    };
    // Only the import that stashed them sees the attributes.
    let attributes = state.pending_attributes.borrow_mut().take().unwrap_or_default();
    let host = state.host.clone();

    let source = host.load_module(
        ctx,
        ModuleRequest {
            specifier: &name,
            attributes: &attributes,
        },
    );
    tracing::trace!(specifier = name, ?source, "load module");
    ctx.adopt_module_source(&name, source)
}

impl<'js> Ctx<'js> {
    /// Turn a host load answer into the module record the engine expects,
    /// or null with an exception pending
    fn adopt_module_source(
        &self,
        name: &str,
        source: HostResult<ModuleSource<'js>>,
    ) -> *mut qjs::JSModuleDef {
        match source {
            Ok(ModuleSource::Source(text)) => {
                match self.compile_module(&text, name, EvalFlags::MODULE, false) {
                    Ok(module) => {
                        // The record stays alive in the context's module list.
                        unsafe { qjs::JS_FreeValue(self.as_ptr(), module.value) };
                        module.def.as_ptr()
                    }
                    Err(Thrown) => ptr::null_mut(),
                }
            }
            Ok(ModuleSource::Precompiled(module)) => module.as_ptr(),
            Ok(ModuleSource::NotFound) => {
                self.throw_host_error(&HostError::not_found(name));
                ptr::null_mut()
            }
            Err(error) => {
                self.throw_host_error(&error);
                ptr::null_mut()
            }
        }
    }

    /// Validate an attributes object.
    ///
    /// `undefined` and `null` mean no attributes. Any key other than `type`
    /// is a `TypeError` naming the key.
    pub fn check_attributes(&self, attributes: &OwnedHandle<'js>) -> Result<ImportAttributes> {
        self.attributes_of(attributes.value())
            .map_err(|Thrown| BridgeError::Exception(self.take_exception()))
    }

    fn attributes_of(&self, value: qjs::JSValue) -> Result<ImportAttributes, Thrown> {
        let ctx = self.as_ptr();
        if unsafe { qjs::JS_IsUndefined(value) || qjs::JS_IsNull(value) } {
            return Ok(ImportAttributes::new());
        }
        if !unsafe { qjs::JS_IsObject(value) } {
            self.throw_type_error("Import attributes must be an object");
            return Err(Thrown);
        }
        let keys = self.own_keys(value, (qjs::JS_GPN_STRING_MASK | qjs::JS_GPN_ENUM_ONLY) as i32)?;
        if let Some(error) = keys.iter().find_map(|key| check_attribute_key(key).err()) {
            self.throw_host_error(&error);
            return Err(Thrown);
        }
        // Values are informational only: one that cannot be read as text is
        // dropped rather than failing the check.
        let mut pairs = Vec::with_capacity(keys.len());
        for key in keys {
            let Ok(key_c) = c_string(&key) else {
                continue;
            };
            let item = unsafe { qjs::JS_GetPropertyStr(ctx, value, key_c.as_ptr()) };
            if unsafe { qjs::JS_IsException(item) } {
                self.clear_exception();
                continue;
            }
            let text = self.string_of(item);
            unsafe { qjs::JS_FreeValue(ctx, item) };
            match text {
                Ok(Ok(text)) => pairs.push((key, text)),
                Ok(Err(_)) => {}
                Err(Thrown) => self.clear_exception(),
            }
        }
        ImportAttributes::from_pairs(pairs).map_err(|error| {
            self.throw_host_error(&error);
            Thrown
        })
    }

    /// Host-driven `import(specifier, { with: attributes })`.
    ///
    /// `specifier` is resolved against `base` (empty for top level). The
    /// result is the module namespace when loading already finished, a
    /// promise for it otherwise, or an exception handle.
    pub fn import_module(
        &self,
        specifier: &str,
        base: Option<&str>,
        attributes: Option<&OwnedHandle<'js>>,
    ) -> Result<OwnedHandle<'js>> {
        let attributes = match attributes.map(|a| self.attributes_of(a.value())) {
            None => ImportAttributes::new(),
            Some(Ok(attributes)) => attributes,
            Some(Err(Thrown)) => return self.exception_handle(),
        };
        let specifier_c = c_string(specifier)?;
        let base_c = c_string(base.unwrap_or(""))?;
        tracing::debug!(specifier, base, ?attributes, "import module");

        let state = self.state();
        if let Some(state) = state {
            state.pending_attributes.replace(Some(attributes));
        }
        let result =
            unsafe { qjs::JS_LoadModule(self.as_ptr(), base_c.as_ptr(), specifier_c.as_ptr()) };
        if let Some(state) = state {
            state.pending_attributes.replace(None);
        }
        self.wrap(self.settle(result, Unit::Script))
    }

    /// Module record held by `handle`, if it holds one (e.g. a compile-only
    /// module evaluation or a loaded bytecode module)
    pub fn module_def_of(&self, handle: &OwnedHandle<'js>) -> Option<ModuleDef<'js>> {
        let value = handle.value();
        if unsafe { qjs::JS_VALUE_GET_TAG(value) } != qjs::JS_TAG_MODULE {
            return None;
        }
        ModuleDef::from_ptr(unsafe { qjs::JS_VALUE_GET_PTR(value) }.cast())
    }

    /// Namespace object of the module held by `handle`.
    ///
    /// A non-module handle yields a `TypeError` exception handle.
    pub fn get_module_namespace(&self, handle: &OwnedHandle<'js>) -> Result<OwnedHandle<'js>> {
        match self.module_def_of(handle) {
            Some(module) => self.wrap(module.namespace_raw(*self)),
            None => self.wrap(self.throw_type_error("Expected a module")),
        }
    }

    /// Declare a native module. Its exports are filled in by
    /// [`Host::init_module`](crate::Host::init_module) when it is linked.
    pub fn new_native_module(&self, name: &str) -> Result<ModuleDef<'js>> {
        let name_c = c_string(name)?;
        let module =
            unsafe { qjs::JS_NewCModule(self.as_ptr(), name_c.as_ptr(), Some(init_trampoline)) };
        match ModuleDef::from_ptr(module) {
            Some(module) => {
                tracing::debug!(name, "native module declared");
                Ok(module)
            }
            None => Err(BridgeError::Exception(self.take_exception())),
        }
    }

    /// Declare an export name. Must happen before the module is linked.
    pub fn add_module_export(&self, module: ModuleDef<'js>, name: &str) -> Result<()> {
        let name_c = c_string(name)?;
        let status =
            unsafe { qjs::JS_AddModuleExport(self.as_ptr(), module.as_ptr(), name_c.as_ptr()) };
        if status < 0 {
            return Err(BridgeError::Exception(self.take_exception()));
        }
        Ok(())
    }

    /// Set an export's value. `value` stays owned by the caller.
    pub fn set_module_export(
        &self,
        module: ModuleDef<'js>,
        name: &str,
        value: &OwnedHandle<'js>,
    ) -> Result<()> {
        let ctx = self.as_ptr();
        let name_c = c_string(name)?;
        let status = unsafe {
            qjs::JS_SetModuleExport(
                ctx,
                module.as_ptr(),
                name_c.as_ptr(),
                qjs::JS_DupValue(ctx, value.value()),
            )
        };
        if status < 0 {
            return Err(BridgeError::Exception(self.take_exception()));
        }
        Ok(())
    }

    pub fn module_name(&self, module: ModuleDef<'js>) -> String {
        let ctx = self.as_ptr();
        let atom = unsafe { qjs::JS_GetModuleName(ctx, module.as_ptr()) };
        let name = atom_to_string(ctx, atom);
        unsafe { qjs::JS_FreeAtom(ctx, atom) };
        name
    }
}

unsafe extern "C" fn init_trampoline(
    ctx: *mut qjs::JSContext,
    module: *mut qjs::JSModuleDef,
) -> i32 {
    // SAFETY: the engine links modules with a live context.
    let ctx = unsafe { Ctx::from_raw(ctx) };
    let Some(module) = ModuleDef::from_ptr(module) else {
        return -1;
    };
    let Some(host) = ctx.host() else {
        ctx.throw_internal_error("native module linked on a foreign runtime");
        return -1;
    };
    match host.init_module(ctx, module) {
        Ok(()) => 0,
        Err(error) => {
            ctx.throw_host_error(&error);
            -1
        }
    }
}
