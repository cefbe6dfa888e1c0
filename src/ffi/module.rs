//! Module loading and native modules.

use std::ffi::{c_char, c_int};
use std::ptr;

use crate::error::{HostError, HostResult};
use crate::host::ModuleSource;
use crate::module::ModuleDef;

use super::{HakoContext, HakoHandle, HakoModuleDef, borrowed, into_c_string, str_arg};

// ============================================================================
// Module Sources
// ============================================================================

enum Payload {
    Text(String),
    Precompiled(*mut HakoModuleDef),
    NotFound,
}

/// Answer to a `load_module` callback.
///
/// Create one with a `hako_module_source_*` function and return it from the
/// callback; the bridge frees it.
pub struct HakoModuleSource {
    payload: Payload,
}

impl HakoModuleSource {
    fn boxed(payload: Payload) -> *mut HakoModuleSource {
        Box::into_raw(Box::new(HakoModuleSource { payload }))
    }

    pub(crate) fn into_module_source<'js>(self, specifier: &str) -> HostResult<ModuleSource<'js>> {
        match self.payload {
            Payload::Text(text) => Ok(ModuleSource::Source(text)),
            Payload::Precompiled(module) => ModuleDef::from_ptr(module)
                .map(ModuleSource::Precompiled)
                .ok_or_else(|| HostError::null_result("precompiled module", specifier)),
            Payload::NotFound => Ok(ModuleSource::NotFound),
        }
    }
}

/// Module given as `len` bytes of UTF-8 source. NULL if the text is not UTF-8.
#[unsafe(no_mangle)]
pub extern "C" fn hako_module_source_text(
    text: *const c_char,
    len: usize,
) -> *mut HakoModuleSource {
    let bytes = if text.is_null() {
        &[][..]
    } else {
        unsafe { std::slice::from_raw_parts(text.cast::<u8>(), len) }
    };
    match std::str::from_utf8(bytes) {
        Ok(text) => HakoModuleSource::boxed(Payload::Text(text.to_owned())),
        Err(_) => ptr::null_mut(),
    }
}

/// Module already compiled (`hako_module_def()`) or declared native
/// (`hako_new_native_module()`)
#[unsafe(no_mangle)]
pub extern "C" fn hako_module_source_precompiled(
    module: *mut HakoModuleDef,
) -> *mut HakoModuleSource {
    HakoModuleSource::boxed(Payload::Precompiled(module))
}

/// The module does not exist
#[unsafe(no_mangle)]
pub extern "C" fn hako_module_source_not_found() -> *mut HakoModuleSource {
    HakoModuleSource::boxed(Payload::NotFound)
}

// ============================================================================
// Imports
// ============================================================================

/// `import(specifier, { with: attributes })` from the host.
///
/// `base` (nullable) is the importing module's name. `attributes` (nullable)
/// is an object handle. Returns the namespace, a promise for it while loading
/// is still pending, or an exception handle.
#[unsafe(no_mangle)]
pub extern "C" fn hako_import_module(
    ctx: *mut HakoContext,
    specifier: *const c_char,
    base: *const c_char,
    attributes: HakoHandle,
) -> HakoHandle {
    let Some(hako) = (unsafe { ctx.as_ref() }) else {
        return ptr::null_mut();
    };
    let Some(specifier) = str_arg(specifier) else {
        return ptr::null_mut();
    };
    let ctx = hako.ctx();
    let attributes = borrowed(ctx, attributes);
    hako.handle_result(ctx.import_module(specifier, str_arg(base), attributes.as_deref()))
}

/// Validate an import-attributes object. Returns its entries as a JSON
/// object string (free with `hako_free_string()`), or NULL with a
/// `TypeError` pending for an unsupported key.
#[unsafe(no_mangle)]
pub extern "C" fn hako_check_attributes(
    ctx: *mut HakoContext,
    attributes: HakoHandle,
) -> *mut c_char {
    let Some(hako) = (unsafe { ctx.as_ref() }) else {
        return ptr::null_mut();
    };
    let ctx = hako.ctx();
    let Some(attributes) = borrowed(ctx, attributes) else {
        return ptr::null_mut();
    };
    let checked = ctx
        .check_attributes(&attributes)
        .and_then(|attributes| Ok(serde_json::to_string(&attributes)?));
    match checked {
        Ok(json) => into_c_string(json),
        Err(error) => {
            hako.status_result(Err(error));
            ptr::null_mut()
        }
    }
}

/// Namespace of the module held by `module` (e.g. a compile-only module
/// evaluation). A non-module yields a `TypeError` exception handle.
#[unsafe(no_mangle)]
pub extern "C" fn hako_get_module_namespace(
    ctx: *mut HakoContext,
    module: HakoHandle,
) -> HakoHandle {
    let Some(hako) = (unsafe { ctx.as_ref() }) else {
        return ptr::null_mut();
    };
    let ctx = hako.ctx();
    borrowed(ctx, module).map_or(ptr::null_mut(), |module| {
        hako.handle_result(ctx.get_module_namespace(&module))
    })
}

/// Module record held by a handle, or NULL. The record is owned by the
/// context and lives as long as it does.
#[unsafe(no_mangle)]
pub extern "C" fn hako_module_def(ctx: *mut HakoContext, module: HakoHandle) -> *mut HakoModuleDef {
    let Some(hako) = (unsafe { ctx.as_ref() }) else {
        return ptr::null_mut();
    };
    let ctx = hako.ctx();
    borrowed(ctx, module)
        .and_then(|module| ctx.module_def_of(&module))
        .map_or(ptr::null_mut(), |module| module.as_ptr())
}

// ============================================================================
// Native Modules
// ============================================================================

/// Declare a native module named `name`. Its exports are set from the
/// `init_module` callback. NULL on failure.
#[unsafe(no_mangle)]
pub extern "C" fn hako_new_native_module(
    ctx: *mut HakoContext,
    name: *const c_char,
) -> *mut HakoModuleDef {
    let Some(hako) = (unsafe { ctx.as_ref() }) else {
        return ptr::null_mut();
    };
    let Some(name) = str_arg(name) else {
        return ptr::null_mut();
    };
    match hako.ctx().new_native_module(name) {
        Ok(module) => module.as_ptr(),
        Err(error) => {
            hako.status_result(Err(error));
            ptr::null_mut()
        }
    }
}

fn module_arg<'js>(module: *mut HakoModuleDef) -> Option<ModuleDef<'js>> {
    ModuleDef::from_ptr(module)
}

/// Declare an export before the module is linked. 0 on success, -1 on error.
#[unsafe(no_mangle)]
pub extern "C" fn hako_add_module_export(
    ctx: *mut HakoContext,
    module: *mut HakoModuleDef,
    name: *const c_char,
) -> c_int {
    let Some(hako) = (unsafe { ctx.as_ref() }) else {
        return -1;
    };
    let (Some(module), Some(name)) = (module_arg(module), str_arg(name)) else {
        return -1;
    };
    hako.status_result(hako.ctx().add_module_export(module, name))
}

/// Set a declared export. The handle stays owned by the caller.
/// 0 on success, -1 on error.
#[unsafe(no_mangle)]
pub extern "C" fn hako_set_module_export(
    ctx: *mut HakoContext,
    module: *mut HakoModuleDef,
    name: *const c_char,
    value: HakoHandle,
) -> c_int {
    let Some(hako) = (unsafe { ctx.as_ref() }) else {
        return -1;
    };
    let ctx = hako.ctx();
    let (Some(module), Some(name), Some(value)) =
        (module_arg(module), str_arg(name), borrowed(ctx, value))
    else {
        return -1;
    };
    hako.status_result(ctx.set_module_export(module, name, &value))
}

/// Name of a module record. Free with `hako_free_string()`.
#[unsafe(no_mangle)]
pub extern "C" fn hako_module_name(
    ctx: *mut HakoContext,
    module: *mut HakoModuleDef,
) -> *mut c_char {
    let Some(hako) = (unsafe { ctx.as_ref() }) else {
        return ptr::null_mut();
    };
    module_arg(module).map_or(ptr::null_mut(), |module| {
        into_c_string(hako.ctx().module_name(module))
    })
}
