//! Bytecode pipeline.
//!
//! [`Ctx::compile_to_bytecode`] compiles without running and serializes the
//! result; [`Ctx::evaluate_bytecode`] reads it back and runs it with the same
//! result handling as [`Ctx::eval`]. Whether a buffer holds a script or a
//! module is recorded in the buffer itself.
//!
//! The format is tied to the engine build. Buffers must not be shared between
//! different engine versions.

use std::ptr::NonNull;

use rquickjs::qjs;

use crate::error::{BridgeError, Result, Thrown};
use crate::eval::{EvalFlags, Unit, resolve_flags, set_import_meta};
use crate::handle::OwnedHandle;
use crate::module::ModuleDef;
use crate::runtime::Ctx;
use crate::value::{c_string, nul_terminated};

impl<'js> Ctx<'js> {
    /// Compile `source` and serialize it.
    ///
    /// Module detection works as in [`Ctx::eval`]. Modules are compiled as the
    /// program entry point (`import.meta.main` is `true`). Compile errors come
    /// back as [`BridgeError::Exception`].
    ///
    /// Compilation happens in a scratch context of the same runtime, so the
    /// compiled module record never joins this context's module table.
    pub fn compile_to_bytecode(
        &self,
        source: &str,
        filename: &str,
        detect_module: bool,
        flags: EvalFlags,
    ) -> Result<Vec<u8>> {
        let flags = resolve_flags(source, filename, detect_module, flags) | EvalFlags::COMPILE_ONLY;
        let scratch = ScratchContext::new(*self)?;
        let bytes = scratch.ctx().write_bytecode(source, filename, flags)?;
        tracing::debug!(
            filename,
            module = flags.is_module(),
            len = bytes.len(),
            "compiled to bytecode"
        );
        Ok(bytes)
    }

    fn write_bytecode(&self, source: &str, filename: &str, flags: EvalFlags) -> Result<Vec<u8>> {
        let ctx = self.as_ptr();
        let compiled = if flags.is_module() {
            self.compile_module(source, filename, flags, true).map(|module| module.value)
        } else {
            self.compile_script(source, filename, flags)?
        };
        let value = compiled.map_err(|Thrown| BridgeError::Exception(self.take_exception()))?;

        let mut len: qjs::size_t = 0;
        let buffer =
            unsafe { qjs::JS_WriteObject(ctx, &mut len, value, qjs::JS_WRITE_OBJ_BYTECODE as i32) };
        unsafe { qjs::JS_FreeValue(ctx, value) };
        if buffer.is_null() {
            return Err(BridgeError::Exception(self.take_exception()));
        }
        let bytes = unsafe { std::slice::from_raw_parts(buffer, len as usize) }.to_vec();
        unsafe { qjs::js_free(ctx, buffer.cast()) };
        Ok(bytes)
    }

    fn compile_script(
        &self,
        source: &str,
        filename: &str,
        flags: EvalFlags,
    ) -> Result<Result<qjs::JSValue, Thrown>> {
        let filename_c = c_string(filename)?;
        let code = nul_terminated(source);
        let value = unsafe {
            qjs::JS_Eval(
                self.as_ptr(),
                code.as_ptr().cast(),
                source.len() as _,
                filename_c.as_ptr(),
                flags.bits() as i32,
            )
        };
        if unsafe { qjs::JS_IsException(value) } {
            return Ok(Err(Thrown));
        }
        Ok(Ok(value))
    }

    /// Read a buffer produced by [`Ctx::compile_to_bytecode`] and run it.
    ///
    /// With `load_only` the deserialized function or module record is returned
    /// without running it. Otherwise the result is settled like
    /// [`Ctx::eval`]: a module yields its namespace, a script its value, and a
    /// rejection becomes an exception handle.
    pub fn evaluate_bytecode(&self, bytes: &[u8], load_only: bool) -> Result<OwnedHandle<'js>> {
        let ctx = self.as_ptr();
        let value = unsafe {
            qjs::JS_ReadObject(
                ctx,
                bytes.as_ptr(),
                bytes.len() as _,
                qjs::JS_READ_OBJ_BYTECODE as i32,
            )
        };
        if unsafe { qjs::JS_IsException(value) } {
            return self.exception_handle();
        }
        if load_only {
            return self.wrap(value);
        }

        if unsafe { qjs::JS_VALUE_GET_TAG(value) } != qjs::JS_TAG_MODULE {
            let result = unsafe { qjs::JS_EvalFunction(ctx, value) };
            return self.wrap(self.settle(result, Unit::Script));
        }

        let module_ptr = unsafe { qjs::JS_VALUE_GET_PTR(value) }.cast();
        let Some(module) = ModuleDef::from_ptr(module_ptr) else {
            unsafe { qjs::JS_FreeValue(ctx, value) };
            return self.wrap(self.throw_type_error("Module compiled to null"));
        };
        if unsafe { qjs::JS_ResolveModule(ctx, value) } < 0 {
            unsafe { qjs::JS_FreeValue(ctx, value) };
            return self.exception_handle();
        }
        let name = self.module_name(module);
        if let Err(Thrown) = set_import_meta(*self, module, &name, true) {
            unsafe { qjs::JS_FreeValue(ctx, value) };
            return self.exception_handle();
        }
        tracing::trace!(module = name, "evaluate bytecode module");
        let result = unsafe { qjs::JS_EvalFunction(ctx, value) };
        self.wrap(self.settle(result, Unit::Module(module)))
    }
}

/// Short-lived context that owns whatever a compilation leaves behind.
///
/// It shares the runtime (and so the host, loader and class registry) with
/// the context it was made for, and carries that context's opaque pointer
/// so C callbacks still see their caller.
struct ScratchContext {
    raw: NonNull<qjs::JSContext>,
}

impl ScratchContext {
    fn new(parent: Ctx<'_>) -> Result<ScratchContext> {
        let raw = unsafe { qjs::JS_NewContext(parent.runtime_ptr()) };
        let raw = NonNull::new(raw).ok_or(BridgeError::ContextCreation)?;
        let opaque = unsafe { qjs::JS_GetContextOpaque(parent.as_ptr()) };
        unsafe { qjs::JS_SetContextOpaque(raw.as_ptr(), opaque) };
        Ok(ScratchContext { raw })
    }

    fn ctx(&self) -> Ctx<'_> {
        // SAFETY: the context lives until self is dropped.
        unsafe { Ctx::from_raw(self.raw.as_ptr()) }
    }
}

impl Drop for ScratchContext {
    fn drop(&mut self) {
        unsafe { qjs::JS_FreeContext(self.raw.as_ptr()) };
    }
}
