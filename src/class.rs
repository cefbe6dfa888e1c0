//! Native classes and functions.
//!
//! Script-visible functions and classes whose behavior lives in the host.
//! The engine only ever stores an integer (a function id or a class id); the
//! trampolines below turn each engine callback into a request for the
//! [`Host`](crate::Host) and its answer back into an engine value.
//!
//! Handle ownership is inverted at this boundary: the host *returns* a handle
//! from `call_function` and `construct`, and the bridge releases it after
//! taking the value out.

use std::ffi::{CString, c_int, c_void};
use std::fmt;
use std::mem;
use std::ptr::{self, NonNull};

use rquickjs::qjs;

use crate::error::{BridgeError, Result};
use crate::handle::OwnedHandle;
use crate::host::{Construct, Finalize, FunctionCall};
use crate::runtime::{Ctx, state_of};
use crate::value::c_string;

/// Engine class identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u32);

impl ClassId {
    pub const fn from_raw(id: u32) -> ClassId {
        ClassId(id)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A class registered through [`Ctx::new_class`]
#[derive(Debug)]
pub(crate) struct ClassEntry {
    pub(crate) name: CString,
    pub(crate) has_finalizer: bool,
}

type MagicFn = unsafe extern "C" fn(
    *mut qjs::JSContext,
    qjs::JSValue,
    c_int,
    *mut qjs::JSValue,
    c_int,
) -> qjs::JSValue;
type PlainFn = unsafe extern "C" fn(
    *mut qjs::JSContext,
    qjs::JSValue,
    c_int,
    *mut qjs::JSValue,
) -> qjs::JSValue;

/// The engine stores every native function under the plain signature and
/// calls the magic variant when registered with a `*_magic` prototype.
fn as_cfunction(function: MagicFn) -> qjs::JSCFunction {
    // SAFETY: identical ABI; the engine passes the extra argument for magic prototypes.
    Some(unsafe { mem::transmute::<MagicFn, PlainFn>(function) })
}

impl<'js> Ctx<'js> {
    /// Reserve a fresh class id on this runtime
    pub fn allocate_class_id(&self) -> ClassId {
        let mut id: qjs::JSClassID = 0;
        unsafe { qjs::JS_NewClassID(self.runtime_ptr(), &mut id) };
        ClassId(id)
    }

    /// Create a function that forwards every call to
    /// [`Host::call_function`](crate::Host::call_function) with `function_id`
    pub fn new_function(&self, function_id: i32, name: &str) -> Result<OwnedHandle<'js>> {
        let name_c = c_string(name)?;
        let function = unsafe {
            qjs::JS_NewCFunction2(
                self.as_ptr(),
                as_cfunction(function_trampoline),
                name_c.as_ptr(),
                0,
                qjs::JSCFunctionEnum_JS_CFUNC_generic_magic,
                function_id,
            )
        };
        tracing::trace!(function_id, name, "native function created");
        self.wrap(function)
    }

    /// Register class `class_id` and return its constructor.
    ///
    /// `new` on the constructor asks [`Host::construct`](crate::Host::construct)
    /// for the instance. With `has_finalizer`, collected instances are reported
    /// to [`Host::finalize`](crate::Host::finalize). Registering an id twice
    /// yields an `InternalError` exception handle.
    pub fn new_class(
        &self,
        class_id: ClassId,
        name: &str,
        has_finalizer: bool,
    ) -> Result<OwnedHandle<'js>> {
        let ctx = self.as_ptr();
        let rt = self.runtime_ptr();
        let name_c = c_string(name)?;
        let Some(state) = self.state() else {
            return self.wrap(self.throw_internal_error("classes require a bridge runtime"));
        };

        let existing = state
            .classes
            .borrow()
            .get(&class_id)
            .map(|entry| (entry.name.clone(), entry.has_finalizer));
        if existing.is_some() || unsafe { qjs::JS_IsRegisteredClass(rt, class_id.0) } {
            tracing::warn!(%class_id, name, ?existing, "class id already registered");
            return self.wrap(self.throw_internal_error(&format!(
                "Class '{}' (id {}) is already registered",
                name, class_id
            )));
        }

        let def = qjs::JSClassDef {
            class_name: name_c.as_ptr(),
            finalizer: if has_finalizer { Some(finalizer_trampoline) } else { None },
            gc_mark: None,
            call: None,
            exotic: ptr::null_mut(),
        };
        if unsafe { qjs::JS_NewClass(rt, class_id.0, &def) } < 0 {
            return self.wrap(self.throw_internal_error(&format!(
                "Failed to register class '{}' (id {})",
                name, class_id
            )));
        }
        state.classes.borrow_mut().insert(
            class_id,
            ClassEntry {
                name: name_c.clone(),
                has_finalizer,
            },
        );

        unsafe {
            let proto = qjs::JS_NewObject(ctx);
            if qjs::JS_IsException(proto) {
                return self.exception_handle();
            }
            let constructor = qjs::JS_NewCFunction2(
                ctx,
                as_cfunction(constructor_trampoline),
                name_c.as_ptr(),
                0,
                qjs::JSCFunctionEnum_JS_CFUNC_constructor_magic,
                class_id.0 as c_int,
            );
            if qjs::JS_IsException(constructor) {
                qjs::JS_FreeValue(ctx, proto);
                return self.exception_handle();
            }
            qjs::JS_SetConstructor(ctx, constructor, proto);
            // Takes over the proto reference.
            qjs::JS_SetClassProto(ctx, class_id.0, proto);
            tracing::debug!(%class_id, name, has_finalizer, "class registered");
            self.wrap(constructor)
        }
    }

    /// New instance of a registered class.
    ///
    /// The prototype is `new_target.prototype` when that is an object, so
    /// subclasses work; otherwise the class prototype.
    pub fn new_object_class(
        &self,
        class_id: ClassId,
        new_target: Option<&OwnedHandle<'js>>,
    ) -> Result<OwnedHandle<'js>> {
        let ctx = self.as_ptr();
        if !unsafe { qjs::JS_IsRegisteredClass(self.runtime_ptr(), class_id.0) } {
            let message = format!("Class id {} is not registered", class_id);
            return self.wrap(self.throw_type_error(&message));
        }
        let mut proto = qjs::JS_UNDEFINED;
        if let Some(target) = new_target.filter(|t| unsafe { qjs::JS_IsObject(t.value()) }) {
            proto = unsafe { qjs::JS_GetPropertyStr(ctx, target.value(), c"prototype".as_ptr()) };
            if unsafe { qjs::JS_IsException(proto) } {
                return self.exception_handle();
            }
        }
        if !unsafe { qjs::JS_IsObject(proto) } {
            unsafe { qjs::JS_FreeValue(ctx, proto) };
            proto = unsafe { qjs::JS_GetClassProto(ctx, class_id.0) };
        }
        let object = unsafe { qjs::JS_NewObjectProtoClass(ctx, proto, class_id.0) };
        unsafe { qjs::JS_FreeValue(ctx, proto) };
        self.wrap(object)
    }

    /// Attach a host pointer to an instance of `class_id`.
    ///
    /// Fails with a `TypeError` when `object` is not an instance of that class.
    pub fn set_opaque(
        &self,
        object: &OwnedHandle<'js>,
        class_id: ClassId,
        opaque: *mut c_void,
    ) -> Result<()> {
        let value = object.value();
        if unsafe { qjs::JS_GetClassID(value) } != class_id.0
            || unsafe { qjs::JS_SetOpaque(value, opaque) } < 0
        {
            self.throw_type_error(&format!("Object is not an instance of class {}", class_id));
            return Err(BridgeError::Exception(self.take_exception()));
        }
        Ok(())
    }

    /// Pointer stored by [`Ctx::set_opaque`], if `object` belongs to `class_id`
    /// and has one
    pub fn get_opaque(
        &self,
        object: &OwnedHandle<'js>,
        class_id: ClassId,
    ) -> Option<NonNull<c_void>> {
        NonNull::new(unsafe { qjs::JS_GetOpaque(object.value(), class_id.0) })
    }

    /// Class of an object; `None` for primitives
    pub fn class_id_of(&self, object: &OwnedHandle<'js>) -> Option<ClassId> {
        match unsafe { qjs::JS_GetClassID(object.value()) } {
            0 => None,
            id => Some(ClassId(id)),
        }
    }

    /// Handles for the receiver and arguments of a native call. Each is a
    /// fresh reference owned by the host request.
    fn call_handles(
        &self,
        this: qjs::JSValue,
        argc: c_int,
        argv: *mut qjs::JSValue,
    ) -> Result<(OwnedHandle<'js>, Vec<OwnedHandle<'js>>)> {
        let ctx = self.as_ptr();
        let this = self.wrap(unsafe { qjs::JS_DupValue(ctx, this) })?;
        let argv = if argv.is_null() || argc <= 0 {
            &[][..]
        } else {
            // SAFETY: the engine passes argc readable values.
            unsafe { std::slice::from_raw_parts(argv, argc as usize) }
        };
        let args = argv
            .iter()
            .map(|arg| self.wrap(unsafe { qjs::JS_DupValue(ctx, *arg) }))
            .collect::<Result<Vec<_>>>()?;
        Ok((this, args))
    }
}

unsafe extern "C" fn function_trampoline(
    ctx: *mut qjs::JSContext,
    this: qjs::JSValue,
    argc: c_int,
    argv: *mut qjs::JSValue,
    function_id: c_int,
) -> qjs::JSValue {
    // SAFETY: the engine only calls functions with a live context.
    let ctx = unsafe { Ctx::from_raw(ctx) };
    let Some(host) = ctx.host() else {
        return ctx.throw_internal_error("native function called on a foreign runtime");
    };
    let Ok((this, args)) = ctx.call_handles(this, argc, argv) else {
        return unsafe { qjs::JS_ThrowOutOfMemory(ctx.as_ptr()) };
    };
    let call = FunctionCall {
        this,
        args,
        function_id,
    };
    match host.call_function(ctx, call) {
        Ok(Some(result)) => result.into_value(),
        Ok(None) => qjs::JS_UNDEFINED,
        Err(error) => ctx.throw_host_error(&error),
    }
}

unsafe extern "C" fn constructor_trampoline(
    ctx: *mut qjs::JSContext,
    new_target: qjs::JSValue,
    argc: c_int,
    argv: *mut qjs::JSValue,
    class_id: c_int,
) -> qjs::JSValue {
    // SAFETY: the engine only calls constructors with a live context.
    let ctx = unsafe { Ctx::from_raw(ctx) };
    let Some(host) = ctx.host() else {
        return ctx.throw_internal_error("native class constructed on a foreign runtime");
    };
    let Ok((new_target, args)) = ctx.call_handles(new_target, argc, argv) else {
        return unsafe { qjs::JS_ThrowOutOfMemory(ctx.as_ptr()) };
    };
    let construct = Construct {
        new_target,
        args,
        class_id: ClassId(class_id as u32),
    };
    match host.construct(ctx, construct) {
        Ok(instance) => instance.into_value(),
        Err(error) => ctx.throw_host_error(&error),
    }
}

unsafe extern "C" fn finalizer_trampoline(rt: *mut qjs::JSRuntime, value: qjs::JSValue) {
    // Read before the host runs; the object is being torn down.
    let class_id = unsafe { qjs::JS_GetClassID(value) };
    let opaque = unsafe { qjs::JS_GetOpaque(value, class_id) };
    let Some(state) = (unsafe { state_of(rt) }) else {
        return;
    };
    state.host.finalize(Finalize {
        opaque,
        class_id: ClassId(class_id),
    });
}
