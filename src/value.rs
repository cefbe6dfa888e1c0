//! Value factory and inspection.
//!
//! Every constructor returns an [`OwnedHandle`]; every inspector borrows one.
//! Script exceptions come back as exception handles (see
//! [`OwnedHandle::is_exception`]) rather than Rust errors, except where an
//! operation returns a plain Rust value.

use std::ffi::{CStr, CString, c_char};
use std::ptr;

use rquickjs::qjs;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, HostError, JsException, Result, Thrown};
use crate::handle::{Constant, OwnedHandle};
use crate::runtime::Ctx;

/// Settlement state of a native promise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromiseState {
    NotAPromise,
    Pending,
    Fulfilled,
    Rejected,
}

impl PromiseState {
    pub(crate) fn of(ctx: *mut qjs::JSContext, value: qjs::JSValue) -> PromiseState {
        match unsafe { qjs::JS_PromiseState(ctx, value) } {
            qjs::JSPromiseStateEnum_JS_PROMISE_PENDING => PromiseState::Pending,
            qjs::JSPromiseStateEnum_JS_PROMISE_FULFILLED => PromiseState::Fulfilled,
            qjs::JSPromiseStateEnum_JS_PROMISE_REJECTED => PromiseState::Rejected,
            _ => PromiseState::NotAPromise,
        }
    }
}

/// Equality algorithm for [`Ctx::is_equal`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Equality {
    /// `===`
    Strict,
    /// `Object.is`
    SameValue,
    /// `Array.prototype.includes`
    SameValueZero,
    /// `==`, may run script
    Loose,
}

/// Flags for [`Ctx::define_prop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyFlags {
    pub configurable: bool,
    pub writable: bool,
    pub enumerable: bool,
}

impl PropertyFlags {
    pub const DEFAULT: PropertyFlags = PropertyFlags {
        configurable: true,
        writable: true,
        enumerable: true,
    };

    fn bits(self) -> i32 {
        let mut bits = 0;
        if self.configurable {
            bits |= qjs::JS_PROP_CONFIGURABLE;
        }
        if self.writable {
            bits |= qjs::JS_PROP_WRITABLE;
        }
        if self.enumerable {
            bits |= qjs::JS_PROP_ENUMERABLE;
        }
        bits as i32
    }
}

impl Default for PropertyFlags {
    fn default() -> Self {
        PropertyFlags::DEFAULT
    }
}

/// How a finished handle should be read by the host
#[derive(Debug)]
pub enum Completion<'js> {
    /// The exception, already taken off the context
    Exception(JsException),
    Value(OwnedHandle<'js>),
    /// A promise that has not settled yet; drive the job queue and look again
    Pending(OwnedHandle<'js>),
}

impl<'js> OwnedHandle<'js> {
    /// Turn an exception handle into [`BridgeError::Exception`]
    pub fn into_result(self) -> Result<OwnedHandle<'js>> {
        if self.is_exception() {
            Err(BridgeError::Exception(self.ctx().take_exception()))
        } else {
            Ok(self)
        }
    }

    pub fn completion(self) -> Completion<'js> {
        let ctx = self.ctx();
        if self.is_exception() {
            return Completion::Exception(ctx.take_exception());
        }
        if PromiseState::of(ctx.as_ptr(), self.value()) == PromiseState::Pending {
            Completion::Pending(self)
        } else {
            Completion::Value(self)
        }
    }
}

impl<'js> Ctx<'js> {
    // ------------------------------------------------------------------
    // Constants and constructors
    // ------------------------------------------------------------------

    pub fn constant(&self, constant: Constant) -> Result<OwnedHandle<'js>> {
        self.wrap(constant.value())
    }

    pub fn undefined(&self) -> Result<OwnedHandle<'js>> {
        self.constant(Constant::Undefined)
    }

    pub fn null(&self) -> Result<OwnedHandle<'js>> {
        self.constant(Constant::Null)
    }

    pub fn boolean(&self, value: bool) -> Result<OwnedHandle<'js>> {
        self.constant(Constant::from_bool(value))
    }

    pub fn new_float64(&self, value: f64) -> Result<OwnedHandle<'js>> {
        self.wrap(qjs::JS_NewFloat64(value))
    }

    pub fn new_string(&self, value: &str) -> Result<OwnedHandle<'js>> {
        let raw =
            unsafe { qjs::JS_NewStringLen(self.as_ptr(), value.as_ptr().cast(), value.len() as _) };
        self.wrap(raw)
    }

    pub fn new_object(&self) -> Result<OwnedHandle<'js>> {
        self.wrap(unsafe { qjs::JS_NewObject(self.as_ptr()) })
    }

    pub fn new_object_proto(&self, proto: &OwnedHandle<'js>) -> Result<OwnedHandle<'js>> {
        self.wrap(unsafe { qjs::JS_NewObjectProto(self.as_ptr(), proto.value()) })
    }

    pub fn new_array(&self) -> Result<OwnedHandle<'js>> {
        self.wrap(unsafe { qjs::JS_NewArray(self.as_ptr()) })
    }

    pub fn new_array_buffer(&self, bytes: &[u8]) -> Result<OwnedHandle<'js>> {
        let buffer =
            unsafe { qjs::JS_NewArrayBufferCopy(self.as_ptr(), bytes.as_ptr(), bytes.len() as _) };
        self.wrap(buffer)
    }

    pub fn new_bigint(&self, value: i64) -> Result<OwnedHandle<'js>> {
        self.wrap(unsafe { qjs::JS_NewBigInt64(self.as_ptr(), value) })
    }

    pub fn new_biguint(&self, value: u64) -> Result<OwnedHandle<'js>> {
        self.wrap(unsafe { qjs::JS_NewBigUint64(self.as_ptr(), value) })
    }

    /// A `Date` at `epoch_ms` milliseconds since the Unix epoch
    pub fn new_date(&self, epoch_ms: f64) -> Result<OwnedHandle<'js>> {
        self.wrap(unsafe { qjs::JS_NewDate(self.as_ptr(), epoch_ms) })
    }

    /// A new symbol; `global` registers it in the `Symbol.for` registry
    pub fn new_symbol(&self, description: &str, global: bool) -> Result<OwnedHandle<'js>> {
        let description = c_string(description)?;
        self.wrap(unsafe { qjs::JS_NewSymbol(self.as_ptr(), description.as_ptr(), global) })
    }

    /// An empty `Error` instance
    pub fn new_error(&self) -> Result<OwnedHandle<'js>> {
        self.wrap(unsafe { qjs::JS_NewError(self.as_ptr()) })
    }

    /// An `Error` with `name` and `message` set
    pub fn new_error_with(&self, name: &str, message: &str) -> Result<OwnedHandle<'js>> {
        let error = self.new_error()?;
        self.set_prop_str(&error, "name", &self.new_string(name)?)?;
        self.set_prop_str(&error, "message", &self.new_string(message)?)?;
        Ok(error)
    }

    pub fn global_object(&self) -> Result<OwnedHandle<'js>> {
        self.wrap(unsafe { qjs::JS_GetGlobalObject(self.as_ptr()) })
    }

    /// A pending promise with its `resolve` and `reject` functions
    pub fn new_promise_capability(
        &self,
    ) -> Result<(OwnedHandle<'js>, OwnedHandle<'js>, OwnedHandle<'js>)> {
        let mut funcs = [qjs::JS_UNDEFINED; 2];
        let promise = unsafe { qjs::JS_NewPromiseCapability(self.as_ptr(), funcs.as_mut_ptr()) };
        let [resolve, reject] = funcs;
        let promise = self.wrap(promise)?.into_result()?;
        Ok((promise, self.wrap(resolve)?, self.wrap(reject)?))
    }

    pub fn parse_json(&self, json: &str, filename: &str) -> Result<OwnedHandle<'js>> {
        let source = nul_terminated(json);
        let filename = c_string(filename)?;
        self.wrap(unsafe {
            qjs::JS_ParseJSON(
                self.as_ptr(),
                source.as_ptr().cast(),
                json.len() as _,
                filename.as_ptr(),
            )
        })
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn get_float64(&self, value: &OwnedHandle<'js>) -> Result<f64> {
        let mut number = 0.0;
        let status = unsafe { qjs::JS_ToFloat64(self.as_ptr(), &mut number, value.value()) };
        if status < 0 {
            return Err(BridgeError::Exception(self.take_exception()));
        }
        Ok(number)
    }

    pub fn get_bool(&self, value: &OwnedHandle<'js>) -> Result<bool> {
        let status = unsafe { qjs::JS_ToBool(self.as_ptr(), value.value()) };
        if status < 0 {
            return Err(BridgeError::Exception(self.take_exception()));
        }
        Ok(status != 0)
    }

    /// `String(value)`
    pub fn to_string(&self, value: &OwnedHandle<'js>) -> Result<String> {
        self.string_of(value.value())
            .map_err(|Thrown| BridgeError::Exception(self.take_exception()))?
    }

    pub fn type_of(&self, value: &OwnedHandle<'js>) -> &'static str {
        type_name(self.as_ptr(), value.value())
    }

    pub fn is_error(&self, value: &OwnedHandle<'js>) -> bool {
        unsafe { qjs::JS_IsError(value.value()) }
    }

    pub fn is_array(&self, value: &OwnedHandle<'js>) -> bool {
        unsafe { qjs::JS_IsArray(value.value()) }
    }

    pub fn is_function(&self, value: &OwnedHandle<'js>) -> bool {
        unsafe { qjs::JS_IsFunction(self.as_ptr(), value.value()) }
    }

    pub fn is_promise(&self, value: &OwnedHandle<'js>) -> bool {
        unsafe { qjs::JS_IsPromise(value.value()) }
    }

    pub fn is_date(&self, value: &OwnedHandle<'js>) -> bool {
        unsafe { qjs::JS_IsDate(value.value()) }
    }

    /// `value instanceof constructor`; throws when `constructor` is not callable
    pub fn is_instance_of(
        &self,
        value: &OwnedHandle<'js>,
        constructor: &OwnedHandle<'js>,
    ) -> Result<bool> {
        let status =
            unsafe { qjs::JS_IsInstanceOf(self.as_ptr(), value.value(), constructor.value()) };
        if status < 0 {
            return Err(BridgeError::Exception(self.take_exception()));
        }
        Ok(status != 0)
    }

    /// Whether `value` is a symbol from the `Symbol.for` registry
    pub fn is_global_symbol(&self, value: &OwnedHandle<'js>) -> Result<bool> {
        if !unsafe { qjs::JS_IsSymbol(value.value()) } {
            return Ok(false);
        }
        Ok(self.registry_key(value)?.is_some())
    }

    /// Registry key of a global symbol, otherwise its description (empty
    /// when it has none). Throws a `TypeError` for non-symbols.
    pub fn symbol_description_or_key(&self, value: &OwnedHandle<'js>) -> Result<String> {
        if !unsafe { qjs::JS_IsSymbol(value.value()) } {
            self.throw_type_error("Not a symbol");
            return Err(BridgeError::Exception(self.take_exception()));
        }
        if let Some(key) = self.registry_key(value)? {
            return Ok(key);
        }
        let description = self.wrap(unsafe {
            qjs::JS_GetPropertyStr(self.as_ptr(), value.value(), c"description".as_ptr())
        })?;
        let description = description.into_result()?;
        if unsafe { qjs::JS_IsUndefined(description.value()) } {
            return Ok(String::new());
        }
        self.to_string(&description)
    }

    /// `Symbol.keyFor(symbol)`
    fn registry_key(&self, symbol: &OwnedHandle<'js>) -> Result<Option<String>> {
        let ctx = self.as_ptr();
        let global = self.global_object()?;
        let constructor = self
            .wrap(unsafe { qjs::JS_GetPropertyStr(ctx, global.value(), c"Symbol".as_ptr()) })?
            .into_result()?;
        let key_for = self
            .wrap(unsafe { qjs::JS_GetPropertyStr(ctx, constructor.value(), c"keyFor".as_ptr()) })?
            .into_result()?;
        let key = self.call(&key_for, &constructor, &[symbol])?.into_result()?;
        if unsafe { qjs::JS_IsUndefined(key.value()) } {
            return Ok(None);
        }
        self.to_string(&key).map(Some)
    }

    pub fn promise_state(&self, value: &OwnedHandle<'js>) -> PromiseState {
        PromiseState::of(self.as_ptr(), value.value())
    }

    /// Fulfillment value or rejection reason; `undefined` while pending
    pub fn promise_result(&self, value: &OwnedHandle<'js>) -> Result<OwnedHandle<'js>> {
        self.wrap(unsafe { qjs::JS_PromiseResult(self.as_ptr(), value.value()) })
    }

    /// `value.length` as an integer
    pub fn get_length(&self, value: &OwnedHandle<'js>) -> Result<i64> {
        let mut length = 0i64;
        let status = unsafe { qjs::JS_GetLength(self.as_ptr(), value.value(), &mut length) };
        if status < 0 {
            return Err(BridgeError::Exception(self.take_exception()));
        }
        Ok(length)
    }

    pub fn is_equal(
        &self,
        a: &OwnedHandle<'js>,
        b: &OwnedHandle<'js>,
        op: Equality,
    ) -> Result<bool> {
        let ctx = self.as_ptr();
        let (a, b) = (a.value(), b.value());
        match op {
            Equality::Strict => Ok(unsafe { qjs::JS_IsStrictEqual(ctx, a, b) }),
            Equality::SameValue => Ok(unsafe { qjs::JS_IsSameValue(ctx, a, b) }),
            Equality::SameValueZero => Ok(unsafe { qjs::JS_IsSameValueZero(ctx, a, b) }),
            Equality::Loose => {
                let status = unsafe { qjs::JS_IsEqual(ctx, a, b) };
                if status < 0 {
                    return Err(BridgeError::Exception(self.take_exception()));
                }
                Ok(status != 0)
            }
        }
    }

    /// `JSON.stringify(value, null, indent)`; `None` when the value has no
    /// JSON form (functions, `undefined`)
    pub fn to_json(&self, value: &OwnedHandle<'js>, indent: u32) -> Result<Option<String>> {
        let space = if indent == 0 {
            qjs::JS_UNDEFINED
        } else {
            qjs::JS_NewFloat64(f64::from(indent))
        };
        let json = unsafe {
            qjs::JS_JSONStringify(self.as_ptr(), value.value(), qjs::JS_UNDEFINED, space)
        };
        let json = self.wrap(json)?.into_result()?;
        if unsafe { qjs::JS_IsUndefined(json.value()) } {
            return Ok(None);
        }
        self.to_string(&json).map(Some)
    }

    // ------------------------------------------------------------------
    // Properties and calls
    // ------------------------------------------------------------------

    /// Look up `key` on `object`.
    ///
    /// `Ok(None)` when the property does not exist. A throwing getter yields
    /// an exception handle. The lookup is a single `[[Get]]` unless it
    /// produces `undefined`, in which case an existence check follows.
    pub fn get_prop(
        &self,
        object: &OwnedHandle<'js>,
        key: &OwnedHandle<'js>,
    ) -> Result<Option<OwnedHandle<'js>>> {
        let ctx = self.as_ptr();
        let atom = unsafe { qjs::JS_ValueToAtom(ctx, key.value()) };
        if atom == qjs::JS_ATOM_NULL {
            return self.exception_handle().map(Some);
        }
        let result = self.get_prop_atom(object, atom);
        unsafe { qjs::JS_FreeAtom(ctx, atom) };
        result
    }

    pub fn get_prop_str(
        &self,
        object: &OwnedHandle<'js>,
        name: &str,
    ) -> Result<Option<OwnedHandle<'js>>> {
        let ctx = self.as_ptr();
        let atom = unsafe { qjs::JS_NewAtomLen(ctx, name.as_ptr().cast(), name.len() as _) };
        if atom == qjs::JS_ATOM_NULL {
            return self.exception_handle().map(Some);
        }
        let result = self.get_prop_atom(object, atom);
        unsafe { qjs::JS_FreeAtom(ctx, atom) };
        result
    }

    pub fn get_prop_index(
        &self,
        object: &OwnedHandle<'js>,
        index: u32,
    ) -> Result<OwnedHandle<'js>> {
        self.wrap(unsafe { qjs::JS_GetPropertyUint32(self.as_ptr(), object.value(), index) })
    }

    /// One `[[Get]]`. Only a result of `undefined` on an object is followed
    /// by `[[HasProperty]]`, to tell a missing property from one holding
    /// `undefined`; a Proxy sees its `has` trap in that case alone.
    fn get_prop_atom(
        &self,
        object: &OwnedHandle<'js>,
        atom: qjs::JSAtom,
    ) -> Result<Option<OwnedHandle<'js>>> {
        let ctx = self.as_ptr();
        let obj = object.value();
        let value = self.wrap(unsafe { qjs::JS_GetProperty(ctx, obj, atom) })?;
        if !unsafe { qjs::JS_IsUndefined(value.value()) } {
            return Ok(Some(value));
        }
        if !unsafe { qjs::JS_IsObject(obj) } {
            return Ok(None);
        }
        match unsafe { qjs::JS_HasProperty(ctx, obj, atom) } {
            status if status < 0 => self.exception_handle().map(Some),
            0 => Ok(None),
            _ => Ok(Some(value)),
        }
    }

    /// `object[key] = value`; the caller keeps its handle to `value`
    pub fn set_prop(
        &self,
        object: &OwnedHandle<'js>,
        key: &OwnedHandle<'js>,
        value: &OwnedHandle<'js>,
    ) -> Result<()> {
        let ctx = self.as_ptr();
        let atom = unsafe { qjs::JS_ValueToAtom(ctx, key.value()) };
        if atom == qjs::JS_ATOM_NULL {
            return Err(BridgeError::Exception(self.take_exception()));
        }
        let status = unsafe {
            let status = qjs::JS_SetProperty(
                ctx,
                object.value(),
                atom,
                qjs::JS_DupValue(ctx, value.value()),
            );
            qjs::JS_FreeAtom(ctx, atom);
            status
        };
        self.status(status)
    }

    pub fn set_prop_str(
        &self,
        object: &OwnedHandle<'js>,
        name: &str,
        value: &OwnedHandle<'js>,
    ) -> Result<()> {
        let ctx = self.as_ptr();
        let name = c_string(name)?;
        let status = unsafe {
            qjs::JS_SetPropertyStr(
                ctx,
                object.value(),
                name.as_ptr(),
                qjs::JS_DupValue(ctx, value.value()),
            )
        };
        self.status(status)
    }

    pub fn set_prop_index(
        &self,
        object: &OwnedHandle<'js>,
        index: u32,
        value: &OwnedHandle<'js>,
    ) -> Result<()> {
        let ctx = self.as_ptr();
        let status = unsafe {
            qjs::JS_SetPropertyUint32(
                ctx,
                object.value(),
                index,
                qjs::JS_DupValue(ctx, value.value()),
            )
        };
        self.status(status)
    }

    pub fn define_prop(
        &self,
        object: &OwnedHandle<'js>,
        key: &OwnedHandle<'js>,
        value: &OwnedHandle<'js>,
        flags: PropertyFlags,
    ) -> Result<()> {
        let ctx = self.as_ptr();
        let atom = unsafe { qjs::JS_ValueToAtom(ctx, key.value()) };
        if atom == qjs::JS_ATOM_NULL {
            return Err(BridgeError::Exception(self.take_exception()));
        }
        let status = unsafe {
            let status = qjs::JS_DefinePropertyValue(
                ctx,
                object.value(),
                atom,
                qjs::JS_DupValue(ctx, value.value()),
                flags.bits(),
            );
            qjs::JS_FreeAtom(ctx, atom);
            status
        };
        self.status(status)
    }

    /// Own string keys of `object`, optionally only enumerable ones
    pub fn get_own_property_names(
        &self,
        object: &OwnedHandle<'js>,
        enumerable_only: bool,
    ) -> Result<Vec<String>> {
        let mut flags = qjs::JS_GPN_STRING_MASK;
        if enumerable_only {
            flags |= qjs::JS_GPN_ENUM_ONLY;
        }
        let keys = self
            .own_keys(object.value(), flags as i32)
            .map_err(|Thrown| BridgeError::Exception(self.take_exception()))?;
        Ok(keys)
    }

    /// `func.apply(this, args)`. A throw yields an exception handle.
    pub fn call(
        &self,
        func: &OwnedHandle<'js>,
        this: &OwnedHandle<'js>,
        args: &[&OwnedHandle<'js>],
    ) -> Result<OwnedHandle<'js>> {
        let mut argv: Vec<qjs::JSValue> = args.iter().map(|arg| arg.value()).collect();
        let result = unsafe {
            qjs::JS_Call(
                self.as_ptr(),
                func.value(),
                this.value(),
                argv.len() as i32,
                argv.as_mut_ptr(),
            )
        };
        self.wrap(result)
    }

    // ------------------------------------------------------------------
    // Exceptions
    // ------------------------------------------------------------------

    /// Make `error` the pending exception and return the exception marker
    pub fn throw(&self, error: &OwnedHandle<'js>) -> Result<OwnedHandle<'js>> {
        let ctx = self.as_ptr();
        let marker = unsafe { qjs::JS_Throw(ctx, qjs::JS_DupValue(ctx, error.value())) };
        self.wrap(marker)
    }

    /// Take the pending exception off the context.
    ///
    /// With `maybe_exception`, only does so if that handle is the exception
    /// marker. Returns `None` when there is nothing to take.
    pub fn get_last_error(
        &self,
        maybe_exception: Option<&OwnedHandle<'js>>,
    ) -> Result<Option<OwnedHandle<'js>>> {
        if let Some(handle) = maybe_exception {
            if !handle.is_exception() {
                return Ok(None);
            }
        }
        if !unsafe { qjs::JS_HasException(self.as_ptr()) } {
            return Ok(None);
        }
        self.wrap(unsafe { qjs::JS_GetException(self.as_ptr()) }).map(Some)
    }

    /// Take the pending exception and summarise it
    pub fn take_exception(&self) -> JsException {
        let ctx = self.as_ptr();
        if !unsafe { qjs::JS_HasException(ctx) } {
            return JsException {
                name: "InternalError".into(),
                message: "no exception pending".into(),
                stack: None,
            };
        }
        let exception = unsafe { qjs::JS_GetException(ctx) };
        let details = self.describe_exception(exception);
        unsafe { qjs::JS_FreeValue(ctx, exception) };
        details
    }

    /// Summarise a thrown value without touching the pending exception
    pub fn exception_details(&self, value: &OwnedHandle<'js>) -> JsException {
        self.describe_exception(value.value())
    }

    fn describe_exception(&self, value: qjs::JSValue) -> JsException {
        if unsafe { qjs::JS_IsObject(value) } {
            let name = self.string_prop(value, c"name").unwrap_or_default();
            let message = self.string_prop(value, c"message").unwrap_or_default();
            let stack = self.string_prop(value, c"stack");
            return JsException { name, message, stack };
        }
        let message = match self.string_of(value) {
            Ok(Ok(message)) => message,
            _ => {
                self.clear_exception();
                String::from("<unprintable exception>")
            }
        };
        JsException {
            name: String::new(),
            message,
            stack: None,
        }
    }

    /// `{name, message, stack, cause}` for errors (causes followed three deep),
    /// JSON for everything else
    pub fn dump(&self, value: &OwnedHandle<'js>) -> Result<String> {
        let dumped = self.dump_value(value.value(), 0);
        Ok(serde_json::to_string(&dumped)?)
    }

    fn dump_value(&self, value: qjs::JSValue, depth: u32) -> serde_json::Value {
        let ctx = self.as_ptr();
        if unsafe { qjs::JS_IsError(value) } {
            let mut map = serde_json::Map::new();
            for key in [c"name", c"message", c"stack"] {
                if let Some(text) = self.string_prop(value, key) {
                    map.insert(key.to_string_lossy().into_owned(), serde_json::Value::String(text));
                }
            }
            if depth < 3 {
                let cause = unsafe { qjs::JS_GetPropertyStr(ctx, value, c"cause".as_ptr()) };
                if unsafe { qjs::JS_IsException(cause) } {
                    self.clear_exception();
                } else {
                    if !unsafe { qjs::JS_IsUndefined(cause) } {
                        map.insert("cause".into(), self.dump_value(cause, depth + 1));
                    }
                    unsafe { qjs::JS_FreeValue(ctx, cause) };
                }
            }
            return serde_json::Value::Object(map);
        }
        let json =
            unsafe { qjs::JS_JSONStringify(ctx, value, qjs::JS_UNDEFINED, qjs::JS_UNDEFINED) };
        let parsed = if unsafe { qjs::JS_IsException(json) } {
            self.clear_exception();
            None
        } else if unsafe { qjs::JS_IsUndefined(json) } {
            None
        } else {
            match self.string_of(json) {
                Ok(Ok(text)) => serde_json::from_str(&text).ok(),
                Ok(Err(_)) => None,
                Err(Thrown) => {
                    self.clear_exception();
                    None
                }
            }
        };
        unsafe { qjs::JS_FreeValue(ctx, json) };
        parsed.unwrap_or_else(|| match self.string_of(value) {
            Ok(Ok(text)) => serde_json::Value::String(text),
            _ => {
                self.clear_exception();
                serde_json::Value::Null
            }
        })
    }

    pub(crate) fn clear_exception(&self) {
        let ctx = self.as_ptr();
        if unsafe { qjs::JS_HasException(ctx) } {
            unsafe { qjs::JS_FreeValue(ctx, qjs::JS_GetException(ctx)) };
        }
    }

    /// Box the pending exception marker
    pub(crate) fn exception_handle(&self) -> Result<OwnedHandle<'js>> {
        self.wrap(qjs::JS_EXCEPTION)
    }

    fn status(&self, status: i32) -> Result<()> {
        if status < 0 {
            return Err(BridgeError::Exception(self.take_exception()));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Raw helpers shared by the bridge modules
    // ------------------------------------------------------------------

    /// `String(value)`. The outer error means an exception is pending.
    pub(crate) fn string_of(&self, value: qjs::JSValue) -> Result<Result<String>, Thrown> {
        let ctx = self.as_ptr();
        let mut len = 0usize;
        let chars = unsafe { qjs::JS_ToCStringLen(ctx, &mut len, value) };
        if chars.is_null() {
            return Err(Thrown);
        }
        let bytes = unsafe { std::slice::from_raw_parts(chars.cast::<u8>(), len) };
        let text = String::from_utf8(bytes.to_vec()).map_err(|_| BridgeError::InvalidUtf8);
        unsafe { qjs::JS_FreeCString(ctx, chars) };
        Ok(text)
    }

    /// String value of `object[name]`, if present and printable
    pub(crate) fn string_prop(&self, object: qjs::JSValue, name: &CStr) -> Option<String> {
        let ctx = self.as_ptr();
        let value = unsafe { qjs::JS_GetPropertyStr(ctx, object, name.as_ptr()) };
        if unsafe { qjs::JS_IsException(value) } {
            self.clear_exception();
            return None;
        }
        let text = if unsafe { qjs::JS_IsUndefined(value) } {
            None
        } else {
            match self.string_of(value) {
                Ok(Ok(text)) => Some(text),
                Ok(Err(_)) => None,
                Err(Thrown) => {
                    self.clear_exception();
                    None
                }
            }
        };
        unsafe { qjs::JS_FreeValue(ctx, value) };
        text
    }

    /// Own keys of `object` matching `flags`, as strings
    pub(crate) fn own_keys(&self, object: qjs::JSValue, flags: i32) -> Result<Vec<String>, Thrown> {
        let ctx = self.as_ptr();
        let mut tab: *mut qjs::JSPropertyEnum = ptr::null_mut();
        let mut len = 0u32;
        if unsafe { qjs::JS_GetOwnPropertyNames(ctx, &mut tab, &mut len, object, flags) } < 0 {
            return Err(Thrown);
        }
        let entries = if tab.is_null() {
            &[][..]
        } else {
            unsafe { std::slice::from_raw_parts(tab, len as usize) }
        };
        let keys = entries
            .iter()
            .map(|entry| atom_to_string(ctx, entry.atom))
            .collect();
        unsafe { qjs::JS_FreePropertyEnum(ctx, tab, len) };
        Ok(keys)
    }

    /// Throw a `TypeError` with `message` and return the exception marker
    pub(crate) fn throw_type_error(&self, message: &str) -> qjs::JSValue {
        let message = sanitize(message);
        unsafe { qjs::JS_ThrowTypeError(self.as_ptr(), c"%s".as_ptr(), message.as_ptr()) }
    }

    pub(crate) fn throw_internal_error(&self, message: &str) -> qjs::JSValue {
        let message = sanitize(message);
        unsafe { qjs::JS_ThrowInternalError(self.as_ptr(), c"%s".as_ptr(), message.as_ptr()) }
    }

    /// Throw a host callback failure into script
    pub(crate) fn throw_host_error(&self, error: &HostError) -> qjs::JSValue {
        let message = error.to_string();
        if matches!(error, HostError::NullResult { .. }) {
            tracing::warn!(%message, "host contract violation");
        }
        if error.is_type_error() {
            return self.throw_type_error(&message);
        }
        let ctx = self.as_ptr();
        unsafe {
            let err = qjs::JS_NewError(ctx);
            if qjs::JS_IsException(err) {
                return err;
            }
            let text = qjs::JS_NewStringLen(ctx, message.as_ptr().cast(), message.len() as _);
            qjs::JS_DefinePropertyValueStr(
                ctx,
                err,
                c"message".as_ptr(),
                text,
                (qjs::JS_PROP_WRITABLE | qjs::JS_PROP_CONFIGURABLE) as i32,
            );
            qjs::JS_Throw(ctx, err)
        }
    }
}

/// Copy of `text` with a trailing NUL, for engine entry points that read one
/// past the given length
pub(crate) fn nul_terminated(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len() + 1);
    bytes.extend_from_slice(text.as_bytes());
    bytes.push(0);
    bytes
}

pub(crate) fn c_string(text: &str) -> Result<CString> {
    CString::new(text).map_err(|_| BridgeError::InteriorNul(text.to_string()))
}

/// Message text safe to pass through a C format string
fn sanitize(message: &str) -> CString {
    CString::new(message.replace('\0', "\\0")).unwrap_or_default()
}

pub(crate) fn atom_to_string(ctx: *mut qjs::JSContext, atom: qjs::JSAtom) -> String {
    let mut len: qjs::size_t = 0;
    let chars: *const c_char = unsafe { qjs::JS_AtomToCStringLen(ctx, &mut len, atom) };
    if chars.is_null() {
        return String::new();
    }
    let bytes = unsafe { std::slice::from_raw_parts(chars.cast::<u8>(), len as usize) };
    let text = String::from_utf8_lossy(bytes).into_owned();
    unsafe { qjs::JS_FreeCString(ctx, chars) };
    text
}

pub(crate) fn type_name(ctx: *mut qjs::JSContext, value: qjs::JSValue) -> &'static str {
    unsafe {
        if qjs::JS_IsUndefined(value) {
            "undefined"
        } else if qjs::JS_IsNull(value) {
            "object"
        } else if qjs::JS_IsBool(value) {
            "boolean"
        } else if qjs::JS_IsNumber(value) {
            "number"
        } else if qjs::JS_IsBigInt(value) {
            "bigint"
        } else if qjs::JS_IsString(value) {
            "string"
        } else if qjs::JS_IsSymbol(value) {
            "symbol"
        } else if qjs::JS_IsObject(value) {
            if qjs::JS_IsFunction(ctx, value) { "function" } else { "object" }
        } else if qjs::JS_VALUE_GET_TAG(value) == qjs::JS_TAG_MODULE {
            "module"
        } else {
            "undefined"
        }
    }
}
