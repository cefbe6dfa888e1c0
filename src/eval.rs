//! Evaluation pipeline.
//!
//! Source goes in, exactly one handle comes out. Modules are compiled first,
//! checked, given their `import.meta`, then run; whatever the engine returns
//! is classified and, when it is an already settled promise, unwrapped so the
//! host sees the value (or the exception) directly.

use std::ops::{BitOr, BitOrAssign};
use std::ptr::NonNull;

use rquickjs::qjs;

use crate::error::{Result, Thrown};
use crate::handle::OwnedHandle;
use crate::module::ModuleDef;
use crate::runtime::Ctx;
use crate::value::{PromiseState, c_string, nul_terminated};

/// Flags passed through to the engine's evaluator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EvalFlags(u32);

impl EvalFlags {
    pub const GLOBAL: EvalFlags = EvalFlags(qjs::JS_EVAL_TYPE_GLOBAL);
    pub const MODULE: EvalFlags = EvalFlags(qjs::JS_EVAL_TYPE_MODULE);
    pub const STRICT: EvalFlags = EvalFlags(qjs::JS_EVAL_FLAG_STRICT);
    pub const COMPILE_ONLY: EvalFlags = EvalFlags(qjs::JS_EVAL_FLAG_COMPILE_ONLY);
    pub const BACKTRACE_BARRIER: EvalFlags = EvalFlags(qjs::JS_EVAL_FLAG_BACKTRACE_BARRIER);
    /// Allow top-level `await` in scripts; the result is then a promise
    pub const ASYNC: EvalFlags = EvalFlags(qjs::JS_EVAL_FLAG_ASYNC);

    pub const fn from_bits(bits: u32) -> EvalFlags {
        EvalFlags(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: EvalFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_module(self) -> bool {
        self.0 & qjs::JS_EVAL_TYPE_MASK == qjs::JS_EVAL_TYPE_MODULE
    }
}

impl BitOr for EvalFlags {
    type Output = EvalFlags;

    fn bitor(self, rhs: EvalFlags) -> EvalFlags {
        EvalFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for EvalFlags {
    fn bitor_assign(&mut self, rhs: EvalFlags) {
        self.0 |= rhs.0;
    }
}

/// File suffixes that always mean "module"
const MODULE_SUFFIXES: &[&str] = &[".mjs", ".mts"];

/// Decide the final evaluation flags.
///
/// With `detect` set and no module flag given, the source is a module if the
/// filename has a module suffix or [`detect_module`] finds module syntax.
/// Modules are always strict.
pub fn resolve_flags(source: &str, filename: &str, detect: bool, flags: EvalFlags) -> EvalFlags {
    let mut flags = flags;
    if detect && !flags.is_module() {
        let by_name = MODULE_SUFFIXES.iter().any(|suffix| filename.ends_with(suffix));
        if by_name || detect_module(source) {
            flags |= EvalFlags::MODULE;
        }
    }
    if flags.is_module() {
        flags |= EvalFlags::STRICT;
    }
    flags
}

/// Whether `source` uses module syntax: an `import` declaration (not
/// `import(...)` or `import.meta`) or an `export`.
///
/// Comments, string and regular expression literals and member names are
/// skipped. Template literal substitutions are treated as text.
pub fn detect_module(source: &str) -> bool {
    let bytes = source.as_bytes();
    let mut i = 0;
    let mut prev: Option<u8> = None;
    // Whether a `/` here starts a regular expression rather than a division
    let mut regex_allowed = true;
    while let Some(&b) = bytes.get(i) {
        match b {
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                i = skip_line_comment(bytes, i);
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_block_comment(bytes, i);
                continue;
            }
            b'/' if regex_allowed => {
                i = skip_regex(bytes, i);
                prev = Some(b'/');
                regex_allowed = false;
                continue;
            }
            b'"' | b'\'' | b'`' => {
                i = skip_string(bytes, i, b);
                prev = Some(b);
                regex_allowed = false;
                continue;
            }
            b if is_ident_start(b) => {
                let start = i;
                while bytes.get(i).is_some_and(|&c| is_ident_part(c)) {
                    i += 1;
                }
                let word = bytes.get(start..i).unwrap_or_default();
                let member = prev == Some(b'.');
                if !member {
                    let next = next_significant(bytes, i);
                    let is_key = next == Some(b':');
                    if word == b"export" && !is_key {
                        return true;
                    }
                    if word == b"import" && !is_key && !matches!(next, Some(b'(' | b'.')) {
                        return true;
                    }
                }
                prev = word.last().copied();
                regex_allowed = !member && REGEX_PREFIX_KEYWORDS.contains(&word);
                continue;
            }
            b if b.is_ascii_whitespace() => {}
            _ => {
                prev = Some(b);
                regex_allowed = !matches!(b, b')' | b']' | b'.' | b'0'..=b'9');
            }
        }
        i += 1;
    }
    false
}

/// Keywords after which a `/` begins a regular expression
const REGEX_PREFIX_KEYWORDS: &[&[u8]] = &[
    b"return",
    b"typeof",
    b"instanceof",
    b"in",
    b"of",
    b"new",
    b"delete",
    b"void",
    b"throw",
    b"case",
    b"do",
    b"else",
    b"yield",
    b"await",
];

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$' || b >= 0x80
}

fn is_ident_part(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit()
}

fn skip_line_comment(bytes: &[u8], mut i: usize) -> usize {
    while bytes.get(i).is_some_and(|&c| c != b'\n') {
        i += 1;
    }
    i
}

fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 2;
    while let Some(&c) = bytes.get(i) {
        if c == b'*' && bytes.get(i + 1) == Some(&b'/') {
            return i + 2;
        }
        i += 1;
    }
    i
}

fn skip_string(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while let Some(&c) = bytes.get(i) {
        match c {
            b'\\' => i += 2,
            c if c == quote => return i + 1,
            b'\n' if quote != b'`' => return i + 1,
            _ => i += 1,
        }
    }
    i
}

/// Skip a regular expression literal starting at the `/` at `start`,
/// including its flags. A `/` inside a character class does not end it.
fn skip_regex(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    let mut in_class = false;
    while let Some(&c) = bytes.get(i) {
        match c {
            b'\\' => i += 2,
            b'[' => {
                in_class = true;
                i += 1;
            }
            b']' => {
                in_class = false;
                i += 1;
            }
            b'/' if !in_class => {
                i += 1;
                while bytes.get(i).is_some_and(|&f| is_ident_part(f)) {
                    i += 1;
                }
                return i;
            }
            b'\n' => return i,
            _ => i += 1,
        }
    }
    i
}

/// First byte after `i` that is neither whitespace nor inside a comment
fn next_significant(bytes: &[u8], mut i: usize) -> Option<u8> {
    loop {
        match bytes.get(i) {
            Some(c) if c.is_ascii_whitespace() => i += 1,
            Some(b'/') if bytes.get(i + 1) == Some(&b'/') => i = skip_line_comment(bytes, i),
            Some(b'/') if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
            other => return other.copied(),
        }
    }
}

/// What kind of unit produced a raw evaluation result
#[derive(Debug, Clone, Copy)]
pub(crate) enum Unit<'js> {
    Script,
    Module(ModuleDef<'js>),
}

/// Raw evaluation result, before it is settled into one value
enum Classified {
    Exception,
    Plain(qjs::JSValue),
    Thenable(qjs::JSValue, PromiseState),
}

impl<'js> Ctx<'js> {
    /// Evaluate `source` and settle the result into a single handle.
    ///
    /// Script exceptions come back as an exception handle. `Err` is reserved
    /// for failures of the bridge itself (allocation, NUL in `filename`).
    pub fn eval(
        &self,
        source: &str,
        filename: &str,
        detect_module: bool,
        flags: EvalFlags,
    ) -> Result<OwnedHandle<'js>> {
        let flags = resolve_flags(source, filename, detect_module, flags);
        let filename_c = c_string(filename)?;
        tracing::trace!(filename, flags = flags.bits(), "eval");

        if flags.is_module() && !flags.contains(EvalFlags::COMPILE_ONLY) {
            let module = match self.compile_module(source, filename, flags, false) {
                Ok(module) => module,
                Err(Thrown) => return self.exception_handle(),
            };
            // SAFETY: consumes the compiled module value.
            let result = unsafe { qjs::JS_EvalFunction(self.as_ptr(), module.value) };
            return self.wrap(self.settle(result, Unit::Module(module.def)));
        }

        let code = nul_terminated(source);
        let result = unsafe {
            qjs::JS_Eval(
                self.as_ptr(),
                code.as_ptr().cast(),
                source.len() as _,
                filename_c.as_ptr(),
                flags.bits() as i32,
            )
        };
        if flags.contains(EvalFlags::COMPILE_ONLY) {
            return self.wrap(result);
        }
        self.wrap(self.settle(result, Unit::Script))
    }

    /// Compile `source` as a module without running it.
    ///
    /// On success the returned value carries one reference to the module.
    pub(crate) fn compile_module(
        &self,
        source: &str,
        name: &str,
        flags: EvalFlags,
        main: bool,
    ) -> Result<CompiledModule<'js>, Thrown> {
        let ctx = self.as_ptr();
        let Ok(name_c) = c_string(name) else {
            self.throw_type_error(&format!("Invalid module name '{}'", name.escape_debug()));
            return Err(Thrown);
        };
        let code = nul_terminated(source);
        let flags = flags | EvalFlags::MODULE | EvalFlags::STRICT | EvalFlags::COMPILE_ONLY;
        let value = unsafe {
            qjs::JS_Eval(
                ctx,
                code.as_ptr().cast(),
                source.len() as _,
                name_c.as_ptr(),
                flags.bits() as i32,
            )
        };
        if unsafe { qjs::JS_IsException(value) } {
            return Err(Thrown);
        }
        let module = self.module_of_value(value, name)?;
        if let Err(Thrown) = set_import_meta(*self, module.def, name, main) {
            unsafe { qjs::JS_FreeValue(ctx, module.value) };
            return Err(Thrown);
        }
        Ok(module)
    }

    /// Check that `value` is a compiled module. Consumes `value` on failure.
    pub(crate) fn module_of_value(
        &self,
        value: qjs::JSValue,
        name: &str,
    ) -> Result<CompiledModule<'js>, Thrown> {
        let ctx = self.as_ptr();
        if unsafe { qjs::JS_VALUE_GET_TAG(value) } != qjs::JS_TAG_MODULE {
            unsafe { qjs::JS_FreeValue(ctx, value) };
            self.throw_type_error(&format!("Module '{}' code compiled to non-module object", name));
            return Err(Thrown);
        }
        let ptr = unsafe { qjs::JS_VALUE_GET_PTR(value) }.cast::<qjs::JSModuleDef>();
        let Some(def) = ModuleDef::from_ptr(ptr) else {
            unsafe { qjs::JS_FreeValue(ctx, value) };
            self.throw_type_error("Module compiled to null");
            return Err(Thrown);
        };
        Ok(CompiledModule { value, def })
    }

    /// Turn a raw evaluation result into the one value the host receives.
    ///
    /// Takes ownership of `raw`; the result is owned by the caller and may be
    /// the exception marker.
    pub(crate) fn settle(&self, raw: qjs::JSValue, unit: Unit<'js>) -> qjs::JSValue {
        let ctx = self.as_ptr();
        match (self.classify(raw), unit) {
            (Classified::Exception, _) => raw,
            (Classified::Plain(value), Unit::Script) => value,
            (Classified::Plain(value), Unit::Module(module)) => {
                unsafe { qjs::JS_FreeValue(ctx, value) };
                module.namespace_raw(*self)
            }
            (Classified::Thenable(value, state), unit) => match (state, unit) {
                (PromiseState::Fulfilled, Unit::Script) => {
                    let result = unsafe { qjs::JS_PromiseResult(ctx, value) };
                    unsafe { qjs::JS_FreeValue(ctx, value) };
                    result
                }
                // A foreign thenable's state is unknown; treat it as fulfilled
                // and hand it back unchanged.
                (PromiseState::NotAPromise, Unit::Script) => value,
                (PromiseState::Fulfilled | PromiseState::NotAPromise, Unit::Module(module)) => {
                    unsafe { qjs::JS_FreeValue(ctx, value) };
                    module.namespace_raw(*self)
                }
                (PromiseState::Rejected, _) => unsafe {
                    let reason = qjs::JS_PromiseResult(ctx, value);
                    qjs::JS_FreeValue(ctx, value);
                    qjs::JS_Throw(ctx, reason)
                },
                (PromiseState::Pending, Unit::Script) => value,
                (PromiseState::Pending, Unit::Module(module)) => self.then_namespace(value, module),
            },
        }
    }

    fn classify(&self, raw: qjs::JSValue) -> Classified {
        if unsafe { qjs::JS_IsException(raw) } {
            return Classified::Exception;
        }
        if unsafe { qjs::JS_IsPromise(raw) } {
            return Classified::Thenable(raw, PromiseState::of(self.as_ptr(), raw));
        }
        if self.has_callable_then(raw) {
            return Classified::Thenable(raw, PromiseState::NotAPromise);
        }
        Classified::Plain(raw)
    }

    fn has_callable_then(&self, value: qjs::JSValue) -> bool {
        let ctx = self.as_ptr();
        if !unsafe { qjs::JS_IsObject(value) } {
            return false;
        }
        let then = unsafe { qjs::JS_GetPropertyStr(ctx, value, c"then".as_ptr()) };
        if unsafe { qjs::JS_IsException(then) } {
            self.clear_exception();
            return false;
        }
        let callable = unsafe { qjs::JS_IsFunction(ctx, then) };
        unsafe { qjs::JS_FreeValue(ctx, then) };
        callable
    }

    /// `pending.then(() => namespace)`, so the host's promise resolves to the
    /// module namespace rather than to the module body's completion value
    fn then_namespace(&self, pending: qjs::JSValue, module: ModuleDef<'js>) -> qjs::JSValue {
        let ctx = self.as_ptr();
        let mut namespace = module.namespace_raw(*self);
        if unsafe { qjs::JS_IsException(namespace) } {
            unsafe { qjs::JS_FreeValue(ctx, pending) };
            return namespace;
        }
        let on_fulfilled = unsafe {
            qjs::JS_NewCFunctionData(ctx, Some(return_data), 0, 0, 1, &mut namespace)
        };
        unsafe { qjs::JS_FreeValue(ctx, namespace) };
        if unsafe { qjs::JS_IsException(on_fulfilled) } {
            unsafe { qjs::JS_FreeValue(ctx, pending) };
            return on_fulfilled;
        }
        let mut args = [on_fulfilled];
        let derived = unsafe {
            let then = qjs::JS_NewAtom(ctx, c"then".as_ptr());
            let derived = qjs::JS_Invoke(ctx, pending, then, 1, args.as_mut_ptr());
            qjs::JS_FreeAtom(ctx, then);
            derived
        };
        unsafe {
            qjs::JS_FreeValue(ctx, on_fulfilled);
            qjs::JS_FreeValue(ctx, pending);
        }
        derived
    }
}

/// A freshly compiled module: the engine value plus its definition
pub(crate) struct CompiledModule<'js> {
    pub(crate) value: qjs::JSValue,
    pub(crate) def: ModuleDef<'js>,
}

unsafe extern "C" fn return_data(
    ctx: *mut qjs::JSContext,
    _this: qjs::JSValue,
    _argc: i32,
    _argv: *mut qjs::JSValue,
    _magic: i32,
    data: *mut qjs::JSValue,
) -> qjs::JSValue {
    // SAFETY: created with exactly one data slot.
    unsafe { qjs::JS_DupValue(ctx, *data) }
}

/// Populate `import.meta` the way file-based hosts expect: `url` (a `file://`
/// URL unless the name already has a scheme) and `main`.
pub(crate) fn set_import_meta(
    ctx: Ctx<'_>,
    module: ModuleDef<'_>,
    name: &str,
    main: bool,
) -> Result<(), Thrown> {
    let raw = ctx.as_ptr();
    let meta = unsafe { qjs::JS_GetImportMeta(raw, module.as_ptr()) };
    if unsafe { qjs::JS_IsException(meta) } {
        return Err(Thrown);
    }
    let url = if name.contains(':') {
        name.to_string()
    } else {
        format!("file://{}", name)
    };
    let status = unsafe {
        let url = qjs::JS_NewStringLen(raw, url.as_ptr().cast(), url.len() as _);
        let flags = qjs::JS_PROP_C_W_E as i32;
        let url_status = qjs::JS_DefinePropertyValueStr(raw, meta, c"url".as_ptr(), url, flags);
        let main = qjs::JS_MKVAL(qjs::JS_TAG_BOOL, i32::from(main));
        let main_status = qjs::JS_DefinePropertyValueStr(raw, meta, c"main".as_ptr(), main, flags);
        qjs::JS_FreeValue(raw, meta);
        url_status.min(main_status)
    };
    if status < 0 {
        return Err(Thrown);
    }
    Ok(())
}

impl<'js> ModuleDef<'js> {
    pub(crate) fn from_ptr(ptr: *mut qjs::JSModuleDef) -> Option<ModuleDef<'js>> {
        NonNull::new(ptr).map(ModuleDef::new)
    }

    pub(crate) fn namespace_raw(&self, ctx: Ctx<'js>) -> qjs::JSValue {
        unsafe { qjs::JS_GetModuleNamespace(ctx.as_ptr(), self.as_ptr()) }
    }
}
