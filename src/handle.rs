//! Value handles.
//!
//! A handle is the address of a bridge-owned heap cell holding exactly one
//! engine value. The host only ever sees these addresses; the engine's own
//! value representation never leaves the bridge.
//!
//! Ownership rules:
//!
//! - [`box_value`] moves one engine reference into a new cell.
//! - [`duplicate`] takes a second engine reference and puts it in a second,
//!   independently releasable cell.
//! - [`release`] drops the engine reference and frees the cell. It must run
//!   exactly once per cell.
//! - The four [`Constant`] slots are static. Their addresses may be handed out
//!   freely but releasing one is a protocol violation that aborts the process.
//!
//! [`OwnedHandle`] wraps all of this for Rust callers: dropping it releases,
//! and [`OwnedHandle::duplicate`] is the checked clone.

use std::alloc::{self, Layout};
use std::fmt;
use std::mem;
use std::ptr::{self, NonNull};

use rquickjs::qjs;

use crate::error::{BridgeError, Result};
use crate::runtime::Ctx;

/// Host-visible address of a value cell
pub type RawHandle = *mut qjs::JSValue;

#[repr(transparent)]
struct Slot(qjs::JSValue);

// SAFETY: the slots hold payload-free primitives and are never written.
unsafe impl Sync for Slot {}

static UNDEFINED: Slot = Slot(qjs::JS_UNDEFINED);
static NULL: Slot = Slot(qjs::JS_NULL);
static FALSE: Slot = Slot(qjs::JS_FALSE);
static TRUE: Slot = Slot(qjs::JS_TRUE);

/// The four statically allocated primitive values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constant {
    Undefined,
    Null,
    False,
    True,
}

impl Constant {
    pub const ALL: [Constant; 4] = [
        Constant::Undefined,
        Constant::Null,
        Constant::False,
        Constant::True,
    ];

    fn slot(self) -> &'static Slot {
        match self {
            Constant::Undefined => &UNDEFINED,
            Constant::Null => &NULL,
            Constant::False => &FALSE,
            Constant::True => &TRUE,
        }
    }

    /// Permanent address of this constant's slot. Never pass it to [`release`].
    pub fn handle(self) -> RawHandle {
        ptr::from_ref(&self.slot().0).cast_mut()
    }

    pub fn value(self) -> qjs::JSValue {
        self.slot().0
    }

    pub fn from_bool(value: bool) -> Self {
        if value { Constant::True } else { Constant::False }
    }

    /// The constant living at `handle`, if `handle` is one of the static slots
    pub fn at(handle: RawHandle) -> Option<Constant> {
        Constant::ALL
            .into_iter()
            .find(|constant| ptr::eq(constant.handle(), handle))
    }
}

/// Whether `handle` is one of the four static slots
pub fn is_sentinel(handle: RawHandle) -> bool {
    Constant::at(handle).is_some()
}

const CELL: Layout = Layout::new::<qjs::JSValue>();

/// Move `value` into a fresh heap cell.
///
/// Returns null if the cell cannot be allocated. The engine reference carried
/// by `value` is then still owned by the caller.
pub fn box_value(value: qjs::JSValue) -> RawHandle {
    // SAFETY: the layout has non-zero size.
    let cell = unsafe { alloc::alloc(CELL) }.cast::<qjs::JSValue>();
    if cell.is_null() {
        return ptr::null_mut();
    }
    // SAFETY: freshly allocated with the layout of one value.
    unsafe { cell.write(value) };
    cell
}

/// Like [`box_value`], but drops the engine reference when allocation fails
///
/// # Safety
/// `ctx` must be a live context owning `value`.
pub unsafe fn box_owned(ctx: *mut qjs::JSContext, value: qjs::JSValue) -> RawHandle {
    let cell = box_value(value);
    if cell.is_null() {
        unsafe { qjs::JS_FreeValue(ctx, value) };
    }
    cell
}

/// Read the value in a cell without affecting ownership.
///
/// # Safety
/// `handle` must be non-null, produced by [`box_value`] (or a [`Constant`]),
/// and not yet released.
pub unsafe fn unbox(handle: RawHandle) -> qjs::JSValue {
    unsafe { *handle }
}

/// New cell holding a new engine reference to the same value.
///
/// Returns null on allocation failure, leaving reference counts untouched.
///
/// # Safety
/// `ctx` must be live and `handle` valid as for [`unbox`].
pub unsafe fn duplicate(ctx: *mut qjs::JSContext, handle: RawHandle) -> RawHandle {
    let value = unsafe { qjs::JS_DupValue(ctx, *handle) };
    unsafe { box_owned(ctx, value) }
}

/// Drop the engine reference held by `handle` and free its cell.
///
/// Null is ignored. A [`Constant`] address aborts the process.
///
/// # Safety
/// `ctx` must be live and `handle` must not have been released before.
pub unsafe fn release(ctx: *mut qjs::JSContext, handle: RawHandle) {
    if handle.is_null() {
        return;
    }
    if let Some(constant) = Constant::at(handle) {
        sentinel_release(handle, constant);
    }
    unsafe {
        qjs::JS_FreeValue(ctx, *handle);
        alloc::dealloc(handle.cast(), CELL);
    }
}

/// [`release`] for callers holding only the runtime (finalizers, teardown)
///
/// # Safety
/// As for [`release`], with `rt` the runtime owning the value.
pub unsafe fn release_rt(rt: *mut qjs::JSRuntime, handle: RawHandle) {
    if handle.is_null() {
        return;
    }
    if let Some(constant) = Constant::at(handle) {
        sentinel_release(handle, constant);
    }
    unsafe {
        qjs::JS_FreeValueRT(rt, *handle);
        alloc::dealloc(handle.cast(), CELL);
    }
}

/// Move the value out of a cell and free the cell, keeping the engine reference.
///
/// Constants yield their value and are left in place. This is how a handle
/// returned by a host callback is consumed.
///
/// # Safety
/// `handle` must be valid as for [`unbox`] and is invalid afterwards.
pub unsafe fn take(handle: RawHandle) -> qjs::JSValue {
    if let Some(constant) = Constant::at(handle) {
        return constant.value();
    }
    unsafe {
        let value = *handle;
        alloc::dealloc(handle.cast(), CELL);
        value
    }
}

#[cold]
fn sentinel_release(handle: RawHandle, constant: Constant) -> ! {
    tracing::error!(address = ?handle, ?constant, "release called on a static value slot");
    eprintln!(
        "\n==================== HAKO PROTOCOL VIOLATION ====================\n\
         release() called on static {:?} slot at {:p}.\n\
         Static values are never heap allocated and must not be released.\n\
         Aborting to prevent memory corruption.\n\
         ==================================================================",
        constant, handle
    );
    std::process::abort()
}

/// Owning handle to an engine value.
///
/// Dropping releases the cell. Use [`OwnedHandle::duplicate`] to obtain a
/// second reference; there is deliberately no `Clone`.
pub struct OwnedHandle<'js> {
    ctx: Ctx<'js>,
    cell: NonNull<qjs::JSValue>,
}

impl<'js> OwnedHandle<'js> {
    /// Box `value`, taking over its engine reference
    pub(crate) fn new(ctx: Ctx<'js>, value: qjs::JSValue) -> Result<Self> {
        // SAFETY: ctx is live for 'js and owns value.
        let cell = unsafe { box_owned(ctx.as_ptr(), value) };
        NonNull::new(cell)
            .map(|cell| OwnedHandle { ctx, cell })
            .ok_or(BridgeError::OutOfMemory)
    }

    /// Take ownership of a raw handle.
    ///
    /// Returns `None` for null.
    ///
    /// # Safety
    /// `raw` must come from this context, must not be a [`Constant`] address
    /// (dropping the result would abort) and must not be released elsewhere.
    pub unsafe fn from_raw(ctx: Ctx<'js>, raw: RawHandle) -> Option<Self> {
        NonNull::new(raw).map(|cell| OwnedHandle { ctx, cell })
    }

    /// Give up ownership, returning the raw cell address
    pub fn into_raw(self) -> RawHandle {
        let raw = self.cell.as_ptr();
        mem::forget(self);
        raw
    }

    pub fn as_raw(&self) -> RawHandle {
        self.cell.as_ptr()
    }

    pub fn ctx(&self) -> Ctx<'js> {
        self.ctx
    }

    /// The wrapped value, borrowed
    pub(crate) fn value(&self) -> qjs::JSValue {
        // SAFETY: the cell is live while self exists.
        unsafe { unbox(self.cell.as_ptr()) }
    }

    /// Free the cell and hand the engine reference to the caller
    pub(crate) fn into_value(self) -> qjs::JSValue {
        // SAFETY: the cell is never a constant slot.
        unsafe { take(self.into_raw()) }
    }

    /// Second handle to the same value
    pub fn duplicate(&self) -> Result<OwnedHandle<'js>> {
        // SAFETY: ctx is live and the cell is valid.
        let raw = unsafe { duplicate(self.ctx.as_ptr(), self.cell.as_ptr()) };
        NonNull::new(raw)
            .map(|cell| OwnedHandle {
                ctx: self.ctx,
                cell,
            })
            .ok_or(BridgeError::OutOfMemory)
    }

    /// Whether this handle carries the exception marker
    pub fn is_exception(&self) -> bool {
        unsafe { qjs::JS_IsException(self.value()) }
    }
}

impl Drop for OwnedHandle<'_> {
    fn drop(&mut self) {
        // SAFETY: the cell is owned by self and released exactly once here.
        unsafe { release(self.ctx.as_ptr(), self.cell.as_ptr()) }
    }
}

impl fmt::Debug for OwnedHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedHandle")
            .field("cell", &self.cell)
            .field("tag", &unsafe { qjs::JS_VALUE_GET_TAG(self.value()) })
            .finish()
    }
}
