//! Binary data: array buffers, typed array views and the engine's binary
//! value serialization.

use rquickjs::qjs;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::handle::OwnedHandle;
use crate::runtime::Ctx;

/// Element type of a typed array view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypedArrayType {
    Uint8Clamped,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    BigInt64,
    BigUint64,
    Float16,
    Float32,
    Float64,
}

impl TypedArrayType {
    fn from_raw(kind: i32) -> Option<TypedArrayType> {
        let kind = u32::try_from(kind).ok()?;
        Some(match kind {
            qjs::JSTypedArrayEnum_JS_TYPED_ARRAY_UINT8C => TypedArrayType::Uint8Clamped,
            qjs::JSTypedArrayEnum_JS_TYPED_ARRAY_INT8 => TypedArrayType::Int8,
            qjs::JSTypedArrayEnum_JS_TYPED_ARRAY_UINT8 => TypedArrayType::Uint8,
            qjs::JSTypedArrayEnum_JS_TYPED_ARRAY_INT16 => TypedArrayType::Int16,
            qjs::JSTypedArrayEnum_JS_TYPED_ARRAY_UINT16 => TypedArrayType::Uint16,
            qjs::JSTypedArrayEnum_JS_TYPED_ARRAY_INT32 => TypedArrayType::Int32,
            qjs::JSTypedArrayEnum_JS_TYPED_ARRAY_UINT32 => TypedArrayType::Uint32,
            qjs::JSTypedArrayEnum_JS_TYPED_ARRAY_BIG_INT64 => TypedArrayType::BigInt64,
            qjs::JSTypedArrayEnum_JS_TYPED_ARRAY_BIG_UINT64 => TypedArrayType::BigUint64,
            qjs::JSTypedArrayEnum_JS_TYPED_ARRAY_FLOAT16 => TypedArrayType::Float16,
            qjs::JSTypedArrayEnum_JS_TYPED_ARRAY_FLOAT32 => TypedArrayType::Float32,
            qjs::JSTypedArrayEnum_JS_TYPED_ARRAY_FLOAT64 => TypedArrayType::Float64,
            _ => return None,
        })
    }

    /// Constructor name, e.g. `Uint8Array`
    pub fn name(self) -> &'static str {
        match self {
            TypedArrayType::Uint8Clamped => "Uint8ClampedArray",
            TypedArrayType::Int8 => "Int8Array",
            TypedArrayType::Uint8 => "Uint8Array",
            TypedArrayType::Int16 => "Int16Array",
            TypedArrayType::Uint16 => "Uint16Array",
            TypedArrayType::Int32 => "Int32Array",
            TypedArrayType::Uint32 => "Uint32Array",
            TypedArrayType::BigInt64 => "BigInt64Array",
            TypedArrayType::BigUint64 => "BigUint64Array",
            TypedArrayType::Float16 => "Float16Array",
            TypedArrayType::Float32 => "Float32Array",
            TypedArrayType::Float64 => "Float64Array",
        }
    }

    /// Stable code used across the C ABI; 0 means not a typed array
    pub fn code(self) -> i32 {
        match self {
            TypedArrayType::Uint8 => 1,
            TypedArrayType::Uint8Clamped => 2,
            TypedArrayType::Int8 => 3,
            TypedArrayType::Uint16 => 4,
            TypedArrayType::Int16 => 5,
            TypedArrayType::Uint32 => 6,
            TypedArrayType::Int32 => 7,
            TypedArrayType::Float32 => 8,
            TypedArrayType::Float64 => 9,
            TypedArrayType::BigInt64 => 10,
            TypedArrayType::BigUint64 => 11,
            TypedArrayType::Float16 => 12,
        }
    }
}

impl<'js> Ctx<'js> {
    pub fn is_array_buffer(&self, value: &OwnedHandle<'js>) -> bool {
        unsafe { qjs::JS_IsArrayBuffer(value.value()) }
    }

    /// Copy of the bytes of an `ArrayBuffer`.
    ///
    /// Throws a `TypeError` for anything else, including a detached buffer.
    pub fn copy_array_buffer(&self, value: &OwnedHandle<'js>) -> Result<Vec<u8>> {
        let mut len: qjs::size_t = 0;
        let data = unsafe { qjs::JS_GetArrayBuffer(self.as_ptr(), &mut len, value.value()) };
        if data.is_null() {
            if unsafe { qjs::JS_HasException(self.as_ptr()) } {
                return Err(BridgeError::Exception(self.take_exception()));
            }
            return Ok(Vec::new());
        }
        Ok(unsafe { std::slice::from_raw_parts(data, len as usize) }.to_vec())
    }

    pub fn is_typed_array(&self, value: &OwnedHandle<'js>) -> bool {
        self.typed_array_type(value).is_some()
    }

    /// Element type of a typed array, `None` for any other value
    pub fn typed_array_type(&self, value: &OwnedHandle<'js>) -> Option<TypedArrayType> {
        TypedArrayType::from_raw(unsafe { qjs::JS_GetTypedArrayType(value.value()) })
    }

    /// Copy of the bytes a `Uint8Array` views, honouring its offset and length
    pub fn copy_typed_array_buffer(&self, value: &OwnedHandle<'js>) -> Result<Vec<u8>> {
        if self.typed_array_type(value) != Some(TypedArrayType::Uint8) {
            self.throw_type_error("Not a Uint8Array");
            return Err(BridgeError::Exception(self.take_exception()));
        }
        let mut len: qjs::size_t = 0;
        let data = unsafe { qjs::JS_GetUint8Array(self.as_ptr(), &mut len, value.value()) };
        if data.is_null() {
            if unsafe { qjs::JS_HasException(self.as_ptr()) } {
                return Err(BridgeError::Exception(self.take_exception()));
            }
            return Ok(Vec::new());
        }
        Ok(unsafe { std::slice::from_raw_parts(data, len as usize) }.to_vec())
    }

    /// Serialize `value` with the engine's binary object format into a new
    /// `ArrayBuffer`. Values the format cannot hold yield an exception handle.
    pub fn bjson_encode(&self, value: &OwnedHandle<'js>) -> Result<OwnedHandle<'js>> {
        let ctx = self.as_ptr();
        let mut len: qjs::size_t = 0;
        let data = unsafe { qjs::JS_WriteObject(ctx, &mut len, value.value(), 0) };
        if data.is_null() {
            return self.exception_handle();
        }
        let buffer = unsafe { qjs::JS_NewArrayBufferCopy(ctx, data, len) };
        unsafe { qjs::js_free(ctx, data.cast()) };
        self.wrap(buffer)
    }

    /// Read back a value written by [`Ctx::bjson_encode`] from an
    /// `ArrayBuffer`. Malformed input yields an exception handle.
    pub fn bjson_decode(&self, buffer: &OwnedHandle<'js>) -> Result<OwnedHandle<'js>> {
        let ctx = self.as_ptr();
        let mut len: qjs::size_t = 0;
        let data = unsafe { qjs::JS_GetArrayBuffer(ctx, &mut len, buffer.value()) };
        if data.is_null() {
            if unsafe { qjs::JS_HasException(ctx) } {
                return self.exception_handle();
            }
            self.throw_type_error("empty buffer");
            return self.exception_handle();
        }
        self.wrap(unsafe { qjs::JS_ReadObject(ctx, data, len, 0) })
    }
}
