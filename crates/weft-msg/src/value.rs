//! The property value tree.
//!
//! Envelope and extension properties form a recursive tree of typed
//! values. Unlike a plain JSON tree, integers and floats keep their
//! declared widths, raw byte buffers are first class, and an opaque
//! pointer variant lets in-process graphs pass references without
//! laundering them through integers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::MsgError;

/// Map node of a property tree, keyed by UTF-8 segment.
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// An opaque, process-local pointer value.
///
/// Carries an address between extensions of the same process. The
/// runtime never dereferences it and refuses to serialize it; whoever
/// stored the pointer is responsible for keeping the pointee alive and
/// for the safety of any dereference on the receiving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpaquePtr(usize);

impl OpaquePtr {
    /// Wraps a raw address.
    #[must_use]
    pub fn new(addr: *const ()) -> Self {
        Self(addr as usize)
    }

    /// Wraps the address of a reference.
    #[must_use]
    pub fn from_ref<T>(value: &T) -> Self {
        Self(std::ptr::from_ref(value) as usize)
    }

    /// Returns the address as a typed raw pointer.
    ///
    /// Dereferencing it is `unsafe` and only sound while the original
    /// pointee is alive in this process.
    #[must_use]
    pub fn as_ptr<T>(&self) -> *const T {
        self.0 as *const T
    }

    /// Returns the raw address.
    #[must_use]
    pub fn addr(&self) -> usize {
        self.0
    }
}

/// A typed property value.
///
/// The serde representation is externally tagged, so every non-pointer
/// value round-trips exactly through the envelope codec, including
/// integer widths, `f32` vs `f64`, and raw bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// Absent / null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integers of declared width.
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    /// Unsigned integers of declared width.
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
    /// UTF-8 string.
    String(String),
    /// Raw byte buffer.
    Bytes(Vec<u8>),
    /// Opaque process-local pointer. Never serialized.
    Ptr(#[serde(with = "opaque_ptr_serde")] OpaquePtr),
    /// Ordered list.
    Array(Vec<PropertyValue>),
    /// String-keyed map.
    Object(PropertyMap),
}

mod opaque_ptr_serde {
    use super::OpaquePtr;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(_: &OpaquePtr, _: S) -> Result<S::Ok, S::Error> {
        Err(serde::ser::Error::custom(
            "opaque pointer values are process-local and cannot be serialized",
        ))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(_: D) -> Result<OpaquePtr, D::Error> {
        Err(serde::de::Error::custom(
            "opaque pointer values cannot be deserialized",
        ))
    }
}

impl PropertyValue {
    /// Returns the name of this value's type, as used in
    /// `TYPE_MISMATCH` errors.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::I8(_) => "i8",
            Self::I16(_) => "i16",
            Self::I32(_) => "i32",
            Self::I64(_) => "i64",
            Self::U8(_) => "u8",
            Self::U16(_) => "u16",
            Self::U32(_) => "u32",
            Self::U64(_) => "u64",
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Ptr(_) => "ptr",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }

    /// Returns `true` if this value or any nested value is an opaque
    /// pointer.
    #[must_use]
    pub fn contains_opaque(&self) -> bool {
        match self {
            Self::Ptr(_) => true,
            Self::Array(items) => items.iter().any(PropertyValue::contains_opaque),
            Self::Object(map) => map.values().any(PropertyValue::contains_opaque),
            _ => false,
        }
    }

    /// Widens any integer variant to `i64`, if it fits.
    #[must_use]
    pub fn to_i64(&self) -> Option<i64> {
        match *self {
            Self::I8(v) => Some(v.into()),
            Self::I16(v) => Some(v.into()),
            Self::I32(v) => Some(v.into()),
            Self::I64(v) => Some(v),
            Self::U8(v) => Some(v.into()),
            Self::U16(v) => Some(v.into()),
            Self::U32(v) => Some(v.into()),
            Self::U64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Widens any non-negative integer variant to `u64`.
    #[must_use]
    pub fn to_u64(&self) -> Option<u64> {
        match *self {
            Self::U8(v) => Some(v.into()),
            Self::U16(v) => Some(v.into()),
            Self::U32(v) => Some(v.into()),
            Self::U64(v) => Some(v),
            Self::I8(v) => u64::try_from(v).ok(),
            Self::I16(v) => u64::try_from(v).ok(),
            Self::I32(v) => u64::try_from(v).ok(),
            Self::I64(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Returns a float from either float variant.
    #[must_use]
    pub fn to_f64(&self) -> Option<f64> {
        match *self {
            Self::F32(v) => Some(v.into()),
            Self::F64(v) => Some(v),
            _ => None,
        }
    }

    /// Boolean accessor.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// String accessor.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Byte buffer accessor.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Opaque pointer accessor.
    #[must_use]
    pub fn as_ptr(&self) -> Option<OpaquePtr> {
        match *self {
            Self::Ptr(p) => Some(p),
            _ => None,
        }
    }

    /// Array accessor.
    #[must_use]
    pub fn as_array(&self) -> Option<&[PropertyValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Object accessor.
    #[must_use]
    pub fn as_object(&self) -> Option<&PropertyMap> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Converts a JSON document into a property tree.
    ///
    /// JSON numbers map to the widest matching variant (`I64`, `U64`,
    /// or `F64`); narrower widths only arise from typed setters.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::I64(i)
                } else if let Some(u) = n.as_u64() {
                    Self::U64(u)
                } else {
                    Self::F64(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => {
                Self::Array(items.iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Converts a property tree into JSON.
    ///
    /// This is a configuration/debug surface, not the transport codec:
    /// integer widths collapse to JSON numbers and byte buffers become
    /// number arrays. Opaque pointers fail.
    ///
    /// # Errors
    ///
    /// [`MsgError::InvalidArgument`] if the tree contains a pointer, or
    /// a non-finite float (JSON cannot represent it).
    pub fn to_json(&self) -> Result<serde_json::Value, MsgError> {
        use serde_json::Value as J;
        Ok(match self {
            Self::Null => J::Null,
            Self::Bool(b) => J::Bool(*b),
            Self::I8(v) => J::from(*v),
            Self::I16(v) => J::from(*v),
            Self::I32(v) => J::from(*v),
            Self::I64(v) => J::from(*v),
            Self::U8(v) => J::from(*v),
            Self::U16(v) => J::from(*v),
            Self::U32(v) => J::from(*v),
            Self::U64(v) => J::from(*v),
            Self::F32(v) => serde_json::Number::from_f64(f64::from(*v))
                .map(J::Number)
                .ok_or_else(|| {
                    MsgError::InvalidArgument("non-finite float in JSON conversion".into())
                })?,
            Self::F64(v) => serde_json::Number::from_f64(*v).map(J::Number).ok_or_else(
                || MsgError::InvalidArgument("non-finite float in JSON conversion".into()),
            )?,
            Self::String(s) => J::String(s.clone()),
            Self::Bytes(b) => J::Array(b.iter().map(|&x| J::from(x)).collect()),
            Self::Ptr(_) => {
                return Err(MsgError::InvalidArgument(
                    "opaque pointer values have no JSON form".into(),
                ))
            }
            Self::Array(items) => J::Array(
                items
                    .iter()
                    .map(PropertyValue::to_json)
                    .collect::<Result<_, _>>()?,
            ),
            Self::Object(map) => J::Object(
                map.iter()
                    .map(|(k, v)| v.to_json().map(|j| (k.clone(), j)))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}

macro_rules! impl_value_from {
    ($($variant:ident: $ty:ty),* $(,)?) => {
        $(impl From<$ty> for PropertyValue {
            fn from(v: $ty) -> Self {
                Self::$variant(v)
            }
        })*
    };
}

impl_value_from! {
    Bool: bool,
    I8: i8, I16: i16, I32: i32, I64: i64,
    U8: u8, U16: u16, U32: u32, U64: u64,
    F32: f32, F64: f64,
    String: String,
    Bytes: Vec<u8>,
    Ptr: OpaquePtr,
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_widening() {
        assert_eq!(PropertyValue::I8(-5).to_i64(), Some(-5));
        assert_eq!(PropertyValue::U32(7).to_i64(), Some(7));
        assert_eq!(PropertyValue::U64(u64::MAX).to_i64(), None);
        assert_eq!(PropertyValue::I32(-1).to_u64(), None);
    }

    #[test]
    fn from_json_picks_widest_variant() {
        let v = PropertyValue::from_json(&serde_json::json!({
            "n": 1568,
            "f": 1.5,
            "s": "x",
            "a": [true, null]
        }));

        let map = v.as_object().expect("object");
        assert_eq!(map["n"], PropertyValue::I64(1568));
        assert_eq!(map["f"], PropertyValue::F64(1.5));
        assert_eq!(map["s"], PropertyValue::String("x".into()));
        assert_eq!(
            map["a"],
            PropertyValue::Array(vec![PropertyValue::Bool(true), PropertyValue::Null])
        );
    }

    #[test]
    fn json_roundtrip_for_plain_values() {
        let v = PropertyValue::from_json(&serde_json::json!({"a": {"b": [1, "two"]}}));
        let back = PropertyValue::from_json(&v.to_json().expect("to_json"));
        assert_eq!(v, back);
    }

    #[test]
    fn ptr_refuses_json() {
        let x = 42i32;
        let v = PropertyValue::Ptr(OpaquePtr::from_ref(&x));
        assert!(v.to_json().is_err());
    }

    #[test]
    fn contains_opaque_sees_nested() {
        let x = 1u8;
        let mut map = PropertyMap::new();
        map.insert(
            "inner".into(),
            PropertyValue::Array(vec![PropertyValue::Ptr(OpaquePtr::from_ref(&x))]),
        );
        assert!(PropertyValue::Object(map).contains_opaque());
        assert!(!PropertyValue::I32(1).contains_opaque());
    }

    #[test]
    fn opaque_ptr_roundtrips_address() {
        let x = 12344321i32;
        let ptr = OpaquePtr::from_ref(&x);
        let read = unsafe { *ptr.as_ptr::<i32>() };
        assert_eq!(read, 12344321);
    }
}
