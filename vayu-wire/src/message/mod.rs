//! Typed MAVLink messages and their field manifests
//!
//! A message type exposes a static [`MessageDescriptor`] listing its fields in
//! declaration order, plus conversion to and from a list of [`Value`]s in the
//! same order. [`MessageCodec`] turns that manifest into the wire layout:
//!
//! ```text
//! declaration:   a: u8, b: u32, c: [u16; 2], (ext) d: u8
//! wire order:    b (4) | c (2x2) | a (1) | d (ext, v2 only)
//! ```
//!
//! Message types are normally generated with [`mavlink_message!`](crate::mavlink_message).
//! Hand-written descriptors can be registered with [`MessageDef::dynamic`], which
//! decodes into [`DynamicMessage`].

mod codec;
mod macros;
mod names;

pub use codec::MessageCodec;
pub use names::{camel_to_snake, snake_to_camel};
pub(crate) use names::message_protocol_name;

use crate::error::{Error, Result};
use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Primitive wire types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
    Char,
}

impl FieldType {
    /// Size on the wire in bytes
    pub const fn size(self) -> usize {
        match self {
            FieldType::U8 | FieldType::I8 | FieldType::Char => 1,
            FieldType::U16 | FieldType::I16 => 2,
            FieldType::U32 | FieldType::I32 | FieldType::F32 => 4,
            FieldType::U64 | FieldType::I64 | FieldType::F64 => 8,
        }
    }

    /// Type name as written in MAVLink XML definitions
    pub const fn protocol_name(self) -> &'static str {
        match self {
            FieldType::U8 => "uint8_t",
            FieldType::I8 => "int8_t",
            FieldType::U16 => "uint16_t",
            FieldType::I16 => "int16_t",
            FieldType::U32 => "uint32_t",
            FieldType::I32 => "int32_t",
            FieldType::U64 => "uint64_t",
            FieldType::I64 => "int64_t",
            FieldType::F32 => "float",
            FieldType::F64 => "double",
            FieldType::Char => "char",
        }
    }

    /// Convert a numeric value to this type with `as` semantics
    pub fn cast(self, v: &Value) -> Option<Value> {
        if matches!(v, Value::F32(_) | Value::F64(_)) {
            let x = v.as_f64()?;
            return Some(match self {
                FieldType::U8 | FieldType::Char => Value::U8(x as u8),
                FieldType::I8 => Value::I8(x as i8),
                FieldType::U16 => Value::U16(x as u16),
                FieldType::I16 => Value::I16(x as i16),
                FieldType::U32 => Value::U32(x as u32),
                FieldType::I32 => Value::I32(x as i32),
                FieldType::U64 => Value::U64(x as u64),
                FieldType::I64 => Value::I64(x as i64),
                FieldType::F32 => Value::F32(x as f32),
                FieldType::F64 => Value::F64(x),
            });
        }
        let x = v.as_u64()?;
        Some(match self {
            FieldType::U8 | FieldType::Char => Value::U8(x as u8),
            FieldType::I8 => Value::I8(x as i8),
            FieldType::U16 => Value::U16(x as u16),
            FieldType::I16 => Value::I16(x as i16),
            FieldType::U32 => Value::U32(x as u32),
            FieldType::I32 => Value::I32(x as i32),
            FieldType::U64 => Value::U64(x),
            FieldType::I64 => Value::I64(x as i64),
            FieldType::F32 => Value::F32(v.as_f64()? as f32),
            FieldType::F64 => Value::F64(v.as_f64()?),
        })
    }

    /// Zero value of this type
    pub fn zero(self) -> Value {
        match self {
            FieldType::U8 | FieldType::Char => Value::U8(0),
            FieldType::I8 => Value::I8(0),
            FieldType::U16 => Value::U16(0),
            FieldType::I16 => Value::I16(0),
            FieldType::U32 => Value::U32(0),
            FieldType::I32 => Value::I32(0),
            FieldType::U64 => Value::U64(0),
            FieldType::I64 => Value::I64(0),
            FieldType::F32 => Value::F32(0.0),
            FieldType::F64 => Value::F64(0.0),
        }
    }
}

/// Shape of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Single primitive
    Scalar(FieldType),
    /// Fixed-length array of primitives
    Array(FieldType, usize),
    /// Character string with fixed capacity, NUL-terminated on the wire
    String(usize),
    /// Enum value carried as `logical`, written with width `wire`
    Enum {
        /// Program-side carrier type, must be `U64`
        logical: FieldType,
        /// On-wire representation
        wire: FieldType,
    },
}

impl FieldKind {
    /// Primitive written on the wire for each element
    pub const fn wire_type(self) -> FieldType {
        match self {
            FieldKind::Scalar(t) | FieldKind::Array(t, _) => t,
            FieldKind::String(_) => FieldType::Char,
            FieldKind::Enum { wire, .. } => wire,
        }
    }

    /// Element count for arrays and strings
    pub const fn array_len(self) -> Option<usize> {
        match self {
            FieldKind::Array(_, n) | FieldKind::String(n) => Some(n),
            _ => None,
        }
    }

    /// Total size on the wire in bytes
    pub const fn size(self) -> usize {
        match self.array_len() {
            Some(n) => self.wire_type().size() * n,
            None => self.wire_type().size(),
        }
    }

    /// Convert `v` to the value shape this field holds
    ///
    /// Scalars and enums accept any numeric value; arrays convert element
    /// by element; strings accept only strings.
    pub fn coerce(self, v: &Value) -> Option<Value> {
        match (self, v) {
            (FieldKind::Scalar(t), _) => t.cast(v),
            (FieldKind::Enum { logical, .. }, _) => logical.cast(v),
            (FieldKind::Array(t, _), Value::Array(items)) => items
                .iter()
                .map(|item| t.cast(item))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            (FieldKind::String(_), Value::String(_)) => Some(v.clone()),
            _ => None,
        }
    }

    /// Value used when the field is absent from the payload
    pub fn zero_value(self) -> Value {
        match self {
            FieldKind::Scalar(t) => t.zero(),
            FieldKind::Array(t, n) => Value::Array(vec![t.zero(); n]),
            FieldKind::String(_) => Value::String(String::new()),
            FieldKind::Enum { .. } => Value::U64(0),
        }
    }
}

/// One field of a message description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Program-side name
    pub name: &'static str,
    /// Explicit protocol-side name, when the derived one would be wrong
    pub protocol_name: Option<&'static str>,
    /// Wire shape
    pub kind: FieldKind,
    /// Appended after the v1 layout was frozen
    pub extension: bool,
}

impl FieldDescriptor {
    /// Protocol-side (snake_case) name
    pub fn protocol_name(&self) -> Cow<'static, str> {
        match self.protocol_name {
            Some(name) => Cow::Borrowed(name),
            None => Cow::Owned(camel_to_snake(self.name)),
        }
    }
}

/// Static description of a message type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageDescriptor {
    /// Type name, `Message` followed by the CamelCase protocol name
    pub name: &'static str,
    /// Message id (24 bits)
    pub id: u32,
    /// Fields in declaration order
    pub fields: &'static [FieldDescriptor],
}

/// A field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Array(Vec<Value>),
    String(String),
}

impl Value {
    /// Integer value widened to `u64`; signed values are sign-extended
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::U8(v) => Some(v as u64),
            Value::U16(v) => Some(v as u64),
            Value::U32(v) => Some(v as u64),
            Value::U64(v) => Some(v),
            Value::I8(v) => Some(v as i64 as u64),
            Value::I16(v) => Some(v as i64 as u64),
            Value::I32(v) => Some(v as i64 as u64),
            Value::I64(v) => Some(v as u64),
            _ => None,
        }
    }

    /// Numeric value as `f64`
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::F32(v) => Some(v as f64),
            Value::F64(v) => Some(v),
            Value::I8(v) => Some(v as f64),
            Value::I16(v) => Some(v as f64),
            Value::I32(v) => Some(v as f64),
            Value::I64(v) => Some(v as f64),
            _ => self.as_u64().map(|v| v as f64),
        }
    }
}

/// Primitive usable as a message field or array element
pub trait WireScalar: Copy + Default {
    /// Wire type
    const TYPE: FieldType;
    /// Wrap into a [`Value`]
    fn into_value(self) -> Value;
    /// Unwrap from a [`Value`] of the same type
    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! impl_wire_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl WireScalar for $ty {
                const TYPE: FieldType = FieldType::$variant;

                #[inline]
                fn into_value(self) -> Value {
                    Value::$variant(self)
                }

                #[inline]
                fn from_value(value: &Value) -> Option<Self> {
                    match *value {
                        Value::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }

            impl WireField for $ty {
                const KIND: FieldKind = FieldKind::Scalar(FieldType::$variant);

                #[inline]
                fn to_value(&self) -> Value {
                    Value::$variant(*self)
                }

                #[inline]
                fn from_value(value: Value) -> Option<Self> {
                    <$ty as WireScalar>::from_value(&value)
                }
            }
        )*
    };
}

/// Program-side type of a message field
pub trait WireField: Sized {
    /// Wire shape
    const KIND: FieldKind;
    /// Convert to a [`Value`]
    fn to_value(&self) -> Value;
    /// Convert from a [`Value`] produced by the codec
    fn from_value(value: Value) -> Option<Self>;
}

impl_wire_scalar! {
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    u64 => U64,
    i64 => I64,
    f32 => F32,
    f64 => F64,
}

impl<T: WireScalar, const N: usize> WireField for [T; N] {
    const KIND: FieldKind = FieldKind::Array(T::TYPE, N);

    fn to_value(&self) -> Value {
        Value::Array(self.iter().map(|v| v.into_value()).collect())
    }

    fn from_value(value: Value) -> Option<Self> {
        let Value::Array(items) = value else {
            return None;
        };
        if items.len() != N {
            return None;
        }
        let mut out = [T::default(); N];
        for (slot, item) in out.iter_mut().zip(items.iter()) {
            *slot = T::from_value(item)?;
        }
        Some(out)
    }
}

/// String with a fixed wire capacity of `N` bytes
///
/// Longer input is cut at the last character boundary that fits.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FixedString<const N: usize>(String);

impl<const N: usize> FixedString<N> {
    /// Capacity in bytes
    pub const CAPACITY: usize = N;

    /// Create from anything string-like, truncating to capacity
    pub fn new(s: impl Into<String>) -> Self {
        let mut s = s.into();
        if s.len() > N {
            let mut end = N;
            while !s.is_char_boundary(end) {
                end -= 1;
            }
            s.truncate(end);
        }
        Self(s)
    }

    /// Borrow as `&str`
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unwrap into the inner `String`
    pub fn into_string(self) -> String {
        self.0
    }
}

impl<const N: usize> Deref for FixedString<N> {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl<const N: usize> From<&str> for FixedString<N> {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl<const N: usize> From<String> for FixedString<N> {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl<const N: usize> fmt::Debug for FixedString<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl<const N: usize> fmt::Display for FixedString<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<const N: usize> WireField for FixedString<N> {
    const KIND: FieldKind = FieldKind::String(N);

    fn to_value(&self) -> Value {
        Value::String(self.0.clone())
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::new(s)),
            _ => None,
        }
    }
}

/// A MAVLink message
///
/// Implemented by [`mavlink_message!`](crate::mavlink_message) types and by
/// [`DynamicMessage`].
pub trait Message: Any + fmt::Debug + Send + Sync {
    /// Static description of this message type
    fn descriptor(&self) -> &'static MessageDescriptor;

    /// Field values in declaration order
    fn values(&self) -> Vec<Value>;

    /// Upcast for downcasting to the concrete type
    fn as_any(&self) -> &dyn Any;

    /// Message id
    fn message_id(&self) -> u32 {
        self.descriptor().id
    }
}

impl dyn Message {
    /// Downcast to a concrete message type
    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

impl PartialEq for dyn Message {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = (self.descriptor(), other.descriptor());
        a.id == b.id && a.name == b.name && self.values() == other.values()
    }
}

/// Message type with a static descriptor that can be rebuilt from values
pub trait MessageType: Message + Clone + Sized {
    /// Static description of this message type
    fn describe() -> &'static MessageDescriptor;

    /// Rebuild from values in declaration order
    fn from_values(values: Vec<Value>) -> Result<Self>;
}

type BuildFn = fn(&'static MessageDescriptor, Vec<Value>) -> Result<Arc<dyn Message>>;

/// A message description registered with a dialect
#[derive(Clone, Copy)]
pub struct MessageDef {
    descriptor: &'static MessageDescriptor,
    build: BuildFn,
}

impl MessageDef {
    /// Definition for a statically typed message
    pub fn of<M: MessageType>() -> Self {
        Self {
            descriptor: M::describe(),
            build: build_typed::<M>,
        }
    }

    /// Definition for a hand-written descriptor, decoded into [`DynamicMessage`]
    pub fn dynamic(descriptor: &'static MessageDescriptor) -> Self {
        Self {
            descriptor,
            build: build_dynamic,
        }
    }

    /// Static description
    pub fn descriptor(&self) -> &'static MessageDescriptor {
        self.descriptor
    }

    pub(crate) fn build(&self, values: Vec<Value>) -> Result<Arc<dyn Message>> {
        (self.build)(self.descriptor, values)
    }
}

impl fmt::Debug for MessageDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageDef")
            .field("name", &self.descriptor.name)
            .field("id", &self.descriptor.id)
            .finish()
    }
}

fn build_typed<M: MessageType>(
    _descriptor: &'static MessageDescriptor,
    values: Vec<Value>,
) -> Result<Arc<dyn Message>> {
    Ok(Arc::new(M::from_values(values)?))
}

fn build_dynamic(
    descriptor: &'static MessageDescriptor,
    values: Vec<Value>,
) -> Result<Arc<dyn Message>> {
    Ok(Arc::new(DynamicMessage::new(descriptor, values)?))
}

/// Message held as a descriptor plus values
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicMessage {
    descriptor: &'static MessageDescriptor,
    values: Vec<Value>,
}

impl DynamicMessage {
    /// Create from values in declaration order
    pub fn new(descriptor: &'static MessageDescriptor, values: Vec<Value>) -> Result<Self> {
        if values.len() != descriptor.fields.len() {
            return Err(Error::MessageDecode(format!(
                "{}: expected {} values, got {}",
                descriptor.name,
                descriptor.fields.len(),
                values.len()
            )));
        }
        Ok(Self { descriptor, values })
    }

    /// Message with every field set to its zero value
    pub fn zeroed(descriptor: &'static MessageDescriptor) -> Self {
        let values = descriptor.fields.iter().map(|f| f.kind.zero_value()).collect();
        Self { descriptor, values }
    }

    /// Value of the field with the given protocol name
    pub fn get(&self, name: &str) -> Option<&Value> {
        let idx = self
            .descriptor
            .fields
            .iter()
            .position(|f| f.protocol_name() == name)?;
        self.values.get(idx)
    }

    /// Replace the value of the field with the given protocol name
    ///
    /// Returns `false` if no such field exists.
    pub fn set(&mut self, name: &str, value: Value) -> bool {
        let Some(idx) = self
            .descriptor
            .fields
            .iter()
            .position(|f| f.protocol_name() == name)
        else {
            return false;
        };
        self.values[idx] = value;
        true
    }
}

impl Message for DynamicMessage {
    fn descriptor(&self) -> &'static MessageDescriptor {
        self.descriptor
    }

    fn values(&self) -> Vec<Value> {
        self.values.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Pull the next value and convert it; used by generated `from_values`
#[doc(hidden)]
pub fn take_field<T: WireField>(
    values: &mut impl Iterator<Item = Value>,
    name: &'static str,
) -> Result<T> {
    let value = values
        .next()
        .ok_or_else(|| Error::MessageDecode(format!("missing value for field '{name}'")))?;
    T::from_value(value)
        .ok_or_else(|| Error::MessageDecode(format!("type mismatch for field '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_kind_sizes() {
        assert_eq!(FieldKind::Scalar(FieldType::F64).size(), 8);
        assert_eq!(FieldKind::Array(FieldType::U16, 4).size(), 8);
        assert_eq!(FieldKind::String(50).size(), 50);
        let e = FieldKind::Enum {
            logical: FieldType::U64,
            wire: FieldType::U16,
        };
        assert_eq!(e.size(), 2);
        assert_eq!(e.wire_type(), FieldType::U16);
    }

    #[test]
    fn test_value_widening() {
        assert_eq!(Value::I8(-1).as_u64(), Some(u64::MAX));
        assert_eq!(Value::U16(500).as_u64(), Some(500));
        assert_eq!(Value::F32(1.5).as_u64(), None);
        assert_eq!(Value::F32(1.5).as_f64(), Some(1.5));
        assert_eq!(Value::I32(-2).as_f64(), Some(-2.0));
    }

    #[test]
    fn test_coerce() {
        assert_eq!(FieldType::U8.cast(&Value::U64(6)), Some(Value::U8(6)));
        assert_eq!(FieldType::F32.cast(&Value::U16(400)), Some(Value::F32(400.0)));
        assert_eq!(FieldType::I16.cast(&Value::F64(-3.0)), Some(Value::I16(-3)));

        let enum_kind = FieldKind::Enum {
            logical: FieldType::U64,
            wire: FieldType::U8,
        };
        assert_eq!(enum_kind.coerce(&Value::U8(3)), Some(Value::U64(3)));
        assert_eq!(
            FieldKind::Array(FieldType::U16, 2).coerce(&Value::Array(vec![Value::U8(1), Value::U8(2)])),
            Some(Value::Array(vec![Value::U16(1), Value::U16(2)]))
        );
        assert_eq!(FieldKind::String(4).coerce(&Value::U8(1)), None);
    }

    #[test]
    fn test_array_field_roundtrip() {
        let arr: [i16; 3] = [-1, 0, 7];
        let v = arr.to_value();
        assert_eq!(<[i16; 3]>::from_value(v), Some(arr));
        assert_eq!(<[i16; 3]>::from_value(Value::Array(vec![Value::I16(1)])), None);
    }

    #[test]
    fn test_fixed_string_truncates_on_char_boundary() {
        let s: FixedString<4> = FixedString::new("abcdef");
        assert_eq!(s.as_str(), "abcd");

        // 'é' is two bytes; cutting at 4 would split it
        let s: FixedString<4> = FixedString::new("abcé");
        assert_eq!(s.as_str(), "abc");
        assert_eq!(FixedString::<4>::CAPACITY, 4);
    }

    #[test]
    fn test_field_protocol_name() {
        let f = FieldDescriptor {
            name: "TargetSystem",
            protocol_name: None,
            kind: FieldKind::Scalar(FieldType::U8),
            extension: false,
        };
        assert_eq!(f.protocol_name(), "target_system");

        let f = FieldDescriptor {
            name: "mavtype",
            protocol_name: Some("type"),
            kind: FieldKind::Scalar(FieldType::U8),
            extension: false,
        };
        assert_eq!(f.protocol_name(), "type");
    }

    static POINT: MessageDescriptor = MessageDescriptor {
        name: "MessagePoint",
        id: 9000,
        fields: &[
            FieldDescriptor {
                name: "x",
                protocol_name: None,
                kind: FieldKind::Scalar(FieldType::F32),
                extension: false,
            },
            FieldDescriptor {
                name: "label",
                protocol_name: None,
                kind: FieldKind::String(8),
                extension: false,
            },
        ],
    };

    #[test]
    fn test_dynamic_message_access() {
        let mut msg = DynamicMessage::zeroed(&POINT);
        assert_eq!(msg.get("x"), Some(&Value::F32(0.0)));
        assert!(msg.set("label", Value::String("p1".into())));
        assert!(!msg.set("missing", Value::U8(0)));
        assert_eq!(msg.get("label"), Some(&Value::String("p1".into())));

        let dyn_msg: &dyn Message = &msg;
        assert_eq!(dyn_msg.message_id(), 9000);
        assert!(dyn_msg.downcast_ref::<DynamicMessage>().is_some());
    }

    #[test]
    fn test_dynamic_message_rejects_wrong_arity() {
        assert!(DynamicMessage::new(&POINT, vec![Value::F32(1.0)]).is_err());
    }
}
