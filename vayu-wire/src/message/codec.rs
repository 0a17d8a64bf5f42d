//! Payload codec built from a message manifest
//!
//! # Layout
//!
//! Non-extension fields are sorted by element size, largest first, keeping
//! declaration order among equal sizes. Extension fields follow in declaration
//! order and are only present in v2 payloads.
//!
//! # CRC-extra
//!
//! X.25 over `"NAME "`, then for each non-extension field in wire order
//! `"type "`, `"name "` and, for arrays, the length as one byte. The result is
//! folded to one byte as `low ^ high`.

use super::{
    FieldDescriptor, FieldKind, FieldType, Message, MessageDef, MessageDescriptor, Value,
    message_protocol_name,
};
use crate::error::{Error, Result};
use crate::x25::X25;
use std::sync::Arc;

/// Enum wire widths accepted on the wire
const ENUM_WIRE_TYPES: [FieldType; 6] = [
    FieldType::U8,
    FieldType::I8,
    FieldType::U16,
    FieldType::U32,
    FieldType::I32,
    FieldType::U64,
];

/// Encoder/decoder for one message type
#[derive(Debug, Clone)]
pub struct MessageCodec {
    def: MessageDef,
    protocol_name: String,
    field_names: Vec<String>,
    /// Indices into `descriptor.fields`, in wire order
    order: Vec<usize>,
    size_normal: usize,
    size_extended: usize,
    crc_extra: u8,
}

impl MessageCodec {
    /// Validate a message description and precompute its layout
    pub fn new(def: MessageDef) -> Result<Self> {
        let descriptor = def.descriptor();
        let protocol_name = message_protocol_name(descriptor.name)?;

        for field in descriptor.fields {
            validate_field(field)?;
        }

        let field_names: Vec<String> = descriptor
            .fields
            .iter()
            .map(|f| f.protocol_name().into_owned())
            .collect();

        let mut order: Vec<usize> = (0..descriptor.fields.len()).collect();
        order.sort_by_key(|&i| {
            let f = &descriptor.fields[i];
            if f.extension {
                (1, 0)
            } else {
                (0, usize::MAX - f.kind.wire_type().size())
            }
        });

        let size_normal = descriptor
            .fields
            .iter()
            .filter(|f| !f.extension)
            .map(|f| f.kind.size())
            .sum();
        let size_extended = descriptor.fields.iter().map(|f| f.kind.size()).sum();

        let mut h = X25::new();
        h.update(protocol_name.as_bytes());
        h.update(b" ");
        for &i in &order {
            let f = &descriptor.fields[i];
            if f.extension {
                continue;
            }
            h.update(f.kind.wire_type().protocol_name().as_bytes());
            h.update(b" ");
            h.update(field_names[i].as_bytes());
            h.update(b" ");
            if let Some(n) = f.kind.array_len() {
                h.update_byte(n as u8);
            }
        }
        let crc = h.finish();
        let crc_extra = ((crc & 0xFF) ^ (crc >> 8)) as u8;

        Ok(Self {
            def,
            protocol_name,
            field_names,
            order,
            size_normal,
            size_extended,
            crc_extra,
        })
    }

    /// Message id
    pub fn id(&self) -> u32 {
        self.def.descriptor().id
    }

    /// Static description
    pub fn descriptor(&self) -> &'static MessageDescriptor {
        self.def.descriptor()
    }

    /// Protocol-side message name, e.g. `HEARTBEAT`
    pub fn protocol_name(&self) -> &str {
        &self.protocol_name
    }

    /// CRC-extra byte mixed into every frame checksum
    pub fn crc_extra(&self) -> u8 {
        self.crc_extra
    }

    /// Payload size without extensions (v1 size)
    pub fn size_normal(&self) -> usize {
        self.size_normal
    }

    /// Payload size including extensions (untruncated v2 size)
    pub fn size_extended(&self) -> usize {
        self.size_extended
    }

    /// Protocol-side field names in wire order
    pub fn wire_order(&self) -> impl Iterator<Item = &str> + '_ {
        self.order.iter().map(|&i| self.field_names[i].as_str())
    }

    /// Declaration index of the field with the given protocol name
    pub fn field_index(&self, protocol_name: &str) -> Option<usize> {
        self.field_names.iter().position(|n| n == protocol_name)
    }

    /// Decode a payload into values in declaration order
    ///
    /// v1 payloads must have exactly the normal size. v2 payloads are
    /// zero-padded to the extended size; extra bytes are ignored.
    pub fn decode_values(&self, payload: &[u8], v2: bool) -> Result<Vec<Value>> {
        let fields = self.descriptor().fields;
        let padded;
        let buf: &[u8] = if v2 {
            if payload.len() < self.size_extended {
                let mut p = payload.to_vec();
                p.resize(self.size_extended, 0);
                padded = p;
                &padded
            } else {
                &payload[..self.size_extended]
            }
        } else {
            if payload.len() != self.size_normal {
                return Err(Error::LengthMismatch {
                    id: self.id(),
                    expected: self.size_normal,
                    actual: payload.len(),
                });
            }
            payload
        };

        let mut values: Vec<Value> = fields.iter().map(|f| f.kind.zero_value()).collect();
        let mut offset = 0;
        for &i in &self.order {
            let f = &fields[i];
            if f.extension && !v2 {
                continue;
            }
            let size = f.kind.size();
            values[i] = read_field(f.kind, &buf[offset..offset + size]);
            offset += size;
        }
        Ok(values)
    }

    /// Decode a payload into a message
    pub fn decode(&self, payload: &[u8], v2: bool) -> Result<Arc<dyn Message>> {
        let values = self.decode_values(payload, v2)?;
        self.def.build(values)
    }

    /// Encode values given in declaration order
    ///
    /// v1 payloads omit extensions. v2 payloads have trailing zero bytes
    /// removed, keeping at least one byte.
    pub fn encode_values(&self, values: &[Value], v2: bool) -> Result<Vec<u8>> {
        let fields = self.descriptor().fields;
        if values.len() != fields.len() {
            return Err(Error::MessageEncode(format!(
                "{}: expected {} values, got {}",
                self.protocol_name,
                fields.len(),
                values.len()
            )));
        }

        let size = if v2 {
            self.size_extended
        } else {
            self.size_normal
        };
        let mut buf = Vec::with_capacity(size);
        for &i in &self.order {
            let f = &fields[i];
            if f.extension && !v2 {
                continue;
            }
            write_field(f, &values[i], &mut buf)?;
        }

        if v2 {
            let end = buf.iter().rposition(|&b| b != 0).map_or(1, |p| p + 1);
            buf.truncate(end.max(1));
        }
        Ok(buf)
    }

    /// Encode a message of this type
    pub fn encode(&self, message: &dyn Message, v2: bool) -> Result<Vec<u8>> {
        let d = message.descriptor();
        if d.id != self.id() || d.name != self.descriptor().name {
            return Err(Error::MessageEncode(format!(
                "codec for {} cannot encode {}",
                self.descriptor().name,
                d.name
            )));
        }
        self.encode_values(&message.values(), v2)
    }

    /// Encode from `(protocol name, value)` pairs; missing fields are zero
    ///
    /// Numeric values are converted to the declared field type, so callers
    /// can fill any layout-compatible definition of a message.
    pub fn encode_named(&self, fields: &[(&str, Value)], v2: bool) -> Result<Vec<u8>> {
        let descriptors = self.descriptor().fields;
        let mut values: Vec<Value> = descriptors.iter().map(|f| f.kind.zero_value()).collect();
        for (name, value) in fields {
            let idx = self.field_index(name).ok_or_else(|| {
                Error::MessageEncode(format!("{} has no field '{name}'", self.protocol_name))
            })?;
            let field = &descriptors[idx];
            values[idx] = field
                .kind
                .coerce(value)
                .ok_or_else(|| type_mismatch(field, value))?;
        }
        self.encode_values(&values, v2)
    }

    /// Look up a decoded value by protocol name
    pub fn named<'a>(&self, values: &'a [Value], protocol_name: &str) -> Option<&'a Value> {
        values.get(self.field_index(protocol_name)?)
    }
}

fn validate_field(f: &FieldDescriptor) -> Result<()> {
    match f.kind {
        FieldKind::Scalar(FieldType::Char) | FieldKind::Array(FieldType::Char, _) => {
            Err(Error::UnsupportedFieldType {
                field: f.name,
                reason: "char data must be declared as a string",
            })
        }
        FieldKind::Scalar(_) => Ok(()),
        FieldKind::Array(_, len) => {
            if (1..=255).contains(&len) {
                Ok(())
            } else {
                Err(Error::InvalidArrayLength { field: f.name, len })
            }
        }
        FieldKind::String(0) => Err(Error::MissingStringCapacity(f.name)),
        FieldKind::String(len) => {
            if len <= 255 {
                Ok(())
            } else {
                Err(Error::InvalidArrayLength { field: f.name, len })
            }
        }
        FieldKind::Enum { logical, wire } => {
            if logical != FieldType::U64 {
                Err(Error::InvalidEnum {
                    field: f.name,
                    reason: "enum carrier must be u64",
                })
            } else if !ENUM_WIRE_TYPES.contains(&wire) {
                Err(Error::InvalidEnum {
                    field: f.name,
                    reason: "enum wire type must be one of u8, i8, u16, u32, i32, u64",
                })
            } else {
                Ok(())
            }
        }
    }
}

fn read_scalar(t: FieldType, b: &[u8]) -> Value {
    match t {
        FieldType::U8 | FieldType::Char => Value::U8(b[0]),
        FieldType::I8 => Value::I8(b[0] as i8),
        FieldType::U16 => Value::U16(u16::from_le_bytes([b[0], b[1]])),
        FieldType::I16 => Value::I16(i16::from_le_bytes([b[0], b[1]])),
        FieldType::U32 => Value::U32(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        FieldType::I32 => Value::I32(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        FieldType::F32 => Value::F32(f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        FieldType::U64 => Value::U64(u64::from_le_bytes(le8(b))),
        FieldType::I64 => Value::I64(i64::from_le_bytes(le8(b))),
        FieldType::F64 => Value::F64(f64::from_le_bytes(le8(b))),
    }
}

fn le8(b: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&b[..8]);
    out
}

fn read_field(kind: FieldKind, b: &[u8]) -> Value {
    match kind {
        FieldKind::Scalar(t) => read_scalar(t, b),
        FieldKind::Array(t, _) => Value::Array(b.chunks_exact(t.size()).map(|c| read_scalar(t, c)).collect()),
        FieldKind::String(_) => {
            let end = b.iter().position(|&c| c == 0).unwrap_or(b.len());
            Value::String(String::from_utf8_lossy(&b[..end]).into_owned())
        }
        FieldKind::Enum { wire, .. } => {
            Value::U64(read_scalar(wire, b).as_u64().unwrap_or_default())
        }
    }
}

fn write_scalar(field: &FieldDescriptor, t: FieldType, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    match (t, v) {
        (FieldType::U8, Value::U8(x)) => out.push(*x),
        (FieldType::I8, Value::I8(x)) => out.push(*x as u8),
        (FieldType::U16, Value::U16(x)) => out.extend_from_slice(&x.to_le_bytes()),
        (FieldType::I16, Value::I16(x)) => out.extend_from_slice(&x.to_le_bytes()),
        (FieldType::U32, Value::U32(x)) => out.extend_from_slice(&x.to_le_bytes()),
        (FieldType::I32, Value::I32(x)) => out.extend_from_slice(&x.to_le_bytes()),
        (FieldType::U64, Value::U64(x)) => out.extend_from_slice(&x.to_le_bytes()),
        (FieldType::I64, Value::I64(x)) => out.extend_from_slice(&x.to_le_bytes()),
        (FieldType::F32, Value::F32(x)) => out.extend_from_slice(&x.to_le_bytes()),
        (FieldType::F64, Value::F64(x)) => out.extend_from_slice(&x.to_le_bytes()),
        _ => return Err(type_mismatch(field, v)),
    }
    Ok(())
}

fn write_enum(field: &FieldDescriptor, wire: FieldType, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    let x = v.as_u64().ok_or_else(|| type_mismatch(field, v))?;
    match wire {
        FieldType::U8 | FieldType::I8 => out.push(x as u8),
        FieldType::U16 => out.extend_from_slice(&(x as u16).to_le_bytes()),
        FieldType::U32 | FieldType::I32 => out.extend_from_slice(&(x as u32).to_le_bytes()),
        _ => out.extend_from_slice(&x.to_le_bytes()),
    }
    Ok(())
}

fn write_field(field: &FieldDescriptor, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    match field.kind {
        FieldKind::Scalar(t) => write_scalar(field, t, v, out),
        FieldKind::Array(t, n) => {
            let Value::Array(items) = v else {
                return Err(type_mismatch(field, v));
            };
            if items.len() != n {
                return Err(Error::MessageEncode(format!(
                    "field '{}' expects {n} elements, got {}",
                    field.name,
                    items.len()
                )));
            }
            items.iter().try_for_each(|item| write_scalar(field, t, item, out))
        }
        FieldKind::String(cap) => {
            let Value::String(s) = v else {
                return Err(type_mismatch(field, v));
            };
            let bytes = s.as_bytes();
            let n = bytes.len().min(cap);
            out.extend_from_slice(&bytes[..n]);
            out.resize(out.len() + (cap - n), 0);
            Ok(())
        }
        FieldKind::Enum { wire, .. } => write_enum(field, wire, v, out),
    }
}

fn type_mismatch(field: &FieldDescriptor, v: &Value) -> Error {
    Error::MessageEncode(format!("field '{}' cannot hold {v:?}", field.name))
}
