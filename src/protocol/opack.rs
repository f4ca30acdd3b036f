//! OPACK serialization
//!
//! Apple's tagged, self-describing binary format carried by Companion
//! message frames. Every value starts with a tag byte; encodings longer
//! than one byte are pooled in first-emission order so that a later
//! repetition collapses to a back-reference. Maps preserve insertion
//! order because several peer validators are order-sensitive.

use super::CodecError;

/// A decoded OPACK value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null
    Null,
    /// Boolean
    Bool(bool),
    /// Unsigned integer (up to 64 bits)
    Int(u64),
    /// 32-bit float
    Float32(f32),
    /// 64-bit float
    ///
    /// Constructing this variant is also how callers force a `0x36`
    /// encoding for integral values (touch-surface dimensions and the
    /// like); `Int` and `Float64` never compare equal.
    Float64(f64),
    /// UTF-8 string
    String(String),
    /// Byte string
    Bytes(Vec<u8>),
    /// 16-byte UUID literal
    Uuid([u8; 16]),
    /// Array of values
    Array(Vec<Value>),
    /// Ordered map with string keys
    Dict(Dict),
}

impl Value {
    /// Borrow as a string, if this is one
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow as bytes, if this is a byte string
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get as an unsigned integer, if this is one
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Borrow as a dictionary, if this is one
    #[must_use]
    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Borrow as an array, if this is one
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(u64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Dict> for Value {
    fn from(v: Dict) -> Self {
        Value::Dict(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

/// An ordered string-keyed map
///
/// Insertion order is preserved through encode and decode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dict(Vec<(String, Value)>);

impl Dict {
    /// Create an empty dictionary
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append or replace an entry, builder style
    #[must_use]
    pub fn entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Append an entry, replacing an existing key in place
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    /// Look up a value by key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the dictionary is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Encode a value to OPACK bytes
#[must_use]
pub fn pack(value: &Value) -> Vec<u8> {
    let mut encoder = Encoder::default();
    let mut out = Vec::new();
    encoder.pack_value(value, &mut out);
    out
}

/// Decode a single OPACK value from the front of `data`
///
/// Trailing bytes after the first complete value are ignored, matching
/// how peers frame exactly one value per message.
///
/// # Errors
///
/// Returns `CodecError` on truncated input, unknown tags, or dangling
/// back-references.
pub fn unpack(data: &[u8]) -> Result<Value, CodecError> {
    let mut decoder = Decoder {
        data,
        pos: 0,
        refs: Vec::new(),
    };
    decoder.unpack_value()
}

#[derive(Default)]
struct Encoder {
    // Pooled values in first-emission order. Logical equality coincides
    // with encoded-form equality under this canonical encoder.
    pool: Vec<Value>,
}

impl Encoder {
    fn pack_value(&mut self, value: &Value, out: &mut Vec<u8>) {
        if !Self::is_single_byte(value) {
            if let Some(index) = self.pool.iter().position(|seen| seen == value) {
                Self::emit_backref(index, out);
                return;
            }
            // A container claims its index before its children emit.
            self.pool.push(value.clone());
        }

        match value {
            Value::Null => out.push(0x04),
            Value::Bool(true) => out.push(0x01),
            Value::Bool(false) => out.push(0x02),
            Value::Int(n) => Self::emit_int(*n, out),
            Value::Float32(f) => {
                out.push(0x35);
                out.extend_from_slice(&f.to_le_bytes());
            }
            Value::Float64(f) => {
                out.push(0x36);
                out.extend_from_slice(&f.to_le_bytes());
            }
            Value::String(s) => Self::emit_string(s, out),
            Value::Bytes(b) => Self::emit_bytes(b, out),
            Value::Uuid(u) => {
                out.push(0x05);
                out.extend_from_slice(u);
            }
            Value::Array(items) => {
                if items.len() < 15 {
                    #[allow(clippy::cast_possible_truncation)]
                    out.push(0xD0 + items.len() as u8);
                    for item in items {
                        self.pack_value(item, out);
                    }
                } else {
                    out.push(0xDF);
                    for item in items {
                        self.pack_value(item, out);
                    }
                    out.push(0x03);
                }
            }
            Value::Dict(dict) => {
                if dict.len() < 15 {
                    #[allow(clippy::cast_possible_truncation)]
                    out.push(0xE0 + dict.len() as u8);
                    for (key, val) in dict.iter() {
                        self.pack_value(&Value::String(key.to_string()), out);
                        self.pack_value(val, out);
                    }
                } else {
                    out.push(0xEF);
                    for (key, val) in dict.iter() {
                        self.pack_value(&Value::String(key.to_string()), out);
                        self.pack_value(val, out);
                    }
                    out.push(0x03);
                }
            }
        }
    }

    /// Values whose encoding is a single byte are never pooled.
    fn is_single_byte(value: &Value) -> bool {
        match value {
            Value::Null | Value::Bool(_) => true,
            Value::Int(n) => *n <= 0x27,
            Value::String(s) => s.is_empty(),
            Value::Bytes(b) => b.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Dict(d) => d.is_empty(),
            _ => false,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn emit_int(n: u64, out: &mut Vec<u8>) {
        if n <= 0x27 {
            out.push(0x08 + n as u8);
        } else if n <= 0xFF {
            out.push(0x30);
            out.push(n as u8);
        } else if n <= 0xFFFF {
            out.push(0x31);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        } else if n <= 0xFFFF_FFFF {
            out.push(0x32);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        } else {
            out.push(0x33);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn emit_string(s: &str, out: &mut Vec<u8>) {
        let bytes = s.as_bytes();
        let len = bytes.len();
        if len <= 0x20 {
            out.push(0x40 + len as u8);
        } else if len <= 0xFF {
            out.push(0x61);
            out.push(len as u8);
        } else if len <= 0xFFFF {
            out.push(0x62);
            out.extend_from_slice(&(len as u16).to_le_bytes());
        } else if len <= 0xFF_FFFF {
            out.push(0x63);
            out.extend_from_slice(&(len as u32).to_le_bytes()[..3]);
        } else {
            out.push(0x64);
            out.extend_from_slice(&(len as u32).to_le_bytes());
        }
        out.extend_from_slice(bytes);
    }

    #[allow(clippy::cast_possible_truncation)]
    fn emit_bytes(b: &[u8], out: &mut Vec<u8>) {
        let len = b.len();
        if len <= 0x20 {
            out.push(0x70 + len as u8);
        } else if len <= 0xFF {
            out.push(0x91);
            out.push(len as u8);
        } else if len <= 0xFFFF {
            out.push(0x92);
            out.extend_from_slice(&(len as u16).to_le_bytes());
        } else if len <= 0xFFFF_FFFF {
            out.push(0x93);
            out.extend_from_slice(&(len as u32).to_le_bytes());
        } else {
            out.push(0x94);
            out.extend_from_slice(&(len as u64).to_le_bytes());
        }
        out.extend_from_slice(b);
    }

    #[allow(clippy::cast_possible_truncation)]
    fn emit_backref(index: usize, out: &mut Vec<u8>) {
        if index <= 0x20 {
            out.push(0xA0 + index as u8);
        } else if index <= 0xFF {
            out.push(0xC1);
            out.push(index as u8);
        } else if index <= 0xFFFF {
            out.push(0xC2);
            out.extend_from_slice(&(index as u16).to_le_bytes());
        } else if index <= 0xFFFF_FFFF {
            out.push(0xC3);
            out.extend_from_slice(&(index as u32).to_le_bytes());
        } else {
            out.push(0xC4);
            out.extend_from_slice(&(index as u64).to_le_bytes());
        }
    }
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    refs: Vec<Value>,
}

impl Decoder<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8], CodecError> {
        if self.pos + n > self.data.len() {
            return Err(CodecError::Truncated);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn peek(&self) -> Result<u8, CodecError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(CodecError::Truncated)
    }

    fn take_uint(&mut self, width: usize) -> Result<u64, CodecError> {
        let bytes = self.take(width)?;
        let mut value = 0u64;
        for (i, b) in bytes.iter().enumerate() {
            value |= u64::from(*b) << (8 * i);
        }
        Ok(value)
    }

    fn unpack_value(&mut self) -> Result<Value, CodecError> {
        let tag = self.take(1)?[0];
        match tag {
            0x01 => Ok(Value::Bool(true)),
            0x02 => Ok(Value::Bool(false)),
            0x04 => Ok(Value::Null),
            0x05 => {
                let bytes = self.take(16)?;
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(bytes);
                Ok(self.pooled(Value::Uuid(uuid)))
            }
            0x06 => {
                let n = self.take_uint(8)?;
                Ok(self.pooled(Value::Int(n)))
            }
            0x08..=0x2F => Ok(Value::Int(u64::from(tag - 0x08))),
            0x30..=0x33 => {
                let n = self.take_uint(1 << (tag - 0x30))?;
                Ok(self.pooled(Value::Int(n)))
            }
            0x35 => {
                let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
                Ok(self.pooled(Value::Float32(f32::from_le_bytes(bytes))))
            }
            0x36 => {
                let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
                Ok(self.pooled(Value::Float64(f64::from_le_bytes(bytes))))
            }
            0x40..=0x60 => self.unpack_string((tag - 0x40) as usize),
            0x61..=0x64 => {
                let width = match tag {
                    0x61 => 1,
                    0x62 => 2,
                    0x63 => 3,
                    _ => 4,
                };
                let len = self.take_uint(width)?;
                let len = usize::try_from(len).map_err(|_| CodecError::Truncated)?;
                self.unpack_string(len)
            }
            0x70..=0x90 => self.unpack_bytes((tag - 0x70) as usize),
            0x91..=0x94 => {
                let width = match tag {
                    0x91 => 1,
                    0x92 => 2,
                    0x93 => 4,
                    _ => 8,
                };
                let len = self.take_uint(width)?;
                let len = usize::try_from(len).map_err(|_| CodecError::Truncated)?;
                self.unpack_bytes(len)
            }
            0xA0..=0xC0 => self.resolve_backref(u64::from(tag - 0xA0)),
            0xC1..=0xC4 => {
                let width = match tag {
                    0xC1 => 1,
                    0xC2 => 2,
                    0xC3 => 4,
                    _ => 8,
                };
                let index = self.take_uint(width)?;
                self.resolve_backref(index)
            }
            0xD0..=0xDF => {
                let count = tag & 0x0F;
                if count == 0 {
                    return Ok(Value::Array(Vec::new()));
                }
                let slot = self.reserve_slot();
                let mut items = Vec::new();
                if count == 0x0F {
                    while self.peek()? != 0x03 {
                        items.push(self.unpack_value()?);
                    }
                    self.pos += 1;
                } else {
                    for _ in 0..count {
                        items.push(self.unpack_value()?);
                    }
                }
                let value = Value::Array(items);
                self.refs[slot] = value.clone();
                Ok(value)
            }
            0xE0..=0xEF => {
                let count = tag & 0x0F;
                if count == 0 {
                    return Ok(Value::Dict(Dict::new()));
                }
                let slot = self.reserve_slot();
                let mut dict = Dict::new();
                if count == 0x0F {
                    while self.peek()? != 0x03 {
                        self.unpack_entry(&mut dict)?;
                    }
                    self.pos += 1;
                } else {
                    for _ in 0..count {
                        self.unpack_entry(&mut dict)?;
                    }
                }
                let value = Value::Dict(dict);
                self.refs[slot] = value.clone();
                Ok(value)
            }
            other => Err(CodecError::UnknownTag(other)),
        }
    }

    fn unpack_entry(&mut self, dict: &mut Dict) -> Result<(), CodecError> {
        let key = match self.unpack_value()? {
            Value::String(s) => s,
            _ => return Err(CodecError::Malformed("map key must be a string")),
        };
        let value = self.unpack_value()?;
        dict.insert(key, value);
        Ok(())
    }

    fn unpack_string(&mut self, len: usize) -> Result<Value, CodecError> {
        let bytes = self.take(len)?;
        let s = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
        let value = Value::String(s.to_string());
        if len == 0 {
            return Ok(value);
        }
        Ok(self.pooled(value))
    }

    fn unpack_bytes(&mut self, len: usize) -> Result<Value, CodecError> {
        let bytes = self.take(len)?.to_vec();
        let value = Value::Bytes(bytes);
        if len == 0 {
            return Ok(value);
        }
        Ok(self.pooled(value))
    }

    fn pooled(&mut self, value: Value) -> Value {
        self.refs.push(value.clone());
        value
    }

    fn reserve_slot(&mut self) -> usize {
        self.refs.push(Value::Null);
        self.refs.len() - 1
    }

    fn resolve_backref(&self, index: u64) -> Result<Value, CodecError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.refs.get(i))
            .cloned()
            .ok_or(CodecError::BadBackref(index))
    }
}
