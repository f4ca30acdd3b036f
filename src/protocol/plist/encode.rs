//! Binary plist writer
//!
//! Emits `bplist00` with a fixed 2-byte object reference size, which
//! comfortably covers RTI archives (a handful of objects each).

use std::collections::HashMap;

use crate::protocol::CodecError;

use super::PlistValue;

const REF_SIZE: usize = 2;
const MAX_OBJECTS: usize = 0xFFFF;

/// Encode a `PlistValue` into binary plist bytes
///
/// # Errors
///
/// Returns an error if the object graph exceeds the fixed reference
/// width (over 65535 distinct objects).
pub fn encode(value: &PlistValue) -> Result<Vec<u8>, CodecError> {
    let mut encoder = Encoder::default();
    let root_index = encoder.add_value(value)?;

    if encoder.offsets.len() > MAX_OBJECTS {
        return Err(CodecError::Malformed("too many objects"));
    }

    let mut output = Vec::with_capacity(encoder.body.len() + 64);
    output.extend_from_slice(b"bplist00");
    let body_start = output.len();
    output.extend_from_slice(&encoder.body);

    let offset_table_offset = output.len();
    let max_offset = body_start + encoder.body.len();
    let offset_size = be_width(max_offset as u64);
    for &offset in &encoder.offsets {
        write_be_uint(&mut output, body_start as u64 + offset, offset_size);
    }

    // 32-byte trailer
    output.extend_from_slice(&[0u8; 6]);
    #[allow(clippy::cast_possible_truncation)]
    output.push(offset_size as u8);
    output.push(REF_SIZE as u8);
    output.extend_from_slice(&(encoder.offsets.len() as u64).to_be_bytes());
    output.extend_from_slice(&(root_index as u64).to_be_bytes());
    output.extend_from_slice(&(offset_table_offset as u64).to_be_bytes());

    Ok(output)
}

#[derive(Default)]
struct Encoder {
    body: Vec<u8>,
    offsets: Vec<u64>,
    // Primitive dedup, keyed on content; containers are never shared
    cache: HashMap<CacheKey, usize>,
}

#[derive(Hash, Eq, PartialEq)]
enum CacheKey {
    String(String),
    Data(Vec<u8>),
    Integer(i64),
    Real(u64),
    Uid(u64),
}

impl Encoder {
    fn add_value(&mut self, value: &PlistValue) -> Result<usize, CodecError> {
        if let Some(key) = cache_key(value) {
            if let Some(&index) = self.cache.get(&key) {
                return Ok(index);
            }
        }

        // Children first so a container body can reference their indices
        let container_body = match value {
            PlistValue::Array(items) => {
                let mut refs = Vec::with_capacity(items.len());
                for item in items {
                    refs.push(self.add_value(item)?);
                }
                let mut body = Vec::new();
                write_marker(&mut body, 0xA, refs.len());
                for r in refs {
                    write_be_uint(&mut body, r as u64, REF_SIZE);
                }
                Some(body)
            }
            PlistValue::Dictionary(dict) => {
                let mut keys: Vec<&String> = dict.keys().collect();
                keys.sort();
                let mut key_refs = Vec::with_capacity(dict.len());
                let mut val_refs = Vec::with_capacity(dict.len());
                for key in keys {
                    key_refs.push(self.add_value(&PlistValue::String(key.clone()))?);
                    val_refs.push(self.add_value(&dict[key])?);
                }
                let mut body = Vec::new();
                write_marker(&mut body, 0xD, key_refs.len());
                for r in key_refs.into_iter().chain(val_refs) {
                    write_be_uint(&mut body, r as u64, REF_SIZE);
                }
                Some(body)
            }
            _ => None,
        };

        let index = self.offsets.len();
        self.offsets.push(self.body.len() as u64);

        match (container_body, value) {
            (Some(body), _) => self.body.extend_from_slice(&body),
            (None, PlistValue::Boolean(b)) => self.body.push(if *b { 0x09 } else { 0x08 }),
            (None, PlistValue::Integer(i)) => encode_integer(&mut self.body, *i),
            (None, PlistValue::Real(f)) => {
                self.body.push(0x23);
                self.body.extend_from_slice(&f.to_be_bytes());
            }
            (None, PlistValue::String(s)) => encode_string(&mut self.body, s),
            (None, PlistValue::Data(d)) => {
                write_marker(&mut self.body, 0x4, d.len());
                self.body.extend_from_slice(d);
            }
            (None, PlistValue::Uid(u)) => encode_uid(&mut self.body, *u),
            (None, PlistValue::Array(_) | PlistValue::Dictionary(_)) => unreachable!(),
        }

        if let Some(key) = cache_key(value) {
            self.cache.insert(key, index);
        }
        Ok(index)
    }
}

fn cache_key(value: &PlistValue) -> Option<CacheKey> {
    match value {
        PlistValue::String(s) => Some(CacheKey::String(s.clone())),
        PlistValue::Data(d) => Some(CacheKey::Data(d.clone())),
        PlistValue::Integer(i) => Some(CacheKey::Integer(*i)),
        PlistValue::Real(f) => Some(CacheKey::Real(f.to_bits())),
        PlistValue::Uid(u) => Some(CacheKey::Uid(*u)),
        _ => None,
    }
}

fn encode_integer(out: &mut Vec<u8>, value: i64) {
    // Widths follow the sign-preserving reader: negative integers are
    // always 8 bytes, positives stay within the signed range per width
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    if value < 0 {
        out.push(0x13);
        out.extend_from_slice(&value.to_be_bytes());
    } else if value <= i64::from(i8::MAX) {
        out.push(0x10);
        out.push(value as u8);
    } else if value <= i64::from(i16::MAX) {
        out.push(0x11);
        out.extend_from_slice(&(value as u16).to_be_bytes());
    } else if value <= i64::from(i32::MAX) {
        out.push(0x12);
        out.extend_from_slice(&(value as u32).to_be_bytes());
    } else {
        out.push(0x13);
        out.extend_from_slice(&value.to_be_bytes());
    }
}

fn encode_string(out: &mut Vec<u8>, value: &str) {
    if value.is_ascii() {
        write_marker(out, 0x5, value.len());
        out.extend_from_slice(value.as_bytes());
    } else {
        let units: Vec<u16> = value.encode_utf16().collect();
        write_marker(out, 0x6, units.len());
        for unit in units {
            out.extend_from_slice(&unit.to_be_bytes());
        }
    }
}

fn encode_uid(out: &mut Vec<u8>, value: u64) {
    let width = be_width(value);
    #[allow(clippy::cast_possible_truncation)]
    out.push(0x80 | (width - 1) as u8);
    write_be_uint(out, value, width);
}

fn write_marker(out: &mut Vec<u8>, kind: u8, len: usize) {
    if len < 15 {
        #[allow(clippy::cast_possible_truncation)]
        out.push((kind << 4) | len as u8);
    } else {
        out.push((kind << 4) | 0xF);
        // Count follows as an integer object
        let len = len as u64;
        if len <= 0xFF {
            out.push(0x10);
            write_be_uint(out, len, 1);
        } else if len <= 0xFFFF {
            out.push(0x11);
            write_be_uint(out, len, 2);
        } else {
            out.push(0x12);
            write_be_uint(out, len, 4);
        }
    }
}

fn be_width(value: u64) -> usize {
    if value <= 0xFF {
        1
    } else if value <= 0xFFFF {
        2
    } else if value <= 0xFFFF_FFFF {
        4
    } else {
        8
    }
}

fn write_be_uint(out: &mut Vec<u8>, value: u64, width: usize) {
    let bytes = value.to_be_bytes();
    out.extend_from_slice(&bytes[8 - width..]);
}
