//! Binary plist reader
//!
//! Handles the subset of `bplist00` that RTI archives use: singletons,
//! integers, reals, dates, data, ASCII/UTF-16 strings, UIDs, arrays and
//! dictionaries. Anything else fails closed.

use std::collections::{HashMap, HashSet};

use crate::protocol::CodecError;

use super::PlistValue;

const MAGIC: &[u8; 8] = b"bplist00";
const TRAILER_LEN: usize = 32;

struct Trailer {
    offset_size: usize,
    object_ref_size: usize,
    num_objects: u64,
    root_object_index: u64,
    offset_table_offset: u64,
}

impl Trailer {
    fn parse(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < MAGIC.len() + TRAILER_LEN {
            return Err(CodecError::Truncated);
        }
        let t = &data[data.len() - TRAILER_LEN..];
        let trailer = Self {
            offset_size: t[6] as usize,
            object_ref_size: t[7] as usize,
            num_objects: u64::from_be_bytes(t[8..16].try_into().unwrap()),
            root_object_index: u64::from_be_bytes(t[16..24].try_into().unwrap()),
            offset_table_offset: u64::from_be_bytes(t[24..32].try_into().unwrap()),
        };
        if !matches!(trailer.offset_size, 1 | 2 | 4 | 8)
            || !matches!(trailer.object_ref_size, 1 | 2 | 4 | 8)
        {
            return Err(CodecError::Malformed("bplist trailer"));
        }
        Ok(trailer)
    }
}

/// Decode binary plist data into a `PlistValue`
///
/// # Errors
///
/// Returns `CodecError` on a bad magic, truncated tables, unsupported
/// object markers, or circular references.
pub fn decode(data: &[u8]) -> Result<PlistValue, CodecError> {
    if data.len() < MAGIC.len() || &data[..MAGIC.len()] != MAGIC {
        return Err(CodecError::Malformed("bplist magic"));
    }

    let trailer = Trailer::parse(data)?;
    let decoder = Decoder::new(data, &trailer)?;
    decoder.decode_object(trailer.root_object_index, &mut HashSet::new())
}

struct Decoder<'a> {
    data: &'a [u8],
    offset_table: Vec<u64>,
    object_ref_size: usize,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8], trailer: &Trailer) -> Result<Self, CodecError> {
        let start = usize::try_from(trailer.offset_table_offset)
            .map_err(|_| CodecError::Malformed("bplist trailer"))?;
        let count =
            usize::try_from(trailer.num_objects).map_err(|_| CodecError::Malformed("bplist trailer"))?;
        let entry_size = trailer.offset_size;

        let end = start
            .checked_add(count.checked_mul(entry_size).ok_or(CodecError::Truncated)?)
            .ok_or(CodecError::Truncated)?;
        if end > data.len() {
            return Err(CodecError::Truncated);
        }

        let mut offset_table = Vec::with_capacity(count);
        for i in 0..count {
            let at = start + i * entry_size;
            offset_table.push(read_be_uint(&data[at..at + entry_size]));
        }

        Ok(Self {
            data,
            offset_table,
            object_ref_size: trailer.object_ref_size,
        })
    }

    fn decode_object(&self, index: u64, seen: &mut HashSet<u64>) -> Result<PlistValue, CodecError> {
        if !seen.insert(index) {
            return Err(CodecError::Malformed("circular reference"));
        }

        let slot = usize::try_from(index).map_err(|_| CodecError::Malformed("object index"))?;
        let offset = *self
            .offset_table
            .get(slot)
            .ok_or(CodecError::Malformed("object index"))?;
        let pos = usize::try_from(offset).map_err(|_| CodecError::Truncated)?;
        if pos >= self.data.len() {
            return Err(CodecError::Truncated);
        }

        let marker = self.data[pos];
        let value = self.decode_value(marker, pos + 1, seen)?;

        seen.remove(&index);
        Ok(value)
    }

    fn decode_value(
        &self,
        marker: u8,
        pos: usize,
        seen: &mut HashSet<u64>,
    ) -> Result<PlistValue, CodecError> {
        let low = marker & 0x0F;
        match marker >> 4 {
            0x0 => match low {
                0x8 => Ok(PlistValue::Boolean(false)),
                0x9 => Ok(PlistValue::Boolean(true)),
                0x0 | 0xF => Ok(PlistValue::Data(Vec::new())),
                _ => Err(CodecError::UnknownTag(marker)),
            },
            0x1 => self.decode_integer(pos, low),
            0x2 => self.decode_real(pos, low),
            // NSDate: seconds since the 2001 epoch as a big-endian double
            0x3 => {
                let bytes = self.slice(pos, 8)?;
                Ok(PlistValue::Real(f64::from_be_bytes(
                    bytes.try_into().unwrap(),
                )))
            }
            0x4 => {
                let (len, start) = self.decode_size(pos, low)?;
                Ok(PlistValue::Data(self.slice(start, len)?.to_vec()))
            }
            0x5 => {
                let (len, start) = self.decode_size(pos, low)?;
                let s = std::str::from_utf8(self.slice(start, len)?)
                    .map_err(|_| CodecError::InvalidUtf8)?;
                Ok(PlistValue::String(s.to_string()))
            }
            0x6 => {
                let (len, start) = self.decode_size(pos, low)?;
                let bytes = self.slice(start, len * 2)?;
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes(c.try_into().unwrap()))
                    .collect();
                let s = String::from_utf16(&units).map_err(|_| CodecError::InvalidUtf8)?;
                Ok(PlistValue::String(s))
            }
            0x8 => {
                let bytes = self.slice(pos, low as usize + 1)?;
                Ok(PlistValue::Uid(read_be_uint(bytes)))
            }
            0xA => {
                let (count, start) = self.decode_size(pos, low)?;
                let refs = self.read_refs(start, count)?;
                let mut items = Vec::with_capacity(count);
                for r in refs {
                    items.push(self.decode_object(r, seen)?);
                }
                Ok(PlistValue::Array(items))
            }
            0xD => {
                let (count, start) = self.decode_size(pos, low)?;
                let key_refs = self.read_refs(start, count)?;
                let val_refs = self.read_refs(start + count * self.object_ref_size, count)?;

                let mut dict = HashMap::with_capacity(count);
                for (k, v) in key_refs.into_iter().zip(val_refs) {
                    let key = match self.decode_object(k, seen)? {
                        PlistValue::String(s) => s,
                        _ => return Err(CodecError::Malformed("dictionary key must be a string")),
                    };
                    dict.insert(key, self.decode_object(v, seen)?);
                }
                Ok(PlistValue::Dictionary(dict))
            }
            _ => Err(CodecError::UnknownTag(marker)),
        }
    }

    fn decode_integer(&self, pos: usize, size_exp: u8) -> Result<PlistValue, CodecError> {
        let len = 1usize << size_exp;
        let bytes = self.slice(pos, len)?;
        match len {
            #[allow(clippy::cast_possible_wrap)]
            1 => Ok(PlistValue::Integer(i64::from(bytes[0] as i8))),
            2 => Ok(PlistValue::Integer(i64::from(i16::from_be_bytes(
                bytes.try_into().unwrap(),
            )))),
            4 => Ok(PlistValue::Integer(i64::from(i32::from_be_bytes(
                bytes.try_into().unwrap(),
            )))),
            8 => Ok(PlistValue::Integer(i64::from_be_bytes(
                bytes.try_into().unwrap(),
            ))),
            _ => Err(CodecError::Malformed("integer width")),
        }
    }

    fn decode_real(&self, pos: usize, size_exp: u8) -> Result<PlistValue, CodecError> {
        let len = 1usize << size_exp;
        let bytes = self.slice(pos, len)?;
        match len {
            4 => Ok(PlistValue::Real(f64::from(f32::from_be_bytes(
                bytes.try_into().unwrap(),
            )))),
            8 => Ok(PlistValue::Real(f64::from_be_bytes(
                bytes.try_into().unwrap(),
            ))),
            _ => Err(CodecError::Malformed("real width")),
        }
    }

    /// Resolve a collection/string count, following the `0xF` extended
    /// form where an integer object holds the real count.
    fn decode_size(&self, pos: usize, nibble: u8) -> Result<(usize, usize), CodecError> {
        if nibble != 0xF {
            return Ok((nibble as usize, pos));
        }
        let marker = *self.data.get(pos).ok_or(CodecError::Truncated)?;
        if marker >> 4 != 0x1 {
            return Err(CodecError::Malformed("extended count"));
        }
        let len = 1usize << (marker & 0x0F);
        let bytes = self.slice(pos + 1, len)?;
        let count = usize::try_from(read_be_uint(bytes)).map_err(|_| CodecError::Truncated)?;
        Ok((count, pos + 1 + len))
    }

    fn read_refs(&self, start: usize, count: usize) -> Result<Vec<u64>, CodecError> {
        let total = count
            .checked_mul(self.object_ref_size)
            .ok_or(CodecError::Truncated)?;
        let bytes = self.slice(start, total)?;
        Ok(bytes
            .chunks_exact(self.object_ref_size)
            .map(read_be_uint)
            .collect())
    }

    fn slice(&self, pos: usize, len: usize) -> Result<&'a [u8], CodecError> {
        let end = pos.checked_add(len).ok_or(CodecError::Truncated)?;
        if end > self.data.len() {
            return Err(CodecError::Truncated);
        }
        Ok(&self.data[pos..end])
    }
}

fn read_be_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}
