//! Binary property list codec, restricted to the shapes NSKeyedArchiver
//! produces for Remote Text Input payloads

pub mod archiver;
pub mod decode;
pub mod encode;

pub use archiver::{clear_text_archive, text_input_archive, KeyedArchive};
pub use decode::decode;
pub use encode::encode;

use std::collections::HashMap;

/// A property list value
#[derive(Debug, Clone, PartialEq)]
pub enum PlistValue {
    /// Boolean
    Boolean(bool),
    /// Signed integer
    Integer(i64),
    /// Floating point number
    Real(f64),
    /// UTF-8 string
    String(String),
    /// Binary data
    Data(Vec<u8>),
    /// UID reference into the archive's `$objects` table
    ///
    /// Distinct from integers on the wire; readers must resolve these
    /// transitively when walking an archive.
    Uid(u64),
    /// Array of values
    Array(Vec<PlistValue>),
    /// Dictionary with string keys
    Dictionary(HashMap<String, PlistValue>),
}

impl PlistValue {
    /// Borrow as a string, if this is one
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PlistValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow as binary data, if this is data
    #[must_use]
    pub fn as_data(&self) -> Option<&[u8]> {
        match self {
            PlistValue::Data(d) => Some(d),
            _ => None,
        }
    }

    /// Get the UID index, if this is a UID
    #[must_use]
    pub fn as_uid(&self) -> Option<u64> {
        match self {
            PlistValue::Uid(u) => Some(*u),
            _ => None,
        }
    }

    /// Borrow as a dictionary, if this is one
    #[must_use]
    pub fn as_dictionary(&self) -> Option<&HashMap<String, PlistValue>> {
        match self {
            PlistValue::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    /// Borrow as an array, if this is one
    #[must_use]
    pub fn as_array(&self) -> Option<&[PlistValue]> {
        match self {
            PlistValue::Array(a) => Some(a),
            _ => None,
        }
    }
}

impl From<&str> for PlistValue {
    fn from(v: &str) -> Self {
        PlistValue::String(v.to_string())
    }
}

impl From<i64> for PlistValue {
    fn from(v: i64) -> Self {
        PlistValue::Integer(v)
    }
}
