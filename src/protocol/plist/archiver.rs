//! NSKeyedArchiver support for Remote Text Input payloads
//!
//! An RTI archive is a binary plist with `$version`, `$archiver`,
//! `$top` and an `$objects` table whose first element is the string
//! `$null`. Object fields hold `Uid` references into `$objects`; a
//! reader resolves those transitively while walking a key path.

use std::collections::HashMap;

use crate::protocol::CodecError;

use super::{decode, encode, PlistValue};

const ARCHIVER: &str = "RTIKeyedArchiver";
const VERSION: i64 = 100_000;

/// A parsed keyed archive, ready for key-path walks
pub struct KeyedArchive {
    objects: Vec<PlistValue>,
    top: HashMap<String, PlistValue>,
}

impl KeyedArchive {
    /// Parse an archive from binary plist bytes
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if the plist is malformed or the archive
    /// scaffolding (`$objects`, `$top`) is missing.
    pub fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let root = decode(data)?;
        let dict = root
            .as_dictionary()
            .ok_or(CodecError::Malformed("archive root"))?;
        let objects = dict
            .get("$objects")
            .and_then(PlistValue::as_array)
            .ok_or(CodecError::Malformed("archive $objects"))?
            .to_vec();
        let top = dict
            .get("$top")
            .and_then(PlistValue::as_dictionary)
            .ok_or(CodecError::Malformed("archive $top"))?
            .clone();
        Ok(Self { objects, top })
    }

    /// Follow UID hops until a concrete value appears
    ///
    /// A dangling or cyclic UID chain stops at the last reachable
    /// value; readers downstream treat the wrong shape as absent.
    fn resolve<'a>(&'a self, value: &'a PlistValue) -> &'a PlistValue {
        let mut current = value;
        for _ in 0..self.objects.len().max(1) {
            let Some(uid) = current.as_uid() else {
                return current;
            };
            match usize::try_from(uid).ok().and_then(|i| self.objects.get(i)) {
                Some(next) => current = next,
                None => return current,
            }
        }
        current
    }

    /// Look up a `$top` entry by name
    #[must_use]
    pub fn top(&self, name: &str) -> Option<&PlistValue> {
        self.top.get(name).map(|v| self.resolve(v))
    }

    /// Walk a key path from `$top["root"]`, resolving UIDs at each hop
    #[must_use]
    pub fn walk(&self, path: &[&str]) -> Option<&PlistValue> {
        let mut current = self.top("root")?;
        for key in path {
            current = self.resolve(current.as_dictionary()?.get(*key)?);
        }
        Some(current)
    }

    /// The 16-byte RTI session UUID, if the archive carries one
    #[must_use]
    pub fn session_uuid(&self) -> Option<[u8; 16]> {
        self.walk(&["sessionUUID"])?
            .as_data()
            .and_then(|d| d.try_into().ok())
    }

    /// Text currently before the cursor on the device
    ///
    /// Firmware revisions move this around; a missing or non-string
    /// value reads as empty rather than an error.
    #[must_use]
    pub fn context_before_input(&self) -> String {
        self.walk(&["documentState", "docSt", "contextBeforeInput"])
            .and_then(PlistValue::as_str)
            .unwrap_or_default()
            .to_string()
    }
}

/// Build the archive that inserts `text` into the focused field
///
/// # Errors
///
/// Returns an error if plist encoding fails.
pub fn text_input_archive(session_uuid: &[u8; 16], text: &str) -> Result<Vec<u8>, CodecError> {
    let mut builder = ArchiveBuilder::new();

    let uuid_ref = builder.push(PlistValue::Data(session_uuid.to_vec()));
    let text_ref = builder.push(PlistValue::String(text.to_string()));
    let kb_class = builder.push_class("TIKeyboardOutput");
    let keyboard = builder.push_object(kb_class, [("insertionText", text_ref)]);
    let ops_class = builder.push_class("RTITextOperations");
    let ops = builder.push_object(ops_class, [("keyboardOutput", keyboard)]);
    let root_class = builder.push_class("RTIInputSystemMessage");
    let root = builder.push_object(
        root_class,
        [("sessionUUID", uuid_ref), ("textOperations", ops)],
    );

    builder.finish(root)
}

/// Build the archive that clears the focused field
///
/// # Errors
///
/// Returns an error if plist encoding fails.
pub fn clear_text_archive(session_uuid: &[u8; 16]) -> Result<Vec<u8>, CodecError> {
    let mut builder = ArchiveBuilder::new();

    let uuid_ref = builder.push(PlistValue::Data(session_uuid.to_vec()));
    let empty = builder.push(PlistValue::String(String::new()));
    let ops_class = builder.push_class("RTITextOperations");
    let ops = builder.push_object(ops_class, [("textToAssert", empty)]);
    let root_class = builder.push_class("RTIInputSystemMessage");
    let root = builder.push_object(
        root_class,
        [("sessionUUID", uuid_ref), ("textOperations", ops)],
    );

    builder.finish(root)
}

/// Accumulates `$objects` entries and hands out UID references
struct ArchiveBuilder {
    objects: Vec<PlistValue>,
}

impl ArchiveBuilder {
    fn new() -> Self {
        Self {
            objects: vec![PlistValue::String("$null".to_string())],
        }
    }

    fn push(&mut self, value: PlistValue) -> PlistValue {
        self.objects.push(value);
        PlistValue::Uid((self.objects.len() - 1) as u64)
    }

    fn push_class(&mut self, name: &str) -> PlistValue {
        let mut descriptor = HashMap::new();
        descriptor.insert("$classname".to_string(), PlistValue::String(name.to_string()));
        descriptor.insert(
            "$classes".to_string(),
            PlistValue::Array(vec![
                PlistValue::String(name.to_string()),
                PlistValue::String("NSObject".to_string()),
            ]),
        );
        self.push(PlistValue::Dictionary(descriptor))
    }

    fn push_object<const N: usize>(
        &mut self,
        class_ref: PlistValue,
        fields: [(&str, PlistValue); N],
    ) -> PlistValue {
        let mut object = HashMap::new();
        object.insert("$class".to_string(), class_ref);
        for (key, value) in fields {
            object.insert(key.to_string(), value);
        }
        self.push(PlistValue::Dictionary(object))
    }

    fn finish(self, root: PlistValue) -> Result<Vec<u8>, CodecError> {
        let mut top = HashMap::new();
        top.insert("root".to_string(), root);

        let mut archive = HashMap::new();
        archive.insert("$version".to_string(), PlistValue::Integer(VERSION));
        archive.insert(
            "$archiver".to_string(),
            PlistValue::String(ARCHIVER.to_string()),
        );
        archive.insert("$top".to_string(), PlistValue::Dictionary(top));
        archive.insert("$objects".to_string(), PlistValue::Array(self.objects));

        encode(&PlistValue::Dictionary(archive))
    }
}
