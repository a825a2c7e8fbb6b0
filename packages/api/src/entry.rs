//! The Entry model - typed values and capability references.
//!
//! An Entry is either a plain value that can cross the wire (String, Blob,
//! Folder, Error, Function) or a process-local capability reference (Device,
//! Channel). Process-local variants never serialize on their own; the wire
//! codec rejects them unless an extension has registered a rewriter.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;

use crate::channel::ChannelEntry;
use crate::device::Device;
use crate::error::Error;

/// A typed value or live capability reference flowing through the namespace.
#[derive(Clone, Debug, PartialEq)]
pub enum Entry {
    String(StringEntry),
    Blob(BlobEntry),
    Folder(FolderEntry),
    Error(ErrorEntry),
    Function(FunctionEntry),
    /// Process-local only. Wraps a live capability object.
    Device(DeviceEntry),
    /// Process-local only. Represents an open streaming subscription.
    Channel(ChannelEntry),
}

impl Entry {
    /// Shorthand for a named String entry.
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Entry::String(StringEntry::new(name, value))
    }

    /// Shorthand for a named Folder entry.
    pub fn folder(name: impl Into<String>, children: Vec<Entry>) -> Self {
        Entry::Folder(FolderEntry::new(name, children))
    }

    pub fn name(&self) -> &str {
        match self {
            Entry::String(e) => &e.name,
            Entry::Blob(e) => &e.name,
            Entry::Folder(e) => &e.name,
            Entry::Error(e) => &e.name,
            Entry::Function(e) => &e.name,
            Entry::Device(e) => &e.name,
            Entry::Channel(e) => &e.name,
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        match self {
            Entry::String(e) => e.name = name,
            Entry::Blob(e) => e.name = name,
            Entry::Folder(e) => e.name = name,
            Entry::Error(e) => e.name = name,
            Entry::Function(e) => e.name = name,
            Entry::Device(e) => e.name = name,
            Entry::Channel(e) => e.name = name,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.set_name(name);
        self
    }

    /// The wire `Type` tag for this variant.
    pub fn type_name(&self) -> &'static str {
        match self {
            Entry::String(_) => "String",
            Entry::Blob(_) => "Blob",
            Entry::Folder(_) => "Folder",
            Entry::Error(_) => "Error",
            Entry::Function(_) => "Function",
            Entry::Device(_) => "Device",
            Entry::Channel(_) => "Channel",
        }
    }

    pub fn as_string(&self) -> Option<&StringEntry> {
        match self {
            Entry::String(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_folder(&self) -> Option<&FolderEntry> {
        match self {
            Entry::Folder(e) => Some(e),
            _ => None,
        }
    }
}

/// UTF-8 scalar.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StringEntry {
    pub name: String,
    pub value: String,
}

impl StringEntry {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Byte payload with a mime hint. Base64 on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobEntry {
    pub name: String,
    pub mime: String,
    pub data: Bytes,
}

impl BlobEntry {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            data: data.into(),
        }
    }

    /// Build a blob from text, defaulting the mime to `text/plain`.
    pub fn from_text(name: impl Into<String>, text: &str) -> Self {
        Self::new(name, "text/plain", Bytes::copy_from_slice(text.as_bytes()))
    }

    /// The wire form of the payload.
    pub fn encoded_data(&self) -> String {
        BASE64.encode(&self.data)
    }

    /// Decode a wire payload.
    pub fn from_encoded(
        name: impl Into<String>,
        mime: impl Into<String>,
        data: &str,
    ) -> Result<Self, Error> {
        let bytes = BASE64
            .decode(data)
            .map_err(|e| Error::malformed(format!("bad base64 blob data: {}", e)))?;
        Ok(Self::new(name, mime, bytes))
    }
}

/// Ordered container. Child names need not be unique on the wire; the first
/// match is authoritative.
#[derive(Clone, Debug, PartialEq)]
pub struct FolderEntry {
    pub name: String,
    pub children: Vec<Entry>,
}

impl FolderEntry {
    pub fn new(name: impl Into<String>, children: Vec<Entry>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }

    pub fn append(&mut self, child: Entry) {
        self.children.push(child);
    }

    /// Fetch one direct descendant by name.
    pub fn child(&self, name: &str) -> Option<&Entry> {
        self.children.iter().find(|c| c.name() == name)
    }

    /// Fetch a direct descendant, raising a typed failure when absent.
    pub fn required_child(&self, name: &str) -> Result<&Entry, Error> {
        self.child(name)
            .ok_or_else(|| Error::not_found(format!("{}/{}", self.name, name)))
    }

    /// Fetch a direct String descendant's value.
    pub fn child_string(&self, name: &str) -> Result<&str, Error> {
        match self.required_child(name)? {
            Entry::String(s) => Ok(&s.value),
            other => Err(Error::malformed(format!(
                "child {} of {} is a {}, expected String",
                name,
                self.name,
                other.type_name()
            ))),
        }
    }
}

/// A value representing failure. Stored, returned, or streamed like any
/// other entry - not an exception.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorEntry {
    pub name: String,
    pub code: String,
    pub authority: String,
    pub message: String,
}

impl ErrorEntry {
    pub fn new(
        name: impl Into<String>,
        code: impl Into<String>,
        authority: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            authority: authority.into(),
            message: message.into(),
        }
    }
}

/// Marks a path as invokable. Carries no payload; invocation happens through
/// the path, not the value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionEntry {
    pub name: String,
}

impl FunctionEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A live capability object travelling inside the process.
///
/// Never serialized as-is; the reversal extension rewrites devices into
/// remote references when they need to cross the wire.
#[derive(Clone)]
pub struct DeviceEntry {
    pub name: String,
    device: Arc<dyn Device>,
}

impl DeviceEntry {
    pub fn new(name: impl Into<String>, device: Arc<dyn Device>) -> Self {
        Self {
            name: name.into(),
            device,
        }
    }

    pub fn device(&self) -> Arc<dyn Device> {
        self.device.clone()
    }
}

impl std::fmt::Debug for DeviceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceEntry")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl PartialEq for DeviceEntry {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && Arc::ptr_eq(&self.device, &other.device)
    }
}

impl From<StringEntry> for Entry {
    fn from(e: StringEntry) -> Self {
        Entry::String(e)
    }
}

impl From<BlobEntry> for Entry {
    fn from(e: BlobEntry) -> Self {
        Entry::Blob(e)
    }
}

impl From<FolderEntry> for Entry {
    fn from(e: FolderEntry) -> Self {
        Entry::Folder(e)
    }
}

impl From<ErrorEntry> for Entry {
    fn from(e: ErrorEntry) -> Self {
        Entry::Error(e)
    }
}

impl From<FunctionEntry> for Entry {
    fn from(e: FunctionEntry) -> Self {
        Entry::Function(e)
    }
}

impl From<DeviceEntry> for Entry {
    fn from(e: DeviceEntry) -> Self {
        Entry::Device(e)
    }
}

impl From<ChannelEntry> for Entry {
    fn from(e: ChannelEntry) -> Self {
        Entry::Channel(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_renames() {
        let entry = Entry::string("greeting", "hi");
        assert_eq!(entry.name(), "greeting");
        assert_eq!(entry.type_name(), "String");

        let renamed = entry.with_name("salutation");
        assert_eq!(renamed.name(), "salutation");
    }

    #[test]
    fn folder_child_lookup_first_match_wins() {
        let folder = FolderEntry::new(
            "f",
            vec![
                Entry::string("x", "first"),
                Entry::string("x", "second"),
                Entry::string("y", "other"),
            ],
        );
        assert_eq!(folder.child_string("x").unwrap(), "first");
        assert_eq!(folder.child_string("y").unwrap(), "other");
        assert!(folder.child("z").is_none());
        assert!(folder.required_child("z").is_err());
    }

    #[test]
    fn folder_child_type_mismatch() {
        let folder = FolderEntry::new("f", vec![Entry::Function(FunctionEntry::new("fx"))]);
        assert!(matches!(
            folder.child_string("fx"),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn blob_base64_round_trip() {
        let blob = BlobEntry::from_text("b", "hello world");
        let encoded = blob.encoded_data();
        let back = BlobEntry::from_encoded("b", "text/plain", &encoded).unwrap();
        assert_eq!(blob, back);
    }

    #[test]
    fn blob_bad_base64() {
        assert!(BlobEntry::from_encoded("b", "text/plain", "!!!not-base64!!!").is_err());
    }
}
