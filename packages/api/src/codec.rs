//! Inflate and deflate between the Entry model and wire literals.
//!
//! Inflation is deliberately forgiving: a literal without a `Type`, or with
//! a `Type` nobody recognizes, becomes an `Error` entry instead of failing
//! the whole decode. Deflation is strict: process-local variants (Device,
//! Channel) refuse to serialize unless an extension has registered a
//! rewriter for that type - that extensibility point is how reversal and
//! channel framing piggyback on the same envelope.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::entry::{BlobEntry, Entry, ErrorEntry, FolderEntry, FunctionEntry, StringEntry};
use crate::error::Error;
use crate::wire::WireLiteral;

const AUTHORITY: &str = "pathlink/api";

/// Converts an unrecognized wire literal into a live Entry.
pub type Inflater = dyn Fn(&WireLiteral) -> Result<Entry, Error> + Send + Sync;

/// Converts a process-local Entry into a wire shape.
pub type Deflater = dyn Fn(&Entry) -> Result<WireLiteral, Error> + Send + Sync;

/// The codec plus its extension maps.
#[derive(Clone, Default)]
pub struct WireCodec {
    inflaters: BTreeMap<String, Arc<Inflater>>,
    deflaters: BTreeMap<String, Arc<Deflater>>,
}

impl WireCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an inflater for a `Type` the core codec doesn't know.
    pub fn add_inflater(
        &mut self,
        literal_type: impl Into<String>,
        inflater: impl Fn(&WireLiteral) -> Result<Entry, Error> + Send + Sync + 'static,
    ) {
        self.inflaters
            .insert(literal_type.into(), Arc::new(inflater));
    }

    /// Register a deflater for a process-local `Type`.
    pub fn add_deflater(
        &mut self,
        literal_type: impl Into<String>,
        deflater: impl Fn(&Entry) -> Result<WireLiteral, Error> + Send + Sync + 'static,
    ) {
        self.deflaters
            .insert(literal_type.into(), Arc::new(deflater));
    }

    /// Decode a wire literal into an Entry.
    ///
    /// Unknown or missing `Type` values degrade to `Error` entries. The only
    /// hard failures come from registered extension inflaters, which are
    /// allowed to reject bad input (e.g. a Device literal without its
    /// reversal prefix).
    pub fn inflate(&self, raw: &WireLiteral) -> Result<Entry, Error> {
        let name = raw.name.clone().unwrap_or_default();
        let literal_type = match raw.literal_type.as_deref() {
            Some(t) => t,
            None => {
                return Ok(ErrorEntry::new(
                    name,
                    "missing-type",
                    AUTHORITY,
                    "this entry is missing its Type field",
                )
                .into());
            }
        };

        match literal_type {
            "String" => Ok(StringEntry::new(name, raw.string_value.clone().unwrap_or_default()).into()),

            "Folder" => {
                let mut children = Vec::new();
                for child in raw.children.iter().flatten() {
                    children.push(self.inflate(child)?);
                }
                Ok(FolderEntry::new(name, children).into())
            }

            "Blob" => Ok(BlobEntry::from_encoded(
                name,
                raw.mime.clone().unwrap_or_default(),
                raw.data.as_deref().unwrap_or_default(),
            )?
            .into()),

            "Error" => Ok(ErrorEntry::new(
                name,
                raw.code.clone().unwrap_or_default(),
                raw.authority.clone().unwrap_or_default(),
                raw.string_value.clone().unwrap_or_default(),
            )
            .into()),

            "Function" => Ok(FunctionEntry::new(name).into()),

            other => {
                if let Some(inflater) = self.inflaters.get(other) {
                    let inflated = inflater(raw)?;
                    if inflated.type_name() != other {
                        return Err(Error::protocol(format!(
                            "inflater for {} returned a {}",
                            other,
                            inflated.type_name()
                        )));
                    }
                    return Ok(inflated);
                }

                tracing::warn!(literal_type = other, "inflating unhandled literal type");
                Ok(ErrorEntry::new(
                    name,
                    "unimplemented-type",
                    AUTHORITY,
                    format!("wire literal had unimplemented Type {}", other),
                )
                .into())
            }
        }
    }

    /// Encode an Entry into its wire literal.
    ///
    /// Process-local variants fail unless a matching deflater is registered.
    pub fn deflate(&self, entry: &Entry) -> Result<WireLiteral, Error> {
        match entry {
            Entry::String(e) => Ok(WireLiteral {
                literal_type: Some("String".to_string()),
                name: Some(e.name.clone()),
                string_value: Some(e.value.clone()),
                ..Default::default()
            }),

            Entry::Folder(e) => {
                let mut children = Vec::with_capacity(e.children.len());
                for child in &e.children {
                    children.push(self.deflate(child)?);
                }
                Ok(WireLiteral {
                    literal_type: Some("Folder".to_string()),
                    name: Some(e.name.clone()),
                    children: Some(children),
                    ..Default::default()
                })
            }

            Entry::Blob(e) => Ok(WireLiteral {
                literal_type: Some("Blob".to_string()),
                name: Some(e.name.clone()),
                mime: Some(e.mime.clone()),
                data: Some(e.encoded_data()),
                ..Default::default()
            }),

            Entry::Error(e) => Ok(WireLiteral {
                literal_type: Some("Error".to_string()),
                name: Some(e.name.clone()),
                code: Some(e.code.clone()),
                authority: Some(e.authority.clone()),
                string_value: Some(e.message.clone()),
                ..Default::default()
            }),

            Entry::Function(e) => Ok(WireLiteral {
                literal_type: Some("Function".to_string()),
                name: Some(e.name.clone()),
                ..Default::default()
            }),

            Entry::Device(_) | Entry::Channel(_) => {
                let type_name = entry.type_name();
                let deflater = self.deflaters.get(type_name).ok_or_else(|| {
                    Error::protocol(format!(
                        "{} entries are process-local and cannot cross the wire",
                        type_name
                    ))
                })?;
                let deflated = deflater(entry)?;
                if deflated.literal_type.as_deref() != Some(type_name) {
                    return Err(Error::protocol(format!(
                        "deflater for {} returned {}",
                        type_name,
                        deflated.literal_type.as_deref().unwrap_or("nothing")
                    )));
                }
                Ok(deflated)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::NullDevice;
    use crate::entry::DeviceEntry;
    use std::sync::Arc;

    fn codec() -> WireCodec {
        WireCodec::new()
    }

    #[test]
    fn string_round_trips() {
        let entry = Entry::string("greeting", "hello");
        let wire = codec().deflate(&entry).unwrap();
        assert_eq!(codec().inflate(&wire).unwrap(), entry);
    }

    #[test]
    fn blob_round_trips() {
        let entry: Entry = BlobEntry::from_text("b", "payload").into();
        let wire = codec().deflate(&entry).unwrap();
        assert_eq!(wire.data.as_deref(), Some("cGF5bG9hZA=="));
        assert_eq!(codec().inflate(&wire).unwrap(), entry);
    }

    #[test]
    fn folder_round_trips_recursively() {
        let entry = Entry::folder(
            "root",
            vec![
                Entry::string("a", "1"),
                Entry::folder("sub", vec![Entry::string("b", "2")]),
                ErrorEntry::new("e", "code", "tests", "msg").into(),
                FunctionEntry::new("f").into(),
            ],
        );
        let wire = codec().deflate(&entry).unwrap();
        assert_eq!(codec().inflate(&wire).unwrap(), entry);
    }

    #[test]
    fn missing_type_becomes_error_entry() {
        let raw = WireLiteral {
            name: Some("odd".to_string()),
            ..Default::default()
        };
        match codec().inflate(&raw).unwrap() {
            Entry::Error(e) => {
                assert_eq!(e.code, "missing-type");
                assert_eq!(e.name, "odd");
            }
            other => panic!("expected Error entry, got {:?}", other),
        }
    }

    #[test]
    fn unknown_type_becomes_error_entry() {
        let raw = WireLiteral::of_type("Sprocket");
        match codec().inflate(&raw).unwrap() {
            Entry::Error(e) => assert_eq!(e.code, "unimplemented-type"),
            other => panic!("expected Error entry, got {:?}", other),
        }
    }

    #[test]
    fn bad_folder_child_degrades_without_failing_decode() {
        let raw = WireLiteral {
            literal_type: Some("Folder".to_string()),
            name: Some("f".to_string()),
            children: Some(vec![
                WireLiteral {
                    literal_type: Some("String".to_string()),
                    name: Some("good".to_string()),
                    string_value: Some("v".to_string()),
                    ..Default::default()
                },
                WireLiteral::of_type("Mystery"),
            ]),
            ..Default::default()
        };
        let folder = match codec().inflate(&raw).unwrap() {
            Entry::Folder(f) => f,
            other => panic!("expected Folder, got {:?}", other),
        };
        assert_eq!(folder.children.len(), 2);
        assert!(matches!(folder.children[1], Entry::Error(_)));
    }

    #[test]
    fn device_rejected_without_deflater() {
        let entry: Entry = DeviceEntry::new("dev", Arc::new(NullDevice)).into();
        assert!(matches!(
            codec().deflate(&entry),
            Err(Error::Protocol { .. })
        ));
    }

    #[test]
    fn extra_deflater_rewrites_device() {
        let mut c = codec();
        c.add_deflater("Device", |entry| {
            let mut lit = WireLiteral::of_type("Device");
            lit.name = Some(entry.name().to_string());
            lit.extra.insert(
                "ReversalPrefix".to_string(),
                serde_json::Value::String("/pub/0".to_string()),
            );
            Ok(lit)
        });
        let entry: Entry = DeviceEntry::new("dev", Arc::new(NullDevice)).into();
        let wire = c.deflate(&entry).unwrap();
        assert_eq!(wire.extra_str("ReversalPrefix"), Some("/pub/0"));
    }

    #[test]
    fn mismatched_extension_type_is_loud() {
        let mut c = codec();
        c.add_inflater("Gizmo", |_raw| Ok(Entry::string("nope", "wrong kind")));
        let raw = WireLiteral::of_type("Gizmo");
        assert!(matches!(c.inflate(&raw), Err(Error::Protocol { .. })));
    }
}
