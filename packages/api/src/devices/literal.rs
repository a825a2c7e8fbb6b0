//! Read-only device over a literal Entry tree.

use async_trait::async_trait;

use crate::device::{Caps, Device, Handle};
use crate::entry::Entry;
use crate::enumeration::{decode_segment, EnumerationWriter};
use crate::error::Error;

/// Lets callers poke at a fixed Entry. Most useful with Folder trees, but a
/// bare String works too.
pub struct LiteralDevice {
    root: Entry,
}

impl LiteralDevice {
    pub fn new(root: Entry) -> Self {
        Self { root }
    }

    /// A device holding one String value.
    pub fn of_string(value: impl Into<String>) -> Self {
        Self::new(Entry::string("literal", value))
    }
}

#[async_trait]
impl Device for LiteralDevice {
    async fn resolve(&self, sub_path: &str) -> Result<Option<Box<dyn Handle>>, Error> {
        if sub_path.is_empty() || sub_path == "/" {
            return Ok(Some(Box::new(LiteralHandle {
                literal: self.root.clone(),
            })));
        }

        let mut current = &self.root;
        for segment in sub_path.split('/').filter(|s| !s.is_empty()) {
            let name = decode_segment(segment);
            let next = match current {
                Entry::Folder(folder) => folder.child(&name),
                _ => None,
            };
            current = next.ok_or_else(|| {
                Error::not_found(format!("literal walk of {} missed at {}", sub_path, name))
            })?;
        }
        Ok(Some(Box::new(LiteralHandle {
            literal: current.clone(),
        })))
    }
}

struct LiteralHandle {
    literal: Entry,
}

#[async_trait]
impl Handle for LiteralHandle {
    fn caps(&self) -> Caps {
        Caps::readable()
    }

    async fn get(&self) -> Result<Option<Entry>, Error> {
        Ok(Some(self.literal.clone()))
    }

    async fn enumerate(&self, writer: &mut EnumerationWriter) -> Result<(), Error> {
        walk(&self.literal, writer)
    }
}

fn walk(literal: &Entry, writer: &mut EnumerationWriter) -> Result<(), Error> {
    match literal {
        Entry::Folder(folder) => {
            writer.visit(Entry::folder("", Vec::new()));
            if writer.can_descend() {
                for child in &folder.children {
                    writer.descend(child.name())?;
                    walk(child, writer)?;
                    writer.ascend()?;
                }
            }
        }
        other => {
            writer.visit(other.clone());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> LiteralDevice {
        LiteralDevice::new(Entry::folder(
            "root",
            vec![
                Entry::string("a", "1"),
                Entry::folder("sub", vec![Entry::string("b", "2")]),
            ],
        ))
    }

    #[tokio::test]
    async fn resolves_nested_paths() {
        let device = tree();
        let handle = device.resolve("/sub/b").await.unwrap().unwrap();
        let value = handle.get().await.unwrap().unwrap();
        assert_eq!(value.as_string().unwrap().value, "2");
    }

    #[tokio::test]
    async fn missing_child_is_a_typed_miss() {
        let device = tree();
        assert!(matches!(
            device.resolve("/sub/nope").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn enumeration_round_trips_the_tree() {
        let device = tree();
        let handle = device.resolve("").await.unwrap().unwrap();
        let mut writer = EnumerationWriter::new(3);
        handle.enumerate(&mut writer).await.unwrap();

        let rebuilt = writer.reconstruct().unwrap().unwrap();
        let rebuilt = rebuilt.as_folder().unwrap();
        assert_eq!(rebuilt.child_string("a").unwrap(), "1");
        let sub = rebuilt.child("sub").unwrap().as_folder().unwrap();
        assert_eq!(sub.child_string("b").unwrap(), "2");
    }

    #[tokio::test]
    async fn enumeration_respects_depth() {
        let device = tree();
        let handle = device.resolve("").await.unwrap().unwrap();
        let mut writer = EnumerationWriter::new(1);
        handle.enumerate(&mut writer).await.unwrap();

        let rebuilt = writer.reconstruct().unwrap().unwrap();
        let sub = rebuilt.as_folder().unwrap().child("sub").unwrap();
        assert!(sub.as_folder().unwrap().children.is_empty());
    }

    #[tokio::test]
    async fn writes_are_unsupported() {
        let device = tree();
        let handle = device.resolve("/a").await.unwrap().unwrap();
        assert!(!handle.caps().put);
        assert!(matches!(
            handle.put(None).await,
            Err(Error::NotSupported { .. })
        ));
    }
}
