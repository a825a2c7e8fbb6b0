//! Depth-bounded tree walks: the flat visit log and its reconstruction.
//!
//! An EnumerationWriter accumulates `(percent-encoded slash-joined path,
//! Entry)` pairs while a device walks its tree. The flat log travels on the
//! wire as one `enumeration` Folder; `reconstruct` turns a fully-walked log
//! back into a nested Folder.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::channel::{ChannelEntry, ChannelFactory};
use crate::device::Handle;
use crate::entry::{Entry, ErrorEntry, FolderEntry};
use crate::error::Error;

const AUTHORITY: &str = "pathlink/api";

// Path segments keep the characters encodeURIComponent keeps.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Percent-encode one path segment.
pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

/// Decode one path segment.
pub fn decode_segment(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}

/// Accumulates a flat, depth-bounded walk of a subtree.
pub struct EnumerationWriter {
    depth: usize,
    entries: Vec<Entry>,
    names: Vec<String>,
}

impl EnumerationWriter {
    pub fn new(depth: u32) -> Self {
        Self {
            depth: depth as usize,
            entries: Vec::new(),
            names: Vec::new(),
        }
    }

    fn cursor(&self) -> String {
        self.names
            .iter()
            .map(|n| encode_segment(n))
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Record an entry at the current cursor. The entry's name is replaced
    /// by the cursor path.
    pub fn visit(&mut self, mut entry: Entry) -> &mut Self {
        entry.set_name(self.cursor());
        self.entries.push(entry);
        self
    }

    pub fn can_descend(&self) -> bool {
        self.names.len() < self.depth
    }

    pub fn remaining_depth(&self) -> u32 {
        (self.depth - self.names.len()) as u32
    }

    /// Step into a child. Descending past the configured depth is a caller
    /// bug.
    pub fn descend(&mut self, name: impl Into<String>) -> Result<(), Error> {
        if !self.can_descend() {
            return Err(Error::protocol(format!(
                "enumeration descended past its depth bound of {}",
                self.depth
            )));
        }
        self.names.push(name.into());
        Ok(())
    }

    pub fn ascend(&mut self) -> Result<(), Error> {
        if self.names.pop().is_none() {
            return Err(Error::protocol("enumeration ascended above its root"));
        }
        Ok(())
    }

    /// Splice another walk's flat log in at the current cursor. Used by
    /// remote proxies to transclude the far side's enumeration.
    pub fn visit_enumeration(&mut self, entry: Entry) -> Result<(), Error> {
        let folder = match entry {
            Entry::Folder(f) => f,
            other => {
                return Err(Error::malformed(format!(
                    "expected an enumeration Folder, got a {}",
                    other.type_name()
                )));
            }
        };
        if folder.name != "enumeration" {
            return Err(Error::malformed(format!(
                "expected a Folder named enumeration, got {:?}",
                folder.name
            )));
        }

        let prefix = self.cursor();
        for mut child in folder.children {
            if !prefix.is_empty() {
                let name = if child.name().is_empty() {
                    prefix.clone()
                } else {
                    format!("{}/{}", prefix, child.name())
                };
                child.set_name(name);
            }
            self.entries.push(child);
        }
        Ok(())
    }

    /// The wire form of the walk: a Folder named `enumeration` holding the
    /// flat log. Only valid once the cursor is back at the root.
    pub fn to_output(&self) -> Result<FolderEntry, Error> {
        if !self.names.is_empty() {
            return Err(Error::protocol(
                "enumeration serialized while still descended",
            ));
        }
        Ok(FolderEntry::new("enumeration", self.entries.clone()))
    }

    /// Rebuild the nested tree from the flat log.
    ///
    /// Frames are pushed onto an explicit stack and popped by comparing
    /// path length, attaching each completed node to the Folder above it.
    pub fn reconstruct(self) -> Result<Option<Entry>, Error> {
        if !self.names.is_empty() {
            return Err(Error::protocol(
                "enumeration reconstructed while still descended",
            ));
        }

        fn collapse_top(stack: &mut Vec<Entry>) -> Result<(), Error> {
            let child = stack.pop().expect("collapse on empty stack");
            match stack.last_mut() {
                Some(Entry::Folder(parent)) => {
                    parent.children.push(child);
                    Ok(())
                }
                Some(other) => Err(Error::protocol(format!(
                    "enumeration put something inside a non-folder {}",
                    other.type_name()
                ))),
                None => unreachable!("collapse below the root"),
            }
        }

        let mut stack: Vec<Entry> = Vec::new();
        for mut entry in self.entries {
            let parts: Vec<String> = if entry.name().is_empty() {
                Vec::new()
            } else {
                entry.name().split('/').map(|p| p.to_string()).collect()
            };

            while parts.len() < stack.len() {
                collapse_top(&mut stack)?;
            }
            if parts.len() == stack.len() {
                entry.set_name(decode_segment(parts.last().map(String::as_str).unwrap_or("")));
                stack.push(entry);
            }
            // A gap in the walk (parts deeper than the stack) drops the node.
        }

        while stack.len() > 1 {
            collapse_top(&mut stack)?;
        }
        Ok(stack.pop())
    }
}

/// Build one subscription notification Folder.
pub fn notification(kind: &str, path: Option<&str>, entry: Option<Entry>) -> Entry {
    let mut children = vec![Entry::string("type", kind)];
    if let Some(path) = path {
        children.push(Entry::string("path", path));
    }
    if let Some(entry) = entry {
        children.push(entry.with_name("entry"));
    }
    Entry::folder("notif", children)
}

/// Adapt an enumerable handle into a one-shot subscription: an `Added`
/// notification per visited node, `Ready`, then a `nosub` terminal telling
/// the consumer there will be no live updates.
pub async fn enumerate_into_subscription(
    handle: Box<dyn Handle>,
    depth: u32,
    channels: &dyn ChannelFactory,
) -> Result<ChannelEntry, Error> {
    channels
        .open(Box::new(move |chan| {
            tokio::spawn(async move {
                let mut writer = EnumerationWriter::new(depth);
                let output = match handle.enumerate(&mut writer).await {
                    Ok(()) => writer.to_output(),
                    Err(err) => Err(err),
                };
                match output {
                    Ok(folder) => {
                        for mut entry in folder.children {
                            let path = entry.name().to_string();
                            entry.set_name("entry");
                            let _ = chan.next(notification("Added", Some(&path), Some(entry)));
                        }
                        let _ = chan.next(notification("Ready", None, None));
                        let _ = chan.error(Some(Entry::string(
                            "nosub",
                            "this entry does not implement reactive subscriptions",
                        )));
                    }
                    Err(err) => {
                        let _ = chan.error(Some(
                            ErrorEntry::new(
                                "reason",
                                "enumeration-failed",
                                AUTHORITY,
                                err.to_string(),
                            )
                            .into(),
                        ));
                    }
                }
            });
        }))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk_folder(writer: &mut EnumerationWriter) {
        // Shape: root { a: "1", sub { b: "2" } }
        writer.visit(Entry::folder("", vec![]));
        writer.descend("a").unwrap();
        writer.visit(Entry::string("", "1"));
        writer.ascend().unwrap();
        writer.descend("sub").unwrap();
        writer.visit(Entry::folder("", vec![]));
        if writer.can_descend() {
            writer.descend("b").unwrap();
            writer.visit(Entry::string("", "2"));
            writer.ascend().unwrap();
        }
        writer.ascend().unwrap();
    }

    #[test]
    fn reconstruct_round_trips_a_full_walk() {
        let mut writer = EnumerationWriter::new(3);
        walk_folder(&mut writer);

        let root = writer.reconstruct().unwrap().unwrap();
        let root = root.as_folder().unwrap();
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.child_string("a").unwrap(), "1");
        let sub = root.child("sub").unwrap().as_folder().unwrap();
        assert_eq!(sub.child_string("b").unwrap(), "2");
    }

    #[test]
    fn depth_cutoff_hides_deeper_nodes() {
        let mut writer = EnumerationWriter::new(1);
        walk_folder(&mut writer);

        let root = writer.reconstruct().unwrap().unwrap();
        let root = root.as_folder().unwrap();
        assert_eq!(root.child_string("a").unwrap(), "1");
        // `sub` is visited at the cutoff, but `b` is not.
        let sub = root.child("sub").unwrap().as_folder().unwrap();
        assert!(sub.children.is_empty());
    }

    #[test]
    fn descend_past_depth_is_loud() {
        let mut writer = EnumerationWriter::new(1);
        writer.descend("one").unwrap();
        assert!(matches!(
            writer.descend("two"),
            Err(Error::Protocol { .. })
        ));
    }

    #[test]
    fn ascend_above_root_is_loud() {
        let mut writer = EnumerationWriter::new(1);
        assert!(matches!(writer.ascend(), Err(Error::Protocol { .. })));
    }

    #[test]
    fn to_output_requires_root_cursor() {
        let mut writer = EnumerationWriter::new(2);
        writer.descend("partial").unwrap();
        assert!(writer.to_output().is_err());
        writer.ascend().unwrap();
        assert!(writer.to_output().is_ok());
    }

    #[test]
    fn segments_are_percent_encoded() {
        let mut writer = EnumerationWriter::new(2);
        writer.visit(Entry::folder("", vec![]));
        writer.descend("with space").unwrap();
        writer.visit(Entry::string("", "v"));
        writer.ascend().unwrap();

        let output = writer.to_output().unwrap();
        assert_eq!(output.children[1].name(), "with%20space");
    }

    #[test]
    fn reconstruct_decodes_segment_names() {
        let mut writer = EnumerationWriter::new(2);
        writer.visit(Entry::folder("", vec![]));
        writer.descend("with space").unwrap();
        writer.visit(Entry::string("", "v"));
        writer.ascend().unwrap();

        let root = writer.reconstruct().unwrap().unwrap();
        let root = root.as_folder().unwrap();
        assert_eq!(root.child_string("with space").unwrap(), "v");
    }

    #[test]
    fn transclusion_rebases_child_paths() {
        let remote = Entry::folder(
            "enumeration",
            vec![
                Entry::folder("", vec![]),
                Entry::string("x", "1"),
                Entry::string("deep/y", "2"),
            ],
        );

        let mut writer = EnumerationWriter::new(3);
        writer.visit(Entry::folder("", vec![]));
        writer.descend("mnt").unwrap();
        writer.visit_enumeration(remote).unwrap();
        writer.ascend().unwrap();

        let output = writer.to_output().unwrap();
        let names: Vec<&str> = output.children.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["", "mnt", "mnt/x", "mnt/deep/y"]);
    }

    #[test]
    fn transclusion_rejects_non_enumerations() {
        let mut writer = EnumerationWriter::new(1);
        assert!(writer
            .visit_enumeration(Entry::string("nope", "x"))
            .is_err());
        assert!(writer
            .visit_enumeration(Entry::folder("data", vec![]))
            .is_err());
    }

    #[test]
    fn single_leaf_reconstructs_to_itself() {
        let mut writer = EnumerationWriter::new(0);
        writer.visit(Entry::string("", "leaf"));
        let root = writer.reconstruct().unwrap().unwrap();
        assert_eq!(root, Entry::string("", "leaf"));
    }

    #[test]
    fn empty_walk_reconstructs_to_nothing() {
        let writer = EnumerationWriter::new(1);
        assert!(writer.reconstruct().unwrap().is_none());
    }
}
