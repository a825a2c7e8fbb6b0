//! The Environment - one mount table, resolved like a plan9 namespace.
//!
//! `bind()` puts devices in; `resolve()` gets handles out, always through
//! the longest matching mount prefix. Paths that sit between the root and a
//! mount (recorded as prefixes) resolve to synthetic folder handles, so a
//! mount never appears to not exist partway down its own path.
//!
//! `path_to()` scopes a sub-namespace: the child sees its own binds first
//! and falls through to everything its ancestors exposed, with the re-based
//! parent chain fixed at creation time. You can never walk out of an
//! Environment, which makes scoping double as access control.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::device::{Caps, Device, Handle};
use crate::entry::{Entry, ErrorEntry, FolderEntry};
use crate::enumeration::{decode_segment, EnumerationWriter};
use crate::error::Error;

const AUTHORITY: &str = "pathlink/api";

/// What to do when one mount's enumeration fails during a virtual-node walk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChildFailure {
    /// Fold the failure into the walk as an inline `Error` entry.
    #[default]
    Inline,
    /// Abort the whole enumeration with the failure.
    Abort,
}

/// A mount table mapping absolute path prefixes to devices.
///
/// Clones are handles onto the same live table, so a scoped child keeps
/// seeing binds made on its ancestors after it was created.
#[derive(Clone)]
pub struct Environment {
    base_uri: String,
    devices: Arc<RwLock<BTreeMap<String, Arc<dyn Device>>>>,
    prefixes: Arc<RwLock<BTreeSet<String>>>,
    parents: Vec<(Environment, String)>,
    child_failure: ChildFailure,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self::with_base_uri("env:")
    }

    pub fn with_base_uri(base_uri: impl Into<String>) -> Self {
        Self {
            base_uri: base_uri.into(),
            devices: Arc::new(RwLock::new(BTreeMap::new())),
            prefixes: Arc::new(RwLock::new(BTreeSet::new())),
            parents: Vec::new(),
            child_failure: ChildFailure::default(),
        }
    }

    #[must_use]
    pub fn with_child_failure(mut self, policy: ChildFailure) -> Self {
        self.child_failure = policy;
        self
    }

    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    /// Introduce a device at an absolute path. Expected during setup;
    /// concurrent binds during active traffic are the caller's problem.
    pub fn bind(&self, target: &str, device: Arc<dyn Device>) -> Result<(), Error> {
        let target = if target == "/" { "" } else { target };
        if !target.is_empty() && !target.starts_with('/') {
            return Err(Error::malformed(format!(
                "bind only accepts absolute mount paths, got {:?}",
                target
            )));
        }
        let target = target.replace(' ', "%20");

        let mut devices = self.devices.write().expect("mount table poisoned");
        let mut prefixes = self.prefixes.write().expect("mount table poisoned");
        devices.insert(target.clone(), device);

        if !target.is_empty() {
            let mut ancestor = &target[..target.rfind('/').unwrap_or(0)];
            loop {
                prefixes.insert(ancestor.to_string());
                if ancestor.is_empty() {
                    break;
                }
                ancestor = &ancestor[..ancestor.rfind('/').unwrap_or(0)];
            }
        }
        Ok(())
    }

    /// Scope a sub-path as a new Environment. Future binds on the parent
    /// cascade down; binds on the child never go up.
    pub fn path_to(&self, path: &str) -> Environment {
        let path = if path == "/" { "" } else { path };

        let mut parents = vec![(self.clone(), path.to_string())];
        for (env, sub) in &self.parents {
            parents.push((env.clone(), format!("{}{}", sub, path)));
        }
        if parents.len() > 5 {
            tracing::warn!(depth = parents.len(), "environment parent chain is deep");
        }

        Environment {
            base_uri: format!("{}{}", self.base_uri, path),
            devices: Arc::new(RwLock::new(BTreeMap::new())),
            prefixes: Arc::new(RwLock::new(BTreeSet::new())),
            parents,
            child_failure: self.child_failure,
        }
    }

    /// The currently bound mount targets, most specific last.
    pub fn mounts(&self) -> Vec<String> {
        self.devices
            .read()
            .expect("mount table poisoned")
            .keys()
            .cloned()
            .collect()
    }

    fn normalize(path: &str) -> Result<String, Error> {
        let path = if path == "/" { "" } else { path };
        if path.split('/').any(|segment| segment == "..") {
            return Err(Error::malformed(format!(
                "directory traversal rejected in {:?}",
                path
            )));
        }
        Ok(path.replace(' ', "%20"))
    }

    /// The most specific mount covering `path`, with the leftover sub-path.
    fn match_mount(&self, path: &str) -> Option<(Arc<dyn Device>, String)> {
        let devices = self.devices.read().expect("mount table poisoned");
        let mut so_far = path;
        loop {
            if let Some(device) = devices.get(so_far) {
                return Some((Arc::clone(device), path[so_far.len()..].to_string()));
            }
            if so_far.is_empty() {
                return None;
            }
            so_far = &so_far[..so_far.rfind('/').unwrap_or(0)];
        }
    }

    async fn resolve_local(&self, path: &str) -> Result<Option<Box<dyn Handle>>, Error> {
        if let Some((device, sub_path)) = self.match_mount(path) {
            if let Some(handle) = device.resolve(&sub_path).await? {
                return Ok(Some(handle));
            }
        }

        // A bare prefix between the root and some mount still resolves,
        // as a synthetic folder describing its children.
        let is_prefix = self
            .prefixes
            .read()
            .expect("mount table poisoned")
            .contains(path);
        if is_prefix {
            return Ok(Some(Box::new(VirtualHandle {
                env: self.clone(),
                path: path.to_string(),
            })));
        }

        Ok(None)
    }

    /// Resolve a path to a handle: local table first, then the parent chain
    /// in order, each parent queried under its re-based sub-path.
    pub async fn resolve(&self, path: &str) -> Result<Option<Box<dyn Handle>>, Error> {
        let path = Self::normalize(path)?;

        if let Some(handle) = self.resolve_local(&path).await? {
            return Ok(Some(handle));
        }
        for (env, sub) in &self.parents {
            let rebased = format!("{}{}", sub, path);
            if let Some(handle) = env.resolve_local(&rebased).await? {
                return Ok(Some(handle));
            }
        }
        Ok(None)
    }

    /// Resolve, raising the typed not-found failure on a miss.
    pub async fn resolve_required(&self, path: &str) -> Result<Box<dyn Handle>, Error> {
        self.resolve(path)
            .await?
            .ok_or_else(|| Error::not_found(path))
    }

    /// Immediate children of a bare prefix: device mounts first, then
    /// deeper prefixes whose segment isn't already taken by a mount.
    fn children_of(&self, path: &str) -> (Vec<(String, Arc<dyn Device>)>, Vec<(String, String)>) {
        let devices = self.devices.read().expect("mount table poisoned");
        let prefixes = self.prefixes.read().expect("mount table poisoned");

        let mut seen = BTreeSet::new();
        let mut device_children = Vec::new();
        for (target, device) in devices.iter() {
            if let Some(segment) = child_segment(target, path) {
                if seen.insert(segment.clone()) {
                    device_children.push((segment, Arc::clone(device)));
                }
            }
        }

        let mut prefix_children = Vec::new();
        for prefix in prefixes.iter() {
            if let Some(segment) = child_segment(prefix, path) {
                if seen.insert(segment.clone()) {
                    prefix_children.push((segment, prefix.clone()));
                }
            }
        }

        (device_children, prefix_children)
    }
}

fn child_segment(full: &str, base: &str) -> Option<String> {
    let rest = full.strip_prefix(base)?.strip_prefix('/')?;
    if rest.is_empty() || rest.contains('/') {
        None
    } else {
        Some(rest.to_string())
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Environment [{}]>", self.mounts().join(" "))
    }
}

/// Synthetic folder handle for a bare mount prefix.
struct VirtualHandle {
    env: Environment,
    path: String,
}

#[async_trait]
impl Handle for VirtualHandle {
    fn caps(&self) -> Caps {
        Caps::readable()
    }

    async fn get(&self) -> Result<Option<Entry>, Error> {
        let (device_children, prefix_children) = self.env.children_of(&self.path);
        if device_children.is_empty() && prefix_children.is_empty() {
            return Err(Error::protocol(format!(
                "virtual path {:?} has no contents",
                self.path
            )));
        }

        let name = match self.path.rsplit('/').next() {
            Some("") | None => "root".to_string(),
            Some(segment) => decode_segment(segment),
        };
        Ok(Some(FolderEntry::new(name, Vec::new()).into()))
    }

    async fn enumerate(&self, writer: &mut EnumerationWriter) -> Result<(), Error> {
        let (device_children, prefix_children) = self.env.children_of(&self.path);
        if device_children.is_empty() && prefix_children.is_empty() {
            tracing::warn!(path = %self.path, "enumerating a virtual path with no contents");
            return Ok(());
        }

        writer.visit(Entry::folder("", Vec::new()));
        if !writer.can_descend() {
            return Ok(());
        }

        for (segment, device) in device_children {
            writer.descend(decode_segment(&segment))?;
            if let Err(err) = walk_mount(device, writer).await {
                match self.env.child_failure {
                    ChildFailure::Inline => {
                        writer.visit(
                            ErrorEntry::new(
                                "",
                                "enumeration-failed",
                                AUTHORITY,
                                err.to_string(),
                            )
                            .into(),
                        );
                    }
                    ChildFailure::Abort => return Err(err),
                }
            }
            writer.ascend()?;
        }

        for (segment, prefix) in prefix_children {
            writer.descend(decode_segment(&segment))?;
            let child: Box<dyn Handle> = Box::new(VirtualHandle {
                env: self.env.clone(),
                path: prefix,
            });
            child.enumerate(writer).await?;
            writer.ascend()?;
        }

        Ok(())
    }
}

/// Describe one mount's root into the writer: recurse when it can
/// enumerate, fall back to its value when it can only be read.
async fn walk_mount(
    device: Arc<dyn Device>,
    writer: &mut EnumerationWriter,
) -> Result<(), Error> {
    let handle = device
        .resolve("")
        .await?
        .ok_or_else(|| Error::other("mount root resolved to nothing"))?;
    let caps = handle.caps();
    if caps.enumerate {
        handle.enumerate(writer).await
    } else if caps.get {
        if let Some(value) = handle.get().await? {
            writer.visit(value);
        }
        Ok(())
    } else {
        Err(Error::other("mount root cannot be described"))
    }
}
