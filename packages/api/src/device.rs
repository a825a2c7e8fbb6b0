//! The Device / Handle capability contract.
//!
//! A Device resolves a sub-path to a Handle; a Handle exposes some subset of
//! get/put/invoke/enumerate/subscribe. Support is per-capability, not
//! per-type: a path can be gettable without being puttable. Callers check
//! `caps()` before dispatching and raise a typed unsupported failure when a
//! capability is absent - that query-then-call shape is the whole
//! extensibility mechanism, shared by in-memory scratch, remote proxies,
//! and everything else behind the namespace.

use async_trait::async_trait;

use crate::channel::{ChannelEntry, ChannelFactory};
use crate::entry::Entry;
use crate::enumeration::EnumerationWriter;
use crate::error::Error;

/// The capabilities a resolved handle supports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Caps {
    pub get: bool,
    pub put: bool,
    pub invoke: bool,
    pub enumerate: bool,
    pub subscribe: bool,
}

impl Caps {
    /// A read-only value: get plus enumerate.
    pub fn readable() -> Self {
        Caps {
            get: true,
            enumerate: true,
            ..Default::default()
        }
    }

    /// Everything. Remote proxies claim this and let the far side decide.
    pub fn all() -> Self {
        Caps {
            get: true,
            put: true,
            invoke: true,
            enumerate: true,
            subscribe: true,
        }
    }
}

/// A process-local capability object: resolves sub-paths to handles.
///
/// Sub-paths are either empty (the device root) or start with `/`.
#[async_trait]
pub trait Device: Send + Sync {
    async fn resolve(&self, sub_path: &str) -> Result<Option<Box<dyn Handle>>, Error>;
}

/// A resolved path. Every method is optional per `caps()`; the defaults
/// raise the typed unsupported-capability failure.
#[async_trait]
pub trait Handle: Send + Sync {
    fn caps(&self) -> Caps;

    /// Read the value, or `None` when the path holds nothing.
    async fn get(&self) -> Result<Option<Entry>, Error> {
        Err(Error::not_supported("get"))
    }

    /// Write a value; `None` deletes.
    async fn put(&self, _value: Option<Entry>) -> Result<(), Error> {
        Err(Error::not_supported("put"))
    }

    /// Call the function behind this path.
    async fn invoke(&self, _input: Option<Entry>) -> Result<Option<Entry>, Error> {
        Err(Error::not_supported("invoke"))
    }

    /// Walk this subtree into the writer, depth-bounded.
    async fn enumerate(&self, _writer: &mut EnumerationWriter) -> Result<(), Error> {
        Err(Error::not_supported("enumerate"))
    }

    /// Open a live notification stream for this subtree.
    async fn subscribe(
        &self,
        _depth: u32,
        _channels: &dyn ChannelFactory,
    ) -> Result<ChannelEntry, Error> {
        Err(Error::not_supported("subscribe"))
    }
}
