//! Core pathlink: the namespace protocol engine's shared types.
//!
//! This layer carries everything the server, client, and extensions agree
//! on:
//! - `Entry`: the typed value model (String, Blob, Folder, Error, Function,
//!   plus the process-local Device and Channel references)
//! - `WireCodec`: inflate/deflate between entries and wire literals, with
//!   the extension maps reversal and channel framing hang off of
//! - `Environment`: the mount table with longest-prefix resolution and
//!   scoped sub-namespaces
//! - `EnumerationWriter`: depth-bounded tree walks and their reconstruction
//! - `Channel`: ordered, at-most-one-terminal subscription streams
//! - `Device` / `Handle`: the capability contract every backing store
//!   implements
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use pathlink_api::{devices::TempDevice, Entry, Environment};
//!
//! # async fn demo() -> Result<(), pathlink_api::Error> {
//! let env = Arc::new(Environment::new());
//! env.bind("/tmp", Arc::new(TempDevice::new()))?;
//!
//! let handle = env.resolve_required("/tmp/x").await?;
//! handle.put(Some(Entry::string("v", "hello"))).await?;
//! # Ok(())
//! # }
//! ```

mod channel;
mod codec;
mod device;
mod entry;
mod enumeration;
mod environment;
mod error;
mod wire;

pub mod devices;

pub use channel::{
    channel, Channel, ChannelEntry, ChannelFactory, ChannelSender, ChannelStopper, LocalChannels,
    LocalStopper, Packet, Producer, ServerChannel, StopState,
};
pub use codec::{Deflater, Inflater, WireCodec};
pub use device::{Caps, Device, Handle};
pub use entry::{
    BlobEntry, DeviceEntry, Entry, ErrorEntry, FolderEntry, FunctionEntry, StringEntry,
};
pub use enumeration::{
    decode_segment, encode_segment, enumerate_into_subscription, notification, EnumerationWriter,
};
pub use environment::{ChildFailure, Environment};
pub use error::Error;
pub use wire::{FrameSink, Request, Response, WireFrame, WireLiteral, WireRequest, WireResponse};
