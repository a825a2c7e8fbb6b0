//! # pathlink-server
//!
//! The request-dispatch side of the pathlink protocol: an operation table
//! over an Environment, lockstep per-connection processing, and the channel
//! extensions that stream subscription packets inline over one connection.
//!
//! ```ignore
//! use std::sync::Arc;
//! use pathlink_api::{devices::TempDevice, Environment};
//! use pathlink_server::{ChannelExtension, InlineChannelCarrier, Server};
//!
//! let env = Arc::new(Environment::new());
//! env.bind("/tmp", Arc::new(TempDevice::new()))?;
//!
//! let server = Server::with_post(env, outbound_sink);
//! server.attach(&ChannelExtension::new())?;
//! server.attach(&InlineChannelCarrier::new())?;
//! ```

mod channels;
mod core_ops;
mod listen;
mod server;

pub use channels::{ChannelExtension, InlineChannelCarrier};
pub use listen::{accept_websocket, serve_websocket};
pub use server::{
    op_handler, EncodedResponse, FrameSink, OpHandler, Server, ServerExtension,
};
