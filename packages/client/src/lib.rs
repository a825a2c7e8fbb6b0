//! # pathlink-client
//!
//! Client transports for the pathlink protocol. All of them share one
//! encode/decode path and the strict-FIFO request/response correlation;
//! they differ only in how bytes cross the boundary:
//!
//! - [`HttpClient`] - stateless, one POST per operation
//! - [`WebSocketClient`] - persistent duplex with keepalive and inline
//!   channels
//! - the stdio line transport lives in `pathlink-stdio`
//!
//! [`RemoteDevice`] mounts a remote namespace behind the local Device
//! contract, which is what makes the whole system network-transparent.

mod channels;
mod client;
mod http;
mod remote;
mod websocket;

pub use channels::InlineChannelClient;
pub use client::{rejection_message, Client, ClientCore, ClientExtension, Correlator};
pub use http::HttpClient;
pub use remote::{RemoteDevice, RemoteHandle};
pub use websocket::WebSocketClient;
