//! # pathlink-stdio
//!
//! The line-delimited duplex transport: each frame is one
//! `" -- " + JSON + "\n"` line, and anything else on the stream is
//! harmless diagnostics. A [`Tenant`] serves a namespace over a stream
//! pair (usually its own stdin/stdout); [`spawn_tenant`] launches a child
//! process and mounts its namespace on this side.
//!
//! Both directions carry the full protocol - subscriptions stream inline,
//! and reversal lets the tenant call back into devices the host passes it.

mod client;
mod frame;
mod host;
mod tenant;

pub use client::StdioClient;
pub use frame::{decode_line, encode_line};
pub use host::{spawn_tenant, TenantProcess};
pub use tenant::Tenant;
