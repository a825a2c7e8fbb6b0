//! pathlink: a network-transparent hierarchical namespace protocol.
//!
//! Any process can expose a tree of named, typed values behind a small
//! uniform verb set - get, store, unlink, enumerate, invoke, subscribe -
//! and remote peers interact with that tree identically whether it lives
//! in-process, over HTTP, over a WebSocket, or across a pair of pipes.
//!
//! This crate re-exports the whole public surface; the layers also ship
//! individually as `pathlink-api`, `pathlink-server`, `pathlink-client`,
//! `pathlink-reversal`, and `pathlink-stdio`.

pub use pathlink_api::*;

pub mod server {
    pub use pathlink_server::*;
}

pub mod client {
    pub use pathlink_client::*;
}

pub mod reversal {
    pub use pathlink_reversal::*;
}

pub mod stdio {
    pub use pathlink_stdio::*;
}
