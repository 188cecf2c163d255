//! ChitChat on Linux: LAN group-chat relay over TCP.
//!
//! One process is either the Host (listens, rebroadcasts) or a Client (one
//! connection to the Host). [`node::Node`] is the control surface; the
//! protocol itself lives in `chit-core`.

pub mod client;
pub mod config;
pub mod connection;
pub mod host;
pub mod media;
pub mod node;
pub mod registry;
pub mod relay;
pub mod status;
pub mod terminal;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use node::{Node, NodeError};
pub use status::Status;
