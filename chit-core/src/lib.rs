//! ChitChat relay protocol reference implementation.
//! No I/O: the platform crate owns sockets and feeds lines in and out.

pub mod identity;
pub mod protocol;
pub mod sink;
pub mod wire;

pub use identity::{guest_name, sender_of, unique_id};
pub use protocol::{Command, Tag, DEFAULT_PORT, JOIN_TEXT};
pub use sink::{deliver, MessageSink, ReceivedMessage};
pub use wire::{decode_line, encode_line, truncate_for_log, DecodeError, EncodeError};
