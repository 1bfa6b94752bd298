#![warn(rust_2018_idioms)]
//! RTP data-packet wire codec (RFC 1889).
//!
//! [`Packet::unmarshal`] performs the structural validation an endpoint
//! must apply to datagrams arriving on the RTP port before any per-source
//! state is touched; anything malformed is rejected with a typed error and
//! no partial state.

pub mod header;
pub mod packet;

pub use header::{Extension, Header};
pub use packet::Packet;
