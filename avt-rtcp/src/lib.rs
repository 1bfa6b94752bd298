#![warn(rust_2018_idioms)]
//! RTCP wire codec (RFC 1889): sender/receiver reports, source
//! descriptions, goodbyes, and the compound-packet framing that carries
//! them.
//!
//! Control traffic arrives as *compound* datagrams: two or more back-to-back
//! sub-packets sharing one buffer. [`compound::CompoundPacket`] enforces the
//! structural rules (first packet SR/RR, version 2 throughout, padding only
//! on the last sub-packet, declared lengths summing exactly to the datagram)
//! before any sub-packet is interpreted, so a malformed compound is rejected
//! whole with no partial effects.

pub mod compound;
pub mod goodbye;
pub mod header;
pub mod packet;
pub mod reception_report;
pub mod receiver_report;
pub mod sender_report;
pub mod source_description;

pub use compound::CompoundPacket;
pub use goodbye::Goodbye;
pub use header::{Header, PacketType};
pub use packet::Packet;
pub use reception_report::ReceptionReport;
pub use receiver_report::ReceiverReport;
pub use sender_report::SenderReport;
pub use source_description::{SdesType, SourceDescription, SourceDescriptionChunk, SourceDescriptionItem};
