use bytes::BufMut;
use shared::error::Result;
use shared::marshal::{Marshal, MarshalSize};

use crate::goodbye::Goodbye;
use crate::header::PacketType;
use crate::receiver_report::ReceiverReport;
use crate::sender_report::SenderReport;
use crate::source_description::SourceDescription;

/// One decoded RTCP sub-packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    SenderReport(SenderReport),
    ReceiverReport(ReceiverReport),
    SourceDescription(SourceDescription),
    Goodbye(Goodbye),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::SenderReport(_) => PacketType::SenderReport,
            Packet::ReceiverReport(_) => PacketType::ReceiverReport,
            Packet::SourceDescription(_) => PacketType::SourceDescription,
            Packet::Goodbye(_) => PacketType::Goodbye,
        }
    }
}

impl MarshalSize for Packet {
    fn marshal_size(&self) -> usize {
        match self {
            Packet::SenderReport(p) => p.marshal_size(),
            Packet::ReceiverReport(p) => p.marshal_size(),
            Packet::SourceDescription(p) => p.marshal_size(),
            Packet::Goodbye(p) => p.marshal_size(),
        }
    }
}

impl Marshal for Packet {
    fn marshal_to(&self, buf: &mut impl BufMut) -> Result<usize> {
        match self {
            Packet::SenderReport(p) => p.marshal_to(buf),
            Packet::ReceiverReport(p) => p.marshal_to(buf),
            Packet::SourceDescription(p) => p.marshal_to(buf),
            Packet::Goodbye(p) => p.marshal_to(buf),
        }
    }
}
