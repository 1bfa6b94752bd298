use bytes::{Buf, BufMut};
use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::goodbye::Goodbye;
use crate::header::{HEADER_LEN, Header, PacketType};
use crate::packet::Packet;
use crate::receiver_report::ReceiverReport;
use crate::sender_report::SenderReport;
use crate::source_description::SourceDescription;

/// A compound RTCP datagram: two or more sub-packets sharing one buffer.
///
/// `unmarshal` applies the RFC 1889 section 6.1 structural checks over the
/// whole datagram before interpreting anything:
///
/// - a buffer whose first declared length spans the whole datagram is a
///   single packet, not a compound, and is rejected;
/// - the first sub-packet must be an SR or RR;
/// - every sub-packet must carry version 2;
/// - the padding bit may be set on the final sub-packet only;
/// - the declared lengths must sum exactly to the datagram length.
///
/// Sub-packets with an unrecognised payload type inside a structurally
/// valid compound are skipped, not treated as errors.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompoundPacket(pub Vec<Packet>);

impl MarshalSize for CompoundPacket {
    fn marshal_size(&self) -> usize {
        self.0.iter().map(|p| p.marshal_size()).sum()
    }
}

impl Marshal for CompoundPacket {
    fn marshal_to(&self, buf: &mut impl BufMut) -> Result<usize> {
        for packet in &self.0 {
            packet.marshal_to(buf)?;
        }
        Ok(self.marshal_size())
    }
}

impl Unmarshal for CompoundPacket {
    fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        let data = buf.copy_to_bytes(buf.remaining());
        let total = data.len();

        // First pass: walk the declared sub-packet boundaries, validating
        // structure only. Nothing is interpreted until the whole datagram
        // is known to be well formed.
        let mut boundaries = Vec::new();
        let mut offset = 0;
        while offset < total {
            if offset > 0 && total - offset < HEADER_LEN {
                return Err(Error::CompoundLengthMismatch);
            }
            let mut cursor = data.slice(offset..);
            let header = Header::unmarshal(&mut cursor)?;
            let sub_len = header.packet_len();
            if offset + sub_len > total {
                return Err(Error::CompoundLengthMismatch);
            }

            if offset == 0 {
                if sub_len == total {
                    return Err(Error::NotCompound);
                }
                if !matches!(
                    header.packet_type,
                    PacketType::SenderReport | PacketType::ReceiverReport
                ) {
                    return Err(Error::BadFirstPacket);
                }
            }
            if header.padding && offset + sub_len != total {
                return Err(Error::PaddingBeforeLast);
            }

            boundaries.push((offset, sub_len, header.packet_type));
            offset += sub_len;
        }

        // Second pass: decode the sub-packets we understand.
        let mut packets = Vec::with_capacity(boundaries.len());
        for (offset, sub_len, packet_type) in boundaries {
            let mut cursor = data.slice(offset..offset + sub_len);
            match packet_type {
                PacketType::SenderReport => {
                    packets.push(Packet::SenderReport(SenderReport::unmarshal(&mut cursor)?));
                }
                PacketType::ReceiverReport => {
                    packets.push(Packet::ReceiverReport(ReceiverReport::unmarshal(
                        &mut cursor,
                    )?));
                }
                PacketType::SourceDescription => {
                    packets.push(Packet::SourceDescription(SourceDescription::unmarshal(
                        &mut cursor,
                    )?));
                }
                PacketType::Goodbye => {
                    packets.push(Packet::Goodbye(Goodbye::unmarshal(&mut cursor)?));
                }
                other => {
                    log::debug!("ignoring rtcp packet with unknown type {}", other.value());
                }
            }
        }

        Ok(CompoundPacket(packets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reception_report::ReceptionReport;
    use crate::source_description::{SdesType, SourceDescriptionChunk, SourceDescriptionItem};
    use bytes::Bytes;

    fn sample_compound() -> CompoundPacket {
        CompoundPacket(vec![
            Packet::SenderReport(SenderReport {
                ssrc: 0x1111,
                ntp_time: 0x1234_5678_9abc_def0,
                rtp_time: 160,
                packet_count: 3,
                octet_count: 480,
                reports: vec![ReceptionReport {
                    ssrc: 0x2222,
                    fraction_lost: 0,
                    total_lost: 0,
                    last_sequence_number: 102,
                    jitter: 4,
                    last_sender_report: 0x5678_9abc,
                    delay: 65536,
                }],
            }),
            Packet::ReceiverReport(ReceiverReport {
                ssrc: 0x1111,
                reports: vec![ReceptionReport {
                    ssrc: 0x3333,
                    fraction_lost: 128,
                    total_lost: 12,
                    last_sequence_number: 9,
                    jitter: 0,
                    last_sender_report: 0,
                    delay: 0,
                }],
            }),
            Packet::SourceDescription(SourceDescription {
                chunks: vec![SourceDescriptionChunk {
                    source: 0x1111,
                    items: vec![SourceDescriptionItem {
                        sdes_type: SdesType::SdesCname,
                        text: "alice@192.0.2.1".to_owned(),
                    }],
                }],
            }),
        ])
    }

    #[test]
    fn test_compound_round_trip() {
        let compound = sample_compound();
        let raw = compound.marshal().unwrap();
        assert_eq!(raw.len(), compound.marshal_size());
        assert_eq!(raw.len() % 4, 0);

        let mut buf = raw;
        let decoded = CompoundPacket::unmarshal(&mut buf).unwrap();
        assert_eq!(decoded, compound);
    }

    #[test]
    fn test_single_packet_is_not_compound() {
        let rr = ReceiverReport {
            ssrc: 0x1111,
            reports: vec![],
        };
        let mut buf = rr.marshal().unwrap();
        assert_eq!(
            CompoundPacket::unmarshal(&mut buf),
            Err(Error::NotCompound)
        );
    }

    #[test]
    fn test_compound_must_start_with_report() {
        let sdes = SourceDescription {
            chunks: vec![SourceDescriptionChunk {
                source: 0x1111,
                items: vec![SourceDescriptionItem {
                    sdes_type: SdesType::SdesCname,
                    text: "a@b".to_owned(),
                }],
            }],
        };
        let bye = Goodbye {
            sources: vec![0x1111],
            reason: String::new(),
        };
        let mut raw = sdes.marshal().unwrap().to_vec();
        raw.extend_from_slice(&bye.marshal().unwrap());

        let mut buf = Bytes::from(raw);
        assert_eq!(
            CompoundPacket::unmarshal(&mut buf),
            Err(Error::BadFirstPacket)
        );
    }

    #[test]
    fn test_compound_rejects_padding_before_last() {
        let rr = ReceiverReport {
            ssrc: 0x1111,
            reports: vec![],
        };
        let bye = Goodbye {
            sources: vec![0x1111],
            reason: String::new(),
        };
        let mut raw = rr.marshal().unwrap().to_vec();
        raw[0] |= 1 << 5;
        raw.extend_from_slice(&bye.marshal().unwrap());

        let mut buf = Bytes::from(raw);
        assert_eq!(
            CompoundPacket::unmarshal(&mut buf),
            Err(Error::PaddingBeforeLast)
        );
    }

    #[test]
    fn test_compound_rejects_length_mismatch() {
        // Two empty RRs plus two stray bytes: the declared lengths cannot
        // account for the datagram, and nothing must be delivered.
        let rr = ReceiverReport {
            ssrc: 0x1111,
            reports: vec![],
        };
        let mut raw = rr.marshal().unwrap().to_vec();
        raw.extend_from_slice(&rr.marshal().unwrap());
        raw.extend_from_slice(&[0x00, 0x00]);

        let mut buf = Bytes::from(raw);
        assert_eq!(
            CompoundPacket::unmarshal(&mut buf),
            Err(Error::CompoundLengthMismatch)
        );
    }

    #[test]
    fn test_compound_rejects_overrunning_sub_packet() {
        // Second sub-packet declares more words than the datagram holds.
        let rr = ReceiverReport {
            ssrc: 0x1111,
            reports: vec![],
        };
        let mut raw = rr.marshal().unwrap().to_vec();
        raw.extend_from_slice(&[0x80, 0xc9, 0x00, 0x09, 0x00, 0x00, 0x11, 0x11]);

        let mut buf = Bytes::from(raw);
        assert_eq!(
            CompoundPacket::unmarshal(&mut buf),
            Err(Error::CompoundLengthMismatch)
        );
    }

    #[test]
    fn test_unknown_packet_type_is_skipped() {
        let rr = ReceiverReport {
            ssrc: 0x1111,
            reports: vec![],
        };
        let bye = Goodbye {
            sources: vec![0x1111],
            reason: String::new(),
        };
        let mut raw = rr.marshal().unwrap().to_vec();
        // An APP packet (type 204), 8 octets.
        raw.extend_from_slice(&[0x80, 0xcc, 0x00, 0x01, 0x00, 0x00, 0x22, 0x22]);
        raw.extend_from_slice(&bye.marshal().unwrap());

        let mut buf = Bytes::from(raw);
        let decoded = CompoundPacket::unmarshal(&mut buf).unwrap();
        assert_eq!(decoded.0.len(), 2);
        assert_eq!(decoded.0[0].packet_type(), PacketType::ReceiverReport);
        assert_eq!(decoded.0[1].packet_type(), PacketType::Goodbye);
    }
}
