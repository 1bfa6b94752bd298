use bytes::{Buf, BufMut};
use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{HEADER_LEN, Header, PacketType};

/// SDES item tags (RFC 1889 section 6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdesType {
    SdesEnd,
    SdesCname,
    SdesName,
    SdesEmail,
    SdesPhone,
    SdesLoc,
    SdesTool,
    SdesNote,
    SdesPrivate,
    Unsupported(u8),
}

impl From<u8> for SdesType {
    fn from(b: u8) -> Self {
        match b {
            0 => SdesType::SdesEnd,
            1 => SdesType::SdesCname,
            2 => SdesType::SdesName,
            3 => SdesType::SdesEmail,
            4 => SdesType::SdesPhone,
            5 => SdesType::SdesLoc,
            6 => SdesType::SdesTool,
            7 => SdesType::SdesNote,
            8 => SdesType::SdesPrivate,
            _ => SdesType::Unsupported(b),
        }
    }
}

impl SdesType {
    pub fn value(self) -> u8 {
        match self {
            SdesType::SdesEnd => 0,
            SdesType::SdesCname => 1,
            SdesType::SdesName => 2,
            SdesType::SdesEmail => 3,
            SdesType::SdesPhone => 4,
            SdesType::SdesLoc => 5,
            SdesType::SdesTool => 6,
            SdesType::SdesNote => 7,
            SdesType::SdesPrivate => 8,
            SdesType::Unsupported(b) => b,
        }
    }
}

/// One self-delimiting SDES item: type octet, length octet, raw text.
///
/// Text is decoded leniently; a peer sending non-UTF-8 bytes gets
/// replacement characters, not a rejected compound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptionItem {
    pub sdes_type: SdesType,
    pub text: String,
}

/// All SDES items one source is describing itself with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptionChunk {
    pub source: u32,
    pub items: Vec<SourceDescriptionItem>,
}

impl SourceDescriptionChunk {
    /// Octets used on the wire: source id, items, null terminator, then
    /// zero padding out to the next 32-bit boundary (1-4 octets, so the
    /// terminator is always present).
    fn wire_len(&self) -> usize {
        let raw = 4 + self
            .items
            .iter()
            .map(|item| 2 + item.text.len())
            .sum::<usize>();
        raw + (4 - (raw % 4))
    }
}

/// RTCP source description (SDES, packet type 202).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceDescription {
    pub chunks: Vec<SourceDescriptionChunk>,
}

impl SourceDescription {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: self.chunks.len() as u8,
            packet_type: PacketType::SourceDescription,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }
}

impl MarshalSize for SourceDescription {
    fn marshal_size(&self) -> usize {
        HEADER_LEN + self.chunks.iter().map(|c| c.wire_len()).sum::<usize>()
    }
}

impl Marshal for SourceDescription {
    fn marshal_to(&self, buf: &mut impl BufMut) -> Result<usize> {
        if self.chunks.len() > 31 {
            return Err(Error::TooManySources);
        }
        self.header().marshal_to(buf)?;
        for chunk in &self.chunks {
            buf.put_u32(chunk.source);
            let mut raw = 4;
            for item in &chunk.items {
                if item.text.len() > 255 {
                    return Err(Error::SdesTextTooLong);
                }
                buf.put_u8(item.sdes_type.value());
                buf.put_u8(item.text.len() as u8);
                buf.put_slice(item.text.as_bytes());
                raw += 2 + item.text.len();
            }
            for _ in 0..(4 - (raw % 4)) {
                buf.put_u8(SdesType::SdesEnd.value());
            }
        }
        Ok(self.marshal_size())
    }
}

impl Unmarshal for SourceDescription {
    fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::SourceDescription {
            return Err(Error::InvalidHeader);
        }
        let mut body_len = header.packet_len() - HEADER_LEN;
        if buf.remaining() < body_len {
            return Err(Error::ErrTooShortRtcp);
        }

        let mut chunks = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            if body_len < 4 {
                return Err(Error::ErrTooShortRtcp);
            }
            let source = buf.get_u32();
            body_len -= 4;

            let mut used = 4;
            let mut items = Vec::new();
            loop {
                if body_len == 0 {
                    return Err(Error::ErrTooShortRtcp);
                }
                let sdes_type = SdesType::from(buf.get_u8());
                body_len -= 1;
                used += 1;
                if sdes_type == SdesType::SdesEnd {
                    break;
                }
                if body_len == 0 {
                    return Err(Error::ErrTooShortRtcp);
                }
                let text_len = buf.get_u8() as usize;
                body_len -= 1;
                used += 1;
                if body_len < text_len {
                    return Err(Error::ErrTooShortRtcp);
                }
                let text = String::from_utf8_lossy(&buf.copy_to_bytes(text_len)).into_owned();
                body_len -= text_len;
                used += text_len;
                items.push(SourceDescriptionItem { sdes_type, text });
            }

            // Padding out to the chunk's 32-bit boundary.
            let pad = (4 - (used % 4)) % 4;
            if body_len < pad {
                return Err(Error::ErrTooShortRtcp);
            }
            buf.advance(pad);
            body_len -= pad;

            chunks.push(SourceDescriptionChunk { source, items });
        }
        buf.advance(body_len);

        Ok(SourceDescription { chunks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(source: u32, items: &[(SdesType, &str)]) -> SourceDescriptionChunk {
        SourceDescriptionChunk {
            source,
            items: items
                .iter()
                .map(|(sdes_type, text)| SourceDescriptionItem {
                    sdes_type: *sdes_type,
                    text: (*text).to_owned(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_sdes_round_trip() {
        let sdes = SourceDescription {
            chunks: vec![
                chunk(
                    0x1111,
                    &[
                        (SdesType::SdesCname, "alice@192.0.2.1"),
                        (SdesType::SdesNote, "afk"),
                    ],
                ),
                chunk(0x2222, &[(SdesType::SdesCname, "bob@192.0.2.99")]),
            ],
        };

        let raw = sdes.marshal().unwrap();
        assert_eq!(raw.len(), sdes.marshal_size());
        assert_eq!(raw.len() % 4, 0);

        let mut buf = raw;
        assert_eq!(SourceDescription::unmarshal(&mut buf).unwrap(), sdes);
    }

    #[test]
    fn test_sdes_chunk_is_terminated_even_when_aligned() {
        // Item area of 4+2+2 = 8 octets is already aligned; the encoder must
        // still emit a full word of terminator padding.
        let sdes = SourceDescription {
            chunks: vec![chunk(0x1111, &[(SdesType::SdesCname, "ab")])],
        };
        let raw = sdes.marshal().unwrap();
        assert_eq!(raw.len(), 4 + 8 + 4);

        let mut buf = raw;
        assert_eq!(SourceDescription::unmarshal(&mut buf).unwrap(), sdes);
    }

    #[test]
    fn test_sdes_rejects_item_overrunning_declared_length() {
        // count=1, length=2 words of body: source id + item claiming 200
        // octets of text.
        let raw = bytes::Bytes::from_static(&[
            0x81, 0xca, 0x00, 0x02, 0x00, 0x00, 0x11, 0x11, 0x01, 0xc8, 0x61, 0x62,
        ]);
        let mut buf = raw;
        assert_eq!(
            SourceDescription::unmarshal(&mut buf),
            Err(Error::ErrTooShortRtcp)
        );
    }

    #[test]
    fn test_sdes_preserves_unknown_item_types() {
        let sdes = SourceDescription {
            chunks: vec![chunk(0x1111, &[(SdesType::Unsupported(42), "x")])],
        };
        let raw = sdes.marshal().unwrap();
        let mut buf = raw;
        let decoded = SourceDescription::unmarshal(&mut buf).unwrap();
        assert_eq!(decoded.chunks[0].items[0].sdes_type, SdesType::Unsupported(42));
    }
}
