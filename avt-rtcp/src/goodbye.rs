use bytes::{Buf, BufMut};
use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{HEADER_LEN, Header, PacketType};

/// RTCP goodbye (BYE, packet type 203): the listed sources are leaving the
/// session, optionally with a short reason text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Goodbye {
    pub sources: Vec<u32>,
    pub reason: String,
}

impl Goodbye {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: self.sources.len() as u8,
            packet_type: PacketType::Goodbye,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }
}

impl MarshalSize for Goodbye {
    fn marshal_size(&self) -> usize {
        let mut n = HEADER_LEN + 4 * self.sources.len();
        if !self.reason.is_empty() {
            // Length octet plus text, zero padded to a word boundary.
            n += (1 + self.reason.len()).div_ceil(4) * 4;
        }
        n
    }
}

impl Marshal for Goodbye {
    fn marshal_to(&self, buf: &mut impl BufMut) -> Result<usize> {
        if self.sources.len() > 31 {
            return Err(Error::TooManySources);
        }
        if self.reason.len() > 255 {
            return Err(Error::SdesTextTooLong);
        }
        self.header().marshal_to(buf)?;
        for source in &self.sources {
            buf.put_u32(*source);
        }
        if !self.reason.is_empty() {
            buf.put_u8(self.reason.len() as u8);
            buf.put_slice(self.reason.as_bytes());
            let used = 1 + self.reason.len();
            for _ in 0..(used.next_multiple_of(4) - used) {
                buf.put_u8(0);
            }
        }
        Ok(self.marshal_size())
    }
}

impl Unmarshal for Goodbye {
    fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::Goodbye {
            return Err(Error::InvalidHeader);
        }
        let body_len = header.packet_len() - HEADER_LEN;
        if buf.remaining() < body_len || body_len < 4 * header.count as usize {
            return Err(Error::ErrTooShortRtcp);
        }

        let mut sources = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            sources.push(buf.get_u32());
        }

        let mut trailing = body_len - 4 * header.count as usize;
        let reason = if trailing > 0 {
            let reason_len = buf.get_u8() as usize;
            trailing -= 1;
            if reason_len > trailing {
                return Err(Error::ErrTooShortRtcp);
            }
            let reason = String::from_utf8_lossy(&buf.copy_to_bytes(reason_len)).into_owned();
            buf.advance(trailing - reason_len);
            reason
        } else {
            String::new()
        };

        Ok(Goodbye { sources, reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goodbye_round_trip() {
        let bye = Goodbye {
            sources: vec![0x1111, 0x2222],
            reason: String::new(),
        };
        let raw = bye.marshal().unwrap();
        assert_eq!(raw.len(), 12);

        let mut buf = raw;
        assert_eq!(Goodbye::unmarshal(&mut buf).unwrap(), bye);
    }

    #[test]
    fn test_goodbye_with_reason_round_trip() {
        let bye = Goodbye {
            sources: vec![0x1111],
            reason: "session over".to_owned(),
        };
        let raw = bye.marshal().unwrap();
        assert_eq!(raw.len() % 4, 0);

        let mut buf = raw;
        assert_eq!(Goodbye::unmarshal(&mut buf).unwrap(), bye);
    }

    #[test]
    fn test_goodbye_rejects_truncated_source_list() {
        // count=2 but a single source in the body.
        let raw = bytes::Bytes::from_static(&[0x82, 0xcb, 0x00, 0x01, 0x00, 0x00, 0x11, 0x11]);
        let mut buf = raw;
        assert_eq!(Goodbye::unmarshal(&mut buf), Err(Error::ErrTooShortRtcp));
    }
}
