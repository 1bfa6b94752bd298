use bytes::{Buf, BufMut, Bytes};
use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::Header;

/// A decoded RTP data packet: validated header plus the media payload with
/// any padding octets already removed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    pub header: Header,
    pub payload: Bytes,
}

impl MarshalSize for Packet {
    fn marshal_size(&self) -> usize {
        self.header.marshal_size() + self.payload.len()
    }
}

impl Marshal for Packet {
    fn marshal_to(&self, buf: &mut impl BufMut) -> Result<usize> {
        self.header.marshal_to(buf)?;
        buf.put_slice(&self.payload);
        Ok(self.marshal_size())
    }
}

impl Unmarshal for Packet {
    /// Decode an entire RTP datagram.
    ///
    /// On top of the header checks this validates the padding trailer: the
    /// count octet must be at least 1 and no larger than the octets left
    /// after the header and extension. The padding octets are stripped and
    /// the padding flag cleared, so `payload` is exactly the media bytes.
    fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        let mut header = Header::unmarshal(buf)?;
        let mut payload = buf.copy_to_bytes(buf.remaining());

        if header.padding {
            let pad = match payload.last() {
                Some(&pad) => pad as usize,
                None => return Err(Error::BadPaddingLength),
            };
            if pad == 0 {
                return Err(Error::ZeroPadding);
            }
            if pad > payload.len() {
                return Err(Error::BadPaddingLength);
            }
            payload.truncate(payload.len() - pad);
            header.padding = false;
        }

        Ok(Packet { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Extension;

    fn sample_packet() -> Packet {
        Packet {
            header: Header {
                marker: true,
                payload_type: 96,
                sequence_number: 100,
                timestamp: 160,
                ssrc: 0x2222,
                extension: Some(Extension {
                    profile: 0xbede,
                    payload: Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]),
                }),
                ..Default::default()
            },
            payload: Bytes::from_static(&[0x01, 0x02, 0x03, 0x04, 0x05]),
        }
    }

    #[test]
    fn test_packet_round_trip() {
        let packet = sample_packet();
        let raw = packet.marshal().unwrap();
        assert_eq!(raw.len(), packet.marshal_size());

        let mut buf = raw;
        let decoded = Packet::unmarshal(&mut buf).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_packet_strips_padding() {
        let mut raw = sample_packet().marshal().unwrap().to_vec();
        raw[0] |= 1 << 5;
        raw.extend_from_slice(&[0x00, 0x00, 0x03]);

        let mut buf = Bytes::from(raw);
        let decoded = Packet::unmarshal(&mut buf).unwrap();
        assert_eq!(decoded, sample_packet());
        assert!(!decoded.header.padding);
    }

    #[test]
    fn test_packet_rejects_zero_padding_count() {
        let mut raw = sample_packet().marshal().unwrap().to_vec();
        raw[0] |= 1 << 5;
        raw.push(0x00);

        let mut buf = Bytes::from(raw);
        assert_eq!(Packet::unmarshal(&mut buf), Err(Error::ZeroPadding));
    }

    #[test]
    fn test_packet_rejects_padding_overrun() {
        // Padding flag set, count octet claims more padding than the
        // datagram holds past the header.
        let raw = Bytes::from_static(&[
            0xa0, 0x60, 0x69, 0x8f, 0xd9, 0xc2, 0x93, 0xda, 0x1c, 0x64, 0x27, 0x82, 0x01, 0xff,
        ]);
        let mut buf = raw;
        assert_eq!(Packet::unmarshal(&mut buf), Err(Error::BadPaddingLength));
    }
}
