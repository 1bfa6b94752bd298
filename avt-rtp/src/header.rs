use bytes::{Buf, BufMut, Bytes};
use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

/// RTP protocol version understood by this codec.
pub const VERSION: u8 = 2;

/// Fixed part of the RTP header preceding the CSRC list.
pub const FIXED_HEADER_LEN: usize = 12;

/// Size of one contributing-source entry.
pub const CSRC_LEN: usize = 4;

/// Payload types 72-76 are RTCP packet types with the high bit stripped;
/// seeing one on the RTP port means someone is sending to the wrong socket.
const RESERVED_PT_MIN: u8 = 72;
const RESERVED_PT_MAX: u8 = 76;

const MAX_CSRC: usize = 15;

/// Classic fixed header extension: a 16-bit profile tag followed by a
/// payload whose length is carried on the wire in 32-bit words.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Extension {
    pub profile: u16,
    /// Extension payload, length a multiple of 4.
    pub payload: Bytes,
}

/// RTP packet header.
///
/// The padding flag is a transport artefact: [`crate::Packet::unmarshal`]
/// validates and strips padding octets, so a decoded header always has
/// `padding == false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub padding: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
    pub extension: Option<Extension>,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            version: VERSION,
            padding: false,
            marker: false,
            payload_type: 0,
            sequence_number: 0,
            timestamp: 0,
            ssrc: 0,
            csrc: Vec::new(),
            extension: None,
        }
    }
}

impl MarshalSize for Header {
    fn marshal_size(&self) -> usize {
        let mut n = FIXED_HEADER_LEN + CSRC_LEN * self.csrc.len();
        if let Some(extension) = &self.extension {
            n += 4 + extension.payload.len();
        }
        n
    }
}

impl Marshal for Header {
    fn marshal_to(&self, buf: &mut impl BufMut) -> Result<usize> {
        if self.csrc.len() > MAX_CSRC {
            return Err(Error::TooManySources);
        }
        if let Some(extension) = &self.extension
            && extension.payload.len() % 4 != 0
        {
            return Err(Error::WrongMarshalSize);
        }

        let mut b0 = (VERSION << 6) | (self.csrc.len() as u8);
        if self.padding {
            b0 |= 1 << 5;
        }
        if self.extension.is_some() {
            b0 |= 1 << 4;
        }
        let mut b1 = self.payload_type & 0x7f;
        if self.marker {
            b1 |= 1 << 7;
        }

        buf.put_u8(b0);
        buf.put_u8(b1);
        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        for csrc in &self.csrc {
            buf.put_u32(*csrc);
        }
        if let Some(extension) = &self.extension {
            buf.put_u16(extension.profile);
            buf.put_u16((extension.payload.len() / 4) as u16);
            buf.put_slice(&extension.payload);
        }

        Ok(self.marshal_size())
    }
}

impl Unmarshal for Header {
    /// Parse and validate the header part of an RTP datagram (Appendix A.1
    /// checks). The cursor is left at the first payload byte; padding is
    /// the caller's concern since it hangs off the datagram tail.
    fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < FIXED_HEADER_LEN {
            return Err(Error::ErrTooShortRtp);
        }

        let b0 = buf.get_u8();
        let version = b0 >> 6;
        if version != VERSION {
            return Err(Error::BadVersion(version));
        }
        let padding = (b0 >> 5) & 0x1 != 0;
        let has_extension = (b0 >> 4) & 0x1 != 0;
        let csrc_count = (b0 & 0x0f) as usize;

        let b1 = buf.get_u8();
        let marker = b1 >> 7 != 0;
        let payload_type = b1 & 0x7f;
        if (RESERVED_PT_MIN..=RESERVED_PT_MAX).contains(&payload_type) {
            if marker {
                log::debug!("payload type {payload_type} with marker set: RTCP on the RTP port?");
            }
            return Err(Error::ReservedPayloadType(payload_type));
        }

        let sequence_number = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        if buf.remaining() < CSRC_LEN * csrc_count {
            return Err(Error::ErrTooShortRtp);
        }
        let mut csrc = Vec::with_capacity(csrc_count);
        for _ in 0..csrc_count {
            csrc.push(buf.get_u32());
        }

        let extension = if has_extension {
            if buf.remaining() < 4 {
                return Err(Error::BadExtensionLength);
            }
            let profile = buf.get_u16();
            let words = buf.get_u16() as usize;
            if buf.remaining() < words * 4 {
                return Err(Error::BadExtensionLength);
            }
            Some(Extension {
                profile,
                payload: buf.copy_to_bytes(words * 4),
            })
        } else {
            None
        };

        Ok(Header {
            version,
            padding,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            extension,
        })
    }
}
