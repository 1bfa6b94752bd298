use bytes::{Buf, BufMut};
use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

/// Length of an RTCP common header.
pub const HEADER_LEN: usize = 4;

/// RTCP protocol version.
pub const VERSION: u8 = 2;

/// Maximum value of the 5-bit count field.
pub const MAX_COUNT: u8 = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    SenderReport,
    ReceiverReport,
    SourceDescription,
    Goodbye,
    ApplicationDefined,
    Unsupported(u8),
}

impl From<u8> for PacketType {
    fn from(b: u8) -> Self {
        match b {
            200 => PacketType::SenderReport,
            201 => PacketType::ReceiverReport,
            202 => PacketType::SourceDescription,
            203 => PacketType::Goodbye,
            204 => PacketType::ApplicationDefined,
            _ => PacketType::Unsupported(b),
        }
    }
}

impl PacketType {
    pub fn value(self) -> u8 {
        match self {
            PacketType::SenderReport => 200,
            PacketType::ReceiverReport => 201,
            PacketType::SourceDescription => 202,
            PacketType::Goodbye => 203,
            PacketType::ApplicationDefined => 204,
            PacketType::Unsupported(b) => b,
        }
    }
}

/// RTCP common header: version, padding flag, 5-bit count, payload type and
/// the packet length in 32-bit words minus one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub padding: bool,
    pub count: u8,
    pub packet_type: PacketType,
    pub length: u16,
}

impl Header {
    /// Whole sub-packet size in octets, header included.
    pub fn packet_len(&self) -> usize {
        (self.length as usize + 1) * 4
    }
}

impl MarshalSize for Header {
    fn marshal_size(&self) -> usize {
        HEADER_LEN
    }
}

impl Marshal for Header {
    fn marshal_to(&self, buf: &mut impl BufMut) -> Result<usize> {
        if self.count > MAX_COUNT {
            return Err(Error::InvalidHeader);
        }
        let mut b0 = (VERSION << 6) | self.count;
        if self.padding {
            b0 |= 1 << 5;
        }
        buf.put_u8(b0);
        buf.put_u8(self.packet_type.value());
        buf.put_u16(self.length);
        Ok(HEADER_LEN)
    }
}

impl Unmarshal for Header {
    fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < HEADER_LEN {
            return Err(Error::ErrTooShortRtcp);
        }
        let b0 = buf.get_u8();
        let version = b0 >> 6;
        if version != VERSION {
            return Err(Error::BadVersion(version));
        }
        let padding = (b0 >> 5) & 0x1 != 0;
        let count = b0 & 0x1f;
        let packet_type = PacketType::from(buf.get_u8());
        let length = buf.get_u16();
        Ok(Header {
            padding,
            count,
            packet_type,
            length,
        })
    }
}
