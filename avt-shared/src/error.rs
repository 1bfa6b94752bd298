use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    //RTP errors
    #[error("packet is too short to be RTP packet")]
    ErrTooShortRtp,
    #[error("rtp version must be 2, got {0}")]
    BadVersion(u8),
    #[error("reserved rtcp payload type {0} seen on rtp port")]
    ReservedPayloadType(u8),
    #[error("header extension overruns packet")]
    BadExtensionLength,
    #[error("padding count exceeds available payload")]
    BadPaddingLength,
    #[error("padding count must be non-zero")]
    ZeroPadding,

    //RTCP errors
    /// Wrong marshal size.
    #[error("Wrong marshal size")]
    WrongMarshalSize,
    /// Packet contains an invalid header.
    #[error("Invalid header")]
    InvalidHeader,
    #[error("packet is too short to be RTCP packet")]
    ErrTooShortRtcp,
    /// A single RTCP packet is not a compound packet.
    #[error("rtcp datagram is not a compound packet")]
    NotCompound,
    /// Invalid first packet in compound packets. First packet
    /// should either be a SenderReport packet or ReceiverReport.
    #[error("First packet in compound must be SR or RR")]
    BadFirstPacket,
    #[error("padding bit set before final packet in compound")]
    PaddingBeforeLast,
    #[error("sub-packet lengths do not sum to the datagram length")]
    CompoundLengthMismatch,
    /// Packet lost exceeds maximum amount of packets
    /// that can possibly be lost.
    #[error("Invalid total lost count")]
    InvalidTotalLost,
    /// Too many reports.
    #[error("Too many reports")]
    TooManyReports,
    /// Too many sources.
    #[error("too many sources")]
    TooManySources,
    #[error("sdes item text exceeds 255 octets")]
    SdesTextTooLong,
    #[error("sdes item type {0} is not known")]
    UnknownSdesType(u8),

    //Session errors
    #[error("rtp and rtcp ports must be even")]
    OddPort(u16),
    #[error("multicast ttl must be below 128, got {0}")]
    BadTtl(u8),
    #[error("rtcp bandwidth budget must be positive and finite")]
    BadBandwidth,
    #[error("ssrc can only be changed before any exchange has taken place")]
    SsrcChangeTooLate,
    #[error("no source with ssrc {0:#010x}")]
    UnknownSsrc(u32),
    #[error("feature is declared but not implemented")]
    UnsupportedFeature,

    #[error("{0}")]
    Io(#[source] IoError),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
#[error("io error: {0}")]
pub struct IoError(#[from] pub io::Error);

// Workaround for wanting PartialEq for io::Error.
impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(e))
    }
}
