use bytes::{Buf, BufMut};
use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

/// Length of one reception report block.
pub const RECEPTION_REPORT_LEN: usize = 24;

/// One reception report block, as embedded in SR and RR packets: how well
/// the reporter has been hearing the reportee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReceptionReport {
    /// Source this report is about.
    pub ssrc: u32,
    /// Fraction of packets lost since the previous report, as a fixed-point
    /// number with the binary point at the left edge.
    pub fraction_lost: u8,
    /// Cumulative packets lost, 24 bits on the wire.
    pub total_lost: u32,
    /// Extended highest sequence number received (cycle count in the high
    /// 16 bits).
    pub last_sequence_number: u32,
    /// Interarrival jitter in timestamp units.
    pub jitter: u32,
    /// Middle 32 bits of the NTP timestamp of the last SR received.
    pub last_sender_report: u32,
    /// Delay since that SR, in units of 1/65536 seconds.
    pub delay: u32,
}

impl MarshalSize for ReceptionReport {
    fn marshal_size(&self) -> usize {
        RECEPTION_REPORT_LEN
    }
}

impl Marshal for ReceptionReport {
    fn marshal_to(&self, buf: &mut impl BufMut) -> Result<usize> {
        if self.total_lost > 0x00ff_ffff {
            return Err(Error::InvalidTotalLost);
        }
        buf.put_u32(self.ssrc);
        buf.put_u8(self.fraction_lost);
        buf.put_u8((self.total_lost >> 16) as u8);
        buf.put_u8((self.total_lost >> 8) as u8);
        buf.put_u8(self.total_lost as u8);
        buf.put_u32(self.last_sequence_number);
        buf.put_u32(self.jitter);
        buf.put_u32(self.last_sender_report);
        buf.put_u32(self.delay);
        Ok(RECEPTION_REPORT_LEN)
    }
}

impl Unmarshal for ReceptionReport {
    fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < RECEPTION_REPORT_LEN {
            return Err(Error::ErrTooShortRtcp);
        }
        let ssrc = buf.get_u32();
        let fraction_lost = buf.get_u8();
        let total_lost =
            ((buf.get_u8() as u32) << 16) | ((buf.get_u8() as u32) << 8) | buf.get_u8() as u32;
        let last_sequence_number = buf.get_u32();
        let jitter = buf.get_u32();
        let last_sender_report = buf.get_u32();
        let delay = buf.get_u32();
        Ok(ReceptionReport {
            ssrc,
            fraction_lost,
            total_lost,
            last_sequence_number,
            jitter,
            last_sender_report,
            delay,
        })
    }
}
