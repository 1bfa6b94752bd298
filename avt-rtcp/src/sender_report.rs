use bytes::{Buf, BufMut};
use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{HEADER_LEN, Header, PacketType};
use crate::reception_report::{RECEPTION_REPORT_LEN, ReceptionReport};

/// Sender info: NTP/RTP timestamp pair plus cumulative send counters.
const SENDER_INFO_LEN: usize = 24;

/// RTCP sender report (SR, packet type 200).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SenderReport {
    /// Synchronization source of the sender issuing this report.
    pub ssrc: u32,
    /// 64-bit NTP wallclock timestamp at the moment the report was sent.
    pub ntp_time: u64,
    /// The same instant expressed in the media clock.
    pub rtp_time: u32,
    /// Total data packets sent since the start of transmission.
    pub packet_count: u32,
    /// Total payload octets sent since the start of transmission.
    pub octet_count: u32,
    /// Reception report blocks, one per source heard from.
    pub reports: Vec<ReceptionReport>,
}

impl SenderReport {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: self.reports.len() as u8,
            packet_type: PacketType::SenderReport,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }
}

impl MarshalSize for SenderReport {
    fn marshal_size(&self) -> usize {
        HEADER_LEN + SENDER_INFO_LEN + RECEPTION_REPORT_LEN * self.reports.len()
    }
}

impl Marshal for SenderReport {
    fn marshal_to(&self, buf: &mut impl BufMut) -> Result<usize> {
        if self.reports.len() > 31 {
            return Err(Error::TooManyReports);
        }
        self.header().marshal_to(buf)?;
        buf.put_u32(self.ssrc);
        buf.put_u64(self.ntp_time);
        buf.put_u32(self.rtp_time);
        buf.put_u32(self.packet_count);
        buf.put_u32(self.octet_count);
        for report in &self.reports {
            report.marshal_to(buf)?;
        }
        Ok(self.marshal_size())
    }
}

impl Unmarshal for SenderReport {
    fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::SenderReport {
            return Err(Error::InvalidHeader);
        }
        let body_len = header.packet_len() - HEADER_LEN;
        if buf.remaining() < body_len
            || body_len < SENDER_INFO_LEN + RECEPTION_REPORT_LEN * header.count as usize
        {
            return Err(Error::ErrTooShortRtcp);
        }

        let ssrc = buf.get_u32();
        let ntp_time = buf.get_u64();
        let rtp_time = buf.get_u32();
        let packet_count = buf.get_u32();
        let octet_count = buf.get_u32();
        let mut reports = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            reports.push(ReceptionReport::unmarshal(buf)?);
        }
        // Skip any profile-specific extension filling out the declared length.
        let trailing = body_len - SENDER_INFO_LEN - RECEPTION_REPORT_LEN * reports.len();
        buf.advance(trailing);

        Ok(SenderReport {
            ssrc,
            ntp_time,
            rtp_time,
            packet_count,
            octet_count,
            reports,
        })
    }
}
