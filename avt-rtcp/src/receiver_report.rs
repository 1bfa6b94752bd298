use bytes::{Buf, BufMut};
use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{HEADER_LEN, Header, PacketType};
use crate::reception_report::{RECEPTION_REPORT_LEN, ReceptionReport};

/// RTCP receiver report (RR, packet type 201).
///
/// A count of zero is meaningful: the receiver is explicitly reporting
/// that it has nothing to report on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReceiverReport {
    /// Synchronization source of the receiver issuing this report.
    pub ssrc: u32,
    /// Reception report blocks, one per source heard from.
    pub reports: Vec<ReceptionReport>,
}

impl ReceiverReport {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: self.reports.len() as u8,
            packet_type: PacketType::ReceiverReport,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }
}

impl MarshalSize for ReceiverReport {
    fn marshal_size(&self) -> usize {
        HEADER_LEN + 4 + RECEPTION_REPORT_LEN * self.reports.len()
    }
}

impl Marshal for ReceiverReport {
    fn marshal_to(&self, buf: &mut impl BufMut) -> Result<usize> {
        if self.reports.len() > 31 {
            return Err(Error::TooManyReports);
        }
        self.header().marshal_to(buf)?;
        buf.put_u32(self.ssrc);
        for report in &self.reports {
            report.marshal_to(buf)?;
        }
        Ok(self.marshal_size())
    }
}

impl Unmarshal for ReceiverReport {
    fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::ReceiverReport {
            return Err(Error::InvalidHeader);
        }
        let body_len = header.packet_len() - HEADER_LEN;
        if buf.remaining() < body_len
            || body_len < 4 + RECEPTION_REPORT_LEN * header.count as usize
        {
            return Err(Error::ErrTooShortRtcp);
        }

        let ssrc = buf.get_u32();
        let mut reports = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            reports.push(ReceptionReport::unmarshal(buf)?);
        }
        let trailing = body_len - 4 - RECEPTION_REPORT_LEN * reports.len();
        buf.advance(trailing);

        Ok(ReceiverReport { ssrc, reports })
    }
}
