use std::time::Instant;

use rtcp::{ReceptionReport, SdesType, SenderReport};

/// A typed notification from the session engine.
///
/// Events are queued in exactly the order the triggering packets were
/// processed and drained synchronously via [`crate::Session::poll_event`].
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// When the triggering packet was processed.
    pub at: Instant,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// A previously unseen synchronization source appeared.
    SourceCreated { ssrc: u32 },
    /// A source was removed, explicitly or after a BYE grace period.
    SourceDeleted { ssrc: u32 },
    /// A validated RTP data packet. Ownership of the decoded packet
    /// (payload included) passes to the consumer.
    RtpData { ssrc: u32, packet: rtp::Packet },
    /// A sender report arrived; `report` carries the sender info only,
    /// its reception report blocks are delivered as separate
    /// [`EventKind::ReceptionReport`] events.
    SenderReport { ssrc: u32, report: SenderReport },
    /// One reception report block, from `reporter` about `report.ssrc`.
    ReceptionReport { reporter: u32, report: ReceptionReport },
    /// A receiver explicitly reported on nothing at all.
    EmptyReceiverReport { ssrc: u32 },
    /// One SDES item describing `ssrc`.
    SourceDescription {
        ssrc: u32,
        sdes_type: SdesType,
        text: String,
    },
    /// The source announced it is leaving.
    Bye { ssrc: u32 },
    /// Brackets the processing of one compound RTCP datagram, carrying its
    /// wire length. Useful for batching UI updates.
    RtcpStart { len: usize },
    RtcpFinish,
}
