use std::time::Instant;

use rtcp::{ReceptionReport, SdesType, SenderReport};
use shared::time::ntp_short;

/// Misordering tolerated before a sequence number counts as a large jump.
pub(crate) const MAX_DROPOUT: u16 = 3000;

/// Width of the top band treated as duplicate/reordered delivery.
pub(crate) const MAX_MISORDER: u16 = 100;

/// In-order packets required before a new source is trusted.
pub(crate) const MIN_SEQUENTIAL: i32 = 2;

const RTP_SEQ_MOD: u32 = 1 << 16;

/// Per-source state: identity and description, sequence tracking, jitter,
/// and the latest sender report.
///
/// `probation` is a three-way value: a positive count is packets still
/// required before the source is trusted, zero means trusted, and -1 marks
/// a source that has never sent RTP data at all — sources learned from
/// RTCP alone stay at -1 and are never put on probation.
#[derive(Debug, Clone)]
pub(crate) struct Source {
    pub(crate) ssrc: u32,
    cname: Option<String>,
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    loc: Option<String>,
    tool: Option<String>,
    note: Option<String>,
    pub(crate) sr: Option<SenderReport>,
    pub(crate) last_sr: Option<Instant>,
    pub(crate) last_active: Instant,
    pub(crate) sender: bool,
    pub(crate) bye_received: bool,
    base_seq: u32,
    pub(crate) max_seq: u16,
    bad_seq: u32,
    pub(crate) cycles: u32,
    pub(crate) received: u32,
    received_prior: u32,
    expected_prior: u32,
    pub(crate) probation: i32,
    pub(crate) jitter: u32,
    transit: u32,
}

impl Source {
    pub(crate) fn new(ssrc: u32, now: Instant) -> Self {
        Source {
            ssrc,
            cname: None,
            name: None,
            email: None,
            phone: None,
            loc: None,
            tool: None,
            note: None,
            sr: None,
            last_sr: None,
            last_active: now,
            sender: false,
            bye_received: false,
            base_seq: 0,
            max_seq: 0,
            bad_seq: 0,
            cycles: 0,
            received: 0,
            received_prior: 0,
            expected_prior: 0,
            probation: -1,
            jitter: 0,
            transit: 0,
        }
    }

    /// Re-synchronize sequence tracking with `seq` as the new base.
    fn init_seq(&mut self, seq: u16) {
        self.base_seq = seq as u32;
        self.max_seq = seq;
        self.bad_seq = RTP_SEQ_MOD + 1;
        self.cycles = 0;
        self.received = 0;
        self.received_prior = 0;
        self.expected_prior = 0;
    }

    /// Arm the probation counter on the first RTP data packet from this
    /// source. RTCP-only sources never get here and stay at -1.
    pub(crate) fn start_probation(&mut self, seq: u16) {
        if self.probation == -1 {
            self.probation = MIN_SEQUENTIAL;
            self.max_seq = seq.wrapping_sub(1);
        }
    }

    /// Decide whether `seq` is admissible and update tracking state.
    ///
    /// The algorithm is the one in Appendix A.1 of the RTP specification:
    /// strictly consecutive numbers while on probation, a permissible
    /// dropout window once trusted, wraparound cycle counting, and the
    /// two-identical-large-jumps resync rule.
    pub(crate) fn update_seq(&mut self, seq: u16) -> bool {
        let udelta = seq.wrapping_sub(self.max_seq);

        if self.probation > 0 {
            if seq == self.max_seq.wrapping_add(1) {
                self.probation -= 1;
                self.max_seq = seq;
                if self.probation == 0 {
                    self.init_seq(seq);
                    // Credit the whole probation run: those packets were
                    // tracked, not lost, so the base reaches back to the
                    // first of them and the count includes them all.
                    self.base_seq = seq.wrapping_sub(MIN_SEQUENTIAL as u16 - 1) as u32;
                    self.received = MIN_SEQUENTIAL as u32;
                    return true;
                }
            } else {
                self.probation = MIN_SEQUENTIAL - 1;
                self.max_seq = seq;
            }
            return false;
        } else if udelta < MAX_DROPOUT {
            // In order, with permissible gap.
            if seq < self.max_seq {
                // Sequence number wrapped: count another 64K cycle.
                self.cycles += RTP_SEQ_MOD;
            }
            self.max_seq = seq;
        } else if udelta as u32 <= RTP_SEQ_MOD - MAX_MISORDER as u32 {
            // The sequence number made a very large jump.
            if seq as u32 == self.bad_seq {
                // Two sequential packets: assume the other side restarted
                // without telling us, so just re-sync.
                self.init_seq(seq);
            } else {
                self.bad_seq = seq.wrapping_add(1) as u32;
                return false;
            }
        } else {
            // Duplicate or reordered packet.
        }
        self.received += 1;
        true
    }

    /// Fold one accepted packet into the interarrival jitter estimate
    /// (Appendix A.8 integer form, one-sixteenth weight).
    pub(crate) fn update_jitter(&mut self, rtp_now: u32, timestamp: u32) {
        let transit = rtp_now.wrapping_sub(timestamp);
        let d = transit.wrapping_sub(self.transit) as i32;
        self.transit = transit;
        self.jitter = self
            .jitter
            .wrapping_add(d.unsigned_abs())
            .wrapping_sub((self.jitter + 8) >> 4);
    }

    /// Extended highest sequence number seen: wrap cycles in the high half.
    pub(crate) fn extended_max(&self) -> u32 {
        self.cycles + self.max_seq as u32
    }

    /// Compose the reception report block covering the interval since the
    /// previous report, advancing the interval snapshots.
    ///
    /// The cumulative lost count can be negative when duplicates outnumber
    /// gaps; it is carried in the 24-bit two's-complement form the wire
    /// expects, and the interval fraction is reported as zero in that case.
    pub(crate) fn make_report(&mut self, now: Instant) -> ReceptionReport {
        let extended_max = self.extended_max();
        let expected = extended_max.wrapping_sub(self.base_seq).wrapping_add(1);
        let lost = expected as i64 - self.received as i64;
        let expected_interval = expected.wrapping_sub(self.expected_prior) as i64;
        let received_interval = self.received.wrapping_sub(self.received_prior) as i64;
        let lost_interval = expected_interval - received_interval;

        self.expected_prior = expected;
        self.received_prior = self.received;

        let fraction_lost = if expected_interval == 0 || lost_interval <= 0 {
            0
        } else {
            ((lost_interval << 8) / expected_interval) as u8
        };

        let (last_sender_report, delay) = match (&self.sr, self.last_sr) {
            (Some(sr), Some(at)) => (
                ntp_short(sr.ntp_time),
                (now.duration_since(at).as_secs_f64() * 65536.0) as u32,
            ),
            _ => (0, 0),
        };

        ReceptionReport {
            ssrc: self.ssrc,
            fraction_lost,
            total_lost: (lost as u32) & 0x00ff_ffff,
            last_sequence_number: extended_max,
            jitter: self.jitter >> 4,
            last_sender_report,
            delay,
        }
    }

    pub(crate) fn sdes(&self, sdes_type: SdesType) -> Option<&str> {
        let field = match sdes_type {
            SdesType::SdesCname => &self.cname,
            SdesType::SdesName => &self.name,
            SdesType::SdesEmail => &self.email,
            SdesType::SdesPhone => &self.phone,
            SdesType::SdesLoc => &self.loc,
            SdesType::SdesTool => &self.tool,
            SdesType::SdesNote => &self.note,
            _ => return None,
        };
        field.as_deref()
    }

    /// Store a descriptive item; false for item types we do not track.
    pub(crate) fn set_sdes(&mut self, sdes_type: SdesType, value: &str) -> bool {
        let field = match sdes_type {
            SdesType::SdesCname => &mut self.cname,
            SdesType::SdesName => &mut self.name,
            SdesType::SdesEmail => &mut self.email,
            SdesType::SdesPhone => &mut self.phone,
            SdesType::SdesLoc => &mut self.loc,
            SdesType::SdesTool => &mut self.tool,
            SdesType::SdesNote => &mut self.note,
            _ => {
                log::debug!("unknown SDES item (type={}, value={value})", sdes_type.value());
                return false;
            }
        };
        *field = Some(value.to_owned());
        true
    }
}
