use std::collections::VecDeque;
use std::net::IpAddr;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::debug;
use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};
use shared::time::SystemInstant;

use rtcp::{
    CompoundPacket, Goodbye, ReceiverReport, ReceptionReport, SdesType, SenderReport,
    SourceDescription, SourceDescriptionChunk, SourceDescriptionItem,
};

use crate::event::{Event, EventKind};
use crate::net::UdpChannel;
use crate::report_store::ReportStore;
use crate::scheduler::RtcpScheduler;
use crate::source::Source;
use crate::table::SourceTable;

/// Largest datagram we will send or accept on either socket.
const MAX_PACKET_LEN: usize = 1500;

/// Report blocks per SR/RR packet, the 5-bit count field limit.
const MAX_REPORT_BLOCKS: usize = 31;

/// Above this many members a parting BYE is suppressed rather than risking
/// a synchronized flood of them.
const BYE_SUPPRESSION_THRESHOLD: usize = 50;

/// Seconds a source lingers after its BYE so delayed packets still find it.
const BYE_GRACE_SECS: f64 = 2.0;

/// One RFC 1889 conferencing endpoint: an RTP/RTCP socket pair plus all the
/// per-source and scheduling state behind it.
///
/// Exactly one `Session` exists per endpoint. It is single-threaded and
/// poll-driven: the owning loop alternates [`Session::recv`] (service at
/// most one datagram), [`Session::poll_event`] (drain notifications),
/// [`Session::send_control`] (run the RTCP timer) and [`Session::update`]
/// (expire departed sources). The source table and report store are owned
/// exclusively by the session and only ever mutated through it.
#[derive(Debug)]
pub struct Session {
    rtp_channel: UdpChannel,
    rtcp_channel: UdpChannel,
    addr: IpAddr,
    rx_port: u16,
    tx_port: u16,
    ttl: u8,
    ssrc: u32,
    table: SourceTable,
    reports: ReportStore,
    /// Until an RTCP packet proves a source real, RTP from unknown sources
    /// is dropped. RTP header checks alone are weak enough that bogus
    /// traffic would otherwise fabricate sources.
    wait_for_rtcp: bool,
    invalid_rtp_count: u64,
    invalid_rtcp_count: u64,
    dropped_rtp_count: u64,
    sender_count: usize,
    scheduler: RtcpScheduler,
    we_sent: bool,
    last_rtcp_send: Instant,
    next_rtcp_send: Instant,
    sdes_primary: u32,
    sdes_secondary: u32,
    sdes_tertiary: u32,
    seq: u16,
    packet_count: u32,
    octet_count: u32,
    /// Stored for API compatibility only; nothing is ever encrypted.
    encryption_key: Option<Vec<u8>>,
    events: VecDeque<Event>,
    clock: SystemInstant,
}

impl Session {
    /// Open a session on `addr` (unicast or multicast): RTP bound to
    /// `rx_port` and sent to `tx_port`, RTCP on the next higher ports.
    ///
    /// Ports must be even and `ttl` below 128; violating either is a
    /// configuration contract error, not a runtime condition.
    pub fn new(
        addr: IpAddr,
        rx_port: u16,
        tx_port: u16,
        ttl: u8,
        rtcp_bandwidth: f64,
    ) -> Result<Session> {
        if ttl >= 128 {
            return Err(Error::BadTtl(ttl));
        }
        if rx_port % 2 != 0 {
            return Err(Error::OddPort(rx_port));
        }
        if tx_port % 2 != 0 {
            return Err(Error::OddPort(tx_port));
        }
        if !(rtcp_bandwidth > 0.0 && rtcp_bandwidth.is_finite()) {
            return Err(Error::BadBandwidth);
        }

        let rtp_channel = UdpChannel::new(addr, rx_port, tx_port, ttl)?;
        let rtcp_channel = UdpChannel::new(addr, rx_port + 1, tx_port + 1, ttl)?;

        let now = Instant::now();
        let mut session = Session {
            rtp_channel,
            rtcp_channel,
            addr,
            rx_port,
            tx_port,
            ttl,
            ssrc: rand::random(),
            table: SourceTable::new(),
            reports: ReportStore::new(),
            wait_for_rtcp: true,
            invalid_rtp_count: 0,
            invalid_rtcp_count: 0,
            dropped_rtp_count: 0,
            sender_count: 0,
            scheduler: RtcpScheduler::new(rtcp_bandwidth),
            we_sent: false,
            last_rtcp_send: now,
            next_rtcp_send: now,
            sdes_primary: 0,
            sdes_secondary: 0,
            sdes_tertiary: 0,
            seq: rand::random(),
            packet_count: 0,
            octet_count: 0,
            encryption_key: None,
            events: VecDeque::new(),
            clock: SystemInstant::now(),
        };

        // First control packet: computed before any source exists, so the
        // halved initial minimum drives it.
        let interval = session.scheduler.transmission_interval(0, 0, false, false);
        session.next_rtcp_send = now + Duration::from_secs_f64(interval);

        // Our own database entry, with a best-effort user@host CNAME.
        session.create_source(session.ssrc, now);
        let cname = session.local_cname();
        session.set_sdes(session.ssrc, SdesType::SdesCname, &cname)?;

        Ok(session)
    }

    /// Accept RTP from sources no RTCP has been seen for. Off by default:
    /// RTP header validity checks are significantly weaker than RTCP's, so
    /// this trades safety against bogus sources for faster startup.
    pub fn enable_weak_validation(&mut self) {
        self.wait_for_rtcp = false;
    }

    /// Replace the local identifier. Only valid immediately after
    /// construction, to coordinate identifiers between layered sessions;
    /// once any other source is known or anything was sent it is too late.
    pub fn set_ssrc(&mut self, ssrc: u32) -> Result<()> {
        if self.table.len() != 1 || self.sender_count != 0 || self.we_sent {
            return Err(Error::SsrcChangeTooLate);
        }
        let mut source = self.table.remove(self.ssrc);
        source.ssrc = ssrc;
        self.table.insert(source);
        self.ssrc = ssrc;
        Ok(())
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn rx_port(&self) -> u16 {
        self.rx_port
    }

    pub fn tx_port(&self) -> u16 {
        self.tx_port
    }

    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    /// Number of sources currently known, the local one included.
    pub fn member_count(&self) -> usize {
        self.table.len()
    }

    /// Sources that have sent data in the current reporting interval.
    pub fn active_sender_count(&self) -> usize {
        self.sender_count
    }

    pub fn invalid_rtp_count(&self) -> u64 {
        self.invalid_rtp_count
    }

    pub fn invalid_rtcp_count(&self) -> u64 {
        self.invalid_rtcp_count
    }

    /// Packets dropped for protocol-state reasons: probationary or unknown
    /// sources, as opposed to malformed datagrams.
    pub fn dropped_rtp_count(&self) -> u64 {
        self.dropped_rtp_count
    }

    /// Store an encryption key. Encryption is a declared but unimplemented
    /// feature: the key is retained, nothing uses it, and the call reports
    /// failure rather than quietly pretending.
    pub fn set_encryption_key(&mut self, key: &[u8]) -> Result<()> {
        self.encryption_key = Some(key.to_vec());
        debug!("encryption is not implemented; key stored but unused");
        Err(Error::UnsupportedFeature)
    }

    pub fn encryption_key(&self) -> Option<&[u8]> {
        self.encryption_key.as_deref()
    }

    /// Next queued notification, in exact processing order.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Set one of a source's descriptive fields.
    pub fn set_sdes(&mut self, ssrc: u32, sdes_type: SdesType, value: &str) -> Result<()> {
        match self.table.get_mut(ssrc) {
            None => Err(Error::UnknownSsrc(ssrc)),
            Some(source) => {
                if source.set_sdes(sdes_type, value) {
                    Ok(())
                } else {
                    Err(Error::UnknownSdesType(sdes_type.value()))
                }
            }
        }
    }

    /// Read one of a source's descriptive fields.
    pub fn sdes(&self, ssrc: u32, sdes_type: SdesType) -> Option<&str> {
        self.table.get(ssrc).and_then(|s| s.sdes(sdes_type))
    }

    /// The last sender report received from `ssrc`, sender info only.
    pub fn sender_report(&self, ssrc: u32) -> Option<&SenderReport> {
        self.table.get(ssrc).and_then(|s| s.sr.as_ref())
    }

    /// The last reception report `reporter` sent about `reportee`.
    pub fn reception_report(&self, reporter: u32, reportee: u32) -> Option<&ReceptionReport> {
        self.reports.get(reporter, reportee)
    }

    /// Send one RTP data packet. `rtp_time` is the caller's media clock;
    /// the sequence number is the session's own monotonically increasing
    /// counter. Returns the datagram size on the wire.
    pub fn send(
        &mut self,
        rtp_time: u32,
        payload_type: u8,
        marker: bool,
        csrc: Vec<u32>,
        payload: Bytes,
        extension: Option<rtp::Extension>,
    ) -> Result<usize> {
        let packet = rtp::Packet {
            header: rtp::Header {
                marker,
                payload_type,
                sequence_number: self.seq,
                timestamp: rtp_time,
                ssrc: self.ssrc,
                csrc,
                extension,
                ..Default::default()
            },
            payload,
        };
        self.seq = self.seq.wrapping_add(1);

        let raw = packet.marshal()?;
        let sent = self.rtp_channel.send(&raw)?;

        self.we_sent = true;
        self.packet_count = self.packet_count.wrapping_add(1);
        self.octet_count = self.octet_count.wrapping_add(raw.len() as u32);
        Ok(sent)
    }

    /// Wait up to `timeout` for a datagram on either socket and service at
    /// most one. `rtp_now` is the current media clock, used for the jitter
    /// estimate of an arriving data packet. Returns whether anything was
    /// serviced.
    pub fn recv(&mut self, timeout: Duration, rtp_now: u32) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; MAX_PACKET_LEN];
        loop {
            if let Some(n) = self.rtp_channel.recv(&mut buf)? {
                self.process_data(&buf[..n], rtp_now);
                return Ok(true);
            }
            if let Some(n) = self.rtcp_channel.recv(&mut buf)? {
                self.process_ctrl(&buf[..n]);
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Run the RTCP transmission timer, sending a compound report if one
    /// is due. `rtp_now` stamps an outgoing SR with the media clock.
    ///
    /// When the timer has expired the interval is recomputed against the
    /// current membership before anything is sent; if the fresh interval
    /// says we are early, the send is pushed back instead (timer
    /// reconsideration).
    pub fn send_control(&mut self, rtp_now: u32) -> Result<()> {
        let now = Instant::now();
        if now <= self.next_rtcp_send {
            return Ok(());
        }

        let interval = self.scheduler.transmission_interval(
            self.table.len(),
            self.sender_count,
            self.we_sent,
            true,
        );
        let reconsidered = self.last_rtcp_send + Duration::from_secs_f64(interval);
        if now > reconsidered {
            self.send_rtcp(rtp_now, now)?;
            self.scheduler.initial = false;
            self.we_sent = false;
            self.last_rtcp_send = now;
            self.next_rtcp_send = now + Duration::from_secs_f64(interval);
            // New reporting interval: clear the per-interval sender state.
            self.sender_count = 0;
            for source in self.table.iter_mut() {
                source.sender = false;
            }
        } else {
            self.next_rtcp_send = reconsidered;
        }
        Ok(())
    }

    /// Housekeeping sweep: delete sources whose BYE grace period elapsed.
    pub fn update(&mut self) {
        let now = Instant::now();
        let expired: Vec<u32> = self
            .table
            .iter()
            .filter(|s| {
                s.bye_received
                    && now.duration_since(s.last_active).as_secs_f64() > BYE_GRACE_SECS
            })
            .map(|s| s.ssrc)
            .collect();
        for ssrc in expired {
            self.delete_source(ssrc, now);
        }
    }

    /// Announce departure. With a small group the BYE goes out at once;
    /// past [`BYE_SUPPRESSION_THRESHOLD`] members it is suppressed
    /// entirely, so a partition cannot trigger a BYE flood.
    pub fn send_bye(&mut self) -> Result<()> {
        if self.table.len() >= BYE_SUPPRESSION_THRESHOLD {
            return Ok(());
        }
        let now = Instant::now();
        let reports = self.collect_report_blocks(now, MAX_PACKET_LEN - 8);
        let compound = CompoundPacket(vec![
            rtcp::Packet::ReceiverReport(ReceiverReport {
                ssrc: self.ssrc,
                reports,
            }),
            rtcp::Packet::Goodbye(Goodbye {
                sources: vec![self.ssrc],
                reason: String::new(),
            }),
        ]);
        let raw = compound.marshal()?;
        self.rtcp_channel.send(&raw)?;
        Ok(())
    }

    /// Tear the session down: send the parting BYE (subject to the group
    /// size rule), delete every remote source and the local one last, and
    /// release the sockets. Returns the events queued during teardown so
    /// the deletions remain observable.
    pub fn close(mut self) -> Result<Vec<Event>> {
        self.send_bye()?;
        let now = Instant::now();
        let remote: Vec<u32> = self
            .table
            .iter()
            .map(|s| s.ssrc)
            .filter(|&ssrc| ssrc != self.ssrc)
            .collect();
        for ssrc in remote {
            self.delete_source(ssrc, now);
        }
        let local = self.ssrc;
        self.delete_source(local, now);
        Ok(self.events.into_iter().collect())
    }

    fn local_cname(&self) -> String {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();
        let host = self
            .rtp_channel
            .local_addr()
            .map(|a| a.ip().to_string())
            .unwrap_or_else(|_| self.addr.to_string());
        if user.is_empty() {
            host
        } else {
            format!("{user}@{host}")
        }
    }

    /// Idempotent lookup-or-create. An existing source just gets its
    /// activity stamp refreshed; a new one is inserted and announced,
    /// except that the local source is never announced to ourselves.
    fn create_source(&mut self, ssrc: u32, now: Instant) {
        if self.table.touch(ssrc, now) {
            return;
        }
        self.table.insert(Source::new(ssrc, now));
        debug!("created database entry for ssrc {ssrc:#010x}");
        if ssrc != self.ssrc {
            self.events.push_back(Event {
                at: now,
                kind: EventKind::SourceCreated { ssrc },
            });
        }
    }

    /// Remove a source and every trace of it. The caller must know the
    /// source exists; deleting an unknown one is a programming error and
    /// panics rather than corrupting the database.
    fn delete_source(&mut self, ssrc: u32, now: Instant) {
        let source = self.table.remove(ssrc);
        if source.sender {
            self.sender_count -= 1;
        }
        self.reports.remove_all_for(ssrc);
        self.events.push_back(Event {
            at: now,
            kind: EventKind::SourceDeleted { ssrc },
        });
    }

    /// Process one datagram from the RTP socket.
    pub(crate) fn process_data(&mut self, datagram: &[u8], rtp_now: u32) {
        let now = Instant::now();
        let mut cursor = datagram;
        let packet = match rtp::Packet::unmarshal(&mut cursor) {
            Ok(packet) => packet,
            Err(e) => {
                self.invalid_rtp_count += 1;
                debug!("invalid RTP packet discarded: {e}");
                return;
            }
        };

        let ssrc = packet.header.ssrc;
        if self.wait_for_rtcp {
            if !self.table.contains(ssrc) {
                self.dropped_rtp_count += 1;
                debug!("RTP packet from unknown source {ssrc:#010x} ignored");
                return;
            }
            self.table.touch(ssrc, now);
        } else {
            self.create_source(ssrc, now);
        }

        let (accepted, newly_sender) = match self.table.get_mut(ssrc) {
            Some(source) => {
                source.start_probation(packet.header.sequence_number);
                if source.update_seq(packet.header.sequence_number) {
                    let newly_sender = !source.sender;
                    source.sender = true;
                    source.update_jitter(rtp_now, packet.header.timestamp);
                    (true, newly_sender)
                } else {
                    (false, false)
                }
            }
            None => return,
        };
        if !accepted {
            self.dropped_rtp_count += 1;
            debug!("RTP packet from probationary source {ssrc:#010x} ignored");
            return;
        }
        if newly_sender {
            self.sender_count += 1;
        }

        // Contributing sources are participants too.
        for &csrc in &packet.header.csrc {
            self.create_source(csrc, now);
        }

        self.events.push_back(Event {
            at: now,
            kind: EventKind::RtpData { ssrc, packet },
        });
    }

    /// Process one datagram from the RTCP socket.
    pub(crate) fn process_ctrl(&mut self, datagram: &[u8]) {
        let now = Instant::now();
        let mut cursor = datagram;
        let compound = match CompoundPacket::unmarshal(&mut cursor) {
            Ok(compound) => compound,
            Err(e) => {
                self.invalid_rtcp_count += 1;
                debug!("invalid RTCP packet discarded: {e}");
                return;
            }
        };

        self.events.push_back(Event {
            at: now,
            kind: EventKind::RtcpStart {
                len: datagram.len(),
            },
        });
        for packet in compound.0 {
            match packet {
                rtcp::Packet::SenderReport(sr) => self.process_sender_report(sr, now),
                rtcp::Packet::ReceiverReport(rr) => self.process_receiver_report(rr, now),
                rtcp::Packet::SourceDescription(sdes) => self.process_sdes(sdes, now),
                rtcp::Packet::Goodbye(bye) => self.process_bye(bye, now),
            }
        }
        self.scheduler.update_avg_size(datagram.len());
        self.events.push_back(Event {
            at: now,
            kind: EventKind::RtcpFinish,
        });
    }

    fn process_sender_report(&mut self, sr: SenderReport, now: Instant) {
        let ssrc = sr.ssrc;
        self.create_source(ssrc, now);

        // Keep the sender info for round-trip estimation; the blocks are
        // handed on below.
        let info = SenderReport {
            reports: Vec::new(),
            ..sr.clone()
        };
        if let Some(source) = self.table.get_mut(ssrc) {
            source.sr = Some(info.clone());
            source.last_sr = Some(now);
        }
        self.events.push_back(Event {
            at: now,
            kind: EventKind::SenderReport { ssrc, report: info },
        });

        self.process_report_blocks(ssrc, sr.reports, now);
    }

    fn process_receiver_report(&mut self, rr: ReceiverReport, now: Instant) {
        self.create_source(rr.ssrc, now);
        self.process_report_blocks(rr.ssrc, rr.reports, now);
    }

    fn process_report_blocks(
        &mut self,
        reporter: u32,
        blocks: Vec<ReceptionReport>,
        now: Instant,
    ) {
        if blocks.is_empty() {
            self.events.push_back(Event {
                at: now,
                kind: EventKind::EmptyReceiverReport { ssrc: reporter },
            });
            return;
        }
        for block in blocks {
            // The reportee deserves a database entry too.
            self.create_source(block.ssrc, now);
            self.reports.insert(reporter, block);
            self.events.push_back(Event {
                at: now,
                kind: EventKind::ReceptionReport {
                    reporter,
                    report: block,
                },
            });
        }
    }

    fn process_sdes(&mut self, sdes: SourceDescription, now: Instant) {
        for chunk in sdes.chunks {
            self.create_source(chunk.source, now);
            for item in chunk.items {
                let stored = match self.table.get_mut(chunk.source) {
                    Some(source) => source.set_sdes(item.sdes_type, &item.text),
                    None => false,
                };
                if stored {
                    self.events.push_back(Event {
                        at: now,
                        kind: EventKind::SourceDescription {
                            ssrc: chunk.source,
                            sdes_type: item.sdes_type,
                            text: item.text,
                        },
                    });
                } else {
                    debug!(
                        "invalid sdes item for source {:#010x}, skipping",
                        chunk.source
                    );
                }
            }
        }
    }

    fn process_bye(&mut self, bye: Goodbye, now: Instant) {
        for ssrc in bye.sources {
            // Create-before-delete looks odd, but it guarantees the ssrc in
            // the event refers to a live source and keeps client code simple.
            self.create_source(ssrc, now);
            self.events.push_back(Event {
                at: now,
                kind: EventKind::Bye { ssrc },
            });
            // Deletion waits for the grace period in update(); packets may
            // still be in flight.
            if let Some(source) = self.table.get_mut(ssrc) {
                source.bye_received = true;
            }
        }
    }

    /// Gather reception report blocks for every source that sent data this
    /// interval, until the block budget or the buffer budget runs out.
    /// Reported sources have their sender flag cleared.
    fn collect_report_blocks(&mut self, now: Instant, budget: usize) -> Vec<ReceptionReport> {
        let mut blocks = Vec::new();
        let mut remaining = budget;
        for source in self.table.iter_mut() {
            if blocks.len() == MAX_REPORT_BLOCKS || remaining < 24 {
                break;
            }
            if source.sender {
                blocks.push(source.make_report(now));
                source.sender = false;
                remaining -= 24;
            }
        }
        self.sender_count = self.sender_count.saturating_sub(blocks.len());
        blocks
    }

    /// Compose the SDES packet for this reporting interval.
    ///
    /// CNAME and NOTE go out every time they fit. Every third interval one
    /// more item is added: NAME in seven slots out of eight, and in the
    /// eighth the low-priority items take turns - the candidates are tried
    /// in order from the rotation point and the first present-and-fitting
    /// one wins.
    fn compose_sdes(&mut self, budget: usize) -> SourceDescription {
        // Header, our ssrc, and the worst-case terminator word.
        let mut space = budget.saturating_sub(12);
        let mut items = Vec::new();

        fn push_item(
            items: &mut Vec<SourceDescriptionItem>,
            space: &mut usize,
            sdes_type: SdesType,
            text: Option<&str>,
        ) -> bool {
            if let Some(text) = text
                && text.len() + 2 <= *space
            {
                *space -= text.len() + 2;
                items.push(SourceDescriptionItem {
                    sdes_type,
                    text: text.to_owned(),
                });
                return true;
            }
            false
        }

        for always in [SdesType::SdesCname, SdesType::SdesNote] {
            push_item(&mut items, &mut space, always, self.sdes(self.ssrc, always));
        }

        if self.sdes_primary % 3 == 0 {
            self.sdes_secondary += 1;
            if self.sdes_secondary % 8 == 0 {
                const ROTATION: [SdesType; 4] = [
                    SdesType::SdesTool,
                    SdesType::SdesEmail,
                    SdesType::SdesPhone,
                    SdesType::SdesLoc,
                ];
                let start = (self.sdes_tertiary % 4) as usize;
                for &candidate in &ROTATION[start..] {
                    let text = self.sdes(self.ssrc, candidate);
                    if push_item(&mut items, &mut space, candidate, text) {
                        break;
                    }
                }
                self.sdes_tertiary += 1;
            } else {
                let text = self.sdes(self.ssrc, SdesType::SdesName);
                push_item(&mut items, &mut space, SdesType::SdesName, text);
            }
        }
        self.sdes_primary += 1;

        SourceDescription {
            chunks: vec![SourceDescriptionChunk {
                source: self.ssrc,
                items,
            }],
        }
    }

    /// Build and send one compound control packet: SR or RR first, extra
    /// RRs while reported-on senders remain, SDES last. The datagram is
    /// looped back through our own control input so the local participant
    /// can query its own stats and the size average counts what we send.
    fn send_rtcp(&mut self, rtp_now: u32, now: Instant) -> Result<()> {
        let mut packets = Vec::new();
        let mut used = 0usize;

        if self.we_sent {
            let reports = self.collect_report_blocks(now, MAX_PACKET_LEN - 28);
            let sr = SenderReport {
                ssrc: self.ssrc,
                ntp_time: self.clock.ntp(now),
                rtp_time: rtp_now,
                packet_count: self.packet_count,
                octet_count: self.octet_count,
                reports,
            };
            used += sr.marshal_size();
            packets.push(rtcp::Packet::SenderReport(sr));
        } else {
            let reports = self.collect_report_blocks(now, MAX_PACKET_LEN - 8);
            let rr = ReceiverReport {
                ssrc: self.ssrc,
                reports,
            };
            used += rr.marshal_size();
            packets.push(rtcp::Packet::ReceiverReport(rr));
        }

        // Continuation RRs when one packet could not cover every sender.
        while self.sender_count > 0 && MAX_PACKET_LEN - used >= 8 + 24 {
            let reports = self.collect_report_blocks(now, MAX_PACKET_LEN - used - 8);
            if reports.is_empty() {
                break;
            }
            let rr = ReceiverReport {
                ssrc: self.ssrc,
                reports,
            };
            used += rr.marshal_size();
            packets.push(rtcp::Packet::ReceiverReport(rr));
        }

        let sdes = self.compose_sdes(MAX_PACKET_LEN - used);
        packets.push(rtcp::Packet::SourceDescription(sdes));

        let raw = CompoundPacket(packets).marshal()?;
        self.rtcp_channel.send(&raw)?;
        self.process_ctrl(&raw);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn test_session(rx_port: u16) -> Session {
        Session::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            rx_port,
            rx_port,
            0,
            2000.0,
        )
        .unwrap()
    }

    fn rtp_datagram(ssrc: u32, seq: u16, timestamp: u32) -> Bytes {
        rtp::Packet {
            header: rtp::Header {
                payload_type: 96,
                sequence_number: seq,
                timestamp,
                ssrc,
                ..Default::default()
            },
            payload: Bytes::from_static(&[0xab; 16]),
        }
        .marshal()
        .unwrap()
    }

    fn empty_rr_plus_sdes(ssrc: u32, cname: &str) -> Bytes {
        CompoundPacket(vec![
            rtcp::Packet::ReceiverReport(ReceiverReport {
                ssrc,
                reports: vec![],
            }),
            rtcp::Packet::SourceDescription(SourceDescription {
                chunks: vec![SourceDescriptionChunk {
                    source: ssrc,
                    items: vec![SourceDescriptionItem {
                        sdes_type: SdesType::SdesCname,
                        text: cname.to_owned(),
                    }],
                }],
            }),
        ])
        .marshal()
        .unwrap()
    }

    fn drain(session: &mut Session) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        while let Some(event) = session.poll_event() {
            kinds.push(event.kind);
        }
        kinds
    }

    #[test]
    fn test_three_in_order_packets_establish_source() {
        let mut session = test_session(46000);
        session.enable_weak_validation();

        for seq in [100u16, 101, 102] {
            let raw = rtp_datagram(0x2222, seq, seq as u32 * 160);
            session.process_data(&raw, seq as u32 * 160);
        }

        assert_eq!(session.member_count(), 2);
        let source = session.table.get(0x2222).unwrap();
        assert_eq!(source.received, 3);
        assert_eq!(source.probation, 0);
        assert_eq!(source.max_seq, 102);
        assert!(source.sender);
        assert_eq!(session.active_sender_count(), 1);

        // Packet 100 was withheld on probation; 101 and 102 were delivered.
        let kinds = drain(&mut session);
        assert!(matches!(kinds[0], EventKind::SourceCreated { ssrc: 0x2222 }));
        let delivered: Vec<u16> = kinds
            .iter()
            .filter_map(|k| match k {
                EventKind::RtpData { packet, .. } => Some(packet.header.sequence_number),
                _ => None,
            })
            .collect();
        assert_eq!(delivered, vec![101, 102]);
        assert_eq!(session.dropped_rtp_count(), 1);
    }

    #[test]
    fn test_rtp_from_unknown_source_dropped_by_default() {
        let mut session = test_session(46010);
        let raw = rtp_datagram(0x2222, 7, 0);
        session.process_data(&raw, 0);

        assert_eq!(session.member_count(), 1);
        assert_eq!(session.dropped_rtp_count(), 1);
        assert!(drain(&mut session).is_empty());
    }

    #[test]
    fn test_rtcp_admits_source_for_subsequent_rtp() {
        let mut session = test_session(46020);
        let raw = empty_rr_plus_sdes(0x2222, "bob@192.0.2.9");
        session.process_ctrl(&raw);

        let kinds = drain(&mut session);
        assert_eq!(
            kinds,
            vec![
                EventKind::RtcpStart { len: raw.len() },
                EventKind::SourceCreated { ssrc: 0x2222 },
                EventKind::EmptyReceiverReport { ssrc: 0x2222 },
                EventKind::SourceDescription {
                    ssrc: 0x2222,
                    sdes_type: SdesType::SdesCname,
                    text: "bob@192.0.2.9".to_owned(),
                },
                EventKind::RtcpFinish,
            ]
        );
        assert_eq!(session.sdes(0x2222, SdesType::SdesCname), Some("bob@192.0.2.9"));
        // An RTCP-learned source is not on probation until it sends data.
        assert_eq!(session.table.get(0x2222).unwrap().probation, -1);

        // Now its RTP is admitted into the probation machinery.
        session.process_data(&rtp_datagram(0x2222, 50, 0), 0);
        session.process_data(&rtp_datagram(0x2222, 51, 160), 160);
        assert_eq!(session.table.get(0x2222).unwrap().probation, 0);
    }

    #[test]
    fn test_malformed_rtp_counted_not_evented() {
        let mut session = test_session(46030);
        session.enable_weak_validation();
        // Version 1 header.
        let mut raw = rtp_datagram(0x2222, 1, 0).to_vec();
        raw[0] = 0x40 | (raw[0] & 0x3f);
        session.process_data(&raw, 0);

        assert_eq!(session.invalid_rtp_count(), 1);
        assert_eq!(session.member_count(), 1);
        assert!(drain(&mut session).is_empty());
    }

    #[test]
    fn test_rejected_compound_has_no_side_effects() {
        let mut session = test_session(46040);
        // A valid RR+BYE compound from a new source, truncated by two
        // bytes so the length sum cannot match.
        let compound = CompoundPacket(vec![
            rtcp::Packet::ReceiverReport(ReceiverReport {
                ssrc: 0x5555,
                reports: vec![],
            }),
            rtcp::Packet::Goodbye(Goodbye {
                sources: vec![0x5555],
                reason: String::new(),
            }),
        ]);
        let raw = compound.marshal().unwrap();
        session.process_ctrl(&raw[..raw.len() - 2]);

        assert_eq!(session.invalid_rtcp_count(), 1);
        assert_eq!(session.member_count(), 1);
        assert!(drain(&mut session).is_empty());
    }

    #[test]
    fn test_sender_report_stored_and_blocks_recorded() {
        let mut session = test_session(46050);
        let sr = SenderReport {
            ssrc: 0x3333,
            ntp_time: 0x1234_5678_9abc_def0,
            rtp_time: 1000,
            packet_count: 10,
            octet_count: 1600,
            reports: vec![ReceptionReport {
                ssrc: 0x4444,
                fraction_lost: 3,
                total_lost: 2,
                last_sequence_number: 90,
                jitter: 7,
                last_sender_report: 0,
                delay: 0,
            }],
        };
        let raw = CompoundPacket(vec![
            rtcp::Packet::SenderReport(sr),
            rtcp::Packet::SourceDescription(SourceDescription {
                chunks: vec![SourceDescriptionChunk {
                    source: 0x3333,
                    items: vec![SourceDescriptionItem {
                        sdes_type: SdesType::SdesCname,
                        text: "carol@192.0.2.7".to_owned(),
                    }],
                }],
            }),
        ])
        .marshal()
        .unwrap();
        session.process_ctrl(&raw);

        // Reporter and reportee both have entries now.
        assert_eq!(session.member_count(), 3);
        let stored = session.sender_report(0x3333).unwrap();
        assert_eq!(stored.ntp_time, 0x1234_5678_9abc_def0);
        assert!(stored.reports.is_empty());
        let block = session.reception_report(0x3333, 0x4444).unwrap();
        assert_eq!(block.total_lost, 2);

        // A second report from the same pair replaces the record.
        let raw = CompoundPacket(vec![
            rtcp::Packet::SenderReport(SenderReport {
                ssrc: 0x3333,
                reports: vec![ReceptionReport {
                    ssrc: 0x4444,
                    total_lost: 5,
                    ..Default::default()
                }],
                ..Default::default()
            }),
            rtcp::Packet::Goodbye(Goodbye {
                sources: vec![],
                reason: String::new(),
            }),
        ])
        .marshal()
        .unwrap();
        session.process_ctrl(&raw);
        assert_eq!(
            session.reception_report(0x3333, 0x4444).map(|r| r.total_lost),
            Some(5)
        );
    }

    #[test]
    fn test_bye_starts_grace_period_then_deletes() {
        let mut session = test_session(46060);
        let raw = CompoundPacket(vec![
            rtcp::Packet::ReceiverReport(ReceiverReport {
                ssrc: 0x2222,
                reports: vec![ReceptionReport {
                    ssrc: 0x2222,
                    ..Default::default()
                }],
            }),
            rtcp::Packet::Goodbye(Goodbye {
                sources: vec![0x2222],
                reason: "bye".to_owned(),
            }),
        ])
        .marshal()
        .unwrap();
        session.process_ctrl(&raw);

        let kinds = drain(&mut session);
        assert!(kinds.contains(&EventKind::Bye { ssrc: 0x2222 }));
        assert!(session.reception_report(0x2222, 0x2222).is_some());

        // Still within the grace period.
        session.update();
        assert_eq!(session.member_count(), 2);
        assert!(drain(&mut session).is_empty());

        // Age the source past the grace period and sweep again.
        session.table.get_mut(0x2222).unwrap().last_active =
            Instant::now() - Duration::from_secs(3);
        session.update();
        assert_eq!(session.member_count(), 1);
        assert_eq!(
            drain(&mut session),
            vec![EventKind::SourceDeleted { ssrc: 0x2222 }]
        );
        // Deletion purged the report store both ways.
        assert!(session.reception_report(0x2222, 0x2222).is_none());
    }

    #[test]
    fn test_close_deletes_remote_sources_then_local() {
        let mut session = test_session(46070);
        let local = session.ssrc();
        session.process_ctrl(&empty_rr_plus_sdes(0x2222, "b@h"));
        session.process_ctrl(&empty_rr_plus_sdes(0x3333, "c@h"));
        drain(&mut session);

        let events = session.close().unwrap();
        let deleted: Vec<u32> = events
            .iter()
            .filter_map(|e| match e.kind {
                EventKind::SourceDeleted { ssrc } => Some(ssrc),
                _ => None,
            })
            .collect();
        assert_eq!(deleted.len(), 3);
        assert_eq!(*deleted.last().unwrap(), local);
        assert!(deleted.contains(&0x2222));
        assert!(deleted.contains(&0x3333));
    }

    #[test]
    fn test_set_ssrc_only_before_exchange() {
        let mut session = test_session(46080);
        let cname = session.sdes(session.ssrc(), SdesType::SdesCname).unwrap().to_owned();
        session.set_ssrc(0x42).unwrap();
        assert_eq!(session.ssrc(), 0x42);
        // The local entry moved, description intact.
        assert_eq!(session.sdes(0x42, SdesType::SdesCname), Some(cname.as_str()));

        session.process_ctrl(&empty_rr_plus_sdes(0x2222, "b@h"));
        assert_eq!(session.set_ssrc(0x43), Err(Error::SsrcChangeTooLate));
    }

    #[test]
    fn test_encryption_key_is_stored_but_unsupported() {
        let mut session = test_session(46090);
        assert!(session.encryption_key().is_none());
        assert_eq!(
            session.set_encryption_key(b"secret"),
            Err(Error::UnsupportedFeature)
        );
        assert_eq!(session.encryption_key(), Some(&b"secret"[..]));
    }

    #[test]
    fn test_own_report_loops_back() {
        let mut session = test_session(46100);
        let now = Instant::now();
        session.send_rtcp(0, now).unwrap();

        let kinds = drain(&mut session);
        // Our own compound came straight back: RR (empty) plus our SDES.
        assert!(matches!(kinds[0], EventKind::RtcpStart { .. }));
        assert!(kinds.contains(&EventKind::EmptyReceiverReport {
            ssrc: session.ssrc()
        }));
        assert!(
            kinds
                .iter()
                .any(|k| matches!(k, EventKind::SourceDescription { ssrc, .. } if *ssrc == session.ssrc()))
        );
        // The size estimator saw the packet we sent.
        assert!(session.scheduler.avg_rtcp_size != 70.0);
    }

    #[test]
    fn test_send_control_reconsiders_before_sending() {
        let mut session = test_session(46110);
        let now = Instant::now();

        // Timer "expired" a moment ago, but the last send was just now:
        // reconsideration must push the deadline back without sending.
        session.last_rtcp_send = now;
        session.next_rtcp_send = now - Duration::from_millis(10);
        session.send_control(0).unwrap();
        assert!(drain(&mut session).is_empty());
        assert!(session.next_rtcp_send > now);

        // With the last send far enough in the past the report goes out.
        session.last_rtcp_send = now - Duration::from_secs(1000);
        session.next_rtcp_send = now - Duration::from_millis(10);
        session.send_control(0).unwrap();
        let kinds = drain(&mut session);
        assert!(kinds.iter().any(|k| matches!(k, EventKind::RtcpStart { .. })));
        assert!(!session.scheduler.initial);
    }

    #[test]
    fn test_sdes_rotation_schedule() {
        let mut session = test_session(46120);
        let ssrc = session.ssrc();
        for (sdes_type, value) in [
            (SdesType::SdesName, "Alice"),
            (SdesType::SdesEmail, "alice@example.com"),
            (SdesType::SdesPhone, "+1 555 0100"),
            (SdesType::SdesLoc, "somewhere"),
            (SdesType::SdesTool, "avt-session"),
            (SdesType::SdesNote, "testing"),
        ] {
            session.set_sdes(ssrc, sdes_type, value).unwrap();
        }

        let mut counts: std::collections::HashMap<SdesType, usize> = Default::default();
        const REPORTS: usize = 96;
        for _ in 0..REPORTS {
            let sdes = session.compose_sdes(MAX_PACKET_LEN);
            for item in &sdes.chunks[0].items {
                *counts.entry(item.sdes_type).or_default() += 1;
            }
        }

        // CNAME and NOTE ride along every single time.
        assert_eq!(counts[&SdesType::SdesCname], REPORTS);
        assert_eq!(counts[&SdesType::SdesNote], REPORTS);
        // 32 third-interval slots: NAME in 7 of every 8, the rest cycling
        // through the low-priority items one each.
        assert_eq!(counts[&SdesType::SdesName], 28);
        assert_eq!(counts[&SdesType::SdesTool], 1);
        assert_eq!(counts[&SdesType::SdesEmail], 1);
        assert_eq!(counts[&SdesType::SdesPhone], 1);
        assert_eq!(counts[&SdesType::SdesLoc], 1);
    }

    #[test]
    fn test_report_blocks_cap_at_limit() {
        let mut session = test_session(46130);
        session.enable_weak_validation();
        // 40 established senders.
        for i in 0..40u32 {
            let ssrc = 0x1_0000 + i * 7;
            for seq in [10u16, 11, 12] {
                session.process_data(&rtp_datagram(ssrc, seq, 0), 0);
            }
        }
        assert_eq!(session.active_sender_count(), 40);
        drain(&mut session);

        let now = Instant::now();
        let blocks = session.collect_report_blocks(now, MAX_PACKET_LEN - 8);
        assert_eq!(blocks.len(), MAX_REPORT_BLOCKS);
        assert_eq!(session.active_sender_count(), 9);

        // The continuation pass picks up the rest.
        let blocks = session.collect_report_blocks(now, MAX_PACKET_LEN - 8);
        assert_eq!(blocks.len(), 9);
        assert_eq!(session.active_sender_count(), 0);
    }

    #[test]
    fn test_config_contract_violations_fail_loudly() {
        let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
        assert_eq!(
            Session::new(localhost, 46141, 46141, 0, 2000.0).unwrap_err(),
            Error::OddPort(46141)
        );
        assert_eq!(
            Session::new(localhost, 46140, 46140, 200, 2000.0).unwrap_err(),
            Error::BadTtl(200)
        );
        assert_eq!(
            Session::new(localhost, 46140, 46140, 0, 0.0).unwrap_err(),
            Error::BadBandwidth
        );
    }
}
