//! Join a session (multicast or unicast), send a silence stream, and print
//! membership changes and incoming media for half a minute.
//!
//! Usage: member [addr] [rx_port] [tx_port]

use std::net::IpAddr;
use std::time::{Duration, Instant};

use avt_session::{EventKind, Session};
use bytes::Bytes;
use rtcp::SdesType;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let addr: IpAddr = args.next().unwrap_or_else(|| "127.0.0.1".into()).parse()?;
    let rx_port: u16 = args.next().unwrap_or_else(|| "5004".into()).parse()?;
    let tx_port: u16 = args.next().unwrap_or_else(|| "5004".into()).parse()?;

    let mut session = Session::new(addr, rx_port, tx_port, 15, 2000.0)?;
    session.set_sdes(session.ssrc(), SdesType::SdesTool, "avt-session member")?;
    println!("joined {addr} as {:#010x}", session.ssrc());

    let start = Instant::now();
    let mut next_frame = start;
    while start.elapsed() < Duration::from_secs(30) {
        let now = Instant::now();
        // 8 kHz media clock.
        let rtp_now = (now.duration_since(start).as_secs_f64() * 8000.0) as u32;

        if now >= next_frame {
            // 20 ms of A-law silence.
            session.send(rtp_now, 8, false, vec![], Bytes::from_static(&[0xd5; 160]), None)?;
            next_frame += Duration::from_millis(20);
        }

        session.recv(Duration::from_millis(10), rtp_now)?;
        while let Some(event) = session.poll_event() {
            match event.kind {
                EventKind::SourceCreated { ssrc } => println!("+ source {ssrc:#010x}"),
                EventKind::SourceDeleted { ssrc } => println!("- source {ssrc:#010x}"),
                EventKind::Bye { ssrc } => println!("  {ssrc:#010x} is leaving"),
                EventKind::RtpData { ssrc, packet } => println!(
                    "  {ssrc:#010x} seq {} ({} bytes)",
                    packet.header.sequence_number,
                    packet.payload.len()
                ),
                EventKind::SourceDescription {
                    ssrc,
                    sdes_type: SdesType::SdesCname,
                    text,
                } => println!("  {ssrc:#010x} is {text}"),
                _ => {}
            }
        }

        session.send_control(rtp_now)?;
        session.update();
    }

    session.close()?;
    Ok(())
}
