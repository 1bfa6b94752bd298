//! Two sessions talking over loopback sockets: data flows one way, the
//! receiver learns the sender, a BYE announces departure, and teardown
//! deletes everything with the local source last.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use avt_session::{EventKind, Session};
use bytes::Bytes;

const PAYLOAD: &[u8] = &[0x55; 160];

fn recv_until(session: &mut Session, wanted: usize) -> usize {
    let mut serviced = 0;
    for _ in 0..200 {
        if session.recv(Duration::from_millis(10), 0).unwrap() {
            serviced += 1;
            if serviced == wanted {
                break;
            }
        }
    }
    serviced
}

#[test]
fn test_two_party_exchange() {
    let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let mut a = Session::new(localhost, 46200, 46210, 0, 2000.0).unwrap();
    let mut b = Session::new(localhost, 46210, 46200, 0, 2000.0).unwrap();
    a.enable_weak_validation();

    // B streams three packets to A.
    for i in 0..3u32 {
        let sent = b
            .send(i * 160, 0, i == 0, vec![], Bytes::from_static(PAYLOAD), None)
            .unwrap();
        assert_eq!(sent, 12 + PAYLOAD.len());
    }

    assert_eq!(recv_until(&mut a, 3), 3);

    // A saw B appear and, once probation cleared, got the media.
    let mut created = None;
    let mut delivered = 0;
    while let Some(event) = a.poll_event() {
        match event.kind {
            EventKind::SourceCreated { ssrc } => created = Some(ssrc),
            EventKind::RtpData { ssrc, packet } => {
                assert_eq!(ssrc, b.ssrc());
                assert_eq!(&packet.payload[..], PAYLOAD);
                delivered += 1;
            }
            _ => {}
        }
    }
    assert_eq!(created, Some(b.ssrc()));
    assert_eq!(delivered, 2);
    assert_eq!(a.member_count(), 2);

    // B says goodbye; A records it but keeps the source for the grace
    // period.
    b.send_bye().unwrap();
    assert_eq!(recv_until(&mut a, 1), 1);
    let mut saw_bye = false;
    while let Some(event) = a.poll_event() {
        if let EventKind::Bye { ssrc } = event.kind {
            assert_eq!(ssrc, b.ssrc());
            saw_bye = true;
        }
    }
    assert!(saw_bye);
    assert_eq!(a.member_count(), 2);

    // Teardown flushes every source, ours last.
    let b_ssrc = b.ssrc();
    b.close().unwrap();
    let a_ssrc = a.ssrc();
    let events = a.close().unwrap();
    let deleted: Vec<u32> = events
        .iter()
        .filter_map(|e| match e.kind {
            EventKind::SourceDeleted { ssrc } => Some(ssrc),
            _ => None,
        })
        .collect();
    assert_eq!(deleted, vec![b_ssrc, a_ssrc]);
}
