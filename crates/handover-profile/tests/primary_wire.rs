//! The primary answered by a hand-written peer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use handover_frame::{
    send_message, wait_for_packet, ProtocolMessage, StartStatus, END_TAG, MARSHAL_DATA,
    START_REQ,
};
use handover_profile::sim::{
    initialised, Journal, ScriptedClient, SimHandle, SimState, HANDSET_ADDR, SECONDARY_ADDR,
    SIM_PSM,
};
use handover_profile::{
    Channel, ConnectStatus, ConnectionEvent, EventLog, HandoverConfig, HandoverProfile,
    HandoverStatus, LinkId, MarshalState, SearchResult,
};
use handover_transport::{
    loopback_pair, LinkSink, LinkSource, LoopbackConfig, LoopbackHandle, LoopbackLink,
    LoopbackSink,
};

/// A sink whose reported MTU can be lowered while a handover runs.
struct ShrinkingSink {
    inner: LoopbackSink,
    mtu: Arc<AtomicUsize>,
}

impl LinkSink for ShrinkingSink {
    fn mtu(&self) -> usize {
        self.mtu.load(Ordering::Acquire).min(self.inner.mtu())
    }

    fn space(&self) -> usize {
        self.inner.space()
    }

    fn flush(&mut self, packet: &[u8]) -> handover_transport::Result<()> {
        self.inner.flush(packet)
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }
}

fn primary(journal: &Journal) -> (HandoverProfile, LoopbackHandle, LoopbackLink) {
    let (profile, link, peer, _mtu) = primary_with(journal, SimState::default());
    (profile, link, peer)
}

fn primary_with(
    journal: &Journal,
    state: SimState,
) -> (HandoverProfile, LoopbackHandle, LoopbackLink, Arc<AtomicUsize>) {
    let config = HandoverConfig {
        protocol_message_timeout: Duration::from_millis(150),
        ..HandoverConfig::default()
    };
    let sim = SimHandle::new(SimState {
        peer_addr: Some(SECONDARY_ADDR),
        mirror_acl_handle: Some(0x0001),
        ..state
    });
    let events = EventLog::new();
    let clients = vec![ScriptedClient::new("volume", *b"vol", journal).boxed()];
    let mut profile =
        initialised(config.clone(), &sim, clients, &events).expect("profile should initialise");

    let (ours, peer) = loopback_pair(LoopbackConfig {
        mtu: config.mtu,
        capacity: 4 * config.mtu,
        record: true,
    });
    let link = ours.handle();
    let (inner, source) = ours.into_parts();
    let mtu = Arc::new(AtomicUsize::new(usize::MAX));
    let sink = ShrinkingSink {
        inner,
        mtu: Arc::clone(&mtu),
    };

    profile
        .connect(Arc::new(events.clone()), SECONDARY_ADDR)
        .expect("connect should start");
    profile
        .handle_event(ConnectionEvent::SearchComplete(SearchResult::Found {
            remote_psm: SIM_PSM,
        }))
        .expect("search result should be accepted");
    profile
        .handle_event(ConnectionEvent::ConnectCfm {
            status: ConnectStatus::Success,
            channel: Some(Channel::new(LinkId(0x41), Box::new(sink), Box::new(source))),
        })
        .expect("channel should open");
    assert!(profile.is_primary());

    (profile, link, peer, mtu)
}

/// Wait for START_REQ, then answer with `replies` back to back.
fn answer_start(mut peer: LoopbackLink, replies: Vec<ProtocolMessage>) -> JoinHandle<()> {
    thread::spawn(move || {
        let request = wait_for_packet(&peer.source, Duration::from_secs(2))
            .expect("START_REQ should arrive");
        assert_eq!(request[0], START_REQ);
        peer.source
            .drop_bytes(request.len())
            .expect("request should drop");
        for reply in &replies {
            send_message(&mut peer.sink, reply, Duration::from_millis(50))
                .expect("reply should send");
        }
    })
}

/// Take the next packet off `peer`, waiting up to a second for it.
fn next_packet(peer: &mut LoopbackLink) -> Bytes {
    let packet =
        wait_for_packet(&peer.source, Duration::from_secs(1)).expect("packet should arrive");
    peer.source
        .drop_bytes(packet.len())
        .expect("packet should drop");
    packet
}

fn sent_marshal_data(link: &LoopbackHandle) -> bool {
    link.sent_packets()
        .iter()
        .any(|packet| packet.first() == Some(&MARSHAL_DATA))
}

#[test]
fn start_confirm_for_another_session_is_ignored() {
    let log = Journal::new();
    let (mut profile, link, peer) = primary(&log);
    let peer = answer_start(
        peer,
        vec![ProtocolMessage::StartCfm {
            session_id: 9,
            status: StartStatus::Success,
        }],
    );

    let status = profile
        .handover(&HANDSET_ADDR)
        .expect("handover should not fault");
    peer.join().expect("peer thread should not panic");

    assert_eq!(status, HandoverStatus::Timeout);
    assert_eq!(profile.session_id(), 1);
    assert_eq!(profile.marshal_state(), MarshalState::Idle);
    assert!(!sent_marshal_data(&link));
    assert_eq!(log.entries(), vec!["volume:veto"]);
}

#[test]
fn stale_confirm_does_not_end_the_wait() {
    let log = Journal::new();
    let (mut profile, link, peer) = primary(&log);
    let peer = answer_start(
        peer,
        vec![
            ProtocolMessage::StartCfm {
                session_id: 0,
                status: StartStatus::Success,
            },
            ProtocolMessage::StartCfm {
                session_id: 1,
                status: StartStatus::Vetoed,
            },
        ],
    );

    let status = profile
        .handover(&HANDSET_ADDR)
        .expect("handover should not fault");
    peer.join().expect("peer thread should not panic");

    assert_eq!(status, HandoverStatus::Vetoed);
    assert!(!sent_marshal_data(&link));
    assert!(profile.is_primary());
}

#[test]
fn unexpected_reply_to_start_is_a_failure() {
    let log = Journal::new();
    let (mut profile, link, peer) = primary(&log);
    let peer = answer_start(peer, vec![ProtocolMessage::UnmarshalP1Cfm]);

    let status = profile
        .handover(&HANDSET_ADDR)
        .expect("handover should not fault");
    peer.join().expect("peer thread should not panic");

    assert_eq!(status, HandoverStatus::Failure);
    assert!(!sent_marshal_data(&link));
    assert_eq!(profile.marshal_state(), MarshalState::Idle);
}

#[test]
fn baseband_data_that_cannot_fit_a_packet_fails() {
    let log = Journal::new();
    let (mut profile, link, mut peer, mtu) = primary_with(
        &log,
        SimState {
            p0_payload: Bytes::from_static(&[0x5a; 16]),
            ..SimState::default()
        },
    );
    let peer = thread::spawn(move || {
        assert_eq!(next_packet(&mut peer)[0], START_REQ);
        send_message(
            &mut peer.sink,
            &ProtocolMessage::StartCfm {
                session_id: 1,
                status: StartStatus::Success,
            },
            Duration::from_millis(50),
        )
        .expect("START_CFM should send");
        while next_packet(&mut peer).last() != Some(&END_TAG) {}

        // Too small for an entry header plus one byte of baseband state.
        mtu.store(4, Ordering::Release);
        send_message(
            &mut peer.sink,
            &ProtocolMessage::UnmarshalP1Cfm,
            Duration::from_millis(50),
        )
        .expect("UNMARSHAL_P1_CFM should send");
    });

    let status = profile
        .handover(&HANDSET_ADDR)
        .expect("handover should not fault");
    peer.join().expect("peer thread should not panic");

    assert_eq!(status, HandoverStatus::Failure);
    assert!(profile.is_primary());
    assert!(!link
        .sent_packets()
        .iter()
        .any(|packet| packet[..] == [MARSHAL_DATA]));
    assert!(log.contains("volume:abort"));
}
