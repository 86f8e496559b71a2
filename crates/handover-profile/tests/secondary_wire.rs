//! The secondary driven by hand-written packets.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use handover_frame::{
    decode_message, send_message, ProtocolMessage, StartRequest, StartStatus, END_PACKET,
};
use handover_profile::sim::{
    initialised, Journal, ScriptedClient, SimHandle, SimState, HANDSET_ADDR, PRIMARY_ADDR, SIM_PSM,
};
use handover_profile::{
    Channel, ConnectStatus, ConnectionEvent, EventLog, HandoverClient, HandoverConfig,
    HandoverProfile, LinkId, MarshalState, ProfileEvent, ProtocolFault,
};
use handover_transport::{loopback_pair, LinkSink, LoopbackConfig, LoopbackLink};

struct Bench {
    profile: HandoverProfile,
    sim: SimHandle,
    events: EventLog,
    peer: LoopbackLink,
}

fn config() -> HandoverConfig {
    HandoverConfig {
        protocol_message_timeout: Duration::from_millis(100),
        ..HandoverConfig::default()
    }
}

impl Bench {
    fn new(sim: SimHandle, clients: Vec<Box<dyn HandoverClient>>) -> Self {
        Self::with_config(config(), sim, clients)
    }

    fn with_config(
        config: HandoverConfig,
        sim: SimHandle,
        clients: Vec<Box<dyn HandoverClient>>,
    ) -> Self {
        let events = EventLog::new();
        let mut profile =
            initialised(config.clone(), &sim, clients, &events).expect("profile should initialise");

        let (ours, peer) = loopback_pair(LoopbackConfig {
            mtu: config.mtu,
            capacity: 16 * config.mtu,
            record: true,
        });
        let (sink, source) = ours.into_parts();
        profile
            .handle_event(ConnectionEvent::ConnectInd {
                peer: PRIMARY_ADDR,
                psm: SIM_PSM,
                connection_id: 1,
                identifier: 1,
            })
            .expect("inbound connect should be accepted");
        profile
            .handle_event(ConnectionEvent::ConnectCfm {
                status: ConnectStatus::Success,
                channel: Some(Channel::new(LinkId(0x40), Box::new(sink), Box::new(source))),
            })
            .expect("channel should open");

        Self {
            profile,
            sim,
            events,
            peer,
        }
    }

    fn plain(clients: Vec<Box<dyn HandoverClient>>) -> Self {
        Self::plain_with(config(), clients)
    }

    fn plain_with(config: HandoverConfig, clients: Vec<Box<dyn HandoverClient>>) -> Self {
        Self::with_config(config, secondary_sim(), clients)
    }

    fn start(&mut self, session_id: u8) -> &mut Self {
        self.start_req(request(session_id))
    }

    fn start_req(&mut self, req: StartRequest) -> &mut Self {
        send_message(
            &mut self.peer.sink,
            &ProtocolMessage::StartReq(req),
            Duration::from_millis(50),
        )
        .expect("START_REQ should send");
        self
    }

    fn raw(&mut self, packet: &[u8]) -> &mut Self {
        self.peer.sink.flush(packet).expect("packet should send");
        self
    }

    fn run(&mut self) -> handover_profile::Result<()> {
        self.profile.handle_event(ConnectionEvent::MoreData)
    }

    fn replies(&self) -> Vec<ProtocolMessage> {
        self.peer
            .handle()
            .received_packets()
            .iter()
            .map(|packet| decode_message(packet).expect("reply should decode"))
            .collect()
    }
}

fn secondary_sim() -> SimHandle {
    SimHandle::new(SimState {
        peer_addr: Some(PRIMARY_ADDR),
        mirror_acl_handle: Some(0x0002),
        ..SimState::default()
    })
}

fn request(session_id: u8) -> StartRequest {
    StartRequest {
        session_id,
        last_tx_seq: 0,
        last_rx_seq: 0,
        mirror_state: 0,
        num_handsets: 1,
        handset_addr: HANDSET_ADDR,
    }
}

fn client(name: &str, journal: &Journal) -> Box<dyn HandoverClient> {
    ScriptedClient::new(name, Vec::<u8>::new(), journal).boxed()
}

#[test]
fn start_request_is_confirmed_with_its_session() {
    let mut bench = Bench::plain(Vec::new());
    bench.start(7);

    bench.run().expect("no fault");

    assert_eq!(
        bench.replies(),
        vec![ProtocolMessage::StartCfm {
            session_id: 7,
            status: StartStatus::Success
        }]
    );
    assert_eq!(bench.profile.handset_addr(), Some(HANDSET_ADDR));
    assert_eq!(bench.sim.state().performance_requests, 0);
}

#[test]
fn inconsistent_link_state_vetoes() {
    let knobs: [fn(&mut SimState); 4] = [
        |s| s.last_rx_seq = 4,
        |s| s.mirror_state = 0x0102,
        |s| s.mirror_veto = true,
        |s| s.handset_instance = true,
    ];
    for knob in knobs {
        let mut bench = Bench::plain(Vec::new());
        bench.sim.update(knob);
        bench.start(1);

        bench.run().expect("no fault");

        assert_eq!(
            bench.replies(),
            vec![ProtocolMessage::StartCfm {
                session_id: 1,
                status: StartStatus::Vetoed
            }]
        );
        assert_eq!(bench.sim.state().performance_requests, 0);
    }
}

#[test]
fn full_handover_takes_the_primary_role() {
    let journal = Journal::new();
    let volume = ScriptedClient::new("volume", Vec::<u8>::new(), &journal);
    let received = volume.received();
    let mut bench = Bench::plain(vec![volume.boxed()]);

    bench
        .start(1)
        .raw(&[0x80, 0x00, 0x00, 0x02, 0x11, 0x22, 0xff])
        .raw(&[0x80, 0xef, 0x00, 0x03, 0xaa, 0xbb, 0xcc, 0xff]);
    bench.run().expect("no fault");

    assert!(bench.profile.is_primary());
    assert_eq!(bench.profile.marshal_state(), MarshalState::Idle);
    assert_eq!(received.lock().expect("lock").as_slice(), &[0x11, 0x22]);
    assert_eq!(bench.sim.baseband_received().as_ref(), &[0xaa, 0xbb, 0xcc]);
    assert_eq!(
        bench.replies()[1],
        ProtocolMessage::UnmarshalP1Cfm,
        "P1 end is confirmed"
    );
    assert!(bench.sim.journal().contains("handover_commit:0x0002"));
    assert!(journal.contains("volume:commit:true"));
    assert!(journal.contains("volume:complete:true"));
    assert_eq!(
        bench.events.last(),
        Some(ProfileEvent::HandoverCompleteInd { is_primary: true })
    );
    assert_eq!(bench.sim.state().performance_requests, 0);
}

#[test]
fn end_tag_in_its_own_packet_closes_each_phase() {
    let mut bench = Bench::plain(Vec::new());
    bench.start(1).raw(&END_PACKET).raw(&END_PACKET);

    bench.run().expect("no fault");

    assert!(bench.profile.is_primary());
    assert_eq!(bench.replies().len(), 2);
}

#[test]
fn clients_commit_after_the_link_when_audio_is_mirrored() {
    let sim = SimHandle::new(SimState {
        mirror_acl_handle: Some(0x0002),
        a2dp_active: true,
        ..SimState::default()
    });
    let journal = sim.journal();
    let mut bench = Bench::new(sim, vec![client("volume", &journal)]);

    bench
        .start(1)
        .raw(&[0x80, 0x00, 0x00, 0x01, 0x01, 0xff])
        .raw(&END_PACKET);
    bench.run().expect("no fault");

    let link = journal.position("handover_commit:0x0002").expect("link committed");
    let role = journal.position("commit_role:true").expect("role committed");
    let clients = journal.position("volume:commit:true").expect("client committed");
    assert!(link < role && role < clients);
}

#[test]
fn clients_commit_before_the_link_otherwise() {
    let sim = SimHandle::new(SimState {
        mirror_acl_handle: Some(0x0002),
        ..SimState::default()
    });
    let journal = sim.journal();
    let mut bench = Bench::new(sim, vec![client("volume", &journal)]);

    bench
        .start(1)
        .raw(&[0x80, 0x00, 0x00, 0x01, 0x01, 0xff])
        .raw(&END_PACKET);
    bench.run().expect("no fault");

    let clients = journal.position("volume:commit:true").expect("client committed");
    let link = journal.position("handover_commit:0x0002").expect("link committed");
    assert!(clients < link);
    assert!(!journal.contains("commit_role:true"));
}

#[test]
fn cancel_while_idle_is_ignored() {
    let mut bench = Bench::plain(Vec::new());
    bench.raw(&[0x02]);

    bench.run().expect("no fault");

    assert_eq!(bench.profile.marshal_state(), MarshalState::Idle);
    assert!(bench.replies().is_empty());
}

#[test]
fn cancel_during_client_transfer_aborts_clients() {
    let journal = Journal::new();
    let mut bench = Bench::plain(vec![client("volume", &journal)]);
    bench
        .start(1)
        .raw(&[0x80, 0x00, 0x00, 0x02, 0x01, 0x02])
        .raw(&[0x02]);

    bench.run().expect("no fault");

    assert!(journal.contains("volume:abort"));
    assert_eq!(bench.profile.marshal_state(), MarshalState::Idle);
    assert!(!bench.profile.is_primary());
    assert_eq!(bench.sim.state().performance_requests, 0);
}

#[test]
fn cancel_after_baseband_state_is_fatal() {
    let mut bench = Bench::plain(Vec::new());
    bench
        .start(1)
        .raw(&END_PACKET)
        .raw(&[0x80, 0xef, 0x00, 0x02, 0xaa, 0xbb])
        .raw(&[0x02]);

    let err = bench.run().unwrap_err();

    assert!(matches!(err, ProtocolFault::CancelAfterP0));
    assert_eq!(bench.sim.baseband_received().as_ref(), &[0xaa, 0xbb]);
}

#[test]
fn baseband_state_before_client_state_is_ignored() {
    let mut bench = Bench::plain(Vec::new());
    bench.start(1).raw(&[0x80, 0xef, 0x00, 0x01, 0x55]);

    bench.run().expect("no fault");

    assert!(bench.sim.baseband_received().is_empty());
    assert_eq!(bench.profile.marshal_state(), MarshalState::Idle);
}

#[test]
fn stalled_baseband_transfer_is_fatal() {
    let mut bench = Bench::plain(Vec::new());
    bench
        .start(1)
        .raw(&END_PACKET)
        .raw(&[0x80, 0xef, 0x00, 0x01, 0x55]);

    let err = bench.run().unwrap_err();

    assert!(matches!(err, ProtocolFault::P0TransferTimeout));
}

#[test]
fn stalled_client_transfer_is_abandoned() {
    let journal = Journal::new();
    let mut bench = Bench::plain(vec![client("volume", &journal)]);
    bench.start(1).raw(&[0x80, 0x00, 0x00, 0x02, 0x01, 0x02]);

    bench.run().expect("no fault");

    assert!(journal.contains("volume:abort"));
    assert_eq!(bench.profile.marshal_state(), MarshalState::Idle);
    assert_eq!(bench.sim.state().performance_requests, 0);
}

#[test]
fn new_start_replaces_an_unfinished_handover() {
    let journal = Journal::new();
    let mut bench = Bench::plain(vec![client("volume", &journal)]);
    bench
        .start(1)
        .raw(&[0x80, 0x00, 0x00, 0x02, 0x01, 0x02])
        .start(2);

    bench.run().expect("no fault");

    assert!(journal.contains("volume:abort"));
    let replies = bench.replies();
    assert_eq!(
        replies.last(),
        Some(&ProtocolMessage::StartCfm {
            session_id: 2,
            status: StartStatus::Success
        })
    );
}

#[test]
fn unknown_client_tag_is_fatal() {
    let mut bench = Bench::plain(Vec::new());
    bench.start(1).raw(&[0x80, 0x05, 0x00, 0x01, 0x00, 0xff]);

    let err = bench.run().unwrap_err();

    assert!(matches!(err, ProtocolFault::UnknownClient(0x05)));
}

#[test]
fn bytes_after_end_tag_are_fatal() {
    let mut bench = Bench::plain(Vec::new());
    bench.start(1).raw(&[0x80, 0xff, 0x00]);

    let err = bench.run().unwrap_err();

    assert!(matches!(err, ProtocolFault::MalformedFrame(_)));
}

#[test]
fn unknown_opcode_is_fatal() {
    let mut bench = Bench::plain(Vec::new());
    bench.raw(&[0x42, 0x00]);

    let err = bench.run().unwrap_err();

    assert!(matches!(err, ProtocolFault::UnexpectedOpcode(0x42)));
}

#[test]
fn start_request_on_the_primary_is_ignored() {
    let mut bench = Bench::plain(Vec::new());
    bench
        .profile
        .connect(Arc::new(EventLog::new()), PRIMARY_ADDR)
        .expect("connect while connected should confirm");
    assert!(bench.profile.is_primary());
    bench.start(1);

    bench.run().expect("no fault");

    assert!(bench.replies().is_empty());
}

#[test]
fn slow_client_unmarshal_is_fatal() {
    let journal = Journal::new();
    let config = HandoverConfig {
        p1_unmarshal_timeout: Duration::from_millis(20),
        ..config()
    };
    let mut bench = Bench::plain_with(
        config,
        vec![
            ScriptedClient::new("volume", Vec::<u8>::new(), &journal)
                .slow_unmarshal(Duration::from_millis(40))
                .boxed(),
            client("codec", &journal),
        ],
    );
    bench
        .start(1)
        .raw(&[0x80, 0x00, 0x00, 0x01, 0x11, 0x01, 0x00, 0x01, 0x22, 0xff]);

    let err = bench.run().unwrap_err();

    assert!(matches!(
        err,
        ProtocolFault::P1UnmarshalTimeout { client: 1 }
    ));
    assert!(journal.contains("volume:unmarshal:1"));
    assert!(!journal.contains("codec:unmarshal:1"));
}

#[test]
fn gaps_between_client_packets_wait_for_the_protocol_timeout() {
    let journal = Journal::new();
    let volume = ScriptedClient::new("volume", Vec::<u8>::new(), &journal);
    let received = volume.received();
    let config = HandoverConfig {
        protocol_message_timeout: Duration::from_millis(500),
        p1_unmarshal_timeout: Duration::from_millis(20),
        ..HandoverConfig::default()
    };
    let mut bench = Bench::plain_with(config, vec![volume.boxed()]);
    bench.start(1).raw(&[0x80, 0x00, 0x00, 0x01, 0x11]);

    let outcome = thread::scope(|scope| {
        let sink = &mut bench.peer.sink;
        scope.spawn(move || {
            thread::sleep(Duration::from_millis(60));
            sink.flush(&[0x80, 0x00, 0x00, 0x01, 0x12, 0xff])
                .expect("second client packet should send");
            sink.flush(&END_PACKET).expect("end packet should send");
        });
        bench.profile.handle_event(ConnectionEvent::MoreData)
    });

    outcome.expect("no fault");
    assert!(bench.profile.is_primary());
    assert_eq!(received.lock().expect("lock").as_slice(), &[0x11, 0x12]);
}

#[test]
fn vetoed_restart_forgets_the_finished_client_phase() {
    let mut bench = Bench::plain(Vec::new());
    bench
        .start(1)
        .raw(&END_PACKET)
        .start_req(StartRequest {
            last_tx_seq: 9,
            ..request(2)
        })
        .raw(&END_PACKET);

    bench.run().expect("no fault");
    assert_eq!(
        bench.replies().last(),
        Some(&ProtocolMessage::StartCfm {
            session_id: 2,
            status: StartStatus::Vetoed
        })
    );

    bench.run().expect("no fault");

    assert!(!bench.profile.is_primary());
    assert!(!bench.sim.journal().contains("handover_commit:0x0002"));
    assert_eq!(bench.profile.marshal_state(), MarshalState::Idle);
}
