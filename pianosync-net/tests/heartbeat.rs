mod common;

use std::time::{Duration, Instant};

use pianosync_net::protocol::OutboundFrame;
use pianosync_net::server::NetServer;
use pianosync_types::{Message, MessageBody, Source};

const INTERVAL: Duration = Duration::from_millis(100);

#[test]
fn test_silent_client_is_swept() {
    let mut server = NetServer::bind("127.0.0.1:0", common::fast_heartbeat_config(INTERVAL)).unwrap();
    let addr = server.local_addr().unwrap().to_string();

    let mut alice = common::RawClient::connect(&addr).unwrap();
    let mut bob = common::RawClient::connect(&addr).unwrap();
    common::drive_until_clients(&mut server, 2, Duration::from_secs(2));
    alice.recv_state_sync();
    bob.recv_state_sync();

    let t0 = Instant::now();
    alice
        .send_text(r#"{"type":"heartbeat","timestamp":1,"source":"client","clientId":"alice"}"#)
        .unwrap();
    common::poll_frames_at(&mut server, t0 + Duration::from_millis(150), 1, Duration::from_secs(2));

    // Bob has been silent for more than two intervals; alice answered 100ms ago.
    server.tick(t0 + Duration::from_millis(250));
    server.flush_writes();
    assert_eq!(server.client_count(), 1);

    // Later broadcasts only reach alice.
    alice.send_text(&common::note_on_json(60, 50)).unwrap();
    common::poll_frames_at(&mut server, t0 + Duration::from_millis(260), 1, Duration::from_secs(2));
    server.flush_writes();

    let (sync, _) = alice.recv_until_version(1);
    assert_eq!(sync.active_client_count, 1);

    // Bob sees alice's relayed heartbeat at most, then the closed socket.
    loop {
        match bob.recv() {
            Ok(OutboundFrame::Message(Message {
                body: MessageBody::Heartbeat { .. },
                ..
            })) => continue,
            Ok(other) => panic!("Swept client received {:?}", other),
            Err(_) => break,
        }
    }
}

#[test]
fn test_server_emits_heartbeats() {
    let mut server = NetServer::bind("127.0.0.1:0", common::fast_heartbeat_config(INTERVAL)).unwrap();
    let addr = server.local_addr().unwrap().to_string();

    let mut alice = common::RawClient::connect(&addr).unwrap();
    common::drive_until_clients(&mut server, 1, Duration::from_secs(2));
    alice.recv_state_sync();

    server.tick(Instant::now() + INTERVAL);
    server.flush_writes();

    match alice.recv().unwrap() {
        OutboundFrame::Message(Message {
            source: Source::Server,
            body: MessageBody::Heartbeat { .. },
            ..
        }) => {}
        other => panic!("Expected heartbeat, got {:?}", other),
    }
}

#[test]
fn test_client_heartbeat_is_relayed() {
    let server = common::TestServer::start("127.0.0.1:0", common::unbatched_config());

    let mut alice = common::RawClient::connect(&server.addr).unwrap();
    let mut bob = common::RawClient::connect(&server.addr).unwrap();
    alice.recv_state_sync();
    bob.recv_state_sync();

    alice
        .send(&Message::heartbeat(Source::Client, Some("alice".into())))
        .unwrap();

    match bob.recv().unwrap() {
        OutboundFrame::Message(Message {
            source: Source::Client,
            body: MessageBody::Heartbeat { client_id },
            ..
        }) => assert_eq!(client_id.as_deref(), Some("alice")),
        other => panic!("Expected relayed heartbeat, got {:?}", other),
    }

    let server = server.stop();
    assert_eq!(server.dispatcher().store().version(), 0);
}
