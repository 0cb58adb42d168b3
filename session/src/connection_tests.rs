use fragcast_rt::tasks::{self as rt, timeout, JoinHandle};

use super::*;
use crate::config::SessionConfig;
use crate::test_app::{next_wire, sid, text, Cards, WAIT};
use crate::transport::{ChannelPeer, ChannelTransport};

fn open(
    registry: &Registry<Cards>,
    binding: SessionBinding,
) -> (ChannelPeer, JoinHandle<ConnectionReport>) {
    let (transport, peer) = ChannelTransport::pair();
    let actor = ConnectionActor::new(registry.clone());
    (peer, rt::spawn(actor.run(binding, transport)))
}

async fn report(task: JoinHandle<ConnectionReport>) -> ConnectionReport {
    timeout(WAIT, task)
        .await
        .expect("connection did not finish")
        .unwrap()
}

#[test]
fn parses_session_handshake() {
    let id = SessionBinding::parse_handshake("session:table-1").unwrap();
    assert_eq!(id.as_str(), "table-1");
}

#[test]
fn accepts_start_prefix_with_spacing() {
    let id = SessionBinding::parse_handshake("start: 0b6c1f5e\n").unwrap();
    assert_eq!(id.as_str(), "0b6c1f5e");
}

#[test]
fn rejects_malformed_handshakes() {
    assert!(matches!(
        SessionBinding::parse_handshake("draw_card"),
        Err(BindingError::MalformedHandshake(_))
    ));
    assert_eq!(
        SessionBinding::parse_handshake("session:   "),
        Err(BindingError::EmptySessionId)
    );
}

#[test]
fn client_round_trip_over_path_binding() {
    let runtime = rt::Runtime::new().unwrap();
    runtime.block_on(async move {
        let registry = Registry::new(Cards::default(), SessionConfig::default());
        let (mut peer, task) = open(&registry, SessionBinding::Path(sid("t1")));

        assert_eq!(next_wire(&mut peer).await, text("<p>turn 0: </p>", "t1"));

        assert!(peer.send_text("draw_card\n\n{\"player\":\"p1\",\"action\":\"draw_card\"}"));
        assert_eq!(next_wire(&mut peer).await, text("<p>turn 0: p1</p>", "t1"));

        // Undecodable, then valid again: the connection survives.
        assert!(peer.send_text("draw card"));
        assert!(peer.send_text("draw_card\n\n{broken"));
        assert!(peer.send_text("end_turn"));
        assert_eq!(next_wire(&mut peer).await, text("<p>turn 1: p1</p>", "t1"));

        peer.hang_up();
        let report = report(task).await;
        assert_eq!(report.state, ConnectionState::Closed);
        assert_eq!(report.session, Some(sid("t1")));
        assert_eq!(report.actions_forwarded, 2);
        assert_eq!(report.frames_dropped, 2);
        assert_eq!(report.fragments_sent, 3);
        assert_eq!(report.close_reason, None);

        assert_eq!(registry.connection_count(&sid("t1")), 0);
        assert_eq!(registry.is_live(&sid("t1")), Some(true));
    });
}

#[test]
fn undecodable_frames_leave_other_connections_untouched() {
    let runtime = rt::Runtime::new().unwrap();
    runtime.block_on(async move {
        let registry = Registry::new(Cards::default(), SessionConfig::default());
        let (mut noisy, noisy_task) = open(&registry, SessionBinding::Path(sid("t7")));
        let (mut quiet, _quiet_task) = open(&registry, SessionBinding::Path(sid("t7")));
        assert_eq!(next_wire(&mut noisy).await, text("<p>turn 0: </p>", "t7"));
        assert_eq!(next_wire(&mut quiet).await, text("<p>turn 0: </p>", "t7"));

        assert!(noisy.send_text(""));
        assert!(noisy.send_text("draw card"));
        assert!(noisy.send_text("draw_card\n\n[1, 2]"));
        noisy.hang_up();
        let report = report(noisy_task).await;
        assert_eq!(report.frames_dropped, 3);
        assert_eq!(report.actions_forwarded, 0);

        let session = registry.get(&sid("t7")).unwrap();
        let snapshot = session.snapshot().await.unwrap();
        assert_eq!(snapshot.applied, 0);
        assert_eq!(snapshot.connections, 1);
        assert_eq!(quiet.try_recv(), None);

        assert!(quiet.send_text("end_turn"));
        assert_eq!(next_wire(&mut quiet).await, text("<p>turn 1: </p>", "t7"));
    });
}

#[test]
fn handshake_binding_names_the_session() {
    let runtime = rt::Runtime::new().unwrap();
    runtime.block_on(async move {
        let registry = Registry::new(Cards::default(), SessionConfig::default());
        let (mut peer, task) = open(&registry, SessionBinding::Handshake);

        assert!(peer.send_text("session:hs-1"));
        assert_eq!(next_wire(&mut peer).await, text("<p>turn 0: </p>", "hs-1"));
        assert_eq!(registry.connection_count(&sid("hs-1")), 1);

        peer.hang_up();
        assert_eq!(report(task).await.session, Some(sid("hs-1")));
    });
}

#[test]
fn malformed_handshake_is_refused() {
    let runtime = rt::Runtime::new().unwrap();
    runtime.block_on(async move {
        let registry = Registry::new(Cards::default(), SessionConfig::default());
        let (mut peer, task) = open(&registry, SessionBinding::Handshake);

        assert!(peer.send_text("hello"));
        assert_eq!(
            next_wire(&mut peer).await,
            WireMessage::Close(CloseReason::BindingFailed)
        );
        let report = report(task).await;
        assert_eq!(report.session, None);
        assert_eq!(report.close_reason, Some(CloseReason::BindingFailed));
        assert_eq!(registry.session_count(), 0);
    });
}

#[test]
fn silent_client_times_out_during_handshake() {
    let runtime = rt::Runtime::new().unwrap();
    runtime.block_on(async move {
        let config = SessionConfig {
            handshake_timeout_ms: 20,
            ..SessionConfig::default()
        };
        let registry = Registry::new(Cards::default(), config);
        let (mut peer, task) = open(&registry, SessionBinding::Handshake);

        assert_eq!(
            next_wire(&mut peer).await,
            WireMessage::Close(CloseReason::BindingFailed)
        );
        assert_eq!(report(task).await.state, ConnectionState::Closed);
    });
}

#[test]
fn ending_action_closes_every_connection_after_final_fragment() {
    let runtime = rt::Runtime::new().unwrap();
    runtime.block_on(async move {
        let registry = Registry::new(Cards::default(), SessionConfig::default());
        let (mut alice, alice_task) = open(&registry, SessionBinding::Path(sid("t2")));
        let (mut bob, bob_task) = open(&registry, SessionBinding::Path(sid("t2")));
        assert_eq!(next_wire(&mut alice).await, text("<p>turn 0: </p>", "t2"));
        assert_eq!(next_wire(&mut bob).await, text("<p>turn 0: </p>", "t2"));

        assert!(alice.send_text("finish"));

        for peer in [&mut alice, &mut bob] {
            assert_eq!(next_wire(peer).await, text("<p>turn 0: </p>", "t2"));
            assert_eq!(
                next_wire(peer).await,
                WireMessage::Close(CloseReason::SessionEnded)
            );
        }
        for task in [alice_task, bob_task] {
            assert_eq!(
                report(task).await.close_reason,
                Some(CloseReason::SessionEnded)
            );
        }
        // Both connections detached from an ended session, so it is gone.
        assert!(!registry.contains(&sid("t2")));
    });
}

#[test]
fn ended_session_refuses_new_connections() {
    let runtime = rt::Runtime::new().unwrap();
    runtime.block_on(async move {
        let registry = Registry::new(Cards::default(), SessionConfig::default());
        let id = sid("t3");
        // A connection the registry still counts keeps the ended entry around.
        let (lingering, _outbox) = ConnectionHandle::new(ConnectionId::new(), 8);
        let session = registry.attach(&id, lingering).unwrap();
        session.end().unwrap();
        timeout(WAIT, async {
            while registry.is_live(&id) != Some(false) {
                rt::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let (mut late, task) = open(&registry, SessionBinding::Path(id.clone()));
        assert_eq!(
            next_wire(&mut late).await,
            WireMessage::Close(CloseReason::SessionNotLive)
        );
        assert_eq!(report(task).await.fragments_sent, 0);
        assert_eq!(registry.connection_count(&id), 1);
    });
}

#[test]
fn transport_failure_detaches_connection() {
    let runtime = rt::Runtime::new().unwrap();
    runtime.block_on(async move {
        let registry = Registry::new(Cards::default(), SessionConfig::default());
        let (mut peer, task) = open(&registry, SessionBinding::Path(sid("t4")));
        assert_eq!(next_wire(&mut peer).await, text("<p>turn 0: </p>", "t4"));

        assert!(peer.fail(TransportError::Io("connection reset".to_string())));
        let report = report(task).await;
        assert_eq!(
            report.transport_error,
            Some(TransportError::Io("connection reset".to_string()))
        );
        assert_eq!(registry.connection_count(&sid("t4")), 0);
    });
}

#[test]
fn registry_shutdown_closes_open_connections() {
    let runtime = rt::Runtime::new().unwrap();
    runtime.block_on(async move {
        let registry = Registry::new(Cards::default(), SessionConfig::default());
        let (mut peer, task) = open(&registry, SessionBinding::Path(sid("t5")));
        assert_eq!(next_wire(&mut peer).await, text("<p>turn 0: </p>", "t5"));

        assert_eq!(registry.shutdown(), 1);
        assert_eq!(
            next_wire(&mut peer).await,
            WireMessage::Close(CloseReason::ServerShutdown)
        );
        assert_eq!(
            report(task).await.close_reason,
            Some(CloseReason::ServerShutdown)
        );

        let (mut refused, task) = open(&registry, SessionBinding::Path(sid("t5")));
        assert_eq!(
            next_wire(&mut refused).await,
            WireMessage::Close(CloseReason::ServerShutdown)
        );
        assert_eq!(report(task).await.session, Some(sid("t5")));
    });
}
