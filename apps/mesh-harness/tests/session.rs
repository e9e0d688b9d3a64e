mod support;

use harness_proto::{MessageType, WireMessage};
use mesh_harness::error::HarnessError;
use mesh_harness::session::{Session, SessionState};
use std::time::{Duration, Instant};
use support::{black_hole, Behavior, FakePeer};

const TIMEOUT: Duration = Duration::from_secs(3);

#[test_timeout::bounded(15)]
async fn status_request_gets_a_reply() {
    let peer = FakePeer::start(Behavior::Answer).await;
    let url = format!("ws://127.0.0.1:{}/seller/commands", peer.port);

    let mut session = Session::open(&url, TIMEOUT).await.expect("session opens");
    assert_eq!(session.state(), SessionState::Open);

    let reply = session
        .request(&WireMessage::show_current_peers(), TIMEOUT)
        .await
        .expect("reply arrives");
    let parsed = reply.parsed().expect("structured reply");
    assert_eq!(parsed.kind, "currentPeers");
    session.close().await;

    let received = peer.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].path, "/seller/commands");
    assert_eq!(received[0].body["type"], "showCurrentPeers");
    assert_eq!(received[0].body["data"], "");
}

#[test_timeout::bounded(15)]
async fn sequential_requests_complete_in_issue_order() {
    let peer = FakePeer::start(Behavior::PingThenAnswer).await;
    let url = format!("ws://127.0.0.1:{}/buyer/p2p", peer.port);
    let mut session = Session::open(url, TIMEOUT).await.expect("session opens");

    for i in 0..3 {
        let message = WireMessage::p2p(format!("message {i}"), "seller-key");
        let reply = session.request(&message, TIMEOUT).await.expect("reply");
        let parsed = reply.parsed().expect("structured reply");
        assert_eq!(parsed.data, format!("message {i}"));
    }
    session.close().await;

    let kinds: Vec<_> = peer
        .received()
        .iter()
        .map(|r| r.body["publicKey"].as_str().map(str::to_owned))
        .collect();
    assert_eq!(kinds, vec![Some("seller-key".to_string()); 3]);
    assert_eq!(MessageType::P2p.as_str(), "p2p");
}

#[test_timeout::bounded(15)]
async fn response_timeout_leaves_session_usable() {
    let peer = FakePeer::start(Behavior::SlowFirst(Duration::from_millis(800))).await;
    let url = format!("ws://127.0.0.1:{}/seller/commands", peer.port);
    let mut session = Session::open(url, TIMEOUT).await.expect("session opens");

    let started = Instant::now();
    let err = session
        .request(&WireMessage::show_current_peers(), Duration::from_millis(200))
        .await
        .expect_err("first reply is late");
    assert!(matches!(err, HarnessError::ResponseTimeout { .. }), "unexpected {err:?}");
    assert!(started.elapsed() < Duration::from_millis(700));
    assert_eq!(session.state(), SessionState::Open);

    // Without request ids the late reply is taken for the next request.
    let reply = session
        .request(&WireMessage::show_current_peers(), TIMEOUT)
        .await
        .expect("session still usable");
    assert!(reply.text().contains(r#""seq":0"#), "got {}", reply.text());
    session.close().await;
}

#[test_timeout::bounded(15)]
async fn silent_peer_times_out() {
    let peer = FakePeer::start(Behavior::Silent).await;
    let url = format!("ws://127.0.0.1:{}/buyer/commands", peer.port);
    let mut session = Session::open(url, TIMEOUT).await.expect("session opens");

    let err = session
        .request(&WireMessage::show_current_peers(), Duration::from_millis(150))
        .await
        .expect_err("no reply");
    match err {
        HarnessError::ResponseTimeout { url, timeout } => {
            assert!(url.ends_with("/buyer/commands"));
            assert_eq!(timeout, Duration::from_millis(150));
        }
        other => panic!("unexpected {other:?}"),
    }
    session.close().await;
}

#[test_timeout::bounded(15)]
async fn handshake_that_never_completes_is_a_connect_timeout() {
    let (port, _hole) = black_hole().await;
    let url = format!("ws://127.0.0.1:{port}/seller/commands");

    let started = Instant::now();
    let err = Session::open(url, Duration::from_millis(300))
        .await
        .err()
        .expect("handshake hangs");
    assert!(matches!(err, HarnessError::ConnectTimeout { .. }), "unexpected {err:?}");
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[test_timeout::bounded(15)]
async fn peer_hangup_closes_the_session() {
    let peer = FakePeer::start(Behavior::Hangup).await;
    let url = format!("ws://127.0.0.1:{}/seller/p2p", peer.port);
    let mut session = Session::open(url, TIMEOUT).await.expect("session opens");

    let err = session
        .request(&WireMessage::p2p("hi", "buyer-key"), TIMEOUT)
        .await
        .expect_err("peer hangs up");
    assert!(matches!(err, HarnessError::ClosedByPeer { .. }), "unexpected {err:?}");
    assert_eq!(session.state(), SessionState::Closed);
}

#[test_timeout::bounded(15)]
async fn closed_session_rejects_requests() {
    let peer = FakePeer::start(Behavior::Answer).await;
    let url = format!("ws://127.0.0.1:{}/seller/commands", peer.port);
    let mut session = Session::open(url, TIMEOUT).await.expect("session opens");

    session.close().await;
    session.close().await;
    assert_eq!(session.state(), SessionState::Closed);

    let err = session
        .request(&WireMessage::show_current_peers(), TIMEOUT)
        .await
        .expect_err("closed");
    assert!(matches!(
        err,
        HarnessError::SessionNotOpen {
            state: SessionState::Closed,
            ..
        }
    ));
    assert!(peer.received().is_empty());
}
