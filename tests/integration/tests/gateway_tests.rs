//! Gateway integration tests
//!
//! Drive shards over real WebSockets against the mock gateway.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use std::time::Duration;

use integration_tests::{
    gateway_config, message_create, next_dispatch, next_event, ready, resumed, wait_for_status,
    wait_until, within, ClientFrame, MockGateway, QUIET_HEARTBEAT_MS, TOKEN,
};
use serde_json::json;
use tether_core::Snowflake;
use tether_gateway::protocol::PresenceUpdatePayload;
use tether_gateway::{
    CloseCode, GatewayError, GatewayMessage, OpCode, Shard, ShardEvent, ShardEventKind,
    ShardManager, ShardStatus,
};
use tokio::sync::mpsc;
use tokio::time::Instant;

fn start_shard(gateway: &MockGateway) -> (Shard, mpsc::Receiver<ShardEvent>) {
    let shard = Shard::new(0, 1, TOKEN, gateway.url(), gateway_config());
    let (tx, rx) = mpsc::channel(64);
    shard.start(tx);
    (shard, rx)
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_identify_and_ready() {
    let mut gateway = MockGateway::start().await.unwrap();
    let (shard, mut events) = start_shard(&gateway);

    let mut conn = gateway.accept().await.unwrap();
    assert_eq!(conn.query.get("v").map(String::as_str), Some("10"));
    assert_eq!(conn.query.get("encoding").map(String::as_str), Some("json"));

    let identify = conn.handshake(QUIET_HEARTBEAT_MS).await.unwrap();
    let identify = identify.as_identify().expect("expected identify");
    assert_eq!(identify.token, TOKEN);
    assert_eq!(identify.shard, [0, 1]);
    assert_eq!(identify.large_threshold, 250);

    conn.send(&ready(1, "session-1", None)).unwrap();
    let ready_event = next_dispatch(&mut events, "READY").await.unwrap();
    assert_eq!(ready_event.sequence, Some(1));
    assert_eq!(ready_event.data["user"]["username"], "tether");

    wait_for_status(&shard, ShardStatus::Connected).await.unwrap();
    assert_eq!(shard.session_id().as_deref(), Some("session-1"));

    conn.send(&message_create(2, "hi")).unwrap();
    let message = next_dispatch(&mut events, "MESSAGE_CREATE").await.unwrap();
    assert_eq!(message.data["content"], "hi");
    assert_eq!(shard.sequence(), Some(2));

    shard.stop();
    assert_eq!(conn.recv_close().await.unwrap(), None);
    let last = next_event(&mut events).await.unwrap();
    assert_eq!(last.kind, ShardEventKind::Stopped);
    assert_eq!(shard.status(), ShardStatus::Disconnected);
}

#[tokio::test]
async fn test_stale_sequence_is_not_recorded() {
    let mut gateway = MockGateway::start().await.unwrap();
    let (shard, mut events) = start_shard(&gateway);

    let mut conn = gateway.accept().await.unwrap();
    conn.handshake(QUIET_HEARTBEAT_MS).await.unwrap();
    conn.send(&ready(1, "session-1", None)).unwrap();
    conn.send(&message_create(5, "new")).unwrap();
    conn.send(&message_create(3, "old")).unwrap();

    next_dispatch(&mut events, "READY").await.unwrap();
    next_dispatch(&mut events, "MESSAGE_CREATE").await.unwrap();
    let stale = next_dispatch(&mut events, "MESSAGE_CREATE").await.unwrap();

    // Delivered, but the sequence does not move backwards
    assert_eq!(stale.sequence, Some(3));
    assert_eq!(shard.sequence(), Some(5));

    shard.stop();
}

#[tokio::test]
async fn test_malformed_frames_are_dropped() {
    let mut gateway = MockGateway::start().await.unwrap();
    let (shard, mut events) = start_shard(&gateway);

    let mut conn = gateway.accept().await.unwrap();
    conn.handshake(QUIET_HEARTBEAT_MS).await.unwrap();
    // Neither frame decodes; the connection must survive both
    conn.send_raw("not json").unwrap();
    conn.send_raw(r#"{"op":42,"d":null}"#).unwrap();
    conn.send(&ready(1, "session-1", None)).unwrap();

    next_dispatch(&mut events, "READY").await.unwrap();
    wait_for_status(&shard, ShardStatus::Connected).await.unwrap();

    shard.stop();
}

// ============================================================================
// Heartbeats
// ============================================================================

#[tokio::test]
async fn test_heartbeats_carry_last_sequence() {
    let mut gateway = MockGateway::start().await.unwrap();
    let (shard, mut events) = start_shard(&gateway);

    let mut conn = gateway.accept().await.unwrap();
    conn.handshake(100).await.unwrap();
    conn.send(&ready(1, "session-1", None)).unwrap();
    conn.send(&message_create(4, "hi")).unwrap();
    next_dispatch(&mut events, "MESSAGE_CREATE").await.unwrap();

    // Heartbeats sent before the dispatch landed may still carry an older value
    let mut seq = conn.recv_heartbeat().await.unwrap();
    while seq != Some(4) {
        conn.send(&GatewayMessage::heartbeat_ack()).unwrap();
        seq = conn.recv_heartbeat().await.unwrap();
    }
    conn.send(&GatewayMessage::heartbeat_ack()).unwrap();

    // A server-requested heartbeat is answered right away
    conn.send(&GatewayMessage::heartbeat(None)).unwrap();
    assert_eq!(conn.recv_heartbeat().await.unwrap(), Some(4));

    shard.stop();
}

#[tokio::test]
async fn test_unacknowledged_heartbeat_reconnects() {
    let mut gateway = MockGateway::start().await.unwrap();
    let (shard, mut events) = start_shard(&gateway);

    let mut conn = gateway.accept().await.unwrap();
    conn.handshake(100).await.unwrap();
    conn.send(&ready(1, "session-1", Some(&gateway.url()))).unwrap();
    next_dispatch(&mut events, "READY").await.unwrap();

    // Never acknowledge; the second beat finds the first still pending
    assert_eq!(conn.recv_close().await.unwrap(), Some(4000));

    let mut conn = gateway.accept().await.unwrap();
    let resume = conn.handshake(QUIET_HEARTBEAT_MS).await.unwrap();
    let resume = resume.as_resume().expect("expected resume");
    assert_eq!(resume.session_id, "session-1");
    assert_eq!(resume.seq, 1);

    shard.stop();
}

#[tokio::test]
async fn test_zero_heartbeat_interval_reconnects() {
    let mut gateway = MockGateway::start().await.unwrap();
    let (shard, mut events) = start_shard(&gateway);

    let mut conn = gateway.accept().await.unwrap();
    conn.send(&GatewayMessage::hello(0)).unwrap();
    assert_eq!(conn.recv_close().await.unwrap(), Some(4000));

    // The next hello is usable and the shard carries on
    let mut conn = gateway.accept().await.unwrap();
    let identify = conn.handshake(100).await.unwrap();
    assert_eq!(identify.op, OpCode::Identify);
    assert!(conn.recv_heartbeat().await.is_ok());

    conn.send(&ready(1, "session-1", None)).unwrap();
    next_dispatch(&mut events, "READY").await.unwrap();

    shard.stop();
}

// ============================================================================
// Reconnects
// ============================================================================

#[tokio::test]
async fn test_reconnect_request_resumes_session() {
    let mut gateway = MockGateway::start().await.unwrap();
    let (shard, mut events) = start_shard(&gateway);

    let mut conn = gateway.accept().await.unwrap();
    conn.handshake(QUIET_HEARTBEAT_MS).await.unwrap();
    conn.send(&ready(1, "session-1", Some(&gateway.url()))).unwrap();
    conn.send(&message_create(2, "hi")).unwrap();
    next_dispatch(&mut events, "MESSAGE_CREATE").await.unwrap();

    conn.send(&GatewayMessage::reconnect()).unwrap();
    assert_eq!(conn.recv_close().await.unwrap(), Some(4000));

    let mut conn = gateway.accept().await.unwrap();
    let resume = conn.handshake(QUIET_HEARTBEAT_MS).await.unwrap();
    let resume = resume.as_resume().expect("expected resume");
    assert_eq!(resume.token, TOKEN);
    assert_eq!(resume.session_id, "session-1");
    assert_eq!(resume.seq, 2);

    conn.send(&message_create(3, "missed")).unwrap();
    conn.send(&resumed(4)).unwrap();
    let missed = next_dispatch(&mut events, "MESSAGE_CREATE").await.unwrap();
    assert_eq!(missed.data["content"], "missed");
    next_dispatch(&mut events, "RESUMED").await.unwrap();

    wait_for_status(&shard, ShardStatus::Connected).await.unwrap();
    assert_eq!(shard.sequence(), Some(4));

    shard.stop();
}

#[tokio::test]
async fn test_invalid_session_forces_identify() {
    let mut gateway = MockGateway::start().await.unwrap();
    let (shard, mut events) = start_shard(&gateway);

    let mut conn = gateway.accept().await.unwrap();
    conn.handshake(QUIET_HEARTBEAT_MS).await.unwrap();
    conn.send(&ready(1, "session-1", Some(&gateway.url()))).unwrap();
    next_dispatch(&mut events, "READY").await.unwrap();

    conn.send(&GatewayMessage::invalid_session(false)).unwrap();
    conn.recv_close().await.unwrap();

    let mut conn = gateway.accept().await.unwrap();
    let frame = conn.handshake(QUIET_HEARTBEAT_MS).await.unwrap();
    assert_eq!(frame.op, OpCode::Identify);

    conn.send(&ready(1, "session-2", None)).unwrap();
    next_dispatch(&mut events, "READY").await.unwrap();
    assert_eq!(shard.session_id().as_deref(), Some("session-2"));

    shard.stop();
}

#[tokio::test]
async fn test_session_timeout_close_forces_identify() {
    let mut gateway = MockGateway::start().await.unwrap();
    let (shard, mut events) = start_shard(&gateway);

    let mut conn = gateway.accept().await.unwrap();
    conn.handshake(QUIET_HEARTBEAT_MS).await.unwrap();
    conn.send(&ready(1, "session-1", Some(&gateway.url()))).unwrap();
    next_dispatch(&mut events, "READY").await.unwrap();

    conn.close(u16::from(CloseCode::SessionTimeout)).unwrap();

    let mut conn = gateway.accept().await.unwrap();
    let frame = conn.handshake(QUIET_HEARTBEAT_MS).await.unwrap();
    assert_eq!(frame.op, OpCode::Identify);

    shard.stop();
}

#[tokio::test]
async fn test_recoverable_close_keeps_session() {
    let mut gateway = MockGateway::start().await.unwrap();
    let (shard, mut events) = start_shard(&gateway);

    let mut conn = gateway.accept().await.unwrap();
    conn.handshake(QUIET_HEARTBEAT_MS).await.unwrap();
    conn.send(&ready(7, "session-1", Some(&gateway.url()))).unwrap();
    next_dispatch(&mut events, "READY").await.unwrap();

    conn.close(u16::from(CloseCode::UnknownError)).unwrap();

    let mut conn = gateway.accept().await.unwrap();
    let resume = conn.handshake(QUIET_HEARTBEAT_MS).await.unwrap();
    assert_eq!(resume.as_resume().map(|resume| resume.seq), Some(7));

    shard.stop();
}

// ============================================================================
// Fatal closes
// ============================================================================

#[tokio::test]
async fn test_invalid_shard_close_is_fatal() {
    let mut gateway = MockGateway::start().await.unwrap();
    let (shard, mut events) = start_shard(&gateway);

    let mut conn = gateway.accept().await.unwrap();
    conn.handshake(QUIET_HEARTBEAT_MS).await.unwrap();
    conn.close(u16::from(CloseCode::InvalidShard)).unwrap();

    let event = next_event(&mut events).await.unwrap();
    assert_eq!(
        event.kind,
        ShardEventKind::Fatal(GatewayError::Fatal(CloseCode::InvalidShard))
    );
    assert!(event.is_terminal());
    assert!(next_event(&mut events).await.is_err());

    gateway
        .expect_no_connection(Duration::from_millis(300))
        .await
        .unwrap();
    assert_eq!(shard.status(), ShardStatus::Disconnected);
}

#[tokio::test]
async fn test_authentication_failure_is_fatal() {
    let mut gateway = MockGateway::start().await.unwrap();
    let (_shard, mut events) = start_shard(&gateway);

    let mut conn = gateway.accept().await.unwrap();
    conn.handshake(QUIET_HEARTBEAT_MS).await.unwrap();
    conn.close(4004).unwrap();

    let event = next_event(&mut events).await.unwrap();
    let ShardEventKind::Fatal(error) = event.kind else {
        panic!("expected a fatal event, got {:?}", event.kind);
    };
    assert_eq!(error.close_code(), Some(CloseCode::AuthenticationFailed));
}

// ============================================================================
// Outbound commands
// ============================================================================

#[tokio::test]
async fn test_commands_reach_the_gateway() {
    let mut gateway = MockGateway::start().await.unwrap();
    let (shard, mut events) = start_shard(&gateway);

    let mut conn = gateway.accept().await.unwrap();
    conn.handshake(QUIET_HEARTBEAT_MS).await.unwrap();
    conn.send(&ready(1, "session-1", None)).unwrap();
    next_dispatch(&mut events, "READY").await.unwrap();

    let presence = PresenceUpdatePayload::new("idle").with_activity(json!({
        "name": "the tide",
        "type": 3,
    }));
    shard.update_presence(&presence).await.unwrap();
    let frame = conn.recv_frame().await.unwrap();
    assert_eq!(frame.op, OpCode::PresenceUpdate);
    assert_eq!(frame.d["status"], "idle");

    let guild = Snowflake::new(197_038_439_483_310_086);
    shard
        .join_voice_channel(guild, Snowflake::new(197_038_439_483_310_087))
        .await
        .unwrap();
    let frame = conn.recv_frame().await.unwrap();
    assert_eq!(frame.op, OpCode::VoiceStateUpdate);
    assert_eq!(frame.d["channel_id"], "197038439483310087");

    shard.leave_voice_channel(guild).await.unwrap();
    let frame = conn.recv_frame().await.unwrap();
    assert!(frame.d["channel_id"].is_null());

    shard.request_guild_members(guild).await.unwrap();
    let frame = conn.recv_frame().await.unwrap();
    assert_eq!(frame.op, OpCode::RequestGuildMembers);
    assert_eq!(frame.d["guild_id"], "197038439483310086");

    shard.stop();
    assert!(matches!(
        conn.recv().await.unwrap(),
        ClientFrame::Closed(None)
    ));
}

// ============================================================================
// Shard manager
// ============================================================================

#[tokio::test]
async fn test_identifies_are_spaced_across_shards() {
    let mut gateway = MockGateway::start().await.unwrap();
    let manager = ShardManager::new(TOKEN, gateway.url(), gateway_config());
    let mut events = manager.start(2).unwrap();

    let mut first = gateway.accept().await.unwrap();
    let mut second = gateway.accept().await.unwrap();
    first
        .send(&GatewayMessage::hello(QUIET_HEARTBEAT_MS))
        .unwrap();
    second
        .send(&GatewayMessage::hello(QUIET_HEARTBEAT_MS))
        .unwrap();

    let (a, b) = tokio::join!(
        async {
            let frame = first.recv_frame().await.unwrap();
            (frame, Instant::now())
        },
        async {
            let frame = second.recv_frame().await.unwrap();
            (frame, Instant::now())
        }
    );

    let mut shards: Vec<[u32; 2]> = [&a.0, &b.0]
        .iter()
        .map(|frame| frame.as_identify().expect("expected identify").shard)
        .collect();
    shards.sort_unstable();
    assert_eq!(shards, vec![[0, 2], [1, 2]]);

    let gap = if a.1 > b.1 { a.1 - b.1 } else { b.1 - a.1 };
    assert!(gap >= Duration::from_millis(150), "identifies {gap:?} apart");

    assert_eq!(manager.statuses().len(), 2);
    manager.stop().await;

    let mut stopped = 0;
    while let Some(event) = events.recv().await {
        if event.kind == ShardEventKind::Stopped {
            stopped += 1;
        }
    }
    assert_eq!(stopped, 2);
}

#[tokio::test]
async fn test_stop_does_not_wait_for_an_idle_consumer() {
    let mut gateway = MockGateway::start().await.unwrap();
    let config = tether_common::GatewayConfig {
        event_buffer: 1,
        ..gateway_config()
    };
    let manager = ShardManager::new(TOKEN, gateway.url(), config);
    let mut events = manager.start(1).unwrap();
    let shard = manager.shard(0).unwrap();

    let mut conn = gateway.accept().await.unwrap();
    conn.handshake(QUIET_HEARTBEAT_MS).await.unwrap();
    conn.send(&ready(1, "session-1", None)).unwrap();
    conn.send(&message_create(2, "one")).unwrap();
    conn.send(&message_create(3, "two")).unwrap();

    // READY fills the buffer; the shard is now stuck delivering seq 2
    wait_until("the second dispatch", || shard.sequence() == Some(2))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    within("the manager to stop", manager.stop()).await.unwrap();
    assert_eq!(conn.recv_close().await.unwrap(), None);
    assert_eq!(shard.status(), ShardStatus::Disconnected);

    let first = next_event(&mut events).await.unwrap();
    assert!(matches!(first.kind, ShardEventKind::Dispatch(ref dispatch) if dispatch.name == "READY"));
    while within("the stream to end", events.recv())
        .await
        .unwrap()
        .is_some()
    {}
}
