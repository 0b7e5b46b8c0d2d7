//! Client integration tests
//!
//! Bootstrap through the mock API, then connect to the mock gateway.
//!
//! Run with: cargo test -p integration-tests --test client_tests

use integration_tests::{
    client_config, message_create, next_dispatch, ready, wait_until, within, MockGateway,
    MockRest, QUIET_HEARTBEAT_MS, TOKEN,
};
use serde_json::json;
use tether_client::{ApiRequest, Client, ClientError, GatewayMessage, ShardEventKind, TrafficClass};
use tether_gateway::OpCode;

#[tokio::test]
async fn test_client_bootstraps_and_connects() {
    let mut gateway = MockGateway::start().await.unwrap();
    let rest = MockRest::start(gateway.url(), 1).await.unwrap();
    let client = Client::new(client_config(&rest.base_url())).unwrap();

    client.connect().await.unwrap();
    assert_eq!(rest.calls_to("/gateway/bot").len(), 1);
    let mut events = client.events().expect("event stream");

    let mut conn = gateway.accept().await.unwrap();
    let identify = conn.handshake(QUIET_HEARTBEAT_MS).await.unwrap();
    assert_eq!(identify.as_identify().unwrap().token, TOKEN);

    conn.send(&ready(1, "session-1", None)).unwrap();
    next_dispatch(&mut events, "READY").await.unwrap();

    // REST keeps working alongside the gateway
    let user = client
        .request(ApiRequest::get("/users/@me"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user["id"], "80351110224678912");

    client
        .send_gateway_frame(
            0,
            &GatewayMessage::request_guild_members(
                &tether_gateway::protocol::RequestGuildMembersPayload::all(
                    tether_client::Snowflake::new(197_038_439_483_310_086),
                ),
            ),
            TrafficClass::General,
        )
        .await
        .unwrap();
    assert_eq!(
        conn.recv_frame().await.unwrap().op,
        OpCode::RequestGuildMembers
    );

    client.shutdown().await;
    conn.recv_close().await.unwrap();

    let mut stopped = false;
    while let Some(event) = events.recv().await {
        stopped |= event.kind == ShardEventKind::Stopped;
    }
    assert!(stopped);
    assert!(matches!(client.shard(0), Err(ClientError::NotConnected)));
}

#[tokio::test]
async fn test_shutdown_with_untaken_event_stream() {
    let mut gateway = MockGateway::start().await.unwrap();
    let rest = MockRest::start(gateway.url(), 1).await.unwrap();
    let mut config = client_config(&rest.base_url());
    config.gateway.event_buffer = 1;
    let client = Client::new(config).unwrap();

    client.connect().await.unwrap();
    let mut conn = gateway.accept().await.unwrap();
    conn.handshake(QUIET_HEARTBEAT_MS).await.unwrap();
    conn.send(&ready(1, "session-1", None)).unwrap();
    conn.send(&message_create(2, "one")).unwrap();
    conn.send(&message_create(3, "two")).unwrap();

    let shard = client.shard(0).unwrap();
    wait_until("the second dispatch", || shard.sequence() == Some(2))
        .await
        .unwrap();

    within("the client to shut down", client.shutdown())
        .await
        .unwrap();
    conn.recv_close().await.unwrap();
    assert!(client.events().is_none());
}

#[tokio::test]
async fn test_configured_shard_count_overrides_bootstrap() {
    let mut gateway = MockGateway::start().await.unwrap();
    let rest = MockRest::start(gateway.url(), 1).await.unwrap();
    let mut config = client_config(&rest.base_url());
    config.gateway.shard_count = Some(2);
    let client = Client::new(config).unwrap();

    client.connect().await.unwrap();
    assert_eq!(rest.calls_to("/gateway/bot").len(), 1);

    let mut shards = Vec::new();
    for _ in 0..2 {
        let mut conn = gateway.accept().await.unwrap();
        let identify = conn.handshake(QUIET_HEARTBEAT_MS).await.unwrap();
        shards.push(identify.as_identify().unwrap().shard);
    }
    shards.sort_unstable();
    assert_eq!(shards, vec![[0, 2], [1, 2]]);

    client.shutdown().await;
}

#[tokio::test]
async fn test_configured_gateway_skips_bootstrap() {
    let mut gateway = MockGateway::start().await.unwrap();
    let rest = MockRest::start("ws://127.0.0.1:9", 1).await.unwrap();
    let mut config = client_config(&rest.base_url());
    config.gateway.url = Some(gateway.url());
    config.gateway.shard_count = Some(1);
    let client = Client::new(config).unwrap();

    client.connect().await.unwrap();
    assert!(rest.calls_to("/gateway/bot").is_empty());

    let mut conn = gateway.accept().await.unwrap();
    conn.handshake(QUIET_HEARTBEAT_MS).await.unwrap();

    client.shutdown().await;
}

#[tokio::test]
async fn test_rejected_token_fails_connect() {
    let rest = MockRest::start("ws://127.0.0.1:9", 1).await.unwrap();
    let mut config = client_config(&rest.base_url());
    config.token = "wrong".to_string();
    let client = Client::new(config).unwrap();

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, ClientError::Request(_)));
    assert_eq!(err.code(), "CLIENT_ERROR");

    let err = client
        .request(ApiRequest::post(
            "/channels/41771983423143937/messages",
            json!({ "content": "hello" }),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Request(_)));
}
