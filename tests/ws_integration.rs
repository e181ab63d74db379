//! End-to-end tests for the trading streaming engine against a local
//! WebSocket server.

use std::collections::HashSet;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use polymarket_sdk::auth::ApiCreds;
use polymarket_sdk::error::SdkError;
use polymarket_sdk::ws::{Channel, ConnectionState, WsClient, WsConfig};

struct ServerConn {
    out: mpsc::UnboundedSender<String>,
    kill: CancellationToken,
}

struct MockServer {
    url: String,
    frames: mpsc::UnboundedReceiver<serde_json::Value>,
    conns: mpsc::UnboundedReceiver<ServerConn>,
}

/// Accepts any number of connections; parsed JSON frames from every
/// connection funnel into one channel, PINGs are answered with PONG.
async fn spawn_server() -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (frames_tx, frames) = mpsc::unbounded_channel();
    let (conns_tx, conns) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(ws) = accept_async(stream).await else {
                continue;
            };
            let (mut sink, mut source) = ws.split();
            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
            let kill = CancellationToken::new();
            let token = kill.clone();
            let frames_tx = frames_tx.clone();
            if conns_tx.send(ServerConn { out: out_tx, kill }).is_err() {
                return;
            }
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        msg = source.next() => match msg {
                            Some(Ok(Message::Text(text))) => {
                                if text == "PING" {
                                    let _ = sink.send(Message::Text("PONG".into())).await;
                                    continue;
                                }
                                if let Ok(value) = serde_json::from_str(&text) {
                                    let _ = frames_tx.send(value);
                                }
                            }
                            Some(Ok(_)) => {}
                            _ => return,
                        },
                        out = out_rx.recv() => match out {
                            Some(text) => {
                                let _ = sink.send(Message::Text(text.into())).await;
                            }
                            None => return,
                        },
                    }
                }
            });
        }
    });

    MockServer {
        url: format!("ws://{addr}"),
        frames,
        conns,
    }
}

async fn next_conn(server: &mut MockServer) -> ServerConn {
    tokio::time::timeout(Duration::from_secs(5), server.conns.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("server accept loop ended")
}

async fn next_frame(server: &mut MockServer) -> serde_json::Value {
    tokio::time::timeout(Duration::from_secs(5), server.frames.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("server accept loop ended")
}

async fn assert_no_frame(server: &mut MockServer, window_ms: u64) {
    let result = tokio::time::timeout(Duration::from_millis(window_ms), server.frames.recv()).await;
    assert!(result.is_err(), "unexpected frame: {:?}", result.unwrap());
}

fn quiet_config() -> WsConfig {
    WsConfig {
        disable_ping: true,
        reconnect: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_refcounted_subscribe_and_unsubscribe() {
    let mut server = spawn_server().await;
    let client = WsClient::connect_with_config(&server.url, quiet_config())
        .await
        .unwrap();
    let _conn = next_conn(&mut server).await;

    let mut first = client.subscribe_orderbook(vec!["A".into()]).await.unwrap();
    let frame = next_frame(&mut server).await;
    assert_eq!(frame["type"], "market");
    assert_eq!(frame["operation"], "subscribe");
    assert_eq!(frame["asset_ids"][0], "A");
    assert_eq!(frame["initial_dump"], true);

    // Second subscriber to the same asset: no wire frame.
    let mut second = client.subscribe_orderbook(vec!["A".into()]).await.unwrap();
    assert_no_frame(&mut server, 300).await;

    // First close: the asset is still referenced, no wire unsubscribe.
    first.close().await;
    assert_no_frame(&mut server, 300).await;

    // Last close: exactly one wire unsubscribe.
    second.close().await;
    let frame = next_frame(&mut server).await;
    assert_eq!(frame["type"], "market");
    assert_eq!(frame["operation"], "unsubscribe");
    assert_eq!(frame["asset_ids"][0], "A");
    assert_no_frame(&mut server, 200).await;
}

#[tokio::test]
async fn test_user_subscribe_requires_credentials() {
    let mut server = spawn_server().await;
    let client = WsClient::connect_with_config(&server.url, quiet_config())
        .await
        .unwrap();
    let _market_conn = next_conn(&mut server).await;

    let err = client.subscribe_user_orders(vec!["m1".into()]).await;
    assert!(matches!(err, Err(SdkError::Validation(_))));

    client.authenticate(ApiCreds::new("k", "s", "p"));
    let _orders = client.subscribe_user_orders(vec!["m1".into()]).await.unwrap();
    let _user_conn = next_conn(&mut server).await;
    let frame = next_frame(&mut server).await;
    assert_eq!(frame["type"], "subscribe");
    assert_eq!(frame["operation"], "subscribe");
    assert_eq!(frame["markets"][0], "m1");
    assert_eq!(frame["auth"]["api_key"], "k");
    assert_eq!(frame["auth"]["secret"], "s");
    assert_eq!(frame["auth"]["passphrase"], "p");
}

#[tokio::test]
async fn test_midpoint_synthesized_from_book_frame() {
    let mut server = spawn_server().await;
    let client = WsClient::connect_with_config(&server.url, quiet_config())
        .await
        .unwrap();
    let conn = next_conn(&mut server).await;

    let mut midpoints = client.subscribe_midpoints(vec!["A".into()]).await.unwrap();
    let _ = next_frame(&mut server).await;

    conn.out
        .send(
            r#"{"event_type":"book","asset_id":"A",
                "bids":[{"price":"0.5","size":"10"}],
                "asks":[{"price":"0.6","size":"4"}]}"#
                .to_string(),
        )
        .unwrap();

    let mid = tokio::time::timeout(Duration::from_secs(5), midpoints.recv())
        .await
        .expect("timed out waiting for midpoint")
        .expect("stream closed");
    assert_eq!(mid.asset_id, "A");
    assert_eq!(mid.midpoint, "0.55");
}

#[tokio::test]
async fn test_reconnect_replays_membership() {
    let mut server = spawn_server().await;
    let config = WsConfig {
        disable_ping: true,
        reconnect: true,
        reconnect_delay: Duration::from_millis(50),
        reconnect_max: 5,
        ..Default::default()
    };
    let client = WsClient::connect_with_config(&server.url, config)
        .await
        .unwrap();
    let conn = next_conn(&mut server).await;

    let _books = client.subscribe_orderbook(vec!["A".into()]).await.unwrap();
    let _ = next_frame(&mut server).await;
    let _prices = client.subscribe_prices(vec!["B".into()]).await.unwrap();
    let _ = next_frame(&mut server).await;

    // Drop the server side; the client must reconnect and replay the whole
    // membership in a single subscribe frame.
    conn.kill.cancel();

    let _conn2 = next_conn(&mut server).await;
    let frame = next_frame(&mut server).await;
    assert_eq!(frame["type"], "market");
    assert_eq!(frame["operation"], "subscribe");
    let ids: HashSet<String> = frame["asset_ids"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    let expected: HashSet<String> = ["A", "B"].iter().map(|s| s.to_string()).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_connection_state_snapshot_and_transitions() {
    let mut server = spawn_server().await;
    let client = WsClient::connect_with_config(&server.url, quiet_config())
        .await
        .unwrap();
    let _conn = next_conn(&mut server).await;

    let mut states = client.connection_state_stream();
    let market = states.recv().await.unwrap();
    assert_eq!(market.channel, Channel::Market);
    assert_eq!(market.state, ConnectionState::Connected);
    let user = states.recv().await.unwrap();
    assert_eq!(user.channel, Channel::User);
    assert_eq!(user.state, ConnectionState::Disconnected);
    assert_eq!(
        client.connection_state(Channel::Market),
        ConnectionState::Connected
    );
}

#[tokio::test]
async fn test_close_unsubscribes_and_terminates_streams() {
    let mut server = spawn_server().await;
    let client = WsClient::connect_with_config(&server.url, quiet_config())
        .await
        .unwrap();
    let _conn = next_conn(&mut server).await;

    let mut books = client.subscribe_orderbook(vec!["A".into()]).await.unwrap();
    let _ = next_frame(&mut server).await;

    client.close().await;

    // Best-effort unsubscribe on the way down.
    let frame = next_frame(&mut server).await;
    assert_eq!(frame["operation"], "unsubscribe");

    // Subscriber queue closes exactly once.
    let ended = tokio::time::timeout(Duration::from_secs(5), books.recv())
        .await
        .expect("timed out waiting for stream end");
    assert!(ended.is_none());

    // Further subscribes fail on the closed engine.
    assert!(client.subscribe_orderbook(vec!["B".into()]).await.is_err());

    // Idempotent.
    client.close().await;
}

#[tokio::test]
async fn test_with_auth_does_not_mutate_original() {
    let mut server = spawn_server().await;
    let client = WsClient::connect_with_config(&server.url, quiet_config())
        .await
        .unwrap();
    let _conn = next_conn(&mut server).await;

    let authed = client.with_auth(ApiCreds::new("k2", "s2", "p2"));

    // The original still has no credentials.
    let err = client.subscribe_user_orders(vec!["m1".into()]).await;
    assert!(matches!(err, Err(SdkError::Validation(_))));

    // The new view is authenticated and dials its own user connection.
    let _orders = authed.subscribe_user_orders(vec!["m1".into()]).await.unwrap();
    let _user_conn = next_conn(&mut server).await;
    let frame = next_frame(&mut server).await;
    assert_eq!(frame["auth"]["api_key"], "k2");
}

#[tokio::test]
async fn test_engine_level_subscribe_dedupes_against_streams() {
    let mut server = spawn_server().await;
    let client = WsClient::connect_with_config(&server.url, quiet_config())
        .await
        .unwrap();
    let _conn = next_conn(&mut server).await;

    let _books = client.subscribe_orderbook(vec!["A".into()]).await.unwrap();
    let _ = next_frame(&mut server).await;

    // Engine-level subscribe for the same asset is a refcount bump only.
    client
        .subscribe(polymarket_sdk::ws::SubscribeRequest::market(vec!["A".into()]))
        .await
        .unwrap();
    assert_no_frame(&mut server, 300).await;

    // First engine-level unsubscribe drops the extra reference silently; the
    // stream still holds the asset.
    client
        .unsubscribe_market_assets(vec!["A".into()])
        .await
        .unwrap();
    assert_no_frame(&mut server, 300).await;
}
