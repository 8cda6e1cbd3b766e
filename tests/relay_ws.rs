mod common;

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use peermesh::{health, MeshError, Orchestrator, OrchestratorOptions};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use url::Url;

type RelaySocket = WebSocketStream<TcpStream>;

/// Local relay on an ephemeral port. `handler` gets every accepted socket
/// together with its connection index.
async fn relay<H, Fut>(handler: H) -> Url
where
    H: Fn(RelaySocket, usize) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut index = 0;
        while let Ok((tcp, _)) = listener.accept().await {
            let Ok(ws) = accept_async(tcp).await else {
                continue;
            };
            tokio::spawn(handler(ws, index));
            index += 1;
        }
    });
    Url::parse(&format!("ws://{addr}")).unwrap()
}

async fn next_json(ws: &mut RelaySocket) -> Option<Value> {
    while let Some(Ok(msg)) = ws.next().await {
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).ok();
        }
    }
    None
}

async fn reply(ws: &mut RelaySocket, name: &str, data: Value) {
    let text = json!({"name": name, "data": data}).to_string();
    ws.send(Message::Text(text)).await.unwrap();
}

async fn answer_status(mut ws: RelaySocket, pong: Option<&'static str>) {
    while let Some(msg) = next_json(&mut ws).await {
        if msg["name"] == "status" {
            let ping = msg["data"]["ping"].clone();
            let pong = pong.map(Value::from).unwrap_or(ping);
            reply(&mut ws, "status", json!({"pong": pong, "info": "1 room"})).await;
        }
    }
}

#[tokio::test]
async fn status_check_round_trips_through_relay() {
    let url = relay(|ws, _| answer_status(ws, None)).await;
    let status = health::check_status(url, Duration::from_secs(5)).await.unwrap();
    assert!(status.ok);
    assert!(!status.pong.is_empty());
    assert_eq!(status.info, Some(json!("1 room")));
}

#[tokio::test]
async fn status_check_rejects_foreign_pong() {
    let url = relay(|ws, _| answer_status(ws, Some("not-my-ping"))).await;
    let err = health::check_status(url, Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, MeshError::SignalingUnreachable(_)));
}

#[tokio::test]
async fn status_check_fails_when_nothing_listens() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let url = Url::parse(&format!("ws://{addr}")).unwrap();
    let err = health::check_status(url, Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, MeshError::SignalingUnreachable(_)));
}

#[tokio::test]
async fn orchestrator_joins_room_and_opens_sessions() {
    let url = relay(|mut ws, _| async move {
        while let Some(msg) = next_json(&mut ws).await {
            if msg["name"] == "join" && msg["data"]["room"] == "lobby" {
                reply(&mut ws, "joined", json!({"room": "lobby", "peers": ["remote-1"]})).await;
            }
        }
    })
    .await;

    let (_, factory, _, transports) = common::mock_parts();
    let (orch, events) = Orchestrator::connect(
        OrchestratorOptions::new("lobby"),
        url,
        Duration::from_millis(50),
        factory,
    )
    .unwrap();
    let handle = orch.spawn(events);

    let mut status = Vec::new();
    for _ in 0..100 {
        status = handle.status().await.unwrap();
        if !status.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].remote_id, "remote-1");
    assert!(status[0].initiator);
    assert_eq!(transports.created_for("remote-1").len(), 1);
    handle.close().await;
}

#[tokio::test]
async fn dropped_relay_connection_rejoins() {
    let joins = Arc::new(AtomicUsize::new(0));
    let seen = joins.clone();
    let url = relay(move |mut ws, index| {
        let seen = seen.clone();
        async move {
            while let Some(msg) = next_json(&mut ws).await {
                if msg["name"] == "join" {
                    seen.fetch_add(1, Ordering::SeqCst);
                    if index == 0 {
                        let _ = ws.close(None).await;
                        return;
                    }
                }
            }
        }
    })
    .await;

    let (_, factory, _, _) = common::mock_parts();
    let (orch, events) = Orchestrator::connect(
        OrchestratorOptions::new("lobby"),
        url,
        Duration::from_millis(50),
        factory,
    )
    .unwrap();
    let handle = orch.spawn(events);

    for _ in 0..100 {
        if joins.load(Ordering::SeqCst) >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(joins.load(Ordering::SeqCst) >= 2);
    handle.close().await;
}
