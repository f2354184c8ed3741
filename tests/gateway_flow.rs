//! End-to-end tests against a live server: WebSocket flow plus REST views.

#![allow(clippy::panic, clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use chatdesk_gateway::api;
use chatdesk_gateway::app_state::AppState;
use chatdesk_gateway::auth::StaticAuthorizer;
use chatdesk_gateway::config::GatewayConfig;
use chatdesk_gateway::domain::EventBus;
use chatdesk_gateway::persistence::MemoryStore;
use chatdesk_gateway::service::ChatGateway;
use chatdesk_gateway::ws::handler::ws_handler;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server() -> SocketAddr {
    let config = GatewayConfig::default();
    let authorizer = StaticAuthorizer::parse("alice:a-token:customer,bob:b-token:agent")
        .unwrap_or_else(|e| panic!("auth table: {e}"));
    let gateway = Arc::new(ChatGateway::new(
        &config,
        Arc::new(MemoryStore::new()),
        Arc::new(authorizer),
        EventBus::new(config.event_bus_capacity),
    ));

    let app = Router::new()
        .merge(api::build_router())
        .route("/ws", get(ws_handler))
        .with_state(AppState::new(gateway));

    let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
        panic!("bind failed");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("no local addr");
    };
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

async fn open(addr: SocketAddr) -> Client {
    let Ok((ws, _)) = connect_async(format!("ws://{addr}/ws")).await else {
        panic!("ws connect failed");
    };
    ws
}

async fn send(ws: &mut Client, frame: Value) {
    let Ok(()) = ws.send(WsMessage::Text(frame.to_string().into())).await else {
        panic!("ws send failed");
    };
}

/// Reads frames until one satisfies `pred`, skipping unrelated events.
async fn recv_until(ws: &mut Client, pred: impl Fn(&Value) -> bool) -> Value {
    let fut = async {
        while let Some(frame) = ws.next().await {
            let Ok(WsMessage::Text(text)) = frame else {
                continue;
            };
            let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
                panic!("server sent invalid json: {text}");
            };
            if pred(&value) {
                return value;
            }
        }
        panic!("socket closed before expected event");
    };
    let Ok(value) = tokio::time::timeout(Duration::from_secs(5), fut).await else {
        panic!("timed out waiting for event");
    };
    value
}

fn of_type(kind: &'static str) -> impl Fn(&Value) -> bool {
    move |v| v["type"] == kind
}

async fn connect_as(addr: SocketAddr, user: &str, token: &str) -> Client {
    let mut ws = open(addr).await;
    send(
        &mut ws,
        json!({"type": "connect", "user_id": user, "auth_token": token}),
    )
    .await;
    let connected = recv_until(&mut ws, of_type("connected")).await;
    assert_eq!(connected["user_id"], user);
    ws
}

async fn get_json(url: String) -> (u16, Value) {
    let Ok(resp) = reqwest::get(url).await else {
        panic!("http request failed");
    };
    let status = resp.status().as_u16();
    let Ok(body) = resp.json::<Value>().await else {
        panic!("response is not json");
    };
    (status, body)
}

#[tokio::test]
async fn events_before_connect_are_rejected() {
    let addr = spawn_server().await;
    let mut ws = open(addr).await;

    send(&mut ws, json!({"type": "ping"})).await;
    let err = recv_until(&mut ws, of_type("error")).await;
    assert_eq!(err["code"], "unauthenticated");

    send(
        &mut ws,
        json!({"type": "connect", "user_id": "alice", "auth_token": "wrong"}),
    )
    .await;
    let err = recv_until(&mut ws, of_type("error")).await;
    assert_eq!(err["code"], "unauthenticated");
}

#[tokio::test]
async fn malformed_frame_keeps_connection_open() {
    let addr = spawn_server().await;
    let mut ws = connect_as(addr, "alice", "a-token").await;

    send(&mut ws, json!({"type": "teleport"})).await;
    let err = recv_until(&mut ws, of_type("error")).await;
    assert_eq!(err["code"], "invalid_payload");

    send(&mut ws, json!({"type": "ping"})).await;
    recv_until(&mut ws, of_type("pong")).await;
}

#[tokio::test]
async fn support_ticket_flow_over_websocket_and_rest() {
    let addr = spawn_server().await;
    let mut alice = connect_as(addr, "alice", "a-token").await;
    let mut bob = connect_as(addr, "bob", "b-token").await;

    send(&mut bob, json!({"type": "subscribe_queue"})).await;
    let snapshot = recv_until(&mut bob, of_type("queue_snapshot")).await;
    assert_eq!(snapshot["tickets"], json!([]));

    send(
        &mut alice,
        json!({"type": "request_support", "body": "My order is late", "priority": "high"}),
    )
    .await;
    let created = recv_until(&mut alice, of_type("ticket_created")).await;
    let ticket_id = created["ticket"]["ticket_id"].as_str().unwrap().to_string();
    let room_id = created["ticket"]["room_id"].as_str().unwrap().to_string();
    assert_eq!(created["ticket"]["status"], "open");

    let queued = recv_until(&mut bob, of_type("ticket_created")).await;
    assert_eq!(queued["ticket"]["ticket_id"], ticket_id.as_str());

    send(
        &mut bob,
        json!({"type": "assign_ticket", "ticket_id": ticket_id, "agent_id": "bob"}),
    )
    .await;
    let opened = recv_until(&mut bob, of_type("room_opened")).await;
    assert_eq!(opened["room"]["room_id"], room_id.as_str());

    // the opening message is visible to the agent through replay
    send(&mut bob, json!({"type": "replay", "room_id": room_id, "since": 0})).await;
    let history = recv_until(&mut bob, of_type("history")).await;
    let bodies: Vec<&str> = history["messages"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["body"].as_str())
        .collect();
    assert!(bodies.contains(&"My order is late"));

    send(
        &mut bob,
        json!({"type": "send_message", "room_id": room_id, "body": "Looking into it"}),
    )
    .await;
    let reply = recv_until(&mut alice, |v| {
        v["type"] == "message" && v["body"] == "Looking into it"
    })
    .await;
    assert_eq!(reply["sender_user_id"], "bob");

    recv_until(&mut alice, |v| {
        v["type"] == "ticket_status_changed" && v["new_status"] == "in_progress"
    })
    .await;

    let (status, ticket) = get_json(format!("http://{addr}/api/v1/tickets/{ticket_id}")).await;
    assert_eq!(status, 200);
    assert_eq!(ticket["status"], "in_progress");
    assert_eq!(ticket["assigned_agent_id"], "bob");

    let (status, list) = get_json(format!("http://{addr}/api/v1/tickets?status=in_progress")).await;
    assert_eq!(status, 200);
    assert_eq!(list["pagination"]["total"], 1);

    let (status, stats) = get_json(format!("http://{addr}/api/v1/tickets/stats")).await;
    assert_eq!(status, 200);
    assert_eq!(stats["total"], 1);

    let (status, export) =
        get_json(format!("http://{addr}/api/v1/tickets/{ticket_id}/history")).await;
    assert_eq!(status, 200);
    let ids: Vec<u64> = export["messages"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["message_id"].as_u64())
        .collect();
    assert!(ids.windows(2).all(|w| w[1] == w[0] + 1), "gapless: {ids:?}");

    let (status, page) = get_json(format!(
        "http://{addr}/api/v1/rooms/{room_id}/messages?since=0&limit=1"
    ))
    .await;
    assert_eq!(status, 200);
    assert_eq!(page["messages"].as_array().map(Vec::len), Some(1));
    assert_eq!(page["next_message_id"], 1);
}

#[tokio::test]
async fn rest_reports_missing_resources() {
    let addr = spawn_server().await;

    let (status, body) = get_json(format!("http://{addr}/api/v1/tickets/{}", uuid::Uuid::new_v4())).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "ticket_not_found");

    let (status, body) =
        get_json(format!("http://{addr}/api/v1/rooms/{}/messages", uuid::Uuid::new_v4())).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "room_not_found");

    let (status, health) = get_json(format!("http://{addr}/health")).await;
    assert_eq!(status, 200);
    assert_eq!(health["status"], "healthy");
}
