use super::*;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use serde_json::{json, Value};
use shared::{domain::GroupId, protocol::GroupEventKind};
use storage::Storage;
use tokio::{
    net::TcpListener,
    sync::{mpsc, Mutex},
};

use crate::registry::ServerConnectionRegistry;

#[test]
fn websocket_url_maps_scheme_and_path() {
    assert_eq!(
        websocket_url("https://chat.example.com").expect("url"),
        "wss://chat.example.com/api/v4/websocket"
    );
    assert_eq!(
        websocket_url("http://localhost:8065/").expect("url"),
        "ws://localhost:8065/api/v4/websocket"
    );
    assert!(websocket_url("ftp://chat.example.com").is_err());
}

#[test]
fn decode_frame_accepts_event_text_only() {
    let event = json!({
        "event": "received_group",
        "data": { "group": "{}" },
        "broadcast": {},
        "seq": 3
    })
    .to_string();
    let msg = decode_frame("https://a", Message::Text(event)).expect("event");
    assert_eq!(msg.event, "received_group");
    assert_eq!(msg.seq, 3);

    let reply = json!({ "status": "OK", "seq_reply": 1 }).to_string();
    assert!(decode_frame("https://a", Message::Text(reply)).is_none());
    assert!(decode_frame("https://a", Message::Binary(vec![1, 2, 3])).is_none());
    assert!(decode_frame("https://a", Message::Text("not json".into())).is_none());
}

#[derive(Clone)]
struct SocketState {
    challenges: mpsc::UnboundedSender<Value>,
    frames: Arc<Mutex<Vec<String>>>,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SocketState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(mut socket: WebSocket, state: SocketState) {
    if let Some(Ok(AxumMessage::Text(text))) = socket.recv().await {
        if let Ok(value) = serde_json::from_str::<Value>(&text) {
            let _ = state.challenges.send(value);
        }
    }
    let frames = state.frames.lock().await.clone();
    for frame in frames {
        if socket.send(AxumMessage::Text(frame)).await.is_err() {
            return;
        }
    }
    let _ = socket.send(AxumMessage::Close(None)).await;
}

#[tokio::test]
async fn listener_authenticates_and_applies_group_events() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let group = json!({ "id": "g1", "display_name": "Developers" }).to_string();
    let frames = vec![
        json!({ "status": "OK", "seq_reply": 1 }).to_string(),
        json!({
            "event": GroupEventKind::Updated.event_name(),
            "data": { "group": group },
            "broadcast": {},
            "seq": 1
        })
        .to_string(),
        json!({
            "event": GroupEventKind::AssociatedToTeam.event_name(),
            "data": { "group_id": "g1" },
            "broadcast": { "team_id": "team-1" },
            "seq": 2
        })
        .to_string(),
    ];

    let (challenge_tx, mut challenge_rx) = mpsc::unbounded_channel();
    let state = SocketState {
        challenges: challenge_tx,
        frames: Arc::new(Mutex::new(frames)),
    };
    let app = Router::new()
        .route("/api/v4/websocket", get(ws_handler))
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let server_url = format!("http://{addr}");

    let registry = ServerConnectionRegistry::new();
    let storage = Storage::new("sqlite::memory:").await.expect("storage");
    registry.register(&server_url, storage.clone()).await;
    let router = Arc::new(RealtimeGroupEventRouter::new(registry));

    let handle = spawn_group_event_listener(router, &server_url, "session-token")
        .await
        .expect("listener");
    let stats = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("listener finished")
        .expect("join");

    let challenge = challenge_rx.recv().await.expect("challenge");
    assert_eq!(challenge["action"], "authentication_challenge");
    assert_eq!(challenge["seq"], 1);
    assert_eq!(challenge["data"]["token"], "session-token");

    assert_eq!(stats.applied, 1);
    assert_eq!(stats.not_yet_handled, 1);
    assert_eq!(stats.dropped, 0);
    assert!(storage
        .group(&GroupId::from("g1"))
        .await
        .expect("group")
        .is_some());
}
