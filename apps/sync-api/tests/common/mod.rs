use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use sync_api::config::Config;
use sync_api::AppState;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build a test AppState with the given heartbeat interval.
pub fn test_state(heartbeat_interval_ms: u64) -> AppState {
    AppState::new(Config {
        port: 0,
        heartbeat_interval_ms,
    })
}

/// Start an actual TCP server for WebSocket testing. Returns (addr, state).
/// The server runs in the background.
pub async fn start_ws_server(heartbeat_interval_ms: u64) -> (SocketAddr, AppState) {
    let state = test_state(heartbeat_interval_ms);
    let app = sync_api::routes::router().with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

/// Open a WebSocket against the gateway route.
pub async fn connect(addr: SocketAddr) -> WsClient {
    let url = format!("ws://{addr}/gateway");
    let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");
    ws_stream
}

/// Send a JSON text frame.
pub async fn send_json(ws: &mut WsClient, value: &Value) {
    ws.send(tungstenite::Message::Text(value.to_string().into()))
        .await
        .expect("ws send");
}

/// Read the next text frame as JSON, with a timeout.
pub async fn recv_json(ws: &mut WsClient) -> Value {
    let msg = time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timeout waiting for frame")
        .expect("stream ended")
        .expect("ws read error");
    let text = msg.into_text().expect("not text");
    serde_json::from_str(&text).expect("parse frame")
}

/// Connect and IDENTIFY, asserting the `session:ready` dispatch. Returns
/// the stream and the ready payload (`d`).
pub async fn connect_and_identify(
    addr: SocketAddr,
    user_id: &str,
    display_name: &str,
) -> (WsClient, Value) {
    let mut ws = connect(addr).await;

    send_json(
        &mut ws,
        &serde_json::json!({
            "op": 2,
            "d": { "userId": user_id, "displayName": display_name }
        }),
    )
    .await;

    let ready = recv_json(&mut ws).await;
    assert_eq!(ready["op"], 0, "ready should be op=0 (DISPATCH)");
    assert_eq!(ready["t"], "session:ready");
    assert!(ready["s"].as_u64().unwrap() > 0);

    let d = ready["d"].clone();
    (ws, d)
}

/// Send a COMMAND frame (op=3) with a nonce.
pub async fn send_command(ws: &mut WsClient, name: &str, nonce: u64, d: Value) {
    send_json(
        ws,
        &serde_json::json!({ "op": 3, "t": name, "s": nonce, "d": d }),
    )
    .await;
}

/// Create a room over an identified connection and consume the ack plus the
/// creator's `room:joined` snapshot. Returns the room id.
pub async fn create_room(ws: &mut WsClient, video_url: &str, video_hash: &str) -> String {
    send_command(
        ws,
        "room:create",
        1,
        serde_json::json!({ "videoUrl": video_url, "videoHash": video_hash }),
    )
    .await;

    let ack = recv_json(ws).await;
    assert_eq!(ack["op"], 4);
    assert_eq!(ack["d"]["success"], true);
    let room_id = ack["d"]["roomId"].as_str().expect("room id").to_string();

    let joined = recv_json(ws).await;
    assert_eq!(joined["t"], "room:joined");
    assert_eq!(joined["d"]["roomId"], room_id.as_str());

    room_id
}

/// Join a room over an identified connection and consume the ack plus the
/// joiner's `room:joined` snapshot, which is returned.
pub async fn join_room(ws: &mut WsClient, room_id: &str) -> Value {
    send_command(ws, "room:join", 2, serde_json::json!({ "roomId": room_id })).await;

    let ack = recv_json(ws).await;
    assert_eq!(ack["op"], 4);
    assert_eq!(ack["d"]["success"], true);

    let joined = recv_json(ws).await;
    assert_eq!(joined["t"], "room:joined");
    assert_eq!(joined["d"]["roomId"], room_id);

    joined["d"].clone()
}

/// Assert the next frame is a Close with the given application code.
pub async fn expect_close_code(ws: &mut WsClient, code: u16) {
    let msg = time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timeout waiting for close")
        .expect("stream ended")
        .expect("ws read error");

    match msg {
        tungstenite::Message::Close(Some(frame)) => {
            assert_eq!(
                frame.code,
                tungstenite::protocol::frame::coding::CloseCode::from(code)
            );
        }
        other => panic!("Expected Close frame, got: {other:?}"),
    }
}
