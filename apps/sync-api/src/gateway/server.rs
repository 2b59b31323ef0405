//! WebSocket upgrade handler and per-connection event loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time;

use reelsync_common::id;

use crate::error::CommandError;
use crate::rooms::{chat, control, presence, sync};
use crate::AppState;

use super::events::{
    ClientMessage, CommandName, ControlTargetPayload, CreateRoomPayload, EventName, GatewayMessage,
    HeartbeatPayload, IdentifyPayload, JoinRoomPayload, LeaveRoomPayload, SendMessagePayload,
    UpdateStatusPayload, UpdateVideoStatePayload, OP_COMMAND, OP_HEARTBEAT, OP_IDENTIFY,
};
use super::fanout::{BroadcastPayload, Target};
use super::session::GatewaySession;

/// Close codes (4000-range for application-level).
const CLOSE_UNKNOWN_ERROR: u16 = 4000;
const CLOSE_UNKNOWN_OPCODE: u16 = 4001;
const CLOSE_NOT_AUTHENTICATED: u16 = 4003;
const CLOSE_AUTH_FAILED: u16 = 4004;
const CLOSE_SESSION_TIMEOUT: u16 = 4009;

/// Timeout for receiving IDENTIFY after connection (seconds).
const IDENTIFY_TIMEOUT_SECS: u64 = 10;

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Step 1: Wait for IDENTIFY within timeout.
    let identify_result = time::timeout(Duration::from_secs(IDENTIFY_TIMEOUT_SECS), async {
        while let Some(msg) = ws_rx.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => {
                    tracing::debug!(?e, "ws read error during identify");
                    return Err("read error");
                }
            };

            let text = match msg {
                Message::Text(t) => t,
                Message::Close(_) => return Err("client closed"),
                Message::Ping(_) | Message::Pong(_) => continue,
                _ => continue,
            };

            let client_msg: ClientMessage = match serde_json::from_str(&text) {
                Ok(m) => m,
                Err(_) => {
                    let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Invalid JSON").await;
                    return Err("invalid json");
                }
            };

            if client_msg.op != OP_IDENTIFY {
                let _ = send_close(&mut ws_tx, CLOSE_NOT_AUTHENTICATED, "Expected IDENTIFY").await;
                return Err("expected identify");
            }

            let payload: IdentifyPayload =
                serde_json::from_value(client_msg.d).map_err(|_| "invalid identify payload")?;
            return Ok(payload);
        }
        Err("connection closed before identify")
    })
    .await;

    let payload = match identify_result {
        Ok(Ok(payload)) => payload,
        Ok(Err(reason)) => {
            tracing::debug!(%reason, "identify handshake failed");
            let _ = send_close(&mut ws_tx, CLOSE_AUTH_FAILED, reason).await;
            return;
        }
        Err(_timeout) => {
            let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Handshake timeout").await;
            return;
        }
    };

    if payload.user_id.is_empty() {
        let _ = send_close(&mut ws_tx, CLOSE_AUTH_FAILED, "Authentication error").await;
        return;
    }
    let display_name = payload
        .display_name
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "Anonymous".to_string());

    let session = Arc::new(GatewaySession::new(
        id::prefixed_ulid(id::prefix::CONNECTION),
        payload.user_id,
        display_name,
    ));

    tracing::info!(
        connection_id = %session.connection_id,
        user_id = %session.user_id,
        "gateway session established"
    );

    // Subscribe before session:ready goes out so nothing dispatched after
    // this point can be missed.
    let broadcast_rx = state.broadcast.subscribe();

    let ready = GatewayMessage::dispatch(
        EventName::READY,
        session.next_seq(),
        serde_json::json!({
            "connectionId": session.connection_id,
            "userId": session.user_id,
            "displayName": session.display_name,
            "heartbeatInterval": state.config.heartbeat_interval_ms,
        }),
    );
    let ready_json = serde_json::to_string(&ready).unwrap();
    if ws_tx.send(Message::Text(ready_json.into())).await.is_err() {
        return;
    }

    let member_of = run_session(&state, session.clone(), ws_tx, ws_rx, broadcast_rx).await;

    // Tear down whatever the connection was still part of. A stale backing
    // connection (the user rejoined elsewhere) makes this a no-op per room.
    for room_id in &member_of {
        let _ = presence::leave_room(&state, &session, room_id);
    }

    tracing::info!(
        connection_id = %session.connection_id,
        user_id = %session.user_id,
        "gateway session ended"
    );
}

/// The rooms a connection is attached to, as seen from its event loop.
///
/// `member_of` tracks registry membership and is updated the moment a
/// command completes, so disconnect teardown never misses a just-joined
/// room. `subscribed` gates which room dispatches are forwarded and is
/// committed only by this connection's own `room:joined` echo, so room
/// events queued from before the join can never leak through the filter.
#[derive(Default)]
struct SessionRooms {
    member_of: HashSet<String>,
    subscribed: HashSet<String>,
}

/// Main session event loop: read client messages, forward matching
/// broadcasts, enforce heartbeat. Returns the rooms the connection was
/// still a member of so the caller can tear them down.
async fn run_session(
    state: &AppState,
    session: Arc<GatewaySession>,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut ws_rx: SplitStream<WebSocket>,
    mut broadcast_rx: broadcast::Receiver<Arc<BroadcastPayload>>,
) -> HashSet<String> {
    let mut rooms = SessionRooms::default();

    // Heartbeat deadline: client must heartbeat within 1.5x the interval.
    let heartbeat_deadline = Duration::from_millis(state.config.heartbeat_interval_ms * 3 / 2);
    let mut heartbeat_timer = time::interval(heartbeat_deadline);
    heartbeat_timer.tick().await; // First tick fires immediately; skip it.
    let mut got_heartbeat = true;

    loop {
        tokio::select! {
            // Client sends us a message.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let client_msg: ClientMessage = match serde_json::from_str(&text) {
                            Ok(m) => m,
                            Err(_) => {
                                let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Invalid JSON").await;
                                break;
                            }
                        };

                        match client_msg.op {
                            OP_HEARTBEAT => {
                                got_heartbeat = true;
                                let payload: HeartbeatPayload =
                                    serde_json::from_value(client_msg.d).unwrap_or(HeartbeatPayload { seq: 0 });
                                let ack = GatewayMessage::heartbeat_ack(payload.seq);
                                let json = serde_json::to_string(&ack).unwrap();
                                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                            OP_COMMAND => {
                                if handle_command(state, &session, &mut rooms, &mut ws_tx, client_msg).await.is_err() {
                                    break;
                                }
                            }
                            OP_IDENTIFY => {
                                // Already identified.
                                let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Already identified").await;
                                break;
                            }
                            _ => {
                                let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_OPCODE, "Unknown opcode").await;
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %session.connection_id, "ws read error");
                        break;
                    }
                    _ => continue,
                }
            }

            // Broadcast event from the fanout hub.
            result = broadcast_rx.recv() => {
                match result {
                    Ok(payload) => {
                        if !payload.target.matches(&session.connection_id, &rooms.subscribed) {
                            continue;
                        }

                        // Our own `room:joined` commits the subscription,
                        // unless a leave already raced past the echo.
                        if payload.event_name == EventName::ROOM_JOINED {
                            if let Some(room_id) = payload.data.get("roomId").and_then(Value::as_str) {
                                if rooms.member_of.contains(room_id) {
                                    rooms.subscribed.insert(room_id.to_string());
                                }
                            }
                        }

                        let seq = session.next_seq();
                        let msg = GatewayMessage::dispatch(payload.event_name, seq, payload.data.clone());
                        let json = serde_json::to_string(&msg).unwrap();
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }

                        // This user's own departure (a kick, or another of
                        // their sessions leaving) ends the subscription once
                        // the event itself has been delivered.
                        if payload.event_name == EventName::PARTICIPANT_LEFT
                            && payload.data.as_str() == Some(session.user_id.as_str())
                        {
                            if let Target::Room { room_id, .. } = &payload.target {
                                rooms.member_of.remove(room_id);
                                rooms.subscribed.remove(room_id);
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(
                            connection_id = %session.connection_id,
                            skipped = n,
                            "gateway session lagged behind broadcast"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }

            // Heartbeat timeout check.
            _ = heartbeat_timer.tick() => {
                if !got_heartbeat {
                    tracing::debug!(
                        connection_id = %session.connection_id,
                        "heartbeat timeout, closing connection"
                    );
                    let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Heartbeat timeout").await;
                    break;
                }
                got_heartbeat = false;
            }
        }
    }

    rooms.member_of
}

/// Process one op=3 COMMAND frame. Returns `Err(())` only when the socket
/// write side has failed and the session loop should end.
async fn handle_command(
    state: &AppState,
    session: &GatewaySession,
    rooms: &mut SessionRooms,
    ws_tx: &mut SplitSink<WebSocket, Message>,
    msg: ClientMessage,
) -> Result<(), ()> {
    let ClientMessage { t, s: nonce, d, .. } = msg;
    let Some(command) = t.as_deref() else {
        tracing::debug!(connection_id = %session.connection_id, "command frame without a name");
        return Ok(());
    };

    match command {
        CommandName::CREATE_ROOM => {
            let Some(payload) = parse_payload::<CreateRoomPayload>(command, d) else {
                return send_invalid_payload_ack(ws_tx, nonce).await;
            };
            let room_id =
                presence::create_room(state, session, &payload.video_url, &payload.video_hash);
            rooms.member_of.insert(room_id.clone());
            send_ack(
                ws_tx,
                nonce,
                serde_json::json!({ "success": true, "roomId": room_id }),
            )
            .await
        }
        CommandName::JOIN_ROOM => {
            let Some(payload) = parse_payload::<JoinRoomPayload>(command, d) else {
                return send_invalid_payload_ack(ws_tx, nonce).await;
            };
            let data = match presence::join_room(state, session, &payload.room_id) {
                Ok(()) => {
                    rooms.member_of.insert(payload.room_id.clone());
                    serde_json::json!({ "success": true, "roomId": payload.room_id })
                }
                Err(err) => serde_json::json!({ "success": false, "error": err.message() }),
            };
            send_ack(ws_tx, nonce, data).await
        }
        CommandName::LEAVE_ROOM => {
            let Some(payload) = parse_payload::<LeaveRoomPayload>(command, d) else {
                return Ok(());
            };
            // Detach locally even when the registry side is stale.
            rooms.member_of.remove(&payload.room_id);
            rooms.subscribed.remove(&payload.room_id);
            if let Err(err) = presence::leave_room(state, session, &payload.room_id) {
                tracing::debug!(
                    connection_id = %session.connection_id,
                    error = err.message(),
                    "leave refused"
                );
            }
            Ok(())
        }
        CommandName::UPDATE_STATUS => {
            let Some(payload) = parse_payload::<UpdateStatusPayload>(command, d) else {
                return Ok(());
            };
            if let Err(err) =
                presence::update_status(state, session, &payload.room_id, payload.status)
            {
                tracing::debug!(
                    connection_id = %session.connection_id,
                    error = err.message(),
                    "status update refused"
                );
            }
            Ok(())
        }
        CommandName::UPDATE_VIDEO_STATE => {
            let Some(payload) = parse_payload::<UpdateVideoStatePayload>(command, d) else {
                return Ok(());
            };
            if let Err(err) = sync::update_state(state, session, &payload.room_id, payload.patch) {
                tracing::debug!(
                    connection_id = %session.connection_id,
                    error = err.message(),
                    "video update refused"
                );
            }
            Ok(())
        }
        CommandName::SEND_MESSAGE => {
            let Some(payload) = parse_payload::<SendMessagePayload>(command, d) else {
                return Ok(());
            };
            if let Err(err) = chat::send_message(state, session, &payload.room_id, &payload.text) {
                tracing::debug!(
                    connection_id = %session.connection_id,
                    error = err.message(),
                    "chat refused"
                );
            }
            Ok(())
        }
        CommandName::KICK => {
            let Some(payload) = parse_payload::<ControlTargetPayload>(command, d) else {
                return Ok(());
            };
            if let Err(err) =
                control::kick(state, session, &payload.room_id, &payload.participant_id)
            {
                tracing::debug!(
                    connection_id = %session.connection_id,
                    error = err.message(),
                    "kick refused"
                );
            }
            Ok(())
        }
        CommandName::MUTE => {
            let Some(payload) = parse_payload::<ControlTargetPayload>(command, d) else {
                return Ok(());
            };
            if let Err(err) =
                control::mute(state, session, &payload.room_id, &payload.participant_id)
            {
                tracing::debug!(
                    connection_id = %session.connection_id,
                    error = err.message(),
                    "mute refused"
                );
            }
            Ok(())
        }
        _ => {
            tracing::debug!(connection_id = %session.connection_id, %command, "unknown command");
            Ok(())
        }
    }
}

/// Deserialize a command payload, logging and dropping the frame on failure.
fn parse_payload<T: serde::de::DeserializeOwned>(command: &str, d: Value) -> Option<T> {
    match serde_json::from_value(d) {
        Ok(payload) => Some(payload),
        Err(err) => {
            tracing::debug!(%command, %err, "invalid command payload");
            None
        }
    }
}

/// Send an op=4 ACK frame. Returns `Err(())` when the socket write failed.
async fn send_ack(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    nonce: Option<u64>,
    data: Value,
) -> Result<(), ()> {
    let ack = GatewayMessage::ack(nonce, data);
    let json = serde_json::to_string(&ack).unwrap();
    ws_tx.send(Message::Text(json.into())).await.map_err(|_| ())
}

async fn send_invalid_payload_ack(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    nonce: Option<u64>,
) -> Result<(), ()> {
    send_ack(
        ws_tx,
        nonce,
        serde_json::json!({
            "success": false,
            "error": CommandError::InvalidPayload.message(),
        }),
    )
    .await
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(axum::extract::ws::CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
