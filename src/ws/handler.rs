//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::game::physics::PaddleCommand;
use crate::matchmaking::player::PlayerId;
use crate::matchmaking::GameManager;
use crate::util::rate_limit::PlayerRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Buffered notifications per connection
const NOTIFICATION_BUFFER: usize = 64;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Hex-encoded 32-byte player identity
    pub player_id: String,
    #[serde(default)]
    pub nick: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    match query.player_id.parse::<PlayerId>() {
        Ok(player_id) => {
            info!(player_id = %player_id, "WebSocket upgrade");
            let nick = query.nick.unwrap_or_default();
            ws.on_upgrade(move |socket| handle_socket(socket, player_id, nick, state))
        }
        Err(e) => {
            warn!(error = %e, "Rejected WebSocket upgrade");
            (StatusCode::BAD_REQUEST, format!("invalid player_id: {e}")).into_response()
        }
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, player_id: PlayerId, nick: String, state: AppState) {
    let manager = state.manager.clone();
    let player = manager.connect(player_id, &nick);

    let (mut ws_sink, mut ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        player_id,
        nick: player.nick(),
        server_time: unix_millis(),
        tick_rate: state.config.game.tick_rate,
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(player_id = %player_id, error = %e, "Failed to send welcome");
        manager.disconnect(&player_id);
        return;
    }

    // Streams the core pushes into; the writer task drains them to the socket
    let (frames_tx, mut frames_rx) = mpsc::channel(state.config.game.frame_buffer);
    let (notify_tx, mut notify_rx) = mpsc::channel(NOTIFICATION_BUFFER);
    let (reply_tx, mut reply_rx) = mpsc::channel::<ServerMsg>(NOTIFICATION_BUFFER);

    if let Err(e) = manager.attach_streams(&player_id, frames_tx, notify_tx) {
        error!(player_id = %player_id, error = %e, "Failed to attach streams");
        return;
    }

    let writer = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                Some(reply) = reply_rx.recv() => reply,
                Some(notification) = notify_rx.recv() => ServerMsg::Notification { notification },
                Some(frame) = frames_rx.recv() => ServerMsg::Frame { frame },
                else => break,
            };
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(player_id = %player_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    let rate_limiter = PlayerRateLimiter::new();

    // Reader loop: WebSocket -> game manager
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(player_id = %player_id, "Rate limited input message");
                    continue;
                }

                let reply = match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => handle_client_msg(&manager, &player_id, msg),
                    Err(e) => {
                        warn!(player_id = %player_id, error = %e, "Failed to parse client message");
                        Some(ServerMsg::error("bad_request", e.to_string()))
                    }
                };

                if let Some(reply) = reply {
                    if reply_tx.send(reply).await.is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(player_id = %player_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(player_id = %player_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(player_id = %player_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Exactly one disconnect per connection
    manager.disconnect(&player_id);
    writer.abort();

    info!(player_id = %player_id, "WebSocket connection closed");
}

/// Apply one client request; returns the direct reply, if any
pub(crate) fn handle_client_msg(
    manager: &Arc<GameManager>,
    player_id: &PlayerId,
    msg: ClientMsg,
) -> Option<ServerMsg> {
    let result = match msg {
        ClientMsg::CreateRoom { bet_amount } => manager
            .create_waiting_room(player_id, bet_amount)
            .map(|room| ServerMsg::ack_room("create_room", room)),
        ClientMsg::JoinRoom { room_id } => manager
            .join_waiting_room(&room_id, player_id)
            .map(|room| ServerMsg::ack_room("join_room", room)),
        ClientMsg::LeaveRoom { room_id } => manager
            .leave_waiting_room(&room_id, player_id)
            .map(|_| ServerMsg::ack("leave_room")),
        ClientMsg::Ready { ready } => manager
            .set_ready(player_id, ready)
            .map(|_| ServerMsg::ack("ready")),
        ClientMsg::SetBet { amount } => manager
            .set_bet_amount(player_id, amount)
            .map(|_| ServerMsg::ack("set_bet")),
        ClientMsg::Input { command } => {
            // Unknown commands are dropped without a reply
            let Ok(command) = command.parse::<PaddleCommand>() else {
                return None;
            };
            return manager
                .handle_input(player_id, command)
                .err()
                .map(ServerMsg::from);
        }
        ClientMsg::ListRooms => Ok(ServerMsg::Rooms {
            rooms: manager.list_rooms(),
        }),
        ClientMsg::Ping { t } => Ok(ServerMsg::Pong {
            t,
            server_time: unix_millis(),
        }),
    };

    Some(result.unwrap_or_else(ServerMsg::from))
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameSettings;
    use crate::matchmaking::ledger::{atoms, InMemoryLedger};
    use crate::notify::NotificationHub;

    fn manager_with_ledger() -> (Arc<GameManager>, Arc<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::new());
        let manager = Arc::new(GameManager::new(
            GameSettings::default(),
            ledger.clone(),
            NotificationHub::new(),
        ));
        (manager, ledger)
    }

    #[tokio::test]
    async fn test_create_room_replies_with_ack() {
        let (manager, ledger) = manager_with_ledger();
        let id = PlayerId::new([4; 32]);
        manager.connect(id, "dana");
        ledger.reserve(id, atoms(0.5));

        let reply = handle_client_msg(&manager, &id, ClientMsg::CreateRoom { bet_amount: atoms(0.5) });
        match reply {
            Some(ServerMsg::Ack { action, room: Some(room) }) => {
                assert_eq!(action, "create_room");
                assert_eq!(room.bet_amount, atoms(0.5));
            }
            other => panic!("unexpected reply {other:?}"),
        }

        let reply = handle_client_msg(&manager, &id, ClientMsg::ListRooms);
        assert!(matches!(reply, Some(ServerMsg::Rooms { rooms }) if rooms.len() == 1));
        manager.shutdown();
    }

    #[tokio::test]
    async fn test_failed_action_reports_reason() {
        let (manager, _ledger) = manager_with_ledger();
        let id = PlayerId::new([4; 32]);
        manager.connect(id, "dana");

        let reply = handle_client_msg(&manager, &id, ClientMsg::CreateRoom { bet_amount: atoms(1.0) });
        match reply {
            Some(ServerMsg::Error { code, message }) => {
                assert_eq!(code, "invalid_state");
                assert!(message.contains("bet amount mismatch"));
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_set_bet_lets_client_open_room() {
        let (manager, _ledger) = manager_with_ledger();
        let id = PlayerId::new([6; 32]);
        manager.connect(id, "ezra");

        let reply = handle_client_msg(&manager, &id, ClientMsg::SetBet { amount: atoms(0.5) });
        assert!(matches!(reply, Some(ServerMsg::Ack { ref action, .. }) if action == "set_bet"));

        let reply = handle_client_msg(&manager, &id, ClientMsg::CreateRoom { bet_amount: atoms(0.5) });
        assert!(matches!(reply, Some(ServerMsg::Ack { room: Some(_), .. })), "unexpected reply {reply:?}");
        manager.shutdown();
    }

    #[test]
    fn test_input_outside_match() {
        let (manager, _ledger) = manager_with_ledger();
        let id = PlayerId::new([4; 32]);
        manager.connect(id, "dana");

        let unknown = handle_client_msg(&manager, &id, ClientMsg::Input { command: "jump".into() });
        assert!(unknown.is_none());

        let reply = handle_client_msg(&manager, &id, ClientMsg::Input { command: "move_up".into() });
        assert!(matches!(reply, Some(ServerMsg::Error { code, .. }) if code == "not_found"));
    }

    #[test]
    fn test_ping_echoes_timestamp() {
        let (manager, _ledger) = manager_with_ledger();
        let id = PlayerId::new([4; 32]);
        let reply = handle_client_msg(&manager, &id, ClientMsg::Ping { t: 42 });
        assert!(matches!(reply, Some(ServerMsg::Pong { t: 42, .. })));
    }
}
