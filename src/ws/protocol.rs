//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::game::snapshot::GameFrame;
use crate::matchmaking::player::PlayerId;
use crate::matchmaking::room::RoomInfo;
use crate::notify::Notification;

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Open a waiting room staked at `bet_amount` atoms
    CreateRoom { bet_amount: i64 },

    JoinRoom { room_id: Uuid },

    LeaveRoom { room_id: Uuid },

    /// Toggle readiness in the current room
    Ready { ready: bool },

    /// Change the stake used for the next room
    SetBet { amount: i64 },

    /// Paddle command, e.g. `move_up` or `ArrowDownStop`
    Input { command: String },

    /// Request the current room list
    ListRooms,

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        player_id: PlayerId,
        nick: String,
        server_time: u64,
        tick_rate: u32,
    },

    Rooms { rooms: Vec<RoomInfo> },

    /// A client request succeeded
    Ack {
        action: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        room: Option<RoomInfo>,
    },

    /// A client request failed
    Error { code: String, message: String },

    /// One simulation tick of the current match
    Frame { frame: GameFrame },

    Notification { notification: Notification },

    Pong {
        /// Echo of client timestamp
        t: u64,
        server_time: u64,
    },
}

impl ServerMsg {
    pub fn ack(action: &str) -> Self {
        ServerMsg::Ack {
            action: action.to_string(),
            room: None,
        }
    }

    pub fn ack_room(action: &str, room: RoomInfo) -> Self {
        ServerMsg::Ack {
            action: action.to_string(),
            room: Some(room),
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMsg::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl From<EngineError> for ServerMsg {
    fn from(err: EngineError) -> Self {
        ServerMsg::error(err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_client_messages() {
        let msg: ClientMsg = serde_json::from_str(r#"{"type":"create_room","bet_amount":50000000}"#).unwrap();
        assert_eq!(msg, ClientMsg::CreateRoom { bet_amount: 50_000_000 });

        let msg: ClientMsg = serde_json::from_str(r#"{"type":"input","command":"ArrowUp"}"#).unwrap();
        assert_eq!(msg, ClientMsg::Input { command: "ArrowUp".to_string() });

        let msg: ClientMsg = serde_json::from_str(r#"{"type":"list_rooms"}"#).unwrap();
        assert_eq!(msg, ClientMsg::ListRooms);

        assert!(serde_json::from_str::<ClientMsg>(r#"{"type":"fly"}"#).is_err());
    }

    #[test]
    fn test_engine_error_to_wire() {
        let msg = ServerMsg::from(EngineError::invalid_state("bet amount mismatch"));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["code"], "invalid_state");
        assert_eq!(value["message"], "invalid state: bet amount mismatch");
    }

    #[test]
    fn test_notification_nests_under_server_tag() {
        let msg = ServerMsg::Notification {
            notification: Notification::RoomRemoved { room_id: Uuid::nil() },
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "notification");
        assert_eq!(value["notification"]["event"], "room_removed");
    }

    #[test]
    fn test_ack_omits_missing_room() {
        let value = serde_json::to_value(ServerMsg::ack("ready")).unwrap();
        assert_eq!(value["action"], "ready");
        assert!(value.get("room").is_none());
    }
}
