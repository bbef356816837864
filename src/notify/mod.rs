//! Discrete event notifications and per-kind subscriber channels

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::game::instance::EndReason;
use crate::matchmaking::player::{PlayerId, PlayerInfo};
use crate::matchmaking::room::RoomInfo;

/// Capacity of each per-kind broadcast channel
const HUB_CAPACITY: usize = 256;

/// Every notification the engine emits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    RoomCreated {
        room: RoomInfo,
    },
    RoomRemoved {
        room_id: Uuid,
    },
    PlayerJoinedRoom {
        room_id: Uuid,
        player: PlayerInfo,
    },
    PlayerLeftRoom {
        room_id: Uuid,
        player_id: PlayerId,
    },
    PlayerReady {
        room_id: Uuid,
        player_id: PlayerId,
        ready: bool,
    },
    BetAmountChanged {
        player_id: PlayerId,
        bet_amount: i64,
    },
    MatchStarted {
        game_id: Uuid,
        players: Vec<PlayerInfo>,
        bet_amount: i64,
    },
    RoundScored {
        game_id: Uuid,
        winner: PlayerId,
        p1_score: u32,
        p2_score: u32,
    },
    MatchEnded {
        game_id: Uuid,
        players: Vec<PlayerId>,
        winner: Option<PlayerId>,
        p1_score: u32,
        p2_score: u32,
        bet_amount: i64,
        reason: EndReason,
    },
    PlayerDisconnected {
        player_id: PlayerId,
    },
}

/// Discriminant of [`Notification`], used to pick a subscriber list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    RoomCreated,
    RoomRemoved,
    PlayerJoinedRoom,
    PlayerLeftRoom,
    PlayerReady,
    BetAmountChanged,
    MatchStarted,
    RoundScored,
    MatchEnded,
    PlayerDisconnected,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 10] = [
        NotificationKind::RoomCreated,
        NotificationKind::RoomRemoved,
        NotificationKind::PlayerJoinedRoom,
        NotificationKind::PlayerLeftRoom,
        NotificationKind::PlayerReady,
        NotificationKind::BetAmountChanged,
        NotificationKind::MatchStarted,
        NotificationKind::RoundScored,
        NotificationKind::MatchEnded,
        NotificationKind::PlayerDisconnected,
    ];
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::RoomCreated { .. } => NotificationKind::RoomCreated,
            Notification::RoomRemoved { .. } => NotificationKind::RoomRemoved,
            Notification::PlayerJoinedRoom { .. } => NotificationKind::PlayerJoinedRoom,
            Notification::PlayerLeftRoom { .. } => NotificationKind::PlayerLeftRoom,
            Notification::PlayerReady { .. } => NotificationKind::PlayerReady,
            Notification::BetAmountChanged { .. } => NotificationKind::BetAmountChanged,
            Notification::MatchStarted { .. } => NotificationKind::MatchStarted,
            Notification::RoundScored { .. } => NotificationKind::RoundScored,
            Notification::MatchEnded { .. } => NotificationKind::MatchEnded,
            Notification::PlayerDisconnected { .. } => NotificationKind::PlayerDisconnected,
        }
    }
}

/// Fan-out point for collaborators (settlement, audit) that follow engine events by kind
#[derive(Clone)]
pub struct NotificationHub {
    channels: Arc<HashMap<NotificationKind, broadcast::Sender<Notification>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        let channels = NotificationKind::ALL
            .iter()
            .map(|kind| (*kind, broadcast::channel(HUB_CAPACITY).0))
            .collect();
        Self {
            channels: Arc::new(channels),
        }
    }

    /// Subscribe to one kind of notification
    pub fn subscribe(&self, kind: NotificationKind) -> broadcast::Receiver<Notification> {
        match self.channels.get(&kind) {
            Some(tx) => tx.subscribe(),
            // Every kind is registered in `new`
            None => broadcast::channel(1).1,
        }
    }

    /// Publish to the subscribers of the notification's kind; returns how many received it
    pub fn publish(&self, notification: Notification) -> usize {
        self.channels
            .get(&notification.kind())
            .and_then(|tx| tx.send(notification).ok())
            .unwrap_or(0)
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_only_see_their_kind() {
        let hub = NotificationHub::new();
        let mut removed = hub.subscribe(NotificationKind::RoomRemoved);
        let mut disconnected = hub.subscribe(NotificationKind::PlayerDisconnected);

        let room_id = Uuid::new_v4();
        assert_eq!(hub.publish(Notification::RoomRemoved { room_id }), 1);

        assert_eq!(removed.recv().await.unwrap(), Notification::RoomRemoved { room_id });
        assert!(disconnected.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = NotificationHub::new();
        let sent = hub.publish(Notification::PlayerDisconnected {
            player_id: PlayerId::new([1; 32]),
        });
        assert_eq!(sent, 0);
    }

    #[test]
    fn test_wire_tag() {
        let value = serde_json::to_value(Notification::RoomRemoved {
            room_id: Uuid::nil(),
        })
        .unwrap();
        assert_eq!(value["event"], "room_removed");
    }
}
