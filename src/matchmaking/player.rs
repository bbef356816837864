//! Connected players and the process-wide session registry

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use uuid::Uuid;

use crate::game::physics::Side;
use crate::game::snapshot::GameFrame;
use crate::notify::Notification;

/// Opaque 32-byte player identity, rendered as hex
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId([u8; 32]);

impl PlayerId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First eight hex chars, for default nicknames
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlayerId({})", self.short())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlayerIdError {
    #[error("player id is not valid hex")]
    InvalidHex,

    #[error("player id must be 32 bytes, got {0}")]
    InvalidLength(usize),
}

impl FromStr for PlayerId {
    type Err = PlayerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|_| PlayerIdError::InvalidHex)?;
        let len = bytes.len();
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| PlayerIdError::InvalidLength(len))?;
        Ok(Self(bytes))
    }
}

impl Serialize for PlayerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PlayerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Seat in a match; player one plays the left paddle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum PlayerNumber {
    One,
    Two,
}

impl PlayerNumber {
    pub fn side(self) -> Side {
        match self {
            PlayerNumber::One => Side::Left,
            PlayerNumber::Two => Side::Right,
        }
    }

    pub fn from_side(side: Side) -> Self {
        match side {
            Side::Left => PlayerNumber::One,
            Side::Right => PlayerNumber::Two,
        }
    }
}

impl From<PlayerNumber> for u8 {
    fn from(number: PlayerNumber) -> u8 {
        match number {
            PlayerNumber::One => 1,
            PlayerNumber::Two => 2,
        }
    }
}

impl TryFrom<u8> for PlayerNumber {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PlayerNumber::One),
            2 => Ok(PlayerNumber::Two),
            other => Err(format!("invalid player number {other}")),
        }
    }
}

/// Public view of a player for room listings and notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub nick: String,
    pub bet_amount: i64,
    pub ready: bool,
    pub player_number: Option<PlayerNumber>,
}

#[derive(Debug)]
struct PlayerState {
    nick: String,
    bet_amount: i64,
    player_number: Option<PlayerNumber>,
    score: u32,
    ready: bool,
    waiting_room: Option<Uuid>,
    game_stream: Option<mpsc::Sender<GameFrame>>,
    notifier: Option<mpsc::Sender<Notification>>,
}

/// A connected participant
#[derive(Debug)]
pub struct Player {
    id: PlayerId,
    connected_at: DateTime<Utc>,
    state: RwLock<PlayerState>,
}

impl Player {
    pub fn new(id: PlayerId, nick: impl Into<String>) -> Self {
        Self {
            id,
            connected_at: Utc::now(),
            state: RwLock::new(PlayerState {
                nick: nick.into(),
                bet_amount: 0,
                player_number: None,
                score: 0,
                ready: false,
                waiting_room: None,
                game_stream: None,
                notifier: None,
            }),
        }
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn nick(&self) -> String {
        self.state.read().nick.clone()
    }

    pub fn set_nick(&self, nick: impl Into<String>) {
        self.state.write().nick = nick.into();
    }

    pub fn bet_amount(&self) -> i64 {
        self.state.read().bet_amount
    }

    pub fn set_bet_amount(&self, amount: i64) {
        self.state.write().bet_amount = amount;
    }

    pub fn player_number(&self) -> Option<PlayerNumber> {
        self.state.read().player_number
    }

    pub fn set_player_number(&self, number: Option<PlayerNumber>) {
        self.state.write().player_number = number;
    }

    pub fn score(&self) -> u32 {
        self.state.read().score
    }

    /// Mirror of the match score, kept for lobby views
    pub fn set_score(&self, score: u32) {
        self.state.write().score = score;
    }

    pub fn is_ready(&self) -> bool {
        self.state.read().ready
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.write().ready = ready;
    }

    pub fn waiting_room(&self) -> Option<Uuid> {
        self.state.read().waiting_room
    }

    pub fn set_waiting_room(&self, room: Option<Uuid>) {
        self.state.write().waiting_room = room;
    }

    /// Attach the frame stream, replacing any previous one
    pub fn attach_game_stream(&self, stream: mpsc::Sender<GameFrame>) {
        self.state.write().game_stream = Some(stream);
    }

    /// Attach the notification stream, replacing any previous one
    pub fn attach_notifier(&self, notifier: mpsc::Sender<Notification>) {
        self.state.write().notifier = Some(notifier);
    }

    pub fn has_game_stream(&self) -> bool {
        self.state.read().game_stream.is_some()
    }

    /// Push a frame without waiting; a full stream drops the frame, a closed one is detached
    pub fn send_frame(&self, frame: &GameFrame) -> bool {
        let result = match self.state.read().game_stream.as_ref() {
            Some(stream) => stream.try_send(frame.clone()),
            None => return false,
        };
        match result {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(player_id = %self.id, "Game stream full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.state.write().game_stream = None;
                false
            }
        }
    }

    /// Deliver a notification to this player's stream, if one is attached
    pub fn notify(&self, notification: Notification) -> bool {
        let result = match self.state.read().notifier.as_ref() {
            Some(notifier) => notifier.try_send(notification),
            None => return false,
        };
        match result {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(player_id = %self.id, "Notification stream full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.state.write().notifier = None;
                false
            }
        }
    }

    /// Clear per-match fields once a match is over; the connection's streams stay attached
    pub fn reset_for_next_match(&self) {
        let mut state = self.state.write();
        state.score = 0;
        state.bet_amount = 0;
        state.ready = false;
        state.player_number = None;
    }

    /// Clear everything, dropping stream handles (used on disconnect)
    pub fn reset(&self) {
        let mut state = self.state.write();
        state.score = 0;
        state.bet_amount = 0;
        state.ready = false;
        state.player_number = None;
        state.waiting_room = None;
        state.game_stream = None;
        state.notifier = None;
    }

    pub fn info(&self) -> PlayerInfo {
        let state = self.state.read();
        PlayerInfo {
            id: self.id,
            nick: state.nick.clone(),
            bet_amount: state.bet_amount,
            ready: state.ready,
            player_number: state.player_number,
        }
    }
}

/// Registry of connected players keyed by identity
#[derive(Default)]
pub struct PlayerSessions {
    players: DashMap<PlayerId, Arc<Player>>,
}

impl PlayerSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the player for `id`, creating it on first sight
    pub fn get_or_create(&self, id: PlayerId, nick: &str) -> Arc<Player> {
        self.players
            .entry(id)
            .or_insert_with(|| {
                let nick = if nick.is_empty() {
                    format!("Player_{}", id.short())
                } else {
                    nick.to_string()
                };
                Arc::new(Player::new(id, nick))
            })
            .value()
            .clone()
    }

    pub fn get(&self, id: &PlayerId) -> Option<Arc<Player>> {
        self.players.get(id).map(|p| p.value().clone())
    }

    pub fn remove(&self, id: &PlayerId) -> Option<Arc<Player>> {
        self.players.remove(id).map(|(_, p)| p)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn all(&self) -> Vec<Arc<Player>> {
        self.players.iter().map(|p| p.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_id_hex_round_trip() {
        let id = PlayerId::new([0xab; 32]);
        let text = id.to_string();
        assert_eq!(text.len(), 64);
        assert_eq!(text.parse::<PlayerId>(), Ok(id));
        assert_eq!(id.short(), "abababab");
    }

    #[test]
    fn test_player_id_rejects_bad_input() {
        assert_eq!("zz".parse::<PlayerId>(), Err(PlayerIdError::InvalidHex));
        assert_eq!("abcd".parse::<PlayerId>(), Err(PlayerIdError::InvalidLength(2)));
    }

    #[test]
    fn test_player_number_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&PlayerNumber::Two).unwrap(), "2");
        let parsed: PlayerNumber = serde_json::from_str("1").unwrap();
        assert_eq!(parsed, PlayerNumber::One);
        assert!(serde_json::from_str::<PlayerNumber>("0").is_err());
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let sessions = PlayerSessions::new();
        let id = PlayerId::new([1; 32]);

        let first = sessions.get_or_create(id, "alice");
        let second = sessions.get_or_create(id, "someone else");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.nick(), "alice");
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn test_default_nick_from_id() {
        let sessions = PlayerSessions::new();
        let player = sessions.get_or_create(PlayerId::new([0x0f; 32]), "");
        assert_eq!(player.nick(), "Player_0f0f0f0f");
    }

    #[test]
    fn test_reset_clears_match_fields_and_streams() {
        let player = Player::new(PlayerId::new([2; 32]), "bob");
        let (tx, _rx) = mpsc::channel(4);
        player.attach_game_stream(tx);
        player.set_bet_amount(10);
        player.set_ready(true);
        player.set_score(2);
        player.set_player_number(Some(PlayerNumber::One));

        player.reset_for_next_match();
        assert_eq!(player.score(), 0);
        assert_eq!(player.bet_amount(), 0);
        assert!(!player.is_ready());
        assert!(player.has_game_stream());

        player.reset();
        assert!(!player.has_game_stream());
    }

    #[test]
    fn test_send_frame_detaches_closed_stream() {
        use crate::game::physics::{PhysicsConfig, PhysicsEngine};

        let player = Player::new(PlayerId::new([3; 32]), "carol");
        let frame = GameFrame::capture(Uuid::nil(), &PhysicsEngine::new(PhysicsConfig::default(), 1));
        assert!(!player.send_frame(&frame));

        let (tx, rx) = mpsc::channel(4);
        player.attach_game_stream(tx);
        assert!(player.send_frame(&frame));

        drop(rx);
        assert!(!player.send_frame(&frame));
        assert!(!player.has_game_stream());
    }
}
