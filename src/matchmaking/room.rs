//! Waiting rooms - pending matches gathered around a fixed stake

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::util::Lifetime;

use super::ledger::{self, ReservedWager};
use super::player::{Player, PlayerId, PlayerInfo};

/// Room listing entry sent to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: Uuid,
    pub host_id: PlayerId,
    pub bet_amount: i64,
    pub created_at: DateTime<Utc>,
    pub players: Vec<PlayerInfo>,
}

/// A pending match. Players are kept in join order.
#[derive(Debug)]
pub struct WaitingRoom {
    id: Uuid,
    host_id: PlayerId,
    bet_amount: i64,
    created_at: DateTime<Utc>,
    reserved_wager: Vec<ReservedWager>,
    players: RwLock<Vec<Arc<Player>>>,
    lifetime: Lifetime,
}

impl WaitingRoom {
    /// Open a room for `host`; the host's reserved wager must sum to the stake
    pub fn new(
        host: Arc<Player>,
        bet_amount: i64,
        reserved_wager: Vec<ReservedWager>,
    ) -> EngineResult<Self> {
        let reserved = ledger::total(&reserved_wager);
        if reserved != bet_amount {
            return Err(EngineError::invalid_state(format!(
                "bet amount mismatch: reserved {reserved}, requested {bet_amount}"
            )));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            host_id: host.id(),
            bet_amount,
            created_at: Utc::now(),
            reserved_wager,
            players: RwLock::new(vec![host]),
            lifetime: Lifetime::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn host_id(&self) -> PlayerId {
        self.host_id
    }

    pub fn bet_amount(&self) -> i64 {
        self.bet_amount
    }

    pub fn reserved_wager(&self) -> &[ReservedWager] {
        &self.reserved_wager
    }

    pub fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }

    /// Append a player; returns false if they were already present
    pub fn add_player(&self, player: Arc<Player>) -> bool {
        let mut players = self.players.write();
        if players.iter().any(|p| p.id() == player.id()) {
            return false;
        }
        players.push(player);
        true
    }

    /// Remove a player by identity
    pub fn remove_player(&self, id: &PlayerId) -> Option<Arc<Player>> {
        let mut players = self.players.write();
        let pos = players.iter().position(|p| &p.id() == id)?;
        Some(players.remove(pos))
    }

    pub fn contains(&self, id: &PlayerId) -> bool {
        self.players.read().iter().any(|p| &p.id() == id)
    }

    pub fn len(&self) -> usize {
        self.players.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.read().is_empty()
    }

    pub fn players(&self) -> Vec<Arc<Player>> {
        self.players.read().clone()
    }

    /// Take the first two players once everyone present is ready.
    ///
    /// Readiness is all-or-nothing: an unready third member blocks the pair.
    /// Anyone beyond the first two stays for the next check.
    pub fn ready_players(&self) -> Option<[Arc<Player>; 2]> {
        let mut players = self.players.write();
        if players.len() < 2 || !players.iter().all(|p| p.is_ready()) {
            return None;
        }

        let mut pair = players.drain(..2);
        let first = pair.next()?;
        let second = pair.next()?;
        Some([first, second])
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id,
            host_id: self.host_id,
            bet_amount: self.bet_amount,
            created_at: self.created_at,
            players: self.players.read().iter().map(|p| p.info()).collect(),
        }
    }

    /// JSON wire representation
    pub fn marshal(&self) -> EngineResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.info())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn player(byte: u8) -> Arc<Player> {
        Arc::new(Player::new(PlayerId::new([byte; 32]), format!("p{byte}")))
    }

    fn wager(amount: i64) -> Vec<ReservedWager> {
        vec![ReservedWager { amount, sequence_id: 1 }]
    }

    fn room_with_host() -> (WaitingRoom, Arc<Player>) {
        let host = player(1);
        let room = assert_ok!(WaitingRoom::new(host.clone(), 100, wager(100)));
        (room, host)
    }

    #[test]
    fn test_new_requires_matching_reservation() {
        let err = assert_err!(WaitingRoom::new(player(1), 100, wager(60)));
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[test]
    fn test_add_player_is_idempotent() {
        let (room, host) = room_with_host();
        assert!(!room.add_player(host.clone()));
        assert!(!room.add_player(host));
        assert_eq!(room.len(), 1);
    }

    #[test]
    fn test_remove_player_missing_is_noop() {
        let (room, _host) = room_with_host();
        assert!(room.remove_player(&PlayerId::new([7; 32])).is_none());
        assert_eq!(room.len(), 1);
    }

    #[test]
    fn test_ready_players_requires_all_ready() {
        let (room, host) = room_with_host();
        let guest = player(2);
        room.add_player(guest.clone());

        assert!(room.ready_players().is_none());

        host.set_ready(true);
        guest.set_ready(true);
        let pair = room.ready_players().expect("pair should be promoted");

        assert_eq!(pair[0].id(), host.id());
        assert_eq!(pair[1].id(), guest.id());
        assert!(room.is_empty());
    }

    #[test]
    fn test_unready_third_player_blocks_promotion() {
        let (room, host) = room_with_host();
        let guest = player(2);
        let late = player(3);
        room.add_player(guest.clone());
        room.add_player(late.clone());
        host.set_ready(true);
        guest.set_ready(true);

        assert!(room.ready_players().is_none());

        late.set_ready(true);
        let pair = room.ready_players().expect("pair should be promoted");
        assert_eq!(pair[1].id(), guest.id());
        assert_eq!(room.players()[0].id(), late.id());
    }

    #[test]
    fn test_single_ready_player_is_not_promoted() {
        let (room, host) = room_with_host();
        host.set_ready(true);
        assert!(room.ready_players().is_none());
        assert_eq!(room.len(), 1);
    }

    #[test]
    fn test_marshal_lists_players() {
        let (room, host) = room_with_host();
        room.add_player(player(2));

        let bytes = assert_ok!(room.marshal());
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["bet_amount"], 100);
        assert_eq!(value["host_id"], host.id().to_string());
        assert_eq!(value["players"].as_array().unwrap().len(), 2);
    }
}
