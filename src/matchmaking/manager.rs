//! Game manager - waiting rooms, running matches and the player index

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GameSettings;
use crate::error::{EngineError, EngineResult};
use crate::game::instance::{EndPolicy, EndReason, GameInstance, ScoreLimit};
use crate::game::physics::{PaddleCommand, PhysicsConfig, PhysicsEngine};
use crate::game::snapshot::GameFrame;
use crate::notify::{Notification, NotificationHub};

use super::ledger::{self, LedgerError, ReservedWager, WagerLedger};
use super::player::{Player, PlayerId, PlayerNumber, PlayerSessions};
use super::room::{RoomInfo, WaitingRoom};

/// Process-wide registry of sessions, rooms and matches
pub struct GameManager {
    games: DashMap<Uuid, Arc<GameInstance>>,
    waiting_rooms: RwLock<Vec<Arc<WaitingRoom>>>,
    sessions: PlayerSessions,
    /// Reverse index; kept in step with `games`
    player_to_game: DashMap<PlayerId, Arc<GameInstance>>,
    ledger: Arc<dyn WagerLedger>,
    hub: NotificationHub,
    policy: Arc<dyn EndPolicy>,
    settings: GameSettings,
}

impl GameManager {
    pub fn new(settings: GameSettings, ledger: Arc<dyn WagerLedger>, hub: NotificationHub) -> Self {
        let policy = Arc::new(ScoreLimit::first_to(settings.max_score));
        Self::with_policy(settings, ledger, hub, policy)
    }

    pub fn with_policy(
        settings: GameSettings,
        ledger: Arc<dyn WagerLedger>,
        hub: NotificationHub,
        policy: Arc<dyn EndPolicy>,
    ) -> Self {
        Self {
            games: DashMap::new(),
            waiting_rooms: RwLock::new(Vec::new()),
            sessions: PlayerSessions::new(),
            player_to_game: DashMap::new(),
            ledger,
            hub,
            policy,
            settings,
        }
    }

    pub fn settings(&self) -> &GameSettings {
        &self.settings
    }

    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    /// Register a connection, reusing the session if this identity is already known
    pub fn connect(&self, id: PlayerId, nick: &str) -> Arc<Player> {
        let player = self.sessions.get_or_create(id, nick);
        info!(player_id = %id, nick = %player.nick(), "Player connected");
        player
    }

    /// Attach the outbound streams the transport created for this connection
    pub fn attach_streams(
        &self,
        id: &PlayerId,
        frames: mpsc::Sender<GameFrame>,
        notifications: mpsc::Sender<Notification>,
    ) -> EngineResult<()> {
        let player = self.session(id)?;
        player.attach_game_stream(frames);
        player.attach_notifier(notifications);
        Ok(())
    }

    pub fn player(&self, id: &PlayerId) -> Option<Arc<Player>> {
        self.sessions.get(id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn game_count(&self) -> usize {
        self.games.len()
    }

    pub fn room_count(&self) -> usize {
        self.waiting_rooms.read().len()
    }

    pub fn get_game(&self, id: &Uuid) -> Option<Arc<GameInstance>> {
        self.games.get(id).map(|g| g.value().clone())
    }

    /// The match a player is currently in
    pub fn get_player_game(&self, id: &PlayerId) -> Option<Arc<GameInstance>> {
        self.player_to_game.get(id).map(|g| g.value().clone())
    }

    pub fn find_room(&self, id: &Uuid) -> Option<Arc<WaitingRoom>> {
        self.waiting_rooms.read().iter().find(|r| r.id() == *id).cloned()
    }

    pub fn list_rooms(&self) -> Vec<RoomInfo> {
        self.waiting_rooms.read().iter().map(|r| r.info()).collect()
    }

    /// Open a room staked at `bet_amount` atoms with `host` as its first member
    pub fn create_waiting_room(
        self: &Arc<Self>,
        host_id: &PlayerId,
        bet_amount: i64,
    ) -> EngineResult<RoomInfo> {
        let host = self.session(host_id)?;
        self.ensure_idle(&host)?;
        self.check_stake(bet_amount)?;

        let reserved = self.reserved_wager(host_id)?;
        let room = Arc::new(WaitingRoom::new(host.clone(), bet_amount, reserved)?);

        {
            let mut rooms = self.waiting_rooms.write();
            if host.waiting_room().is_some() {
                return Err(EngineError::invalid_state("player is already in a waiting room"));
            }
            host.set_waiting_room(Some(room.id()));
            host.set_bet_amount(bet_amount);
            host.set_ready(false);
            rooms.push(room.clone());
        }

        let info = room.info();
        info!(
            room_id = %room.id(),
            host_id = %host_id,
            bet_amount,
            "Waiting room created"
        );

        self.notify_lobby(Notification::RoomCreated { room: info.clone() });
        self.spawn_room_poller(room);
        Ok(info)
    }

    /// Add a player to an existing room; their reserved wager must match its stake
    pub fn join_waiting_room(&self, room_id: &Uuid, player_id: &PlayerId) -> EngineResult<RoomInfo> {
        let player = self.session(player_id)?;
        self.ensure_idle(&player)?;
        let room = self
            .find_room(room_id)
            .ok_or_else(|| EngineError::not_found(format!("waiting room {room_id}")))?;

        let reserved = ledger::total(&self.reserved_wager(player_id)?);
        if reserved != room.bet_amount() {
            return Err(EngineError::invalid_state(format!(
                "bet amount mismatch: reserved {reserved}, room stake {}",
                room.bet_amount()
            )));
        }

        {
            let rooms = self.waiting_rooms.write();
            if !rooms.iter().any(|r| r.id() == *room_id) {
                return Err(EngineError::not_found(format!("waiting room {room_id}")));
            }
            if player.waiting_room().is_some() {
                return Err(EngineError::invalid_state("player is already in a waiting room"));
            }
            room.add_player(player.clone());
            player.set_waiting_room(Some(room.id()));
            player.set_bet_amount(room.bet_amount());
            player.set_ready(false);
        }

        info!(
            room_id = %room_id,
            player_id = %player_id,
            players = room.len(),
            "Player joined waiting room"
        );

        self.notify_room(
            &room,
            Notification::PlayerJoinedRoom {
                room_id: *room_id,
                player: player.info(),
            },
        );
        Ok(room.info())
    }

    /// Leave a room; the room is removed once nobody is left in it
    pub fn leave_waiting_room(&self, room_id: &Uuid, player_id: &PlayerId) -> EngineResult<()> {
        let player = self.session(player_id)?;
        let room = self
            .find_room(room_id)
            .ok_or_else(|| EngineError::not_found(format!("waiting room {room_id}")))?;
        if !room.contains(player_id) {
            return Err(EngineError::not_found(format!(
                "player {player_id} is not in waiting room {room_id}"
            )));
        }

        self.detach_from_room(&room, &player);
        Ok(())
    }

    pub fn set_ready(&self, player_id: &PlayerId, ready: bool) -> EngineResult<()> {
        let player = self.session(player_id)?;
        let room = player
            .waiting_room()
            .and_then(|id| self.find_room(&id))
            .ok_or_else(|| EngineError::invalid_state("player is not in a waiting room"))?;

        player.set_ready(ready);
        debug!(room_id = %room.id(), player_id = %player_id, ready, "Player readiness changed");

        self.notify_room(
            &room,
            Notification::PlayerReady {
                room_id: room.id(),
                player_id: *player_id,
                ready,
            },
        );
        Ok(())
    }

    /// Change the stake a player intends to play for; only allowed outside rooms and matches.
    ///
    /// Ledgers that accept reservations from this process are updated to back the new stake.
    pub fn set_bet_amount(&self, player_id: &PlayerId, bet_amount: i64) -> EngineResult<()> {
        let player = self.session(player_id)?;
        self.ensure_idle(&player)?;
        if bet_amount < 0 {
            return Err(EngineError::invalid_state("bet amount cannot be negative"));
        }

        match self.ledger.replace_reservation(player_id, bet_amount) {
            Ok(()) => debug!(player_id = %player_id, bet_amount, "Stake reserved"),
            Err(LedgerError::ReadOnly) => {
                debug!(player_id = %player_id, "Ledger reservations are managed externally")
            }
            Err(err) => return Err(EngineError::internal(err.to_string())),
        }

        player.set_bet_amount(bet_amount);
        let changed = Notification::BetAmountChanged {
            player_id: *player_id,
            bet_amount,
        };
        player.notify(changed.clone());
        self.hub.publish(changed);
        Ok(())
    }

    /// Drop a room from the list; members still inside are released. No-op if absent.
    pub fn remove_waiting_room(&self, room_id: &Uuid) -> Option<Arc<WaitingRoom>> {
        let room = {
            let mut rooms = self.waiting_rooms.write();
            let pos = rooms.iter().position(|r| r.id() == *room_id)?;
            rooms.remove(pos)
        };

        room.lifetime().cancel();
        for player in room.players() {
            player.set_waiting_room(None);
            player.set_ready(false);
        }

        info!(room_id = %room_id, "Waiting room removed");
        self.notify_lobby(Notification::RoomRemoved { room_id: *room_id });
        Some(room)
    }

    /// Promote the room's first two players into a match once all members are ready
    pub fn promote_ready(self: &Arc<Self>, room: &Arc<WaitingRoom>) -> Option<Arc<GameInstance>> {
        let pair = room.ready_players()?;
        for player in &pair {
            player.set_waiting_room(None);
        }
        if room.is_empty() {
            self.remove_waiting_room(&room.id());
        }

        match self.start_game(pair.clone()) {
            Ok(game) => Some(game),
            Err(err) => {
                warn!(room_id = %room.id(), error = %err, "Failed to start match");
                for player in &pair {
                    player.reset_for_next_match();
                }
                None
            }
        }
    }

    /// Start a match between two players; `players[0]` becomes player one
    pub fn start_game(self: &Arc<Self>, players: [Arc<Player>; 2]) -> EngineResult<Arc<GameInstance>> {
        if players[0].id() == players[1].id() {
            return Err(EngineError::invalid_state("a player cannot play against themselves"));
        }

        let id = Uuid::new_v4();
        let bet_amount = players[0].bet_amount() + players[1].bet_amount();
        let physics = PhysicsConfig::default().with_tick_rate(self.settings.tick_rate);
        let engine = PhysicsEngine::new(physics, rand::random::<u64>());
        let instance = GameInstance::new(
            id,
            players.clone(),
            bet_amount,
            engine,
            self.policy.clone(),
            self.hub.clone(),
            self.settings.frame_buffer,
        );

        self.register(&instance)?;

        for (player, number) in players.iter().zip([PlayerNumber::One, PlayerNumber::Two]) {
            player.set_player_number(Some(number));
            player.set_score(0);
            player.set_waiting_room(None);
            player.set_ready(false);
        }

        let frames = instance
            .take_frames()
            .ok_or_else(|| EngineError::internal("frame queue already taken"))?;
        self.spawn_frame_forwarder(instance.clone(), frames);

        let started = Notification::MatchStarted {
            game_id: id,
            players: players.iter().map(|p| p.info()).collect(),
            bet_amount,
        };
        for player in &players {
            player.notify(started.clone());
        }
        self.hub.publish(started);

        if let Err(err) = instance.run() {
            instance.cleanup();
            return Err(err);
        }
        Ok(instance)
    }

    /// Route a paddle command to the player's match
    pub fn handle_input(&self, player_id: &PlayerId, command: PaddleCommand) -> EngineResult<()> {
        let game = self
            .get_player_game(player_id)
            .ok_or_else(|| EngineError::not_found(format!("player {player_id} is not in a match")))?;
        game.handle_input(player_id, command)
    }

    /// Drop a connection. Returns false if the session was already gone.
    ///
    /// Room membership is released and a running match is forfeited.
    pub fn disconnect(&self, player_id: &PlayerId) -> bool {
        let Some(player) = self.sessions.remove(player_id) else {
            return false;
        };

        if let Some(room) = player.waiting_room().and_then(|id| self.find_room(&id)) {
            self.detach_from_room(&room, &player);
        }

        if let Some(game) = self.get_player_game(player_id) {
            if game.is_running() {
                if let Err(err) = game.forfeit(player_id) {
                    debug!(game_id = %game.id(), error = %err, "Forfeit skipped");
                }
            }
        }

        player.reset();
        info!(player_id = %player_id, "Player disconnected");
        self.hub.publish(Notification::PlayerDisconnected {
            player_id: *player_id,
        });
        true
    }

    /// Unregister a finished match and tell both players how it ended
    pub fn finish_game(&self, game: &Arc<GameInstance>) {
        if self.games.remove(&game.id()).is_none() {
            return;
        }
        game.cleanup();

        for player in game.players() {
            self.player_to_game
                .remove_if(&player.id(), |_, current| current.id() == game.id());
        }

        let (p1_score, p2_score) = game.scores();
        let ended = Notification::MatchEnded {
            game_id: game.id(),
            players: game.players().iter().map(|p| p.id()).collect(),
            winner: game.winner(),
            p1_score,
            p2_score,
            bet_amount: game.bet_amount(),
            reason: game.end_reason().unwrap_or(EndReason::Fault),
        };
        for player in game.players() {
            player.reset_for_next_match();
            player.notify(ended.clone());
        }
        self.hub.publish(ended);

        info!(
            game_id = %game.id(),
            p1_score,
            p2_score,
            active_games = self.games.len(),
            "Match removed"
        );
    }

    /// Stop every room poller and match.
    ///
    /// Each stopped match is unregistered and its `MatchEnded` published before this returns.
    pub fn shutdown(&self) -> usize {
        let rooms: Vec<_> = self.waiting_rooms.write().drain(..).collect();
        for room in &rooms {
            room.lifetime().cancel();
        }

        let games: Vec<_> = self.games.iter().map(|g| g.value().clone()).collect();
        let mut stopped = 0;
        for game in &games {
            if game.stop() {
                stopped += 1;
            }
            // The frame forwarder's own call becomes a no-op
            self.finish_game(game);
        }
        info!(rooms = rooms.len(), games = stopped, "Game manager shut down");
        stopped
    }

    fn session(&self, id: &PlayerId) -> EngineResult<Arc<Player>> {
        self.sessions
            .get(id)
            .ok_or_else(|| EngineError::not_found(format!("player {id}")))
    }

    fn ensure_idle(&self, player: &Player) -> EngineResult<()> {
        if player.waiting_room().is_some() {
            return Err(EngineError::invalid_state("player is already in a waiting room"));
        }
        if self.player_to_game.contains_key(&player.id()) {
            return Err(EngineError::invalid_state("player is already in a match"));
        }
        Ok(())
    }

    fn check_stake(&self, bet_amount: i64) -> EngineResult<()> {
        if bet_amount < 0 || (bet_amount == 0 && !self.settings.free_play) {
            return Err(EngineError::invalid_state("bet amount must be positive"));
        }
        if bet_amount < self.settings.min_bet_amount {
            return Err(EngineError::invalid_state(format!(
                "bet amount below minimum of {}",
                self.settings.min_bet_amount
            )));
        }
        Ok(())
    }

    fn reserved_wager(&self, id: &PlayerId) -> EngineResult<Vec<ReservedWager>> {
        self.ledger
            .reserved_wager(id)
            .map_err(|err| EngineError::internal(err.to_string()))
    }

    /// Index the match under its id and both players, refusing a player already in a match
    fn register(&self, game: &Arc<GameInstance>) -> EngineResult<()> {
        let mut inserted = Vec::with_capacity(2);
        for player in game.players() {
            let taken = match self.player_to_game.entry(player.id()) {
                Entry::Occupied(_) => true,
                Entry::Vacant(slot) => {
                    slot.insert(game.clone());
                    false
                }
            };
            if taken {
                for id in &inserted {
                    self.player_to_game.remove(id);
                }
                return Err(EngineError::invalid_state(format!(
                    "player {} is already in a match",
                    player.id()
                )));
            }
            inserted.push(player.id());
        }
        self.games.insert(game.id(), game.clone());
        Ok(())
    }

    fn detach_from_room(&self, room: &Arc<WaitingRoom>, player: &Player) {
        if room.remove_player(&player.id()).is_none() {
            return;
        }
        player.set_waiting_room(None);
        player.set_ready(false);

        info!(
            room_id = %room.id(),
            player_id = %player.id(),
            remaining = room.len(),
            "Player left waiting room"
        );

        if room.is_empty() {
            self.remove_waiting_room(&room.id());
        } else {
            self.notify_room(
                room,
                Notification::PlayerLeftRoom {
                    room_id: room.id(),
                    player_id: player.id(),
                },
            );
        }
    }

    fn notify_room(&self, room: &WaitingRoom, notification: Notification) {
        for player in room.players() {
            player.notify(notification.clone());
        }
        self.hub.publish(notification);
    }

    /// Everyone not currently playing sees room list changes
    fn notify_lobby(&self, notification: Notification) {
        for player in self.sessions.all() {
            if !self.player_to_game.contains_key(&player.id()) {
                player.notify(notification.clone());
            }
        }
        self.hub.publish(notification);
    }

    fn spawn_room_poller(self: &Arc<Self>, room: Arc<WaitingRoom>) {
        let manager = Arc::clone(self);
        let period = self.settings.room_poll_interval;

        tokio::spawn(async move {
            let lifetime = room.lifetime().clone();
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = lifetime.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                manager.promote_ready(&room);
            }
            debug!(room_id = %room.id(), "Room poller stopped");
        });
    }

    /// Push frames to both players until the match tears down its queue
    fn spawn_frame_forwarder(self: &Arc<Self>, game: Arc<GameInstance>, mut frames: mpsc::Receiver<GameFrame>) {
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                for player in game.players() {
                    player.send_frame(&frame);
                }
            }
            manager.finish_game(&game);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::instance::MatchPhase;
    use crate::matchmaking::ledger::{atoms, InMemoryLedger};
    use crate::notify::NotificationKind;
    use tokio_test::{assert_err, assert_ok};

    struct Fixture {
        manager: Arc<GameManager>,
        ledger: Arc<InMemoryLedger>,
    }

    fn fixture() -> Fixture {
        fixture_with(GameSettings::default())
    }

    fn fixture_with(settings: GameSettings) -> Fixture {
        let ledger = Arc::new(InMemoryLedger::new());
        let manager = Arc::new(GameManager::new(settings, ledger.clone(), NotificationHub::new()));
        Fixture { manager, ledger }
    }

    fn id(byte: u8) -> PlayerId {
        PlayerId::new([byte; 32])
    }

    /// Two connected players, each with `stake` atoms reserved
    fn staked_pair(fx: &Fixture, stake: i64) -> (PlayerId, PlayerId) {
        let (a, b) = (id(1), id(2));
        fx.manager.connect(a, "alice");
        fx.manager.connect(b, "bob");
        fx.ledger.reserve(a, stake);
        fx.ledger.reserve(b, stake);
        (a, b)
    }

    #[test]
    fn test_connect_is_get_or_create() {
        let fx = fixture();
        let first = fx.manager.connect(id(1), "alice");
        let again = fx.manager.connect(id(1), "other");
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(again.nick(), "alice");
        assert_eq!(fx.manager.session_count(), 1);
    }

    #[tokio::test]
    async fn test_create_room_requires_matching_reservation() {
        let fx = fixture();
        let host = id(1);
        fx.manager.connect(host, "alice");
        fx.ledger.reserve(host, atoms(0.25));

        let err = assert_err!(fx.manager.create_waiting_room(&host, atoms(0.5)));
        assert!(matches!(err, EngineError::InvalidState(ref m) if m.contains("bet amount mismatch")));
        assert_eq!(fx.manager.room_count(), 0);
    }

    #[tokio::test]
    async fn test_create_room_rejects_unknown_and_zero_stake() {
        let fx = fixture();
        let err = assert_err!(fx.manager.create_waiting_room(&id(9), atoms(1.0)));
        assert!(matches!(err, EngineError::NotFound(_)));

        fx.manager.connect(id(1), "alice");
        let err = assert_err!(fx.manager.create_waiting_room(&id(1), 0));
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_free_play_allows_zero_stake() {
        let fx = fixture_with(GameSettings {
            free_play: true,
            ..GameSettings::default()
        });
        fx.manager.connect(id(1), "alice");
        let room = assert_ok!(fx.manager.create_waiting_room(&id(1), 0));
        assert_eq!(room.bet_amount, 0);
    }

    #[tokio::test]
    async fn test_min_bet_is_enforced() {
        let fx = fixture_with(GameSettings {
            min_bet_amount: atoms(1.0),
            ..GameSettings::default()
        });
        fx.manager.connect(id(1), "alice");
        fx.ledger.reserve(id(1), atoms(0.5));
        let err = assert_err!(fx.manager.create_waiting_room(&id(1), atoms(0.5)));
        assert!(matches!(err, EngineError::InvalidState(ref m) if m.contains("minimum")));
    }

    #[tokio::test]
    async fn test_player_cannot_hold_two_rooms() {
        let fx = fixture();
        let (a, b) = staked_pair(&fx, atoms(0.5));
        let room = assert_ok!(fx.manager.create_waiting_room(&a, atoms(0.5)));
        assert_ok!(fx.manager.create_waiting_room(&b, atoms(0.5)));

        let err = assert_err!(fx.manager.join_waiting_room(&room.id, &b));
        assert!(matches!(err, EngineError::InvalidState(_)));
        let err = assert_err!(fx.manager.create_waiting_room(&a, atoms(0.5)));
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_join_rejects_mismatched_stake() {
        let fx = fixture();
        let (a, b) = (id(1), id(2));
        fx.manager.connect(a, "alice");
        fx.manager.connect(b, "bob");
        fx.ledger.reserve(a, atoms(0.5));
        fx.ledger.reserve(b, atoms(0.2));

        let room = assert_ok!(fx.manager.create_waiting_room(&a, atoms(0.5)));
        let err = assert_err!(fx.manager.join_waiting_room(&room.id, &b));
        assert!(matches!(err, EngineError::InvalidState(ref m) if m.contains("bet amount mismatch")));

        let err = assert_err!(fx.manager.join_waiting_room(&Uuid::new_v4(), &b));
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_last_player_leaving_removes_room() {
        let fx = fixture();
        let (a, b) = staked_pair(&fx, atoms(0.5));
        let room = assert_ok!(fx.manager.create_waiting_room(&a, atoms(0.5)));
        assert_ok!(fx.manager.join_waiting_room(&room.id, &b));

        assert_ok!(fx.manager.leave_waiting_room(&room.id, &a));
        assert_eq!(fx.manager.room_count(), 1);
        assert!(fx.manager.player(&a).unwrap().waiting_room().is_none());

        let err = assert_err!(fx.manager.leave_waiting_room(&room.id, &a));
        assert!(matches!(err, EngineError::NotFound(_)));

        assert_ok!(fx.manager.leave_waiting_room(&room.id, &b));
        assert_eq!(fx.manager.room_count(), 0);
        assert!(fx.manager.find_room(&room.id).is_none());
    }

    #[tokio::test]
    async fn test_remove_missing_room_is_noop() {
        let fx = fixture();
        assert!(fx.manager.remove_waiting_room(&Uuid::new_v4()).is_none());
    }

    #[tokio::test]
    async fn test_set_ready_outside_room_fails() {
        let fx = fixture();
        fx.manager.connect(id(1), "alice");
        let err = assert_err!(fx.manager.set_ready(&id(1), true));
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_set_bet_amount_only_when_idle() {
        let fx = fixture();
        let (a, _) = staked_pair(&fx, atoms(0.5));
        assert_ok!(fx.manager.set_bet_amount(&a, atoms(0.5)));
        assert_eq!(fx.manager.player(&a).unwrap().bet_amount(), atoms(0.5));
        assert_eq!(ledger::total(&fx.ledger.reserved_wager(&a).unwrap()), atoms(0.5));

        assert_ok!(fx.manager.create_waiting_room(&a, atoms(0.5)));
        let err = assert_err!(fx.manager.set_bet_amount(&a, atoms(2.0)));
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_set_bet_backs_room_stake_from_empty_ledger() {
        let fx = fixture();
        let (a, b) = (id(1), id(2));
        fx.manager.connect(a, "alice");
        fx.manager.connect(b, "bob");

        let err = assert_err!(fx.manager.create_waiting_room(&a, atoms(0.5)));
        assert!(matches!(err, EngineError::InvalidState(ref m) if m.contains("bet amount mismatch")));

        assert_ok!(fx.manager.set_bet_amount(&a, atoms(0.5)));
        assert_ok!(fx.manager.set_bet_amount(&b, atoms(0.2)));
        assert_ok!(fx.manager.set_bet_amount(&b, atoms(0.5)));
        assert_eq!(fx.ledger.reserved_wager(&b).unwrap().len(), 1);

        let room = assert_ok!(fx.manager.create_waiting_room(&a, atoms(0.5)));
        assert_ok!(fx.manager.join_waiting_room(&room.id, &b));
        assert_eq!(fx.manager.find_room(&room.id).unwrap().len(), 2);
        fx.manager.shutdown();
    }

    #[tokio::test]
    async fn test_set_bet_with_external_ledger_reserves_nothing() {
        struct External;
        impl WagerLedger for External {
            fn reserved_wager(&self, _: &PlayerId) -> Result<Vec<ReservedWager>, LedgerError> {
                Ok(Vec::new())
            }
        }

        let manager = Arc::new(GameManager::new(
            GameSettings::default(),
            Arc::new(External),
            NotificationHub::new(),
        ));
        manager.connect(id(1), "alice");
        assert_ok!(manager.set_bet_amount(&id(1), atoms(0.5)));
        assert_eq!(manager.player(&id(1)).unwrap().bet_amount(), atoms(0.5));

        let err = assert_err!(manager.create_waiting_room(&id(1), atoms(0.5)));
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_match_starts_from_zero_score() {
        let fx = fixture();
        let (a, b) = staked_pair(&fx, 0);
        let pa = fx.manager.player(&a).unwrap();
        let pb = fx.manager.player(&b).unwrap();
        pa.set_score(2);

        let game = assert_ok!(fx.manager.start_game([pa.clone(), pb]));
        assert_eq!(pa.score(), 0);
        assert_eq!(game.scores(), (0, 0));

        assert!(!game.record_round(PlayerNumber::One));
        assert_eq!(game.scores(), (1, 0));
        fx.manager.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_pair_is_promoted_into_match() {
        let fx = fixture();
        let mut started = fx.manager.hub().subscribe(NotificationKind::MatchStarted);
        let (a, b) = staked_pair(&fx, atoms(0.5));

        let room = assert_ok!(fx.manager.create_waiting_room(&a, atoms(0.5)));
        assert_ok!(fx.manager.join_waiting_room(&room.id, &b));
        assert_ok!(fx.manager.set_ready(&a, true));
        assert_ok!(fx.manager.set_ready(&b, true));

        tokio::time::sleep(fx.manager.settings().room_poll_interval * 2).await;

        let game = fx.manager.get_player_game(&a).expect("match should have started");
        assert!(Arc::ptr_eq(&game, &fx.manager.get_player_game(&b).unwrap()));
        assert_eq!(game.bet_amount(), atoms(1.0));
        assert_eq!(game.players()[0].player_number(), Some(PlayerNumber::One));
        assert_eq!(game.players()[1].player_number(), Some(PlayerNumber::Two));
        assert_eq!(game.players()[0].id(), a);
        assert_eq!(fx.manager.room_count(), 0);
        assert_eq!(fx.manager.game_count(), 1);

        match started.recv().await.unwrap() {
            Notification::MatchStarted { bet_amount, players, .. } => {
                assert_eq!(bet_amount, atoms(1.0));
                assert_eq!(players.len(), 2);
            }
            other => panic!("unexpected notification {other:?}"),
        }

        fx.manager.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_game_refuses_double_match() {
        let fx = fixture();
        let (a, b) = staked_pair(&fx, 0);
        let c = id(3);
        fx.manager.connect(c, "carol");

        let pa = fx.manager.player(&a).unwrap();
        let pb = fx.manager.player(&b).unwrap();
        let pc = fx.manager.player(&c).unwrap();
        assert_ok!(fx.manager.start_game([pa.clone(), pb]));

        let err = assert_err!(fx.manager.start_game([pc, pa]));
        assert!(matches!(err, EngineError::InvalidState(_)));
        assert!(fx.manager.get_player_game(&c).is_none());
        assert_eq!(fx.manager.game_count(), 1);

        fx.manager.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_forfeits_and_cleans_up() {
        let fx = fixture();
        let mut ended = fx.manager.hub().subscribe(NotificationKind::MatchEnded);
        let (a, b) = staked_pair(&fx, atoms(0.5));
        let pa = fx.manager.player(&a).unwrap();
        let pb = fx.manager.player(&b).unwrap();
        pa.set_bet_amount(atoms(0.5));
        pb.set_bet_amount(atoms(0.5));

        let game = assert_ok!(fx.manager.start_game([pa, pb.clone()]));
        assert_ok!(fx.manager.handle_input(&b, PaddleCommand::MoveUp));

        assert!(fx.manager.disconnect(&a));
        assert!(!fx.manager.disconnect(&a));

        match ended.recv().await.unwrap() {
            Notification::MatchEnded {
                winner,
                reason,
                bet_amount,
                ..
            } => {
                assert_eq!(winner, Some(b));
                assert_eq!(reason, EndReason::Forfeit);
                assert_eq!(bet_amount, atoms(1.0));
            }
            other => panic!("unexpected notification {other:?}"),
        }

        assert_eq!(game.phase(), MatchPhase::MatchEnded);
        assert!(fx.manager.get_player_game(&a).is_none());
        assert!(fx.manager.get_player_game(&b).is_none());
        assert_eq!(fx.manager.game_count(), 0);
        assert_eq!(pb.player_number(), None);
        assert!(fx.manager.player(&a).is_none());

        let err = assert_err!(fx.manager.handle_input(&b, PaddleCommand::MoveUp));
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_disconnect_in_room_notifies_remaining_member() {
        let fx = fixture();
        let (a, b) = staked_pair(&fx, atoms(0.5));
        let (tx, mut rx) = mpsc::channel(16);
        let (frames_tx, _frames_rx) = mpsc::channel(1);
        assert_ok!(fx.manager.attach_streams(&b, frames_tx, tx));

        let room = assert_ok!(fx.manager.create_waiting_room(&a, atoms(0.5)));
        assert_ok!(fx.manager.join_waiting_room(&room.id, &b));
        while rx.try_recv().is_ok() {}

        assert!(fx.manager.disconnect(&a));
        assert_eq!(fx.manager.room_count(), 1);
        assert_eq!(fx.manager.find_room(&room.id).unwrap().len(), 1);
        assert_eq!(
            rx.recv().await.unwrap(),
            Notification::PlayerLeftRoom {
                room_id: room.id,
                player_id: a,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_matches_and_pollers() {
        let fx = fixture();
        let (a, b) = staked_pair(&fx, 0);
        let pa = fx.manager.player(&a).unwrap();
        let pb = fx.manager.player(&b).unwrap();
        let game = assert_ok!(fx.manager.start_game([pa, pb]));
        let mut ended = fx.manager.hub().subscribe(NotificationKind::MatchEnded);

        fx.ledger.reserve(id(3), atoms(1.0));
        fx.manager.connect(id(3), "carol");
        assert_ok!(fx.manager.create_waiting_room(&id(3), atoms(1.0)));

        assert_eq!(fx.manager.shutdown(), 1);
        assert_eq!(game.end_reason(), Some(EndReason::Shutdown));
        assert!(game.is_cleaned_up());
        assert_eq!(fx.manager.room_count(), 0);
        assert_eq!(fx.manager.game_count(), 0);
        assert!(fx.manager.get_player_game(&a).is_none());

        // Published before shutdown returns, without waiting on the forwarder
        match ended.try_recv() {
            Ok(Notification::MatchEnded { reason, winner, players, .. }) => {
                assert_eq!(reason, EndReason::Shutdown);
                assert_eq!(winner, None);
                assert_eq!(players, vec![a, b]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(fx.manager.shutdown(), 0);
    }
}
