//! One running match: round driver, result consumer and close-once teardown

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::matchmaking::player::{Player, PlayerId, PlayerNumber};
use crate::notify::{Notification, NotificationHub};
use crate::util::time::tick_interval;
use crate::util::Lifetime;

use super::physics::{PaddleCommand, PhysicsEngine, TickOutcome};
use super::snapshot::GameFrame;

/// Capacity of the input and round-result queues
const CONTROL_QUEUE_CAPACITY: usize = 64;

/// Match lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    NotStarted,
    RoundRunning,
    RoundScored,
    /// Terminal; teardown has run or is running
    MatchEnded,
}

/// Why a match ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    ScoreLimit,
    TimeLimit,
    Forfeit,
    Fault,
    Shutdown,
}

/// Decides when a match is over after each scored round
pub trait EndPolicy: Send + Sync {
    fn end_reason(&self, p1_score: u32, p2_score: u32, elapsed: Duration) -> Option<EndReason>;
}

/// First to `max_score`, with an optional wall-clock limit
#[derive(Debug, Clone)]
pub struct ScoreLimit {
    pub max_score: u32,
    pub time_limit: Option<Duration>,
}

impl ScoreLimit {
    pub fn first_to(max_score: u32) -> Self {
        Self {
            max_score,
            time_limit: None,
        }
    }
}

impl EndPolicy for ScoreLimit {
    fn end_reason(&self, p1_score: u32, p2_score: u32, elapsed: Duration) -> Option<EndReason> {
        if p1_score >= self.max_score || p2_score >= self.max_score {
            return Some(EndReason::ScoreLimit);
        }
        match self.time_limit {
            Some(limit) if elapsed >= limit => Some(EndReason::TimeLimit),
            _ => None,
        }
    }
}

/// Winner of one round, or the fault that ended the round driver
pub type RoundOutcome = EngineResult<PlayerNumber>;

#[derive(Debug, Clone, Copy)]
struct InputEvent {
    player: PlayerNumber,
    command: PaddleCommand,
}

struct Queues {
    input: mpsc::Sender<InputEvent>,
    frames: mpsc::Sender<GameFrame>,
    results: mpsc::Sender<RoundOutcome>,
}

/// State handed to the two tasks when the match starts
struct Pending {
    engine: PhysicsEngine,
    input_rx: mpsc::Receiver<InputEvent>,
    results_rx: mpsc::Receiver<RoundOutcome>,
}

#[derive(Debug)]
struct MatchState {
    phase: MatchPhase,
    scores: [u32; 2],
    winner: Option<PlayerId>,
    end_reason: Option<EndReason>,
    started_at: Option<Instant>,
}

/// A match between exactly two players
pub struct GameInstance {
    id: Uuid,
    players: [Arc<Player>; 2],
    bet_amount: i64,
    running: AtomicBool,
    cleaned_up: AtomicBool,
    state: Mutex<MatchState>,
    queues: Mutex<Option<Queues>>,
    pending: Mutex<Option<Pending>>,
    frames_rx: Mutex<Option<mpsc::Receiver<GameFrame>>>,
    next_round: Notify,
    lifetime: Lifetime,
    policy: Arc<dyn EndPolicy>,
    hub: NotificationHub,
}

impl GameInstance {
    /// Build a match around `engine`. Player one is `players[0]`.
    pub fn new(
        id: Uuid,
        players: [Arc<Player>; 2],
        bet_amount: i64,
        engine: PhysicsEngine,
        policy: Arc<dyn EndPolicy>,
        hub: NotificationHub,
        frame_buffer: usize,
    ) -> Arc<Self> {
        let (input_tx, input_rx) = mpsc::channel(CONTROL_QUEUE_CAPACITY);
        let (frames_tx, frames_rx) = mpsc::channel(frame_buffer.max(1));
        let (results_tx, results_rx) = mpsc::channel(CONTROL_QUEUE_CAPACITY);

        Arc::new(Self {
            id,
            players,
            bet_amount,
            running: AtomicBool::new(false),
            cleaned_up: AtomicBool::new(false),
            state: Mutex::new(MatchState {
                phase: MatchPhase::NotStarted,
                scores: [0; 2],
                winner: None,
                end_reason: None,
                started_at: None,
            }),
            queues: Mutex::new(Some(Queues {
                input: input_tx,
                frames: frames_tx,
                results: results_tx,
            })),
            pending: Mutex::new(Some(Pending {
                engine,
                input_rx,
                results_rx,
            })),
            frames_rx: Mutex::new(Some(frames_rx)),
            next_round: Notify::new(),
            lifetime: Lifetime::new(),
            policy,
            hub,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn players(&self) -> &[Arc<Player>; 2] {
        &self.players
    }

    /// Combined stake of both players
    pub fn bet_amount(&self) -> i64 {
        self.bet_amount
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> MatchPhase {
        self.state.lock().phase
    }

    pub fn winner(&self) -> Option<PlayerId> {
        self.state.lock().winner
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.state.lock().end_reason
    }

    /// (player one, player two)
    pub fn scores(&self) -> (u32, u32) {
        let scores = self.state.lock().scores;
        (scores[0], scores[1])
    }

    pub fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }

    /// True once teardown has released the queue senders
    pub fn queues_closed(&self) -> bool {
        self.queues.lock().is_none()
    }

    /// Take the frame queue's receiving end; only one consumer may hold it
    pub fn take_frames(&self) -> Option<mpsc::Receiver<GameFrame>> {
        self.frames_rx.lock().take()
    }

    pub fn player_number(&self, id: &PlayerId) -> Option<PlayerNumber> {
        if self.players[0].id() == *id {
            Some(PlayerNumber::One)
        } else if self.players[1].id() == *id {
            Some(PlayerNumber::Two)
        } else {
            None
        }
    }

    pub fn has_player(&self, id: &PlayerId) -> bool {
        self.player_number(id).is_some()
    }

    /// Start the round driver and the result consumer
    pub fn run(self: &Arc<Self>) -> EngineResult<()> {
        let Pending {
            engine,
            input_rx,
            results_rx,
        } = self
            .pending
            .lock()
            .take()
            .ok_or_else(|| EngineError::invalid_state("match already started"))?;

        let (frames, results) = {
            let queues = self.queues.lock();
            let queues = queues
                .as_ref()
                .ok_or_else(|| EngineError::invalid_state("match already torn down"))?;
            (queues.frames.clone(), queues.results.clone())
        };

        {
            let mut state = self.state.lock();
            state.phase = MatchPhase::RoundRunning;
            state.started_at = Some(Instant::now());
        }
        self.running.store(true, Ordering::SeqCst);

        info!(
            game_id = %self.id,
            player_one = %self.players[0].id(),
            player_two = %self.players[1].id(),
            bet_amount = self.bet_amount,
            seed = engine.seed(),
            "Match started"
        );

        let driver = self.clone();
        tokio::spawn(async move {
            driver
                .drive_rounds(engine, input_rx, frames, results)
                .await;
        });

        let consumer = self.clone();
        tokio::spawn(async move {
            consumer.consume_results(results_rx).await;
        });

        Ok(())
    }

    /// Queue a paddle command from one of the two participants
    pub fn handle_input(&self, player_id: &PlayerId, command: PaddleCommand) -> EngineResult<()> {
        if !self.is_running() {
            return Err(EngineError::not_found(format!("game {} is not running", self.id)));
        }
        let player = self
            .player_number(player_id)
            .ok_or_else(|| EngineError::not_found(format!("player {player_id} is not in game {}", self.id)))?;

        let queues = self.queues.lock();
        let queues = queues
            .as_ref()
            .ok_or_else(|| EngineError::not_found(format!("game {} is not running", self.id)))?;

        match queues.input.try_send(InputEvent { player, command }) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(EngineError::invalid_state("input queue is full"))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(EngineError::not_found(format!("game {} is not running", self.id)))
            }
        }
    }

    /// Score a round for `winner`. Returns true once the match has ended.
    pub fn record_round(&self, winner: PlayerNumber) -> bool {
        let idx = match winner {
            PlayerNumber::One => 0,
            PlayerNumber::Two => 1,
        };
        let (p1_score, p2_score, elapsed) = {
            let mut state = self.state.lock();
            if state.phase == MatchPhase::MatchEnded {
                return true;
            }
            state.scores[idx] += 1;
            self.players[idx].set_score(state.scores[idx]);
            state.phase = MatchPhase::RoundScored;
            let elapsed = state.started_at.map(|t| t.elapsed()).unwrap_or_default();
            (state.scores[0], state.scores[1], elapsed)
        };

        info!(
            game_id = %self.id,
            winner = %self.players[idx].id(),
            p1_score,
            p2_score,
            "Round scored"
        );

        let scored = Notification::RoundScored {
            game_id: self.id,
            winner: self.players[idx].id(),
            p1_score,
            p2_score,
        };
        for player in &self.players {
            player.notify(scored.clone());
        }
        self.hub.publish(scored);

        match self.policy.end_reason(p1_score, p2_score, elapsed) {
            Some(reason) => {
                let leader = match p1_score.cmp(&p2_score) {
                    std::cmp::Ordering::Greater => Some(self.players[0].id()),
                    std::cmp::Ordering::Less => Some(self.players[1].id()),
                    std::cmp::Ordering::Equal => None,
                };
                self.finish(leader, reason);
                true
            }
            None => {
                // The match may have ended while the lock was released
                let mut state = self.state.lock();
                if state.phase == MatchPhase::RoundScored {
                    state.phase = MatchPhase::RoundRunning;
                }
                state.phase == MatchPhase::MatchEnded
            }
        }
    }

    /// End the match early in favour of the other participant
    pub fn forfeit(&self, loser: &PlayerId) -> EngineResult<()> {
        let number = self
            .player_number(loser)
            .ok_or_else(|| EngineError::not_found(format!("player {loser} is not in game {}", self.id)))?;
        let winner = match number {
            PlayerNumber::One => self.players[1].id(),
            PlayerNumber::Two => self.players[0].id(),
        };
        if !self.finish(Some(winner), EndReason::Forfeit) {
            return Err(EngineError::invalid_state(format!("game {} already ended", self.id)));
        }
        Ok(())
    }

    /// Stop the match without a winner (server shutdown)
    pub fn stop(&self) -> bool {
        self.finish(None, EndReason::Shutdown)
    }

    /// Move to `MatchEnded` once and tear down. Returns false if already ended.
    fn finish(&self, winner: Option<PlayerId>, reason: EndReason) -> bool {
        {
            let mut state = self.state.lock();
            if state.phase == MatchPhase::MatchEnded {
                return false;
            }
            state.phase = MatchPhase::MatchEnded;
            state.winner = winner;
            state.end_reason = Some(reason);
        }
        self.running.store(false, Ordering::SeqCst);

        info!(
            game_id = %self.id,
            winner = ?winner.map(|w| w.to_string()),
            reason = ?reason,
            "Match ended"
        );

        self.cleanup();
        true
    }

    /// Cancel the match scope and close all three queues.
    ///
    /// Only the first call has any effect; returns whether this call did the teardown.
    pub fn cleanup(&self) -> bool {
        if self
            .cleaned_up
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(game_id = %self.id, "Cleanup already done");
            return false;
        }

        self.running.store(false, Ordering::SeqCst);
        self.lifetime.cancel();
        drop(self.queues.lock().take());
        drop(self.pending.lock().take());

        debug!(game_id = %self.id, "Match resources released");
        true
    }

    async fn drive_rounds(
        self: Arc<Self>,
        mut engine: PhysicsEngine,
        mut input_rx: mpsc::Receiver<InputEvent>,
        frames: mpsc::Sender<GameFrame>,
        results: mpsc::Sender<RoundOutcome>,
    ) {
        let rounds = AssertUnwindSafe(self.round_loop(&mut engine, &mut input_rx, &frames, &results));
        if let Err(payload) = rounds.catch_unwind().await {
            let message = panic_message(payload.as_ref());
            error!(game_id = %self.id, panic = %message, "Round driver panicked");

            let fault = Err(EngineError::internal(format!("round driver fault: {message}")));
            tokio::select! {
                biased;
                _ = self.lifetime.cancelled() => {}
                _ = results.send(fault) => {}
            }
        }
        debug!(game_id = %self.id, "Round driver stopped");
    }

    async fn round_loop(
        &self,
        engine: &mut PhysicsEngine,
        input_rx: &mut mpsc::Receiver<InputEvent>,
        frames: &mpsc::Sender<GameFrame>,
        results: &mpsc::Sender<RoundOutcome>,
    ) {
        let mut ticker = interval(tick_interval(engine.config().tick_rate));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            engine.reset();
            debug!(game_id = %self.id, "Round started");

            let winner = loop {
                tokio::select! {
                    biased;
                    _ = self.lifetime.cancelled() => return,
                    _ = ticker.tick() => {}
                }

                while let Ok(input) = input_rx.try_recv() {
                    engine.apply_input(input.player.side(), input.command);
                }

                let outcome = engine.tick();
                let frame = GameFrame::capture(self.id, engine);

                // A slow frame consumer stalls the tick loop rather than losing frames
                tokio::select! {
                    biased;
                    _ = self.lifetime.cancelled() => return,
                    sent = frames.send(frame) => {
                        if sent.is_err() {
                            warn!(game_id = %self.id, "Frame queue closed");
                            return;
                        }
                    }
                }

                if let TickOutcome::RoundOver { winner } = outcome {
                    break PlayerNumber::from_side(winner);
                }
            };

            tokio::select! {
                biased;
                _ = self.lifetime.cancelled() => return,
                sent = results.send(Ok(winner)) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }

            tokio::select! {
                biased;
                _ = self.lifetime.cancelled() => return,
                _ = self.next_round.notified() => {}
            }
        }
    }

    async fn consume_results(self: Arc<Self>, mut results_rx: mpsc::Receiver<RoundOutcome>) {
        loop {
            let outcome = tokio::select! {
                biased;
                _ = self.lifetime.cancelled() => break,
                outcome = results_rx.recv() => outcome,
            };

            match outcome {
                Some(Ok(winner)) => {
                    if self.record_round(winner) {
                        break;
                    }
                    self.next_round.notify_one();
                }
                Some(Err(err)) => {
                    error!(game_id = %self.id, error = %err, "Match aborted");
                    self.finish(None, EndReason::Fault);
                    break;
                }
                None => break,
            }
        }
        debug!(game_id = %self.id, "Result consumer stopped");
    }
}

impl fmt::Debug for GameInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameInstance")
            .field("id", &self.id)
            .field("bet_amount", &self.bet_amount)
            .field("running", &self.is_running())
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
