//! Settlement collaborator - releases reserved wagers when a match ends

use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::matchmaking::ledger::{coins, total, InMemoryLedger};
use crate::notify::{Notification, NotificationHub, NotificationKind};
use crate::util::Lifetime;

/// Follow `MatchEnded` and release both players' reservations from `ledger`.
///
/// Once `stop` is cancelled the task settles whatever is already queued and exits.
pub fn spawn_settlement(
    hub: &NotificationHub,
    ledger: Arc<InMemoryLedger>,
    stop: Lifetime,
) -> JoinHandle<()> {
    let mut ended = hub.subscribe(NotificationKind::MatchEnded);

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                event = ended.recv() => event,
                _ = stop.cancelled() => break,
            };
            match event {
                Ok(Notification::MatchEnded {
                    game_id,
                    players,
                    winner,
                    bet_amount,
                    reason,
                    ..
                }) => {
                    let released: i64 = players
                        .iter()
                        .map(|id| total(&ledger.release(id)))
                        .sum();
                    info!(
                        game_id = %game_id,
                        winner = ?winner.map(|w| w.to_string()),
                        pot = coins(bet_amount),
                        released,
                        reason = ?reason,
                        "Match settled"
                    );
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Settlement lagged behind match results");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
