//! Reserved-wager query contract and an in-memory ledger

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::player::PlayerId;

/// Smallest wager units per whole coin
pub const ATOMS_PER_COIN: i64 = 100_000_000;

/// Convert atoms to whole coins for display
pub fn coins(atoms: i64) -> f64 {
    atoms as f64 / ATOMS_PER_COIN as f64
}

/// Convert a coin amount to atoms, rounding to the nearest atom
pub fn atoms(coins: f64) -> i64 {
    (coins * ATOMS_PER_COIN as f64).round() as i64
}

/// One ledger line item set aside to back a stake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedWager {
    pub amount: i64,
    pub sequence_id: u64,
}

/// Sum of reserved line items
pub fn total(entries: &[ReservedWager]) -> i64 {
    entries.iter().map(|w| w.amount).sum()
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("reservations are managed by the ledger's owner")]
    ReadOnly,
}

/// The wager ledger as seen by matchmaking
pub trait WagerLedger: Send + Sync {
    fn reserved_wager(&self, player: &PlayerId) -> Result<Vec<ReservedWager>, LedgerError>;

    /// Replace whatever `player` has reserved with a single reservation of `amount`.
    /// Zero clears the reservation. External ledgers refuse with `ReadOnly`.
    fn replace_reservation(&self, _player: &PlayerId, _amount: i64) -> Result<(), LedgerError> {
        Err(LedgerError::ReadOnly)
    }
}

/// Process-local ledger used when no external ledger is wired in
#[derive(Default)]
pub struct InMemoryLedger {
    entries: RwLock<HashMap<PlayerId, Vec<ReservedWager>>>,
    next_sequence: AtomicU64,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `amount` atoms for `player`
    pub fn reserve(&self, player: PlayerId, amount: i64) -> ReservedWager {
        let wager = ReservedWager {
            amount,
            sequence_id: self.next_sequence.fetch_add(1, Ordering::Relaxed) + 1,
        };
        self.entries.write().entry(player).or_default().push(wager);
        wager
    }

    /// Drop every reservation for `player`, returning what was held
    pub fn release(&self, player: &PlayerId) -> Vec<ReservedWager> {
        self.entries.write().remove(player).unwrap_or_default()
    }
}

impl WagerLedger for InMemoryLedger {
    fn reserved_wager(&self, player: &PlayerId) -> Result<Vec<ReservedWager>, LedgerError> {
        Ok(self.entries.read().get(player).cloned().unwrap_or_default())
    }

    fn replace_reservation(&self, player: &PlayerId, amount: i64) -> Result<(), LedgerError> {
        let mut entries = self.entries.write();
        if amount <= 0 {
            entries.remove(player);
            return Ok(());
        }
        let wager = ReservedWager {
            amount,
            sequence_id: self.next_sequence.fetch_add(1, Ordering::Relaxed) + 1,
        };
        entries.insert(*player, vec![wager]);
        Ok(())
    }
}
