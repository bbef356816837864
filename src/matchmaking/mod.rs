//! Matchmaking: players, wager checks, waiting rooms and the game manager

pub mod ledger;
pub mod manager;
pub mod player;
pub mod room;

pub use ledger::{InMemoryLedger, ReservedWager, WagerLedger};
pub use manager::GameManager;
pub use player::{Player, PlayerId, PlayerNumber};
pub use room::{RoomInfo, WaitingRoom};
