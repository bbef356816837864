//! Application wiring

pub mod settlement;
pub mod state;

pub use settlement::spawn_settlement;
pub use state::AppState;
