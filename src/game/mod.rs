//! Game simulation modules

pub mod geometry;
pub mod instance;
pub mod physics;
pub mod snapshot;

pub use instance::{EndPolicy, EndReason, GameInstance, MatchPhase, RoundOutcome, ScoreLimit};
pub use physics::{PaddleCommand, PhysicsConfig, PhysicsEngine, Side};
pub use snapshot::GameFrame;
