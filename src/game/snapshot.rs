//! Per-tick frame snapshots published to clients

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::physics::{PhysicsEngine, Side};

/// Everything a renderer needs to draw one tick, with no other state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameFrame {
    pub game_id: Uuid,
    pub tick: u64,
    pub fps: u32,

    pub court_width: f64,
    pub court_height: f64,
    pub paddle_width: f64,
    pub paddle_height: f64,
    pub ball_width: f64,
    pub ball_height: f64,

    pub p1_score: u32,
    pub p2_score: u32,

    pub ball_x: f64,
    pub ball_y: f64,
    pub ball_vel_x: f64,
    pub ball_vel_y: f64,

    pub p1_x: f64,
    pub p1_y: f64,
    pub p1_vel_y: f64,
    pub p2_x: f64,
    pub p2_y: f64,
    pub p2_vel_y: f64,
}

impl GameFrame {
    /// Capture the engine's current state
    pub fn capture(game_id: Uuid, engine: &PhysicsEngine) -> Self {
        let config = engine.config();
        let ball = engine.ball_position();
        let ball_vel = engine.ball_velocity();
        let p1 = engine.paddle(Side::Left);
        let p2 = engine.paddle(Side::Right);

        Self {
            game_id,
            tick: engine.tick_count(),
            fps: config.tick_rate,
            court_width: config.width,
            court_height: config.height,
            paddle_width: config.paddle_width,
            paddle_height: config.paddle_height,
            ball_width: config.ball_size,
            ball_height: config.ball_size,
            p1_score: engine.score(Side::Left),
            p2_score: engine.score(Side::Right),
            ball_x: ball.x,
            ball_y: ball.y,
            ball_vel_x: ball_vel.x,
            ball_vel_y: ball_vel.y,
            p1_x: p1.position.x,
            p1_y: p1.position.y,
            p1_vel_y: p1.velocity.y,
            p2_x: p2.position.x,
            p2_y: p2.position.y,
            p2_vel_y: p2.velocity.y,
        }
    }
}
