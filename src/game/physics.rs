//! Fixed-step ball and paddle simulation for a single match

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::geometry::{Rect, Vec2};

/// Paddle vertical offset (as a fraction of half-height) beyond which a hit counts as a corner hit
const CORNER_THRESHOLD: f64 = 0.8;

/// sin(60°): horizontal share of speed after a corner bounce
const CORNER_HORIZONTAL: f64 = 0.866_025_403_784_438_6;

/// Vertical share of speed after a corner bounce
const CORNER_VERTICAL: f64 = 0.5;

/// Court side; the left paddle belongs to player one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opponent(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }
}

/// Top or bottom edge of a paddle or the court
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Edge {
    Top,
    Bottom,
}

/// Paddle control commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaddleCommand {
    MoveUp,
    MoveDown,
    StopUp,
    StopDown,
}

impl FromStr for PaddleCommand {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "move_up" | "ArrowUp" => Ok(PaddleCommand::MoveUp),
            "move_down" | "ArrowDown" => Ok(PaddleCommand::MoveDown),
            "stop_up" | "ArrowUpStop" => Ok(PaddleCommand::StopUp),
            "stop_down" | "ArrowDownStop" => Ok(PaddleCommand::StopDown),
            _ => Err(()),
        }
    }
}

/// The single dominant collision for a tick, in precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collision {
    None,
    /// Ball struck near the top or bottom end of a paddle
    PaddleCorner { side: Side, edge: Edge },
    Paddle { side: Side },
    /// Ball touching the top/bottom wall inside a paddle's column
    WallCorner { side: Side, edge: Edge },
    Wall { edge: Edge },
    /// Ball reached the side wall behind a paddle
    SideWall { side: Side },
}

/// Result of advancing the simulation by one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    RoundOver { winner: Side },
}

/// Court geometry and tuning
#[derive(Debug, Clone)]
pub struct PhysicsConfig {
    pub width: f64,
    pub height: f64,
    pub paddle_width: f64,
    pub paddle_height: f64,
    /// Distance from each side wall to its paddle's center
    pub paddle_margin: f64,
    pub ball_size: f64,
    /// Paddle speed in units per second
    pub paddle_speed: f64,
    /// Horizontal launch speed in units per second
    pub launch_speed: f64,
    /// Vertical launch speed bounds, as fractions of court height per second
    pub launch_min_y: f64,
    pub launch_max_y: f64,
    /// Added to the velocity multiplier every tick
    pub velocity_increment: f64,
    pub tick_rate: u32,
    /// Paddle steered toward the ball while it travels away; `None` for two human players
    pub assist: Option<Side>,
    /// Assist speed as a fraction of `paddle_speed`
    pub assist_factor: f64,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 400.0,
            paddle_width: 10.0,
            paddle_height: 80.0,
            paddle_margin: 55.0,
            ball_size: 10.0,
            paddle_speed: 300.0,
            launch_speed: 200.0,
            launch_min_y: 0.1,
            launch_max_y: 0.3,
            velocity_increment: 0.0005,
            tick_rate: 60,
            assist: None,
            assist_factor: 0.5,
        }
    }
}

impl PhysicsConfig {
    pub fn with_tick_rate(mut self, tick_rate: u32) -> Self {
        self.tick_rate = tick_rate.max(1);
        self
    }

    /// Seconds per tick
    pub fn dt(&self) -> f64 {
        1.0 / f64::from(self.tick_rate.max(1))
    }
}

/// Kinematic state of one paddle
#[derive(Debug, Clone, Copy, Default)]
pub struct Paddle {
    pub position: Vec2,
    pub velocity: Vec2,
}

/// Authoritative simulation for one match
pub struct PhysicsEngine {
    config: PhysicsConfig,
    seed: u64,
    rng: ChaCha8Rng,
    ball_position: Vec2,
    ball_velocity: Vec2,
    paddles: [Paddle; 2],
    velocity_multiplier: f64,
    scores: [u32; 2],
    tick: u64,
}

impl PhysicsEngine {
    pub fn new(config: PhysicsConfig, seed: u64) -> Self {
        let mut engine = Self {
            config,
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            ball_position: Vec2::ZERO,
            ball_velocity: Vec2::ZERO,
            paddles: [Paddle::default(); 2],
            velocity_multiplier: 1.0,
            scores: [0; 2],
            tick: 0,
        };
        engine.reset();
        engine
    }

    /// Re-center ball and paddles and launch the ball diagonally. Scores are kept.
    pub fn reset(&mut self) {
        let (width, height) = (self.config.width, self.config.height);

        self.ball_position = Vec2::new(width / 2.0, height / 2.0);

        let dir_x = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        let dir_y = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        let (lo, hi) = (self.config.launch_min_y, self.config.launch_max_y.max(self.config.launch_min_y));
        let y_fraction = if hi > lo { self.rng.gen_range(lo..=hi) } else { lo };
        self.ball_velocity = Vec2::new(dir_x * self.config.launch_speed, dir_y * y_fraction * height);

        self.paddles[Side::Left.index()] = Paddle {
            position: Vec2::new(self.config.paddle_margin, height / 2.0),
            velocity: Vec2::ZERO,
        };
        self.paddles[Side::Right.index()] = Paddle {
            position: Vec2::new(width - self.config.paddle_margin, height / 2.0),
            velocity: Vec2::ZERO,
        };

        self.velocity_multiplier = 1.0;
    }

    /// Apply a paddle command for one side
    pub fn apply_input(&mut self, side: Side, command: PaddleCommand) {
        let speed = self.config.paddle_speed;
        let paddle = &mut self.paddles[side.index()];
        match command {
            PaddleCommand::MoveUp => paddle.velocity = Vec2::new(0.0, -speed),
            PaddleCommand::MoveDown => paddle.velocity = Vec2::new(0.0, speed),
            // A stale stop must not cancel a newer move in the other direction
            PaddleCommand::StopUp => {
                if paddle.velocity.y < 0.0 {
                    paddle.velocity = Vec2::ZERO;
                }
            }
            PaddleCommand::StopDown => {
                if paddle.velocity.y > 0.0 {
                    paddle.velocity = Vec2::ZERO;
                }
            }
        }
    }

    /// Advance the simulation by one fixed step
    pub fn tick(&mut self) -> TickOutcome {
        self.tick += 1;

        let collision = self.classify();
        match collision {
            Collision::PaddleCorner { side, edge } => {
                if self.moving_toward_paddle(side) {
                    self.corner_bounce(edge);
                }
            }
            Collision::Paddle { side } => {
                if self.moving_toward_paddle(side) {
                    self.ball_velocity = self.ball_velocity.invert_x();
                }
            }
            Collision::WallCorner { edge, .. } | Collision::Wall { edge } => {
                if self.moving_toward_wall(edge) {
                    self.ball_velocity = self.ball_velocity.invert_y();
                }
            }
            Collision::SideWall { side } => {
                let winner = side.opponent();
                self.scores[winner.index()] += 1;
                return TickOutcome::RoundOver { winner };
            }
            Collision::None => {}
        }

        self.steer_assist();
        self.advance_ball();
        self.advance_paddles();
        self.clamp_paddles();
        self.clamp_ball(collision);

        TickOutcome::Continue
    }

    /// Classify the dominant collision for the current positions
    pub fn classify(&self) -> Collision {
        let ball = self.ball_rect();
        let paddles = [
            (Side::Left, self.paddle_rect(Side::Left)),
            (Side::Right, self.paddle_rect(Side::Right)),
        ];

        for (side, paddle) in &paddles {
            let offset = ball.center_y - paddle.center_y;
            if ball.overlaps(paddle) && offset.abs() > CORNER_THRESHOLD * paddle.half_height {
                let edge = if offset < 0.0 { Edge::Top } else { Edge::Bottom };
                return Collision::PaddleCorner { side: *side, edge };
            }
        }

        for (side, paddle) in &paddles {
            if ball.overlaps(paddle) {
                return Collision::Paddle { side: *side };
            }
        }

        let wall_edge = self.touching_wall(&ball);

        if let Some(edge) = wall_edge {
            for (side, paddle) in &paddles {
                if ball.overlaps_x(paddle) {
                    return Collision::WallCorner { side: *side, edge };
                }
            }
            return Collision::Wall { edge };
        }

        if ball.left() <= 0.0 {
            return Collision::SideWall { side: Side::Left };
        }
        if ball.right() >= self.config.width {
            return Collision::SideWall { side: Side::Right };
        }

        Collision::None
    }

    /// Move the ball one step, growing the velocity multiplier first
    pub fn advance_ball(&mut self) {
        self.velocity_multiplier += self.config.velocity_increment;
        let step = self.ball_velocity * (self.velocity_multiplier * self.config.dt());
        self.ball_position = self.ball_position + step;
    }

    fn advance_paddles(&mut self) {
        let dt = self.config.dt();
        for paddle in &mut self.paddles {
            paddle.position = paddle.position + paddle.velocity * dt;
        }
    }

    fn corner_bounce(&mut self, edge: Edge) {
        let speed = self.ball_velocity.length();
        let dir_x = -self.ball_velocity.x.signum();
        let dir_y = if self.ball_velocity.y > 0.0 {
            1.0
        } else if self.ball_velocity.y < 0.0 {
            -1.0
        } else {
            match edge {
                Edge::Top => -1.0,
                Edge::Bottom => 1.0,
            }
        };
        self.ball_velocity = Vec2::new(
            dir_x * speed * CORNER_HORIZONTAL,
            dir_y * speed * CORNER_VERTICAL,
        );
    }

    fn steer_assist(&mut self) {
        let Some(side) = self.config.assist else {
            return;
        };

        let heading_away = match side {
            Side::Left => self.ball_velocity.x > 0.0,
            Side::Right => self.ball_velocity.x < 0.0,
        };
        let speed = self.config.paddle_speed * self.config.assist_factor;
        let paddle = &mut self.paddles[side.index()];

        if !heading_away {
            paddle.velocity = Vec2::ZERO;
            return;
        }

        let gap = self.ball_position.y - paddle.position.y;
        paddle.velocity = if gap.abs() <= speed * self.config.dt() {
            Vec2::ZERO
        } else {
            Vec2::new(0.0, speed * gap.signum())
        };
    }

    fn clamp_paddles(&mut self) {
        let half = self.config.paddle_height / 2.0;
        let max_y = self.config.height - half;
        for paddle in &mut self.paddles {
            if paddle.position.y < half {
                paddle.position.y = half;
                paddle.velocity = Vec2::ZERO;
            } else if paddle.position.y > max_y {
                paddle.position.y = max_y;
                paddle.velocity = Vec2::ZERO;
            }
        }
    }

    fn clamp_ball(&mut self, collision: Collision) {
        let half = self.config.ball_size / 2.0;
        self.ball_position.y = self.ball_position.y.clamp(half, self.config.height - half);

        let side = match collision {
            Collision::Paddle { side } | Collision::PaddleCorner { side, .. } => side,
            _ => return,
        };

        let paddle = self.paddle_rect(side);
        match side {
            Side::Left if self.ball_velocity.x > 0.0 => {
                self.ball_position.x = self.ball_position.x.max(paddle.right() + half);
            }
            Side::Right if self.ball_velocity.x < 0.0 => {
                self.ball_position.x = self.ball_position.x.min(paddle.left() - half);
            }
            _ => {}
        }
    }

    fn touching_wall(&self, ball: &Rect) -> Option<Edge> {
        if ball.top() <= 0.0 {
            Some(Edge::Top)
        } else if ball.bottom() >= self.config.height {
            Some(Edge::Bottom)
        } else {
            None
        }
    }

    fn moving_toward_paddle(&self, side: Side) -> bool {
        match side {
            Side::Left => self.ball_velocity.x < 0.0,
            Side::Right => self.ball_velocity.x > 0.0,
        }
    }

    fn moving_toward_wall(&self, edge: Edge) -> bool {
        match edge {
            Edge::Top => self.ball_velocity.y < 0.0,
            Edge::Bottom => self.ball_velocity.y > 0.0,
        }
    }

    pub fn ball_rect(&self) -> Rect {
        Rect::new(self.ball_position, self.config.ball_size, self.config.ball_size)
    }

    pub fn paddle_rect(&self, side: Side) -> Rect {
        Rect::new(
            self.paddles[side.index()].position,
            self.config.paddle_width,
            self.config.paddle_height,
        )
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn ball_position(&self) -> Vec2 {
        self.ball_position
    }

    pub fn ball_velocity(&self) -> Vec2 {
        self.ball_velocity
    }

    pub fn paddle(&self, side: Side) -> Paddle {
        self.paddles[side.index()]
    }

    pub fn score(&self, side: Side) -> u32 {
        self.scores[side.index()]
    }

    pub fn velocity_multiplier(&self) -> f64 {
        self.velocity_multiplier
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Place the ball directly; used to stage specific situations
    pub fn set_ball(&mut self, position: Vec2, velocity: Vec2) {
        self.ball_position = position;
        self.ball_velocity = velocity;
    }

    pub fn set_paddle_position(&mut self, side: Side, position: Vec2) {
        self.paddles[side.index()].position = position;
    }
}
