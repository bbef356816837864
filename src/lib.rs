//! Pong Server - wagered two-player pong matches
//!
//! Library half of the server: matchmaking, match orchestration and the
//! fixed-step physics, plus the HTTP/WebSocket transport that drives them.

pub mod app;
pub mod config;
pub mod error;
pub mod game;
pub mod http;
pub mod matchmaking;
pub mod notify;
pub mod util;
pub mod ws;

pub use error::{EngineError, EngineResult};
