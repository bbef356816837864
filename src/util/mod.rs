//! Shared helpers

pub mod lifetime;
pub mod rate_limit;
pub mod time;

pub use lifetime::Lifetime;
