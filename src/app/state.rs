//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::matchmaking::{GameManager, WagerLedger};
use crate::notify::NotificationHub;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub manager: Arc<GameManager>,
    pub hub: NotificationHub,
}

impl AppState {
    pub fn new(config: Config, ledger: Arc<dyn WagerLedger>) -> Self {
        let config = Arc::new(config);

        // Collaborators subscribe to the hub by notification kind
        let hub = NotificationHub::new();

        let manager = Arc::new(GameManager::new(config.game.clone(), ledger, hub.clone()));

        Self {
            config,
            manager,
            hub,
        }
    }
}
