use std::sync::Arc;

use mongodb::{Client, Database};

use crate::config::Config;
use crate::services::generator::RiddleSource;
use crate::services::session_store::{MemorySessionStore, SessionLocks};

pub mod auth_service;
pub mod game_service;
pub mod generator;
pub mod session_store;
pub mod stats_service;

/// Shared application state, cloned behind an Arc into every handler.
pub struct AppState {
    pub config: Config,
    pub mongo_client: Client,
    pub mongo: Database,
    pub riddles: Arc<dyn RiddleSource>,
    pub anonymous_sessions: Arc<MemorySessionStore>,
    pub session_locks: SessionLocks,
}

impl AppState {
    pub fn new(config: Config, mongo_client: Client, riddles: Arc<dyn RiddleSource>) -> Self {
        let mongo = mongo_client.database(&config.mongo_database);

        Self {
            config,
            mongo_client,
            mongo,
            riddles,
            anonymous_sessions: Arc::new(MemorySessionStore::new()),
            session_locks: SessionLocks::default(),
        }
    }
}
