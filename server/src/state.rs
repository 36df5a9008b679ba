use std::sync::Arc;

use lectern_core::{AppConfig, Database};

use crate::bus::{MessageRouter, RoomHub};
use crate::classroom;

/// Everything a connection needs, cloned once per socket. The router is
/// frozen behind an `Arc` before the first connection is accepted.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub database: Database,
    pub hub: RoomHub,
    pub router: Arc<MessageRouter>,
}

pub fn build_state(database: &Database, config: &AppConfig) -> AppState {
    let mut router = MessageRouter::new();
    classroom::register_handlers(&mut router);

    AppState {
        config: Arc::new(config.clone()),
        database: database.clone(),
        hub: RoomHub::default(),
        router: Arc::new(router),
    }
}
