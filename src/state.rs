//! Shared application state for all routes.

use crate::config::Settings;
use crate::service::Registry;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub registry: Arc<Registry>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(pool: PgPool, registry: Registry, settings: Settings) -> Self {
        AppState {
            pool,
            registry: Arc::new(registry),
            settings: Arc::new(settings),
        }
    }
}
