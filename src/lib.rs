//! partnerbase: schema-driven data access over PostgreSQL.
//!
//! Entities are declared in a JSON schema document. Every entity gets the same
//! [`Dao`]: filter keys with relationship paths and operators, default sorts,
//! offset pages, keyset-windowed export, full-text search, and hooked
//! create/update with dirty tracking and state-transition checks.

pub mod config;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod migration;
pub mod pagination;
pub mod response;
pub mod routes;
pub mod search;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;

pub use config::{load_schema, parse_schema, resolve, Schema, Settings};
pub use error::{AppError, ConfigError};
pub use filter::{Filters, SortKey};
pub use migration::apply_migrations;
pub use pagination::{Page, PageParams};
pub use routes::{app, common_routes_with_ready, entity_routes};
pub use search::{sync_search_trigger, SearchParams};
pub use service::{Dao, EntityHooks, LoadPlan, Record, Registry, Values};
pub use state::AppState;
pub use store::{connect, connect_lazy, ensure_database_exists};
