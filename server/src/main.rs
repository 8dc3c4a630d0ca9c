//! partnerbase HTTP server: loads the schema, migrates, registers partner rules and serves.
//!
//! Run from repo root: `cargo run -p partnerbase-server`

mod hooks;

use hooks::PartnerHooks;
use partnerbase::{
    apply_migrations, app, connect, ensure_database_exists, load_schema, AppState, ConfigError, LoadPlan,
    Registry, Schema, Settings,
};
use std::sync::Arc;
use tokio::net::TcpListener;

fn build_registry(schema: Arc<Schema>) -> Result<Registry, ConfigError> {
    let partner_hooks = PartnerHooks::new(&schema)?;
    Registry::builder(schema)
        .with_hooks("partners", partner_hooks)
        .with_load_plan("partners", LoadPlan::new().with("owner"))
        .with_load_plan("partner_members", LoadPlan::new().with("user"))
        .build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("partnerbase=info,partnerbase_server=info")),
        )
        .init();

    ensure_database_exists(&settings.database_url).await?;
    let pool = connect(&settings).await?;
    let schema = Arc::new(load_schema(&settings.schema_path).await?);
    apply_migrations(&pool, &schema).await?;
    let registry = build_registry(schema)?;

    let listener = TcpListener::bind(&settings.bind_addr).await?;
    let state = AppState::new(pool, registry, settings);
    tracing::info!(addr = %listener.local_addr()?, "partnerbase listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}
