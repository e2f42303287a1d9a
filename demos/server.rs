//! Example server: loads the schema document, picks PostgreSQL when DATABASE_URL is set
//! (tables must already exist, see `demos/schema.sql`) or the in-memory engine otherwise, and mounts all routes.

use entity_rest::{app, load_from_path, resolve, AppState, MemoryStore, PgStore, Settings};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("entity_rest=info".parse()?))
        .init();

    let settings = Settings::from_env()?;
    let registry = resolve(&load_from_path(&settings.schema_path)?)?;
    tracing::info!(
        schema = %settings.schema_path.display(),
        entities = registry.len(),
        "schema loaded"
    );

    let state = match settings.database_url.as_deref() {
        Some(url) => {
            let store = PgStore::connect(url, settings.database_max_connections).await?;
            store.check_blob_storage(&registry).await?;
            AppState::new(registry, store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; records live in memory only");
            AppState::new(registry, MemoryStore::new())
        }
    };

    let listener = TcpListener::bind(settings.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app(state, settings.json_body_limit)).await?;
    Ok(())
}
