use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use paddock_backend::api::{self, AppState};
use paddock_backend::auth;
use paddock_backend::config::{self, Config};
use paddock_backend::metrics;
use paddock_backend::store::{DocumentStore, MemoryStore, SqliteStore};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load();
    config::set_local_mode(config.local_mode);
    auth::set_jwt_secret(&config.jwt_secret);
    metrics::register_metrics();

    if config.local_mode {
        tracing::warn!(
            "Local mode: authentication disabled, every request acts as '{}'",
            config::LOCAL_USER_ID
        );
    }

    let store: Arc<dyn DocumentStore> = if config.memory {
        tracing::info!("Using in-memory document store");
        Arc::new(MemoryStore::new())
    } else {
        let store = SqliteStore::new(&config.database_url)
            .await
            .expect("Failed to initialize database");
        Arc::new(store)
    };

    let app = api::router(AppState::new(store)).layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!("Paddock backend listening on {addr}");
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
