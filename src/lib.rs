// Library exports for Huddle
// This allows integration tests and the binary to share modules

pub mod board;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod realtime;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db::{BoardStore, SqliteBoardStore};
use crate::realtime::{
    BoardHub, BroadcastBroker, EventBroker, HubSettings, StoreSessionNotifier, StoreSnapshots,
};
use crate::state::{AppState, DbPool};

/// Wire the store, broker and hub together on top of a migrated pool.
/// Must be called from within a Tokio runtime.
pub fn build_state(pool: DbPool, config: &Config) -> AppState {
    let store: Arc<dyn BoardStore> = Arc::new(SqliteBoardStore::new(pool));
    let broker: Arc<dyn EventBroker> =
        Arc::new(BroadcastBroker::new(config.realtime.channel_capacity));
    let snapshots = Arc::new(StoreSnapshots::new(store.clone()));
    let sessions = Arc::new(StoreSessionNotifier::new(store.clone(), broker.clone()));
    let hub = BoardHub::new(
        broker.clone(),
        snapshots,
        sessions,
        HubSettings::from(&config.realtime),
    );

    AppState { store, broker, hub }
}

/// Board clients are served from their own origin.
pub fn app(state: AppState) -> Router {
    routes::router()
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
