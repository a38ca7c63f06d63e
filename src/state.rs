use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::db::BoardStore;
use crate::realtime::{BoardHub, EventBroker};

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BoardStore>,
    pub broker: Arc<dyn EventBroker>,
    pub hub: BoardHub,
}
