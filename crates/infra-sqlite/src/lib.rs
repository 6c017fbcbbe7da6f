// Fakturace Infrastructure - SQLite Adapter
// Implements: Broker (single-host queue backend), NotificationStore

mod broker;
mod connection;
mod error;
mod migration;
mod notification_store;

pub use broker::SqliteBroker;
pub use connection::create_pool;
pub use migration::run_migrations;
pub use notification_store::SqliteNotificationStore;

use fakturace_core::error::Result;
use std::time::Duration;

/// Open (or create) a queue database and bring its schema up to date
pub async fn connect_broker(database_url: &str, poll_interval: Duration) -> Result<SqliteBroker> {
    let pool = create_pool(database_url).await?;
    run_migrations(&pool).await?;
    Ok(SqliteBroker::new(pool, poll_interval))
}

// Note: sqlx::Error conversion is handled by error::map_sqlx_error
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
