// sqlx::Error -> AppError
//
// Orphan rules forbid `From<sqlx::Error> for AppError` here, so adapters
// map explicitly.

use fakturace_core::error::AppError;

pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            // SQLite error codes: https://www.sqlite.org/rescode.html
            match db_err.code().as_deref() {
                Some("2067") | Some("1555") => {
                    AppError::Conflict(format!("Unique constraint violation: {}", db_err.message()))
                }
                Some("5") => AppError::Storage(format!(
                    "Database locked (SQLITE_BUSY): {}",
                    db_err.message()
                )),
                Some("13") => AppError::Storage(format!("Database full: {}", db_err.message())),
                Some(code) => {
                    AppError::Storage(format!("Database error [{}]: {}", code, db_err.message()))
                }
                None => AppError::Storage(format!("Database error: {}", db_err.message())),
            }
        }
        sqlx::Error::RowNotFound => AppError::NotFound("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => AppError::Storage(format!("Column not found: {}", col)),
        sqlx::Error::PoolClosed => AppError::Broker("SQLite pool is closed".to_string()),
        // Connection, pool, protocol errors
        _ => AppError::Storage(err.to_string()),
    }
}
