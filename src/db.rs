mod postgres;
mod sqlite;

pub use postgres::*;
pub use sqlite::*;

use crate::config::TableName;
use crate::error::PersistError;

/// Wraps a failed write and drops `conn` when the fault is worth a reconnect,
/// so the next write starts on a fresh connection.
fn settle_write<C>(
    conn: &mut Option<C>,
    table: &TableName,
    result: Result<(), sqlx::Error>,
) -> Result<(), PersistError> {
    result.map_err(|source| {
        let err = PersistError::Write {
            table: table.to_string(),
            source,
        };
        if err.is_retryable() {
            *conn = None;
        }
        err
    })
}
