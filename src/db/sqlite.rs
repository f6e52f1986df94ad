use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::Connection as _;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use tracing::{debug, info};

use super::settle_write;
use crate::aggregate::{AggregatedBatch, AggregatedRecord};
use crate::config::TableName;
use crate::error::PersistError;
use crate::persistence::RecordSink;

fn create_table_statement(table: &TableName) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            installation_id TEXT NOT NULL,
            device_id TEXT NOT NULL,
            mean_signal_strength REAL NOT NULL,
            window_timestamp TEXT NOT NULL,
            PRIMARY KEY (installation_id, device_id, window_timestamp)
        )
        "#
    )
}

fn insert_statement(table: &TableName) -> String {
    format!(
        r#"
        INSERT INTO {table} (installation_id, device_id, mean_signal_strength, window_timestamp)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT DO NOTHING
        "#
    )
}

pub async fn insert_records(
    conn: &mut SqliteConnection,
    table: &TableName,
    installation_id: &str,
    records: &[&AggregatedRecord],
) -> Result<(), sqlx::Error> {
    if records.is_empty() {
        return Ok(());
    }

    let statement = insert_statement(table);

    let mut tx = conn.begin().await?;

    for record in records {
        sqlx::query(&statement)
            .bind(installation_id)
            .bind(record.device_id.to_string())
            .bind(record.mean_signal_strength)
            .bind(record.window_timestamp)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    Ok(())
}

/// Local database file for hosts without a reachable server.
pub struct SqliteSink {
    options: SqliteConnectOptions,
    path: PathBuf,
    table: TableName,
    conn: Option<SqliteConnection>,
}

impl SqliteSink {
    /// Opens (creating if needed) the file at `path` and the table in it.
    pub async fn connect(path: impl AsRef<Path>, table: TableName) -> Result<Self, PersistError> {
        let path = path.as_ref().to_path_buf();
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);

        let mut conn = SqliteConnection::connect_with(&options)
            .await
            .map_err(PersistError::Connect)?;

        sqlx::query(&create_table_statement(&table))
            .execute(&mut conn)
            .await
            .map_err(|source| PersistError::Write {
                table: table.to_string(),
                source,
            })?;

        info!(path = %path.display(), %table, "opened local database");

        Ok(Self {
            options,
            path,
            table,
            conn: Some(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSink for SqliteSink {
    async fn write_batch(
        &mut self,
        installation_id: &str,
        batch: &AggregatedBatch,
    ) -> Result<(), PersistError> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => {
                debug!(path = %self.path.display(), "reopening local database");
                SqliteConnection::connect_with(&self.options)
                    .await
                    .map_err(PersistError::Connect)?
            }
        };
        let conn = self.conn.insert(conn);

        let records: Vec<&AggregatedRecord> = batch.records().collect();
        let result = insert_records(conn, &self.table, installation_id, &records).await;

        settle_write(&mut self.conn, &self.table, result)
    }

    async fn reset(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _ = conn.close().await;
        }
    }
}
