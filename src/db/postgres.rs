use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Connection as _;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use tracing::{debug, info};

use super::settle_write;
use crate::aggregate::{AggregatedBatch, AggregatedRecord};
use crate::config::TableName;
use crate::error::PersistError;
use crate::persistence::RecordSink;

/// One row per device and window; the key makes a replayed batch a no-op.
pub fn create_table_statement(table: &TableName) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            installation_id TEXT NOT NULL,
            device_id TEXT NOT NULL,
            mean_signal_strength DOUBLE PRECISION NOT NULL,
            window_timestamp TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (installation_id, device_id, window_timestamp)
        )
        "#
    )
}

fn insert_statement(table: &TableName) -> String {
    format!(
        r#"
        INSERT INTO {table} (installation_id, device_id, mean_signal_strength, window_timestamp)
        SELECT $1::TEXT, * FROM UNNEST($2::TEXT[], $3::FLOAT8[], $4::TIMESTAMPTZ[])
        ON CONFLICT (installation_id, device_id, window_timestamp) DO NOTHING
        "#
    )
}

pub async fn bulk_insert_records(
    conn: &mut PgConnection,
    table: &TableName,
    installation_id: &str,
    records: &[&AggregatedRecord],
) -> Result<(), sqlx::Error> {
    if records.is_empty() {
        return Ok(());
    }

    let device_ids: Vec<String> = records.iter().map(|r| r.device_id.to_string()).collect();
    let means: Vec<f64> = records.iter().map(|r| r.mean_signal_strength).collect();
    let window_timestamps: Vec<DateTime<Utc>> =
        records.iter().map(|r| r.window_timestamp).collect();

    let statement = insert_statement(table);

    let mut tx = conn.begin().await?;

    sqlx::query(&statement)
        .bind(installation_id)
        .bind(device_ids)
        .bind(means)
        .bind(window_timestamps)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(())
}

/// PostgreSQL sink holding one connection, re-established after a fault.
pub struct PgSink {
    options: PgConnectOptions,
    table: TableName,
    conn: Option<PgConnection>,
}

impl PgSink {
    /// Connects and creates the table if missing, so a bad URL, an
    /// unreachable server or missing privileges fail startup.
    pub async fn connect(database_url: &str, table: TableName) -> Result<Self, PersistError> {
        let options: PgConnectOptions = database_url.parse().map_err(PersistError::Connect)?;
        let mut conn = PgConnection::connect_with(&options)
            .await
            .map_err(PersistError::Connect)?;

        sqlx::query(&create_table_statement(&table))
            .execute(&mut conn)
            .await
            .map_err(|source| PersistError::Write {
                table: table.to_string(),
                source,
            })?;

        info!(%table, "connected to database");

        Ok(Self {
            options,
            table,
            conn: Some(conn),
        })
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }
}

#[async_trait]
impl RecordSink for PgSink {
    async fn write_batch(
        &mut self,
        installation_id: &str,
        batch: &AggregatedBatch,
    ) -> Result<(), PersistError> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => {
                debug!(table = %self.table, "reconnecting to database");
                PgConnection::connect_with(&self.options)
                    .await
                    .map_err(PersistError::Connect)?
            }
        };
        let conn = self.conn.insert(conn);

        let records: Vec<&AggregatedRecord> = batch.records().collect();
        let result = bulk_insert_records(conn, &self.table, installation_id, &records).await;

        settle_write(&mut self.conn, &self.table, result)
    }

    async fn reset(&mut self) {
        if let Some(conn) = self.conn.take() {
            // Best effort: the server may already be gone.
            let _ = conn.close().await;
        }
    }
}
