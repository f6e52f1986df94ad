use std::num::NonZeroU32;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::aggregate::AggregatedBatch;
use crate::error::PersistError;

/// Default number of write attempts per batch: the first try plus one retry.
pub const DEFAULT_MAX_WRITE_ATTEMPTS: NonZeroU32 = NonZeroU32::new(2).unwrap();

/// Destination for aggregated records.
#[async_trait]
pub trait RecordSink: Send {
    /// Stores one row per record of `batch`.
    async fn write_batch(
        &mut self,
        installation_id: &str,
        batch: &AggregatedBatch,
    ) -> Result<(), PersistError>;

    /// Drops any held connection so the next write starts fresh.
    async fn reset(&mut self) {}
}

#[async_trait]
impl<S: RecordSink + ?Sized> RecordSink for Box<S> {
    async fn write_batch(
        &mut self,
        installation_id: &str,
        batch: &AggregatedBatch,
    ) -> Result<(), PersistError> {
        (**self).write_batch(installation_id, batch).await
    }

    async fn reset(&mut self) {
        (**self).reset().await
    }
}

/// Sink for `--dry-run`: logs records instead of storing them.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl RecordSink for LogSink {
    async fn write_batch(
        &mut self,
        installation_id: &str,
        batch: &AggregatedBatch,
    ) -> Result<(), PersistError> {
        for record in batch.records() {
            info!(
                installation_id,
                device_id = %record.device_id,
                mean_signal_strength = record.mean_signal_strength,
                window_timestamp = %record.window_timestamp,
                "aggregated reading"
            );
        }
        Ok(())
    }
}

/// Drains aggregated batches into a [`RecordSink`], reconnecting on connection faults.
pub struct PersistenceWorker<S> {
    sink: S,
    installation_id: String,
    max_attempts: NonZeroU32,
}

impl<S: RecordSink> PersistenceWorker<S> {
    pub fn new(sink: S, installation_id: impl Into<String>, max_attempts: NonZeroU32) -> Self {
        Self {
            sink,
            installation_id: installation_id.into(),
            max_attempts,
        }
    }

    /// Runs until the channel closes or a batch cannot be stored.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<AggregatedBatch>,
    ) -> Result<(), PersistError> {
        while let Some(batch) = rx.recv().await {
            self.persist(&batch).await?;
        }

        debug!("aggregated batch channel closed, persistence finished");

        Ok(())
    }

    pub async fn persist(&mut self, batch: &AggregatedBatch) -> Result<(), PersistError> {
        if batch.is_empty() {
            return Ok(());
        }

        let max_attempts = self.max_attempts.get();
        let mut attempt = 1;

        loop {
            let err = match self.sink.write_batch(&self.installation_id, batch).await {
                Ok(()) => {
                    debug!(
                        window_start = %batch.window_start,
                        records = batch.len(),
                        "stored aggregated batch"
                    );
                    return Ok(());
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= max_attempts {
                return Err(PersistError::Exhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            warn!(
                error = %err,
                attempt,
                max_attempts,
                "failed to store aggregated batch, reconnecting"
            );
            self.sink.reset().await;
            attempt += 1;
        }
    }
}
