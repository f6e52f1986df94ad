//! Scanner, controller and persistence wired together by bounded channels.
//!
//! ```text
//! Scanner (blocking thread) --RawBatch--> controller --AggregatedBatch--> persistence
//! ```
//!
//! Every worker holds a drop guard on the shared shutdown token, so the first
//! one to finish, for any reason, winds the others down. The scanner then
//! emits its last window and disables scanning; the controller and the
//! persistence worker drain what is queued before their channels close.

use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregate::{AggregatedBatch, aggregate};
use crate::config::CollectorConfig;
use crate::error::{PersistError, PipelineError, ScannerError};
use crate::persistence::{PersistenceWorker, RecordSink};
use crate::radio::{HciBackend, RadioSession};
use crate::reading::RawBatch;
use crate::scanner::Scanner;

pub struct Pipeline {
    config: CollectorConfig,
}

impl Pipeline {
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    /// Runs until `shutdown` is cancelled or a worker fails.
    pub async fn run<B, S>(
        self,
        session: RadioSession<B>,
        sink: S,
        shutdown: CancellationToken,
    ) -> Result<(), PipelineError>
    where
        B: HciBackend + 'static,
        B::Channel: 'static,
        S: RecordSink + 'static,
    {
        let CollectorConfig {
            installation_id,
            window_seconds,
            scan_parameters,
            channel_capacity,
            max_write_attempts,
            ..
        } = self.config;

        let (raw_tx, raw_rx) = mpsc::channel::<RawBatch>(channel_capacity.get());
        let (aggregated_tx, aggregated_rx) =
            mpsc::channel::<AggregatedBatch>(channel_capacity.get());

        let scanner_shutdown = shutdown.clone();
        let scanner = tokio::task::spawn_blocking(move || {
            let _guard = scanner_shutdown.clone().drop_guard();
            let mut scanner = Scanner::new(session, window_seconds, scan_parameters);
            scanner.initialize()?;
            scanner.run(&raw_tx, &scanner_shutdown)
        });

        let controller_guard = shutdown.clone().drop_guard();
        let controller = tokio::spawn(async move {
            let _guard = controller_guard;
            run_controller(raw_rx, aggregated_tx).await
        });

        let persistence_guard = shutdown.clone().drop_guard();
        let worker = PersistenceWorker::new(sink, installation_id, max_write_attempts);
        let persistence = tokio::spawn(async move {
            let _guard = persistence_guard;
            worker.run(aggregated_rx).await
        });

        info!(
            window_seconds = window_seconds.get(),
            channel_capacity = channel_capacity.get(),
            "pipeline started"
        );

        let (scanner, controller, persistence) = tokio::join!(scanner, controller, persistence);
        let result = settle(scanner, controller, persistence);

        match &result {
            Ok(()) => info!("pipeline stopped"),
            Err(err) => warn!(error = %err, "pipeline stopped"),
        }

        result
    }
}

/// Aggregates raw batches one at a time until the scanner side closes.
async fn run_controller(
    mut rx: mpsc::Receiver<RawBatch>,
    tx: mpsc::Sender<AggregatedBatch>,
) {
    while let Some(raw) = rx.recv().await {
        let batch = aggregate(&raw);

        debug!(
            window_start = %batch.window_start,
            readings = raw.len(),
            devices = batch.len(),
            "aggregated window"
        );

        if tx.send(batch).await.is_err() {
            warn!("aggregated batch channel closed, dropping remaining windows");
            return;
        }
    }
}

/// Picks the error that explains the shutdown.
///
/// A closed channel on the scanner side is only a consequence of another
/// worker stopping, so it ranks last.
fn settle(
    scanner: Result<Result<(), ScannerError>, JoinError>,
    controller: Result<(), JoinError>,
    persistence: Result<Result<(), PersistError>, JoinError>,
) -> Result<(), PipelineError> {
    let scanner = scanner.map_err(|source| PipelineError::Worker {
        worker: "scanner",
        source,
    });
    let controller = controller.map_err(|source| PipelineError::Worker {
        worker: "controller",
        source,
    });
    let persistence = persistence.map_err(|source| PipelineError::Worker {
        worker: "persistence",
        source,
    });

    match (scanner, persistence) {
        (Ok(Err(err @ ScannerError::Radio(_))), _) => Err(PipelineError::Scanner(err)),
        (_, Ok(Err(err))) => Err(PipelineError::Persistence(err)),
        (Err(err), _) | (_, Err(err)) => Err(err),
        (Ok(scanner), Ok(Ok(()))) => {
            controller?;
            scanner.map_err(PipelineError::Scanner)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;
    use std::time::Duration;

    use super::*;
    use crate::error::RadioError;
    use crate::reading::DeviceId;
    use crate::testing::{FakeRadio, RecordingSink, advertising_report};

    fn config() -> CollectorConfig {
        let mut config = CollectorConfig::new("lab-1");
        config.window_seconds = NonZeroU32::new(1).unwrap();
        config
    }

    async fn wait_for_frames(radio: &FakeRadio) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while radio.pending_frames() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn frames_in_records_out() {
        let radio = FakeRadio::with_adapters(&[0]);
        radio.push_frame(advertising_report("aa:bb:cc:dd:ee:ff", &[], -40));
        radio.push_frame(vec![0x04, 0x0e]);
        radio.push_frame(advertising_report("11:22:33:44:55:66", &[0x02, 0x01, 0x06], -70));
        let sink = RecordingSink::default();
        let shutdown = CancellationToken::new();

        let pipeline = tokio::spawn(Pipeline::new(config()).run(
            RadioSession::new(radio.clone()),
            sink.clone(),
            shutdown.clone(),
        ));
        wait_for_frames(&radio).await;
        shutdown.cancel();
        pipeline.await.unwrap().unwrap();

        let mut stored: Vec<(DeviceId, f64)> = sink
            .records()
            .into_iter()
            .map(|r| (r.device_id, r.mean_signal_strength))
            .collect();
        stored.sort_by_key(|(id, _)| *id);
        assert_eq!(
            stored,
            vec![
                ("11:22:33:44:55:66".parse().unwrap(), -70.0),
                ("aa:bb:cc:dd:ee:ff".parse().unwrap(), -40.0),
            ]
        );
        assert!(sink.batches().iter().all(|(id, _)| id == "lab-1"));
        assert_eq!(radio.scan_enable_history(), vec![true, false]);
    }

    #[tokio::test]
    async fn missing_adapter_fails_the_pipeline() {
        let radio = FakeRadio::with_adapters(&[]);
        let sink = RecordingSink::default();

        let err = Pipeline::new(config())
            .run(RadioSession::new(radio.clone()), sink.clone(), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Scanner(ScannerError::Radio(RadioError::NoDevice))
        ));
        assert!(radio.opened().is_empty());
        assert!(sink.batches().is_empty());
    }

    #[tokio::test]
    async fn persistence_failure_stops_scanning() {
        let radio = FakeRadio::with_adapters(&[0]);
        radio.push_frame(advertising_report("aa:bb:cc:dd:ee:ff", &[], -40));
        let sink = RecordingSink::default();
        sink.fail_always(|| PersistError::Connect(sqlx::Error::PoolClosed));

        let err = tokio::time::timeout(
            Duration::from_secs(10),
            Pipeline::new(config()).run(
                RadioSession::new(radio.clone()),
                sink.clone(),
                CancellationToken::new(),
            ),
        )
        .await
        .unwrap()
        .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Persistence(PersistError::Exhausted { attempts: 2, .. })
        ));
        assert_eq!(sink.resets(), 1);
        assert_eq!(radio.scan_enable_history(), vec![true, false]);
    }

    #[tokio::test]
    async fn controller_aggregates_each_window() {
        let (raw_tx, raw_rx) = mpsc::channel(4);
        let (aggregated_tx, mut aggregated_rx) = mpsc::channel(4);
        let mut raw = RawBatch::new(chrono::Utc::now());
        for signal_strength in [-40, -44, -42] {
            raw.push(crate::reading::Reading {
                device_id: "aa:bb:cc:dd:ee:ff".parse().unwrap(),
                signal_strength,
                captured_at: raw.window_start,
            });
        }
        raw_tx.send(raw).await.unwrap();
        raw_tx.send(RawBatch::new(chrono::Utc::now())).await.unwrap();
        drop(raw_tx);

        run_controller(raw_rx, aggregated_tx).await;

        let first = aggregated_rx.recv().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first.records().next().unwrap().mean_signal_strength, -42.0);
        assert!(aggregated_rx.recv().await.unwrap().is_empty());
        assert!(aggregated_rx.recv().await.is_none());
    }

    #[test]
    fn closed_channel_ranks_below_persistence_failure() {
        let result = settle(
            Ok(Err(ScannerError::ChannelClosed)),
            Ok(()),
            Ok(Err(PersistError::Connect(sqlx::Error::PoolClosed))),
        );

        assert!(matches!(result, Err(PipelineError::Persistence(_))));
    }
}
