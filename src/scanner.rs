use std::num::NonZeroU32;
use std::time::Duration;

use chrono::{DateTime, SubsecRound as _, TimeDelta, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::advertisement::decode;
use crate::error::{RadioError, ScannerError};
use crate::radio::{ActiveScan, HciBackend, RadioSession, ScanParameters};
use crate::reading::RawBatch;

/// Longest single wait for a frame, so shutdown is noticed promptly.
pub const MAX_READ_TIMEOUT: Duration = Duration::from_millis(250);

/// Captures advertisements into fixed wall-clock windows.
pub struct Scanner<B: HciBackend> {
    session: RadioSession<B>,
    window_seconds: NonZeroU32,
    parameters: ScanParameters,
}

impl<B: HciBackend> Scanner<B> {
    pub fn new(
        session: RadioSession<B>,
        window_seconds: NonZeroU32,
        parameters: ScanParameters,
    ) -> Self {
        Self {
            session,
            window_seconds,
            parameters,
        }
    }

    pub fn session(&self) -> &RadioSession<B> {
        &self.session
    }

    /// Acquires the adapter and prepares the channel for scanning.
    pub fn initialize(&mut self) -> Result<(), RadioError> {
        let adapter = self.session.acquire_device()?;
        self.session.open_channel()?;
        self.session.install_filter()?;
        self.session.configure_scan_parameters(&self.parameters)?;

        info!(%adapter, window_seconds = self.window_seconds.get(), "radio session ready");

        Ok(())
    }

    /// Scans until `shutdown` is cancelled, sending one batch per window.
    ///
    /// On cancellation the partially filled window is still sent. Scanning is
    /// disabled on every exit path.
    pub fn run(
        &mut self,
        tx: &mpsc::Sender<RawBatch>,
        shutdown: &CancellationToken,
    ) -> Result<(), ScannerError> {
        let mut scan = self.session.start_scan()?;

        loop {
            let batch = capture_window(&mut scan, self.window_seconds, shutdown)?;
            let cancelled = shutdown.is_cancelled();

            if tx.blocking_send(batch).is_err() {
                return Err(ScannerError::ChannelClosed);
            }
            if cancelled {
                break;
            }
        }

        scan.stop()?;

        Ok(())
    }
}

/// End of the window opened at `window_start`.
pub fn window_deadline(window_start: DateTime<Utc>, window_seconds: NonZeroU32) -> DateTime<Utc> {
    window_start.trunc_subsecs(0) + TimeDelta::seconds(i64::from(window_seconds.get()))
}

/// Timestamp for a frame read in the window ending at `deadline`.
///
/// A read that returns after the deadline passed still belongs to the window
/// it was waited for, so its time is held just short of the deadline.
pub fn capture_time(now: DateTime<Utc>, deadline: DateTime<Utc>) -> DateTime<Utc> {
    now.min(deadline - TimeDelta::nanoseconds(1))
}

/// Reads and decodes frames until the window closes or `shutdown` fires.
///
/// Frames that fail to decode are dropped.
pub fn capture_window<B: HciBackend>(
    scan: &mut ActiveScan<'_, B>,
    window_seconds: NonZeroU32,
    shutdown: &CancellationToken,
) -> Result<RawBatch, RadioError> {
    let window_start = Utc::now();
    let deadline = window_deadline(window_start, window_seconds);
    let mut batch = RawBatch::new(window_start);
    let mut discarded = 0u32;

    while !shutdown.is_cancelled() {
        let Ok(remaining) = (deadline - Utc::now()).to_std() else {
            break;
        };
        if remaining.is_zero() {
            break;
        }

        let Some(frame) = scan.read_raw_frame(remaining.min(MAX_READ_TIMEOUT))? else {
            continue;
        };

        match decode(&frame, capture_time(Utc::now(), deadline)) {
            Ok(reading) => batch.push(reading),
            Err(err) => {
                discarded += 1;
                trace!(error = %err, len = frame.len(), "discarding frame");
            }
        }
    }

    debug!(
        window_start = %batch.window_start,
        readings = batch.len(),
        discarded,
        "window closed"
    );

    Ok(batch)
}
