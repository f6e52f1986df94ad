//! Error types for the collector.
//!
//! Radio session faults ([`RadioError`]) are fatal to the scanner and are
//! never retried: the controller's state is unknown at that point. Frame
//! decode faults ([`DecodeError`]) only cost the offending frame. Persistence
//! faults ([`PersistError`]) are retried according to the persistence worker's
//! policy and surface once retries run out.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::radio::{AdapterId, SessionState};

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("no Bluetooth adapter found. Ensure the controller is present and its driver is loaded.")]
    NoDevice,

    #[error("Bluetooth adapter {adapter} is unavailable (permission denied or busy?)")]
    DeviceUnavailable {
        adapter: AdapterId,
        #[source]
        source: io::Error,
    },

    #[error("failed to install capture filter on {adapter}")]
    Filter {
        adapter: AdapterId,
        #[source]
        source: io::Error,
    },

    #[error("failed to set scan parameters on {adapter}. Are you root? Is another process already scanning?")]
    ScanConfiguration {
        adapter: AdapterId,
        #[source]
        source: CommandError,
    },

    #[error("failed to {} scanning on {adapter}", toggle_verb(.enable))]
    ScanToggle {
        adapter: AdapterId,
        enable: bool,
        #[source]
        source: CommandError,
    },

    #[error("cannot {operation} while the radio session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("failed to enumerate Bluetooth adapters")]
    Discovery(#[source] io::Error),

    #[error("HCI channel read failed")]
    Io(#[from] io::Error),
}

fn toggle_verb(enable: &bool) -> &'static str {
    if *enable { "enable" } else { "disable" }
}

/// Failure of a single HCI command exchange.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to exchange HCI command")]
    Io(#[from] io::Error),

    #[error("controller did not answer opcode 0x{opcode:04x} within {timeout:?}")]
    Timeout { opcode: u16, timeout: Duration },

    #[error("controller rejected opcode 0x{opcode:04x} with status 0x{status:02x}")]
    Rejected { opcode: u16, status: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("frame too short: expected at least {minimum} bytes, got {actual}")]
    TooShort { minimum: usize, actual: usize },

    #[error("not an HCI event packet: 0x{0:02x}")]
    NotAnEvent(u8),

    #[error("unexpected HCI event: 0x{0:02x}")]
    UnexpectedEvent(u8),

    #[error("unexpected LE meta subevent: 0x{0:02x}")]
    UnexpectedSubevent(u8),

    #[error("advertising data truncated: declared {declared} bytes, frame holds {available}")]
    Truncated { declared: usize, available: usize },
}

#[derive(Debug, Error)]
pub enum ScannerError {
    #[error(transparent)]
    Radio(#[from] RadioError),

    #[error("raw batch channel closed")]
    ChannelClosed,
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to connect to database")]
    Connect(#[source] sqlx::Error),

    #[error("failed to write batch to {table}")]
    Write {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to persist batch after {attempts} attempts")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<PersistError>,
    },
}

impl PersistError {
    /// Whether reconnecting may fix the fault.
    pub fn is_retryable(&self) -> bool {
        match self {
            PersistError::Connect(_) => true,
            PersistError::Write { source, .. } => is_connection_error(source),
            PersistError::Exhausted { .. } => false,
        }
    }
}

fn is_connection_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("installation id must not be empty")]
    EmptyInstallationId,

    #[error("invalid adapter name {0:?}: expected hciN")]
    InvalidAdapter(String),

    #[error("invalid table name {0:?}: expected an SQL identifier such as rssi_readings or sensors.rssi_readings")]
    InvalidTable(String),

    #[error("scan {field} 0x{value:04x} is outside 0x0004..=0x4000")]
    ScanTimingOutOfRange { field: &'static str, value: u16 },

    #[error("scan window 0x{window:04x} exceeds scan interval 0x{interval:04x}")]
    ScanWindowExceedsInterval { window: u16, interval: u16 },

    #[error("a database url or sqlite path is required unless running with --dry-run")]
    MissingDatabaseUrl,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("scanner failed")]
    Scanner(#[source] ScannerError),

    #[error("persistence failed")]
    Persistence(#[source] PersistError),

    #[error("{worker} worker panicked or was aborted")]
    Worker {
        worker: &'static str,
        #[source]
        source: tokio::task::JoinError,
    },
}
