use std::num::{NonZeroU32, NonZeroUsize};
use std::path::PathBuf;

use clap::Parser;
use rssi_collector::{
    config::{CollectorConfig, TableName},
    error::ConfigError,
    logging::LogFormat,
    radio::{AdapterId, ScanParameters, ScanType},
};

/// Averages BLE advertisement RSSI per device and window, and stores the result.
#[derive(Debug, Parser)]
#[command(version)]
pub struct Args {
    /// Identifies this sensor in stored rows.
    #[arg(long, env = "INSTALLATION_ID")]
    pub installation_id: String,

    #[arg(long, env = "WINDOW_SECONDS", default_value = "3")]
    pub window_seconds: NonZeroU32,

    #[arg(
        long,
        env = "DATABASE_URL",
        required_unless_present_any = ["dry_run", "sqlite_path"]
    )]
    pub database_url: Option<String>,

    /// Write to a local SQLite file instead of PostgreSQL.
    #[arg(long, env = "SQLITE_PATH", conflicts_with_all = ["dry_run", "database_url"])]
    pub sqlite_path: Option<PathBuf>,

    #[arg(long, env = "DATABASE_TABLE", default_value = "rssi_readings")]
    pub database_table: TableName,

    /// Controller to scan with, e.g. `hci0`. Defaults to the lowest-numbered one.
    #[arg(long, env = "HCI_ADAPTER")]
    pub adapter: Option<AdapterId>,

    #[arg(long, env = "SCAN_TYPE", value_enum, default_value_t)]
    pub scan_type: ScanType,

    /// Scan interval in 0.625 ms units.
    #[arg(long, env = "SCAN_INTERVAL", default_value = "16")]
    pub scan_interval: u16,

    /// Scan window in 0.625 ms units; must not exceed the interval.
    #[arg(long, env = "SCAN_WINDOW", default_value = "16")]
    pub scan_window: u16,

    /// Batches buffered between pipeline stages.
    #[arg(long, env = "CHANNEL_CAPACITY", default_value = "64")]
    pub channel_capacity: NonZeroUsize,

    /// Write attempts per batch before giving up.
    #[arg(long, env = "MAX_WRITE_ATTEMPTS", default_value = "2")]
    pub max_write_attempts: NonZeroU32,

    /// Log records instead of writing them to the database.
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t)]
    pub log_format: LogFormat,
}

impl Args {
    pub fn collector_config(&self) -> Result<CollectorConfig, ConfigError> {
        let config = CollectorConfig {
            installation_id: self.installation_id.clone(),
            window_seconds: self.window_seconds,
            scan_parameters: ScanParameters {
                scan_type: self.scan_type,
                interval: self.scan_interval,
                window: self.scan_window,
            },
            adapter: self.adapter,
            channel_capacity: self.channel_capacity,
            max_write_attempts: self.max_write_attempts,
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory as _;

    use super::*;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("rssi-collector").chain(args.iter().copied()))
    }

    #[test]
    fn command_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn dry_run_needs_no_database() {
        let args = parse(&["--installation-id", "lab-1", "--dry-run"]).unwrap();
        let config = args.collector_config().unwrap();

        assert!(args.database_url.is_none());
        assert_eq!(config.window_seconds.get(), 3);
        assert_eq!(config.scan_parameters, ScanParameters::default());
        assert_eq!(args.database_table.as_str(), "rssi_readings");
    }

    #[test]
    fn parses_adapter_and_scan_settings() {
        let args = parse(&[
            "--installation-id",
            "lab-1",
            "--dry-run",
            "--adapter",
            "hci1",
            "--scan-type",
            "active",
            "--scan-interval",
            "96",
            "--scan-window",
            "48",
        ])
        .unwrap();
        let config = args.collector_config().unwrap();

        assert_eq!(config.adapter, Some(AdapterId::new(1)));
        assert_eq!(config.scan_parameters.scan_type, ScanType::Active);
        assert_eq!(config.scan_parameters.interval, 96);
        assert_eq!(config.scan_parameters.window, 48);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(
            parse(&["--installation-id", "lab-1", "--dry-run", "--window-seconds", "0"]).is_err()
        );
        assert!(parse(&["--installation-id", "lab-1", "--dry-run", "--adapter", "usb0"]).is_err());
        assert!(
            parse(&["--installation-id", "lab-1", "--dry-run", "--database-table", "x;y"]).is_err()
        );
    }

    #[test]
    fn sqlite_path_replaces_database_url() {
        let args = parse(&["--installation-id", "lab-1", "--sqlite-path", "/tmp/rssi.db"]).unwrap();

        assert_eq!(args.sqlite_path, Some(PathBuf::from("/tmp/rssi.db")));
        assert!(args.database_url.is_none());
        assert!(
            parse(&["--installation-id", "lab-1", "--sqlite-path", "a.db", "--dry-run"]).is_err()
        );
    }

    #[test]
    fn window_wider_than_interval_is_a_config_error() {
        let args = parse(&[
            "--installation-id",
            "lab-1",
            "--dry-run",
            "--scan-window",
            "32",
        ])
        .unwrap();

        assert_eq!(
            args.collector_config(),
            Err(ConfigError::ScanWindowExceedsInterval {
                window: 32,
                interval: 16
            })
        );
    }
}
