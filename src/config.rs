use std::fmt;
use std::num::{NonZeroU32, NonZeroUsize};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ConfigError;
use crate::persistence::DEFAULT_MAX_WRITE_ATTEMPTS;
use crate::radio::{AdapterId, ScanParameters};

pub const DEFAULT_WINDOW_SECONDS: NonZeroU32 = NonZeroU32::new(3).unwrap();
pub const DEFAULT_CHANNEL_CAPACITY: NonZeroUsize = NonZeroUsize::new(64).unwrap();
pub const DEFAULT_TABLE: &str = "rssi_readings";

static TABLE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}(\.[A-Za-z_][A-Za-z0-9_]{0,62})?$")
        .expect("table name pattern is valid")
});

/// Optionally schema-qualified SQL identifier, safe to splice into a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName(String);

impl TableName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TableName {
    fn default() -> Self {
        Self(DEFAULT_TABLE.to_string())
    }
}

impl FromStr for TableName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if TABLE_NAME.is_match(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(ConfigError::InvalidTable(s.to_string()))
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validated settings for one collector process.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorConfig {
    /// Stored with every row to tell sensors apart.
    pub installation_id: String,

    pub window_seconds: NonZeroU32,

    pub scan_parameters: ScanParameters,

    /// `None` picks the lowest-numbered controller.
    pub adapter: Option<AdapterId>,

    /// Capacity of each inter-stage channel, in batches.
    pub channel_capacity: NonZeroUsize,

    pub max_write_attempts: NonZeroU32,
}

impl CollectorConfig {
    pub fn new(installation_id: impl Into<String>) -> Self {
        Self {
            installation_id: installation_id.into(),
            window_seconds: DEFAULT_WINDOW_SECONDS,
            scan_parameters: ScanParameters::default(),
            adapter: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_write_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.installation_id.trim().is_empty() {
            return Err(ConfigError::EmptyInstallationId);
        }

        self.scan_parameters.validate()
    }
}
