use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;

const SYSFS_BLUETOOTH_CLASS: &str = "/sys/class/bluetooth";

/// Kernel index of a Bluetooth controller (`hci0`, `hci1`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AdapterId(u16);

impl AdapterId {
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    pub const fn index(self) -> u16 {
        self.0
    }
}

impl fmt::Display for AdapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hci{}", self.0)
    }
}

impl FromStr for AdapterId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix("hci")
            .filter(|index| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|index| index.parse().ok())
            .map(Self)
            .ok_or_else(|| ConfigError::InvalidAdapter(s.to_string()))
    }
}

/// Lists controllers registered under `/sys/class/bluetooth`.
#[derive(Debug, Clone)]
pub struct SysfsAdapters {
    root: PathBuf,
}

impl Default for SysfsAdapters {
    fn default() -> Self {
        Self::new(SYSFS_BLUETOOTH_CLASS)
    }
}

impl SysfsAdapters {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn list(&self) -> io::Result<Vec<AdapterId>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let mut adapters = Vec::new();
        for entry in entries {
            let entry = entry?;
            // Connection entries such as `hci0:64` fail to parse and are skipped.
            if let Some(id) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
                adapters.push(id);
            }
        }
        adapters.sort();

        Ok(adapters)
    }

    /// Lowest-numbered controller, matching the BlueZ default route.
    pub fn default_adapter(&self) -> io::Result<Option<AdapterId>> {
        Ok(self.list()?.into_iter().next())
    }
}
