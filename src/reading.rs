use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use macaddr::MacAddr6;

/// Address of an advertising device.
///
/// Displays as six lowercase colon-separated hex pairs (`aa:bb:cc:dd:ee:ff`),
/// which is also the form stored by the persistence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(MacAddr6);

impl DeviceId {
    pub const fn new(address: MacAddr6) -> Self {
        Self(address)
    }

    /// Builds an id from address bytes in over-the-air order (least significant byte first).
    pub fn from_le_bytes(mut bytes: [u8; 6]) -> Self {
        bytes.reverse();
        Self(MacAddr6::from(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<MacAddr6> for DeviceId {
    fn from(address: MacAddr6) -> Self {
        Self(address)
    }
}

impl FromStr for DeviceId {
    type Err = <MacAddr6 as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0.as_bytes();
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    pub device_id: DeviceId,

    /// Received signal strength in dBm.
    pub signal_strength: i8,

    pub captured_at: DateTime<Utc>,
}

/// Readings captured during one window, in capture order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBatch {
    pub window_start: DateTime<Utc>,

    pub readings: Vec<Reading>,
}

impl RawBatch {
    pub fn new(window_start: DateTime<Utc>) -> Self {
        Self {
            window_start,
            readings: Vec::new(),
        }
    }

    pub fn push(&mut self, reading: Reading) {
        self.readings.push(reading);
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}
