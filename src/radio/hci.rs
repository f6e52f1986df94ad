//! HCI packet layouts used by the scan session.
//!
//! Only the handful of commands and events needed for passive advertisement
//! capture are modelled: LE Set Scan Parameters, LE Set Scan Enable, their
//! Command Complete / Command Status answers, and LE Advertising Reports.

use crate::error::ConfigError;

pub const HCI_COMMAND_PACKET: u8 = 0x01;
pub const HCI_EVENT_PACKET: u8 = 0x04;

pub const EVT_CMD_COMPLETE: u8 = 0x0e;
pub const EVT_CMD_STATUS: u8 = 0x0f;
pub const EVT_LE_META_EVENT: u8 = 0x3e;

pub const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000b;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000c;

pub const LE_SET_SCAN_PARAMETERS: u16 = opcode(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS);
pub const LE_SET_SCAN_ENABLE: u16 = opcode(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE);

/// Scan interval and window bounds, in 0.625 ms units.
pub const SCAN_TIMING_RANGE: std::ops::RangeInclusive<u16> = 0x0004..=0x4000;

const OWN_ADDRESS_PUBLIC: u8 = 0x00;
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

pub const fn opcode(ogf: u16, ocf: u16) -> u16 {
    (ogf << 10) | ocf
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ScanType {
    /// Listen only; never send scan requests.
    #[default]
    Passive,

    Active,
}

impl ScanType {
    fn as_u8(self) -> u8 {
        match self {
            ScanType::Passive => 0x00,
            ScanType::Active => 0x01,
        }
    }
}

/// Controller scan timing. `interval` and `window` are in 0.625 ms units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanParameters {
    pub scan_type: ScanType,

    pub interval: u16,

    pub window: u16,
}

impl Default for ScanParameters {
    fn default() -> Self {
        Self {
            scan_type: ScanType::Passive,
            interval: 0x0010,
            window: 0x0010,
        }
    }
}

impl ScanParameters {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [("interval", self.interval), ("window", self.window)] {
            if !SCAN_TIMING_RANGE.contains(&value) {
                return Err(ConfigError::ScanTimingOutOfRange { field, value });
            }
        }

        if self.window > self.interval {
            return Err(ConfigError::ScanWindowExceedsInterval {
                window: self.window,
                interval: self.interval,
            });
        }

        Ok(())
    }
}

/// Socket-level HCI filter (`struct hci_ufilter`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HciFilter {
    pub type_mask: u32,

    pub event_mask: [u32; 2],

    /// Zero passes events for every opcode.
    pub opcode: u16,
}

impl HciFilter {
    /// Size of `struct hci_ufilter` including trailing padding.
    pub const WIRE_LEN: usize = 16;

    /// Passes LE meta events plus the command answers the session waits on.
    pub fn le_advertising() -> Self {
        Self::default()
            .with_packet_type(HCI_EVENT_PACKET)
            .with_event(EVT_CMD_COMPLETE)
            .with_event(EVT_CMD_STATUS)
            .with_event(EVT_LE_META_EVENT)
    }

    pub fn with_packet_type(mut self, packet_type: u8) -> Self {
        self.type_mask |= 1 << (packet_type & 31);
        self
    }

    pub fn with_event(mut self, event: u8) -> Self {
        let bit = event & 63;
        self.event_mask[usize::from(bit >> 5)] |= 1 << (bit & 31);
        self
    }

    /// Mirrors the kernel's per-frame check for the packet and event code.
    pub fn passes(&self, frame: &[u8]) -> bool {
        let Some(&packet_type) = frame.first() else {
            return false;
        };
        if self.type_mask & (1 << (packet_type & 31)) == 0 {
            return false;
        }
        if packet_type != HCI_EVENT_PACKET {
            return true;
        }

        let Some(&event) = frame.get(1) else {
            return false;
        };
        let bit = event & 63;
        self.event_mask[usize::from(bit >> 5)] & (1 << (bit & 31)) != 0
    }

    pub fn to_bytes(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[0..4].copy_from_slice(&self.type_mask.to_ne_bytes());
        out[4..8].copy_from_slice(&self.event_mask[0].to_ne_bytes());
        out[8..12].copy_from_slice(&self.event_mask[1].to_ne_bytes());
        out[12..14].copy_from_slice(&self.opcode.to_le_bytes());
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HciCommand {
    opcode: u16,
    parameters: Vec<u8>,
}

impl HciCommand {
    pub fn new(opcode: u16, parameters: Vec<u8>) -> Self {
        Self { opcode, parameters }
    }

    pub fn le_set_scan_parameters(parameters: &ScanParameters) -> Self {
        let mut p = Vec::with_capacity(7);
        p.push(parameters.scan_type.as_u8());
        p.extend_from_slice(&parameters.interval.to_le_bytes());
        p.extend_from_slice(&parameters.window.to_le_bytes());
        p.push(OWN_ADDRESS_PUBLIC);
        p.push(FILTER_POLICY_ACCEPT_ALL);

        Self::new(LE_SET_SCAN_PARAMETERS, p)
    }

    pub fn le_set_scan_enable(enable: bool, filter_duplicates: bool) -> Self {
        Self::new(
            LE_SET_SCAN_ENABLE,
            vec![u8::from(enable), u8::from(filter_duplicates)],
        )
    }

    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    pub fn parameters(&self) -> &[u8] {
        &self.parameters
    }

    pub fn to_packet(&self) -> Vec<u8> {
        let [lo, hi] = self.opcode.to_le_bytes();
        let mut packet = Vec::with_capacity(4 + self.parameters.len());
        packet.extend_from_slice(&[HCI_COMMAND_PACKET, lo, hi]);
        // Parameter lengths of the commands built here never exceed 255.
        packet.push(self.parameters.len() as u8);
        packet.extend_from_slice(&self.parameters);
        packet
    }
}

/// Controller answer to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandEvent {
    Complete { opcode: u16, status: u8 },

    /// A zero status only means the command is pending.
    Status { opcode: u16, status: u8 },
}

impl CommandEvent {
    pub fn opcode(&self) -> u16 {
        match *self {
            CommandEvent::Complete { opcode, .. } | CommandEvent::Status { opcode, .. } => opcode,
        }
    }

    pub fn parse(frame: &[u8]) -> Option<Self> {
        match frame {
            [HCI_EVENT_PACKET, EVT_CMD_COMPLETE, _, _ncmd, lo, hi, status, ..] => {
                Some(CommandEvent::Complete {
                    opcode: u16::from_le_bytes([*lo, *hi]),
                    status: *status,
                })
            }
            [HCI_EVENT_PACKET, EVT_CMD_STATUS, _, status, _ncmd, lo, hi, ..] => {
                Some(CommandEvent::Status {
                    opcode: u16::from_le_bytes([*lo, *hi]),
                    status: *status,
                })
            }
            _ => None,
        }
    }

    /// Encodes a Command Complete event carrying only a status byte.
    pub fn complete_packet(opcode: u16, status: u8) -> Vec<u8> {
        let [lo, hi] = opcode.to_le_bytes();
        vec![HCI_EVENT_PACKET, EVT_CMD_COMPLETE, 4, 1, lo, hi, status]
    }
}
