use chrono::{DateTime, Utc};

use crate::error::DecodeError;
use crate::radio::hci::{EVT_LE_ADVERTISING_REPORT, EVT_LE_META_EVENT, HCI_EVENT_PACKET};
use crate::reading::{DeviceId, Reading};

// Offsets into an HCI event packet carrying one LE Advertising Report.
const PACKET_TYPE_OFFSET: usize = 0;
const EVENT_CODE_OFFSET: usize = 1;
const SUBEVENT_OFFSET: usize = 3;
const ADDRESS_OFFSET: usize = 7;
const ADDRESS_LEN: usize = 6;
const DATA_LEN_OFFSET: usize = ADDRESS_OFFSET + ADDRESS_LEN;

/// Header, address, data length byte and trailing RSSI byte.
pub const MIN_FRAME_LEN: usize = DATA_LEN_OFFSET + 2;

/// Decodes an advertising report frame captured at `captured_at`.
///
/// The device address sits at bytes 7..13 least significant byte first; the
/// RSSI is the last byte of the frame, a signed dBm value.
pub fn decode(frame: &[u8], captured_at: DateTime<Utc>) -> Result<Reading, DecodeError> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(DecodeError::TooShort {
            minimum: MIN_FRAME_LEN,
            actual: frame.len(),
        });
    }

    let packet_type = frame[PACKET_TYPE_OFFSET];
    if packet_type != HCI_EVENT_PACKET {
        return Err(DecodeError::NotAnEvent(packet_type));
    }

    let event_code = frame[EVENT_CODE_OFFSET];
    if event_code != EVT_LE_META_EVENT {
        return Err(DecodeError::UnexpectedEvent(event_code));
    }

    let subevent = frame[SUBEVENT_OFFSET];
    if subevent != EVT_LE_ADVERTISING_REPORT {
        return Err(DecodeError::UnexpectedSubevent(subevent));
    }

    let declared = usize::from(frame[DATA_LEN_OFFSET]);
    let available = frame.len() - MIN_FRAME_LEN;
    if available < declared {
        return Err(DecodeError::Truncated {
            declared,
            available,
        });
    }

    let mut address = [0u8; ADDRESS_LEN];
    address.copy_from_slice(&frame[ADDRESS_OFFSET..DATA_LEN_OFFSET]);

    let rssi = frame[frame.len() - 1];

    Ok(Reading {
        device_id: DeviceId::from_le_bytes(address),
        signal_strength: i8::from_le_bytes([rssi]),
        captured_at,
    })
}
