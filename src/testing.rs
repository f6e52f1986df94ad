//! Test doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::aggregate::{AggregatedBatch, AggregatedRecord};
use crate::error::PersistError;
use crate::persistence::RecordSink;
use crate::radio::hci::{
    CommandEvent, EVT_LE_ADVERTISING_REPORT, EVT_LE_META_EVENT, HCI_EVENT_PACKET, HciCommand,
    HciFilter, LE_SET_SCAN_ENABLE,
};
use crate::radio::{AdapterId, HciBackend, HciChannel};
use crate::reading::DeviceId;

/// Encodes an LE Advertising Report event for `address` (colon-hex, display order).
pub(crate) fn advertising_report(address: &str, data: &[u8], rssi: i8) -> Vec<u8> {
    let id: DeviceId = address.parse().unwrap();
    let mut over_the_air = [0u8; 6];
    over_the_air.copy_from_slice(id.as_bytes());
    over_the_air.reverse();

    let mut frame = vec![
        HCI_EVENT_PACKET,
        EVT_LE_META_EVENT,
        0,
        EVT_LE_ADVERTISING_REPORT,
        1,
        0x00,
        0x00,
    ];
    frame.extend_from_slice(&over_the_air);
    frame.push(data.len() as u8);
    frame.extend_from_slice(data);
    frame.push(rssi as u8);
    frame[2] = (frame.len() - 3) as u8;
    frame
}

enum Inbound {
    Frame(Vec<u8>),
    Failure(io::ErrorKind),
}

#[derive(Default)]
struct RadioState {
    adapters: Vec<AdapterId>,
    open_error: Option<io::ErrorKind>,
    rejected: HashMap<u16, u8>,
    silenced: Vec<u16>,
    opened: Vec<AdapterId>,
    filters: Vec<HciFilter>,
    commands: Vec<HciCommand>,
    answers: VecDeque<Vec<u8>>,
    inbound: VecDeque<Inbound>,
}

/// In-memory controller. Clones share state so tests can inspect what a
/// session did after handing it a clone.
#[derive(Clone, Default)]
pub(crate) struct FakeRadio {
    state: Arc<Mutex<RadioState>>,
}

impl FakeRadio {
    pub(crate) fn with_adapters(indices: &[u16]) -> Self {
        let radio = Self::default();
        radio.state.lock().unwrap().adapters = indices.iter().map(|&i| AdapterId::new(i)).collect();
        radio
    }

    pub(crate) fn fail_open(&self, kind: io::ErrorKind) {
        self.state.lock().unwrap().open_error = Some(kind);
    }

    /// Answers `opcode` with a non-zero status.
    pub(crate) fn reject(&self, opcode: u16, status: u8) {
        self.state.lock().unwrap().rejected.insert(opcode, status);
    }

    /// Never answers `opcode`.
    pub(crate) fn silence(&self, opcode: u16) {
        self.state.lock().unwrap().silenced.push(opcode);
    }

    pub(crate) fn push_frame(&self, frame: Vec<u8>) {
        self.state
            .lock()
            .unwrap()
            .inbound
            .push_back(Inbound::Frame(frame));
    }

    pub(crate) fn push_failure(&self, kind: io::ErrorKind) {
        self.state
            .lock()
            .unwrap()
            .inbound
            .push_back(Inbound::Failure(kind));
    }

    pub(crate) fn pending_frames(&self) -> usize {
        self.state.lock().unwrap().inbound.len()
    }

    pub(crate) fn opened(&self) -> Vec<AdapterId> {
        self.state.lock().unwrap().opened.clone()
    }

    pub(crate) fn filters(&self) -> Vec<HciFilter> {
        self.state.lock().unwrap().filters.clone()
    }

    pub(crate) fn opcodes(&self) -> Vec<u16> {
        self.state
            .lock()
            .unwrap()
            .commands
            .iter()
            .map(HciCommand::opcode)
            .collect()
    }

    /// `true`/`false` for each scan enable/disable command, in order.
    pub(crate) fn scan_enable_history(&self) -> Vec<bool> {
        self.state
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter(|c| c.opcode() == LE_SET_SCAN_ENABLE)
            .map(|c| c.parameters()[0] == 1)
            .collect()
    }
}

impl HciBackend for FakeRadio {
    type Channel = FakeChannel;

    fn default_adapter(&self) -> io::Result<Option<AdapterId>> {
        Ok(self.state.lock().unwrap().adapters.iter().min().copied())
    }

    fn open(&self, adapter: AdapterId) -> io::Result<FakeChannel> {
        let mut state = self.state.lock().unwrap();
        if let Some(kind) = state.open_error {
            return Err(io::Error::from(kind));
        }
        state.opened.push(adapter);

        Ok(FakeChannel {
            state: Arc::clone(&self.state),
        })
    }
}

pub(crate) struct FakeChannel {
    state: Arc<Mutex<RadioState>>,
}

impl HciChannel for FakeChannel {
    fn set_filter(&mut self, filter: &HciFilter) -> io::Result<()> {
        self.state.lock().unwrap().filters.push(*filter);
        Ok(())
    }

    fn write_command(&mut self, command: &HciCommand) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.commands.push(command.clone());

        let opcode = command.opcode();
        if !state.silenced.contains(&opcode) {
            let status = state.rejected.get(&opcode).copied().unwrap_or(0);
            state
                .answers
                .push_back(CommandEvent::complete_packet(opcode, status));
        }

        Ok(())
    }

    fn read_frame(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        let next = {
            let mut state = self.state.lock().unwrap();
            match state.answers.pop_front() {
                Some(answer) => Some(Inbound::Frame(answer)),
                None => state.inbound.pop_front(),
            }
        };

        match next {
            Some(Inbound::Frame(frame)) => {
                let len = frame.len().min(buf.len());
                buf[..len].copy_from_slice(&frame[..len]);
                Ok(Some(len))
            }
            Some(Inbound::Failure(kind)) => Err(io::Error::from(kind)),
            None => {
                std::thread::sleep(timeout.min(Duration::from_millis(2)));
                Ok(None)
            }
        }
    }
}

#[derive(Default)]
struct SinkState {
    batches: Vec<(String, AggregatedBatch)>,
    failures: VecDeque<PersistError>,
    always_fail: Option<fn() -> PersistError>,
    resets: usize,
}

/// Sink that keeps every batch in memory and can fail on demand.
#[derive(Clone, Default)]
pub(crate) struct RecordingSink {
    state: Arc<Mutex<SinkState>>,
}

impl RecordingSink {
    pub(crate) fn fail_next(&self, err: PersistError) {
        self.state.lock().unwrap().failures.push_back(err);
    }

    pub(crate) fn fail_always(&self, make: fn() -> PersistError) {
        self.state.lock().unwrap().always_fail = Some(make);
    }

    pub(crate) fn batches(&self) -> Vec<(String, AggregatedBatch)> {
        self.state.lock().unwrap().batches.clone()
    }

    pub(crate) fn records(&self) -> Vec<AggregatedRecord> {
        self.state
            .lock()
            .unwrap()
            .batches
            .iter()
            .flat_map(|(_, batch)| batch.records().cloned().collect::<Vec<_>>())
            .collect()
    }

    pub(crate) fn resets(&self) -> usize {
        self.state.lock().unwrap().resets
    }
}

#[async_trait]
impl RecordSink for RecordingSink {
    async fn write_batch(
        &mut self,
        installation_id: &str,
        batch: &AggregatedBatch,
    ) -> Result<(), PersistError> {
        let mut state = self.state.lock().unwrap();
        if let Some(make) = state.always_fail {
            return Err(make());
        }
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }
        state
            .batches
            .push((installation_id.to_string(), batch.clone()));
        Ok(())
    }

    async fn reset(&mut self) {
        self.state.lock().unwrap().resets += 1;
    }
}
