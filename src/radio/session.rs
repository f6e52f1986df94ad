//! Lifecycle of one scan session on one controller.
//!
//! ```text
//! Uninitialized -> DeviceAcquired -> ChannelOpen -> Filtered -> Configured -> Scanning <-> Stopped
//! ```
//!
//! Scanning is started through [`RadioSession::start_scan`], which returns an
//! [`ActiveScan`] guard. Dropping the guard disables scanning, so the
//! controller is switched back off however the capture loop ends.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{CommandError, RadioError};
use crate::radio::adapter::AdapterId;
use crate::radio::channel::{HciBackend, HciChannel};
use crate::radio::hci::{CommandEvent, HciCommand, HciFilter, ScanParameters};

/// Answer deadline for HCI commands.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(1000);

const FRAME_BUFFER_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    DeviceAcquired,
    ChannelOpen,
    Filtered,
    Configured,
    Scanning,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::DeviceAcquired => "device acquired",
            SessionState::ChannelOpen => "channel open",
            SessionState::Filtered => "filtered",
            SessionState::Configured => "configured",
            SessionState::Scanning => "scanning",
            SessionState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

pub struct RadioSession<B: HciBackend> {
    backend: B,
    requested_adapter: Option<AdapterId>,
    adapter: Option<AdapterId>,
    channel: Option<B::Channel>,
    state: SessionState,
    command_timeout: Duration,
    buf: Vec<u8>,
}

impl<B: HciBackend> RadioSession<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            requested_adapter: None,
            adapter: None,
            channel: None,
            state: SessionState::Uninitialized,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            buf: vec![0; FRAME_BUFFER_LEN],
        }
    }

    /// Pins the session to `adapter` instead of the default controller.
    pub fn with_adapter(mut self, adapter: Option<AdapterId>) -> Self {
        self.requested_adapter = adapter;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn adapter(&self) -> Option<AdapterId> {
        self.adapter
    }

    pub fn acquire_device(&mut self) -> Result<AdapterId, RadioError> {
        self.expect_state("acquire a device", &[SessionState::Uninitialized])?;

        let adapter = match self.requested_adapter {
            Some(adapter) => adapter,
            None => self
                .backend
                .default_adapter()
                .map_err(RadioError::Discovery)?
                .ok_or(RadioError::NoDevice)?,
        };

        debug!(%adapter, "acquired Bluetooth adapter");
        self.adapter = Some(adapter);
        self.state = SessionState::DeviceAcquired;

        Ok(adapter)
    }

    pub fn open_channel(&mut self) -> Result<(), RadioError> {
        self.expect_state("open a channel", &[SessionState::DeviceAcquired])?;
        let adapter = self.current_adapter("open a channel")?;

        let channel = self
            .backend
            .open(adapter)
            .map_err(|source| RadioError::DeviceUnavailable { adapter, source })?;

        debug!(%adapter, "opened raw HCI channel");
        self.channel = Some(channel);
        self.state = SessionState::ChannelOpen;

        Ok(())
    }

    pub fn install_filter(&mut self) -> Result<(), RadioError> {
        self.expect_state("install a filter", &[SessionState::ChannelOpen])?;
        let adapter = self.current_adapter("install a filter")?;

        self.channel_mut("install a filter")?
            .set_filter(&HciFilter::le_advertising())
            .map_err(|source| RadioError::Filter { adapter, source })?;

        self.state = SessionState::Filtered;

        Ok(())
    }

    pub fn configure_scan_parameters(
        &mut self,
        parameters: &ScanParameters,
    ) -> Result<(), RadioError> {
        self.expect_state("configure scan parameters", &[SessionState::Filtered])?;
        let adapter = self.current_adapter("configure scan parameters")?;

        self.execute(&HciCommand::le_set_scan_parameters(parameters))
            .map_err(|source| RadioError::ScanConfiguration { adapter, source })?;

        debug!(%adapter, ?parameters, "configured scan parameters");
        self.state = SessionState::Configured;

        Ok(())
    }

    /// Enables scanning. The returned guard disables it again when dropped.
    pub fn start_scan(&mut self) -> Result<ActiveScan<'_, B>, RadioError> {
        self.expect_state(
            "start scanning",
            &[SessionState::Configured, SessionState::Stopped],
        )?;
        let adapter = self.current_adapter("start scanning")?;

        self.execute(&HciCommand::le_set_scan_enable(true, false))
            .map_err(|source| RadioError::ScanToggle {
                adapter,
                enable: true,
                source,
            })?;

        info!(%adapter, "scanning enabled");
        self.state = SessionState::Scanning;

        Ok(ActiveScan {
            session: self,
            stopped: false,
        })
    }

    pub fn stop_scan(&mut self) -> Result<(), RadioError> {
        self.expect_state("stop scanning", &[SessionState::Scanning])?;
        let adapter = self.current_adapter("stop scanning")?;

        self.execute(&HciCommand::le_set_scan_enable(false, false))
            .map_err(|source| RadioError::ScanToggle {
                adapter,
                enable: false,
                source,
            })?;

        info!(%adapter, "scanning disabled");
        self.state = SessionState::Stopped;

        Ok(())
    }

    /// Waits up to `timeout` for the next frame; `Ok(None)` if none arrived.
    pub fn read_raw_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, RadioError> {
        self.expect_state("read a frame", &[SessionState::Scanning])?;

        let state = self.state;
        let Self { channel, buf, .. } = self;
        let Some(channel) = channel.as_mut() else {
            return Err(RadioError::InvalidState {
                operation: "read a frame",
                state,
            });
        };

        Ok(channel
            .read_frame(buf, timeout)?
            .map(|len| buf[..len].to_vec()))
    }

    /// Sends `command` and waits for the matching Command Complete / Status event.
    fn execute(&mut self, command: &HciCommand) -> Result<(), CommandError> {
        let timeout = self.command_timeout;
        let Self { channel, buf, .. } = self;
        let Some(channel) = channel.as_mut() else {
            return Err(CommandError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "HCI channel is not open",
            )));
        };

        let opcode = command.opcode();
        let deadline = Instant::now() + timeout;
        channel.write_command(command)?;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CommandError::Timeout { opcode, timeout });
            }

            let Some(len) = channel.read_frame(buf, remaining)? else {
                continue;
            };

            match CommandEvent::parse(&buf[..len]) {
                Some(CommandEvent::Complete { opcode: op, status }) if op == opcode => {
                    return if status == 0 {
                        Ok(())
                    } else {
                        Err(CommandError::Rejected { opcode, status })
                    };
                }
                Some(CommandEvent::Status { opcode: op, status })
                    if op == opcode && status != 0 =>
                {
                    return Err(CommandError::Rejected { opcode, status });
                }
                // Advertising reports and answers to other commands.
                _ => continue,
            }
        }
    }

    fn expect_state(
        &self,
        operation: &'static str,
        allowed: &[SessionState],
    ) -> Result<(), RadioError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(RadioError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn current_adapter(&self, operation: &'static str) -> Result<AdapterId, RadioError> {
        self.adapter.ok_or(RadioError::InvalidState {
            operation,
            state: self.state,
        })
    }

    fn channel_mut(&mut self, operation: &'static str) -> Result<&mut B::Channel, RadioError> {
        let state = self.state;
        self.channel
            .as_mut()
            .ok_or(RadioError::InvalidState { operation, state })
    }
}

/// Scope of an enabled scan.
pub struct ActiveScan<'a, B: HciBackend> {
    session: &'a mut RadioSession<B>,
    stopped: bool,
}

impl<B: HciBackend> ActiveScan<'_, B> {
    pub fn adapter(&self) -> Option<AdapterId> {
        self.session.adapter()
    }

    pub fn read_raw_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, RadioError> {
        self.session.read_raw_frame(timeout)
    }

    /// Disables scanning and reports the outcome.
    pub fn stop(mut self) -> Result<(), RadioError> {
        self.stopped = true;
        self.session.stop_scan()
    }
}

impl<B: HciBackend> Drop for ActiveScan<'_, B> {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        if let Err(err) = self.session.stop_scan() {
            warn!(error = %err, "failed to disable scanning during teardown");
        }
    }
}
