use std::io;
use std::time::Duration;

use crate::radio::adapter::AdapterId;
use crate::radio::hci::{HciCommand, HciFilter};

/// Access to the host's Bluetooth controllers.
pub trait HciBackend: Send {
    type Channel: HciChannel;

    /// `Ok(None)` when the host has no controller.
    fn default_adapter(&self) -> io::Result<Option<AdapterId>>;

    fn open(&self, adapter: AdapterId) -> io::Result<Self::Channel>;
}

/// A raw HCI channel bound to one controller.
pub trait HciChannel: Send {
    fn set_filter(&mut self, filter: &HciFilter) -> io::Result<()>;

    fn write_command(&mut self, command: &HciCommand) -> io::Result<()>;

    /// Reads one packet into `buf`, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    fn read_frame(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>>;
}
