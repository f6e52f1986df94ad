//! Raw HCI socket adapter for Linux.
//!
//! Opens an `AF_BLUETOOTH`/`BTPROTO_HCI` socket on the raw channel of one
//! controller. Binding requires `CAP_NET_RAW` (typically root), and the
//! controller must not be held exclusively by another process.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::Duration;

use crate::radio::adapter::{AdapterId, SysfsAdapters};
use crate::radio::channel::{HciBackend, HciChannel};
use crate::radio::hci::{HciCommand, HciFilter};

const BTPROTO_HCI: libc::c_int = 1;
const SOL_HCI: libc::c_int = 0;
const HCI_FILTER: libc::c_int = 2;
const HCI_CHANNEL_RAW: u16 = 0;

#[repr(C)]
struct SockaddrHci {
    hci_family: libc::sa_family_t,
    hci_dev: u16,
    hci_channel: u16,
}

/// Controllers discovered through sysfs, opened as raw HCI sockets.
#[derive(Debug, Clone, Default)]
pub struct LinuxHci {
    adapters: SysfsAdapters,
}

impl LinuxHci {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapters(adapters: SysfsAdapters) -> Self {
        Self { adapters }
    }
}

impl HciBackend for LinuxHci {
    type Channel = HciSocket;

    fn default_adapter(&self) -> io::Result<Option<AdapterId>> {
        self.adapters.default_adapter()
    }

    fn open(&self, adapter: AdapterId) -> io::Result<HciSocket> {
        HciSocket::open(adapter)
    }
}

#[derive(Debug)]
pub struct HciSocket {
    fd: OwnedFd,
}

impl HciSocket {
    pub fn open(adapter: AdapterId) -> io::Result<Self> {
        let raw = unsafe {
            libc::socket(
                libc::AF_BLUETOOTH,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                BTPROTO_HCI,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `raw` is a freshly created descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let addr = SockaddrHci {
            hci_family: libc::AF_BLUETOOTH as libc::sa_family_t,
            hci_dev: adapter.index(),
            hci_channel: HCI_CHANNEL_RAW,
        };
        let result = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                std::ptr::from_ref(&addr).cast::<libc::sockaddr>(),
                size_of::<SockaddrHci>() as libc::socklen_t,
            )
        };
        if result < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self { fd })
    }
}

impl HciChannel for HciSocket {
    fn set_filter(&mut self, filter: &HciFilter) -> io::Result<()> {
        let bytes = filter.to_bytes();
        let result = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                SOL_HCI,
                HCI_FILTER,
                bytes.as_ptr().cast::<libc::c_void>(),
                bytes.len() as libc::socklen_t,
            )
        };
        if result < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    fn write_command(&mut self, command: &HciCommand) -> io::Result<()> {
        let packet = command.to_packet();
        loop {
            let written = unsafe {
                libc::write(
                    self.fd.as_raw_fd(),
                    packet.as_ptr().cast::<libc::c_void>(),
                    packet.len(),
                )
            };
            if written < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            // HCI sockets accept a packet whole or not at all.
            if written as usize != packet.len() {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "short write on HCI socket",
                ));
            }
            return Ok(());
        }
    }

    fn read_frame(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        let fd = self.fd.as_raw_fd();

        let mut pollfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = i32::try_from(timeout.as_micros().div_ceil(1000)).unwrap_or(i32::MAX);

        let result = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if result < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(None);
            }
            return Err(err);
        }
        if result == 0 || pollfd.revents & libc::POLLIN == 0 {
            if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "HCI socket reported an error condition",
                ));
            }
            return Ok(None);
        }

        let read = unsafe { libc::read(fd, buf.as_mut_ptr().cast::<libc::c_void>(), buf.len()) };
        if read < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => Ok(None),
                _ => Err(err),
            };
        }

        Ok(Some(read as usize))
    }
}
