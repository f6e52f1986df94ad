mod adapter;
mod channel;
pub mod hci;
mod session;
#[cfg(target_os = "linux")]
mod socket;

pub use adapter::*;
pub use channel::*;
pub use hci::{ScanParameters, ScanType};
pub use session::*;
#[cfg(target_os = "linux")]
pub use socket::*;
