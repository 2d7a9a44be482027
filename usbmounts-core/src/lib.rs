//! The core, UI-agnostic library for the `usbmounts` utility.
//!
//! `usbmounts-core` answers one question on Linux, macOS and Windows alike:
//! which USB storage devices are attached, and where are they mounted? Each
//! platform exposes USB topology and mounts through a different inventory tool,
//! so the library pairs every platform with a correlator that joins the two
//! views on whatever key that platform offers.
//!
//! The library is structured into several key modules:
//! - [`device`]: Contains the cross-platform `UsbDevice` result.
//! - [`platform`]: The `Correlator` contract, the three platform correlators and
//!   the selector that binds one of them to the running host.
//! - [`command`]: The `CommandRunner` seam through which correlators run the
//!   host's inventory tools.
//! - [`config`]: Tool paths and the Linux mount-resolution strategy.
//! - [`error`]: The `QueryError` raised when an inventory query fails.
//!
//! The primary entry point is [`list_devices`]. Every call enumerates the host
//! afresh; nothing is cached between calls.
//!
//! ## Example: Listing Mounted USB Drives
//!
//! ```rust,no_run
//! use anyhow::Result;
//!
//! fn main() -> Result<()> {
//!     for device in usbmounts_core::list_devices()? {
//!         println!("{} is mounted at {}", device.serial_number, device.mount_point);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! A front-end that needs different settings binds a correlator itself:
//!
//! ```rust,no_run
//! use usbmounts_core::command::SystemRunner;
//! use usbmounts_core::config::{Config, LinuxMount};
//! use usbmounts_core::platform::{Correlator, Platform};
//!
//! let config = Config::default().with_linux_mount(LinuxMount::Label);
//! let correlator = Platform::current().correlator(config, SystemRunner);
//! let devices = correlator.list_devices()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod platform;

pub use device::UsbDevice;
pub use error::QueryError;

use anyhow::Result;

/// Lists the USB storage devices currently attached to this host and mounted.
///
/// The correlator for the host is chosen on the first call and reused after.
/// Devices without a serial number or without a mount point are left out, so
/// the list may be empty.
///
/// # Errors
///
/// Returns an error if the host's inventory tool cannot be run or its output
/// cannot be read at all. See [`QueryError`].
pub fn list_devices() -> Result<Vec<UsbDevice>> {
    platform::host().list_devices()
}
