//! Provides platform-specific functionality.
//!
//! Each supported operating system exposes USB topology and mount information
//! through a different inventory tool, so each gets its own [`Correlator`]:
//!
//! - [`linux::LinuxCorrelator`] joins udev `usb` and `block` records on their
//!   shared serial number.
//! - [`macos::MacCorrelator`] walks the `system_profiler` USB and storage trees
//!   and joins them on the BSD device name.
//! - [`windows::WindowsCorrelator`] follows each USB drive through its first
//!   partition to its first logical disk with `wmic`.
//!
//! Unlike device access, none of these need OS-specific APIs, so all three are
//! compiled everywhere and [`Platform`] picks one at runtime.

pub mod linux;
pub mod macos;
pub mod windows;

use crate::command::{CommandRunner, SystemRunner};
use crate::config::Config;
use crate::device::UsbDevice;
use anyhow::Result;
use log::debug;
use std::fmt;
use std::sync::OnceLock;

pub use self::linux::LinuxCorrelator;
pub use self::macos::MacCorrelator;
pub use self::windows::WindowsCorrelator;

/// Lists the USB storage devices a host has mounted.
pub trait Correlator {
    /// Enumerates the host afresh and returns every USB device that has both a
    /// serial number and a mount point.
    ///
    /// # Errors
    ///
    /// Fails only when the host inventory cannot be queried at all. Devices that
    /// cannot be correlated are left out of the list instead.
    fn list_devices(&self) -> Result<Vec<UsbDevice>>;
}

/// The operating systems with a dedicated correlator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
}

impl Platform {
    /// Maps an operating system name to its platform.
    ///
    /// Accepts both Rust's `std::env::consts::OS` names and the `win32`/`darwin`
    /// spellings. Anything unrecognised is treated as Linux.
    pub fn from_os_name(os: &str) -> Self {
        match os {
            "windows" | "win32" => Platform::Windows,
            "macos" | "darwin" => Platform::MacOs,
            _ => Platform::Linux,
        }
    }

    /// The platform of the running host.
    pub fn current() -> Self {
        Self::from_os_name(std::env::consts::OS)
    }

    /// Binds the correlator for this platform.
    pub fn correlator<R>(self, config: Config, runner: R) -> Box<dyn Correlator + Send + Sync>
    where
        R: CommandRunner + Send + Sync + 'static,
    {
        match self {
            Platform::Linux => Box::new(LinuxCorrelator::new(config, runner)),
            Platform::MacOs => Box::new(MacCorrelator::new(config, runner)),
            Platform::Windows => Box::new(WindowsCorrelator::new(config, runner)),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::Linux => "linux",
            Platform::MacOs => "macos",
            Platform::Windows => "windows",
        };
        f.write_str(name)
    }
}

/// The correlator for the running host, bound on first use.
pub fn host() -> &'static (dyn Correlator + Send + Sync) {
    static HOST: OnceLock<Box<dyn Correlator + Send + Sync>> = OnceLock::new();

    let correlator = HOST.get_or_init(|| {
        let platform = Platform::current();
        debug!("Binding {} correlator", platform);
        platform.correlator(Config::default(), SystemRunner)
    });
    &**correlator
}
