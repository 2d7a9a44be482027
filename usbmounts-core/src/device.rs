use serde::Serialize;
use std::fmt;

/// A USB storage device that the host has mounted.
///
/// Only devices with both a hardware serial number and a mount point are ever
/// reported. The platform correlators in [`crate::platform`] build these from
/// the host's USB and storage inventories.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsbDevice {
    /// The hardware serial number reported by the device (e.g. "4C530001230915117203").
    pub serial_number: String,
    /// Where the device's volume is accessible (e.g. `/media/usb`, `/Volumes/X` or `E:`).
    ///
    /// With [`crate::config::LinuxMount::Label`] this is the filesystem label instead.
    pub mount_point: String,
}

impl UsbDevice {
    pub fn new(serial_number: impl Into<String>, mount_point: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            mount_point: mount_point.into(),
        }
    }
}

impl fmt::Display for UsbDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<24} {}", self.serial_number, self.mount_point)
    }
}
