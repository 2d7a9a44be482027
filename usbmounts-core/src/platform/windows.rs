use crate::command::CommandRunner;
use crate::config::Config;
use crate::device::UsbDevice;
use crate::platform::Correlator;
use anyhow::{Context, Result};
use log::{debug, trace};
use std::collections::HashMap;

const NAMESPACE: &str = r"/NAMESPACE:\\root\cimv2";
const NODE: &str = "/NODE:127.0.0.1";

/// One instance from `wmic ... /FORMAT:list` or `ASSOC:list` output.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WmiObject {
    properties: HashMap<String, String>,
}

impl WmiObject {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn device_id(&self) -> Option<&str> {
        self.get("DeviceID").filter(|id| !id.is_empty())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for WmiObject {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            properties: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

/// Parses `wmic` list output into one object per block.
///
/// `wmic` ends lines with `\r\r\n` and separates instances with blank lines.
/// Each line is split at its first `=`; lines without one are ignored, as are
/// blocks that yield no property at all.
pub fn parse_list(text: &str) -> Vec<WmiObject> {
    let mut objects = Vec::new();
    let mut current = WmiObject::default();

    for line in text.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            if !current.properties.is_empty() {
                objects.push(std::mem::take(&mut current));
            }
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            current
                .properties
                .insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    if !current.properties.is_empty() {
        objects.push(current);
    }

    objects
}

/// Escapes a value for use inside a WQL string literal.
fn escape_wql(value: &str) -> String {
    value.replace('\\', r"\\")
}

/// Follows each USB disk drive through its first partition to its first
/// logical disk.
pub struct WindowsCorrelator<R> {
    config: Config,
    runner: R,
}

impl<R: CommandRunner> WindowsCorrelator<R> {
    pub fn new(config: Config, runner: R) -> Self {
        Self { config, runner }
    }

    fn wmic(&self, query: &[&str]) -> Result<Vec<WmiObject>> {
        let mut args = vec![NAMESPACE, NODE, "PATH"];
        args.extend_from_slice(query);

        let output = self
            .runner
            .run(&self.config.wmic, &args)
            .with_context(|| format!("Could not query {}.", query.join(" ")))?;
        Ok(parse_list(&output))
    }

    fn usb_drives(&self) -> Result<Vec<WmiObject>> {
        self.wmic(&[
            "Win32_DiskDrive",
            "WHERE",
            "(InterfaceType='USB')",
            "GET",
            "DeviceID,SerialNumber",
            "/FORMAT:list",
        ])
    }

    /// The first `result_class` instance associated with `class` `device_id`.
    fn first_associated(
        &self,
        class: &str,
        device_id: &str,
        result_class: &str,
    ) -> Result<Option<WmiObject>> {
        let filter = format!("(DeviceID='{}')", escape_wql(device_id));
        let result_class = format!("/RESULTCLASS:{}", result_class);
        let objects = self.wmic(&[class, "WHERE", &filter, "ASSOC:list", &result_class])?;
        Ok(objects.into_iter().next())
    }

    /// Resolves one drive to its mount point, or `None` if any step comes up empty.
    fn resolve(&self, drive: &WmiObject) -> Result<Option<UsbDevice>> {
        let Some(serial) = drive.get("SerialNumber").filter(|s| !s.is_empty()) else {
            debug!("Skipping USB drive without a serial number");
            return Ok(None);
        };
        let Some(drive_id) = drive.device_id() else {
            return Ok(None);
        };

        let partition = self.first_associated("Win32_DiskDrive", drive_id, "Win32_DiskPartition")?;
        let Some(partition_id) = partition.as_ref().and_then(WmiObject::device_id) else {
            debug!("{} has no partition", drive_id);
            return Ok(None);
        };

        let disk = self.first_associated("Win32_DiskPartition", partition_id, "Win32_LogicalDisk")?;
        let Some(mount_point) = disk.as_ref().and_then(WmiObject::device_id) else {
            debug!("{} has no logical disk", partition_id);
            return Ok(None);
        };

        Ok(Some(UsbDevice::new(serial, mount_point)))
    }
}

impl<R: CommandRunner> Correlator for WindowsCorrelator<R> {
    fn list_devices(&self) -> Result<Vec<UsbDevice>> {
        let drives = self.usb_drives()?;
        trace!("wmic: {} USB drives", drives.len());

        let mut devices = Vec::new();
        for drive in &drives {
            if let Some(device) = self.resolve(drive)? {
                devices.push(device);
            }
        }

        Ok(devices)
    }
}
