use crate::command::CommandRunner;
use crate::config::{Config, LinuxMount};
use crate::device::UsbDevice;
use crate::error::QueryError;
use crate::platform::Correlator;
use anyhow::{Context, Result};
use log::{debug, trace, warn};
use serde::Deserialize;
use std::collections::HashMap;

/// One device entry from the udev database.
///
/// Only the `E:` properties are kept; they carry everything the correlation
/// needs (`SUBSYSTEM`, `DEVTYPE`, `DEVNAME`, `ID_SERIAL_SHORT`, `ID_FS_LABEL`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UdevRecord {
    properties: HashMap<String, String>,
}

impl UdevRecord {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn subsystem(&self) -> Option<&str> {
        self.get("SUBSYSTEM")
    }

    /// The short hardware serial, if the record has a non-empty one.
    pub fn serial(&self) -> Option<&str> {
        self.get("ID_SERIAL_SHORT").filter(|serial| !serial.is_empty())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for UdevRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            properties: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

/// Parses the output of `udevadm info --export-db`.
///
/// Entries are separated by blank lines and every line is `<type>: <data>`.
/// Entries without a single `E:` property are dropped.
pub fn parse_udev_db(text: &str) -> Vec<UdevRecord> {
    let mut records = Vec::new();
    let mut current = UdevRecord::default();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            if !current.properties.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            continue;
        }

        if let Some(property) = line.strip_prefix("E: ") {
            if let Some((key, value)) = property.split_once('=') {
                current.properties.insert(key.to_string(), value.to_string());
            }
        }
    }

    if !current.properties.is_empty() {
        records.push(current);
    }

    records
}

#[derive(Debug, Deserialize)]
struct FindmntOutput {
    filesystems: Vec<FindmntFilesystem>,
}

#[derive(Debug, Deserialize)]
struct FindmntFilesystem {
    target: String,
}

/// Extracts the first mount target from `findmnt --json` output.
///
/// Anything that is not the expected document yields `None`.
pub fn parse_findmnt_target(json: &str) -> Option<String> {
    match serde_json::from_str::<FindmntOutput>(json) {
        Ok(output) => output
            .filesystems
            .into_iter()
            .next()
            .map(|filesystem| filesystem.target),
        Err(e) => {
            warn!("Ignoring unparseable findmnt output: {}", e);
            None
        }
    }
}

/// Correlates udev `usb` devices with udev `block` devices by serial number.
pub struct LinuxCorrelator<R> {
    config: Config,
    runner: R,
}

impl<R: CommandRunner> LinuxCorrelator<R> {
    pub fn new(config: Config, runner: R) -> Self {
        Self { config, runner }
    }

    fn query_udev(&self) -> Result<Vec<UdevRecord>> {
        let output = self
            .runner
            .run(&self.config.udevadm, &["info", "--export-db"])
            .context("Could not read the udev database.")?;
        Ok(parse_udev_db(&output))
    }

    /// Resolves the mount point for a matched block device.
    ///
    /// `Ok(None)` means the device simply has no usable mount; only a failure to
    /// run the lookup at all is an error.
    fn resolve_mount(&self, block: &UdevRecord) -> Result<Option<String>> {
        match self.config.linux_mount {
            LinuxMount::Label => Ok(block.get("ID_FS_LABEL").map(str::to_string)),
            LinuxMount::Target => {
                let Some(devname) = block.get("DEVNAME") else {
                    return Ok(None);
                };

                let args = ["--json", "--output", "TARGET", "--source", devname];
                match self.runner.run(&self.config.findmnt, &args) {
                    Ok(output) => Ok(parse_findmnt_target(&output)),
                    // findmnt exits with 1 when nothing is mounted from the source.
                    Err(QueryError::Status { .. }) => Ok(None),
                    Err(e) => Err(e).context(format!("Could not look up mounts for {}.", devname)),
                }
            }
        }
    }

    /// Joins USB records to block records on `ID_SERIAL_SHORT`.
    ///
    /// Both slices are filtered here, so they may contain records of any
    /// subsystem. The first block device with an equal serial wins.
    pub fn correlate(&self, usb: &[UdevRecord], block: &[UdevRecord]) -> Result<Vec<UsbDevice>> {
        let block: Vec<&UdevRecord> = block.iter().filter(|b| b.serial().is_some()).collect();
        let mut devices = Vec::new();

        for device in usb.iter().filter(|d| is_usb_device(d)) {
            let Some(serial) = device.serial() else {
                continue;
            };

            let Some(drive) = block.iter().find(|b| b.serial() == Some(serial)) else {
                debug!("No block device for USB serial {}", serial);
                continue;
            };

            match self.resolve_mount(drive)? {
                Some(mount_point) if !mount_point.is_empty() => {
                    devices.push(UsbDevice::new(serial, mount_point));
                }
                _ => debug!("USB serial {} is not mounted", serial),
            }
        }

        Ok(devices)
    }
}

/// Whole USB devices; interfaces repeat their parent's serial.
fn is_usb_device(record: &UdevRecord) -> bool {
    record.get("DEVTYPE") != Some("usb_interface")
}

impl<R: CommandRunner> Correlator for LinuxCorrelator<R> {
    fn list_devices(&self) -> Result<Vec<UsbDevice>> {
        let records = self.query_udev()?;
        let (usb, block): (Vec<UdevRecord>, Vec<UdevRecord>) = records
            .into_iter()
            .filter(|r| matches!(r.subsystem(), Some("usb") | Some("block")))
            .partition(|r| r.subsystem() == Some("usb"));
        trace!("udev: {} usb records, {} block records", usb.len(), block.len());

        self.correlate(&usb, &block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::FakeRunner;

    const EXPORT_DB: &str = "\
P: /devices/pci0000:00/0000:00:14.0/usb2/2-1
N: bus/usb/002/003
E: DEVPATH=/devices/pci0000:00/0000:00:14.0/usb2/2-1
E: SUBSYSTEM=usb
E: DEVTYPE=usb_device
E: ID_SERIAL_SHORT=4C530001230915117203

P: /devices/pci0000:00/0000:00:14.0/usb2/2-1/2-1:1.0
E: SUBSYSTEM=usb
E: DEVTYPE=usb_interface
E: ID_SERIAL_SHORT=4C530001230915117203

P: /devices/pci0000:00/0000:00:14.0/usb1/1-4
E: SUBSYSTEM=usb
E: DEVTYPE=usb_device

P: /devices/virtual/block/loop0
E: SUBSYSTEM=block
E: DEVNAME=/dev/loop0

P: /devices/pci0000:00/0000:00:14.0/usb2/2-1/2-1:1.0/host0/target0:0:0/0:0:0:0/block/sdb/sdb1
N: sdb1
E: SUBSYSTEM=block
E: DEVNAME=/dev/sdb1
E: DEVTYPE=partition
E: ID_SERIAL_SHORT=4C530001230915117203
E: ID_FS_LABEL=CRUZER
";

    fn record(pairs: &[(&str, &str)]) -> UdevRecord {
        pairs.iter().copied().collect()
    }

    fn label_correlator(runner: FakeRunner) -> LinuxCorrelator<FakeRunner> {
        LinuxCorrelator::new(Config::default().with_linux_mount(LinuxMount::Label), runner)
    }

    #[test]
    fn parses_export_db_properties() {
        let records = parse_udev_db(EXPORT_DB);
        assert_eq!(records.len(), 5);
        assert_eq!(records[0].subsystem(), Some("usb"));
        assert_eq!(records[0].serial(), Some("4C530001230915117203"));
        assert_eq!(records[2].serial(), None);
        assert_eq!(records[4].get("ID_FS_LABEL"), Some("CRUZER"));
    }

    #[test]
    fn parse_keeps_equals_signs_in_values() {
        let records = parse_udev_db("E: ID_FS_LABEL=a=b\r\n");
        assert_eq!(records[0].get("ID_FS_LABEL"), Some("a=b"));
    }

    #[test]
    fn label_matches_block_device_by_serial() {
        let correlator = label_correlator(FakeRunner::new());
        let usb = [record(&[("ID_SERIAL_SHORT", "SN1")])];
        let block = [record(&[("ID_SERIAL_SHORT", "SN1"), ("ID_FS_LABEL", "MYDISK")])];

        let devices = correlator.correlate(&usb, &block).unwrap();
        assert_eq!(devices, vec![UsbDevice::new("SN1", "MYDISK")]);
    }

    #[test]
    fn first_block_device_with_serial_wins() {
        let correlator = label_correlator(FakeRunner::new());
        let usb = [record(&[("ID_SERIAL_SHORT", "SN1")])];
        let block = [
            record(&[("ID_SERIAL_SHORT", "SN1"), ("ID_FS_LABEL", "FIRST")]),
            record(&[("ID_SERIAL_SHORT", "SN1"), ("ID_FS_LABEL", "SECOND")]),
        ];

        let devices = correlator.correlate(&usb, &block).unwrap();
        assert_eq!(devices, vec![UsbDevice::new("SN1", "FIRST")]);
    }

    #[test]
    fn serial_match_is_case_sensitive() {
        let correlator = label_correlator(FakeRunner::new());
        let usb = [record(&[("ID_SERIAL_SHORT", "abc")])];
        let block = [record(&[("ID_SERIAL_SHORT", "ABC"), ("ID_FS_LABEL", "X")])];

        assert!(correlator.correlate(&usb, &block).unwrap().is_empty());
    }

    #[test]
    fn unlabelled_and_serialless_devices_are_omitted() {
        let correlator = label_correlator(FakeRunner::new());
        let usb = [
            record(&[("ID_SERIAL_SHORT", "SN1")]),
            record(&[("ID_SERIAL_SHORT", "")]),
            record(&[("ID_SERIAL_SHORT", "SN3")]),
        ];
        let block = [
            record(&[("ID_SERIAL_SHORT", "SN1")]),
            record(&[("ID_SERIAL_SHORT", ""), ("ID_FS_LABEL", "ORPHAN")]),
            record(&[("ID_SERIAL_SHORT", "SN3"), ("ID_FS_LABEL", "")]),
        ];

        assert!(correlator.correlate(&usb, &block).unwrap().is_empty());
    }

    #[test]
    fn lists_from_udev_database_once_per_device() {
        let runner = FakeRunner::new().reply("udevadm info --export-db", EXPORT_DB);
        let correlator = label_correlator(runner);

        let devices = correlator.list_devices().unwrap();
        assert_eq!(devices, vec![UsbDevice::new("4C530001230915117203", "CRUZER")]);
    }

    #[test]
    fn resolves_mount_target_with_findmnt() {
        let runner = FakeRunner::new()
            .reply("udevadm info --export-db", EXPORT_DB)
            .reply(
                "findmnt --json --output TARGET --source /dev/sdb1",
                r#"{"filesystems": [{"target": "/media/user/CRUZER"}, {"target": "/mnt/other"}]}"#,
            );
        let correlator = LinuxCorrelator::new(Config::default(), runner);

        let devices = correlator.list_devices().unwrap();
        assert_eq!(
            devices,
            vec![UsbDevice::new("4C530001230915117203", "/media/user/CRUZER")]
        );
    }

    #[test]
    fn malformed_findmnt_output_skips_only_that_device() {
        let runner = FakeRunner::new()
            .reply("findmnt --json --output TARGET --source /dev/sdb1", "{not json")
            .reply(
                "findmnt --json --output TARGET --source /dev/sdc1",
                r#"{"filesystems": [{"target": "/media/usb"}]}"#,
            );
        let correlator = LinuxCorrelator::new(Config::default(), runner);
        let usb = [
            record(&[("ID_SERIAL_SHORT", "BAD")]),
            record(&[("ID_SERIAL_SHORT", "GOOD")]),
        ];
        let block = [
            record(&[("ID_SERIAL_SHORT", "BAD"), ("DEVNAME", "/dev/sdb1")]),
            record(&[("ID_SERIAL_SHORT", "GOOD"), ("DEVNAME", "/dev/sdc1")]),
        ];

        let devices = correlator.correlate(&usb, &block).unwrap();
        assert_eq!(devices, vec![UsbDevice::new("GOOD", "/media/usb")]);
    }

    #[test]
    fn unmounted_source_is_not_an_error() {
        let runner = FakeRunner::new().fail("findmnt --json --output TARGET --source /dev/sdb1");
        let correlator = LinuxCorrelator::new(Config::default(), runner);
        let usb = [record(&[("ID_SERIAL_SHORT", "SN1")])];
        let block = [record(&[("ID_SERIAL_SHORT", "SN1"), ("DEVNAME", "/dev/sdb1")])];

        assert!(correlator.correlate(&usb, &block).unwrap().is_empty());
    }

    #[test]
    fn empty_findmnt_filesystems_means_unmounted() {
        assert_eq!(parse_findmnt_target(r#"{"filesystems": []}"#), None);
        assert_eq!(parse_findmnt_target(""), None);
    }

    #[test]
    fn missing_findmnt_fails_the_listing() {
        let correlator = LinuxCorrelator::new(Config::default(), FakeRunner::new());
        let usb = [record(&[("ID_SERIAL_SHORT", "SN1")])];
        let block = [record(&[("ID_SERIAL_SHORT", "SN1"), ("DEVNAME", "/dev/sdb1")])];

        assert!(correlator.correlate(&usb, &block).is_err());
    }

    #[test]
    fn unreadable_udev_database_fails_the_listing() {
        let runner = FakeRunner::new().fail("udevadm info --export-db");
        let err = label_correlator(runner).list_devices().unwrap_err();
        assert!(err.downcast_ref::<QueryError>().is_some());
    }

    #[test]
    fn listing_twice_gives_the_same_devices() {
        let runner = FakeRunner::new().reply("udevadm info --export-db", EXPORT_DB);
        let correlator = label_correlator(runner);

        assert_eq!(correlator.list_devices().unwrap(), correlator.list_devices().unwrap());
    }
}
