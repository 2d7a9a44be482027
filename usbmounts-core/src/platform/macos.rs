use crate::command::CommandRunner;
use crate::config::Config;
use crate::device::UsbDevice;
use crate::error::QueryError;
use crate::platform::Correlator;
use anyhow::{Context, Result};
use log::{debug, trace};
use plist::{Dictionary, Value};

const USB_DATA_TYPE: &str = "SPUSBDataType";
const STORAGE_DATA_TYPE: &str = "SPStorageDataType";

/// A node of a `system_profiler` tree.
///
/// Trees mix records and containers at every level, and a record may have
/// children of its own. Such a record becomes a [`Node::Branch`] holding its
/// own leaf first, so flattening still yields "record, then descendants".
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node<T> {
    Leaf(T),
    Branch(Vec<Node<T>>),
}

impl<T> Node<T> {
    /// Flattens the tree depth-first, in document order.
    pub fn into_records(self) -> Vec<T> {
        match self {
            Node::Leaf(record) => vec![record],
            Node::Branch(children) => children.into_iter().flat_map(Node::into_records).collect(),
        }
    }
}

/// A record type found in a `system_profiler` tree.
pub trait Record: Sized {
    /// The field whose presence marks a dictionary as this record.
    const KEY: &'static str;

    fn from_dictionary(dict: &Dictionary) -> Option<Self>;
}

/// A device from the `SPUSBDataType` tree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UsbRecord {
    pub name: Option<String>,
    pub serial_num: String,
    pub manufacturer: Option<String>,
    pub vendor_id: Option<String>,
    pub product_id: Option<String>,
    /// `bsd_name` of each `Media` entry, in order; `None` where it is missing.
    pub media: Vec<Option<String>>,
}

impl Record for UsbRecord {
    const KEY: &'static str = "serial_num";

    fn from_dictionary(dict: &Dictionary) -> Option<Self> {
        let media = dict
            .get("Media")
            .and_then(Value::as_array)
            .map(|media| {
                media
                    .iter()
                    .map(|entry| {
                        entry
                            .as_dictionary()
                            .and_then(|entry| text(entry, "bsd_name"))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            name: text(dict, "_name"),
            serial_num: text(dict, Self::KEY)?,
            manufacturer: text(dict, "manufacturer"),
            vendor_id: text(dict, "vendor_id"),
            product_id: text(dict, "product_id"),
            media,
        })
    }
}

/// A volume from the `SPStorageDataType` tree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StorageRecord {
    pub name: Option<String>,
    pub bsd_name: String,
    pub mount_point: Option<String>,
}

impl Record for StorageRecord {
    const KEY: &'static str = "bsd_name";

    fn from_dictionary(dict: &Dictionary) -> Option<Self> {
        Some(Self {
            name: text(dict, "_name"),
            bsd_name: text(dict, Self::KEY)?,
            mount_point: text(dict, "mount_point"),
        })
    }
}

/// Reads a scalar field as text. Numbers are rendered in decimal.
fn text(dict: &Dictionary, key: &str) -> Option<String> {
    match dict.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Integer(i) => i
            .as_signed()
            .map(|n| n.to_string())
            .or_else(|| i.as_unsigned().map(|n| n.to_string())),
        Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Classifies one plist value, recursing into its `_items`.
///
/// Returns `None` for values that are neither a record nor a container.
pub fn classify<T: Record>(value: &Value) -> Option<Node<T>> {
    let dict = value.as_dictionary()?;
    let record = T::from_dictionary(dict);
    let children = dict
        .get("_items")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(classify::<T>).collect::<Vec<_>>());

    match (record, children) {
        (Some(record), None) => Some(Node::Leaf(record)),
        (Some(record), Some(mut children)) => {
            children.insert(0, Node::Leaf(record));
            Some(Node::Branch(children))
        }
        (None, Some(children)) => Some(Node::Branch(children)),
        (None, None) => None,
    }
}

/// Builds the tree below a top-level section. The section itself is never a record.
fn section_tree<T: Record>(section: Option<&Dictionary>) -> Node<T> {
    let children = section
        .and_then(|section| section.get("_items"))
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(classify::<T>).collect())
        .unwrap_or_default();
    Node::Branch(children)
}

/// The top-level sections of one `system_profiler -xml` run.
#[derive(Clone, Debug, Default)]
pub struct Profile {
    sections: Vec<Dictionary>,
}

impl Profile {
    /// Parses `system_profiler -xml` output, which must be an array of sections.
    pub fn parse(output: &str) -> Result<Self, QueryError> {
        let malformed = |reason: String| QueryError::Malformed {
            program: "system_profiler".to_string(),
            reason,
        };

        let value = Value::from_reader_xml(output.as_bytes()).map_err(|e| malformed(e.to_string()))?;
        let Value::Array(values) = value else {
            return Err(malformed("expected an array of data types".to_string()));
        };

        let sections = values
            .into_iter()
            .filter_map(Value::into_dictionary)
            .collect();
        Ok(Self { sections })
    }

    /// The first section tagged with `data_type`.
    pub fn section(&self, data_type: &str) -> Option<&Dictionary> {
        self.sections.iter().find(|section| {
            section.get("_dataType").and_then(Value::as_string) == Some(data_type)
        })
    }

    pub fn usb_devices(&self) -> Vec<UsbRecord> {
        section_tree::<UsbRecord>(self.section(USB_DATA_TYPE)).into_records()
    }

    pub fn storage(&self) -> Vec<StorageRecord> {
        section_tree::<StorageRecord>(self.section(STORAGE_DATA_TYPE)).into_records()
    }
}

/// Joins each USB device's first media entry to a mounted volume by BSD name.
///
/// Later media entries of the same device are never consulted.
pub fn correlate(devices: &[UsbRecord], disks: &[StorageRecord]) -> Vec<UsbDevice> {
    devices
        .iter()
        .filter(|device| !device.serial_num.is_empty())
        .filter_map(|device| {
            let bsd_name = device.media.first()?.as_deref()?;
            let disk = disks.iter().find(|disk| disk.bsd_name == bsd_name)?;
            let mount_point = disk.mount_point.as_deref().filter(|m| !m.is_empty());

            match mount_point {
                Some(mount_point) => Some(UsbDevice::new(&device.serial_num, mount_point)),
                None => {
                    debug!(
                        "{} ({}) is not mounted",
                        device.name.as_deref().unwrap_or("USB device"),
                        bsd_name
                    );
                    None
                }
            }
        })
        .collect()
}

/// Correlates the `SPUSBDataType` and `SPStorageDataType` trees.
pub struct MacCorrelator<R> {
    config: Config,
    runner: R,
}

impl<R: CommandRunner> MacCorrelator<R> {
    pub fn new(config: Config, runner: R) -> Self {
        Self { config, runner }
    }

    fn query_profile(&self) -> Result<Profile> {
        let args = ["-xml", "-detailLevel", "mini", USB_DATA_TYPE, STORAGE_DATA_TYPE];
        let output = self
            .runner
            .run(&self.config.system_profiler, &args)
            .context("Could not query system_profiler.")?;
        Ok(Profile::parse(&output)?)
    }
}

impl<R: CommandRunner> Correlator for MacCorrelator<R> {
    fn list_devices(&self) -> Result<Vec<UsbDevice>> {
        let profile = self.query_profile()?;
        let devices = profile.usb_devices();
        let disks = profile.storage();
        trace!(
            "system_profiler: {} USB devices, {} volumes",
            devices.len(),
            disks.len()
        );

        Ok(correlate(&devices, &disks))
    }
}
