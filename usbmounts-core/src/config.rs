//! Settings shared by the platform correlators.

/// How the Linux correlator turns a matched block device into a mount point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LinuxMount {
    /// Report the block device's filesystem label (`ID_FS_LABEL`) as-is.
    Label,
    /// Look the device node up with `findmnt` and report its first target.
    #[default]
    Target,
}

/// Runtime configuration for a listing.
///
/// Tool paths default to the names each platform ships them under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub linux_mount: LinuxMount,
    pub udevadm: String,
    pub findmnt: String,
    pub system_profiler: String,
    pub wmic: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            linux_mount: LinuxMount::default(),
            udevadm: "udevadm".to_string(),
            findmnt: "findmnt".to_string(),
            system_profiler: "/usr/sbin/system_profiler".to_string(),
            wmic: "wmic".to_string(),
        }
    }
}

impl Config {
    pub fn with_linux_mount(mut self, linux_mount: LinuxMount) -> Self {
        self.linux_mount = linux_mount;
        self
    }
}
