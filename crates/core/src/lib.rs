use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;

pub const SNAPSHOT_SCHEMA_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostOs {
    Windows,
    Linux,
    Macos,
    Unknown,
}

impl HostOs {
    /// Probes the running platform. Evaluated once at startup by the caller.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            HostOs::Windows
        } else if cfg!(target_os = "linux") {
            HostOs::Linux
        } else if cfg!(target_os = "macos") {
            HostOs::Macos
        } else {
            HostOs::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HostOs::Windows => "windows",
            HostOs::Linux => "linux",
            HostOs::Macos => "macos",
            HostOs::Unknown => "unknown",
        }
    }
}

/// A mounted partition as reported by the OS.
///
/// Two identities are equal only if device, mount point and capability
/// flags all match, so a remount under a different path counts as a new disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DiskIdentity {
    pub device: String,
    pub mount_point: PathBuf,
    pub opts: Vec<String>,
}

impl DiskIdentity {
    pub fn new(device: impl Into<String>, mount_point: impl Into<PathBuf>, opts: Vec<String>) -> Self {
        Self {
            device: device.into(),
            mount_point: mount_point.into(),
            opts,
        }
    }

    /// Identity for a mount path found through serial lookup, where no
    /// device path or flags are known.
    pub fn from_mount_point(mount_point: impl Into<PathBuf>) -> Self {
        let mount_point = mount_point.into();
        Self {
            device: mount_point.display().to_string(),
            mount_point,
            opts: Vec::new(),
        }
    }

    pub fn has_opt(&self, opt: &str) -> bool {
        self.opts.iter().any(|value| value == opt)
    }
}

/// Immutable set of disks observed at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiskSnapshot {
    disks: BTreeSet<DiskIdentity>,
}

impl DiskSnapshot {
    pub fn new(disks: impl IntoIterator<Item = DiskIdentity>) -> Self {
        Self {
            disks: disks.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.disks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.disks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiskIdentity> {
        self.disks.iter()
    }

    pub fn contains(&self, disk: &DiskIdentity) -> bool {
        self.disks.contains(disk)
    }

    pub fn contains_mount(&self, mount_point: &Path) -> bool {
        self.disks.iter().any(|disk| disk.mount_point == mount_point)
    }

    /// Disks present in `self` but not in `initial`.
    pub fn newly_appeared(&self, initial: &DiskSnapshot) -> DiskSnapshot {
        DiskSnapshot {
            disks: self.disks.difference(&initial.disks).cloned().collect(),
        }
    }

    pub fn into_single(self) -> Option<DiskIdentity> {
        if self.disks.len() != 1 {
            return None;
        }
        self.disks.into_iter().next()
    }
}

impl FromIterator<DiskIdentity> for DiskSnapshot {
    fn from_iter<T: IntoIterator<Item = DiskIdentity>>(iter: T) -> Self {
        DiskSnapshot::new(iter)
    }
}

/// Platform facilities used to find and release the USB disk under test.
pub trait DiskLocator {
    fn os(&self) -> HostOs;

    /// Mounted partitions that look like removable USB storage.
    fn list_disks(&self) -> Result<DiskSnapshot>;

    /// Mount path of the first volume on the disk with this hardware serial.
    fn resolve_by_serial(&self, serial: &str) -> Result<Option<PathBuf>>;

    /// Ejects `target`. True only if the disk is confirmed gone afterwards.
    fn unmount(&self, target: &DiskIdentity) -> bool;

    /// Total filesystem capacity in bytes at `mount_point`.
    fn total_bytes(&self, mount_point: &Path) -> Result<u64>;
}

impl<L: DiskLocator + ?Sized> DiskLocator for Box<L> {
    fn os(&self) -> HostOs {
        (**self).os()
    }

    fn list_disks(&self) -> Result<DiskSnapshot> {
        (**self).list_disks()
    }

    fn resolve_by_serial(&self, serial: &str) -> Result<Option<PathBuf>> {
        (**self).resolve_by_serial(serial)
    }

    fn unmount(&self, target: &DiskIdentity) -> bool {
        (**self).unmount(target)
    }

    fn total_bytes(&self, mount_point: &Path) -> Result<u64> {
        (**self).total_bytes(mount_point)
    }
}

/// Locator for hosts that are none of Windows, Linux or macOS.
/// Nothing is ever found and nothing can be unmounted.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedLocator;

impl DiskLocator for UnsupportedLocator {
    fn os(&self) -> HostOs {
        HostOs::Unknown
    }

    fn list_disks(&self) -> Result<DiskSnapshot> {
        Ok(DiskSnapshot::default())
    }

    fn resolve_by_serial(&self, _serial: &str) -> Result<Option<PathBuf>> {
        Ok(None)
    }

    fn unmount(&self, _target: &DiskIdentity) -> bool {
        false
    }

    fn total_bytes(&self, mount_point: &Path) -> Result<u64> {
        Err(anyhow!(
            "filesystem size unavailable on unsupported host: {}",
            mount_point.display()
        ))
    }
}

/// Post-unmount check shared by the platform locators.
/// An enumeration error means absence cannot be confirmed.
pub fn confirm_absent(after: Result<DiskSnapshot>, target: &DiskIdentity) -> bool {
    match after {
        Ok(snapshot) => !snapshot.contains_mount(&target.mount_point),
        Err(err) => {
            log::warn!("re-query after unmount failed: {err:#}");
            false
        }
    }
}

/// One handled action request, as kept in the session history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: String,
    pub payload: String,
    /// Key sent back, `None` when the action produced no reply.
    pub result: Option<String>,
    pub at_utc: String,
    pub elapsed_ms: u64,
}

pub fn now_utc_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
