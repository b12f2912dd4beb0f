#[cfg(windows)]
pub mod drives;
#[cfg(not(windows))]
#[path = "drives_stub.rs"]
pub mod drives;
pub mod eject;
pub mod serial;

use anyhow::Result;
use msd_core::{confirm_absent, DiskIdentity, DiskLocator, DiskSnapshot, HostOs};
use std::path::{Path, PathBuf};

pub const REMOVABLE_OPT: &str = "removable";

/// Disk locator for Windows: drive letters flagged removable, serial
/// lookup through WMI associations and Shell.Application eject.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsLocator;

impl WindowsLocator {
    pub fn new() -> Self {
        Self
    }
}

impl DiskLocator for WindowsLocator {
    fn os(&self) -> HostOs {
        HostOs::Windows
    }

    fn list_disks(&self) -> Result<DiskSnapshot> {
        Ok(drives::enumerate_drives()?
            .into_iter()
            .filter(is_msd_partition)
            .collect())
    }

    fn resolve_by_serial(&self, serial: &str) -> Result<Option<PathBuf>> {
        let rows = serial::query_volume_rows()?;
        Ok(serial::first_mount_for_serial(&rows, serial))
    }

    fn unmount(&self, target: &DiskIdentity) -> bool {
        let mount = target.mount_point.display().to_string();
        let result = eject::eject_with_retries(
            &mount,
            eject::EjectPolicy::default(),
            eject::run_eject_script,
            || !confirm_absent(self.list_disks(), target),
        );
        match result {
            Ok(ejected) => ejected,
            Err(err) => {
                log::warn!("eject {}: {:#}", mount, err);
                false
            }
        }
    }

    fn total_bytes(&self, mount_point: &Path) -> Result<u64> {
        drives::total_bytes(mount_point)
    }
}

pub fn is_msd_partition(disk: &DiskIdentity) -> bool {
    disk.has_opt(REMOVABLE_OPT)
}

/// Maps a `GetDriveTypeW` result to a mount-option style name.
pub fn drive_type_opt(drive_type: u32) -> &'static str {
    match drive_type {
        2 => REMOVABLE_OPT,
        3 => "fixed",
        4 => "remote",
        5 => "cdrom",
        6 => "ramdisk",
        _ => "unknown",
    }
}
