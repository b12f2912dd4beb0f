use anyhow::{anyhow, Context, Result};
use msd_core::{confirm_absent, DiskIdentity, DiskLocator, DiskSnapshot, HostOs};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const MOUNTS_PATH: &str = "/proc/self/mounts";
const USB_DEVICE_PREFIX: &str = "/dev/sd";
const REMOVABLE_MOUNT_ROOT: &str = "/media/";

/// Disk locator backed by the kernel mount table.
///
/// Automounters (udisks, GNOME, KDE) place USB sticks under `/media/`,
/// so a SCSI-style block device mounted there is taken to be the MSD.
#[derive(Debug, Clone)]
pub struct LinuxLocator {
    mounts_path: PathBuf,
}

impl Default for LinuxLocator {
    fn default() -> Self {
        Self {
            mounts_path: PathBuf::from(MOUNTS_PATH),
        }
    }
}

impl LinuxLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads mounts from an alternate file in `/proc/mounts` format.
    pub fn with_mounts_file(path: impl Into<PathBuf>) -> Self {
        Self {
            mounts_path: path.into(),
        }
    }
}

impl DiskLocator for LinuxLocator {
    fn os(&self) -> HostOs {
        HostOs::Linux
    }

    fn list_disks(&self) -> Result<DiskSnapshot> {
        let data = fs::read_to_string(&self.mounts_path)
            .with_context(|| format!("read {}", self.mounts_path.display()))?;
        Ok(parse_mounts(&data)
            .into_iter()
            .filter(is_msd_partition)
            .collect())
    }

    fn resolve_by_serial(&self, serial: &str) -> Result<Option<PathBuf>> {
        log::debug!("serial lookup not available on linux (serial {serial})");
        Ok(None)
    }

    fn unmount(&self, target: &DiskIdentity) -> bool {
        let mount = target.mount_point.display().to_string();
        match Command::new("umount").arg(&mount).output() {
            Ok(output) if !output.status.success() => {
                log::warn!(
                    "umount {} exited with {}: {}",
                    mount,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            Ok(_) => log::info!("umount {} done", mount),
            Err(err) => log::warn!("run umount {}: {}", mount, err),
        }
        confirm_absent(self.list_disks(), target)
    }

    fn total_bytes(&self, mount_point: &Path) -> Result<u64> {
        statvfs_total_bytes(mount_point)
    }
}

pub fn is_msd_partition(disk: &DiskIdentity) -> bool {
    disk.device.contains(USB_DEVICE_PREFIX)
        && disk.mount_point.to_string_lossy().contains(REMOVABLE_MOUNT_ROOT)
}

/// Parses a `/proc/mounts` table into identities, keeping only real
/// block devices.
pub fn parse_mounts(data: &str) -> Vec<DiskIdentity> {
    let mut disks = Vec::new();
    for line in data.lines() {
        let mut parts = line.split_whitespace();
        let device = match parts.next() {
            Some(value) => value,
            None => continue,
        };
        let mount_point = match parts.next() {
            Some(value) => unescape_mount(value),
            None => continue,
        };
        let _fs_type = parts.next();
        let opts = parts
            .next()
            .map(|value| value.split(',').map(str::to_string).collect())
            .unwrap_or_default();
        if !device.starts_with("/dev/") {
            continue;
        }
        disks.push(DiskIdentity::new(device, mount_point, opts));
    }
    disks
}

// The kernel escapes space, tab, newline and backslash as three-digit octal.
fn unescape_mount(value: &str) -> String {
    let mut output = String::new();
    let mut chars = value.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            output.push(ch);
            continue;
        }
        let mut octal = String::new();
        for _ in 0..3 {
            match chars.peek() {
                Some(next) if next.is_digit(8) => {
                    octal.push(*next);
                    chars.next();
                }
                _ => break,
            }
        }
        match u8::from_str_radix(&octal, 8) {
            Ok(byte) if octal.len() == 3 => output.push(byte as char),
            _ => {
                output.push('\\');
                output.push_str(&octal);
            }
        }
    }
    output
}

#[cfg(unix)]
fn statvfs_total_bytes(path: &Path) -> Result<u64> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;

    let c_path = CString::new(path.display().to_string()).map_err(|_| anyhow!("invalid path"))?;
    let mut stats = MaybeUninit::<libc::statvfs>::zeroed();
    let result = unsafe { libc::statvfs(c_path.as_ptr(), stats.as_mut_ptr()) };
    if result != 0 {
        return Err(anyhow!(
            "statvfs {}: {}",
            path.display(),
            std::io::Error::last_os_error()
        ));
    }
    let stats = unsafe { stats.assume_init() };
    Ok(u64::from(stats.f_blocks).saturating_mul(u64::from(stats.f_frsize)))
}

#[cfg(not(unix))]
fn statvfs_total_bytes(path: &Path) -> Result<u64> {
    Err(anyhow!("statvfs requires a unix host: {}", path.display()))
}
