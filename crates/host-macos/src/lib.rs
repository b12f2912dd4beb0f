use anyhow::Result;
use msd_core::{confirm_absent, DiskIdentity, DiskLocator, DiskSnapshot, HostOs};
use std::path::{Path, PathBuf};

#[cfg(not(target_os = "macos"))]
use anyhow::anyhow;

const DISK_DEVICE_PREFIX: &str = "/dev/disk";
const VOLUMES_ROOT: &str = "/Volumes/";

// <sys/mount.h>
const MNT_RDONLY: u32 = 0x0000_0001;
const MNT_NOSUID: u32 = 0x0000_0008;
const MNT_NODEV: u32 = 0x0000_0010;
const MNT_LOCAL: u32 = 0x0000_1000;
const MNT_DONTBROWSE: u32 = 0x0010_0000;
const MNT_JOURNALED: u32 = 0x0080_0000;

#[derive(Debug, Clone)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: String,
    pub flags: u32,
}

/// Disk locator backed by `getfsstat` and `diskutil`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MacosLocator;

impl MacosLocator {
    pub fn new() -> Self {
        Self
    }
}

impl DiskLocator for MacosLocator {
    fn os(&self) -> HostOs {
        HostOs::Macos
    }

    fn list_disks(&self) -> Result<DiskSnapshot> {
        Ok(collect_msd(read_mounts()?))
    }

    fn resolve_by_serial(&self, serial: &str) -> Result<Option<PathBuf>> {
        log::debug!("serial lookup not available on macos (serial {serial})");
        Ok(None)
    }

    fn unmount(&self, target: &DiskIdentity) -> bool {
        let mount = target.mount_point.display().to_string();
        if let Err(err) = run_diskutil_unmount(&mount) {
            log::warn!("diskutil unmount {}: {:#}", mount, err);
        }
        confirm_absent(self.list_disks(), target)
    }

    fn total_bytes(&self, mount_point: &Path) -> Result<u64> {
        statfs_total_bytes(mount_point)
    }
}

/// Keeps whole-disk slices mounted under `/Volumes/`, which is where
/// DiskArbitration mounts external media.
pub fn collect_msd(entries: Vec<MountEntry>) -> DiskSnapshot {
    entries
        .into_iter()
        .filter(is_msd_mount)
        .map(|entry| DiskIdentity::new(entry.device, entry.mount_point, flags_to_opts(entry.flags)))
        .collect()
}

pub fn is_msd_mount(entry: &MountEntry) -> bool {
    entry.device.contains(DISK_DEVICE_PREFIX) && entry.mount_point.contains(VOLUMES_ROOT)
}

pub fn flags_to_opts(flags: u32) -> Vec<String> {
    let mut opts = vec![if flags & MNT_RDONLY != 0 { "ro" } else { "rw" }.to_string()];
    for (bit, name) in [
        (MNT_NOSUID, "nosuid"),
        (MNT_NODEV, "nodev"),
        (MNT_LOCAL, "local"),
        (MNT_DONTBROWSE, "nobrowse"),
        (MNT_JOURNALED, "journaled"),
    ] {
        if flags & bit != 0 {
            opts.push(name.to_string());
        }
    }
    opts
}

/// Removable-media mounts from the kernel mount list. One spare slot
/// absorbs a volume mounted between the sizing call and the read.
#[cfg(target_os = "macos")]
fn read_mounts() -> Result<Vec<MountEntry>> {
    use anyhow::anyhow;
    use std::ffi::CStr;
    use std::mem::{size_of, zeroed};
    use std::os::raw::c_char;

    fn field(raw: &[c_char]) -> String {
        unsafe { CStr::from_ptr(raw.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    let mounted = unsafe { libc::getfsstat(std::ptr::null_mut(), 0, libc::MNT_NOWAIT) };
    let Ok(capacity) = usize::try_from(mounted) else {
        return Err(anyhow!("getfsstat: {}", std::io::Error::last_os_error()));
    };
    let mut stats: Vec<libc::statfs> = (0..=capacity).map(|_| unsafe { zeroed() }).collect();
    let bytes = i32::try_from(stats.len() * size_of::<libc::statfs>())
        .map_err(|_| anyhow!("getfsstat: {} mounts do not fit one call", stats.len()))?;
    let filled = unsafe { libc::getfsstat(stats.as_mut_ptr(), bytes, libc::MNT_NOWAIT) };
    let Ok(filled) = usize::try_from(filled) else {
        return Err(anyhow!("getfsstat: {}", std::io::Error::last_os_error()));
    };
    stats.truncate(filled);

    Ok(stats
        .iter()
        .map(|stat| MountEntry {
            device: field(&stat.f_mntfromname),
            mount_point: field(&stat.f_mntonname),
            flags: stat.f_flags,
        })
        .filter(is_msd_mount)
        .collect())
}

#[cfg(not(target_os = "macos"))]
fn read_mounts() -> Result<Vec<MountEntry>> {
    Err(anyhow!("msd-host-macos requires macOS"))
}

#[cfg(target_os = "macos")]
fn statfs_total_bytes(path: &Path) -> Result<u64> {
    use anyhow::anyhow;
    use std::ffi::CString;
    use std::mem::MaybeUninit;

    let c_path = CString::new(path.display().to_string()).map_err(|_| anyhow!("invalid path"))?;
    let mut stats = MaybeUninit::<libc::statfs>::zeroed();
    let result = unsafe { libc::statfs(c_path.as_ptr(), stats.as_mut_ptr()) };
    if result != 0 {
        return Err(anyhow!(
            "statfs {}: {}",
            path.display(),
            std::io::Error::last_os_error()
        ));
    }
    let stats = unsafe { stats.assume_init() };
    Ok(u64::from(stats.f_blocks).saturating_mul(u64::from(stats.f_bsize)))
}

#[cfg(not(target_os = "macos"))]
fn statfs_total_bytes(path: &Path) -> Result<u64> {
    Err(anyhow!("filesystem size on {} requires macOS", path.display()))
}

#[cfg(target_os = "macos")]
fn run_diskutil_unmount(mount: &str) -> Result<()> {
    use anyhow::{anyhow, Context};

    let output = std::process::Command::new("/usr/sbin/diskutil")
        .args(["unmount", mount])
        .output()
        .context("run diskutil")?;
    if output.status.success() {
        log::info!("{}", String::from_utf8_lossy(&output.stdout).trim());
        Ok(())
    } else {
        Err(anyhow!(
            "diskutil failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

#[cfg(not(target_os = "macos"))]
fn run_diskutil_unmount(_mount: &str) -> Result<()> {
    Err(anyhow!("diskutil requires macOS"))
}
