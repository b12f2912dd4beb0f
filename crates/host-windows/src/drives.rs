use anyhow::{anyhow, Result};
use msd_core::DiskIdentity;
use std::path::Path;

use windows::core::PCWSTR;
use windows::Win32::Storage::FileSystem::{
    GetDiskFreeSpaceExW, GetDriveTypeW, GetLogicalDrives, GetVolumeInformationW,
};

use crate::drive_type_opt;

const FILE_READ_ONLY_VOLUME: u32 = 0x0008_0000;

fn wide(s: &str) -> Vec<u16> {
    use std::os::windows::prelude::*;
    std::ffi::OsStr::new(s)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

fn logical_drive_letters() -> Vec<char> {
    let mask = unsafe { GetLogicalDrives() };
    ('A'..='Z')
        .enumerate()
        .filter(|(idx, _)| mask & (1u32 << idx) != 0)
        .map(|(_, letter)| letter)
        .collect()
}

/// Filesystem flags of the volume at `root`, or `None` when no media is
/// present (an empty card reader slot still has a drive letter).
fn volume_flags(root: &str) -> Option<u32> {
    let wroot = wide(root);
    let mut flags = 0u32;
    let result = unsafe {
        GetVolumeInformationW(
            PCWSTR(wroot.as_ptr()),
            None,
            None,
            None,
            Some(&mut flags as *mut u32),
            None,
        )
    };
    result.ok().map(|_| flags)
}

/// Every lettered drive with its type as a mount option, mirroring the
/// `rw,removable` style of mount tables on other hosts.
pub fn enumerate_drives() -> Result<Vec<DiskIdentity>> {
    let mut drives = Vec::new();
    for letter in logical_drive_letters() {
        let root = format!("{}:\\", letter);
        let wroot = wide(&root);
        let kind = drive_type_opt(unsafe { GetDriveTypeW(PCWSTR(wroot.as_ptr())) });
        let flags = match volume_flags(&root) {
            Some(flags) => flags,
            None => {
                log::debug!("skip {}: volume not ready", root);
                continue;
            }
        };
        let access = if flags & FILE_READ_ONLY_VOLUME != 0 { "ro" } else { "rw" };
        drives.push(DiskIdentity::new(
            root.clone(),
            root,
            vec![access.to_string(), kind.to_string()],
        ));
    }
    Ok(drives)
}

pub fn total_bytes(mount_point: &Path) -> Result<u64> {
    let wroot = wide(&mount_point.display().to_string());
    let mut free = 0u64;
    let mut total = 0u64;
    let mut total_free = 0u64;
    unsafe {
        GetDiskFreeSpaceExW(
            PCWSTR(wroot.as_ptr()),
            Some(&mut free as *mut u64),
            Some(&mut total as *mut u64),
            Some(&mut total_free as *mut u64),
        )
    }
    .map_err(|err| anyhow!("GetDiskFreeSpaceExW failed for {}: {}", mount_point.display(), err))?;
    Ok(total)
}
