use anyhow::{anyhow, Result};
use msd_core::DiskIdentity;
use std::path::Path;

pub fn enumerate_drives() -> Result<Vec<DiskIdentity>> {
    Err(anyhow!("drive letter enumeration requires Windows"))
}

pub fn total_bytes(mount_point: &Path) -> Result<u64> {
    Err(anyhow!(
        "filesystem size on {} requires Windows",
        mount_point.display()
    ))
}
