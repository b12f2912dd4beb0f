use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Walks Win32_DiskDrive -> Win32_DiskPartition -> Win32_LogicalDisk and
/// emits one row per lettered volume. `-InputObject` keeps the output an
/// array even for zero or one rows on recent PowerShell; older hosts may
/// still collapse a single row to an object.
const VOLUME_ROWS_SCRIPT: &str = r#"
$ErrorActionPreference="Stop";
$rows = foreach ($disk in Get-CimInstance -ClassName Win32_DiskDrive) {
  foreach ($part in Get-CimAssociatedInstance -InputObject $disk -ResultClassName Win32_DiskPartition) {
    foreach ($logical in Get-CimAssociatedInstance -InputObject $part -ResultClassName Win32_LogicalDisk) {
      [PSCustomObject]@{
        SerialNumber = $disk.SerialNumber;
        PNPDeviceID = $disk.PNPDeviceID;
        DeviceID = $logical.DeviceID
      }
    }
  }
}
ConvertTo-Json -InputObject @($rows) -Depth 3
"#;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeRow {
    pub serial_number: Option<String>,
    #[serde(rename = "PNPDeviceID")]
    pub pnp_device_id: Option<String>,
    #[serde(rename = "DeviceID")]
    pub device_id: Option<String>,
}

impl VolumeRow {
    /// USB mass storage reports its iSerial as SerialNumber; some bridges
    /// leave that blank and only carry it in the PnP instance path
    /// (`USBSTOR\DISK&VEN_...\<serial>&0`).
    pub fn matches_serial(&self, serial: &str) -> bool {
        let wanted = serial.trim();
        if wanted.is_empty() {
            return false;
        }
        let by_serial = self
            .serial_number
            .as_deref()
            .map(|value| value.trim().eq_ignore_ascii_case(wanted))
            .unwrap_or(false);
        let by_pnp = self
            .pnp_device_id
            .as_deref()
            .and_then(pnp_instance_serial)
            .map(|value| value.eq_ignore_ascii_case(wanted))
            .unwrap_or(false);
        by_serial || by_pnp
    }
}

/// Serial part of a PnP instance path: the last `\` segment without its
/// `&<n>` suffix.
fn pnp_instance_serial(pnp_device_id: &str) -> Option<&str> {
    let instance = pnp_device_id.rsplit('\\').next()?;
    let serial = match instance.rsplit_once('&') {
        Some((head, tail)) if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) => head,
        _ => instance,
    };
    (!serial.is_empty()).then_some(serial)
}

pub fn parse_volume_rows(raw: &str) -> Result<Vec<VolumeRow>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    if raw.starts_with('[') {
        serde_json::from_str(raw).context("parse volume rows")
    } else {
        Ok(vec![serde_json::from_str(raw).context("parse volume row")?])
    }
}

/// First drive root (`E:\`) on a disk carrying `serial`.
pub fn first_mount_for_serial(rows: &[VolumeRow], serial: &str) -> Option<PathBuf> {
    rows.iter()
        .filter(|row| row.matches_serial(serial))
        .find_map(|row| row.device_id.as_deref())
        .map(|device_id| PathBuf::from(format!("{}\\", device_id.trim_end_matches('\\'))))
}

pub fn query_volume_rows() -> Result<Vec<VolumeRow>> {
    let raw = run_powershell(VOLUME_ROWS_SCRIPT)?;
    parse_volume_rows(&raw)
}

#[cfg(windows)]
fn run_powershell(script: &str) -> Result<String> {
    let output = std::process::Command::new("powershell")
        .args(["-NoProfile", "-NonInteractive", "-Command", script])
        .output()
        .context("run powershell")?;
    if !output.status.success() {
        return Err(anyhow!(
            "powershell failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(not(windows))]
fn run_powershell(_script: &str) -> Result<String> {
    Err(anyhow!("WMI serial lookup requires Windows"))
}
