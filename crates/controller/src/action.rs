use anyhow::{anyhow, Result};

/// Placeholder value the test framework sends when an action has no
/// parameters.
pub const EMPTY_PAYLOAD: &str = "0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    RecordDiskList,
    CheckIfMounted { serial: Option<String> },
    CheckIfNotMounted { serial: Option<String> },
    GetMountedFsSize,
    CheckFileExist { folder: String, file: String, content: String },
    DeleteFiles { dir: String, file: String },
    Unmount,
}

impl Action {
    /// Parses an inbound request. `Ok(None)` for keys this controller does
    /// not handle; an error when a known action carries malformed parameters.
    pub fn parse(key: &str, value: &str) -> Result<Option<Action>> {
        let action = match key {
            "record_disk_list" => Action::RecordDiskList,
            "check_if_mounted" => Action::CheckIfMounted {
                serial: serial_param(value),
            },
            "check_if_not_mounted" => Action::CheckIfNotMounted {
                serial: serial_param(value),
            },
            "get_mounted_fs_size" => Action::GetMountedFsSize,
            "check_file_exist" => {
                let [folder, file, content] = params::<3>(key, value)?;
                Action::CheckFileExist { folder, file, content }
            }
            "delete_files" => {
                let [dir, file] = params::<2>(key, value)?;
                Action::DeleteFiles { dir, file }
            }
            "unmount" => Action::Unmount,
            _ => return Ok(None),
        };
        Ok(Some(action))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::RecordDiskList => "record_disk_list",
            Action::CheckIfMounted { .. } => "check_if_mounted",
            Action::CheckIfNotMounted { .. } => "check_if_not_mounted",
            Action::GetMountedFsSize => "get_mounted_fs_size",
            Action::CheckFileExist { .. } => "check_file_exist",
            Action::DeleteFiles { .. } => "delete_files",
            Action::Unmount => "unmount",
        }
    }
}

fn serial_param(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value == EMPTY_PAYLOAD {
        None
    } else {
        Some(value.to_string())
    }
}

fn params<const N: usize>(key: &str, value: &str) -> Result<[String; N]> {
    let parts: Vec<String> = value.split_whitespace().map(str::to_string).collect();
    let count = parts.len();
    parts
        .try_into()
        .map_err(|_| anyhow!("{} expects {} parameters, got {}: {:?}", key, N, count, value))
}
