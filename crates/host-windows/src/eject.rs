use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tempfile::TempPath;

#[cfg(not(windows))]
use anyhow::anyhow;

const EJECT_SCRIPT: &str = "\
$drive_letter=$args[0]
$driveEject = New-Object -comObject Shell.Application
$driveEject.Namespace(17).ParseName($drive_letter).InvokeVerb(\"Eject\")
";

#[derive(Debug, Clone, Copy)]
pub struct EjectPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for EjectPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_secs(1),
        }
    }
}

/// Writes the eject script to a `.ps1` temp file. The file is removed when
/// the returned path is dropped.
pub fn write_eject_script() -> Result<TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix("msd_eject_")
        .suffix(".ps1")
        .tempfile()
        .context("create eject script")?;
    file.write_all(EJECT_SCRIPT.as_bytes())
        .context("write eject script")?;
    // Close the handle so powershell can open the file.
    Ok(file.into_temp_path())
}

/// Runs the eject script against `mount` until `still_present` reports the
/// drive gone or the attempt budget runs out. The script file lives only
/// for the duration of this call, including when `run` fails.
pub fn eject_with_retries<R, P>(
    mount: &str,
    policy: EjectPolicy,
    mut run: R,
    mut still_present: P,
) -> Result<bool>
where
    R: FnMut(&Path, &str) -> Result<()>,
    P: FnMut() -> bool,
{
    let script = write_eject_script()?;
    for attempt in 1..=policy.attempts {
        run(&*script, mount)?;
        if !still_present() {
            log::info!("{} ejected after {} attempt(s)", mount, attempt);
            return Ok(true);
        }
        log::debug!("{} still present after eject attempt {}", mount, attempt);
        thread::sleep(policy.interval);
    }
    Ok(false)
}

#[cfg(windows)]
pub fn run_eject_script(script: &Path, mount: &str) -> Result<()> {
    let status = std::process::Command::new("powershell.exe")
        .args(["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass", "-File"])
        .arg(script)
        .arg(mount)
        .status()
        .context("run powershell eject")?;
    if !status.success() {
        log::warn!("eject script for {} exited with {}", mount, status);
    }
    Ok(())
}

#[cfg(not(windows))]
pub fn run_eject_script(_script: &Path, mount: &str) -> Result<()> {
    Err(anyhow!("Shell.Application eject of {} requires Windows", mount))
}
