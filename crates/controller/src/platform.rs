use msd_core::{DiskLocator, HostOs, UnsupportedLocator};
use msd_host_linux::LinuxLocator;
use msd_host_macos::MacosLocator;
use msd_host_windows::WindowsLocator;

/// The locator variant for `os`. Chosen once and handed to the controller.
pub fn platform_locator(os: HostOs) -> Box<dyn DiskLocator> {
    match os {
        HostOs::Windows => Box::new(WindowsLocator::new()),
        HostOs::Linux => Box::new(LinuxLocator::new()),
        HostOs::Macos => Box::new(MacosLocator::new()),
        HostOs::Unknown => {
            log::warn!("unsupported host, no disk will ever be found");
            Box::new(UnsupportedLocator)
        }
    }
}
