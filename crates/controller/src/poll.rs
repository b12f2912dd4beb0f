use std::thread;
use std::time::Duration;

pub const MOUNT_WAIT_TIME: u32 = 25;
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Bounds for mount and unmount detection. The same policy drives both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub attempts: u32,
    /// Wait after a confirmed transition for the MSD transport to drain.
    pub settle: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            attempts: MOUNT_WAIT_TIME,
            settle: SETTLE_DELAY,
        }
    }
}

impl PollPolicy {
    pub fn settle(&self) {
        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }
    }
}

/// Calls `check` up to `policy.attempts` times, sleeping `policy.interval`
/// after each miss. Returns the 1-based attempt that succeeded.
pub fn poll_until<F>(policy: &PollPolicy, mut check: F) -> Option<u32>
where
    F: FnMut(u32) -> bool,
{
    for attempt in 1..=policy.attempts {
        if check(attempt) {
            return Some(attempt);
        }
        thread::sleep(policy.interval);
    }
    None
}
