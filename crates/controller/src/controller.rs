use anyhow::Result;
use msd_core::{now_utc_rfc3339, ActionRecord, DiskIdentity, DiskLocator, DiskSnapshot};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::time::Instant;

use crate::action::Action;
use crate::outcome::{reply, Outcome, ResultSink};
use crate::poll::{poll_until, PollPolicy};

/// How the disk under test is told apart from every other disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// New disks relative to the snapshot taken by `record_disk_list`.
    Diff,
    /// The volume on the USB disk carrying this hardware serial.
    Serial(String),
}

/// Host side of the USB MSD test. One instance per test run; actions are
/// handled strictly one at a time.
pub struct MsdController<L: DiskLocator> {
    locator: L,
    strategy: Strategy,
    policy: PollPolicy,
    initial: Option<DiskSnapshot>,
    target: Option<DiskIdentity>,
    ambiguous_polls: u32,
    history: Vec<ActionRecord>,
}

impl<L: DiskLocator> MsdController<L> {
    pub fn new(locator: L, strategy: Strategy, policy: PollPolicy) -> Self {
        Self {
            locator,
            strategy,
            policy,
            initial: None,
            target: None,
            ambiguous_polls: 0,
            history: Vec::new(),
        }
    }

    pub fn locator(&self) -> &L {
        &self.locator
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn target(&self) -> Option<&DiskIdentity> {
        self.target.as_ref()
    }

    pub fn initial_snapshot(&self) -> Option<&DiskSnapshot> {
        self.initial.as_ref()
    }

    /// Polls of the last diff mount check that saw more than one new disk.
    pub fn ambiguous_polls(&self) -> u32 {
        self.ambiguous_polls
    }

    pub fn history(&self) -> &[ActionRecord] {
        &self.history
    }

    /// Handles one request and sends its reply through `sink`.
    pub fn handle_and_reply(
        &mut self,
        key: &str,
        value: &str,
        sink: &mut dyn ResultSink,
    ) -> Result<Outcome> {
        let outcome = self.handle(key, value);
        reply(sink, outcome)?;
        Ok(outcome)
    }

    /// Handles one request. Failures never escape: they become `Failed`
    /// or `NoReply` and are logged.
    pub fn handle(&mut self, key: &str, value: &str) -> Outcome {
        let started = Instant::now();
        let at_utc = now_utc_rfc3339();
        let outcome = match Action::parse(key, value) {
            Ok(Some(action)) => {
                log::info!("action {} ({})", action.name(), value);
                self.run(action)
            }
            Ok(None) => {
                log::warn!("ignoring unknown action {:?}", key);
                Outcome::NoReply
            }
            Err(err) => report_error(&format!("{key} ({err:#})")),
        };
        self.history.push(ActionRecord {
            action: key.to_string(),
            payload: value.to_string(),
            result: outcome.key(),
            at_utc,
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
        outcome
    }

    pub fn run(&mut self, action: Action) -> Outcome {
        match action {
            Action::RecordDiskList => self.record_disk_list(),
            Action::CheckIfMounted { serial } => self.check_if_mounted(serial),
            Action::CheckIfNotMounted { serial } => self.check_if_not_mounted(serial),
            Action::GetMountedFsSize => self.get_mounted_fs_size(),
            Action::CheckFileExist {
                folder,
                file,
                content,
            } => self.check_file_exist(&folder, &file, &content),
            Action::DeleteFiles { dir, file } => self.delete_files(&dir, &file),
            Action::Unmount => self.unmount(),
        }
    }

    pub fn record_disk_list(&mut self) -> Outcome {
        if matches!(self.strategy, Strategy::Serial(_)) {
            log::debug!("record_disk_list has no effect on serial lookup");
        }
        let snapshot = self.current_disks().unwrap_or_default();
        log::info!("recorded {} disk(s) before attach", snapshot.len());
        self.initial = Some(snapshot);
        Outcome::Passed
    }

    pub fn check_if_mounted(&mut self, serial: Option<String>) -> Outcome {
        self.override_serial(serial);
        let policy = self.policy;
        let mut found = None;
        let mut ambiguous = 0;
        let attempt = match &self.strategy {
            Strategy::Diff => {
                let initial = self.initial_or_empty();
                poll_until(&policy, |attempt| {
                    let Ok(current) = self.current_disks() else {
                        return false;
                    };
                    let added = current.newly_appeared(&initial);
                    if added.len() > 1 {
                        ambiguous += 1;
                        log::warn!(
                            "detected more than one new USB disk on attempt {}: {:?}",
                            attempt,
                            added.iter().map(|disk| &disk.mount_point).collect::<Vec<_>>()
                        );
                    }
                    found = added.into_single();
                    found.is_some()
                })
            }
            Strategy::Serial(serial) => poll_until(&policy, |_| {
                found = self
                    .resolve_serial(serial)
                    .ok()
                    .flatten()
                    .map(DiskIdentity::from_mount_point);
                found.is_some()
            }),
        };
        self.ambiguous_polls = ambiguous;
        match (attempt, found) {
            (Some(attempt), Some(disk)) => {
                log::info!(
                    "disk {} mounted at {} (attempt {})",
                    disk.device,
                    disk.mount_point.display(),
                    attempt
                );
                self.target = Some(disk);
                policy.settle();
                Outcome::Passed
            }
            _ => report_error("mount check"),
        }
    }

    pub fn check_if_not_mounted(&mut self, serial: Option<String>) -> Outcome {
        self.override_serial(serial);
        let policy = self.policy;
        // An enumeration error cannot confirm absence.
        let attempt = match &self.strategy {
            Strategy::Diff => {
                let initial = self.initial_or_empty();
                poll_until(&policy, |_| {
                    self.current_disks()
                        .map(|current| current.newly_appeared(&initial).is_empty())
                        .unwrap_or(false)
                })
            }
            Strategy::Serial(serial) => poll_until(&policy, |_| {
                matches!(self.resolve_serial(serial), Ok(None))
            }),
        };
        match attempt {
            Some(attempt) => {
                log::info!("disk gone (attempt {})", attempt);
                self.target = None;
                policy.settle();
                Outcome::Passed
            }
            None => report_error("unmount check"),
        }
    }

    pub fn get_mounted_fs_size(&mut self) -> Outcome {
        let Some(mount) = self.mount_point() else {
            log::error!("get mounted fs size failed !!! (no disk mounted)");
            return Outcome::NoReply;
        };
        match self.locator.total_bytes(&mount) {
            Ok(bytes) => {
                log::info!("{} holds {} bytes", mount.display(), bytes);
                Outcome::Size(bytes)
            }
            Err(err) => {
                log::error!("get mounted fs size failed !!! ({err:#})");
                Outcome::NoReply
            }
        }
    }

    pub fn check_file_exist(&mut self, folder: &str, file: &str, content: &str) -> Outcome {
        let Some(mount) = self.mount_point() else {
            return report_error("check file exist (no disk mounted)");
        };
        let path = mount.join(folder).join(file);
        let line = match read_first_line(&path) {
            Ok(line) => line,
            Err(err) => {
                log::info!("{}: {} !!!", path.display(), err);
                return Outcome::NonExist;
            }
        };
        self.policy.settle();
        if line == content {
            Outcome::Exist
        } else {
            log::debug!("{}: expected {:?}, found {:?}", path.display(), content, line);
            report_error("file content invalid")
        }
    }

    pub fn delete_files(&mut self, dir: &str, file: &str) -> Outcome {
        let Some(mount) = self.mount_point() else {
            return report_error("delete files (no disk mounted)");
        };
        let path = mount.join(dir).join(file);
        if let Err(err) = fs::remove_file(&path) {
            log::warn!("remove {}: {}", path.display(), err);
            return report_error("delete files");
        }
        self.policy.settle();
        Outcome::Passed
    }

    pub fn unmount(&mut self) -> Outcome {
        let target = match self.target.clone() {
            Some(target) => Some(target),
            None => self.mount_point().map(DiskIdentity::from_mount_point),
        };
        let Some(target) = target else {
            return report_error("unmount (no disk mounted)");
        };
        if !self.locator.unmount(&target) {
            return report_error("unmount");
        }
        log::info!("{} unmounted", target.mount_point.display());
        self.target = None;
        self.policy.settle();
        Outcome::Passed
    }

    fn override_serial(&mut self, serial: Option<String>) {
        if let (Strategy::Serial(current), Some(serial)) = (&mut self.strategy, serial) {
            *current = serial;
        }
    }

    fn initial_or_empty(&self) -> DiskSnapshot {
        match &self.initial {
            Some(initial) => initial.clone(),
            None => {
                log::warn!("no disk list recorded, treating every USB disk as new");
                DiskSnapshot::default()
            }
        }
    }

    fn current_disks(&self) -> Result<DiskSnapshot> {
        self.locator.list_disks().inspect_err(|err| {
            log::warn!("list disks: {err:#}");
        })
    }

    fn resolve_serial(&self, serial: &str) -> Result<Option<PathBuf>> {
        self.locator.resolve_by_serial(serial).inspect_err(|err| {
            log::warn!("resolve serial {}: {err:#}", serial);
        })
    }

    /// Mount path of the disk under test. The serial variant resolves it on
    /// demand when no mount check has cached it.
    fn mount_point(&self) -> Option<PathBuf> {
        if let Some(target) = &self.target {
            return Some(target.mount_point.clone());
        }
        match &self.strategy {
            Strategy::Serial(serial) => self.resolve_serial(serial).ok().flatten(),
            Strategy::Diff => None,
        }
    }
}

fn report_error(what: &str) -> Outcome {
    log::error!("{} failed !!!", what);
    Outcome::Failed
}

fn read_first_line(path: &std::path::Path) -> std::io::Result<String> {
    let mut line = String::new();
    BufReader::new(File::open(path)?).read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use msd_core::{HostOs, UnsupportedLocator};
    use std::cell::Cell;
    use std::path::Path;
    use std::time::Duration;

    type Schedule = Box<dyn Fn(u32) -> Result<DiskSnapshot>>;
    type SerialSchedule = Box<dyn Fn(u32, &str) -> Result<Option<PathBuf>>>;

    /// Locator whose view of the world is a function of how many times it
    /// has been asked.
    struct FakeLocator {
        list_calls: Cell<u32>,
        resolve_calls: Cell<u32>,
        schedule: Schedule,
        serials: SerialSchedule,
        unmount_ok: bool,
        ejected: Cell<bool>,
        total: Option<u64>,
    }

    impl FakeLocator {
        fn listing(schedule: impl Fn(u32) -> DiskSnapshot + 'static) -> Self {
            Self {
                list_calls: Cell::new(0),
                resolve_calls: Cell::new(0),
                schedule: Box::new(move |call| Ok(schedule(call))),
                serials: Box::new(|_, _| Ok(None)),
                unmount_ok: true,
                ejected: Cell::new(false),
                total: Some(4_161_536),
            }
        }

        fn resolving(serials: impl Fn(u32, &str) -> Option<PathBuf> + 'static) -> Self {
            Self {
                serials: Box::new(move |call, serial| Ok(serials(call, serial))),
                ..Self::listing(|_| DiskSnapshot::default())
            }
        }
    }

    impl DiskLocator for FakeLocator {
        fn os(&self) -> HostOs {
            HostOs::Linux
        }

        fn list_disks(&self) -> Result<DiskSnapshot> {
            self.list_calls.set(self.list_calls.get() + 1);
            if self.ejected.get() {
                return Ok(DiskSnapshot::default());
            }
            (self.schedule)(self.list_calls.get())
        }

        fn resolve_by_serial(&self, serial: &str) -> Result<Option<PathBuf>> {
            self.resolve_calls.set(self.resolve_calls.get() + 1);
            if self.ejected.get() {
                return Ok(None);
            }
            (self.serials)(self.resolve_calls.get(), serial)
        }

        fn unmount(&self, _target: &DiskIdentity) -> bool {
            self.ejected.set(self.unmount_ok);
            self.unmount_ok
        }

        fn total_bytes(&self, _mount_point: &Path) -> Result<u64> {
            self.total.ok_or_else(|| anyhow!("statvfs failed"))
        }
    }

    fn instant() -> PollPolicy {
        PollPolicy {
            interval: Duration::ZERO,
            attempts: 25,
            settle: Duration::ZERO,
        }
    }

    const SETTLE: Duration = Duration::from_millis(30);

    fn settling() -> PollPolicy {
        PollPolicy {
            settle: SETTLE,
            ..instant()
        }
    }

    fn timed<T>(f: impl FnOnce() -> T) -> (T, Duration) {
        let started = Instant::now();
        let value = f();
        (value, started.elapsed())
    }

    fn usb(mount: impl Into<PathBuf>) -> DiskIdentity {
        DiskIdentity::new("/dev/sdb1", mount, vec!["rw".to_string()])
    }

    fn snapshot(disks: &[DiskIdentity]) -> DiskSnapshot {
        disks.iter().cloned().collect()
    }

    fn diff(locator: FakeLocator) -> MsdController<FakeLocator> {
        MsdController::new(locator, Strategy::Diff, instant())
    }

    /// Controller whose disk under test is mounted at `mount`.
    fn mounted_at(mount: &Path) -> MsdController<FakeLocator> {
        let disk = usb(mount);
        let mut controller = diff(FakeLocator::listing(move |call| {
            if call == 1 {
                DiskSnapshot::default()
            } else {
                snapshot(&[disk.clone()])
            }
        }));
        assert_eq!(controller.record_disk_list(), Outcome::Passed);
        assert_eq!(controller.check_if_mounted(None), Outcome::Passed);
        controller
    }

    #[test]
    fn disk_appearing_on_third_poll_passes() {
        let disk = usb("/media/ci/MBED");
        let expected = disk.clone();
        // Call 1 is the recorded snapshot; polls are calls 2, 3, 4.
        let mut controller = diff(FakeLocator::listing(move |call| {
            if call >= 4 {
                snapshot(&[disk.clone()])
            } else {
                DiskSnapshot::default()
            }
        }));
        controller.record_disk_list();
        assert_eq!(controller.check_if_mounted(None), Outcome::Passed);
        assert_eq!(controller.target(), Some(&expected));
        assert_eq!(controller.locator().list_calls.get(), 4);
    }

    #[test]
    fn disk_never_appearing_fails_after_full_budget() {
        let mut controller = diff(FakeLocator::listing(|_| DiskSnapshot::default()));
        controller.record_disk_list();
        assert_eq!(controller.check_if_mounted(None), Outcome::Failed);
        assert_eq!(controller.locator().list_calls.get(), 1 + 25);
        assert!(controller.target().is_none());
    }

    #[test]
    fn two_new_disks_are_never_auto_selected() {
        let mut controller = diff(FakeLocator::listing(|_| {
            snapshot(&[usb("/media/ci/A"), usb("/media/ci/B")])
        }));
        controller.record_disk_list();
        // The first call above already saw both disks, so re-record empty.
        controller.initial = Some(DiskSnapshot::default());
        assert_eq!(controller.check_if_mounted(None), Outcome::Failed);
        assert_eq!(controller.locator().list_calls.get(), 1 + 25);
        assert_eq!(controller.ambiguous_polls(), 25);
        assert!(controller.target().is_none());
    }

    #[test]
    fn polling_continues_past_a_double_attach() {
        let mut controller = diff(FakeLocator::listing(|call| match call {
            1 => DiskSnapshot::default(),
            2 | 3 => snapshot(&[usb("/media/ci/A"), usb("/media/ci/B")]),
            _ => snapshot(&[usb("/media/ci/B")]),
        }));
        controller.record_disk_list();
        assert_eq!(controller.check_if_mounted(None), Outcome::Passed);
        assert_eq!(controller.target(), Some(&usb("/media/ci/B")));
        assert_eq!(controller.ambiguous_polls(), 2);
    }

    #[test]
    fn disks_present_before_the_snapshot_are_ignored() {
        let stick = DiskIdentity::new("/dev/sdc1", "/media/ci/STICK", vec!["rw".to_string()]);
        let board = usb("/media/ci/MBED");
        let (stick_c, board_c) = (stick.clone(), board.clone());
        let mut controller = diff(FakeLocator::listing(move |call| {
            if call == 1 {
                snapshot(&[stick_c.clone()])
            } else {
                snapshot(&[stick_c.clone(), board_c.clone()])
            }
        }));
        controller.record_disk_list();
        assert_eq!(controller.check_if_mounted(None), Outcome::Passed);
        assert_eq!(controller.target(), Some(&board));
    }

    #[test]
    fn missing_snapshot_treats_every_disk_as_new() {
        let mut controller = diff(FakeLocator::listing(|_| snapshot(&[usb("/media/ci/MBED")])));
        assert_eq!(controller.check_if_mounted(None), Outcome::Passed);
    }

    #[test]
    fn enumeration_errors_count_as_no_disk() {
        let mut locator = FakeLocator::listing(|_| DiskSnapshot::default());
        locator.schedule = Box::new(|call| {
            if call < 3 {
                Err(anyhow!("mount table unreadable"))
            } else {
                Ok(snapshot(&[usb("/media/ci/MBED")]))
            }
        });
        let mut controller = diff(locator);
        controller.initial = Some(DiskSnapshot::default());
        assert_eq!(controller.check_if_mounted(None), Outcome::Passed);
        assert_eq!(controller.locator().list_calls.get(), 3);
    }

    #[test]
    fn unmount_detection_waits_for_disk_to_vanish() {
        let disk = usb("/media/ci/MBED");
        let mut controller = diff(FakeLocator::listing(move |call| match call {
            1 => DiskSnapshot::default(),
            2..=5 => snapshot(&[disk.clone()]),
            _ => DiskSnapshot::default(),
        }));
        controller.record_disk_list();
        assert_eq!(controller.check_if_mounted(None), Outcome::Passed);
        // Polls on calls 3, 4, 5 still see the disk; call 6 does not.
        assert_eq!(controller.check_if_not_mounted(None), Outcome::Passed);
        assert_eq!(controller.locator().list_calls.get(), 6);
        assert!(controller.target().is_none());
    }

    #[test]
    fn enumeration_errors_never_confirm_unmount() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = mounted_at(dir.path());
        assert_eq!(controller.ambiguous_polls(), 0);
        controller.locator.schedule = Box::new(|_| Err(anyhow!("mount table unreadable")));
        let before = controller.locator().list_calls.get();
        assert_eq!(controller.check_if_not_mounted(None), Outcome::Failed);
        assert_eq!(controller.locator().list_calls.get(), before + 25);
        assert!(controller.target().is_some());
    }

    #[test]
    fn resolve_errors_never_confirm_unmount() {
        let mut locator = FakeLocator::resolving(|_, _| None);
        locator.serials = Box::new(|call, _| {
            if call <= 3 {
                Err(anyhow!("powershell failed"))
            } else {
                Ok(None)
            }
        });
        let mut controller =
            MsdController::new(locator, Strategy::Serial("0240000032044e45".into()), instant());
        assert_eq!(controller.check_if_not_mounted(None), Outcome::Passed);
        assert_eq!(controller.locator().resolve_calls.get(), 4);

        controller.locator.serials = Box::new(|_, _| Err(anyhow!("powershell failed")));
        assert_eq!(controller.check_if_not_mounted(None), Outcome::Failed);
    }

    #[test]
    fn settle_delay_follows_confirmed_transitions_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("TEST_DIR")).unwrap();
        fs::write(dir.path().join("TEST_DIR/test.txt"), "123456789").unwrap();
        let disk = usb(dir.path());
        let mut controller = MsdController::new(
            FakeLocator::listing(move |call| {
                if call == 1 {
                    DiskSnapshot::default()
                } else {
                    snapshot(&[disk.clone()])
                }
            }),
            Strategy::Diff,
            settling(),
        );
        controller.record_disk_list();

        let (outcome, elapsed) = timed(|| controller.check_if_mounted(None));
        assert_eq!(outcome, Outcome::Passed);
        assert!(elapsed >= SETTLE);

        let (outcome, elapsed) =
            timed(|| controller.check_file_exist("TEST_DIR", "test.txt", "123456789"));
        assert_eq!(outcome, Outcome::Exist);
        assert!(elapsed >= SETTLE);

        let (outcome, elapsed) = timed(|| controller.check_file_exist("TEST_DIR", "gone.txt", "1"));
        assert_eq!(outcome, Outcome::NonExist);
        assert!(elapsed < SETTLE);

        let (outcome, elapsed) = timed(|| controller.delete_files("TEST_DIR", "test.txt"));
        assert_eq!(outcome, Outcome::Passed);
        assert!(elapsed >= SETTLE);

        let (outcome, elapsed) = timed(|| controller.delete_files("TEST_DIR", "test.txt"));
        assert_eq!(outcome, Outcome::Failed);
        assert!(elapsed < SETTLE);

        let (outcome, elapsed) = timed(|| controller.check_if_not_mounted(None));
        assert_eq!(outcome, Outcome::Failed);
        assert!(elapsed < SETTLE);

        let (outcome, elapsed) = timed(|| controller.unmount());
        assert_eq!(outcome, Outcome::Passed);
        assert!(elapsed >= SETTLE);

        let (outcome, elapsed) = timed(|| controller.check_if_not_mounted(None));
        assert_eq!(outcome, Outcome::Passed);
        assert!(elapsed >= SETTLE);

        let (outcome, elapsed) = timed(|| controller.check_if_mounted(None));
        assert_eq!(outcome, Outcome::Failed);
        assert!(elapsed < SETTLE);
    }

    #[test]
    fn unmount_detection_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = mounted_at(dir.path());
        let before = controller.locator().list_calls.get();
        assert_eq!(controller.check_if_not_mounted(None), Outcome::Failed);
        assert_eq!(controller.locator().list_calls.get(), before + 25);
        assert!(controller.target().is_some());
    }

    #[test]
    fn file_with_matching_content_exists() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("TEST_DIR")).unwrap();
        fs::write(dir.path().join("TEST_DIR/test.txt"), "123456789\nsecond line\n").unwrap();
        let mut controller = mounted_at(dir.path());
        assert_eq!(
            controller.check_file_exist("TEST_DIR", "test.txt", "123456789"),
            Outcome::Exist
        );
    }

    #[test]
    fn file_with_other_content_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("TEST_DIR")).unwrap();
        fs::write(dir.path().join("TEST_DIR/test.txt"), "987654321").unwrap();
        let mut controller = mounted_at(dir.path());
        assert_eq!(
            controller.check_file_exist("TEST_DIR", "test.txt", "123456789"),
            Outcome::Failed
        );
    }

    #[test]
    fn missing_file_does_not_exist() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = mounted_at(dir.path());
        assert_eq!(
            controller.check_file_exist("TEST_DIR", "test.txt", "123456789"),
            Outcome::NonExist
        );
    }

    #[test]
    fn deleted_file_no_longer_exists() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("TEST_DIR")).unwrap();
        fs::write(dir.path().join("TEST_DIR/test.txt"), "123456789").unwrap();
        let mut controller = mounted_at(dir.path());
        assert_eq!(controller.delete_files("TEST_DIR", "test.txt"), Outcome::Passed);
        assert_eq!(
            controller.check_file_exist("TEST_DIR", "test.txt", "123456789"),
            Outcome::NonExist
        );
        assert_eq!(controller.delete_files("TEST_DIR", "test.txt"), Outcome::Failed);
    }

    #[test]
    fn file_actions_without_a_disk_fail() {
        let mut controller = diff(FakeLocator::listing(|_| DiskSnapshot::default()));
        assert_eq!(controller.check_file_exist("D", "f", "c"), Outcome::Failed);
        assert_eq!(controller.delete_files("D", "f"), Outcome::Failed);
        assert_eq!(controller.unmount(), Outcome::Failed);
        assert_eq!(controller.get_mounted_fs_size(), Outcome::NoReply);
    }

    #[test]
    fn reports_filesystem_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = mounted_at(dir.path());
        assert_eq!(controller.get_mounted_fs_size(), Outcome::Size(4_161_536));
        controller.locator.total = None;
        assert_eq!(controller.get_mounted_fs_size(), Outcome::NoReply);
    }

    #[test]
    fn not_mounted_check_after_unmount_passes_on_first_poll() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = mounted_at(dir.path());
        assert_eq!(controller.unmount(), Outcome::Passed);
        assert!(controller.target().is_none());
        let before = controller.locator().list_calls.get();
        assert_eq!(controller.check_if_not_mounted(None), Outcome::Passed);
        assert_eq!(controller.locator().list_calls.get(), before + 1);
    }

    #[test]
    fn failed_unmount_keeps_target() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = mounted_at(dir.path());
        controller.locator.unmount_ok = false;
        assert_eq!(controller.unmount(), Outcome::Failed);
        assert!(controller.target().is_some());
    }

    #[test]
    fn serial_lookup_mounts_when_resolved() {
        let locator = FakeLocator::resolving(|call, serial| {
            (serial == "0240000032044e45" && call >= 3).then(|| PathBuf::from("E:\\"))
        });
        let mut controller =
            MsdController::new(locator, Strategy::Serial("0240000032044e45".into()), instant());
        assert_eq!(controller.check_if_mounted(None), Outcome::Passed);
        assert_eq!(controller.target().map(|disk| disk.mount_point.clone()), Some(PathBuf::from("E:\\")));
        assert_eq!(controller.locator().resolve_calls.get(), 3);
    }

    #[test]
    fn serial_in_payload_replaces_configured_serial() {
        let locator = FakeLocator::resolving(|_, serial| {
            (serial == "AB12CD34").then(|| PathBuf::from("F:\\"))
        });
        let mut controller =
            MsdController::new(locator, Strategy::Serial("0240000032044e45".into()), instant());
        assert_eq!(
            controller.handle("check_if_mounted", "AB12CD34"),
            Outcome::Passed
        );
        assert_eq!(controller.strategy(), &Strategy::Serial("AB12CD34".into()));
    }

    #[test]
    fn unknown_serial_fails_after_full_budget() {
        let locator = FakeLocator::resolving(|_, _| None);
        let mut controller =
            MsdController::new(locator, Strategy::Serial("DEADBEEF".into()), instant());
        assert_eq!(controller.check_if_mounted(None), Outcome::Failed);
        assert_eq!(controller.locator().resolve_calls.get(), 25);
        assert_eq!(controller.check_if_not_mounted(None), Outcome::Passed);
    }

    #[test]
    fn serial_file_checks_resolve_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("TEST_DIR")).unwrap();
        fs::write(dir.path().join("TEST_DIR/test.txt"), "123456789\r\n").unwrap();
        let mount = dir.path().to_path_buf();
        let locator = FakeLocator::resolving(move |_, _| Some(mount.clone()));
        let mut controller =
            MsdController::new(locator, Strategy::Serial("0240000032044e45".into()), instant());
        assert!(controller.target().is_none());
        assert_eq!(
            controller.check_file_exist("TEST_DIR", "test.txt", "123456789"),
            Outcome::Exist
        );
    }

    #[test]
    fn unsupported_host_never_finds_or_unmounts() {
        let mut controller = MsdController::new(UnsupportedLocator, Strategy::Diff, instant());
        assert_eq!(controller.record_disk_list(), Outcome::Passed);
        assert_eq!(controller.check_if_mounted(None), Outcome::Failed);
        assert_eq!(controller.check_if_not_mounted(None), Outcome::Passed);
        assert_eq!(controller.unmount(), Outcome::Failed);

        let mut serial =
            MsdController::new(UnsupportedLocator, Strategy::Serial("X".into()), instant());
        assert_eq!(serial.check_if_mounted(None), Outcome::Failed);
        assert_eq!(serial.unmount(), Outcome::Failed);
    }

    #[test]
    fn handle_records_history_and_replies() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("TEST_DIR")).unwrap();
        fs::write(dir.path().join("TEST_DIR/test.txt"), "123456789").unwrap();
        let mut controller = mounted_at(dir.path());
        let mut sent: Vec<(String, String)> = Vec::new();

        let outcome = controller
            .handle_and_reply("check_file_exist", "TEST_DIR test.txt 123456789", &mut sent)
            .unwrap();
        assert_eq!(outcome, Outcome::Exist);
        controller.handle_and_reply("__sync", "0", &mut sent).unwrap();
        controller.handle_and_reply("delete_files", "TEST_DIR", &mut sent).unwrap();

        assert_eq!(
            sent,
            vec![
                ("exist".to_string(), "0".to_string()),
                ("failed".to_string(), "0".to_string()),
            ]
        );
        let history = controller.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].action, "check_file_exist");
        assert_eq!(history[0].result.as_deref(), Some("exist"));
        assert_eq!(history[1].result, None);
        assert_eq!(history[2].result.as_deref(), Some("failed"));
    }
}
