use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use msd_controller::{platform_locator, MsdController, PollPolicy, ResultSink, Strategy, MOUNT_WAIT_TIME};
use msd_core::{DiskIdentity, DiskLocator, HostOs};
use msd_report::{create_report_bundle, SessionSummary};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "msd", about = "Host side checks for USB mass storage device tests")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the removable disks currently mounted, as JSON
    ListDisks {
        #[arg(long)]
        pretty: bool,
    },
    /// Print the mount path of the volume on the disk with this serial
    Resolve {
        #[arg(long, env = "MSD_SERIAL")]
        serial: String,
    },
    /// Print the total filesystem size at a mount path
    FsSize {
        #[arg(long)]
        mount: PathBuf,
    },
    /// Unmount or eject the disk at a mount path
    Unmount {
        #[arg(long)]
        mount: PathBuf,
    },
    /// Answer action requests read from stdin, one `<key> <value>` per line
    Serve(ServeArgs),
}

#[derive(Debug, Args)]
struct ServeArgs {
    /// Find the disk by hardware serial instead of by snapshot diff
    #[arg(long, env = "MSD_SERIAL")]
    serial: Option<String>,
    /// Poll attempts for mount and unmount detection
    #[arg(long, env = "MSD_MOUNT_WAIT", default_value_t = MOUNT_WAIT_TIME)]
    mount_wait: u32,
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,
    /// Wait after a confirmed transition before replying
    #[arg(long, default_value_t = 2000)]
    settle_ms: u64,
    /// Write a session report under <DIR>/reports/<run_id> at end of input
    #[arg(long, value_name = "DIR")]
    report_base: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let os = HostOs::current();
    let locator = platform_locator(os);

    match cli.command {
        Command::ListDisks { pretty } => {
            let disks = locator.list_disks()?;
            if pretty {
                println!("{}", serde_json::to_string_pretty(&disks)?);
            } else {
                println!("{}", serde_json::to_string(&disks)?);
            }
            Ok(())
        }
        Command::Resolve { serial } => {
            let mount = locator
                .resolve_by_serial(&serial)?
                .ok_or_else(|| anyhow!("no volume found for serial {}", serial))?;
            println!("{}", mount.display());
            Ok(())
        }
        Command::FsSize { mount } => {
            println!("{}", locator.total_bytes(&mount)?);
            Ok(())
        }
        Command::Unmount { mount } => {
            if !locator.unmount(&DiskIdentity::from_mount_point(&mount)) {
                return Err(anyhow!("{} still mounted", mount.display()));
            }
            println!("unmounted {}", mount.display());
            Ok(())
        }
        Command::Serve(args) => serve(os, locator, args),
    }
}

fn serve(os: HostOs, locator: Box<dyn DiskLocator>, args: ServeArgs) -> Result<()> {
    let policy = PollPolicy {
        interval: Duration::from_millis(args.interval_ms),
        attempts: args.mount_wait,
        settle: Duration::from_millis(args.settle_ms),
    };
    let strategy = match args.serial {
        Some(serial) => Strategy::Serial(serial),
        None => Strategy::Diff,
    };
    log::info!("serving on {} with {:?}, {:?}", os.as_str(), strategy, policy);
    let mut controller = MsdController::new(locator, strategy, policy);
    let mut sink = LineSink::new(io::stdout());

    for line in io::stdin().lock().lines() {
        let line = line.context("read request")?;
        let Some((key, value)) = parse_request(&line) else {
            continue;
        };
        controller.handle_and_reply(key, value, &mut sink)?;
    }

    if let Some(base) = args.report_base {
        let strategy = match controller.strategy() {
            Strategy::Diff => "diff".to_string(),
            Strategy::Serial(serial) => format!("serial:{}", serial),
        };
        let summary = SessionSummary {
            host_os: os,
            strategy,
            initial_disks: controller.initial_snapshot(),
            actions: controller.history(),
        };
        let report = create_report_bundle(base, &summary)?;
        log::info!("run_json: {}", report.run_json.display());
    }
    Ok(())
}

/// Splits `<key> <value...>`; the value keeps its inner spaces.
fn parse_request(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(match line.split_once(char::is_whitespace) {
        Some((key, value)) => (key, value.trim()),
        None => (line, ""),
    })
}

struct LineSink<W: Write> {
    out: W,
}

impl<W: Write> LineSink<W> {
    fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> ResultSink for LineSink<W> {
    fn send_kv(&mut self, key: &str, value: &str) -> Result<()> {
        writeln!(self.out, "{} {}", key, value)?;
        self.out.flush()?;
        Ok(())
    }
}
