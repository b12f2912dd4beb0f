use anyhow::{Context, Result};
use msd_core::{now_utc_rfc3339, ActionRecord, DiskSnapshot, HostOs, SNAPSHOT_SCHEMA_VERSION};
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct ReportPaths {
    pub run_id: String,
    pub root: PathBuf,
    pub run_json: PathBuf,
    pub disks_json: PathBuf,
}

/// What a finished test session hands over for the report.
#[derive(Debug)]
pub struct SessionSummary<'a> {
    pub host_os: HostOs,
    pub strategy: String,
    pub initial_disks: Option<&'a DiskSnapshot>,
    pub actions: &'a [ActionRecord],
}

#[derive(Debug, Serialize)]
struct RunMetadata<'a> {
    run_id: String,
    created_at_utc: String,
    host_os: HostOs,
    strategy: &'a str,
    snapshot_schema_version: &'static str,
    passed: usize,
    failed: usize,
    actions: &'a [ActionRecord],
}

/// Writes `reports/<run_id>/run.json` and `disks.json` under `base`.
pub fn create_report_bundle(base: impl AsRef<Path>, summary: &SessionSummary) -> Result<ReportPaths> {
    let run_id = Uuid::new_v4().to_string();
    let root = base.as_ref().join("reports").join(&run_id);
    std::fs::create_dir_all(&root).with_context(|| format!("create {}", root.display()))?;

    let run_json = root.join("run.json");
    let disks_json = root.join("disks.json");

    let run_meta = RunMetadata {
        run_id: run_id.clone(),
        created_at_utc: now_utc_rfc3339(),
        host_os: summary.host_os,
        strategy: &summary.strategy,
        snapshot_schema_version: SNAPSHOT_SCHEMA_VERSION,
        passed: count_result(summary.actions, "passed"),
        failed: count_result(summary.actions, "failed"),
        actions: summary.actions,
    };
    std::fs::write(&run_json, serde_json::to_string_pretty(&run_meta)?)
        .with_context(|| format!("write {}", run_json.display()))?;

    let empty = DiskSnapshot::default();
    let disks = summary.initial_disks.unwrap_or(&empty);
    std::fs::write(&disks_json, serde_json::to_string_pretty(disks)?)
        .with_context(|| format!("write {}", disks_json.display()))?;

    log::info!("report written to {}", root.display());
    Ok(ReportPaths {
        run_id,
        root,
        run_json,
        disks_json,
    })
}

fn count_result(actions: &[ActionRecord], key: &str) -> usize {
    actions
        .iter()
        .filter(|record| record.result.as_deref() == Some(key))
        .count()
}
