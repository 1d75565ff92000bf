// SPDX-License-Identifier: Apache-2.0

use crate::{emit_ok_payload, CliError, OutputMode};
use runlens_server::{list_persisted_reports, sweep_reports};
use serde_json::json;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

const SECS_PER_HOUR: u64 = 60 * 60;

pub(crate) fn sweep(
    root: &Path,
    max_age_hours: u64,
    dry_run: bool,
    output_mode: OutputMode,
) -> Result<(), CliError> {
    let max_age = Duration::from_secs(max_age_hours.saturating_mul(SECS_PER_HOUR));
    let now = SystemTime::now();
    if dry_run {
        let reports = list_persisted_reports(root, "index.html", now)
            .map_err(|e| CliError::internal(format!("{}: {e}", root.display())))?;
        let candidates: Vec<&str> = reports
            .iter()
            .filter(|r| r.age_secs > max_age.as_secs())
            .map(|r| r.name.as_str())
            .collect();
        return emit_ok_payload(
            output_mode,
            json!({
                "root": root.display().to_string(),
                "max_age_hours": max_age_hours,
                "dry_run": true,
                "scanned": reports.len(),
                "candidates": candidates,
            }),
        );
    }

    let report = sweep_reports(root, max_age, now);
    for err in &report.errors {
        warn!(error = %err, "report sweep entry failed");
    }
    info!(
        root = %root.display(),
        scanned = report.scanned,
        deleted = report.deleted.len(),
        "report sweep finished"
    );
    emit_ok_payload(
        output_mode,
        json!({
            "root": root.display().to_string(),
            "max_age_hours": max_age_hours,
            "dry_run": false,
            "scanned": report.scanned,
            "deleted": report.deleted,
            "errors": report.errors,
        }),
    )?;
    if report.errors.is_empty() {
        Ok(())
    } else {
        Err(CliError::partial(format!(
            "{} entries under {} could not be deleted",
            report.errors.len(),
            root.display()
        )))
    }
}

pub(crate) fn inspect(
    root: &Path,
    entry_point: &str,
    output_mode: OutputMode,
) -> Result<(), CliError> {
    let reports = list_persisted_reports(root, entry_point, SystemTime::now())
        .map_err(|e| CliError::internal(format!("{}: {e}", root.display())))?;
    emit_ok_payload(
        output_mode,
        json!({
            "root": root.display().to_string(),
            "count": reports.len(),
            "reports": reports,
        }),
    )
}
