//! Derived manifests: the rolling week gallery and the months-present index.
//!
//! Both are pure projections of the snapshot corpus plus the ledger; they are
//! discarded and rebuilt wholesale on every run and never read back as input.

use std::fs::{self, File};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::config::CaptureWindow;
use crate::corpus::SnapshotStore;
use crate::ledger::VisibilityLedger;

const NOON: u32 = 12;
const WEEK_MANIFEST: &str = "last7days.json";

/// One day's chosen snapshot in the rolling-week gallery.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WeekEntry {
    /// Gallery file name, `YYYY-MM-DD_HH.png`.
    pub file: String,
    /// Calendar date, `YYYY-MM-DD`.
    pub date: String,
    /// Hour of the chosen snapshot, zero-padded.
    pub time: String,
    /// Visibility estimate for that hour, when the ledger has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility_ft: Option<f64>,
    /// Conditions description paired with the estimate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<String>,
}

/// One populated month in the months index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthEntry {
    /// Year directory name.
    pub year: String,
    /// Month directory name.
    pub month: String,
}

/// Rebuilds the rolling-week gallery from scratch.
///
/// For each of the 7 most recent days (today included) the in-window snapshot
/// closest to noon wins; ties go to the earliest hour because the day scan is
/// ascending. Days without an in-window snapshot are omitted. The chosen PNGs
/// are copied into `out_dir` and the entry list is written alongside them.
pub fn build_last7(
    store: &SnapshotStore,
    ledger: &VisibilityLedger,
    window: &CaptureWindow,
    today: NaiveDate,
    out_dir: &Path,
) -> Result<Vec<WeekEntry>> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    clear_gallery(out_dir)?;

    let lookup = ledger.hour_lookup()?;
    let mut entries = Vec::new();
    for offset in 0..7 {
        let day = today - Duration::days(offset);
        let Some((hour, source)) = store
            .day_snapshots(day)
            .into_iter()
            .filter(|(hour, _)| window.contains(*hour))
            .min_by_key(|(hour, _)| hour.abs_diff(NOON))
        else {
            continue;
        };

        let date = day.format("%Y-%m-%d").to_string();
        let file = format!("{date}_{hour:02}.png");
        fs::copy(&source, out_dir.join(&file))
            .with_context(|| format!("failed to copy {}", source.display()))?;

        let mut entry = WeekEntry {
            file,
            date: date.clone(),
            time: format!("{hour:02}"),
            visibility_ft: None,
            conditions: None,
        };
        if let Some(logged) = lookup.get(&format!("{date} {hour:02}")) {
            if let Some(visibility_ft) = logged.visibility_ft {
                entry.visibility_ft = Some(visibility_ft);
                entry.conditions = Some(logged.conditions.clone());
            }
        }
        entries.push(entry);
    }

    let manifest_path = out_dir.join(WEEK_MANIFEST);
    let file = File::create(&manifest_path)
        .with_context(|| format!("failed to create {}", manifest_path.display()))?;
    serde_json::to_writer(file, &entries).context("failed to write week manifest")?;
    Ok(entries)
}

/// Rebuilds the months index from scratch and writes it to `out_file`.
pub fn build_months(store: &SnapshotStore, out_file: &Path) -> Result<Vec<MonthEntry>> {
    let entries: Vec<MonthEntry> = store
        .months()
        .into_iter()
        .map(|(year, month)| MonthEntry { year, month })
        .collect();
    if let Some(parent) = out_file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file = File::create(out_file)
        .with_context(|| format!("failed to create {}", out_file.display()))?;
    serde_json::to_writer(file, &entries).context("failed to write months manifest")?;
    Ok(entries)
}

/// Removes every prior gallery artifact so stale entries cannot survive a
/// partially-failed previous run.
fn clear_gallery(out_dir: &Path) -> Result<()> {
    let entries = fs::read_dir(out_dir)
        .with_context(|| format!("failed to read {}", out_dir.display()))?;
    for entry in entries.filter_map(std::result::Result::ok) {
        let path = entry.path();
        let is_gallery_png = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("png"))
            .unwrap_or(false);
        let is_manifest = path
            .file_name()
            .map(|name| name == WEEK_MANIFEST)
            .unwrap_or(false);
        if is_gallery_png || is_manifest {
            let _ = fs::remove_file(&path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::VisibilityRecord;
    use tempfile::tempdir;

    fn touch(base: &Path, rel: &str) {
        let path = base.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"png").unwrap();
    }

    #[test]
    fn picks_the_snapshot_closest_to_noon() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshots"));
        for hour in ["09", "13", "18"] {
            touch(store.base(), &format!("2026/07/03/{hour}.png"));
        }
        let ledger = VisibilityLedger::new(dir.path().join("visibility.csv"));
        let today = NaiveDate::from_ymd_opt(2026, 7, 3).unwrap();

        let entries = build_last7(
            &store,
            &ledger,
            &CaptureWindow::new(6, 19),
            today,
            &dir.path().join("last7days"),
        )
        .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].time, "13");
        assert_eq!(entries[0].file, "2026-07-03_13.png");
        assert!(dir.path().join("last7days/2026-07-03_13.png").exists());
    }

    #[test]
    fn out_of_window_hours_never_win() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshots"));
        // Hour 12 would be a perfect noon match but sits outside the window.
        touch(store.base(), "2026/07/03/12.png");
        touch(store.base(), "2026/07/03/15.png");
        let ledger = VisibilityLedger::new(dir.path().join("visibility.csv"));
        let today = NaiveDate::from_ymd_opt(2026, 7, 3).unwrap();

        let entries = build_last7(
            &store,
            &ledger,
            &CaptureWindow::new(14, 19),
            today,
            &dir.path().join("last7days"),
        )
        .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].time, "15");
    }

    #[test]
    fn empty_days_are_omitted_not_zero_filled() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshots"));
        touch(store.base(), "2026/07/03/10.png");
        touch(store.base(), "2026/07/01/11.png");
        let ledger = VisibilityLedger::new(dir.path().join("visibility.csv"));
        let today = NaiveDate::from_ymd_opt(2026, 7, 3).unwrap();

        let entries = build_last7(
            &store,
            &ledger,
            &CaptureWindow::new(6, 19),
            today,
            &dir.path().join("last7days"),
        )
        .unwrap();
        let dates: Vec<&str> = entries.iter().map(|entry| entry.date.as_str()).collect();
        assert_eq!(dates, vec!["2026-07-03", "2026-07-01"]);
    }

    #[test]
    fn entries_are_enriched_from_the_ledger_when_present() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshots"));
        touch(store.base(), "2026/07/03/13.png");
        touch(store.base(), "2026/07/02/11.png");

        let ledger = VisibilityLedger::new(dir.path().join("visibility.csv"));
        ledger
            .append(&VisibilityRecord {
                timestamp: "2026-07-03 13:07".to_string(),
                visibility_ft: 18.0,
                conditions: "blue water".to_string(),
            })
            .unwrap();
        ledger
            .append(&VisibilityRecord {
                timestamp: "2026-07-02 11:00".to_string(),
                visibility_ft: f64::NAN,
                conditions: "camera offline".to_string(),
            })
            .unwrap();

        let today = NaiveDate::from_ymd_opt(2026, 7, 3).unwrap();
        let entries = build_last7(
            &store,
            &ledger,
            &CaptureWindow::new(6, 19),
            today,
            &dir.path().join("last7days"),
        )
        .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].visibility_ft, Some(18.0));
        assert_eq!(entries[0].conditions.as_deref(), Some("blue water"));
        // The sentinel row contributes nothing.
        assert_eq!(entries[1].visibility_ft, None);
        assert_eq!(entries[1].conditions, None);
    }

    #[test]
    fn rebuild_clears_stale_gallery_artifacts() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshots"));
        touch(store.base(), "2026/07/03/13.png");
        let ledger = VisibilityLedger::new(dir.path().join("visibility.csv"));

        let out_dir = dir.path().join("last7days");
        fs::create_dir_all(&out_dir).unwrap();
        fs::write(out_dir.join("2020-01-01_09.png"), b"stale").unwrap();
        fs::write(out_dir.join("last7days.json"), b"[]").unwrap();
        fs::write(out_dir.join("README.txt"), b"keep me").unwrap();

        let today = NaiveDate::from_ymd_opt(2026, 7, 3).unwrap();
        build_last7(
            &store,
            &ledger,
            &CaptureWindow::new(6, 19),
            today,
            &out_dir,
        )
        .unwrap();

        assert!(!out_dir.join("2020-01-01_09.png").exists());
        assert!(out_dir.join("README.txt").exists());
        assert!(out_dir.join("2026-07-03_13.png").exists());

        let written: Vec<WeekEntry> =
            serde_json::from_str(&fs::read_to_string(out_dir.join("last7days.json")).unwrap())
                .unwrap();
        assert_eq!(written.len(), 1);
    }

    #[test]
    fn months_manifest_lists_populated_months() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshots"));
        touch(store.base(), "2025/12/31/10.png");
        touch(store.base(), "2026/07/01/12.png");
        fs::create_dir_all(store.base().join("2026/09/01")).unwrap();

        let out_file = dir.path().join("docs/months.json");
        let entries = build_months(&store, &out_file).unwrap();
        assert_eq!(
            entries,
            vec![
                MonthEntry {
                    year: "2025".to_string(),
                    month: "12".to_string()
                },
                MonthEntry {
                    year: "2026".to_string(),
                    month: "07".to_string()
                },
            ]
        );
        let written: Vec<MonthEntry> =
            serde_json::from_str(&fs::read_to_string(&out_file).unwrap()).unwrap();
        assert_eq!(written, entries);
    }
}
