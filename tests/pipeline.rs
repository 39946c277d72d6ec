//! End-to-end flow over the public API: seed a corpus, backfill it, and
//! rebuild the derived manifests.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use pierwatch::{
    build_last7, build_months, run_backfill, CaptureWindow, Estimate, Estimator, SnapshotStore,
    VisibilityLedger,
};
use tempfile::tempdir;

/// Deterministic estimator keyed off the snapshot's hour so enrichment is
/// checkable downstream.
#[derive(Clone)]
struct HourEstimator;

impl Estimator for HourEstimator {
    fn estimate(&self, image: &Path) -> Estimate {
        let hour: f64 = image
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse().ok())
            .unwrap_or(0.0);
        Estimate {
            visibility_ft: hour + 0.5,
            conditions: format!("scripted at hour {hour}"),
        }
    }
}

fn touch(base: &Path, rel: &str) {
    let path = base.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"png").unwrap();
}

#[test]
fn backfill_then_manifests_round_trip() {
    let dir = tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("snapshots"));
    let ledger = Arc::new(VisibilityLedger::new(dir.path().join("docs/visibility.csv")));

    // Two days of July plus an out-of-window stray and another month.
    touch(store.base(), "2026/07/01/09.png");
    touch(store.base(), "2026/07/01/13.png");
    touch(store.base(), "2026/07/01/18.png");
    touch(store.base(), "2026/07/02/05.png");
    touch(store.base(), "2026/07/02/11.png");
    touch(store.base(), "2026/06/30/12.png");

    let report = run_backfill(&store, Arc::clone(&ledger), HourEstimator, 2026, 7, 3).unwrap();
    assert_eq!(report.found, 5);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.processed, 5);
    assert_eq!(report.failed, 0);

    // Resumability: nothing new on a second pass.
    let again = run_backfill(&store, Arc::clone(&ledger), HourEstimator, 2026, 7, 3).unwrap();
    assert_eq!(again.processed, 0);
    assert_eq!(again.skipped, 5);

    // Unique timestamps survive the parallel run.
    let index = ledger.load_index().unwrap();
    assert_eq!(index.len(), 5);

    let window = CaptureWindow::new(6, 19);
    let removed = store.purge_outside_window(&window);
    assert_eq!(removed, 1, "only the 05:00 stray is outside the window");

    let today = NaiveDate::from_ymd_opt(2026, 7, 2).unwrap();
    let last7_dir = dir.path().join("docs/last7days");
    let entries = build_last7(&store, &ledger, &window, today, &last7_dir).unwrap();

    // 07-02 picks 11 (05 was purged), 07-01 picks 13, 06-30 picks 12.
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].date, "2026-07-02");
    assert_eq!(entries[0].time, "11");
    assert_eq!(entries[0].visibility_ft, Some(11.5));
    assert_eq!(entries[1].date, "2026-07-01");
    assert_eq!(entries[1].time, "13");
    assert_eq!(entries[1].visibility_ft, Some(13.5));
    assert_eq!(entries[2].date, "2026-06-30");
    assert_eq!(entries[2].time, "12");
    for entry in &entries {
        assert!(last7_dir.join(&entry.file).exists());
    }

    let months = build_months(&store, &dir.path().join("docs/months.json")).unwrap();
    let pairs: Vec<(String, String)> = months
        .into_iter()
        .map(|entry| (entry.year, entry.month))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("2026".to_string(), "06".to_string()),
            ("2026".to_string(), "07".to_string()),
        ]
    );
}
