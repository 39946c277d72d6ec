//! Parallel, resumable backfill of visibility estimates over one month.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::bounded;

use crate::corpus::SnapshotStore;
use crate::ledger::{VisibilityLedger, VisibilityRecord};
use crate::oracle::Estimator;

/// Default worker-pool width.
pub const DEFAULT_WORKERS: usize = 10;

/// Outcome counters for one backfill run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Snapshots discovered in the month.
    pub found: usize,
    /// Snapshots skipped because their timestamp was already logged.
    pub skipped: usize,
    /// Rows appended successfully.
    pub processed: usize,
    /// Items whose append failed; they are dropped, not retried.
    pub failed: usize,
}

struct BackfillItem {
    index: usize,
    timestamp: String,
    path: PathBuf,
}

/// Estimates every not-yet-logged snapshot of the month and appends the
/// results to the ledger.
///
/// Membership in the existing log is checked before dispatch, so re-running
/// after an interruption only touches the missing timestamps. Row order in
/// the ledger is commit order. A failing item is counted and dropped without
/// disturbing its siblings.
pub fn run<E>(
    store: &SnapshotStore,
    ledger: Arc<VisibilityLedger>,
    estimator: E,
    year: i32,
    month: u32,
    workers: usize,
) -> Result<BackfillReport>
where
    E: Estimator + Clone + Send + 'static,
{
    let snapshots = store.month_snapshots(year, month);
    let found = snapshots.len();
    eprintln!("Found {found} images in {year:04}/{month:02}");

    let existing = ledger.load_index().context("failed to read existing ledger")?;
    let to_process: Vec<BackfillItem> = snapshots
        .into_iter()
        .map(|(slot, path)| (slot.timestamp(), path))
        .filter(|(timestamp, _)| !existing.contains(timestamp))
        .enumerate()
        .map(|(index, (timestamp, path))| BackfillItem {
            index: index + 1,
            timestamp,
            path,
        })
        .collect();

    let skipped = found - to_process.len();
    if skipped > 0 {
        eprintln!("Skipping {skipped} already-estimated images");
    }

    let mut report = BackfillReport {
        found,
        skipped,
        ..BackfillReport::default()
    };
    if to_process.is_empty() {
        return Ok(report);
    }

    let total = to_process.len();
    let workers = workers.max(1).min(total);
    eprintln!("Processing {total} images with {workers} parallel workers...");

    let processed = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let (task_tx, task_rx) = bounded::<BackfillItem>(workers * 2);

    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let worker_rx = task_rx.clone();
        let worker_ledger = Arc::clone(&ledger);
        let worker_estimator = estimator.clone();
        let worker_processed = Arc::clone(&processed);
        let worker_failed = Arc::clone(&failed);
        let builder = thread::Builder::new().name(format!("pierwatch-backfill-{worker_id}"));
        handles.push(
            builder
                .spawn(move || {
                    for item in worker_rx.iter() {
                        let estimate = worker_estimator.estimate(&item.path);
                        let record = VisibilityRecord {
                            timestamp: item.timestamp.clone(),
                            visibility_ft: estimate.visibility_ft,
                            conditions: estimate.conditions,
                        };
                        match worker_ledger.append(&record) {
                            Ok(()) => {
                                worker_processed.fetch_add(1, Ordering::Relaxed);
                                eprintln!(
                                    "  [{}/{}] {} — ~{} ft",
                                    item.index, total, item.timestamp, record.visibility_ft
                                );
                            }
                            Err(err) => {
                                worker_failed.fetch_add(1, Ordering::Relaxed);
                                eprintln!("  failed to record {}: {err:#}", item.timestamp);
                            }
                        }
                    }
                })
                .context("failed to spawn backfill worker")?,
        );
    }
    drop(task_rx);

    for item in to_process {
        if task_tx.send(item).is_err() {
            break;
        }
    }
    drop(task_tx);

    for handle in handles {
        if handle.join().is_err() {
            eprintln!("backfill worker panicked; continuing with remaining results");
        }
    }

    report.processed = processed.load(Ordering::Relaxed);
    report.failed = failed.load(Ordering::Relaxed);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::Estimate;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    #[derive(Clone)]
    struct FixedEstimator {
        visibility_ft: f64,
    }

    impl Estimator for FixedEstimator {
        fn estimate(&self, _image: &Path) -> Estimate {
            Estimate {
                visibility_ft: self.visibility_ft,
                conditions: "scripted".to_string(),
            }
        }
    }

    fn touch(base: &Path, rel: &str) {
        let path = base.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"png").unwrap();
    }

    #[test]
    fn processes_only_missing_timestamps() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshots"));
        touch(store.base(), "2026/07/01/09.png");
        touch(store.base(), "2026/07/01/13.png");
        touch(store.base(), "2026/07/02/10.png");

        let ledger = Arc::new(VisibilityLedger::new(dir.path().join("visibility.csv")));
        ledger
            .append(&VisibilityRecord {
                timestamp: "2026-07-01 09:00".to_string(),
                visibility_ft: 20.0,
                conditions: "pre-seeded".to_string(),
            })
            .unwrap();

        let report = run(
            &store,
            Arc::clone(&ledger),
            FixedEstimator { visibility_ft: 14.0 },
            2026,
            7,
            4,
        )
        .unwrap();

        assert_eq!(report.found, 3);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 0);

        let index = ledger.load_index().unwrap();
        assert_eq!(index.len(), 3);
        assert!(index.contains("2026-07-01 13:00"));
        assert!(index.contains("2026-07-02 10:00"));
    }

    #[test]
    fn second_run_appends_nothing() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshots"));
        touch(store.base(), "2026/07/01/09.png");
        touch(store.base(), "2026/07/01/10.png");

        let ledger = Arc::new(VisibilityLedger::new(dir.path().join("visibility.csv")));
        let estimator = FixedEstimator { visibility_ft: 9.0 };

        let first = run(&store, Arc::clone(&ledger), estimator.clone(), 2026, 7, 2).unwrap();
        assert_eq!(first.processed, 2);

        let second = run(&store, Arc::clone(&ledger), estimator, 2026, 7, 2).unwrap();
        assert_eq!(second.processed, 0);
        assert_eq!(second.skipped, 2);

        let contents = fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(contents.lines().count(), 3, "header plus one row per image");
    }

    #[test]
    fn timestamps_stay_unique_after_a_run() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshots"));
        for day in 1..=3 {
            for hour in [8, 12, 16] {
                touch(store.base(), &format!("2026/07/{day:02}/{hour:02}.png"));
            }
        }

        let ledger = Arc::new(VisibilityLedger::new(dir.path().join("visibility.csv")));
        let report = run(
            &store,
            Arc::clone(&ledger),
            FixedEstimator { visibility_ft: 11.0 },
            2026,
            7,
            10,
        )
        .unwrap();
        assert_eq!(report.processed, 9);

        let contents = fs::read_to_string(ledger.path()).unwrap();
        let rows = contents.lines().count() - 1;
        assert_eq!(rows, 9);
        assert_eq!(ledger.load_index().unwrap().len(), 9);
    }

    #[test]
    fn sentinel_estimates_still_complete_their_items() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshots"));
        touch(store.base(), "2026/07/01/09.png");

        let ledger = Arc::new(VisibilityLedger::new(dir.path().join("visibility.csv")));
        let report = run(
            &store,
            Arc::clone(&ledger),
            FixedEstimator {
                visibility_ft: f64::NAN,
            },
            2026,
            7,
            1,
        )
        .unwrap();
        assert_eq!(report.processed, 1);

        let lookup = ledger.hour_lookup().unwrap();
        assert!(lookup.get("2026-07-01 09").unwrap().visibility_ft.is_none());
    }

    #[test]
    fn empty_month_reports_zeroes() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshots"));
        let ledger = Arc::new(VisibilityLedger::new(dir.path().join("visibility.csv")));

        let report = run(
            &store,
            ledger,
            FixedEstimator { visibility_ft: 1.0 },
            2026,
            1,
            4,
        )
        .unwrap();
        assert_eq!(report, BackfillReport::default());
    }
}
