//! On-disk snapshot corpus laid out as `snapshots/<YYYY>/<MM>/<DD>/<HH>.png`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Local, NaiveDate, Timelike};
use walkdir::WalkDir;

use crate::config::CaptureWindow;

/// The calendar hour a snapshot belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct HourSlot {
    /// Calendar year.
    pub year: i32,
    /// Calendar month, 1-12.
    pub month: u32,
    /// Day of month, 1-31.
    pub day: u32,
    /// Hour of day, 0-23.
    pub hour: u32,
}

impl HourSlot {
    /// Derives the slot for a local wall-clock instant.
    pub fn from_local(now: &DateTime<Local>) -> Self {
        Self {
            year: now.year(),
            month: now.month(),
            day: now.day(),
            hour: now.hour(),
        }
    }

    /// Canonical ledger timestamp for this slot.
    pub fn timestamp(&self) -> String {
        format!(
            "{:04}-{:02}-{:02} {:02}:00",
            self.year, self.month, self.day, self.hour
        )
    }

    /// Corpus-relative path of this slot's snapshot file.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(format!(
            "{:04}/{:02}/{:02}/{:02}.png",
            self.year, self.month, self.day, self.hour
        ))
    }
}

/// Read/scan/purge access to the snapshot corpus under one base directory.
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    base: PathBuf,
}

impl SnapshotStore {
    /// Opens a store rooted at `base`; the directory need not exist yet.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Base directory of the corpus.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Absolute path of the snapshot file for a slot.
    pub fn slot_path(&self, slot: &HourSlot) -> PathBuf {
        self.base.join(slot.relative_path())
    }

    /// Directory holding one month of snapshots.
    pub fn month_dir(&self, year: i32, month: u32) -> PathBuf {
        self.base
            .join(format!("{year:04}"))
            .join(format!("{month:02}"))
    }

    /// Snapshots for one calendar day, sorted by hour.
    ///
    /// Files whose stem is not a plain hour number are skipped.
    pub fn day_snapshots(&self, date: NaiveDate) -> Vec<(u32, PathBuf)> {
        let dir = self
            .base
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(format!("{:02}", date.day()));
        let Ok(entries) = fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut snapshots: Vec<(u32, PathBuf)> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| is_png(path))
            .filter_map(|path| Some((hour_stem(&path)?, path)))
            .collect();
        snapshots.sort_by_key(|(hour, _)| *hour);
        snapshots
    }

    /// Every snapshot of one month, sorted by day then hour.
    pub fn month_snapshots(&self, year: i32, month: u32) -> Vec<(HourSlot, PathBuf)> {
        let mut snapshots: Vec<(HourSlot, PathBuf)> = WalkDir::new(self.month_dir(year, month))
            .into_iter()
            .filter_map(Result::ok)
            .map(|entry| entry.into_path())
            .filter(|path| is_png(path))
            .filter_map(|path| {
                let day = path
                    .parent()
                    .and_then(Path::file_name)
                    .and_then(|name| name.to_str())
                    .and_then(|name| name.parse::<u32>().ok())?;
                let hour = hour_stem(&path)?;
                Some((
                    HourSlot {
                        year,
                        month,
                        day,
                        hour,
                    },
                    path,
                ))
            })
            .collect();
        snapshots.sort_by_key(|(slot, _)| *slot);
        snapshots
    }

    /// `(year, month)` directory-name pairs with at least one snapshot, ascending.
    pub fn months(&self) -> Vec<(String, String)> {
        let mut months = Vec::new();
        for year_dir in sorted_subdirs(&self.base) {
            let year = dir_name(&year_dir);
            for month_dir in sorted_subdirs(&year_dir) {
                let has_snapshot = WalkDir::new(&month_dir)
                    .into_iter()
                    .filter_map(Result::ok)
                    .any(|entry| is_png(entry.path()));
                if has_snapshot {
                    months.push((year.clone(), dir_name(&month_dir)));
                }
            }
        }
        months
    }

    /// Deletes every snapshot whose hour falls outside the window.
    ///
    /// Malformed file names are left alone; deletion failures are skipped.
    /// Returns the number of files removed.
    pub fn purge_outside_window(&self, window: &CaptureWindow) -> usize {
        let mut removed = 0usize;
        for entry in WalkDir::new(&self.base).into_iter().filter_map(Result::ok) {
            let path = entry.path();
            if !is_png(path) {
                continue;
            }
            let Some(hour) = hour_stem(path) else {
                continue;
            };
            if !window.contains(hour) && fs::remove_file(path).is_ok() {
                removed += 1;
            }
        }
        removed
    }
}

fn is_png(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("png"))
            .unwrap_or(false)
}

fn hour_stem(path: &Path) -> Option<u32> {
    path.file_stem()?.to_str()?.parse::<u32>().ok()
}

fn sorted_subdirs(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    dirs
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
