//! Append-only visibility log shared by the live and backfill paths.

use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::Deserialize;

/// One logged visibility estimate tied to a timestamp.
#[derive(Clone, Debug)]
pub struct VisibilityRecord {
    /// `YYYY-MM-DD HH:MM` timestamp identifying the record.
    pub timestamp: String,
    /// Visibility distance in feet; NaN is the "could not measure" sentinel.
    pub visibility_ft: f64,
    /// Free-text conditions description.
    pub conditions: String,
}

/// A ledger row resolved to hour granularity for manifest enrichment.
#[derive(Clone, Debug)]
pub struct LedgerEntry {
    /// Parsed visibility, `None` when the stored field was empty or invalid.
    pub visibility_ft: Option<f64>,
    /// Conditions text as stored.
    pub conditions: String,
}

/// CSV-backed append-only ledger of visibility records.
///
/// The header check and the row write run inside one internal critical
/// section, so concurrent writers interleave whole rows in commit order and
/// the header appears exactly once.
#[derive(Debug)]
pub struct VisibilityLedger {
    path: PathBuf,
    write_gate: Mutex<()>,
}

const HEADER: [&str; 3] = ["timestamp", "visibility_ft", "conditions"];

#[derive(Deserialize)]
struct RawRow {
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    visibility_ft: String,
    #[serde(default)]
    conditions: String,
}

impl VisibilityLedger {
    /// Opens a ledger at `path`; the file is created lazily on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_gate: Mutex::new(()),
        }
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record, writing the header first if the file is new or
    /// empty. The NaN sentinel is stored as an empty visibility field.
    pub fn append(&self, record: &VisibilityRecord) -> Result<()> {
        let _gate = self
            .write_gate
            .lock()
            .unwrap_or_else(|_| panic!("visibility ledger mutex poisoned"));
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let needs_header = match fs::metadata(&self.path) {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer.write_record(HEADER).context("failed to write ledger header")?;
        }
        let visibility = if record.visibility_ft.is_nan() {
            String::new()
        } else {
            record.visibility_ft.to_string()
        };
        writer
            .write_record([
                record.timestamp.as_str(),
                visibility.as_str(),
                record.conditions.as_str(),
            ])
            .context("failed to write ledger row")?;
        writer.flush().context("failed to flush ledger")?;
        Ok(())
    }

    /// Set of timestamps already present, for duplicate suppression.
    ///
    /// Membership is string equality on the stored timestamp, exactly as
    /// written; no datetime parsing happens here.
    pub fn load_index(&self) -> Result<HashSet<String>> {
        let mut seen = HashSet::new();
        self.for_each_row(|row| {
            let timestamp = row.timestamp.trim();
            if !timestamp.is_empty() {
                seen.insert(timestamp.to_string());
            }
        })?;
        Ok(seen)
    }

    /// Rows keyed by `YYYY-MM-DD HH` (minutes dropped) for manifest lookups.
    /// Later rows for the same hour win.
    pub fn hour_lookup(&self) -> Result<HashMap<String, LedgerEntry>> {
        let mut entries = HashMap::new();
        self.for_each_row(|row| {
            let timestamp = row.timestamp.trim();
            if timestamp.is_empty() {
                return;
            }
            let key = timestamp.get(..13).unwrap_or(timestamp).to_string();
            let visibility_ft = row
                .visibility_ft
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|value| !value.is_nan());
            entries.insert(
                key,
                LedgerEntry {
                    visibility_ft,
                    conditions: row.conditions.trim().to_string(),
                },
            );
        })?;
        Ok(entries)
    }

    fn for_each_row(&self, mut visit: impl FnMut(RawRow)) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        for row in reader.deserialize::<RawRow>() {
            let row = row.with_context(|| format!("malformed row in {}", self.path.display()))?;
            visit(row);
        }
        Ok(())
    }
}
