use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use pierwatch::driver::WebDriverSession;
use pierwatch::oracle::Estimator;
use pierwatch::{
    capture, manifest, parse_headless, seed_env_defaults, CaptureControls, CaptureTuning,
    CaptureWindow, DataLayout, HourSlot, OracleArgs, SnapshotStore, VisibilityLedger,
    VisibilityOracle, VisibilityRecord, DEFAULT_URL, DEFAULT_WEBDRIVER_URL,
};

#[derive(Parser, Debug)]
#[command(
    name = "pierwatch-grab",
    about = "Capture one pier snapshot, estimate visibility, and rebuild manifests"
)]
struct GrabCli {
    /// Page to open
    #[arg(long, env = "URL", default_value = DEFAULT_URL)]
    url: String,

    /// Inclusive start hour of the capture window
    #[arg(long, env = "START_HOUR", default_value_t = 6)]
    start_hour: u32,

    /// Inclusive end hour of the capture window
    #[arg(long, env = "END_HOUR", default_value_t = 19)]
    end_hour: u32,

    /// Set to 'false' to show the browser
    #[arg(long, env = "HEADLESS", default_value = "true")]
    headless: String,

    /// WebDriver endpoint to drive the browser through
    #[arg(long, env = "WEBDRIVER_URL", default_value = DEFAULT_WEBDRIVER_URL)]
    webdriver_url: String,

    /// Root directory for snapshots, docs, and reference images
    #[arg(long, env = "PIERWATCH_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    #[command(flatten)]
    oracle: OracleArgs,
}

impl GrabCli {
    fn build_controls(&self) -> Result<CaptureControls> {
        CaptureControls::new(
            &self.url,
            CaptureWindow::new(self.start_hour, self.end_hour),
            parse_headless(&self.headless),
            self.webdriver_url.clone(),
        )
    }
}

fn main() -> Result<()> {
    seed_env_defaults();
    let cli = GrabCli::parse();
    let controls = cli.build_controls()?;
    let layout = DataLayout::new(&cli.data_dir);
    let store = SnapshotStore::new(layout.snapshots_dir());
    let ledger = VisibilityLedger::new(layout.ledger_path());

    let now = Local::now();
    let slot = HourSlot::from_local(&now);
    let mut capture_failed = false;

    if controls.window().contains(slot.hour) {
        match capture_and_log(&cli, &controls, &layout, &store, &ledger, &slot, &now) {
            Ok(()) => {}
            Err(err) => {
                eprintln!("Error while capturing snapshot: {err:#}");
                capture_failed = true;
            }
        }
    } else {
        println!(
            "Current hour {:02} outside window ({}-{}); not capturing.",
            slot.hour,
            controls.window().start_hour(),
            controls.window().end_hour()
        );
    }

    // Housekeeping runs even when the capture failed for this hour.
    store.purge_outside_window(controls.window());
    manifest::build_last7(
        &store,
        &ledger,
        controls.window(),
        now.date_naive(),
        &layout.last7_dir(),
    )?;
    manifest::build_months(&store, &layout.months_path())?;
    println!(
        "Updated {} and {}",
        layout.last7_dir().display(),
        layout.months_path().display()
    );

    if capture_failed {
        anyhow::bail!("snapshot capture failed for this hour");
    }
    Ok(())
}

fn capture_and_log(
    cli: &GrabCli,
    controls: &CaptureControls,
    layout: &DataLayout,
    store: &SnapshotStore,
    ledger: &VisibilityLedger,
    slot: &HourSlot,
    now: &chrono::DateTime<Local>,
) -> Result<()> {
    let dest = store.slot_path(slot);
    let bytes = run_capture_chain(controls)?;
    persist_snapshot(&bytes, &dest)?;
    println!("Saved snapshot to {}", dest.display());

    let oracle = VisibilityOracle::new(&cli.oracle.to_config(layout))?;
    println!("Estimating visibility...");
    let estimate = oracle.estimate(&dest);
    let record = VisibilityRecord {
        timestamp: now.format("%Y-%m-%d %H:%M").to_string(),
        visibility_ft: estimate.visibility_ft,
        conditions: estimate.conditions,
    };
    ledger.append(&record)?;
    println!(
        "  Visibility: ~{} ft — {}",
        record.visibility_ft, record.conditions
    );
    Ok(())
}

fn run_capture_chain(controls: &CaptureControls) -> Result<Vec<u8>> {
    let tuning = CaptureTuning::default();
    let mut session = WebDriverSession::connect(controls.webdriver_url(), controls.headless())?;
    let outcome = capture(&mut session, controls.url().as_str(), &tuning);
    session.quit();
    outcome.context("capture chain failed")
}

/// Writes the snapshot through a staging file so the destination never holds
/// a partial image, then verifies the result is non-empty.
fn persist_snapshot(bytes: &[u8], dest: &Path) -> Result<()> {
    let parent = dest
        .parent()
        .context("snapshot destination has no parent directory")?;
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    let staging = dest.with_extension("png.part");
    fs::write(&staging, bytes)
        .with_context(|| format!("failed to write {}", staging.display()))?;
    fs::rename(&staging, dest)
        .with_context(|| format!("failed to move snapshot into {}", dest.display()))?;
    let size = fs::metadata(dest).map(|meta| meta.len()).unwrap_or(0);
    anyhow::ensure!(size > 0, "snapshot not saved to {}", dest.display());
    Ok(())
}
