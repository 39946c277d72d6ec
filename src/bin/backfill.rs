use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use pierwatch::{
    run_backfill, seed_env_defaults, DataLayout, OracleArgs, SnapshotStore, VisibilityLedger,
    VisibilityOracle, DEFAULT_WORKERS,
};

#[derive(Parser, Debug)]
#[command(
    name = "pierwatch-backfill",
    about = "Backfill visibility estimates for one month of snapshots"
)]
struct BackfillCli {
    /// Year of the month to backfill
    year: i32,

    /// Month to backfill, 1-12
    month: u32,

    /// Number of parallel workers
    #[arg(default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Root directory for snapshots, docs, and reference images
    #[arg(long, env = "PIERWATCH_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    #[command(flatten)]
    oracle: OracleArgs,
}

fn main() -> Result<()> {
    seed_env_defaults();
    let cli = BackfillCli::parse();
    let layout = DataLayout::new(&cli.data_dir);
    let store = SnapshotStore::new(layout.snapshots_dir());

    let month_dir = store.month_dir(cli.year, cli.month);
    anyhow::ensure!(
        month_dir.is_dir(),
        "No snapshots found at {}",
        month_dir.display()
    );

    let oracle = VisibilityOracle::new(&cli.oracle.to_config(&layout))?;
    let ledger = Arc::new(VisibilityLedger::new(layout.ledger_path()));
    let report = run_backfill(&store, ledger, oracle, cli.year, cli.month, cli.workers)?;

    println!("Done! Processed {} images.", report.processed);
    if report.failed > 0 {
        eprintln!("{} items failed and were dropped.", report.failed);
    }
    Ok(())
}
