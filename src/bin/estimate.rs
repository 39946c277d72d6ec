use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use pierwatch::oracle::Estimator;
use pierwatch::{seed_env_defaults, DataLayout, OracleArgs, VisibilityOracle};

#[derive(Parser, Debug)]
#[command(
    name = "pierwatch-estimate",
    about = "Estimate underwater visibility for arbitrary snapshot files"
)]
struct EstimateCli {
    /// Image files to estimate
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Root directory holding the calibration reference images
    #[arg(long, env = "PIERWATCH_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    #[command(flatten)]
    oracle: OracleArgs,
}

fn main() -> Result<()> {
    seed_env_defaults();
    let cli = EstimateCli::parse();
    let layout = DataLayout::new(&cli.data_dir);
    let oracle = VisibilityOracle::new(&cli.oracle.to_config(&layout))?;

    for image in &cli.images {
        if !image.exists() {
            println!("{}: file not found", image.display());
            continue;
        }
        let estimate = oracle.estimate(image);
        println!("{}", image.display());
        println!("  Visibility: ~{} ft", estimate.visibility_ft);
        println!("  Conditions: {}", estimate.conditions);
        println!();
    }
    Ok(())
}
