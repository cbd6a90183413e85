use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use agnostic_mask_rs::Config;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = Config::new();
    info!(
        data_root = %config.data_root_path.display(),
        repo = %config.repo_path,
        device = %config.device,
        layout = ?config.layout,
        "starting agnostic mask preprocessing"
    );

    let report = agnostic_mask_rs::run(&config)
        .with_context(|| format!("preprocess {}", config.data_root_path.display()))?;
    report.into_result()?;
    Ok(())
}
