//! nodeflash: upload a script image to a mesh node.
//!
//! Usage: `nodeflash [TARGET] [IMAGE]`. Both default to the values in the
//! configuration file.

mod app;
mod config;
mod link;

use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<ExitCode> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting nodeflash");

    let mut config = config::Config::load()?;
    let mut args = std::env::args().skip(1);
    if let Some(target) = args.next() {
        config.target = target;
    }
    if let Some(image) = args.next() {
        config.image = image.into();
    }
    tracing::info!(node = %config.target, image = %config.image.display(), "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(app::run(config))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(if report.outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
