//! Mastering worker entry point
//!
//! Reads one job description (JSON) from the path given as the first
//! argument, or from stdin when no argument is given, runs it, and prints
//! the outcome as JSON on stdout.

use std::env;
use std::io::Read;

use anyhow::{Context, Result};
use tracing::info;

use worker_master::{EngineLocator, MasterJob, MasterRequest, MasteringEngine};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("worker_master=info".parse()?)
                .add_directive("warn".parse()?),
        )
        .init();

    info!("Mastering worker starting...");

    let payload = match env::args().nth(1) {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read job file {path}"))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read job from stdin")?;
            buffer
        }
    };
    let request: MasterRequest =
        serde_json::from_str(&payload).context("invalid job description")?;

    let locator = EngineLocator::discover()?;
    locator.validate().await?;

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel::<worker_master::ProgressUpdate>();
    let logger = tokio::spawn(async move {
        while let Some(update) = progress_rx.recv().await {
            info!(
                state = ?update.state,
                percent = update.percent,
                "{}",
                update.message
            );
        }
    });

    let engine = MasteringEngine::new(locator);
    let job = MasterJob::new(request).with_progress(progress_tx);
    let outcome = engine.run(job).await?;
    let _ = logger.await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
