use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pothole_pipeline::PipelineRunner;
use pothole_worker::{analyze_videos, load_detector, shutdown_and_drain, WorkerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long interrupted runs get to release their decoders before exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pothole_worker=info,pothole_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let videos: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if videos.is_empty() {
        eprintln!("usage: pothole-worker <video>...");
        std::process::exit(2);
    }

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    let detector = match load_detector(&config) {
        Ok(detector) => detector,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load detector");
            std::process::exit(1);
        }
    };

    let runner = match PipelineRunner::new(detector, config.pipeline.clone()) {
        Ok(runner) => Arc::new(runner),
        Err(e) => {
            tracing::error!(error = %e, "Failed to start pipeline runner");
            std::process::exit(1);
        }
    };

    tracing::info!(videos = videos.len(), "Worker starting");

    let analysis = analyze_videos(&runner, &videos);
    tokio::pin!(analysis);

    let reports = tokio::select! {
        reports = &mut analysis => reports,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, cancelling runs");
            if shutdown_and_drain(&runner, &mut analysis, SHUTDOWN_GRACE).await.is_none() {
                tracing::warn!("Runs still draining after shutdown grace period");
            }
            std::process::exit(130);
        }
    };

    let mut failed = 0;
    for report in &reports {
        if report.is_failed() {
            failed += 1;
        }
        match serde_json::to_string(report) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::error!(error = %e, "Failed to serialize report"),
        }
    }

    tracing::info!(total = reports.len(), failed, "Worker finished");
    if failed > 0 {
        std::process::exit(1);
    }
}
