use anyhow::{Context, Result};
use clap::Parser;
use rollcall_core::{MatchPolicy, RangeMargin, Recognizer, RemoteRecognizer, SimulatedRecognizer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod enrollment;
mod http;
mod ledger;
mod photos;
mod recognition;
mod store;

use config::{Config, RecognizerKind};
use enrollment::{EnrollmentPipeline, EnrollmentSettings};
use ledger::AttendanceLedger;
use photos::PhotoStore;
use recognition::RecognitionEngine;
use store::{Repository, SqliteStore};

#[derive(Parser)]
#[command(name = "rollcalld", about = "rollcall attendance daemon", version)]
struct Args {
    /// TOML configuration file
    #[arg(long, env = "ROLLCALL_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    tracing::info!(
        listen = %config.listen_addr,
        db = %config.db_path.display(),
        photos = %config.photo_dir.display(),
        recognizer = ?config.recognizer,
        "rollcalld starting"
    );

    let recognizer: Arc<dyn Recognizer> = match config.recognizer {
        RecognizerKind::Remote => Arc::new(
            RemoteRecognizer::new(
                &config.recognizer_url,
                config.detect_timeout(),
                config.extract_timeout(),
            )
                .context("failed to build recognition service client")?,
        ),
        RecognizerKind::Simulated => {
            tracing::warn!("using the simulated recognizer; recognition results are not real");
            Arc::new(SimulatedRecognizer::default())
        }
    };

    let store = SqliteStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;
    let repo: Arc<dyn Repository> = Arc::new(store);

    let policy = MatchPolicy {
        threshold: config.match_threshold,
        min_confidence: config.min_confidence,
    };
    let state = http::AppState {
        recognizer: recognizer.clone(),
        repo: repo.clone(),
        enrollment: Arc::new(EnrollmentPipeline::new(
            recognizer.clone(),
            repo.clone(),
            PhotoStore::new(&config.photo_dir),
            EnrollmentSettings {
                photo_count: config.photo_count,
                min_valid_photos: config.min_valid_photos(),
                extract_timeout: config.extract_timeout(),
            },
        )),
        engine: Arc::new(RecognitionEngine::new(
            recognizer.clone(),
            repo.clone(),
            policy,
            config.extract_timeout(),
        )),
        ledger: Arc::new(AttendanceLedger::new(repo)),
        margin: RangeMargin::new(config.out_of_range_margin),
        detect_timeout: config.detect_timeout(),
        body_limit: config.max_body_bytes(),
    };

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %listener.local_addr()?, "rollcalld ready");

    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracing::info!("rollcalld shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
