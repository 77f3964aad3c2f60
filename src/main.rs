//! # Transcritor - Main Application Entry Point
//!
//! HTTP service that accepts audio or video uploads, transcribes them to
//! Portuguese text in the background and appends the result to a `.docx`
//! document. Clients poll a status endpoint for progress.
//!
//! ## Startup Sequence:
//! 1. Load `.env`, set up tracing, load and validate configuration
//! 2. Create the media root and scratch directories
//! 3. Check that ffmpeg runs (warning only)
//! 4. Load the Whisper model; startup aborts if this fails, so no job is ever
//!    accepted without a model
//! 5. Build the job store, pipeline and dispatcher, then bind the server
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, `config.toml`, environment)
//! - **jobs**: job records, store, progress reporter and dispatcher
//! - **pipeline**: per-job stages and temporary files
//! - **audio**: ffmpeg conversion and WAV decoding
//! - **transcription**: Whisper model and engine
//! - **document**: `.docx` result documents
//! - **handlers**, **health**, **middleware**, **state**, **error**: HTTP layer

mod audio;
mod config;
mod document;
mod error;
mod handlers;
mod health;
mod jobs;
mod middleware;
mod pipeline;
mod state;
mod transcription;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use audio::FfmpegConverter;
use config::AppConfig;
use document::ResultDocument;
use jobs::JobDispatcher;
use pipeline::Pipeline;
use state::AppState;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::{TranscriptionConfig, TranscriptionEngine};

/// Set by the signal handler task once SIGTERM or SIGINT arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting transcritor v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    for dir in [config.media_root(), config.scratch_dir()] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
    }

    let converter = FfmpegConverter::new(
        config.audio.ffmpeg_path.clone(),
        config.audio.sample_rate,
        config.audio.channels,
    );
    match converter.probe().await {
        Ok(version) => info!("Using {}", version),
        Err(e) => warn!("ffmpeg is not usable, every job will fail at conversion: {:#}", e),
    }

    let engine = Arc::new(TranscriptionEngine::new(TranscriptionConfig {
        language: config.models.language.clone(),
        sample_rate: config.audio.sample_rate,
        ..TranscriptionConfig::default()
    }));
    load_model(&engine, &config).await?;

    let store = jobs::build_store(&config)?;
    info!("Job store: {}", store.backend());

    let results = Arc::new(ResultDocument::new(
        config.media_root(),
        config.storage.result_stem.clone(),
    ));
    info!("Result documents under {}", results.media_root().display());
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(converter),
        engine.clone(),
        results.clone(),
        config.audio.sample_rate,
    ));
    let dispatcher = Arc::new(JobDispatcher::new(
        store,
        pipeline,
        config.scratch_dir(),
        config.jobs.progress_settings(),
        config.jobs.reporter_join_timeout(),
    ));

    let app_state = AppState::new(config.clone(), dispatcher, engine, results);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .configure(handlers::configure_routes)
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

async fn load_model(engine: &TranscriptionEngine, config: &AppConfig) -> Result<()> {
    let size = config.models.whisper_model.parse()?;
    let device = transcription::device::device_from_str(&config.models.device);
    let model_dir = (!config.models.model_dir.is_empty()).then(|| PathBuf::from(&config.models.model_dir));

    engine
        .load_whisper(size, device, model_dir.as_deref())
        .await
        .with_context(|| format!("failed to load Whisper model '{}'", config.models.whisper_model))
}

/// ## Environment Variables:
/// - `RUST_LOG`: log filter, defaults to "transcritor=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "transcritor=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Listen for SIGTERM and SIGINT and raise [`SHUTDOWN_SIGNAL`].
///
/// Jobs still running when the server stops are abandoned; their temporary
/// files are removed when the runtime drops their tasks.
fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
