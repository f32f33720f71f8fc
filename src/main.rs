//! # Snore Analysis Backend - Main Application Entry Point
//!
//! HTTP service that analyzes overnight recordings for snoring and
//! possible apnea, and keeps a per-user history of the results.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: request handling runs on the actix runtime; the CPU
//!   heavy pipeline runs on the blocking pool
//! - **modules**: one module per concern (see below)
//! - **Result<T, E>**: typed errors inside, `anyhow` at the process edge
//! - **Arc & RwLock**: thread-safe shared state
//!
//! ## Application Architecture:
//! - **audio**: decoding uploads into mono clips and cutting them into chunks/windows
//! - **analysis**: features, loudness, apnea detection, event aggregation, the pipeline
//! - **classifier**: the snore classifier contract, the candle CNN and its engine
//! - **storage**: recording persistence, per-user statistics and kept audio files
//! - **config** / **state** / **device**: configuration, shared state, compute device
//! - **handlers** / **health** / **middleware** / **error**: the HTTP surface

mod analysis;
mod audio;
mod classifier;
mod config;
mod device;
mod error;
mod handlers;
mod health;
mod middleware;
mod state;
mod storage;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use device::DeviceManager;
use state::AppState;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once a termination signal arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from defaults, `config.toml` and the environment
/// 2. **Sets up logging**
/// 3. **Loads the snore classifier** when `models.load_on_startup` is set
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** on SIGTERM/SIGINT
///
/// A classifier that fails to load does not stop the server: it starts
/// in a degraded state and a model can be loaded later through
/// `POST /api/v1/models/classifier/load`.
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let app_state = AppState::new(config.clone())?;

    if config.models.load_on_startup {
        load_startup_model(&app_state, &config).await;
    } else {
        info!("Classifier loading on startup disabled");
    }

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let json_limit = config.performance.max_audio_bytes;

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
            .app_data(handlers::json_config(json_limit))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .service(
                web::scope("/api/v1")
                    .route("/analyze-audio", web::post().to(handlers::analyze_audio))
                    .route("/recordings/{user_uid}", web::get().to(handlers::list_recordings))
                    .route("/recording-stats/{user_uid}", web::get().to(handlers::recording_stats))
                    .route("/uploads/{file}", web::get().to(handlers::download_upload))
                    .route("/models/classifier", web::get().to(handlers::get_classifier_status))
                    .route("/models/classifier/load", web::post().to(handlers::load_classifier))
                    .route("/models/classifier/unload", web::post().to(handlers::unload_classifier))
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config)),
            )
            .route("/health", web::get().to(health::health_check))
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

/// Load the configured classifier; failures are logged, not fatal.
async fn load_startup_model(state: &AppState, config: &AppConfig) {
    let device = match DeviceManager::resolve(&config.models.device) {
        Ok(device) => device,
        Err(e) => {
            warn!("{}; falling back to CPU", e);
            candle_core::Device::Cpu
        }
    };

    let path = Path::new(&config.models.classifier_path);
    match state.engine.load_model(path, device).await {
        Ok(info) => info!("Snore classifier ready: {}", info.description),
        Err(e) => warn!(
            "Snore classifier not loaded ({}); analysis requests will return 503 until a model is loaded",
            e
        ),
    }
}

/// Initialize the tracing subscriber.
///
/// ## Environment Variables:
/// - `RUST_LOG`: filter directives, e.g. `snore_analysis_backend=trace`
/// - If not set, defaults to `snore_analysis_backend=debug,actix_web=info`
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "snore_analysis_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Listen for SIGTERM and SIGINT and raise the shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
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

/// Poll the shutdown flag every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
