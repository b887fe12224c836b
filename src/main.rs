//! cuesync - Main entry point
//!
//! Wires the configured capture, matcher and player backends into the
//! sync engine and serves the HTTP/SSE control interface.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cuesync::api::{self, AppContext};
use cuesync::audio::{CaptureSource, MicCapture, SyntheticCapture};
use cuesync::config::{CaptureBackend, PlayerBackend, SyncConfig};
use cuesync::matching::{MatchingEngine, ScriptedMatcher};
use cuesync::player::{HttpPlayer, PlaybackDevice, SimulatedPlayer};
use cuesync::state::{SharedState, StatusSnapshot};
use cuesync::sync::{SyncEngine, SyncEngineHandle};

/// Command-line arguments for cuesync
#[derive(Parser, Debug)]
#[command(name = "cuesync")]
#[command(about = "Ambient audio sync service")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5760", env = "CUESYNC_PORT")]
    port: u16,

    /// Path to a TOML configuration file
    #[arg(short, long, env = "CUESYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Base URL of the player under control (overrides the config file)
    #[arg(long, env = "CUESYNC_PLAYER_URL")]
    player_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cuesync=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!(
        "Starting cuesync v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let mut config =
        SyncConfig::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(url) = args.player_url {
        config.player.base_url = url;
    }
    config.validate().context("Invalid configuration")?;

    let capture: Arc<dyn CaptureSource> = match config.capture.backend {
        CaptureBackend::Microphone => Arc::new(MicCapture::new(
            config.capture.sample_rate,
            config.capture.frame_size,
        )),
        CaptureBackend::Synthetic => Arc::new(SyntheticCapture::new(
            config.capture.sample_rate,
            config.capture.frame_size,
        )),
    };

    let matcher: Arc<dyn MatchingEngine> = Arc::new(ScriptedMatcher::from_config(&config.matcher));

    let player: Arc<dyn PlaybackDevice> = match config.player.backend {
        PlayerBackend::Http => Arc::new(
            HttpPlayer::new(
                &config.player.base_url,
                Duration::from_secs_f64(config.player.request_timeout),
            )
            .context("Failed to build player client")?,
        ),
        PlayerBackend::Simulated => {
            Arc::new(SimulatedPlayer::new(0.0, true, Duration::from_millis(30)))
        }
    };

    info!(
        capture = ?config.capture.backend,
        player = ?config.player.backend,
        player_url = %config.player.base_url,
        "Backends configured"
    );

    let shared = Arc::new(SharedState::new(
        config.event_capacity,
        StatusSnapshot::initial(config.timing.auto_cycle, config.latency.history_capacity),
    ));

    let engine = SyncEngine::spawn(&config, capture, matcher, player, shared.clone());

    let ctx = AppContext {
        shared,
        engine: engine.clone(),
    };

    api::run(args.port, ctx, shutdown_signal(engine)).await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal(engine: SyncEngineHandle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }

    // Stop listening before the server goes away
    let _ = engine.stop().await;
}
