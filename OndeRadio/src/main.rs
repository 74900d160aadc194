use std::process::ExitCode;
use std::sync::Arc;

use ondeserver::Server;
use ondesource::YtDlpSource;
use ondestation::api::{queue_api_router, station_router};
use ondestation::sse::events_router;
use ondestation::{Station, StationOptions};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ========== PHASE 1 : Configuration ==========

    let config = ondeconfig::get_config();
    let options = StationOptions {
        ffmpeg: config.get_ffmpeg_path(),
    };

    // ========== PHASE 2 : Station ==========

    info!("📻 Starting the station...");
    let source = Arc::new(YtDlpSource::new(config.get_ytdlp_path()));
    let station = Station::new(source, options).await;

    if station.mixer_initialized() {
        info!("✅ Main mixer up, audio stream available");
    } else {
        warn!("⚠️ Main mixer unavailable, running degraded (no /stream)");
    }

    // ========== PHASE 3 : Serveur HTTP ==========

    let mut server = Server::new_configured("OndeRadio");
    server.mount("/queue", queue_api_router(station.clone()));
    server.merge(station_router(station.clone()));
    server.merge(events_router(station.clone()));

    let served = server.serve().await;

    // Arrêt : idempotent, balaie transcodeurs et mixeur, clôt les abonnés.
    station.shutdown().await;

    if let Err(e) = served {
        error!("server error: {e:#}");
        return ExitCode::FAILURE;
    }
    if !station.mixer_initialized() {
        // Démarrage dégradé : le processus le signale à sa sortie.
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
