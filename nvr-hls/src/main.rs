use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use nvr_hls::api::{ApiServer, AppState};
use nvr_hls::config::AppConfig;
use nvr_hls::stream::StreamSupervisor;
use nvr_hls::{logging, panic_hook};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;

    let log_dir = config.log_dir();
    let (logging_config, _log_guard) =
        logging::init_logging(&log_dir).context("Failed to initialize logging")?;
    panic_hook::install(&log_dir);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        nvr = %config.rtsp.nvr_ip,
        port = config.rtsp.port,
        ffmpeg = %config.rtsp.ffmpeg_path.display(),
        hls_dir = %config.hls.output_dir.display(),
        "Starting nvr-hls"
    );

    let background = CancellationToken::new();
    logging_config.start_retention_cleanup(background.clone());

    let supervisor = Arc::new(StreamSupervisor::new(config.rtsp, config.hls));
    if let Err(e) = supervisor.layout().ensure_dir().await {
        error!(error = %e, "Failed to create HLS output directory");
    }

    let state = AppState::new(supervisor.clone()).with_logging_config(logging_config);
    let server = ApiServer::new(config.api, state);

    let server_token = server.cancel_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
        }
        server_token.cancel();
    });

    let result = server.run().await;

    supervisor.shutdown().await;
    background.cancel();
    info!("Shutdown complete");

    result.context("API server failed")
}
