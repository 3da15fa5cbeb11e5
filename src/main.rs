// lofi-streamer
//
// Runs on the streaming box as a systemd service:
//   - read configuration from LOFI_* environment variables
//   - wait for DNS and a sane wall clock after boot
//   - supervise ffmpeg until SIGINT / SIGTERM

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use lofi_streamer::catalog::{load_catalog, CatalogFilter};
use lofi_streamer::gate::GateOutcome;
use lofi_streamer::{boot, signals, Config, ConfigError, Supervisor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let version = env!("CARGO_PKG_VERSION");
    let config = Config::from_env()?;
    info!("lofi-streamer v{version} ({:?} pipeline)", config.mode);
    info!("music: {}", config.playlist_dir.display());

    // Both of these are fatal: retrying cannot fix a missing key or an empty folder.
    let stream_url = config.stream_url()?;
    let filter = CatalogFilter::new(&config.audio_extensions);
    let catalog = load_catalog(&config.playlist_dir, &filter);
    if catalog.is_empty() {
        return Err(ConfigError::EmptyCatalog(config.playlist_dir.clone()).into());
    }
    info!("{} audio tracks found", catalog.len());

    let cancel = CancellationToken::new();
    signals::cancel_on_signal(cancel.clone());

    if config.skip_boot_wait {
        info!("skipping boot readiness wait");
    } else if boot::wait_until_ready(&cancel).await == GateOutcome::Cancelled {
        warn!("stopped before the system was ready");
        return Ok(());
    }

    let status = Supervisor::new(config, stream_url).run(cancel).await;
    info!(
        "exiting after {} cycles ({} restarts)",
        status.cycles, status.restarts
    );
    Ok(())
}
