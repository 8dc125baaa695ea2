//! Obscura demo: a synthetic camera feeding a luma-watching consumer

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tracing::info;

use obscura::device::synthetic::SyntheticBackend;
use obscura::overlay::OverlayRegistry;
use obscura::{CameraSource, CaptureSettings, Frame, FrameConsumer};

/// Watches frame brightness and keeps a badge in the overlay registry
/// while the picture is bright enough.
struct LumaWatcher {
    overlay: Arc<OverlayRegistry<&'static str>>,
    frames_seen: AtomicU64,
}

impl FrameConsumer for LumaWatcher {
    fn receive_frame(
        &self,
        frame: &Frame,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let luma_len = frame.width() as usize * frame.height() as usize;
        let luma = &frame.data()[..luma_len];
        let mean = luma.iter().map(|&b| b as u64).sum::<u64>() / luma_len as u64;
        if mean > 96 {
            self.overlay.add("bright");
        } else {
            self.overlay.remove(&"bright");
        }
        let seen = self.frames_seen.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % 30 == 0 {
            info!(
                frame = frame.id(),
                ts_ms = frame.timestamp_ms(),
                mean_luma = mean,
                "frame sample"
            );
        }
        Ok(())
    }

    fn release(&self) {
        info!("luma watcher released");
    }
}

/// Settings come from obscura.toml and the OBSCURA_* environment, with
/// built-in defaults underneath.
fn load_settings() -> Result<CaptureSettings> {
    let settings: CaptureSettings = config::Config::builder()
        .add_source(config::File::with_name("obscura").required(false))
        .add_source(config::Environment::with_prefix("OBSCURA"))
        .build()?
        .try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("obscura=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Obscura launching...");

    let settings = load_settings()?;
    info!(?settings, "capture settings");

    let overlay = Arc::new(OverlayRegistry::new());
    let consumer = Arc::new(LumaWatcher {
        overlay: Arc::clone(&overlay),
        frames_seen: AtomicU64::new(0),
    });
    let backend = Arc::new(SyntheticBackend::webcam(settings.facing));

    let source = Arc::new(
        CameraSource::builder(backend, consumer)
            .settings(settings)
            .build()?,
    );
    source.start()?;
    if let Some(size) = source.preview_size() {
        overlay.set_camera_info(size, source.facing());
        info!(width = size.width, height = size.height, "preview negotiated");
    }

    // Periodic pipeline stats
    let ticker = {
        let source = Arc::clone(&source);
        let overlay = Arc::clone(&overlay);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5));
            interval.tick().await;
            loop {
                interval.tick().await;
                let stats = source.stats();
                info!(
                    submitted = stats.submitted,
                    delivered = stats.delivered,
                    replaced = stats.replaced,
                    overlay = overlay.len(),
                    "pipeline stats"
                );
            }
        })
    };

    // Nudge the zoom once the stream has settled
    tokio::time::sleep(Duration::from_secs(2)).await;
    source.do_zoom(1.5);

    tokio::signal::ctrl_c().await?;
    ticker.abort();
    source.release();

    info!("Obscura shutting down");
    Ok(())
}
