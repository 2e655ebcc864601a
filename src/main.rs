//! Ambient color capture demo

use std::path::PathBuf;
use std::sync::Arc;

use ambiglow::pipeline::CaptureLoop;
use ambiglow::sink::{ChannelSink, ColorSink, LogSink, PreviewSink};
use ambiglow::Config;
use color_eyre::{eyre::eyre, Result};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    // Load configuration
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(path.as_deref())?;
    init_tracing(&config.logging.filter);

    info!("Ambiglow launching...");

    // Set up sinks
    let preview = Arc::new(PreviewSink::new());
    let (lighting, rx) = ChannelSink::bounded(config.pipeline.sink_capacity);
    let lighting = Arc::new(lighting);
    let sinks: Vec<Arc<dyn ColorSink>> = vec![
        Arc::clone(&preview) as Arc<dyn ColorSink>,
        Arc::clone(&lighting) as Arc<dyn ColorSink>,
        Arc::new(LogSink::new()),
    ];

    // Stand-in for a lighting device, ends when the capture loop drops its sender
    let lighting_thread = std::thread::Builder::new()
        .name("ambiglow-lighting".into())
        .spawn(move || {
            let mut last = None;
            for color in rx.iter() {
                if last != Some(color) {
                    info!(r = color.r, g = color.g, b = color.b, "lighting color");
                    last = Some(color);
                }
            }
        })?;

    // Spawn capture thread
    #[cfg(windows)]
    let platform = ambiglow::capture::DxgiPlatform::new();
    #[cfg(not(windows))]
    let platform = ambiglow::capture::SyntheticPlatform::demo(1920, 1080, 90);

    let handle = CaptureLoop::new(platform, &config, sinks)?.spawn()?;
    let stopper = handle.stopper();
    let mut capture = tokio::task::spawn_blocking(move || handle.join());

    let outcome = tokio::select! {
        joined = &mut capture => joined,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, stopping capture");
            stopper.stop();
            capture.await
        }
    };

    let stats = match outcome.map_err(|e| eyre!("capture task failed: {e}"))? {
        Ok(stats) => stats,
        Err(e) => {
            error!(error = %e, "capture ended with an error");
            return Err(e.into());
        }
    };

    let dropped = lighting.dropped();
    drop(lighting);
    if lighting_thread.join().is_err() {
        error!("lighting thread panicked");
    }

    info!(
        frames = stats.frames,
        timeouts = stats.timeouts,
        reopens = stats.reopens,
        preview = ?preview.latest(),
        dropped,
        "Ambiglow shutting down"
    );
    Ok(())
}

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_timer(fmt::time::uptime()));

    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());

    registry.init();
}
