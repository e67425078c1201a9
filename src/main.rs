use std::error::Error;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;

use camstream_lib::capture::ffmpeg::check_ffmpeg;
use camstream_lib::capture::{
    CaptureError, CaptureMonitor, CaptureSource, RaspividSource, TestPatternSource,
};
use camstream_lib::core::logging::init_logging;
use camstream_lib::core::settings::load_settings;
use camstream_lib::segments::SegmentStore;
use camstream_lib::shared::paths::{
    get_log_dir, get_recorder_dir, get_segments_dir, get_static_dir, get_storage_dir,
};
use camstream_lib::web::{self, WebState};

/// How often the capture process is checked for an exit nobody asked for.
const SUPERVISE_INTERVAL: Duration = Duration::from_secs(2);

/// Records the camera continuously and serves the recent past as a live HLS stream.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address to listen on. Overrides `listenAddr` from settings.json.
    #[arg(short, long)]
    addr: Option<String>,

    /// Use the synthetic test pattern instead of the camera.
    #[arg(long)]
    mock: bool,

    /// Storage root. Defaults to $CAMSTREAM_HOME or the XDG data directory.
    #[arg(long)]
    home: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let root = cli.home.unwrap_or_else(get_storage_dir);
    let _guards = init_logging(&get_log_dir(&root))?;

    let settings = load_settings(&root);
    tracing::info!(target: "system", "Using storage root {:?}", root);

    if let Err(e) = check_ffmpeg() {
        tracing::warn!(target: "capture", "[MONITOR] {}", e);
    }

    let store = Arc::new(
        SegmentStore::open(get_segments_dir(&root))?.with_max_size(settings.segment_dir_max_size),
    );

    let source: Box<dyn CaptureSource> = if cli.mock {
        Box::new(TestPatternSource::new())
    } else {
        Box::new(RaspividSource::new())
    };

    let mut monitor = CaptureMonitor::new(settings.monitor_config(get_recorder_dir(&root)), source);
    monitor.add_subscriber(store.clone());

    let mut can_fall_back = !cli.mock;
    if let Err(e) = monitor.start() {
        if !e.is_launch_failure() || !can_fall_back {
            return Err(e.into());
        }
        can_fall_back = false;
        fall_back_to_test_pattern(&mut monitor, &e)?;
    }

    let monitor = Arc::new(Mutex::new(monitor));
    tokio::spawn(supervise(monitor.clone(), can_fall_back));

    let state = WebState {
        store,
        monitor: monitor.clone(),
        live_window: settings.live_window(),
        static_dir: get_static_dir(&root),
    };

    let addr = cli.addr.unwrap_or(settings.listen_addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(target: "web", "Serving live stream on http://{}/live.m3u8", addr);

    axum::serve(listener, web::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let mut monitor = monitor.lock().map_err(|_| "capture monitor lock poisoned")?;
    monitor.stop()?;

    tracing::info!(target: "system", "Shutdown complete");
    Ok(())
}

fn fall_back_to_test_pattern(
    monitor: &mut CaptureMonitor,
    cause: &dyn std::fmt::Display,
) -> Result<(), CaptureError> {
    tracing::warn!(
        target: "capture",
        "[MONITOR] {} unavailable ({}), falling back to test pattern",
        monitor.source_name(),
        cause
    );
    monitor.set_source(Box::new(TestPatternSource::new()))?;
    monitor.start()
}

/// Notices a capture process that died on its own. The first time the
/// camera dies, capture switches to the test pattern if that is allowed.
async fn supervise(monitor: Arc<Mutex<CaptureMonitor>>, mut can_fall_back: bool) {
    let mut ticker = tokio::time::interval(SUPERVISE_INTERVAL);

    loop {
        ticker.tick().await;

        let Ok(mut guard) = monitor.lock() else {
            tracing::error!(target: "capture", "[MONITOR] Monitor lock poisoned, supervision stopped");
            break;
        };

        // The monitor logs the exit itself. `/status` may have noticed it first,
        // so look at the resulting state, not at this call's result.
        let _ = guard.check_process();
        if !can_fall_back || guard.state().is_active() {
            continue;
        }
        let Some(cause) = guard.last_error().map(str::to_string) else {
            continue;
        };
        can_fall_back = false;

        if let Err(e) = fall_back_to_test_pattern(&mut guard, &cause) {
            tracing::error!(target: "capture", "[MONITOR] Test pattern failed to start: {}", e);
        }
    }
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(target: "system", "Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(target: "system", "Failed to setup SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!(target: "system", "Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            tracing::info!(target: "system", "Received SIGTERM, shutting down gracefully...");
        }
    }
}
