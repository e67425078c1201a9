//! HTTP shell: live playlist, segment files, a status endpoint and the static
//! player pages.
//!
//! Handlers only read. The store is shared with the drain loop, which is the
//! single writer.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tower_http::services::ServeDir;

use crate::capture::CaptureMonitor;
use crate::playlist::{self, ManifestFormat};
use crate::segments::{SegmentId, SegmentStore};

pub const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";

/// Shared state for web handlers
#[derive(Clone)]
pub struct WebState {
    pub store: Arc<SegmentStore>,
    pub monitor: Arc<Mutex<CaptureMonitor>>,
    /// How far back the live playlist reaches.
    pub live_window: Duration,
    /// Player pages served for every path not matched by a route.
    pub static_dir: PathBuf,
}

pub fn router(state: WebState) -> Router {
    let static_files = ServeDir::new(&state.static_dir);

    Router::new()
        .route("/live.m3u8", get(live_hls))
        .route("/live.m3u", get(live_hls))
        .route("/live.txt", get(live_text))
        .route("/segments/{name}", get(download_segment))
        .route("/status", get(status))
        .fallback_service(static_files)
        .with_state(state)
}

async fn live_hls(State(state): State<WebState>) -> Response {
    live_manifest(&state, ManifestFormat::Hls)
}

async fn live_text(State(state): State<WebState>) -> Response {
    live_manifest(&state, ManifestFormat::PlainText)
}

fn live_manifest(state: &WebState, format: ManifestFormat) -> Response {
    let segment_duration = match state.monitor.lock() {
        Ok(monitor) => monitor.segment_duration(),
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let count = playlist::window_len(state.live_window, segment_duration);
    let segments = state.store.latest_segments(count);
    let manifest = playlist::generate(&segments, format);

    tracing::debug!(
        target: "web",
        "[PLAYLIST] Serving {} segments starting at {}",
        segments.len(),
        segments.first().map(|s| s.id).unwrap_or(0)
    );

    (
        [
            (header::CONTENT_TYPE, manifest.content_type),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        manifest.body,
    )
        .into_response()
}

async fn download_segment(State(state): State<WebState>, Path(name): Path<String>) -> Response {
    let path = match state.store.segment_path(&name) {
        Some(p) => p,
        None => return StatusCode::NOT_FOUND.into_response(),
    };

    // Retention may have removed the file since the lookup.
    let file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return StatusCode::NOT_FOUND.into_response()
        }
        Err(e) => {
            tracing::error!(target: "web", "[SEGMENT] Failed to open {:?}: {}", path, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, SEGMENT_CONTENT_TYPE)
        .body(body)
        .map_err(|e| {
            tracing::error!(target: "web", "Failed to build response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
        .unwrap_or_else(|status| status.into_response())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub state: &'static str,
    pub source: String,
    pub uptime_secs: Option<u64>,
    /// Why the capture process stopped on its own, if it did.
    pub last_error: Option<String>,
    pub last_id: SegmentId,
    pub segment_count: usize,
    pub total_bytes: u64,
}

async fn status(State(state): State<WebState>) -> Response {
    let (label, source, uptime, last_error) = match state.monitor.lock() {
        Ok(mut monitor) => {
            // Already logged by the monitor; the state below reflects it.
            let _ = monitor.check_process();
            (
                monitor.state().label(),
                monitor.source_name().to_string(),
                monitor.state().uptime(),
                monitor.last_error().map(str::to_string),
            )
        }
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    Json(StatusResponse {
        state: label,
        source,
        uptime_secs: uptime.map(|d| d.as_secs()),
        last_error,
        last_id: state.store.last_id(),
        segment_count: state.store.len(),
        total_bytes: state.store.total_size(),
    })
    .into_response()
}
