use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{Router, http::header, response::IntoResponse, routing::get};
use axum::{http::StatusCode, response::Response};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use super::AppState;
use crate::logging::LogFileLayout;

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema, utoipa::IntoParams))]
pub struct TailParams {
    pub lines: Option<usize>,
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/logs/tail", params(TailParams), responses((status = 200), (status = 404))))]
pub async fn logs_tail(
    State(state): State<AppState>,
    Query(params): Query<TailParams>,
) -> Response {
    let max_lines = params.lines.unwrap_or(200).min(10_000);
    let Some(path) = resolve_log_file_path(&state.log_file).await else {
        return (StatusCode::NOT_FOUND, "Log file not available").into_response();
    };
    match fs::read_to_string(&path).await {
        Ok(contents) => {
            let lines: Vec<&str> = contents.lines().collect();
            let start = lines.len().saturating_sub(max_lines);
            (
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                lines[start..].join("\n"),
            )
                .into_response()
        }
        Err(_) => (StatusCode::NOT_FOUND, "Log file not available").into_response(),
    }
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/logs/stream", responses((status = 200))))]
pub async fn logs_stream() -> impl IntoResponse {
    let rx = crate::logging::subscribe_log_lines();
    let stream = BroadcastStream::new(rx).filter_map(|res| match res {
        Ok(line) if crate::logging::should_emit_to_web(&line) => Some(Ok::<
            Event,
            std::convert::Infallible,
        >(
            Event::default().event("log").data(line),
        )),
        _ => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Whether `file_name` is the configured file or one of its rotations
/// (`spotheat.2024-03-01.log`, `spotheat.log.1`)
fn name_matches(file_name: &str, prefix: &str, suffix: &str) -> bool {
    file_name == format!("{prefix}.{suffix}")
        || (file_name.starts_with(prefix) && file_name.ends_with(&format!(".{suffix}")))
        || (file_name.starts_with(&format!("{prefix}.")) && file_name.contains(&format!(".{suffix}.")))
}

async fn find_latest_matching(dir: &Path, prefix: &str, suffix: &str) -> Option<PathBuf> {
    let mut rd = fs::read_dir(dir).await.ok()?;
    let mut best: Option<(SystemTime, PathBuf)> = None;
    while let Ok(Some(entry)) = rd.next_entry().await {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name_matches(name, prefix, suffix) {
            continue;
        }
        let Ok(md) = entry.metadata().await else { continue };
        if !md.is_file() {
            continue;
        }
        let modified = md.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if best.as_ref().is_none_or(|(t, _)| modified > *t) {
            best = Some((modified, entry.path()));
        }
    }
    best.map(|(_, p)| p)
}

/// Configured log file if it exists, else the newest rotated file next to it
async fn resolve_log_file_path(configured_path: &str) -> Option<PathBuf> {
    let configured = Path::new(configured_path);
    if fs::metadata(configured).await.is_ok_and(|md| md.is_file()) {
        return Some(configured.to_path_buf());
    }
    let layout = LogFileLayout::from_config(configured_path);
    find_latest_matching(&layout.dir, &layout.prefix, &layout.suffix).await
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/logs/tail", get(logs_tail))
        .route("/api/logs/stream", get(logs_stream))
}
