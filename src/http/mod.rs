// ABOUTME: REST surface - health, session snapshot, directory browsing, settings, log preview (§4.11)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::net::discover_tailscale_ip;
use crate::state::AppState;

const MAX_PATH_LEN: usize = 4096;
const MAX_DIRECTORY_ENTRIES: usize = 200;
const DEFAULT_PREVIEW_LINES: usize = 200;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/sessions", get(sessions))
        .route("/api/server-info", get(server_info))
        .route("/api/directories", get(directories))
        .route(
            "/api/settings/tmux-mouse-mode",
            get(get_mouse_mode).put(put_mouse_mode),
        )
        .route(
            "/api/settings/inactive-max-age-hours",
            get(get_max_age).put(put_max_age),
        )
        .route("/api/session-preview/:session_id", get(session_preview))
        .route("/ws", get(crate::ws::upgrade))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn sessions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry.snapshot().await)
}

async fn server_info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "port": state.config.port,
        "tailscaleIp": discover_tailscale_ip(),
        "protocol": if state.config.tls_cert.is_some() { "https" } else { "http" },
    }))
}

#[derive(Debug, Deserialize)]
struct DirectoriesQuery {
    path: Option<String>,
}

#[derive(Debug, Serialize)]
struct DirEntry {
    name: String,
    path: String,
}

#[derive(Debug, Serialize)]
struct DirectoriesResponse {
    path: String,
    parent: Option<String>,
    directories: Vec<DirEntry>,
    truncated: bool,
}

fn expand_tilde(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix('~') {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
        if rest.is_empty() {
            home
        } else {
            home.join(rest.trim_start_matches('/'))
        }
    } else {
        PathBuf::from(raw)
    }
}

async fn directories(
    State(_state): State<Arc<AppState>>,
    Query(query): Query<DirectoriesQuery>,
) -> impl IntoResponse {
    let raw = query.path.unwrap_or_else(|| "~".to_string());
    if raw.len() > MAX_PATH_LEN {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": { "code": "invalid_path", "message": "path too long" } })),
        )
            .into_response();
    }

    let target = expand_tilde(&raw);
    let read_result = std::fs::read_dir(&target);
    let entries = match read_result {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": { "code": "not_found", "message": "path not found" } })),
            )
                .into_response();
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": { "code": "forbidden", "message": "permission denied" } })),
            )
                .into_response();
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": { "code": "internal_error", "message": e.to_string() } })),
            )
                .into_response();
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();

    names.sort_by(|a, b| {
        let a_dot = a.starts_with('.');
        let b_dot = b.starts_with('.');
        match (a_dot, b_dot) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a.to_lowercase().cmp(&b.to_lowercase()),
        }
    });

    let truncated = names.len() > MAX_DIRECTORY_ENTRIES;
    names.truncate(MAX_DIRECTORY_ENTRIES);

    let directories = names
        .into_iter()
        .map(|name| {
            let path = target.join(&name).to_string_lossy().to_string();
            DirEntry { name, path }
        })
        .collect();

    let parent = target.parent().map(|p| p.to_string_lossy().to_string());

    Json(DirectoriesResponse {
        path: target.to_string_lossy().to_string(),
        parent,
        directories,
        truncated,
    })
    .into_response()
}

#[derive(Debug, Serialize)]
struct MouseModeResponse {
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct MouseModeRequest {
    enabled: bool,
}

async fn get_mouse_mode(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let enabled = state
        .store
        .get_app_setting("tmux-mouse-mode")
        .await
        .ok()
        .flatten()
        .map(|v| v == "true")
        .unwrap_or(false);
    Json(MouseModeResponse { enabled })
}

async fn put_mouse_mode(
    State(state): State<Arc<AppState>>,
    Json(body): Json<MouseModeRequest>,
) -> impl IntoResponse {
    let value = if body.enabled { "true" } else { "false" };
    match state.store.set_app_setting("tmux-mouse-mode", value).await {
        Ok(()) => Json(MouseModeResponse { enabled: body.enabled }).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": { "code": "internal_error", "message": e.to_string() } })),
        )
            .into_response(),
    }
}

#[derive(Debug, Serialize)]
struct MaxAgeResponse {
    hours: i64,
}

#[derive(Debug, Deserialize)]
struct MaxAgeRequest {
    hours: i64,
}

const MIN_MAX_AGE_HOURS: i64 = 1;
const MAX_MAX_AGE_HOURS: i64 = 24 * 30;

async fn get_max_age(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let hours = state
        .store
        .get_app_setting("inactive-max-age-hours")
        .await
        .ok()
        .flatten()
        .and_then(|v| v.parse().ok())
        .unwrap_or(state.config.inactive_max_age_hours_default);
    Json(MaxAgeResponse { hours })
}

async fn put_max_age(
    State(state): State<Arc<AppState>>,
    Json(body): Json<MaxAgeRequest>,
) -> impl IntoResponse {
    let clamped = body.hours.clamp(MIN_MAX_AGE_HOURS, MAX_MAX_AGE_HOURS);
    match state
        .store
        .set_app_setting("inactive-max-age-hours", &clamped.to_string())
        .await
    {
        Ok(()) => Json(MaxAgeResponse { hours: clamped }).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": { "code": "internal_error", "message": e.to_string() } })),
        )
            .into_response(),
    }
}

async fn session_preview(
    State(state): State<Arc<AppState>>,
    axum::extract::Path(session_id): axum::extract::Path<String>,
) -> impl IntoResponse {
    let record = match state.store.get_session_by_id(&session_id).await {
        Ok(Some(r)) => r,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": { "code": "not_found", "message": "session not found" } })),
            )
                .into_response();
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": { "code": "internal_error", "message": e.to_string() } })),
            )
                .into_response();
        }
    };

    let lines = tail_lines(Path::new(&record.log_file_path), DEFAULT_PREVIEW_LINES);
    Json(json!({ "sessionId": session_id, "lines": lines })).into_response()
}

fn tail_lines(path: &Path, n: usize) -> Vec<String> {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let all: Vec<&str> = contents.lines().collect();
    let start = all.len().saturating_sub(n);
    all[start..].iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_home_tilde() {
        let expanded = expand_tilde("~/projects");
        assert!(expanded.ends_with("projects"));
    }

    #[test]
    fn tail_lines_caps_at_n() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        std::fs::write(&path, "a\nb\nc\nd\ne\n").unwrap();
        let lines = tail_lines(&path, 3);
        assert_eq!(lines, vec!["c", "d", "e"]);
    }

    #[test]
    fn tail_lines_missing_file_is_empty() {
        assert!(tail_lines(Path::new("/nonexistent/log.jsonl"), 10).is_empty());
    }
}
