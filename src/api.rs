use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use futures::StreamExt;
use log::{debug, error, warn};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};

use crate::broadcast::Broadcaster;
use crate::config::Config;
use crate::library::Library;
use crate::{metadata, stream};

#[derive(Clone)]
pub struct AppState {
    pub library: Library,
    pub broadcaster: Broadcaster,
    pub config: Arc<Config>,
    pub shutdown: CancellationToken,
}

pub fn create_router(state: AppState) -> Router {
    let static_dir = state.config.static_dir.clone();

    Router::new()
        .route("/api/playlists", get(get_playlists))
        .route("/api/playlists/:name", get(get_playlist))
        .route("/stream/:playlist/:filename", get(stream_track))
        .route("/stream/:playlist/:filename/cover", get(get_cover))
        .route("/ws", get(websocket))
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// GET /api/playlists - Current snapshot of every playlist
async fn get_playlists(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.library.playlists().await)
}

// GET /api/playlists/:name - One playlist
async fn get_playlist(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    match state.library.playlist(&name).await {
        Some(playlist) => Ok(Json(playlist)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

// GET /stream/:playlist/:filename - Audio bytes with range support
async fn stream_track(
    State(state): State<AppState>,
    Path((playlist, filename)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let Some(path) = track_path(&state.config, &playlist, &filename) else {
        return (StatusCode::NOT_FOUND, "file not found").into_response();
    };
    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());

    stream::serve_file(&path, range).await
}

// GET /stream/:playlist/:filename/cover - Embedded artwork, default image otherwise
async fn get_cover(
    State(state): State<AppState>,
    Path((playlist, filename)): Path<(String, String)>,
) -> Response {
    if let Some(path) = track_path(&state.config, &playlist, &filename) {
        let extracted = tokio::task::spawn_blocking(move || metadata::extract_cover(&path)).await;
        match extracted {
            Ok(Ok(cover)) => {
                return ([(header::CONTENT_TYPE, cover.mime_type)], cover.data).into_response();
            }
            Ok(Err(e)) => debug!("No cover for {}/{}: {}", playlist, filename, e),
            Err(e) => error!("Cover extraction task failed: {}", e),
        }
    }

    default_cover(&state.config).await
}

async fn default_cover(config: &Config) -> Response {
    match tokio::fs::read(&config.default_cover).await {
        Ok(data) => {
            let mime_type = mime_guess::from_path(&config.default_cover)
                .first_or_octet_stream()
                .to_string();
            ([(header::CONTENT_TYPE, mime_type)], data).into_response()
        }
        Err(e) => {
            warn!(
                "Default cover {} unavailable: {}",
                config.default_cover.display(),
                e
            );
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

// GET /ws - Live playlist snapshots
async fn websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, mut incoming) = socket.split();

    let id = match state.broadcaster.register(Box::new(sink)).await {
        Ok(id) => id,
        Err(e) => {
            warn!("Failed to send playlists on connect: {}", e);
            return;
        }
    };

    // Clients never send anything meaningful; reading only detects disconnects.
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            message = incoming.next() => match message {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!("Websocket read failed: {}", e);
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    state.broadcaster.unregister(id).await;
}

fn track_path(config: &Config, playlist: &str, filename: &str) -> Option<PathBuf> {
    if !is_plain_segment(playlist) || !is_plain_segment(filename) {
        return None;
    }
    Some(config.library_path.join(playlist).join(filename))
}

fn is_plain_segment(segment: &str) -> bool {
    !segment.is_empty() && segment != "." && segment != ".." && !segment.contains(['/', '\\'])
}

#[cfg(test)]
mod tests;
