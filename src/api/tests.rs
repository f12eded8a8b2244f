use std::fs;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use futures::StreamExt;
use serde_json::Value;
use tempfile::{tempdir, TempDir};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use super::{create_router, is_plain_segment, AppState};
use crate::broadcast::Broadcaster;
use crate::config::Config;
use crate::library::{Library, Playlist};
use crate::scanner::load_playlist;
use crate::test_support::write_silent_mp3;

const DEFAULT_COVER: &[u8] = b"\x89PNG default cover";

struct Fixture {
    _root: TempDir,
    router: Router,
    broadcaster: Broadcaster,
}

fn fixture() -> Fixture {
    let root = tempdir().unwrap();
    let library_dir = root.path().join("data");
    let playlist_dir = library_dir.join("road trip");
    fs::create_dir_all(&playlist_dir).unwrap();
    write_silent_mp3(&playlist_dir.join("drive.mp3"), 30);
    fs::write(library_dir.join("secret.mp3"), b"outside any playlist").unwrap();
    fs::write(root.path().join("default.png"), DEFAULT_COVER).unwrap();

    let config = Arc::new(Config {
        library_path: library_dir,
        default_cover: root.path().join("default.png"),
        static_dir: root.path().join("static"),
        ..Config::default()
    });
    let road_trip = load_playlist(&playlist_dir, "road trip", &config).unwrap();
    let library = Library::from_playlists([road_trip, Playlist::empty("chill")]);

    let broadcaster = Broadcaster::new(library.clone(), Duration::from_secs(30));
    let router = create_router(AppState {
        library,
        broadcaster: broadcaster.clone(),
        config,
        shutdown: CancellationToken::new(),
    });

    Fixture {
        _root: root,
        router,
        broadcaster,
    }
}

async fn get(router: &Router, uri: &str, range: Option<&str>) -> (StatusCode, header::HeaderMap, Vec<u8>) {
    let mut request = Request::builder().uri(uri);
    if let Some(range) = range {
        request = request.header(header::RANGE, range);
    }
    let response = router
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

#[tokio::test]
async fn playlists_endpoint_returns_sorted_snapshot() {
    let fixture = fixture();

    let (status, _, body) = get(&fixture.router, "/api/playlists", None).await;

    assert_eq!(status, StatusCode::OK);
    let playlists: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(playlists[0]["name"], "chill");
    assert_eq!(playlists[0]["tracks"], Value::Array(vec![]));
    assert_eq!(playlists[1]["name"], "road trip");
    let track = &playlists[1]["tracks"][0];
    assert_eq!(track["filename"], "drive.mp3");
    assert_eq!(track["title"], "drive.mp3");
    assert_eq!(track["duration"], "00:00:00");
    assert!(track.get("cover").is_none());
}

#[tokio::test]
async fn single_playlist_lookup() {
    let fixture = fixture();

    let (status, _, body) = get(&fixture.router, "/api/playlists/chill", None).await;
    assert_eq!(status, StatusCode::OK);
    let playlist: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(playlist["name"], "chill");

    let (status, _, _) = get(&fixture.router, "/api/playlists/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stream_honors_range_contract() {
    let fixture = fixture();
    let size = 30 * 417;

    let (status, headers, body) =
        get(&fixture.router, "/stream/road%20trip/drive.mp3", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.len(), size);
    assert_eq!(headers[header::CONTENT_TYPE], "audio/mpeg");

    let (status, headers, body) =
        get(&fixture.router, "/stream/road%20trip/drive.mp3", Some("bytes=0-")).await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        headers[header::CONTENT_RANGE],
        format!("bytes 0-{}/{}", size - 1, size).as_str()
    );
    assert_eq!(body.len(), size);

    let range = format!("bytes={}-", size);
    let (status, headers, body) =
        get(&fixture.router, "/stream/road%20trip/drive.mp3", Some(&range)).await;
    assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(headers[header::CONTENT_RANGE], format!("bytes */{}", size).as_str());
    assert!(body.is_empty());
}

#[tokio::test]
async fn stream_of_missing_track_is_not_found() {
    let fixture = fixture();

    let (status, _, body) = get(&fixture.router, "/stream/chill/ghost.mp3", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, b"file not found");
}

#[tokio::test]
async fn encoded_separators_cannot_escape_the_playlist() {
    let fixture = fixture();

    let (status, _, _) = get(&fixture.router, "/stream/chill/..%2Fsecret.mp3", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cover_falls_back_to_default_image() {
    let fixture = fixture();

    let (status, headers, body) =
        get(&fixture.router, "/stream/road%20trip/drive.mp3/cover", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "image/png");
    assert_eq!(body, DEFAULT_COVER);

    let (status, _, body) = get(&fixture.router, "/stream/chill/ghost.mp3/cover", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, DEFAULT_COVER);
}

#[test]
fn path_segments_must_be_plain_names() {
    assert!(is_plain_segment("song.mp3"));
    assert!(is_plain_segment("road trip"));
    assert!(!is_plain_segment(""));
    assert!(!is_plain_segment(".."));
    assert!(!is_plain_segment("a/b"));
    assert!(!is_plain_segment("a\\b"));
}

async fn next_text<S>(socket: &mut S) -> Value
where
    S: futures::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let message = timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("no websocket message within 5s")
        .expect("websocket closed")
        .unwrap();
    match message {
        WsMessage::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected a text frame, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn websocket_gets_snapshot_on_connect_and_unregisters_on_close() {
    let fixture = fixture();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = fixture.router.clone();
    let server = tokio::spawn(async move { axum::serve(listener, router).await });

    let (mut socket, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();

    let snapshot = next_text(&mut socket).await;
    assert_eq!(snapshot[0]["name"], "chill");
    assert_eq!(snapshot[1]["name"], "road trip");
    assert_eq!(fixture.broadcaster.subscriber_count(), 1);

    assert_eq!(fixture.broadcaster.broadcast().await, 1);
    let pushed = next_text(&mut socket).await;
    assert_eq!(pushed, snapshot);

    socket.close(None).await.unwrap();
    timeout(Duration::from_secs(5), async {
        while fixture.broadcaster.subscriber_count() > 0 {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("subscriber still registered after close");

    server.abort();
}
