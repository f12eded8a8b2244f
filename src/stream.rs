use std::io::SeekFrom;
use std::path::Path;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use log::error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// Outcome of matching a `Range` header against a file of known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    Full,
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// Parses `bytes=<start>-<end>`. An empty end means the last byte. Headers
/// in another unit are ignored.
pub fn parse_range(header: Option<&str>, size: u64) -> ByteRange {
    let Some(ranges) = header.and_then(|value| value.trim().strip_prefix("bytes=")) else {
        return ByteRange::Full;
    };
    let Some((start, end)) = ranges.split_once('-') else {
        return ByteRange::Unsatisfiable;
    };

    // A start that is missing or not a number reads as 0.
    let start = start.trim().parse::<u64>().unwrap_or(0);
    let end = match end.trim() {
        "" => match size.checked_sub(1) {
            Some(last) => last,
            None => return ByteRange::Unsatisfiable,
        },
        raw => match raw.parse::<u64>() {
            Ok(end) => end,
            Err(_) => return ByteRange::Unsatisfiable,
        },
    };

    if start > end || end >= size {
        return ByteRange::Unsatisfiable;
    }
    ByteRange::Partial { start, end }
}

/// Serves one file, honoring an optional `Range` header.
pub async fn serve_file(path: &Path, range: Option<&str>) -> Response {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(_) => return (StatusCode::NOT_FOUND, "file not found").into_response(),
    };
    let size = match file.metadata().await {
        Ok(metadata) if metadata.is_file() => metadata.len(),
        Ok(_) => return (StatusCode::NOT_FOUND, "file not found").into_response(),
        Err(e) => {
            error!("Cannot stat {}: {}", path.display(), e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "could not stat file").into_response();
        }
    };

    let mime_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string();

    match parse_range(range, size) {
        ByteRange::Full => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, mime_type)
            .header(header::CONTENT_LENGTH, size)
            .header(header::ACCEPT_RANGES, "bytes")
            .body(Body::from_stream(ReaderStream::new(file)))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        ByteRange::Unsatisfiable => Response::builder()
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(header::CONTENT_RANGE, format!("bytes */{}", size))
            .body(Body::empty())
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        ByteRange::Partial { start, end } => {
            if let Err(e) = file.seek(SeekFrom::Start(start)).await {
                error!("Cannot seek {} to {}: {}", path.display(), start, e);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            let length = end - start + 1;

            Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_TYPE, mime_type)
                .header(header::CONTENT_LENGTH, length)
                .header(header::CONTENT_RANGE, format!("bytes {}-{}/{}", start, end, size))
                .header(header::ACCEPT_RANGES, "bytes")
                .body(Body::from_stream(ReaderStream::new(file.take(length))))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}
