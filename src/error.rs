use std::io;
use std::path::PathBuf;

use lofty::error::LoftyError;
use thiserror::Error;

/// Failures that prevent the library watcher from starting at all.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("cannot read library root {path}: {source}")]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("cannot read playlist directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("playlist load task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("failed to open file: {0}")]
    Open(#[from] io::Error),
    #[error("failed to read tags: {0}")]
    Tag(#[from] LoftyError),
    #[error("no picture in tags")]
    NoPicture,
}

/// A push connection could not be written to.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("subscriber write failed: {0}")]
    Transport(#[from] axum::Error),
    #[error("snapshot serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
