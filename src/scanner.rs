use std::io;
use std::path::Path;

use log::{debug, warn};

use crate::config::Config;
use crate::error::ScanError;
use crate::library::{Playlist, Track};
use crate::metadata;

/// Loads one playlist directory.
///
/// Only direct children with an allowed audio extension are considered;
/// sub-directories are not descended into. Files that cannot be read as
/// audio are skipped, so the result may be partial. The only error is
/// failing to enumerate the directory itself.
pub fn load_playlist(dir: &Path, name: &str, config: &Config) -> Result<Playlist, ScanError> {
    let entries = dir.read_dir().map_err(|source| ScanError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut tracks = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        let path = entry.path();

        if !path.is_file() || !config.is_audio_file(&path) {
            continue;
        }
        let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
            warn!("Skipping non UTF-8 file name: {}", path.display());
            continue;
        };

        match metadata::read_track(&path) {
            Ok(meta) => {
                let title = if meta.title.is_empty() {
                    filename.to_string()
                } else {
                    meta.title
                };
                tracks.push(Track {
                    filename: filename.to_string(),
                    title,
                    duration: meta.duration,
                    cover: meta.cover,
                });
            }
            Err(e) => debug!("Skipping {}: {}", path.display(), e),
        }
    }

    tracks.sort_by(|a, b| a.filename.cmp(&b.filename));

    Ok(Playlist {
        name: name.to_string(),
        tracks,
    })
}

/// Names of the playlist directories directly under `root`.
pub fn list_playlist_dirs(root: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in root.read_dir()? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        match path.file_name().and_then(|name| name.to_str()) {
            Some(name) => names.push(name.to_string()),
            None => warn!("Ignoring non UTF-8 playlist directory: {}", path.display()),
        }
    }
    names.sort();
    Ok(names)
}
