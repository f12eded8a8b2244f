use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use lofty::file::{FileType, TaggedFile};
use lofty::picture::{MimeType, Picture};
use lofty::prelude::*;
use lofty::probe::Probe;
use log::debug;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::TimeBase;

use crate::error::MetadataError;
use crate::library::Cover;

const FALLBACK_COVER_MIME: &str = "image/jpeg";

#[derive(Debug, Clone, PartialEq)]
pub struct TrackMetadata {
    /// Empty when the file carries no title tag.
    pub title: String,
    pub duration: Duration,
    pub cover: Option<Cover>,
}

/// Reads the display metadata of one audio file.
///
/// Only a file that cannot be opened or recognized as audio is an error.
/// Everything past that degrades: a missing tag gives an empty title, a
/// missing picture no cover, and undecodable audio a zero duration.
pub fn read_track(path: &Path) -> Result<TrackMetadata, MetadataError> {
    let tagged_file = read_tagged(path)?;

    let tag = tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag());

    let title = tag
        .and_then(|tag| tag.title().map(|title| title.trim().to_string()))
        .unwrap_or_default();
    let cover = tag.and_then(|tag| tag.pictures().first()).map(to_cover);

    Ok(TrackMetadata {
        title,
        duration: frame_duration(path),
        cover,
    })
}

pub fn extract_cover(path: &Path) -> Result<Cover, MetadataError> {
    let tagged_file = read_tagged(path)?;

    tagged_file
        .tags()
        .iter()
        .find_map(|tag| tag.pictures().first())
        .filter(|picture| !picture.data().is_empty())
        .map(to_cover)
        .ok_or(MetadataError::NoPicture)
}

fn read_tagged(path: &Path) -> Result<TaggedFile, MetadataError> {
    let file = File::open(path)?;
    let probe = Probe::new(BufReader::new(file));
    let probe = match FileType::from_path(path) {
        Some(file_type) => probe.set_file_type(file_type),
        None => probe.guess_file_type()?,
    };
    Ok(probe.read()?)
}

fn to_cover(picture: &Picture) -> Cover {
    let mime: Option<&MimeType> = picture.mime_type().into();
    let mime_type = mime
        .map(|mime| mime.as_str().to_string())
        .filter(|mime| !mime.is_empty())
        .unwrap_or_else(|| FALLBACK_COVER_MIME.to_string());

    Cover {
        mime_type,
        data: picture.data().to_vec(),
    }
}

/// Sums the playback length of every packet of the default audio track.
///
/// Stops at the first packet that cannot be read, so a file that is corrupt
/// from the start yields zero.
fn frame_duration(path: &Path) -> Duration {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            debug!("Cannot open {} for duration: {}", path.display(), e);
            return Duration::ZERO;
        }
    };

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(ext);
    }

    let probed = match symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    ) {
        Ok(probed) => probed,
        Err(e) => {
            debug!("Cannot probe {} for duration: {}", path.display(), e);
            return Duration::ZERO;
        }
    };

    let mut format = probed.format;
    let Some(track) = format.default_track() else {
        return Duration::ZERO;
    };
    let track_id = track.id;
    let time_base = track.codec_params.time_base.or_else(|| {
        track
            .codec_params
            .sample_rate
            .map(|rate| TimeBase::new(1, rate))
    });
    let Some(time_base) = time_base else {
        return Duration::ZERO;
    };

    let mut ticks: u64 = 0;
    loop {
        match format.next_packet() {
            Ok(packet) if packet.track_id() == track_id => ticks += packet.dur(),
            Ok(_) => {}
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(e) => {
                debug!("Stopped reading frames of {}: {}", path.display(), e);
                break;
            }
        }
    }

    let time = time_base.calc_time(ticks);
    Duration::from_secs(time.seconds) + Duration::from_secs_f64(time.frac)
}
