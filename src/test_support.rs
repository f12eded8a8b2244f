use std::fs;
use std::path::Path;

/// Writes a stream of silent MPEG-1 Layer III frames (128 kbit/s, 44.1 kHz,
/// no padding): 417 bytes and 1152 samples per frame, no tags.
pub fn write_silent_mp3(path: &Path, frames: usize) {
    let mut bytes = Vec::with_capacity(frames * 417);
    for _ in 0..frames {
        bytes.extend_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);
        bytes.extend(std::iter::repeat(0u8).take(413));
    }
    fs::write(path, bytes).unwrap();
}
