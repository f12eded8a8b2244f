use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::LevelFilter;

pub struct Config {
    pub library_path: PathBuf,
    pub api_host: String,
    pub api_port: u16,
    pub static_dir: PathBuf,
    pub default_cover: PathBuf,
    pub audio_extensions: Vec<String>,
    pub debounce: Duration,
    pub heartbeat: Duration,
    pub reload_on_any_change: bool,
    pub log_level: LevelFilter,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Unset or
    /// malformed values fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Self {
            library_path: PathBuf::from(var("LIBRARY_PATH", "data")),
            api_host: var("API_HOST", "0.0.0.0"),
            api_port: var("API_PORT", "8085").parse().unwrap_or(8085),
            static_dir: PathBuf::from(var("STATIC_DIR", "static")),
            default_cover: PathBuf::from(var("DEFAULT_COVER", "static/img/default.png")),
            audio_extensions: parse_extensions(&var("AUDIO_EXTENSIONS", "mp3")),
            debounce: Duration::from_millis(var("DEBOUNCE_MS", "500").parse().unwrap_or(500)),
            heartbeat: Duration::from_secs(
                var("HEARTBEAT_SECS", "30")
                    .parse()
                    .ok()
                    .filter(|secs| *secs > 0)
                    .unwrap_or(30),
            ),
            reload_on_any_change: parse_bool(&var("RELOAD_ON_ANY_CHANGE", "false")),
            log_level: var("LOG_LEVEL", "info").parse().unwrap_or(LevelFilter::Info),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    pub fn is_audio_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.audio_extensions.iter().any(|allowed| allowed == &ext)
            })
            .unwrap_or(false)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
