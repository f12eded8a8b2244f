use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Serialize, Serializer};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::watcher::WatchSession;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cover {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl Cover {
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, STANDARD.encode(&self.data))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    pub filename: String,
    pub title: String,
    #[serde(serialize_with = "serialize_duration")]
    pub duration: Duration,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_cover"
    )]
    pub cover: Option<Cover>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Playlist {
    pub name: String,
    pub tracks: Vec<Track>,
}

impl Playlist {
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tracks: Vec::new(),
        }
    }
}

/// Renders a duration as `HH:MM:SS`, dropping sub-second precision.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

fn serialize_duration<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_duration(*duration))
}

fn serialize_cover<S: Serializer>(cover: &Option<Cover>, serializer: S) -> Result<S::Ok, S::Error> {
    match cover {
        Some(cover) => serializer.serialize_str(&cover.data_uri()),
        None => serializer.serialize_none(),
    }
}

// Entries are swapped whole under the write lock. Sessions live under the
// same lock so a slot and its entry appear and disappear together.
#[derive(Clone, Default)]
pub struct Library {
    state: Arc<RwLock<IndexState>>,
}

#[derive(Default)]
struct IndexState {
    playlists: BTreeMap<String, Arc<Playlist>>,
    sessions: HashMap<String, WatchSession>,
}

impl Library {
    pub async fn playlists(&self) -> Vec<Arc<Playlist>> {
        self.state.read().await.playlists.values().cloned().collect()
    }

    pub async fn playlist(&self, name: &str) -> Option<Arc<Playlist>> {
        self.state.read().await.playlists.get(name).cloned()
    }

    pub(crate) async fn contains(&self, name: &str) -> bool {
        self.state.read().await.sessions.contains_key(name)
    }

    /// Registers a new slot. Hands the session back if the name is taken.
    pub(crate) async fn attach(
        &self,
        playlist: Playlist,
        session: WatchSession,
    ) -> Result<(), WatchSession> {
        let mut state = self.state.write().await;
        if state.sessions.contains_key(&playlist.name) {
            return Err(session);
        }
        state.sessions.insert(playlist.name.clone(), session);
        state
            .playlists
            .insert(playlist.name.clone(), Arc::new(playlist));
        Ok(())
    }

    pub(crate) async fn detach(&self, name: &str) -> Option<WatchSession> {
        let mut state = self.state.write().await;
        state.playlists.remove(name);
        state.sessions.remove(name)
    }

    /// Replaces the entry owned by `session_id`. Returns false when that
    /// session no longer backs the slot, in which case nothing changes.
    pub(crate) async fn swap_if_current(&self, session_id: Uuid, playlist: Playlist) -> bool {
        let mut state = self.state.write().await;
        let current = state
            .sessions
            .get(&playlist.name)
            .map(|session| session.id() == session_id)
            .unwrap_or(false);
        if current {
            state
                .playlists
                .insert(playlist.name.clone(), Arc::new(playlist));
        }
        current
    }

    pub(crate) async fn take_sessions(&self) -> Vec<WatchSession> {
        let mut state = self.state.write().await;
        state.sessions.drain().map(|(_, session)| session).collect()
    }

    #[cfg(test)]
    pub(crate) fn from_playlists(playlists: impl IntoIterator<Item = Playlist>) -> Self {
        let playlists = playlists
            .into_iter()
            .map(|playlist| (playlist.name.clone(), Arc::new(playlist)))
            .collect();
        Self {
            state: Arc::new(RwLock::new(IndexState {
                playlists,
                sessions: HashMap::new(),
            })),
        }
    }
}
