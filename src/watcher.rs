use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ScanError, WatchError};
use crate::library::{Library, Playlist};
use crate::scanner;

type EventReceiver = mpsc::UnboundedReceiver<notify::Result<Event>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryChange {
    Added(String),
    Removed(String),
    Reloaded(String),
}

// Cancelling the token ends the slot loop, which drops its watch handle.
pub(crate) struct WatchSession {
    id: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WatchSession {
    pub(crate) fn new(id: Uuid, cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self { id, cancel, task }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn close(self) -> JoinHandle<()> {
        self.cancel.cancel();
        self.task
    }
}

impl fmt::Debug for WatchSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchSession").field("id", &self.id).finish()
    }
}

/// Arming while already armed pushes the deadline forward.
#[derive(Debug)]
pub struct DebounceSlot {
    quiet: Duration,
    deadline: Option<Instant>,
}

impl DebounceSlot {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            deadline: None,
        }
    }

    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.quiet);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Disarms the slot, reporting whether it was due at `now`.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum RootChange {
    Appeared(String),
    Vanished(String),
}

struct Shared {
    root: PathBuf,
    config: Arc<Config>,
    library: Library,
    changes: mpsc::UnboundedSender<LibraryChange>,
    shutdown: CancellationToken,
}

/// Keeps the library index in step with the playlist directories on disk.
pub struct LibraryWatcher {
    shared: Arc<Shared>,
    root_task: Mutex<Option<JoinHandle<()>>>,
}

impl LibraryWatcher {
    /// Fails only when the root itself cannot be read or watched.
    pub async fn start(
        config: Arc<Config>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<LibraryChange>), WatchError> {
        let root = config
            .library_path
            .canonicalize()
            .map_err(|source| WatchError::RootUnreadable {
                path: config.library_path.clone(),
                source,
            })?;

        let (root_watcher, root_events) = watch_dir(&root).map_err(|source| WatchError::Watch {
            path: root.clone(),
            source,
        })?;

        let names = scanner::list_playlist_dirs(&root).map_err(|source| {
            WatchError::RootUnreadable {
                path: root.clone(),
                source,
            }
        })?;

        let (changes, changes_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            root,
            config,
            library: Library::default(),
            changes,
            shutdown: CancellationToken::new(),
        });

        for name in names {
            shared.add_playlist(name, false).await;
        }
        info!(
            "Library ready: {} playlists under {}",
            shared.library.playlists().await.len(),
            shared.root.display()
        );

        let root_task = tokio::spawn(run_root(Arc::clone(&shared), root_watcher, root_events));

        Ok((
            Self {
                shared,
                root_task: Mutex::new(Some(root_task)),
            },
            changes_rx,
        ))
    }

    pub fn library(&self) -> Library {
        self.shared.library.clone()
    }

    /// Stops every loop and closes every watch. Safe to call more than once.
    pub async fn stop(&self) {
        self.shared.shutdown.cancel();

        let root_task = self.root_task.lock().await.take();
        if let Some(task) = root_task {
            if let Err(e) = task.await {
                error!("Root watch loop ended abnormally: {}", e);
            }
        }
        self.shared.close_sessions().await;
    }
}

impl Shared {
    async fn add_playlist(self: &Arc<Self>, name: String, announce: bool) {
        if self.library.contains(&name).await {
            return;
        }

        let path = self.root.join(&name);
        let (watcher, events) = match watch_dir(&path) {
            Ok(watch) => watch,
            Err(e) => {
                error!("Cannot watch {}: {}", path.display(), e);
                return;
            }
        };

        let playlist = match self.load(&path, &name).await {
            Ok(playlist) => playlist,
            Err(e) => {
                error!("Loading playlist {} failed: {}", name, e);
                Playlist::empty(&name)
            }
        };
        let track_count = playlist.tracks.len();

        let id = Uuid::new_v4();
        let cancel = self.shutdown.child_token();
        let task = tokio::spawn(run_slot(
            Arc::clone(self),
            name.clone(),
            id,
            watcher,
            events,
            cancel.clone(),
        ));

        match self
            .library
            .attach(playlist, WatchSession::new(id, cancel, task))
            .await
        {
            Ok(()) => {
                info!("Playlist {} added ({} tracks)", name, track_count);
                if announce {
                    let _ = self.changes.send(LibraryChange::Added(name));
                }
            }
            Err(duplicate) => {
                duplicate.close();
            }
        }
    }

    async fn remove_playlist(&self, name: &str) {
        if let Some(session) = self.library.detach(name).await {
            session.close();
            info!("Playlist {} removed", name);
            let _ = self.changes.send(LibraryChange::Removed(name.to_string()));
        }
    }

    async fn load(&self, path: &Path, name: &str) -> Result<Playlist, ScanError> {
        let path = path.to_path_buf();
        let name = name.to_string();
        let config = Arc::clone(&self.config);
        tokio::task::spawn_blocking(move || scanner::load_playlist(&path, &name, &config)).await?
    }

    async fn close_sessions(&self) {
        for session in self.library.take_sessions().await {
            if let Err(e) = session.close().await {
                error!("Playlist watch loop ended abnormally: {}", e);
            }
        }
    }
}

fn watch_dir(path: &Path) -> notify::Result<(RecommendedWatcher, EventReceiver)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = tx.send(res);
    })?;
    watcher.watch(path, RecursiveMode::NonRecursive)?;
    Ok((watcher, rx))
}

async fn run_root(shared: Arc<Shared>, watcher: RecommendedWatcher, mut events: EventReceiver) {
    let _watcher = watcher;

    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            event = events.recv() => match event {
                None => {
                    warn!("Root watch on {} closed", shared.root.display());
                    break;
                }
                Some(Err(e)) => error!("Root watcher error: {}", e),
                Some(Ok(event)) => {
                    for change in root_changes(&shared.root, &event) {
                        match change {
                            RootChange::Appeared(name) => {
                                info!("New playlist directory detected: {}", name);
                                shared.add_playlist(name, true).await;
                            }
                            RootChange::Vanished(name) => shared.remove_playlist(&name).await,
                        }
                    }
                }
            },
        }
    }

    shared.close_sessions().await;
    debug!("Root watch loop stopped");
}

async fn run_slot(
    shared: Arc<Shared>,
    name: String,
    id: Uuid,
    watcher: RecommendedWatcher,
    mut events: EventReceiver,
    cancel: CancellationToken,
) {
    let _watcher = watcher;
    let path = shared.root.join(&name);
    let mut debounce = DebounceSlot::new(shared.config.debounce);

    loop {
        let deadline = debounce.deadline();
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                None => break,
                Some(Err(e)) => error!("Watcher error for playlist {}: {}", name, e),
                Some(Ok(event)) => {
                    if arms_reload(&event, &shared.config) {
                        debounce.arm(Instant::now());
                    }
                }
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if !debounce.fire(Instant::now()) {
                    continue;
                }
                let loaded = tokio::select! {
                    _ = cancel.cancelled() => break,
                    loaded = shared.load(&path, &name) => loaded,
                };
                match loaded {
                    Ok(playlist) => {
                        let track_count = playlist.tracks.len();
                        if !shared.library.swap_if_current(id, playlist).await {
                            debug!("Discarding reload of detached playlist {}", name);
                            break;
                        }
                        info!("Playlist {} reloaded ({} tracks)", name, track_count);
                        let _ = shared.changes.send(LibraryChange::Reloaded(name.clone()));
                    }
                    Err(e) => error!("Reloading playlist {} failed: {}", name, e),
                }
            }
        }
    }

    debug!("Stopped watching playlist {}", name);
}

fn arms_reload(event: &Event, config: &Config) -> bool {
    match event.kind {
        EventKind::Access(_) => false,
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)) => {
            true
        }
        _ => {
            config.reload_on_any_change
                || event.paths.iter().any(|path| config.is_audio_file(path))
        }
    }
}

fn root_changes(root: &Path, event: &Event) -> Vec<RootChange> {
    let appeared = |path: &PathBuf| {
        child_name(root, path)
            .filter(|_| path.is_dir())
            .map(RootChange::Appeared)
    };
    let vanished = |path: &PathBuf| child_name(root, path).map(RootChange::Vanished);

    match event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().filter_map(appeared).collect()
        }
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.iter().filter_map(vanished).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event
            .paths
            .first()
            .and_then(vanished)
            .into_iter()
            .chain(event.paths.get(1).and_then(appeared))
            .collect(),
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .filter_map(|path| appeared(path).or_else(|| vanished(path)))
            .collect(),
        _ => Vec::new(),
    }
}

fn child_name(root: &Path, path: &Path) -> Option<String> {
    if path.parent() != Some(root) {
        return None;
    }
    path.file_name()?.to_str().map(str::to_string)
}
