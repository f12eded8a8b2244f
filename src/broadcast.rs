use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::SinkError;
use crate::library::Library;
use crate::watcher::LibraryChange;

pub type SubscriberId = Uuid;

/// Outgoing half of one push connection.
#[async_trait]
pub trait SnapshotSink: Send {
    async fn send_snapshot(&mut self, payload: &str) -> Result<(), SinkError>;

    async fn close(&mut self);
}

#[async_trait]
impl SnapshotSink for SplitSink<WebSocket, Message> {
    async fn send_snapshot(&mut self, payload: &str) -> Result<(), SinkError> {
        self.send(Message::Text(payload.to_string())).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = SinkExt::close(self).await {
            debug!("Closing websocket failed: {}", e);
        }
    }
}

struct Subscriber {
    id: SubscriberId,
    sink: AsyncMutex<Box<dyn SnapshotSink>>,
}

/// Registry of live push connections. Every delivery is a full snapshot of
/// the library serialized as a JSON array of playlists.
#[derive(Clone)]
pub struct Broadcaster {
    library: Library,
    subscribers: Arc<Mutex<HashMap<SubscriberId, Arc<Subscriber>>>>,
    heartbeat: Duration,
}

impl Broadcaster {
    pub fn new(library: Library, heartbeat: Duration) -> Self {
        Self {
            library,
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            heartbeat,
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<SubscriberId, Arc<Subscriber>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry().len()
    }

    async fn snapshot_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.library.playlists().await)
    }

    /// Registers a connection and sends it the current snapshot. The sink is
    /// held while registering so no broadcast can overtake the first snapshot.
    pub async fn register(&self, sink: Box<dyn SnapshotSink>) -> Result<SubscriberId, SinkError> {
        let subscriber = Arc::new(Subscriber {
            id: Uuid::new_v4(),
            sink: AsyncMutex::new(sink),
        });
        let id = subscriber.id;

        let mut sink = subscriber.sink.lock().await;
        self.registry().insert(id, Arc::clone(&subscriber));

        let sent = match self.snapshot_json().await {
            Ok(payload) => sink.send_snapshot(&payload).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = sent {
            self.registry().remove(&id);
            sink.close().await;
            return Err(e);
        }

        info!("Subscriber {} connected ({} live)", id, self.subscriber_count());
        Ok(id)
    }

    pub async fn unregister(&self, id: SubscriberId) {
        let removed = self.registry().remove(&id);
        if let Some(subscriber) = removed {
            subscriber.sink.lock().await.close().await;
            info!("Subscriber {} disconnected", id);
        }
    }

    /// Sends the current snapshot to every subscriber, dropping the ones that
    /// cannot be written to. Returns how many received it.
    pub async fn broadcast(&self) -> usize {
        let payload = match self.snapshot_json().await {
            Ok(payload) => payload,
            Err(e) => {
                error!("Cannot serialize library snapshot: {}", e);
                return 0;
            }
        };

        let subscribers: Vec<Arc<Subscriber>> = self.registry().values().cloned().collect();

        let mut delivered = 0;
        let mut failed = Vec::new();
        for subscriber in subscribers {
            let mut sink = subscriber.sink.lock().await;
            match sink.send_snapshot(&payload).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("Dropping subscriber {}: {}", subscriber.id, e);
                    sink.close().await;
                    failed.push(subscriber.id);
                }
            }
        }

        if !failed.is_empty() {
            let mut registry = self.registry();
            for id in failed {
                registry.remove(&id);
            }
        }

        delivered
    }

    pub async fn close_all(&self) {
        let subscribers: Vec<Arc<Subscriber>> =
            self.registry().drain().map(|(_, subscriber)| subscriber).collect();
        for subscriber in subscribers {
            subscriber.sink.lock().await.close().await;
        }
    }

    /// Pushes a snapshot after every library change and on every heartbeat
    /// until `shutdown` fires, then closes all subscribers. Changes that
    /// queue up while a broadcast is in flight go out together in the next.
    pub async fn run(
        self,
        mut changes: mpsc::UnboundedReceiver<LibraryChange>,
        shutdown: CancellationToken,
    ) {
        let mut heartbeat = interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut changes_open = true;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                change = changes.recv(), if changes_open => match change {
                    Some(change) => {
                        debug!("Library change: {:?}", change);
                        while let Ok(change) = changes.try_recv() {
                            debug!("Library change: {:?}", change);
                        }
                        self.broadcast().await;
                    }
                    None => changes_open = false,
                },
                _ = heartbeat.tick() => {
                    let delivered = self.broadcast().await;
                    debug!("Heartbeat delivered to {} subscribers", delivered);
                }
            }
        }

        self.close_all().await;
        info!("Broadcaster stopped");
    }
}
