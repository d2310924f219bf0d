//! Reactive settings cache in front of a [`DurableStore`].
//!
//! Reads never block: [`SettingsStore::values`] hands out the last published
//! snapshot. Mutations run `persist -> reload -> publish` on a worker thread
//! and only the reloaded record is ever published, so subscribers see what the
//! backend actually holds.
//!
//! Two overlapping mutations are not serialized. Whichever worker finishes its
//! reload last decides the published snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use thiserror::Error;

use crate::backend::{DurableStore, StoreError};
use crate::{SettingKey, SettingValue, SettingsRecord};

/// Immutable published copy of the settings row.
pub type Snapshot = Arc<SettingsRecord>;

#[derive(Debug, Error)]
pub enum PersistenceFailure {
    #[error("failed to persist settings: {0}")]
    Persist(#[source] StoreError),
    #[error("failed to reload settings after persisting: {0}")]
    Reload(#[source] StoreError),
    #[error("settings worker exited before reporting a result")]
    WorkerLost,
}

#[derive(Debug, Clone)]
pub struct SettingsEvent {
    pub snapshot: Snapshot,
    /// Increments by one on every publish, starting at 1 for the first load.
    pub generation: u64,
}

struct Shared {
    backend: Arc<dyn DurableStore>,
    current: RwLock<Snapshot>,
    staged: Mutex<SettingsRecord>,
    subscribers: Mutex<Vec<Sender<SettingsEvent>>>,
    generation: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn current(&self) -> Snapshot {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn load(&self) -> Result<SettingsRecord, StoreError> {
        let stored = self.backend.get(&SettingKey::ALL)?;
        Ok(stored.resolve())
    }

    fn publish(&self, record: SettingsRecord) -> Snapshot {
        let snapshot = Arc::new(record);
        let mut subscribers = lock(&self.subscribers);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = snapshot.clone();
        *lock(&self.staged) = record;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(
            generation,
            enabled = record.enabled,
            brightness = record.brightness,
            pixel_size = record.pixel_size.get(),
            "published settings snapshot"
        );
        let event = SettingsEvent {
            snapshot: snapshot.clone(),
            generation,
        };
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
        snapshot
    }

    fn reload_and_publish(&self) -> Result<Snapshot, StoreError> {
        let record = self.load()?;
        Ok(self.publish(record))
    }

    fn persist_then_reload(&self, record: SettingsRecord) -> Result<Snapshot, PersistenceFailure> {
        if let Err(err) = self.backend.set(&record) {
            *lock(&self.staged) = *self.current();
            return Err(PersistenceFailure::Persist(err));
        }
        self.reload_and_publish()
            .map_err(PersistenceFailure::Reload)
    }
}

/// Cloneable handle to the settings cache. All clones share one snapshot and
/// one subscriber list.
#[derive(Clone)]
pub struct SettingsStore {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsStore")
            .field("values", &*self.values())
            .field("generation", &self.generation())
            .finish()
    }
}

impl SettingsStore {
    fn with_backend(backend: Arc<dyn DurableStore>) -> Self {
        let defaults = SettingsRecord::default();
        Self {
            shared: Arc::new(Shared {
                backend,
                current: RwLock::new(Arc::new(defaults)),
                staged: Mutex::new(defaults),
                subscribers: Mutex::new(Vec::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Returns immediately with defaults published locally and starts the
    /// initial load in the background. The loaded snapshot arrives as the
    /// first [`SettingsEvent`].
    pub fn open(backend: impl DurableStore) -> Self {
        let store = Self::with_backend(Arc::new(backend));
        let shared = Arc::clone(&store.shared);
        let spawned = thread::Builder::new()
            .name("crtconfig-load".into())
            .spawn(move || {
                if let Err(err) = shared.reload_and_publish() {
                    tracing::warn!(error = %err, "initial settings load failed; keeping defaults");
                }
            });
        if let Err(err) = spawned {
            tracing::warn!(error = %err, "failed to spawn settings loader; loading inline");
            if let Err(err) = store.shared.reload_and_publish() {
                tracing::warn!(error = %err, "initial settings load failed; keeping defaults");
            }
        }
        store
    }

    /// Performs the initial load on the calling thread.
    pub fn open_blocking(backend: impl DurableStore) -> Result<Self, StoreError> {
        let store = Self::with_backend(Arc::new(backend));
        store.shared.reload_and_publish()?;
        Ok(store)
    }

    /// Last published snapshot. Defaults until the first load completes.
    pub fn values(&self) -> Snapshot {
        self.shared.current()
    }

    pub fn value(&self, key: SettingKey) -> SettingValue {
        self.values().get(key)
    }

    /// Number of snapshots published so far.
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    /// Merges `value` into the staged record and persists the whole record.
    pub fn set_value(&self, value: SettingValue) -> PendingUpdate {
        let record = {
            let mut staged = lock(&self.shared.staged);
            staged.apply(value);
            *staged
        };
        tracing::debug!(key = %value.key(), %value, "updating setting");
        self.spawn_persist(record)
    }

    /// Edits the staged record in place and persists the result. Edits
    /// made before earlier updates publish build on those updates.
    pub fn update(&self, edit: impl FnOnce(&mut SettingsRecord)) -> PendingUpdate {
        let record = {
            let mut staged = lock(&self.shared.staged);
            edit(&mut staged);
            *staged
        };
        tracing::debug!(?record, "updating staged settings");
        self.spawn_persist(record)
    }

    /// Replaces the whole record.
    pub fn set_values(&self, record: SettingsRecord) -> PendingUpdate {
        *lock(&self.shared.staged) = record;
        tracing::debug!(?record, "replacing settings");
        self.spawn_persist(record)
    }

    /// Re-reads the backend and publishes what it holds.
    pub fn reload(&self) -> Result<Snapshot, StoreError> {
        self.shared.reload_and_publish()
    }

    pub fn subscribe(&self) -> SettingsSubscription {
        let (sender, receiver) = unbounded();
        lock(&self.shared.subscribers).push(sender);
        SettingsSubscription { receiver }
    }

    fn spawn_persist(&self, record: SettingsRecord) -> PendingUpdate {
        let (sender, receiver) = bounded(1);
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("crtconfig-persist".into())
            .spawn(move || {
                let result = shared.persist_then_reload(record);
                if let Err(err) = &result {
                    tracing::warn!(error = %err, "settings update failed");
                }
                let _ = sender.send(result);
            });
        if let Err(err) = spawned {
            tracing::warn!(error = %err, "failed to spawn settings worker");
            *lock(&self.shared.staged) = *self.shared.current();
        }
        PendingUpdate { receiver }
    }
}

/// Completion handle for one mutation. Dropping it does not cancel the work.
#[derive(Debug)]
pub struct PendingUpdate {
    receiver: Receiver<Result<Snapshot, PersistenceFailure>>,
}

impl PendingUpdate {
    pub fn wait(self) -> Result<Snapshot, PersistenceFailure> {
        self.receiver
            .recv()
            .unwrap_or(Err(PersistenceFailure::WorkerLost))
    }

    /// `None` if the worker has not finished within `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Snapshot, PersistenceFailure>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(PersistenceFailure::WorkerLost)),
        }
    }
}

/// Receives one [`SettingsEvent`] per publish made after subscribing.
#[derive(Debug)]
pub struct SettingsSubscription {
    receiver: Receiver<SettingsEvent>,
}

impl SettingsSubscription {
    pub fn recv(&self) -> Option<SettingsEvent> {
        self.receiver.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<SettingsEvent> {
        self.receiver.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<SettingsEvent> {
        self.receiver.try_recv().ok()
    }

    /// Drains everything queued and returns the newest event.
    pub fn latest(&self) -> Option<SettingsEvent> {
        self.receiver.try_iter().last()
    }
}
