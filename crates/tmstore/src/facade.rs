//! Key-value facade.
//!
//! Application code talks to a [`KeyValueStore`] chosen at startup: either
//! the [`LocalStore`] alone, or a [`RemoteBackedStore`] that writes locally
//! first and then pushes to the remote document in the background.
//!
//! Background writes go through one writer task in the order they were
//! issued, so a later write to a key always lands after an earlier one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::document::validate_key;
use crate::error::{Error, Result};
use crate::local::LocalStore;
use crate::remote::RemoteClient;

/// Asynchronous string key-value storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete `key`, returning whether it existed.
    async fn remove(&self, key: &str) -> Result<bool>;

    /// List all keys in ascending order.
    async fn keys(&self) -> Result<Vec<String>>;
}

#[async_trait]
impl KeyValueStore for LocalStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        LocalStore::get(self, key)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        LocalStore::set(self, key, value)
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        LocalStore::remove(self, key)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        LocalStore::keys(self)
    }
}

/// Reported network availability, shared between the application and the facade.
#[derive(Debug, Clone)]
pub struct Connectivity(Arc<AtomicBool>);

impl Connectivity {
    /// Create a flag with the given initial state.
    #[must_use]
    pub fn new(online: bool) -> Self {
        Self(Arc::new(AtomicBool::new(online)))
    }

    /// Whether the network is reported available.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Report network availability.
    pub fn set_online(&self, online: bool) {
        self.0.store(online, Ordering::Relaxed);
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Result of waiting for background remote writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Writes that reached the remote document.
    pub completed: usize,
    /// Writes that did not; their values stay in the local store.
    pub failed: usize,
}

/// Work for the background writer.
#[derive(Debug)]
enum WriteOp {
    Set { key: String, value: String },
    Remove { key: String },
    Flush(oneshot::Sender<FlushReport>),
}

/// Keys with queued remote writes, counted per key.
#[derive(Debug, Default)]
struct PendingKeys(Mutex<HashMap<String, usize>>);

impl PendingKeys {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, usize>>> {
        self.0
            .lock()
            .map_err(|_| Error::internal("pending key lock poisoned"))
    }

    fn begin(&self, key: &str) -> Result<()> {
        *self.lock()?.entry(key.to_string()).or_default() += 1;
        Ok(())
    }

    fn finish(&self, key: &str) {
        let Ok(mut pending) = self.lock() else {
            return;
        };
        if let Some(count) = pending.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                pending.remove(key);
            }
        }
    }

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.lock()?.contains_key(key))
    }

    fn total(&self) -> Result<usize> {
        Ok(self.lock()?.values().sum())
    }
}

/// Drain the queue one write at a time until every sender is gone.
async fn run_writer(
    remote: Arc<RemoteClient>,
    pending: Arc<PendingKeys>,
    mut queue: mpsc::UnboundedReceiver<WriteOp>,
) {
    let mut report = FlushReport::default();
    while let Some(op) = queue.recv().await {
        let (key, stored) = match op {
            WriteOp::Flush(reply) => {
                debug!(
                    completed = report.completed,
                    failed = report.failed,
                    "Flushed remote writes"
                );
                let _ = reply.send(std::mem::take(&mut report));
                continue;
            }
            WriteOp::Set { key, value } => {
                let stored = match remote.push_item(&key, &value).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(key = %key, "Background remote write failed, value kept locally: {e}");
                        false
                    }
                };
                (key, stored)
            }
            WriteOp::Remove { key } => {
                let stored = match remote.remove_item(&key).await {
                    Ok(_) => true,
                    Err(e) => {
                        warn!(key = %key, "Background remote delete failed: {e}");
                        false
                    }
                };
                (key, stored)
            }
        };

        pending.finish(&key);
        if stored {
            report.completed += 1;
        } else {
            report.failed += 1;
        }
    }
}

/// Store that keeps the local store authoritative for the caller and mirrors
/// every change into the remote document in the background.
#[derive(Debug)]
pub struct RemoteBackedStore {
    local: Arc<LocalStore>,
    remote: Arc<RemoteClient>,
    connectivity: Connectivity,
    queue: mpsc::UnboundedSender<WriteOp>,
    pending: Arc<PendingKeys>,
}

impl RemoteBackedStore {
    /// Combine a local store and a remote client, starting the background
    /// writer.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn new(local: Arc<LocalStore>, remote: Arc<RemoteClient>, connectivity: Connectivity) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        let pending = Arc::new(PendingKeys::default());
        tokio::spawn(run_writer(
            Arc::clone(&remote),
            Arc::clone(&pending),
            receiver,
        ));

        Self {
            local,
            remote,
            connectivity,
            queue,
            pending,
        }
    }

    /// The remote client behind this store.
    #[must_use]
    pub fn remote(&self) -> &Arc<RemoteClient> {
        &self.remote
    }

    /// The connectivity flag consulted on reads.
    #[must_use]
    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Number of remote writes queued and not yet finished.
    ///
    /// # Errors
    ///
    /// Returns an error if the pending key lock is poisoned.
    pub fn pending_writes(&self) -> Result<usize> {
        self.pending.total()
    }

    fn dispatch(&self, key: &str, op: WriteOp) -> Result<()> {
        self.pending.begin(key)?;
        if self.queue.send(op).is_err() {
            self.pending.finish(key);
            return Err(Error::internal("background writer stopped"));
        }
        Ok(())
    }

    /// Wait for every background remote write dispatched so far.
    ///
    /// The report counts the writes finished since the previous flush.
    ///
    /// # Errors
    ///
    /// Returns an error if the background writer has stopped.
    pub async fn flush(&self) -> Result<FlushReport> {
        let (reply, report) = oneshot::channel();
        self.queue
            .send(WriteOp::Flush(reply))
            .map_err(|_| Error::internal("background writer stopped"))?;
        report
            .await
            .map_err(|_| Error::internal("background writer stopped"))
    }
}

#[async_trait]
impl KeyValueStore for RemoteBackedStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        // Queued writes have not reached the remote document yet.
        if !self.connectivity.is_online() || self.pending.contains(key)? {
            return self.local.get(key);
        }

        match self.remote.get_item(key).await {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(key, "Remote read failed, using local value: {e}");
                self.local.get(key)
            }
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        self.local.set(key, value)?;
        self.remote.remember(key, value)?;
        self.dispatch(
            key,
            WriteOp::Set {
                key: key.to_string(),
                value: value.to_string(),
            },
        )
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let existed = self.local.remove(key)?;
        self.remote.forget(key)?;
        self.dispatch(
            key,
            WriteOp::Remove {
                key: key.to_string(),
            },
        )?;
        Ok(existed)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = self.local.keys()?;
        if self.connectivity.is_online() {
            for key in self.remote.get_all_data().await.into_keys() {
                if !self.pending.contains(&key)? {
                    keys.push(key);
                }
            }
            keys.sort();
            keys.dedup();
        }
        Ok(keys)
    }
}
