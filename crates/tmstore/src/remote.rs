//! Client for the hosted JSON document.
//!
//! All application data lives in one remote document. Reads fetch the whole
//! document; writes fetch it, merge one key and replace it conditionally on
//! the version token the server handed out, so concurrent writers re-merge
//! instead of silently overwriting each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use reqwest::header::{ETAG, IF_MATCH};
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use crate::config::RemoteConfig;
use crate::document::{
    backup_keys, validate_key, BackupRecord, Document, Envelope, Snapshot,
};
use crate::error::{Error, Result};
use crate::local::LocalStore;

/// Default version tag written into backup records.
pub const DEFAULT_BACKUP_VERSION: &str = "1.0";

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Outcome of a conditional replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replace {
    Stored,
    Conflict,
}

/// Client for the single remote document.
#[derive(Debug)]
pub struct RemoteClient {
    http: reqwest::Client,
    endpoint: String,
    document_id: String,
    max_conflict_retries: u32,
    backup_version: String,
    /// Fallback target when the remote side is unreachable.
    local: Arc<LocalStore>,
    /// In-memory mirror of remote values.
    mirror: RwLock<HashMap<String, String>>,
    online: AtomicBool,
}

impl RemoteClient {
    /// Create a client for the document described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &RemoteConfig, local: Arc<LocalStore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            document_id: config.document_id.clone(),
            max_conflict_retries: config.max_conflict_retries,
            backup_version: DEFAULT_BACKUP_VERSION.to_string(),
            local,
            mirror: RwLock::new(HashMap::new()),
            online: AtomicBool::new(true),
        })
    }

    /// Set the version tag written into backup records.
    #[must_use]
    pub fn with_backup_version(mut self, version: impl Into<String>) -> Self {
        self.backup_version = version.into();
        self
    }

    /// URL of the document resource.
    #[must_use]
    pub fn document_url(&self) -> String {
        format!("{}/b/{}", self.endpoint, self.document_id)
    }

    fn latest_url(&self) -> String {
        format!("{}/latest", self.document_url())
    }

    /// Last known reachability of the remote side.
    ///
    /// Advisory only: it is cleared by a network failure and set again by
    /// the next successful request, and nothing changes behavior based on it.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    fn mark_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::Relaxed);
        if was != online {
            info!(online, "Remote document reachability changed");
        }
    }

    /// Record a value in the mirror without contacting the remote side.
    ///
    /// # Errors
    ///
    /// Returns an error if the mirror lock is poisoned.
    pub fn remember(&self, key: &str, value: &str) -> Result<()> {
        self.mirror
            .write()
            .map_err(|_| Error::internal("mirror lock poisoned"))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Drop a value from the mirror without contacting the remote side.
    ///
    /// # Errors
    ///
    /// Returns an error if the mirror lock is poisoned.
    pub fn forget(&self, key: &str) -> Result<()> {
        self.mirror
            .write()
            .map_err(|_| Error::internal("mirror lock poisoned"))?
            .remove(key);
        Ok(())
    }

    fn mirrored(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .mirror
            .read()
            .map_err(|_| Error::internal("mirror lock poisoned"))?
            .get(key)
            .cloned())
    }

    fn replace_mirror(&self, document: &Document) -> Result<()> {
        let mut mirror = self
            .mirror
            .write()
            .map_err(|_| Error::internal("mirror lock poisoned"))?;
        mirror.clear();
        mirror.extend(document.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    /// Fetch the document and its version token.
    ///
    /// # Errors
    ///
    /// Returns a network error if the request fails or the status is not a
    /// success, or [`Error::MalformedDocument`] if the body cannot be parsed.
    pub async fn fetch(&self) -> Result<Snapshot> {
        let url = self.latest_url();
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::remote(&url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::RemoteStatus {
                url,
                status: status.as_u16(),
            });
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string());
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::remote(&url, e.to_string()))?;
        let envelope: Envelope =
            serde_json::from_slice(&body).map_err(|e| Error::malformed(e.to_string()))?;

        let version = etag.or(envelope.metadata.version);
        debug!(
            entries = envelope.record.len(),
            version = version.as_deref().unwrap_or("-"),
            "Fetched remote document"
        );
        Ok(Snapshot {
            document: envelope.record,
            version,
        })
    }

    async fn replace(&self, document: &Document, version: Option<&str>) -> Result<Replace> {
        let url = self.document_url();
        let mut request = self.http.put(&url).json(document);
        if let Some(version) = version {
            request = request.header(IF_MATCH, format!("\"{version}\""));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::remote(&url, e.to_string()))?;

        match response.status() {
            StatusCode::PRECONDITION_FAILED => Ok(Replace::Conflict),
            status if status.is_success() => Ok(Replace::Stored),
            status => Err(Error::RemoteStatus {
                url,
                status: status.as_u16(),
            }),
        }
    }

    /// Fetch, apply `edit`, and replace conditionally until the replace wins.
    async fn update<F>(&self, key: &str, edit: F) -> Result<()>
    where
        F: Fn(&mut Document),
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let mut snapshot = self.fetch().await?;
            edit(&mut snapshot.document);

            match self
                .replace(&snapshot.document, snapshot.version.as_deref())
                .await?
            {
                Replace::Stored => return Ok(()),
                Replace::Conflict if attempts <= self.max_conflict_retries => {
                    debug!(key, attempts, "Remote document changed underneath, re-merging");
                }
                Replace::Conflict => {
                    return Err(Error::Conflict {
                        key: key.to_string(),
                        attempts,
                    });
                }
            }
        }
    }

    /// Fetch the whole document.
    ///
    /// Never fails: network and parse failures are logged and degrade to an
    /// empty document.
    pub async fn get_all_data(&self) -> Document {
        match self.fetch().await {
            Ok(snapshot) => {
                self.mark_online(true);
                snapshot.document
            }
            Err(e) => {
                warn!("Failed to fetch remote document: {e}");
                if e.is_network() {
                    self.mark_online(false);
                }
                Document::new()
            }
        }
    }

    /// Write one key into the remote document with no local fallback.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] for an empty key, [`Error::Conflict`] if
    /// concurrent writers kept winning, [`Error::MalformedDocument`] if the
    /// remote document cannot be parsed, or a network error.
    pub async fn push_item(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;

        match self
            .update(key, |document| {
                document.insert(key.to_string(), value.to_string());
            })
            .await
        {
            Ok(()) => {
                self.mark_online(true);
                debug!(key, "Stored key in remote document");
                Ok(())
            }
            Err(e) => {
                if e.is_network() {
                    self.mark_online(false);
                }
                Err(e)
            }
        }
    }

    /// Write one key into the remote document.
    ///
    /// The value goes into the mirror first. If the remote side is
    /// unreachable the value is written to the local store instead and the
    /// call still succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] for an empty key, [`Error::Conflict`] if
    /// concurrent writers kept winning, [`Error::MalformedDocument`] if the
    /// remote document cannot be parsed, or a local store error if the
    /// fallback write fails.
    pub async fn set_item(&self, key: &str, value: &str) -> Result<String> {
        validate_key(key)?;
        self.remember(key, value)?;

        match self.push_item(key, value).await {
            Ok(()) => Ok(value.to_string()),
            Err(e) if e.is_network() => {
                warn!(key, "Remote write failed, keeping value locally: {e}");
                self.local.set(key, value)?;
                Ok(value.to_string())
            }
            Err(e) => Err(e),
        }
    }

    /// Read one key.
    ///
    /// Mirrored values are returned without a request. Otherwise the whole
    /// document is fetched and replaces the mirror. If the remote side is
    /// unreachable the local store's value is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedDocument`] if the remote document cannot be
    /// parsed, or a local store error if the fallback read fails.
    pub async fn get_item(&self, key: &str) -> Result<Option<String>> {
        if let Some(value) = self.mirrored(key)? {
            return Ok(Some(value));
        }

        match self.fetch().await {
            Ok(snapshot) => {
                self.mark_online(true);
                self.replace_mirror(&snapshot.document)?;
                Ok(snapshot.document.get(key).cloned())
            }
            Err(e) if e.is_network() => {
                warn!(key, "Remote read failed, using local value: {e}");
                self.mark_online(false);
                self.local.get(key)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete one key from the remote document.
    ///
    /// Returns `false` without writing if the key is absent remotely.
    ///
    /// # Errors
    ///
    /// Returns any network, parse or conflict error; removals have no local
    /// fallback since the local store is updated by the caller.
    pub async fn remove_item(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        self.forget(key)?;

        if !self.fetch().await?.document.contains_key(key) {
            return Ok(false);
        }
        self.update(key, |document| {
            document.remove(key);
        })
        .await?;
        self.mark_online(true);
        Ok(true)
    }

    /// Snapshot the whole document into a new `backup_<millis>` key.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be fetched (an unreachable
    /// store would otherwise produce an empty backup) or the backup cannot be
    /// written.
    pub async fn create_backup(&self) -> Result<BackupRecord> {
        let snapshot = self.fetch().await?;
        let now = Utc::now();
        let record = BackupRecord::new(snapshot.document, now, self.backup_version.clone());
        let key = BackupRecord::key_for(now);

        self.set_item(&key, &serde_json::to_string(&record)?).await?;
        info!(key, entries = record.data.len(), "Created backup");
        Ok(record)
    }

    /// List backup keys in the document, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be fetched.
    pub async fn list_backups(&self) -> Result<Vec<String>> {
        Ok(backup_keys(&self.fetch().await?.document))
    }

    /// Load a backup record by key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackupNotFound`] if the key is absent, or an error if
    /// the document cannot be fetched or the record cannot be parsed.
    pub async fn load_backup(&self, key: &str) -> Result<BackupRecord> {
        let snapshot = self.fetch().await?;
        let raw = snapshot
            .document
            .get(key)
            .ok_or_else(|| Error::BackupNotFound {
                key: key.to_string(),
            })?;
        serde_json::from_str(raw).map_err(|e| Error::malformed(format!("backup {key}: {e}")))
    }

    /// Write every entry of a backup back into the document.
    ///
    /// Returns the number of restored keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the backup cannot be loaded or a write fails.
    pub async fn restore_backup(&self, key: &str) -> Result<usize> {
        let record = self.load_backup(key).await?;
        for (entry_key, value) in &record.data {
            self.set_item(entry_key, value).await?;
        }
        info!(key, entries = record.data.len(), "Restored backup");
        Ok(record.data.len())
    }
}
