//! Storage backends behind the document proxy.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::document::{Document, Envelope};
use crate::error::{Error, Result};

/// Header the hosted document store expects the secret in.
pub const MASTER_KEY_HEADER: &str = "X-Master-Key";

/// Where the proxy keeps the document.
#[async_trait]
pub trait DocumentBackend: Send + Sync + fmt::Debug {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// Load the current document.
    async fn load(&self) -> Result<Document>;

    /// Replace the document.
    async fn store(&self, document: &Document) -> Result<()>;
}

/// Document held in process memory. Lost on restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    document: RwLock<Document>,
}

impl MemoryBackend {
    /// Create an empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an in-memory backend seeded with `document`.
    #[must_use]
    pub fn with_document(document: Document) -> Self {
        Self {
            document: RwLock::new(document),
        }
    }
}

#[async_trait]
impl DocumentBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self) -> Result<Document> {
        Ok(self.document.read().await.clone())
    }

    async fn store(&self, document: &Document) -> Result<()> {
        *self.document.write().await = document.clone();
        Ok(())
    }
}

/// Document held by the hosted JSON store, authenticated with the master key.
pub struct HostedBackend {
    http: reqwest::Client,
    upstream: String,
    document_id: String,
    master_key: String,
}

impl HostedBackend {
    /// Create a backend for `document_id` at `upstream`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        upstream: &str,
        document_id: impl Into<String>,
        master_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            upstream: upstream.trim_end_matches('/').to_string(),
            document_id: document_id.into(),
            master_key: master_key.into(),
        })
    }

    fn document_url(&self) -> String {
        format!("{}/b/{}", self.upstream, self.document_id)
    }
}

impl fmt::Debug for HostedBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostedBackend")
            .field("upstream", &self.upstream)
            .field("document_id", &self.document_id)
            .field("master_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DocumentBackend for HostedBackend {
    fn name(&self) -> &'static str {
        "hosted"
    }

    async fn load(&self) -> Result<Document> {
        let url = format!("{}/latest", self.document_url());
        let response = self
            .http
            .get(&url)
            .header(MASTER_KEY_HEADER, &self.master_key)
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

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::remote(&url, e.to_string()))?;
        let envelope: Envelope =
            serde_json::from_slice(&body).map_err(|e| Error::malformed(e.to_string()))?;
        Ok(envelope.record)
    }

    async fn store(&self, document: &Document) -> Result<()> {
        let url = self.document_url();
        let response = self
            .http
            .put(&url)
            .header(MASTER_KEY_HEADER, &self.master_key)
            .json(document)
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
        Ok(())
    }
}
