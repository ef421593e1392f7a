//! Document proxy.
//!
//! Serves the document store protocol to clients while keeping the hosted
//! store's master key on the server. Replaces are compare-and-swap: a client
//! sends back the version token it read as `If-Match`, and the proxy refuses
//! the replace with `412` if the document changed in between.

mod backend;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

pub use backend::{DocumentBackend, HostedBackend, MemoryBackend, MASTER_KEY_HEADER};

use crate::config::Config;
use crate::document::{parse_document, version_token, Document, Envelope};
use crate::error::{Error, Result};

/// Shared proxy state.
#[derive(Debug, Clone)]
pub struct ProxyState {
    inner: Arc<ProxyInner>,
}

#[derive(Debug)]
struct ProxyInner {
    document_id: String,
    backend: Arc<dyn DocumentBackend>,
    /// Held across the version check and the store so replaces are atomic.
    write_lock: Mutex<()>,
}

impl ProxyState {
    /// Create proxy state serving `document_id` from `backend`.
    #[must_use]
    pub fn new(document_id: impl Into<String>, backend: Arc<dyn DocumentBackend>) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                document_id: document_id.into(),
                backend,
                write_lock: Mutex::new(()),
            }),
        }
    }

    fn check_id(&self, id: &str) -> std::result::Result<(), ProxyError> {
        if id == self.inner.document_id {
            Ok(())
        } else {
            Err(ProxyError::UnknownDocument(id.to_string()))
        }
    }
}

/// Pick the backend described by the configuration.
///
/// # Errors
///
/// Returns [`Error::ConfigValidation`] if the hosted backend is selected but
/// no master key is configured.
pub fn backend_from_config(config: &Config, memory: bool) -> Result<Arc<dyn DocumentBackend>> {
    if memory {
        return Ok(Arc::new(MemoryBackend::new()));
    }

    let master_key = config
        .proxy
        .master_key
        .as_deref()
        .filter(|key| !key.is_empty())
        .ok_or_else(|| Error::ConfigValidation {
            message: "proxy.master_key is required to reach the hosted store \
                      (set TMSTORE_PROXY__MASTER_KEY)"
                .to_string(),
        })?;

    Ok(Arc::new(HostedBackend::new(
        &config.proxy.upstream,
        config.remote.document_id.clone(),
        master_key,
        config.request_timeout(),
    )?))
}

/// Build the proxy router.
pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/b/{id}/latest", get(read_document))
        .route("/b/{id}", put(replace_document))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(addr: SocketAddr, state: ProxyState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        backend = state.inner.backend.name(),
        document = %state.inner.document_id,
        "Document proxy listening on {}",
        listener.local_addr()?
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down document proxy");
        })
        .await
        .context("document proxy failed")?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn read_document(
    State(state): State<ProxyState>,
    Path(id): Path<String>,
) -> std::result::Result<Response, ProxyError> {
    state.check_id(&id)?;
    let document = state.inner.backend.load().await?;
    Ok(envelope_response(&id, document))
}

async fn replace_document(
    State(state): State<ProxyState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Response, ProxyError> {
    state.check_id(&id)?;
    let document = parse_document(&body).map_err(|e| ProxyError::InvalidBody(e.to_string()))?;
    let expected = if_match(&headers);

    let _guard = state.inner.write_lock.lock().await;
    if let Some(expected) = expected {
        let current = version_token(&state.inner.backend.load().await?);
        if current != expected {
            debug!(%expected, %current, "Rejecting stale replace");
            return Err(ProxyError::VersionMismatch);
        }
    }
    state.inner.backend.store(&document).await?;

    debug!(entries = document.len(), "Replaced document");
    Ok(envelope_response(&id, document))
}

/// Expected version from `If-Match`, `None` when absent or `*`.
fn if_match(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::IF_MATCH)?.to_str().ok()?.trim();
    let value = value.strip_prefix("W/").unwrap_or(value).trim_matches('"');
    (value != "*").then(|| value.to_string())
}

fn envelope_response(id: &str, document: Document) -> Response {
    let envelope = Envelope::new(id, document);
    let etag = format!(
        "\"{}\"",
        envelope.metadata.version.as_deref().unwrap_or_default()
    );
    ([(header::ETAG, etag)], Json(envelope)).into_response()
}

/// Errors returned to proxy clients.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The path names a document this proxy does not serve.
    #[error("unknown document: {0}")]
    UnknownDocument(String),
    /// `If-Match` did not match the current version.
    #[error("document changed since it was read")]
    VersionMismatch,
    /// The request body is not a flat JSON object of strings.
    #[error("{0}")]
    InvalidBody(String),
    /// The backend failed.
    #[error(transparent)]
    Backend(#[from] Error),
}

impl ProxyError {
    /// HTTP status reported for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnknownDocument(_) => StatusCode::NOT_FOUND,
            Self::VersionMismatch => StatusCode::PRECONDITION_FAILED,
            Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::Backend(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        if let Self::Backend(err) = &self {
            error!("Document backend failed: {err}");
        }
        let body = Json(serde_json::json!({ "message": self.to_string() }));
        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn start(initial: Document) -> String {
        let state = ProxyState::new("doc", Arc::new(MemoryBackend::with_document(initial)));
        let listener = TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router(state)).await;
        });
        format!("http://{addr}")
    }

    async fn read(base: &str) -> (String, Envelope) {
        let response = reqwest::get(format!("{base}/b/doc/latest")).await.unwrap();
        assert_eq!(response.status(), 200);
        let etag = response
            .headers()
            .get("etag")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        (etag, response.json().await.unwrap())
    }

    #[test]
    fn test_proxy_error_display_and_status() {
        let err = ProxyError::UnknownDocument("other".to_string());
        assert_eq!(err.to_string(), "unknown document: other");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = ProxyError::VersionMismatch;
        assert_eq!(err.to_string(), "document changed since it was read");
        assert_eq!(err.status(), StatusCode::PRECONDITION_FAILED);

        let err = ProxyError::from(Error::proxy("upstream down"));
        assert!(err.to_string().contains("upstream down"));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn test_if_match_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(if_match(&headers), None);

        headers.insert(header::IF_MATCH, "\"abc\"".parse().unwrap());
        assert_eq!(if_match(&headers).as_deref(), Some("abc"));

        headers.insert(header::IF_MATCH, "W/\"abc\"".parse().unwrap());
        assert_eq!(if_match(&headers).as_deref(), Some("abc"));

        headers.insert(header::IF_MATCH, "*".parse().unwrap());
        assert_eq!(if_match(&headers), None);
    }

    #[tokio::test]
    async fn test_healthz() {
        let base = start(Document::new()).await;
        let body = reqwest::get(format!("{base}/healthz"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_read_returns_envelope_and_etag() {
        let initial: Document = [("a".to_string(), "1".to_string())].into();
        let base = start(initial.clone()).await;

        let (etag, envelope) = read(&base).await;
        assert_eq!(envelope.record, initial);
        assert_eq!(envelope.metadata.id.as_deref(), Some("doc"));
        assert_eq!(etag, format!("\"{}\"", version_token(&initial)));
    }

    #[tokio::test]
    async fn test_unknown_document() {
        let base = start(Document::new()).await;
        let response = reqwest::get(format!("{base}/b/other/latest")).await.unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_replace_with_matching_version() {
        let base = start(Document::new()).await;
        let (etag, _) = read(&base).await;

        let response = reqwest::Client::new()
            .put(format!("{base}/b/doc"))
            .header("if-match", etag)
            .json(&serde_json::json!({ "a": "1" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let (_, envelope) = read(&base).await;
        assert_eq!(envelope.record.get("a").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn test_replace_with_stale_version() {
        let base = start(Document::new()).await;
        let (stale, _) = read(&base).await;
        let http = reqwest::Client::new();

        let first = http
            .put(format!("{base}/b/doc"))
            .header("if-match", &stale)
            .json(&serde_json::json!({ "a": "1" }))
            .send()
            .await
            .unwrap();
        assert_eq!(first.status(), 200);

        let second = http
            .put(format!("{base}/b/doc"))
            .header("if-match", &stale)
            .json(&serde_json::json!({ "b": "2" }))
            .send()
            .await
            .unwrap();
        assert_eq!(second.status(), 412);

        let (_, envelope) = read(&base).await;
        assert!(envelope.record.contains_key("a"));
        assert!(!envelope.record.contains_key("b"));
    }

    #[tokio::test]
    async fn test_replace_rejects_non_string_values() {
        let base = start(Document::new()).await;
        let response = reqwest::Client::new()
            .put(format!("{base}/b/doc"))
            .json(&serde_json::json!({ "a": 1 }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }

    #[test]
    fn test_backend_from_config_requires_master_key() {
        let config = Config::default();
        let err = backend_from_config(&config, false).unwrap_err();
        assert!(err.to_string().contains("master_key"));

        let backend = backend_from_config(&config, true).unwrap();
        assert_eq!(backend.name(), "memory");
    }

    #[test]
    fn test_backend_from_config_hosted() {
        let mut config = Config::default();
        config.proxy.master_key = Some("secret".to_string());
        let backend = backend_from_config(&config, false).unwrap();
        assert_eq!(backend.name(), "hosted");
        assert!(!format!("{backend:?}").contains("secret"));
    }
}
