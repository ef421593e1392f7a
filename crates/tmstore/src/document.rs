//! Core document types for tmstore.
//!
//! The whole application state lives in one flat string-to-string document.
//! This module defines that document, the version token used for
//! compare-and-swap replaces, the wire envelope the document store speaks,
//! and the backup records written back into the document.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The single remote document: string keys to string values.
///
/// Kept as a `BTreeMap` so serialization is canonical and version tokens are
/// stable for equal contents.
pub type Document = BTreeMap<String, String>;

/// Prefix of keys holding backup records.
pub const BACKUP_KEY_PREFIX: &str = "backup_";

/// Compute the version token of a document.
///
/// The token is the BLAKE3 hash of the canonical JSON serialization.
#[must_use]
pub fn version_token(document: &Document) -> String {
    // Serializing a map of strings cannot fail.
    let bytes = serde_json::to_vec(document).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

/// Parse a document from a JSON body, rejecting anything but a flat object of strings.
///
/// # Errors
///
/// Returns [`Error::MalformedDocument`] if the body is not a JSON object of strings.
pub fn parse_document(body: &[u8]) -> Result<Document> {
    serde_json::from_slice(body).map_err(|e| Error::malformed(e.to_string()))
}

/// Document metadata returned alongside the record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Identifier of the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Version token of the record, when the server tracks one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Response envelope for document reads and replaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// The document itself.
    pub record: Document,
    /// Metadata about the document.
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

impl Envelope {
    /// Wrap a document, stamping its version token.
    #[must_use]
    pub fn new(id: impl Into<String>, record: Document) -> Self {
        let version = version_token(&record);
        Self {
            record,
            metadata: DocumentMetadata {
                id: Some(id.into()),
                version: Some(version),
            },
        }
    }
}

/// A snapshot of the document as read from the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// The document contents.
    pub document: Document,
    /// The version token the server reported, if any.
    pub version: Option<String>,
}

/// A backup of the whole document, stored as a key inside that document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// When the backup was taken (RFC 3339).
    pub timestamp: String,
    /// The document contents at that time.
    pub data: Document,
    /// Version tag of the software that wrote the backup.
    pub version: String,
}

impl BackupRecord {
    /// Create a backup record of `data` taken at `at`.
    #[must_use]
    pub fn new(data: Document, at: DateTime<Utc>, version: impl Into<String>) -> Self {
        Self {
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            data,
            version: version.into(),
        }
    }

    /// The key this record is stored under for a backup taken at `at`.
    #[must_use]
    pub fn key_for(at: DateTime<Utc>) -> String {
        format!("{BACKUP_KEY_PREFIX}{}", at.timestamp_millis())
    }

    /// Parse the record's timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the timestamp is not valid RFC 3339.
    pub fn taken_at(&self) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| Error::malformed(format!("backup timestamp: {e}")))
    }
}

fn backup_key_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^backup_(\d+)$").expect("static pattern is valid"))
}

/// Check whether a key names a backup record.
#[must_use]
pub fn is_backup_key(key: &str) -> bool {
    backup_key_regex().is_match(key)
}

/// Return the backup keys of a document, newest first.
#[must_use]
pub fn backup_keys(document: &Document) -> Vec<String> {
    let mut keys: Vec<(u64, &String)> = document
        .keys()
        .filter_map(|key| {
            let millis = backup_key_regex().captures(key)?.get(1)?.as_str().parse().ok()?;
            Some((millis, key))
        })
        .collect();
    keys.sort_by(|a, b| b.0.cmp(&a.0));
    keys.into_iter().map(|(_, key)| key.clone()).collect()
}

/// Reject keys the store cannot hold.
///
/// # Errors
///
/// Returns [`Error::InvalidKey`] if the key is empty.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::invalid_key("key must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn doc(pairs: &[(&str, &str)]) -> Document {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_version_token_stable_for_equal_documents() {
        let a = doc(&[("a", "1"), ("b", "2")]);
        let b = doc(&[("b", "2"), ("a", "1")]);
        assert_eq!(version_token(&a), version_token(&b));
    }

    #[test]
    fn test_version_token_changes_with_content() {
        let a = doc(&[("a", "1")]);
        let b = doc(&[("a", "2")]);
        assert_ne!(version_token(&a), version_token(&b));
        assert_eq!(version_token(&a).len(), 64);
    }

    #[test]
    fn test_parse_document() {
        let parsed = parse_document(br#"{"missions":"[{\"id\":1}]"}"#).unwrap();
        assert_eq!(parsed.get("missions").unwrap(), r#"[{"id":1}]"#);
    }

    #[test]
    fn test_parse_document_rejects_non_object() {
        let err = parse_document(b"[1,2,3]").unwrap_err();
        assert!(matches!(err, Error::MalformedDocument { .. }));

        let err = parse_document(b"not json").unwrap_err();
        assert!(matches!(err, Error::MalformedDocument { .. }));
    }

    #[test]
    fn test_envelope_roundtrip_shape() {
        let envelope = Envelope::new("doc-1", doc(&[("a", "1")]));
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["record"]["a"], "1");
        assert_eq!(json["metadata"]["id"], "doc-1");
        assert!(json["metadata"]["version"].is_string());
    }

    #[test]
    fn test_envelope_without_metadata() {
        let envelope: Envelope = serde_json::from_str(r#"{"record":{"a":"1"}}"#).unwrap();
        assert_eq!(envelope.record.get("a").unwrap(), "1");
        assert!(envelope.metadata.version.is_none());
    }

    #[test]
    fn test_backup_record_timestamp_parses() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let record = BackupRecord::new(doc(&[("a", "1")]), at, "1.0");
        assert_eq!(record.timestamp, "2024-03-01T12:30:00.000Z");
        assert_eq!(record.taken_at().unwrap(), at);
    }

    #[test]
    fn test_backup_key_for() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(BackupRecord::key_for(at), "backup_1700000000123");
    }

    #[test]
    fn test_is_backup_key() {
        assert!(is_backup_key("backup_1700000000123"));
        assert!(!is_backup_key("backup_"));
        assert!(!is_backup_key("backup_abc"));
        assert!(!is_backup_key("missions"));
    }

    #[test]
    fn test_backup_keys_newest_first() {
        let document = doc(&[
            ("backup_100", "{}"),
            ("missions", "[]"),
            ("backup_300", "{}"),
            ("backup_20", "{}"),
        ]);
        assert_eq!(
            backup_keys(&document),
            vec!["backup_300", "backup_100", "backup_20"]
        );
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("missions").is_ok());
        assert!(matches!(
            validate_key("").unwrap_err(),
            Error::InvalidKey { .. }
        ));
    }
}
