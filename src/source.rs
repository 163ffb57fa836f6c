//! Document source abstraction
//!
//! The database is only seen through [`DocumentSource`]: one range-filtered,
//! ID-ordered scan per call, consumed through a pull-based [`DocumentCursor`].

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::partition::DownloadRange;

/// A document as stored in the source database
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    /// Primary key, `"{depth}:{path}"` for ordinary nodes
    pub id: String,
    /// Last modification time (seconds)
    pub modified: i64,
    /// Remaining document fields
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl RawDocument {
    /// Create a document with no fields
    pub fn new(id: impl Into<String>, modified: i64) -> Self {
        Self {
            id: id.into(),
            modified,
            fields: Map::new(),
        }
    }

    /// Builder-style field setter
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// A database that can scan one [`DownloadRange`] at a time
#[async_trait::async_trait]
pub trait DocumentSource: Send + Sync {
    /// Start a scan of `from <= modified < to` (and `id > start_after_id` when set),
    /// ordered by ID ascending
    async fn scan(&self, range: &DownloadRange) -> Result<Box<dyn DocumentCursor>>;
}

/// Pull-based cursor over one scan
#[async_trait::async_trait]
pub trait DocumentCursor: Send {
    /// Next document in ID order, or `None` when the scan is exhausted
    async fn next_document(&mut self) -> Result<Option<RawDocument>>;
}

/// In-process source backed by an ordered map keyed by document ID
///
/// Cursors re-read the map on every pull, so documents inserted while a scan
/// is running are seen if their ID sorts after the cursor position.
#[derive(Clone, Default)]
pub struct MemoryDocumentSource {
    documents: Arc<RwLock<BTreeMap<String, RawDocument>>>,
}

impl MemoryDocumentSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source holding `documents`
    pub fn from_documents(documents: impl IntoIterator<Item = RawDocument>) -> Self {
        let map = documents.into_iter().map(|d| (d.id.clone(), d)).collect();
        Self {
            documents: Arc::new(RwLock::new(map)),
        }
    }

    /// Insert or replace a document
    pub async fn insert(&self, document: RawDocument) {
        self.documents
            .write()
            .await
            .insert(document.id.clone(), document);
    }

    /// Remove a document by ID
    pub async fn remove(&self, id: &str) -> Option<RawDocument> {
        self.documents.write().await.remove(id)
    }

    /// Number of stored documents
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Whether the source is empty
    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl DocumentSource for MemoryDocumentSource {
    async fn scan(&self, range: &DownloadRange) -> Result<Box<dyn DocumentCursor>> {
        Ok(Box::new(MemoryCursor {
            documents: Arc::clone(&self.documents),
            last_id: range.start_after_id().map(str::to_string),
            range: range.clone(),
        }))
    }
}

struct MemoryCursor {
    documents: Arc<RwLock<BTreeMap<String, RawDocument>>>,
    range: DownloadRange,
    last_id: Option<String>,
}

#[async_trait::async_trait]
impl DocumentCursor for MemoryCursor {
    async fn next_document(&mut self) -> Result<Option<RawDocument>> {
        let documents = self.documents.read().await;
        let lower = match &self.last_id {
            Some(id) => Bound::Excluded(id.as_str()),
            None => Bound::Unbounded,
        };
        let next = documents
            .range::<str, _>((lower, Bound::Unbounded))
            .map(|(_, doc)| doc)
            .find(|doc| self.range.contains(doc.modified, &doc.id))
            .cloned();
        if let Some(doc) = &next {
            self.last_id = Some(doc.id.clone());
        }
        Ok(next)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(source: &MemoryDocumentSource, range: &DownloadRange) -> Vec<String> {
        let mut cursor = source.scan(range).await.unwrap();
        let mut ids = Vec::new();
        while let Some(doc) = cursor.next_document().await.unwrap() {
            ids.push(doc.id);
        }
        ids
    }

    fn source() -> MemoryDocumentSource {
        MemoryDocumentSource::from_documents([
            RawDocument::new("1:/c", 5),
            RawDocument::new("1:/a", 20),
            RawDocument::new("1:/b", 10),
            RawDocument::new("2:/a/x", 15),
        ])
    }

    #[tokio::test]
    async fn scan_is_id_ordered_and_time_filtered() {
        let range = DownloadRange::new(10, 20, None).unwrap();
        assert_eq!(drain(&source(), &range).await, vec!["1:/b", "2:/a/x"]);
    }

    #[tokio::test]
    async fn scan_honours_start_after_id() {
        let range = DownloadRange::new(0, 100, Some("1:/b".to_string())).unwrap();
        assert_eq!(drain(&source(), &range).await, vec!["1:/c", "2:/a/x"]);
    }

    #[tokio::test]
    async fn cursor_sees_documents_inserted_ahead_of_it() {
        let source = source();
        let range = DownloadRange::unbounded_from(0);
        let mut cursor = source.scan(&range).await.unwrap();
        assert_eq!(cursor.next_document().await.unwrap().unwrap().id, "1:/a");

        source.insert(RawDocument::new("1:/aa", 30)).await;
        // behind the cursor, never observed
        source.insert(RawDocument::new("0:/", 30)).await;

        let mut rest = Vec::new();
        while let Some(doc) = cursor.next_document().await.unwrap() {
            rest.push(doc.id);
        }
        assert_eq!(rest, vec!["1:/aa", "1:/b", "1:/c", "2:/a/x"]);
    }

    #[tokio::test]
    async fn empty_interval_yields_nothing() {
        let range = DownloadRange::new(10, 10, None).unwrap();
        assert!(drain(&source(), &range).await.is_empty());
    }

    #[test]
    fn raw_document_deserializes_without_fields() {
        let doc: RawDocument = serde_json::from_str(r#"{"id":"1:/a","modified":3}"#).unwrap();
        assert_eq!(doc, RawDocument::new("1:/a", 3));
    }
}
