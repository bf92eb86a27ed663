//! Storage abstraction used by the security services.
//!
//! [`DocumentStore`] is implemented by the REST [`FirestoreClient`] and by the
//! in-memory [`MemoryStore`](crate::memory::MemoryStore), which follows the same
//! field-mask, query and not-found rules.

use async_trait::async_trait;

use crate::client::FirestoreClient;
use crate::codec::{decode_fields, Fields};
use crate::error::{FirestoreError, FirestoreResult};
use crate::query::Query;
use crate::types::Document;

/// A decoded document together with its id.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentData {
    pub id: String,
    pub fields: Fields,
    pub create_time: Option<String>,
    pub update_time: Option<String>,
}

impl DocumentData {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
            create_time: None,
            update_time: None,
        }
    }

    /// Decode a wire document; its id is the last segment of the resource name.
    pub fn from_document(doc: Document) -> FirestoreResult<Self> {
        let id = doc
            .id()
            .map(str::to_string)
            .ok_or_else(|| FirestoreError::InvalidResponse("document without a name".to_string()))?;

        Ok(Self {
            id,
            fields: doc.fields.as_ref().map(decode_fields).unwrap_or_default(),
            create_time: doc.create_time,
            update_time: doc.update_time,
        })
    }
}

/// Document CRUD and query operations.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a document with a generated id and return that id.
    async fn create(&self, collection: &str, fields: Fields) -> FirestoreResult<String>;

    /// Overwrite only the given fields; other fields are left untouched.
    async fn update(&self, collection: &str, id: &str, fields: Fields) -> FirestoreResult<()>;

    /// Delete a document. Deleting a missing document succeeds.
    async fn delete(&self, collection: &str, id: &str) -> FirestoreResult<()>;

    /// Read a document by its path relative to the database root.
    async fn get(&self, path: &str) -> FirestoreResult<Option<DocumentData>>;

    async fn run_query(&self, query: &Query) -> FirestoreResult<Vec<DocumentData>>;
}

#[async_trait]
impl DocumentStore for FirestoreClient {
    async fn create(&self, collection: &str, fields: Fields) -> FirestoreResult<String> {
        self.create_document(collection, fields).await
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> FirestoreResult<()> {
        self.update_document(collection, id, fields).await
    }

    async fn delete(&self, collection: &str, id: &str) -> FirestoreResult<()> {
        self.delete_document(collection, id).await
    }

    async fn get(&self, path: &str) -> FirestoreResult<Option<DocumentData>> {
        self.get_document_at(path).await
    }

    async fn run_query(&self, query: &Query) -> FirestoreResult<Vec<DocumentData>> {
        FirestoreClient::run_query(self, query).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::codec::NativeValue;
    use crate::types::Value;

    #[test]
    fn test_from_document_decodes_fields() {
        let doc = Document {
            name: Some("projects/p/databases/(default)/documents/alerts/a1".into()),
            fields: Some(HashMap::from([(
                "count".to_string(),
                Value::IntegerValue("3".into()),
            )])),
            create_time: Some("2025-01-01T00:00:00Z".into()),
            update_time: None,
        };

        let data = DocumentData::from_document(doc).unwrap();
        assert_eq!(data.id, "a1");
        assert_eq!(data.fields.get("count"), Some(&NativeValue::Integer(3)));
        assert_eq!(data.create_time.as_deref(), Some("2025-01-01T00:00:00Z"));
    }

    #[test]
    fn test_from_document_requires_name() {
        let doc = Document::new(HashMap::new());
        assert!(matches!(
            DocumentData::from_document(doc),
            Err(FirestoreError::InvalidResponse(_))
        ));
    }
}
