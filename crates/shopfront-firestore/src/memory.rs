//! In-memory [`DocumentStore`] for tests and local runs.
//!
//! Mirrors the remote semantics the security services rely on: partial
//! updates touch only the named fields (creating the document when absent),
//! deletes of missing documents succeed, point reads of missing documents
//! return `None`, and queries filter, order and limit like Firestore does
//! (documents lacking a filtered or ordered field never match).

use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::codec::{Fields, NativeValue};
use crate::error::FirestoreResult;
use crate::query::{Condition, Direction, FieldOp, Query};
use crate::store::{DocumentData, DocumentStore};

type Collection = BTreeMap<String, DocumentData>;

/// Collections keyed by their full path, documents keyed by id.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently stored in a collection.
    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(normalize(collection))
            .map_or(0, BTreeMap::len)
    }

    pub async fn is_empty(&self, collection: &str) -> bool {
        self.len(collection).await == 0
    }

    /// Insert a document under a known id, replacing any previous version.
    pub async fn insert(&self, collection: &str, id: &str, fields: Fields) {
        let now = timestamp_now();
        let mut doc = DocumentData::new(id, fields);
        doc.create_time = Some(now.clone());
        doc.update_time = Some(now);

        self.collections
            .write()
            .await
            .entry(normalize(collection).to_string())
            .or_default()
            .insert(id.to_string(), doc);
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create(&self, collection: &str, fields: Fields) -> FirestoreResult<String> {
        let id = Uuid::new_v4().simple().to_string();
        self.insert(collection, &id, fields).await;
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> FirestoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let now = timestamp_now();
        let mut collections = self.collections.write().await;
        let doc = collections
            .entry(normalize(collection).to_string())
            .or_default()
            .entry(id.to_string())
            .or_insert_with(|| {
                let mut doc = DocumentData::new(id, Fields::new());
                doc.create_time = Some(now.clone());
                doc
            });

        doc.fields.extend(fields);
        doc.update_time = Some(now);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> FirestoreResult<()> {
        if let Some(docs) = self.collections.write().await.get_mut(normalize(collection)) {
            docs.remove(id);
        }
        Ok(())
    }

    async fn get(&self, path: &str) -> FirestoreResult<Option<DocumentData>> {
        let path = normalize(path);
        let Some((collection, id)) = path.rsplit_once('/') else {
            return Ok(None);
        };

        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn run_query(&self, query: &Query) -> FirestoreResult<Vec<DocumentData>> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(normalize(query.collection())) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<DocumentData> = docs
            .values()
            .filter(|doc| query.filters().iter().all(|c| matches(&doc.fields, c)))
            .filter(|doc| {
                query
                    .ordering()
                    .iter()
                    .all(|(field, _)| doc.fields.contains_key(field))
            })
            .cloned()
            .collect();

        if !query.ordering().is_empty() {
            matched.sort_by(|a, b| {
                for (field, direction) in query.ordering() {
                    let ord = compare(&a.fields[field], &b.fields[field]).unwrap_or(Ordering::Equal);
                    let ord = match direction {
                        Direction::Ascending => ord,
                        Direction::Descending => ord.reverse(),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.id.cmp(&b.id)
            });
        }

        if let Some(limit) = query.limit_value() {
            matched.truncate(limit as usize);
        }

        Ok(matched)
    }
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn matches(fields: &Fields, condition: &Condition) -> bool {
    let Some(actual) = fields.get(&condition.field) else {
        return false;
    };

    match condition.op {
        FieldOp::Equal => equals(actual, &condition.value),
        FieldOp::NotEqual => !equals(actual, &condition.value),
        FieldOp::LessThan => compare(actual, &condition.value) == Some(Ordering::Less),
        FieldOp::LessThanOrEqual => matches!(
            compare(actual, &condition.value),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FieldOp::GreaterThan => compare(actual, &condition.value) == Some(Ordering::Greater),
        FieldOp::GreaterThanOrEqual => matches!(
            compare(actual, &condition.value),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FieldOp::In => match &condition.value {
            NativeValue::Array(candidates) => candidates.iter().any(|c| equals(actual, c)),
            _ => false,
        },
    }
}

fn equals(a: &NativeValue, b: &NativeValue) -> bool {
    compare(a, b).map_or(a == b, |ord| ord == Ordering::Equal)
}

/// Ordering between two values of comparable types. Integers and doubles
/// compare numerically; values of unrelated types are incomparable.
fn compare(a: &NativeValue, b: &NativeValue) -> Option<Ordering> {
    use NativeValue::*;

    match (a, b) {
        (Null, Null) => Some(Ordering::Equal),
        (Bool(x), Bool(y)) => Some(x.cmp(y)),
        (Integer(x), Integer(y)) => Some(x.cmp(y)),
        (Integer(x), Double(y)) => (*x as f64).partial_cmp(y),
        (Double(x), Integer(y)) => x.partial_cmp(&(*y as f64)),
        (Double(x), Double(y)) => x.partial_cmp(y),
        (String(x), String(y)) => Some(x.cmp(y)),
        (Timestamp(x), Timestamp(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
