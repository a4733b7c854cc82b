//! Volatile key/value document store.
//!
//! In-memory collaborator standing in for a document database: JSON
//! documents grouped into named collections, matched by subset equality.
//! Nothing survives a restart; durability is explicitly out of scope.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-lifetime document store with predicate operations.
#[derive(Default)]
pub struct VolatileStore {
    collections: RwLock<HashMap<String, Vec<Value>>>,
}

impl VolatileStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a document to a collection, creating the collection on first use.
    pub async fn insert(&self, collection: &str, doc: Value) {
        let mut guard = self.collections.write().await;
        guard.entry(collection.to_string()).or_default().push(doc);
    }

    /// Returns the first document matching the filter.
    pub async fn find_one(&self, collection: &str, filter: &Value) -> Option<Value> {
        let guard = self.collections.read().await;
        guard
            .get(collection)?
            .iter()
            .find(|doc| matches(doc, filter))
            .cloned()
    }

    /// Returns all documents matching the filter, in insertion order.
    pub async fn find_all(&self, collection: &str, filter: &Value) -> Vec<Value> {
        let guard = self.collections.read().await;
        guard
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| matches(doc, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Merges `patch` into every matching document. Returns the match count.
    pub async fn update_where(&self, collection: &str, filter: &Value, patch: &Value) -> usize {
        let mut guard = self.collections.write().await;
        let Some(docs) = guard.get_mut(collection) else {
            return 0;
        };
        let mut updated = 0;
        for doc in docs.iter_mut().filter(|doc| matches(doc, filter)) {
            merge(doc, patch);
            updated += 1;
        }
        updated
    }

    /// Removes every matching document. Returns the removal count.
    pub async fn delete_where(&self, collection: &str, filter: &Value) -> usize {
        let mut guard = self.collections.write().await;
        let Some(docs) = guard.get_mut(collection) else {
            return 0;
        };
        let before = docs.len();
        docs.retain(|doc| !matches(doc, filter));
        before - docs.len()
    }
}

/// Subset-equality match: every key in `filter` must be present in `doc`
/// with an equal value. An empty filter matches everything.
fn matches(doc: &Value, filter: &Value) -> bool {
    match filter.as_object() {
        Some(fields) => fields
            .iter()
            .all(|(key, expected)| doc.get(key) == Some(expected)),
        None => false,
    }
}

fn merge(doc: &mut Value, patch: &Value) {
    if let (Some(doc), Some(patch)) = (doc.as_object_mut(), patch.as_object()) {
        for (key, value) in patch {
            doc.insert(key.clone(), value.clone());
        }
    }
}
