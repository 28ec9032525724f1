//! # nb-store-memory Implementation
//!
//! An in-process `DocumentStore`: one ordered map per collection behind a
//! single lock. Write batches are staged on copies of the touched
//! collections and swapped in only when every mutation succeeded.
//!
//! Read queries are counted per collection, which makes "this accessor did
//! not hit the store" observable from tests.

use async_trait::async_trait;
use dashmap::DashMap;
use nb_core::error::{AppError, Result};
use nb_core::query::{apply_update, document_id, matches, sort_documents, Document, Filter, Mutation, Query, WriteBatch};
use nb_core::traits::DocumentStore;
use nb_core::fields;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;

type Collection = BTreeMap<String, Document>;

#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, Collection>>,
    reads: DashMap<String, u64>,
    latency: Option<Duration>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every call, to exercise deadlines against a slow store.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of read queries issued against `collection` so far.
    pub fn read_count(&self, collection: &str) -> u64 {
        self.reads.get(collection).map_or(0, |count| *count)
    }

    pub fn total_reads(&self) -> u64 {
        self.reads.iter().map(|entry| *entry.value()).sum()
    }

    pub fn reset_read_counts(&self) {
        self.reads.clear();
    }

    async fn enter(&self, collection: &str) {
        *self.reads.entry(collection.to_string()).or_insert(0) += 1;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

/// The `_id` clause of a filter, if it has one.
fn id_clause(filter: &Filter) -> Option<&str> {
    filter
        .clauses
        .iter()
        .find(|(field, _)| field == fields::ID)
        .and_then(|(_, value)| value.as_str())
}

fn missing(collection: &str, id: impl ToString) -> AppError {
    AppError::NotFound(collection.to_string(), id.to_string())
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>> {
        self.enter(collection).await;
        let guard = self.collections.read().await;
        let Some(docs) = guard.get(collection) else {
            return Ok(None);
        };

        // Point lookup when the filter pins the id.
        if let Some(id) = id_clause(filter) {
            return Ok(docs.get(id).filter(|doc| matches(doc, filter)).cloned());
        }
        Ok(docs.values().find(|doc| matches(doc, filter)).cloned())
    }

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Document>> {
        self.enter(collection).await;
        let guard = self.collections.read().await;
        let Some(docs) = guard.get(collection) else {
            return Ok(Vec::new());
        };

        let mut found: Vec<Document> = docs
            .values()
            .filter(|doc| matches(doc, &query.filter))
            .cloned()
            .collect();
        sort_documents(&mut found, &query.sort);
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        self.enter(collection).await;
        let guard = self.collections.read().await;
        Ok(guard
            .get(collection)
            .map_or(0, |docs| docs.values().filter(|doc| matches(doc, filter)).count() as u64))
    }

    async fn apply(&self, batch: WriteBatch) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut guard = self.collections.write().await;

        // 1. Stage: copy each touched collection once, mutate the copies
        let mut staged: HashMap<String, Collection> = HashMap::new();
        for op in &batch.ops {
            let name = op.collection();
            let docs = staged
                .entry(name.to_string())
                .or_insert_with(|| guard.get(name).cloned().unwrap_or_default());

            match op {
                Mutation::Insert { collection, document } => {
                    let id = document_id(document)?.to_string();
                    if docs.contains_key(&id) {
                        return Err(AppError::Conflict(format!("{collection}/{id} already exists")));
                    }
                    docs.insert(id, document.clone());
                }
                Mutation::Delete { collection, id } => {
                    docs.remove(&id.to_string())
                        .ok_or_else(|| missing(collection, id))?;
                }
                Mutation::Expect { collection, id, field, value } => match docs.get_mut(&id.to_string()) {
                    Some(doc) => apply_update(doc, op)?,
                    None => {
                        return Err(AppError::Conflict(format!(
                            "{collection}/{id}: expected {field} = {value}, document is gone"
                        )))
                    }
                },
                Mutation::Set { collection, id, .. }
                | Mutation::Increment { collection, id, .. }
                | Mutation::AddToSet { collection, id, .. }
                | Mutation::Pull { collection, id, .. } => {
                    let doc = docs
                        .get_mut(&id.to_string())
                        .ok_or_else(|| missing(collection, id))?;
                    apply_update(doc, op)?;
                }
            }
        }

        // 2. Commit: every mutation succeeded
        let touched = staged.len();
        guard.extend(staged);
        tracing::trace!(ops = batch.ops.len(), touched, "memory batch committed");
        Ok(())
    }
}

/// Convenience for tests and seeding: the raw documents of a collection.
impl MemoryDocumentStore {
    pub async fn dump(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Overwrites one field directly, bypassing lifecycle flows. Used to
    /// simulate counter drift.
    pub async fn poke(&self, collection: &str, id: &str, field: &str, value: Value) -> bool {
        let mut guard = self.collections.write().await;
        match guard.get_mut(collection).and_then(|docs| docs.get_mut(id)) {
            Some(doc) => {
                doc.insert(field.to_string(), value);
                true
            }
            None => false,
        }
    }
}
