//! # ForumStore
//!
//! The store handle handed to every accessor and lifecycle operation. It is
//! built once at startup around a `DocumentStore` plugin and cloned into each
//! request; there is no process-global connection.
//!
//! Every call is bounded by a deadline: the request's own (see
//! `with_deadline`) or, failing that, `now + query_timeout`.

use crate::error::{AppError, Result};
use crate::models::{fields, Entity, Id, Node, SiteCategory, Status, Topic, User, STATUS_ID};
use crate::query::{from_document, Filter, Query, WriteBatch};
use crate::traits::DocumentStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Cap used by the "latest N" accessors.
pub const LATEST_LIMIT: usize = 10;

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct ForumStore {
    backend: Arc<dyn DocumentStore>,
    query_timeout: Duration,
    deadline: Option<Instant>,
}

impl ForumStore {
    pub fn new(backend: Arc<dyn DocumentStore>) -> Self {
        Self {
            backend,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            deadline: None,
        }
    }

    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    /// A request-scoped handle whose calls all fail with `AppError::Timeout`
    /// once `deadline` passes. An earlier existing deadline is kept.
    pub fn with_deadline(&self, deadline: impl Into<Instant>) -> Self {
        let deadline = deadline.into();
        let mut scoped = self.clone();
        scoped.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        scoped
    }

    pub fn backend(&self) -> &Arc<dyn DocumentStore> {
        &self.backend
    }

    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let deadline = self
            .deadline
            .unwrap_or_else(|| Instant::now() + self.query_timeout);
        // Don't start work the caller has already given up on.
        if Instant::now() >= deadline {
            return Err(AppError::Timeout);
        }
        tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| AppError::Timeout)?
    }

    pub async fn get<E: Entity>(&self, id: Id) -> Result<Option<E>> {
        self.find_one(Filter::by_id(id)).await
    }

    /// Like `get`, but absence is an error. For mutation paths only.
    pub async fn require<E: Entity>(&self, id: Id) -> Result<E> {
        self.get(id)
            .await?
            .ok_or_else(|| AppError::not_found(E::KIND, id))
    }

    pub async fn find_one<E: Entity>(&self, filter: Filter) -> Result<Option<E>> {
        let document = self
            .bounded(self.backend.find_one(E::COLLECTION, &filter))
            .await?;
        document.map(from_document).transpose()
    }

    pub async fn find<E: Entity>(&self, query: Query) -> Result<Vec<E>> {
        self.bounded(self.backend.find(E::COLLECTION, &query))
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }

    pub async fn count<E: Entity>(&self, filter: Filter) -> Result<u64> {
        self.bounded(self.backend.count(E::COLLECTION, &filter))
            .await
    }

    pub async fn apply(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.bounded(self.backend.apply(batch)).await
    }

    pub async fn user_by_name(&self, username: &str) -> Result<Option<User>> {
        self.find_one(Filter::new().eq(fields::USERNAME, username))
            .await
    }

    pub async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find_one(Filter::new().eq(fields::EMAIL, email)).await
    }

    pub async fn node_by_slug(&self, slug: &str) -> Result<Option<Node>> {
        self.find_one(Filter::new().eq(fields::SLUG, slug)).await
    }

    pub async fn nodes(&self) -> Result<Vec<Node>> {
        self.find(Query::all().asc(fields::SLUG)).await
    }

    pub async fn status(&self) -> Result<Option<Status>> {
        self.get(STATUS_ID).await
    }

    /// Most recently active topics, across all nodes.
    pub async fn recent_topics(&self, limit: usize) -> Result<Vec<Topic>> {
        self.find(
            Query::all()
                .desc(fields::LATEST_REPLIED_AT)
                .desc(fields::ID)
                .limit(limit),
        )
        .await
    }

    /// Most recently active topics of one node.
    pub async fn node_topics(&self, node_id: Id, limit: usize) -> Result<Vec<Topic>> {
        self.find(
            Query::new(Filter::new().eq_id(fields::NODE_ID, node_id))
                .desc(fields::LATEST_REPLIED_AT)
                .desc(fields::ID)
                .limit(limit),
        )
        .await
    }

    pub async fn site_categories(&self) -> Result<Vec<SiteCategory>> {
        self.find(Query::all().asc(fields::ID)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MockDocumentStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_decodes_document() {
        let id = crate::models::new_id();
        let mut mock = MockDocumentStore::new();
        mock.expect_find_one()
            .times(1)
            .returning(move |collection, filter| {
                assert_eq!(collection, "nodes");
                assert_eq!(filter, &Filter::by_id(id));
                Ok(json!({
                    "_id": id.to_string(),
                    "slug": "go",
                    "name": "Go",
                    "description": "",
                    "topic_count": 0
                })
                .as_object()
                .cloned())
            });

        let store = ForumStore::new(Arc::new(mock));
        let node: Node = store.get(id).await.unwrap().unwrap();
        assert_eq!(node.slug, "go");
    }

    #[tokio::test]
    async fn test_malformed_document_is_corrupt() {
        let mut mock = MockDocumentStore::new();
        mock.expect_find_one()
            .returning(|_, _| Ok(json!({ "_id": "nope" }).as_object().cloned()));

        let store = ForumStore::new(Arc::new(mock));
        let result = store.get::<Node>(crate::models::new_id()).await;
        assert!(matches!(result, Err(AppError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_elapsed_deadline_is_timeout() {
        let mut mock = MockDocumentStore::new();
        mock.expect_find_one().returning(|_, _| Ok(None));

        let store = ForumStore::new(Arc::new(mock)).with_deadline(Instant::now());
        tokio::time::sleep(Duration::from_millis(5)).await;
        let result = store.get::<Node>(crate::models::new_id()).await;
        assert!(matches!(result, Err(AppError::Timeout)));
    }

    #[tokio::test]
    async fn test_with_deadline_keeps_earlier_deadline() {
        let store = ForumStore::new(Arc::new(MockDocumentStore::new()));
        let early = Instant::now() + Duration::from_millis(10);
        let late = early + Duration::from_secs(60);
        let scoped = store.with_deadline(early).with_deadline(late);
        assert_eq!(scoped.deadline, Some(early));
    }

    #[tokio::test]
    async fn test_empty_batch_skips_store() {
        let mut mock = MockDocumentStore::new();
        mock.expect_apply().times(0);
        let store = ForumStore::new(Arc::new(mock));
        store.apply(WriteBatch::new()).await.unwrap();
    }
}
