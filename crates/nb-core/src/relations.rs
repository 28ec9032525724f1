//! # Relationship Accessors
//!
//! Each accessor resolves one reference against the store handle and issues
//! at most one query. Absence is `Ok(None)` or an empty `Vec`; only store
//! failures (timeout, unavailable, corrupt document) surface as errors, so a
//! page can render "deleted user" without breaking.

use crate::error::Result;
use crate::models::{fields, Id, Node, PublicProfile, Reply, Site, SiteCategory, Topic, User};
use crate::query::{Filter, Query};
use crate::store::{ForumStore, LATEST_LIMIT};
use tracing::debug;

fn latest_by_author(user_id: Id) -> Query {
    Query::new(Filter::new().eq_id(fields::USER_ID, user_id))
        .desc(fields::CREATED_AT)
        .desc(fields::ID)
        .limit(LATEST_LIMIT)
}

impl User {
    /// The user's 10 newest topics, newest first (ties: id descending).
    pub async fn latest_topics(&self, store: &ForumStore) -> Result<Vec<Topic>> {
        store.find(latest_by_author(self.id)).await
    }

    /// The user's 10 newest replies, newest first (ties: id descending).
    pub async fn latest_replies(&self, store: &ForumStore) -> Result<Vec<Reply>> {
        store.find(latest_by_author(self.id)).await
    }

    /// Whether `name` is among this user's fans.
    pub fn is_followed_by(&self, name: &str) -> bool {
        self.fans.iter().any(|fan| fan == name)
    }

    /// Whether this user follows `name`.
    pub fn is_following(&self, name: &str) -> bool {
        self.follow.iter().any(|followed| followed == name)
    }

    pub fn public_profile(&self) -> PublicProfile {
        PublicProfile {
            id: self.id,
            username: self.username.clone(),
            website: self.website.clone(),
            location: self.location.clone(),
            tagline: self.tagline.clone(),
            bio: self.bio.clone(),
            twitter: self.twitter.clone(),
            weibo: self.weibo.clone(),
            joined_at: self.joined_at,
            follow: self.follow.clone(),
            fans: self.fans.clone(),
            is_superuser: self.is_superuser,
            index: self.index,
        }
    }
}

impl Topic {
    pub async fn node(&self, store: &ForumStore) -> Result<Option<Node>> {
        store.get(self.node_id).await
    }

    /// Author of the topic.
    pub async fn user(&self, store: &ForumStore) -> Result<Option<User>> {
        store.get(self.user_id).await
    }

    /// The reply `latest_reply_id` points at.
    ///
    /// An empty pointer returns `None` without touching the store. A pointer
    /// that doesn't parse, or that dangles, also yields `None`.
    pub async fn latest_reply(&self, store: &ForumStore) -> Result<Option<Reply>> {
        if self.latest_reply_id.is_empty() {
            return Ok(None);
        }

        let reply_id = match Id::parse_str(&self.latest_reply_id) {
            Ok(id) => id,
            Err(err) => {
                debug!(topic = %self.id, pointer = %self.latest_reply_id, %err, "unparseable latest_reply_id");
                return Ok(None);
            }
        };

        match store.get::<Reply>(reply_id).await? {
            Some(reply) if reply.topic_id == self.id => Ok(Some(reply)),
            Some(_) => {
                debug!(topic = %self.id, reply = %reply_id, "latest_reply_id points into another topic");
                Ok(None)
            }
            None => {
                debug!(topic = %self.id, reply = %reply_id, "dangling latest_reply_id");
                Ok(None)
            }
        }
    }

    /// All replies, oldest first (ties: id ascending).
    pub async fn replies(&self, store: &ForumStore) -> Result<Vec<Reply>> {
        store
            .find(
                Query::new(Filter::new().eq_id(fields::TOPIC_ID, self.id))
                    .asc(fields::CREATED_AT)
                    .asc(fields::ID),
            )
            .await
    }
}

impl Reply {
    /// Author of the reply.
    pub async fn user(&self, store: &ForumStore) -> Result<Option<User>> {
        store.get(self.user_id).await
    }

    /// Parent topic, fetched on first call and memoized on this instance.
    ///
    /// A missing topic is memoized too. A failed fetch is not, so the next
    /// call retries.
    pub async fn topic(&self, store: &ForumStore) -> Result<Option<&Topic>> {
        let topic = self
            .topic
            .get_or_try_init(|| store.get::<Topic>(self.topic_id))
            .await?;
        Ok(topic.as_ref())
    }
}

impl SiteCategory {
    pub async fn sites(&self, store: &ForumStore) -> Result<Vec<Site>> {
        store
            .find(Query::new(Filter::new().eq_id(fields::CATEGORY_ID, self.id)).asc(fields::ID))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::{new_id, now};
    use crate::query::to_document;
    use crate::traits::MockDocumentStore;
    use secrecy::SecretString;
    use std::sync::Arc;

    fn user(follow: &[&str], fans: &[&str]) -> User {
        User {
            id: new_id(),
            username: "alice".into(),
            password: SecretString::from("hash".to_string()),
            email: "alice@example.com".into(),
            website: None,
            location: None,
            tagline: None,
            bio: None,
            twitter: None,
            weibo: None,
            joined_at: now(),
            follow: follow.iter().map(|s| s.to_string()).collect(),
            fans: fans.iter().map(|s| s.to_string()).collect(),
            is_superuser: false,
            is_active: true,
            validate_code: SecretString::from(String::new()),
            reset_code: SecretString::from(String::new()),
            index: 1,
        }
    }

    fn topic(latest_reply_id: String) -> Topic {
        let at = now();
        Topic {
            id: new_id(),
            node_id: new_id(),
            user_id: new_id(),
            title: "T1".into(),
            markdown: "body".into(),
            html: "<p>body</p>".into(),
            created_at: at,
            reply_count: 0,
            latest_reply_id,
            latest_replied_at: at,
            hits: 0,
        }
    }

    #[test]
    fn test_membership_checks() {
        let u = user(&["carol"], &["bob", "dave"]);
        assert!(u.is_followed_by("bob"));
        assert!(u.is_followed_by("dave"));
        assert!(!u.is_followed_by("carol"));
        // `is_following` was `IsFans`; it answers "does this user follow name".
        assert!(u.is_following("carol"));
        assert!(!u.is_following("bob"));
    }

    #[test]
    fn test_public_profile_has_no_secrets() {
        let u = user(&[], &[]);
        let json = serde_json::to_value(u.public_profile()).unwrap();
        let object = json.as_object().unwrap();
        assert!(!object.contains_key("password"));
        assert!(!object.contains_key("validate_code"));
        assert!(!object.contains_key("reset_code"));
        assert!(!format!("{u:?}").contains("\"hash\""));
    }

    #[tokio::test]
    async fn test_empty_latest_reply_id_skips_store() {
        let mut mock = MockDocumentStore::new();
        mock.expect_find_one().times(0);
        let store = ForumStore::new(Arc::new(mock));

        let t = topic(String::new());
        assert!(t.latest_reply(&store).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_latest_reply_id_degrades_to_none() {
        let mut mock = MockDocumentStore::new();
        mock.expect_find_one().times(0);
        let store = ForumStore::new(Arc::new(mock));

        let t = topic("not-an-id".into());
        assert!(t.latest_reply(&store).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dangling_latest_reply_id_degrades_to_none() {
        let mut mock = MockDocumentStore::new();
        mock.expect_find_one().times(1).returning(|_, _| Ok(None));
        let store = ForumStore::new(Arc::new(mock));

        let t = topic(new_id().to_string());
        assert!(t.latest_reply(&store).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_reply_propagates_store_failure() {
        let mut mock = MockDocumentStore::new();
        mock.expect_find_one()
            .returning(|_, _| Err(AppError::Unavailable("connection reset".into())));
        let store = ForumStore::new(Arc::new(mock));

        let t = topic(new_id().to_string());
        let result = t.latest_reply(&store).await;
        assert!(matches!(result, Err(AppError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_reply_topic_is_fetched_once() {
        let parent = topic(String::new());
        let document = to_document(&parent).unwrap();

        let mut mock = MockDocumentStore::new();
        mock.expect_find_one()
            .times(1)
            .returning(move |_, _| Ok(Some(document.clone())));
        let store = ForumStore::new(Arc::new(mock));

        let reply = Reply::new(new_id(), parent.id, "hi", "<p>hi</p>", now());
        let first = reply.topic(&store).await.unwrap().cloned();
        let second = reply.topic(&store).await.unwrap().cloned();
        assert_eq!(first.as_ref(), Some(&parent));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_reply_topic_absence_is_memoized() {
        let mut mock = MockDocumentStore::new();
        mock.expect_find_one().times(1).returning(|_, _| Ok(None));
        let store = ForumStore::new(Arc::new(mock));

        let reply = Reply::new(new_id(), new_id(), "hi", "<p>hi</p>", now());
        assert!(reply.topic(&store).await.unwrap().is_none());
        assert!(reply.topic(&store).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reply_topic_failure_is_not_memoized() {
        let parent = topic(String::new());
        let document = to_document(&parent).unwrap();

        let mut mock = MockDocumentStore::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_find_one()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(AppError::Unavailable("down".into())));
        mock.expect_find_one()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_, _| Ok(Some(document.clone())));
        let store = ForumStore::new(Arc::new(mock));

        let reply = Reply::new(new_id(), parent.id, "hi", "<p>hi</p>", now());
        assert!(reply.topic(&store).await.is_err());
        assert_eq!(reply.topic(&store).await.unwrap(), Some(&parent));
    }

    #[tokio::test]
    async fn test_latest_topics_query_shape() {
        let u = user(&[], &[]);
        let author = u.id;
        let mut mock = MockDocumentStore::new();
        mock.expect_find()
            .times(1)
            .returning(move |collection, query| {
                assert_eq!(collection, "topics");
                assert_eq!(query.limit, Some(10));
                assert_eq!(query.filter, Filter::new().eq_id("user_id", author));
                assert_eq!(query.sort, Query::all().desc("created_at").desc("_id").sort);
                Ok(Vec::new())
            });
        let store = ForumStore::new(Arc::new(mock));

        assert!(u.latest_topics(&store).await.unwrap().is_empty());
    }
}
