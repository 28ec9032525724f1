//! # Domain Models
//!
//! These structs represent the core entities of Nodeboard.
//! We use UUID v7 for time-ordered, globally unique identification, stored
//! under the `_id` document key. Every relationship is a reference by id and
//! is resolved on demand through `ForumStore` (see `relations`).

use chrono::{DateTime, SubsecRound, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Opaque, globally unique entity identifier.
pub type Id = Uuid;

/// The singleton `Status` record always lives under this id, so a second
/// bootstrap collides on insert instead of creating a duplicate.
pub const STATUS_ID: Id = Uuid::nil();

/// Generates a fresh identifier.
pub fn new_id() -> Id {
    Uuid::now_v7()
}

/// Current time truncated to the microsecond precision documents keep.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Logical collection names on the document store.
pub mod collections {
    pub const USERS: &str = "users";
    pub const NODES: &str = "nodes";
    pub const TOPICS: &str = "topics";
    pub const REPLIES: &str = "replies";
    pub const STATUS: &str = "status";
    pub const SITE_CATEGORIES: &str = "site_categories";
    pub const SITES: &str = "sites";
}

/// Document field names used in filters, sorts and write batches.
pub mod fields {
    pub const ID: &str = "_id";
    pub const USERNAME: &str = "username";
    pub const PASSWORD: &str = "password";
    pub const EMAIL: &str = "email";
    pub const WEBSITE: &str = "website";
    pub const LOCATION: &str = "location";
    pub const TAGLINE: &str = "tagline";
    pub const BIO: &str = "bio";
    pub const TWITTER: &str = "twitter";
    pub const WEIBO: &str = "weibo";
    pub const FOLLOW: &str = "follow";
    pub const FANS: &str = "fans";
    pub const IS_ACTIVE: &str = "is_active";
    pub const VALIDATE_CODE: &str = "validate_code";
    pub const RESET_CODE: &str = "reset_code";
    pub const INDEX: &str = "index";
    pub const SLUG: &str = "slug";
    pub const TOPIC_COUNT: &str = "topic_count";
    pub const NODE_ID: &str = "node_id";
    pub const USER_ID: &str = "user_id";
    pub const TOPIC_ID: &str = "topic_id";
    pub const CATEGORY_ID: &str = "category_id";
    pub const TITLE: &str = "title";
    pub const MARKDOWN: &str = "markdown";
    pub const HTML: &str = "html";
    pub const CREATED_AT: &str = "created_at";
    pub const REPLY_COUNT: &str = "reply_count";
    pub const LATEST_REPLY_ID: &str = "latest_reply_id";
    pub const LATEST_REPLIED_AT: &str = "latest_replied_at";
    pub const HITS: &str = "hits";
    pub const USER_COUNT: &str = "user_count";
    pub const USER_INDEX: &str = "user_index";
}

/// A record type persisted in its own collection.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: &'static str;
    /// Human-readable kind, used in `NotFound` errors and logs.
    const KIND: &'static str;

    fn id(&self) -> Id;
}

fn expose<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}

/// A registered forum member.
///
/// `password` holds a PHC hash string; `validate_code` and `reset_code` hold
/// SHA-256 digests of one-shot codes and are empty when unused. All three are
/// `SecretString` so `Debug` output redacts them; render `PublicProfile`
/// instead of `User`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: Id,
    pub username: String,
    #[serde(serialize_with = "expose")]
    pub password: SecretString,
    pub email: String,
    pub website: Option<String>,
    pub location: Option<String>,
    pub tagline: Option<String>,
    pub bio: Option<String>,
    pub twitter: Option<String>,
    pub weibo: Option<String>,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub joined_at: DateTime<Utc>,
    /// Usernames this user follows
    #[serde(default)]
    pub follow: Vec<String>,
    /// Usernames following this user
    #[serde(default)]
    pub fans: Vec<String>,
    pub is_superuser: bool,
    pub is_active: bool,
    #[serde(serialize_with = "expose", default = "empty_secret")]
    pub validate_code: SecretString,
    #[serde(serialize_with = "expose", default = "empty_secret")]
    pub reset_code: SecretString,
    /// Dense registration sequence number, taken from `Status::user_index`
    pub index: i64,
}

impl Entity for User {
    const COLLECTION: &'static str = collections::USERS;
    const KIND: &'static str = "User";

    fn id(&self) -> Id {
        self.id
    }
}

/// Render-safe projection of a `User`, without any secret field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicProfile {
    pub id: Id,
    pub username: String,
    pub website: Option<String>,
    pub location: Option<String>,
    pub tagline: Option<String>,
    pub bio: Option<String>,
    pub twitter: Option<String>,
    pub weibo: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub follow: Vec<String>,
    pub fans: Vec<String>,
    pub is_superuser: bool,
    pub index: i64,
}

/// A discussion category. `slug` is the unique URL key, distinct from `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "_id")]
    pub id: Id,
    pub slug: String,
    pub name: String,
    pub description: String,
    /// Denormalized count of topics referencing this node
    pub topic_count: i64,
}

impl Entity for Node {
    const COLLECTION: &'static str = collections::NODES;
    const KIND: &'static str = "Node";

    fn id(&self) -> Id {
        self.id
    }
}

/// A thread. `html` is the rendered cache of `markdown` and is only ever
/// regenerated by the lifecycle operations that change `markdown`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    #[serde(rename = "_id")]
    pub id: Id,
    pub node_id: Id,
    pub user_id: Id,
    pub title: String,
    pub markdown: String,
    pub html: String,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
    pub reply_count: i64,
    /// String form of the newest Reply id, empty when there are no replies
    #[serde(default)]
    pub latest_reply_id: String,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub latest_replied_at: DateTime<Utc>,
    pub hits: i64,
}

impl Entity for Topic {
    const COLLECTION: &'static str = collections::TOPICS;
    const KIND: &'static str = "Topic";

    fn id(&self) -> Id {
        self.id
    }
}

/// A post within a topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    #[serde(rename = "_id")]
    pub id: Id,
    pub user_id: Id,
    pub topic_id: Id,
    pub markdown: String,
    pub html: String,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
    /// Memo of the parent topic; `None` inside means "looked up, absent".
    #[serde(skip)]
    pub(crate) topic: OnceCell<Option<Topic>>,
}

impl Reply {
    pub fn new(
        user_id: Id,
        topic_id: Id,
        markdown: impl Into<String>,
        html: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id(),
            user_id,
            topic_id,
            markdown: markdown.into(),
            html: html.into(),
            created_at,
            topic: OnceCell::new(),
        }
    }
}

impl Entity for Reply {
    const COLLECTION: &'static str = collections::REPLIES;
    const KIND: &'static str = "Reply";

    fn id(&self) -> Id {
        self.id
    }
}

/// Global aggregate counters. Exactly one instance exists, under `STATUS_ID`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    #[serde(rename = "_id")]
    pub id: Id,
    pub user_count: i64,
    pub topic_count: i64,
    pub reply_count: i64,
    /// Next value to hand out as `User::index`
    pub user_index: i64,
}

impl Entity for Status {
    const COLLECTION: &'static str = collections::STATUS;
    const KIND: &'static str = "Status";

    fn id(&self) -> Id {
        self.id
    }
}

/// Site directory category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteCategory {
    #[serde(rename = "_id")]
    pub id: Id,
    pub name: String,
}

impl Entity for SiteCategory {
    const COLLECTION: &'static str = collections::SITE_CATEGORIES;
    const KIND: &'static str = "SiteCategory";

    fn id(&self) -> Id {
        self.id
    }
}

/// An external link listed in the site directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    #[serde(rename = "_id")]
    pub id: Id,
    pub name: String,
    pub url: String,
    pub description: String,
    pub category_id: Id,
    /// Submitter
    pub user_id: Id,
}

impl Entity for Site {
    const COLLECTION: &'static str = collections::SITES;
    const KIND: &'static str = "Site";

    fn id(&self) -> Id {
        self.id
    }
}
