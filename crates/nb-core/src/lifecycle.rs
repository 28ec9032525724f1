//! # Lifecycle Operations
//!
//! Every flow that creates, changes or removes records lives here, so the
//! denormalized state (`Node::topic_count`, `Topic::reply_count`,
//! `Topic::latest_reply_id`, `Status`) is only ever touched in one place.
//!
//! # Developer Note
//! Each flow writes the child record and its counter adjustments in a single
//! `WriteBatch`. Flows that depend on a value they just read (the next user
//! index, the current latest reply) add an `Expect` precondition for it and
//! retry on `Conflict`, up to `MAX_BATCH_RETRIES` attempts.

use crate::error::{AppError, Result};
use crate::models::{
    collections, fields, new_id, now, Entity, Id, Node, Reply, Site, SiteCategory, Status, Topic,
    User, STATUS_ID,
};
use crate::query::{timestamp_value, Filter, Query, WriteBatch};
use crate::store::ForumStore;
use crate::traits::{CredentialProvider, MarkupRenderer};
use chrono::{DateTime, SubsecRound, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{debug, info, warn};

pub const MAX_BATCH_RETRIES: usize = 3;

/// Applies the batch built by `build`, rebuilding and retrying on `Conflict`.
async fn apply_with_retry<F, Fut>(store: &ForumStore, what: &str, mut build: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<WriteBatch>>,
{
    let mut last = None;
    for attempt in 1..=MAX_BATCH_RETRIES {
        let batch = build().await?;
        match store.apply(batch).await {
            Ok(()) => return Ok(()),
            Err(AppError::Conflict(reason)) => {
                debug!(what, attempt, %reason, "write batch precondition failed, retrying");
                last = Some(reason);
            }
            Err(err) => return Err(err),
        }
    }
    Err(AppError::Conflict(format!(
        "{what}: gave up after {MAX_BATCH_RETRIES} attempts ({})",
        last.unwrap_or_default()
    )))
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::ValidationError(format!("{field} must not be empty")));
    }
    Ok(())
}

fn is_slug(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'))
}

// ── Status ──────────────────────────────────────────────────────────────────

/// Creates the singleton `Status` record if it is missing. Idempotent.
pub async fn bootstrap_status(store: &ForumStore) -> Result<Status> {
    if let Some(status) = store.status().await? {
        return Ok(status);
    }

    let status = Status {
        id: STATUS_ID,
        user_count: 0,
        topic_count: 0,
        reply_count: 0,
        user_index: 1,
    };
    match store.apply(WriteBatch::new().insert(&status)?).await {
        Ok(()) => {
            info!("status record created");
            Ok(status)
        }
        // Lost the race against another bootstrap.
        Err(AppError::Conflict(_)) => store.require(STATUS_ID).await,
        Err(err) => Err(err),
    }
}

// ── Users ───────────────────────────────────────────────────────────────────

pub struct NewUser {
    pub username: String,
    pub password: SecretString,
    pub email: String,
}

/// A created account plus the activation code to deliver to its owner.
#[derive(Debug)]
pub struct Registration {
    pub user: User,
    pub validate_code: String,
}

/// Registers an inactive user, assigning the next `index` and bumping
/// `Status::user_count` in the same batch.
pub async fn register_user(
    store: &ForumStore,
    credentials: &dyn CredentialProvider,
    new: NewUser,
) -> Result<Registration> {
    require_text("username", &new.username)?;
    require_text("password", new.password.expose_secret())?;
    require_text("email", &new.email)?;
    if new.username.chars().any(char::is_whitespace) {
        return Err(AppError::ValidationError("username must not contain whitespace".into()));
    }
    if store.user_by_name(&new.username).await?.is_some() {
        return Err(AppError::Conflict(format!("username {} is taken", new.username)));
    }
    if store.user_by_email(&new.email).await?.is_some() {
        return Err(AppError::Conflict(format!("email {} is already registered", new.email)));
    }

    let password_hash = credentials.hash_password(new.password.expose_secret())?;
    let code = credentials.issue_code()?;
    let user = User {
        id: new_id(),
        username: new.username,
        password: SecretString::from(password_hash),
        email: new.email,
        website: None,
        location: None,
        tagline: None,
        bio: None,
        twitter: None,
        weibo: None,
        joined_at: now(),
        follow: Vec::new(),
        fans: Vec::new(),
        is_superuser: false,
        is_active: false,
        validate_code: SecretString::from(code.digest.clone()),
        reset_code: SecretString::from(String::new()),
        index: 0,
    };

    // Index assigned by the attempt that committed.
    let assigned = AtomicI64::new(0);
    let (pending, slot) = (&user, &assigned);
    apply_with_retry(store, "register_user", move || async move {
        let status: Status = store.require(STATUS_ID).await?;
        slot.store(status.user_index, Ordering::Relaxed);
        let candidate = User {
            index: status.user_index,
            ..pending.clone()
        };
        Ok(WriteBatch::new()
            .expect(collections::STATUS, STATUS_ID, fields::USER_INDEX, status.user_index)
            .insert(&candidate)?
            .increment(collections::STATUS, STATUS_ID, fields::USER_INDEX, 1)
            .increment(collections::STATUS, STATUS_ID, fields::USER_COUNT, 1))
    })
    .await?;
    let user = User {
        index: assigned.into_inner(),
        ..user
    };

    info!(user = %user.id, username = %user.username, index = user.index, "user registered");
    Ok(Registration {
        user,
        validate_code: code.code,
    })
}

/// Activates a user with the code issued at registration. The code is
/// consumed; activating an active account is a no-op.
pub async fn activate_user(
    store: &ForumStore,
    credentials: &dyn CredentialProvider,
    username: &str,
    code: &str,
) -> Result<User> {
    let user = store
        .user_by_name(username)
        .await?
        .ok_or_else(|| AppError::not_found(User::KIND, username))?;
    if user.is_active {
        return Ok(user);
    }

    let stored = user.validate_code.expose_secret();
    if stored.is_empty() || credentials.digest_code(code) != stored {
        return Err(AppError::Unauthorized("invalid activation code".into()));
    }

    store
        .apply(
            WriteBatch::new()
                .expect(collections::USERS, user.id, fields::VALIDATE_CODE, stored)
                .set(collections::USERS, user.id, fields::IS_ACTIVE, true)
                .set(collections::USERS, user.id, fields::VALIDATE_CODE, ""),
        )
        .await?;
    info!(user = %user.id, "user activated");
    store.require(user.id).await
}

/// A reset code to deliver to the account's owner.
#[derive(Debug)]
pub struct PasswordReset {
    pub username: String,
    pub reset_code: String,
}

/// Issues a reset code for the account registered under `email`.
/// Unknown addresses yield `Ok(None)`.
pub async fn request_password_reset(
    store: &ForumStore,
    credentials: &dyn CredentialProvider,
    email: &str,
) -> Result<Option<PasswordReset>> {
    let Some(user) = store.user_by_email(email).await? else {
        return Ok(None);
    };

    let code = credentials.issue_code()?;
    store
        .apply(WriteBatch::new().set(collections::USERS, user.id, fields::RESET_CODE, code.digest))
        .await?;
    info!(user = %user.id, "password reset requested");
    Ok(Some(PasswordReset {
        username: user.username,
        reset_code: code.code,
    }))
}

/// Replaces the password if `code` matches the outstanding reset code, and
/// consumes the code.
pub async fn reset_password(
    store: &ForumStore,
    credentials: &dyn CredentialProvider,
    username: &str,
    code: &str,
    new_password: &SecretString,
) -> Result<()> {
    require_text("password", new_password.expose_secret())?;
    let user = store
        .user_by_name(username)
        .await?
        .ok_or_else(|| AppError::not_found(User::KIND, username))?;

    let stored = user.reset_code.expose_secret();
    if stored.is_empty() || credentials.digest_code(code) != stored {
        return Err(AppError::Unauthorized("invalid reset code".into()));
    }

    let hash = credentials.hash_password(new_password.expose_secret())?;
    store
        .apply(
            WriteBatch::new()
                .expect(collections::USERS, user.id, fields::RESET_CODE, stored)
                .set(collections::USERS, user.id, fields::PASSWORD, hash)
                .set(collections::USERS, user.id, fields::RESET_CODE, ""),
        )
        .await?;
    info!(user = %user.id, "password reset");
    Ok(())
}

/// Checks a login attempt. Unknown users, wrong passwords and inactive
/// accounts are all `Unauthorized`.
pub async fn verify_login(
    store: &ForumStore,
    credentials: &dyn CredentialProvider,
    username: &str,
    password: &SecretString,
) -> Result<User> {
    let user = store
        .user_by_name(username)
        .await?
        .filter(|user| credentials.verify_password(password.expose_secret(), user.password.expose_secret()))
        .ok_or_else(|| AppError::Unauthorized("wrong username or password".into()))?;
    if !user.is_active {
        return Err(AppError::Unauthorized("account is not activated".into()));
    }
    Ok(user)
}

/// Optional profile fields; `None` leaves the field unchanged.
#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub website: Option<String>,
    pub location: Option<String>,
    pub tagline: Option<String>,
    pub bio: Option<String>,
    pub twitter: Option<String>,
    pub weibo: Option<String>,
}

pub async fn update_profile(store: &ForumStore, user_id: Id, update: ProfileUpdate) -> Result<User> {
    let user: User = store.require(user_id).await?;
    let mut batch = WriteBatch::new();
    for (field, value) in [
        (fields::WEBSITE, update.website),
        (fields::LOCATION, update.location),
        (fields::TAGLINE, update.tagline),
        (fields::BIO, update.bio),
        (fields::TWITTER, update.twitter),
        (fields::WEIBO, update.weibo),
    ] {
        if let Some(value) = value {
            // An empty string clears the field.
            let value = if value.is_empty() { Value::Null } else { Value::from(value) };
            batch = batch.set(collections::USERS, user.id, field, value);
        }
    }
    store.apply(batch).await?;
    store.require(user.id).await
}

/// `follower` starts following `followee`. Both sides (`follow` and `fans`)
/// are written in one batch. Returns `false` if already following.
pub async fn follow(store: &ForumStore, follower: &str, followee: &str) -> Result<bool> {
    let (from, to) = follow_pair(store, follower, followee).await?;
    if from.is_following(&to.username) && to.is_followed_by(&from.username) {
        return Ok(false);
    }
    store
        .apply(
            WriteBatch::new()
                .add_to_set(collections::USERS, from.id, fields::FOLLOW, &to.username)
                .add_to_set(collections::USERS, to.id, fields::FANS, &from.username),
        )
        .await?;
    info!(follower, followee, "follow");
    Ok(true)
}

/// Reverse of `follow`. Returns `false` if there was nothing to undo.
pub async fn unfollow(store: &ForumStore, follower: &str, followee: &str) -> Result<bool> {
    let (from, to) = follow_pair(store, follower, followee).await?;
    if !from.is_following(&to.username) && !to.is_followed_by(&from.username) {
        return Ok(false);
    }
    store
        .apply(
            WriteBatch::new()
                .pull(collections::USERS, from.id, fields::FOLLOW, &to.username)
                .pull(collections::USERS, to.id, fields::FANS, &from.username),
        )
        .await?;
    info!(follower, followee, "unfollow");
    Ok(true)
}

async fn follow_pair(store: &ForumStore, follower: &str, followee: &str) -> Result<(User, User)> {
    if follower == followee {
        return Err(AppError::ValidationError("users cannot follow themselves".into()));
    }
    let from = store
        .user_by_name(follower)
        .await?
        .ok_or_else(|| AppError::not_found(User::KIND, follower))?;
    let to = store
        .user_by_name(followee)
        .await?
        .ok_or_else(|| AppError::not_found(User::KIND, followee))?;
    Ok((from, to))
}

// ── Nodes & Topics ──────────────────────────────────────────────────────────

pub struct NewNode {
    pub slug: String,
    pub name: String,
    pub description: String,
}

/// Creates a node. Slugs are lowercase URL-safe and unique.
pub async fn create_node(store: &ForumStore, new: NewNode) -> Result<Node> {
    if !is_slug(&new.slug) {
        return Err(AppError::ValidationError(format!("invalid node slug {:?}", new.slug)));
    }
    require_text("name", &new.name)?;
    if store.node_by_slug(&new.slug).await?.is_some() {
        return Err(AppError::Conflict(format!("node slug {} is taken", new.slug)));
    }

    let node = Node {
        id: new_id(),
        slug: new.slug,
        name: new.name,
        description: new.description,
        topic_count: 0,
    };
    store.apply(WriteBatch::new().insert(&node)?).await?;
    info!(node = %node.id, slug = %node.slug, "node created");
    Ok(node)
}

pub struct NewTopic {
    pub node_id: Id,
    pub user_id: Id,
    pub title: String,
    pub markdown: String,
}

/// Creates a topic, bumping `Node::topic_count` and `Status::topic_count`
/// in the same batch.
pub async fn create_topic(
    store: &ForumStore,
    renderer: &dyn MarkupRenderer,
    new: NewTopic,
) -> Result<Topic> {
    require_text("title", &new.title)?;
    let node: Node = store.require(new.node_id).await?;
    let author: User = store.require(new.user_id).await?;

    let created_at = now();
    let topic = Topic {
        id: new_id(),
        node_id: node.id,
        user_id: author.id,
        title: new.title,
        html: renderer.render(&new.markdown),
        markdown: new.markdown,
        created_at,
        reply_count: 0,
        latest_reply_id: String::new(),
        latest_replied_at: created_at,
        hits: 0,
    };

    store
        .apply(
            WriteBatch::new()
                .insert(&topic)?
                .increment(collections::NODES, node.id, fields::TOPIC_COUNT, 1)
                .increment(collections::STATUS, STATUS_ID, fields::TOPIC_COUNT, 1),
        )
        .await?;
    info!(topic = %topic.id, node = %node.slug, author = %author.username, "topic created");
    Ok(topic)
}

/// Replaces title and body, regenerating the rendered cache.
pub async fn edit_topic(
    store: &ForumStore,
    renderer: &dyn MarkupRenderer,
    topic_id: Id,
    title: &str,
    markdown: &str,
) -> Result<Topic> {
    require_text("title", title)?;
    let topic: Topic = store.require(topic_id).await?;
    store
        .apply(
            WriteBatch::new()
                .set(collections::TOPICS, topic.id, fields::TITLE, title)
                .set(collections::TOPICS, topic.id, fields::MARKDOWN, markdown)
                .set(collections::TOPICS, topic.id, fields::HTML, renderer.render(markdown)),
        )
        .await?;
    store.require(topic.id).await
}

/// Counts one view of the topic.
pub async fn record_hit(store: &ForumStore, topic_id: Id) -> Result<()> {
    store
        .apply(WriteBatch::new().increment(collections::TOPICS, topic_id, fields::HITS, 1))
        .await
}

/// Deletes a topic with all of its replies, adjusting node and status
/// counters in the same batch.
pub async fn delete_topic(store: &ForumStore, topic_id: Id) -> Result<()> {
    apply_with_retry(store, "delete_topic", move || async move {
        let topic: Topic = store.require(topic_id).await?;
        let replies = topic.replies(store).await?;
        let mut batch = WriteBatch::new()
            .expect(collections::TOPICS, topic.id, fields::REPLY_COUNT, topic.reply_count)
            .expect(
                collections::TOPICS,
                topic.id,
                fields::LATEST_REPLY_ID,
                topic.latest_reply_id.as_str(),
            );
        for reply in &replies {
            batch = batch.delete(collections::REPLIES, reply.id);
        }
        batch = batch
            .delete(collections::TOPICS, topic.id)
            .increment(collections::STATUS, STATUS_ID, fields::TOPIC_COUNT, -1)
            .increment(collections::STATUS, STATUS_ID, fields::REPLY_COUNT, -(replies.len() as i64));
        if topic.node(store).await?.is_some() {
            batch = batch.increment(collections::NODES, topic.node_id, fields::TOPIC_COUNT, -1);
        }
        Ok(batch)
    })
    .await?;
    info!(topic = %topic_id, "topic deleted");
    Ok(())
}

// ── Replies ─────────────────────────────────────────────────────────────────

pub struct NewReply {
    pub topic_id: Id,
    pub user_id: Id,
    pub markdown: String,
    /// Defaults to now; set explicitly when importing history. Truncated to
    /// microseconds like every stored timestamp.
    pub created_at: Option<DateTime<Utc>>,
}

/// Adds a reply. Bumps `Topic::reply_count` and `Status::reply_count` and,
/// when the reply is the newest, moves `latest_reply_id`, all in one batch.
pub async fn add_reply(
    store: &ForumStore,
    renderer: &dyn MarkupRenderer,
    new: NewReply,
) -> Result<Reply> {
    require_text("reply", &new.markdown)?;
    store.require::<Topic>(new.topic_id).await?;
    let author: User = store.require(new.user_id).await?;

    let html = renderer.render(&new.markdown);
    let reply = Reply::new(
        author.id,
        new.topic_id,
        new.markdown,
        html,
        new.created_at
            .map(|at| at.trunc_subsecs(6))
            .unwrap_or_else(now),
    );

    let pending = &reply;
    apply_with_retry(store, "add_reply", move || async move {
        let reply = pending;
        let topic: Topic = store.require(reply.topic_id).await?;
        let mut batch = WriteBatch::new()
            .insert(reply)?
            .increment(collections::TOPICS, topic.id, fields::REPLY_COUNT, 1)
            .increment(collections::STATUS, STATUS_ID, fields::REPLY_COUNT, 1);

        let newest = topic.latest_reply_id.is_empty() || reply.created_at >= topic.latest_replied_at;
        if newest {
            batch = batch
                .expect(
                    collections::TOPICS,
                    topic.id,
                    fields::LATEST_REPLY_ID,
                    topic.latest_reply_id.as_str(),
                )
                .set(collections::TOPICS, topic.id, fields::LATEST_REPLY_ID, reply.id.to_string())
                .set(
                    collections::TOPICS,
                    topic.id,
                    fields::LATEST_REPLIED_AT,
                    timestamp_value(reply.created_at),
                );
        }
        Ok(batch)
    })
    .await?;

    info!(reply = %reply.id, topic = %reply.topic_id, author = %author.username, "reply added");
    Ok(reply)
}

/// Deletes a reply, decrementing counters and moving `latest_reply_id` back
/// to the next newest reply when needed.
pub async fn delete_reply(store: &ForumStore, reply_id: Id) -> Result<()> {
    let reply: Reply = store.require(reply_id).await?;

    let doomed = &reply;
    apply_with_retry(store, "delete_reply", move || async move {
        let reply = doomed;
        let mut batch = WriteBatch::new()
            .delete(collections::REPLIES, reply.id)
            .increment(collections::STATUS, STATUS_ID, fields::REPLY_COUNT, -1);

        if let Some(topic) = store.get::<Topic>(reply.topic_id).await? {
            batch = batch.increment(collections::TOPICS, topic.id, fields::REPLY_COUNT, -1);
            if topic.latest_reply_id == reply.id.to_string() {
                let (latest_id, latest_at) = match newest_reply(store, topic.id, Some(reply.id)).await? {
                    Some(next) => (next.id.to_string(), next.created_at),
                    None => (String::new(), topic.created_at),
                };
                batch = batch
                    .expect(
                        collections::TOPICS,
                        topic.id,
                        fields::LATEST_REPLY_ID,
                        topic.latest_reply_id.as_str(),
                    )
                    .set(collections::TOPICS, topic.id, fields::LATEST_REPLY_ID, latest_id)
                    .set(collections::TOPICS, topic.id, fields::LATEST_REPLIED_AT, timestamp_value(latest_at));
            }
        }
        Ok(batch)
    })
    .await?;

    info!(reply = %reply.id, topic = %reply.topic_id, "reply deleted");
    Ok(())
}

/// Newest reply of a topic, optionally ignoring one reply id.
async fn newest_reply(store: &ForumStore, topic_id: Id, skip: Option<Id>) -> Result<Option<Reply>> {
    let candidates: Vec<Reply> = store
        .find(
            Query::new(Filter::new().eq_id(fields::TOPIC_ID, topic_id))
                .desc(fields::CREATED_AT)
                .desc(fields::ID)
                .limit(2),
        )
        .await?;
    Ok(candidates.into_iter().find(|reply| Some(reply.id) != skip))
}

// ── Site directory ──────────────────────────────────────────────────────────

pub async fn create_site_category(store: &ForumStore, name: &str) -> Result<SiteCategory> {
    require_text("name", name)?;
    let category = SiteCategory {
        id: new_id(),
        name: name.to_string(),
    };
    store.apply(WriteBatch::new().insert(&category)?).await?;
    info!(category = %category.id, name, "site category created");
    Ok(category)
}

pub struct NewSite {
    pub name: String,
    pub url: String,
    pub description: String,
    pub category_id: Id,
    pub user_id: Id,
}

pub async fn create_site(store: &ForumStore, new: NewSite) -> Result<Site> {
    require_text("name", &new.name)?;
    if !(new.url.starts_with("http://") || new.url.starts_with("https://")) {
        return Err(AppError::ValidationError(format!("site url {:?} must be http(s)", new.url)));
    }
    store.require::<SiteCategory>(new.category_id).await?;
    store.require::<User>(new.user_id).await?;

    let site = Site {
        id: new_id(),
        name: new.name,
        url: new.url,
        description: new.description,
        category_id: new.category_id,
        user_id: new.user_id,
    };
    store.apply(WriteBatch::new().insert(&site)?).await?;
    info!(site = %site.id, url = %site.url, "site listed");
    Ok(site)
}

// ── Reconciliation ──────────────────────────────────────────────────────────

/// What `reconcile_counters` had to repair.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub nodes_fixed: usize,
    pub topics_fixed: usize,
    pub status_fixed: bool,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.nodes_fixed == 0 && self.topics_fixed == 0 && !self.status_fixed
    }
}

/// Recomputes every denormalized counter and latest-reply pointer from the
/// child records and writes back whatever drifted.
///
/// Intended for maintenance windows: the repairs are absolute `Set`s and
/// would overwrite increments made concurrently.
pub async fn reconcile_counters(store: &ForumStore) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();

    for node in store.nodes().await? {
        let actual = store
            .count::<Topic>(Filter::new().eq_id(fields::NODE_ID, node.id))
            .await? as i64;
        if actual != node.topic_count {
            warn!(node = %node.slug, stored = node.topic_count, actual, "node topic_count drifted");
            store
                .apply(WriteBatch::new().set(collections::NODES, node.id, fields::TOPIC_COUNT, actual))
                .await?;
            report.nodes_fixed += 1;
        }
    }

    let topics: Vec<Topic> = store.find(Query::all()).await?;
    for topic in &topics {
        let actual = store
            .count::<Reply>(Filter::new().eq_id(fields::TOPIC_ID, topic.id))
            .await? as i64;
        let (latest_id, latest_at) = match newest_reply(store, topic.id, None).await? {
            Some(reply) => (reply.id.to_string(), reply.created_at),
            None => (String::new(), topic.created_at),
        };

        if actual != topic.reply_count
            || latest_id != topic.latest_reply_id
            || latest_at != topic.latest_replied_at
        {
            warn!(
                topic = %topic.id,
                stored_count = topic.reply_count,
                actual,
                stored_latest = %topic.latest_reply_id,
                latest = %latest_id,
                "topic reply stats drifted"
            );
            store
                .apply(
                    WriteBatch::new()
                        .set(collections::TOPICS, topic.id, fields::REPLY_COUNT, actual)
                        .set(collections::TOPICS, topic.id, fields::LATEST_REPLY_ID, latest_id)
                        .set(collections::TOPICS, topic.id, fields::LATEST_REPLIED_AT, timestamp_value(latest_at)),
                )
                .await?;
            report.topics_fixed += 1;
        }
    }

    let status = bootstrap_status(store).await?;
    let users = store.count::<User>(Filter::new()).await? as i64;
    let replies = store.count::<Reply>(Filter::new()).await? as i64;
    let top_index = store
        .find::<User>(Query::all().desc(fields::INDEX).limit(1))
        .await?
        .first()
        .map_or(0, |user| user.index);
    let expected = Status {
        id: STATUS_ID,
        user_count: users,
        topic_count: topics.len() as i64,
        reply_count: replies,
        user_index: status.user_index.max(top_index + 1),
    };
    if expected != status {
        warn!(?status, ?expected, "status counters drifted");
        store
            .apply(
                WriteBatch::new()
                    .set(collections::STATUS, STATUS_ID, fields::USER_COUNT, expected.user_count)
                    .set(collections::STATUS, STATUS_ID, fields::TOPIC_COUNT, expected.topic_count)
                    .set(collections::STATUS, STATUS_ID, fields::REPLY_COUNT, expected.reply_count)
                    .set(collections::STATUS, STATUS_ID, fields::USER_INDEX, expected.user_index),
            )
            .await?;
        report.status_fixed = true;
    }

    info!(?report, "reconciliation finished");
    Ok(report)
}
