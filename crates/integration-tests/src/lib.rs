//! Shared fixtures for the cross-crate scenario tests.
//!
//! Every scenario runs once per backend in `BACKENDS`, so the in-memory and
//! SQLite stores are held to the same contract.

use chrono::{DateTime, Utc};
use nb_core::lifecycle::{self, NewNode, NewReply, NewTopic, NewUser};
use nb_core::{
    AppError, CredentialProvider, EscapingRenderer, ForumStore, Node, OneShotCode, Reply, Result,
    Topic, User,
};
use nb_store_memory::MemoryDocumentStore;
use nb_store_sqlite::SqliteDocumentStore;
use secrecy::SecretString;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Sqlite,
}

pub const BACKENDS: [Backend; 2] = [Backend::Memory, Backend::Sqlite];

/// Cheap stand-in for Argon2 so fixtures can register many users quickly.
#[derive(Default)]
pub struct FakeCredentials {
    issued: AtomicU64,
}

impl CredentialProvider for FakeCredentials {
    fn hash_password(&self, password: &str) -> Result<String> {
        Ok(format!("fake${password}"))
    }

    fn verify_password(&self, password: &str, hash: &str) -> bool {
        hash == format!("fake${password}")
    }

    fn issue_code(&self) -> Result<OneShotCode> {
        let code = format!("code-{}", self.issued.fetch_add(1, Ordering::SeqCst));
        Ok(OneShotCode {
            digest: self.digest_code(&code),
            code,
        })
    }

    fn digest_code(&self, code: &str) -> String {
        format!("digest:{code}")
    }
}

pub struct Fixture {
    pub backend: Backend,
    pub store: ForumStore,
    /// Set for `Backend::Memory`, to inspect read counts and inject drift.
    pub memory: Option<Arc<MemoryDocumentStore>>,
    pub credentials: FakeCredentials,
    pub renderer: EscapingRenderer,
}

impl Fixture {
    /// A fresh, empty store with its `Status` record bootstrapped.
    pub async fn new(backend: Backend) -> Self {
        let (store, memory) = match backend {
            Backend::Memory => {
                let memory = Arc::new(MemoryDocumentStore::new());
                (ForumStore::new(memory.clone()), Some(memory))
            }
            Backend::Sqlite => {
                let sqlite = SqliteDocumentStore::new("sqlite::memory:")
                    .await
                    .expect("Failed to init SQLite");
                (ForumStore::new(Arc::new(sqlite)), None)
            }
        };
        lifecycle::bootstrap_status(&store)
            .await
            .expect("Failed to bootstrap status");

        Self {
            backend,
            store,
            memory,
            credentials: FakeCredentials::default(),
            renderer: EscapingRenderer,
        }
    }

    pub fn memory(&self) -> &MemoryDocumentStore {
        self.memory
            .as_deref()
            .expect("fixture is not backed by the memory store")
    }

    /// Registers and activates `name`.
    pub async fn user(&self, name: &str) -> User {
        let registration = lifecycle::register_user(
            &self.store,
            &self.credentials,
            NewUser {
                username: name.to_string(),
                password: SecretString::from(format!("{name}-password")),
                email: format!("{name}@example.com"),
            },
        )
        .await
        .expect("Failed to register user");
        lifecycle::activate_user(&self.store, &self.credentials, name, &registration.validate_code)
            .await
            .expect("Failed to activate user")
    }

    pub async fn node(&self, slug: &str) -> Node {
        lifecycle::create_node(
            &self.store,
            NewNode {
                slug: slug.to_string(),
                name: slug.to_uppercase(),
                description: format!("All about {slug}"),
            },
        )
        .await
        .expect("Failed to create node")
    }

    pub async fn topic(&self, node: &Node, author: &User, title: &str) -> Topic {
        lifecycle::create_topic(
            &self.store,
            &self.renderer,
            NewTopic {
                node_id: node.id,
                user_id: author.id,
                title: title.to_string(),
                markdown: format!("{title} body"),
            },
        )
        .await
        .expect("Failed to create topic")
    }

    pub async fn reply(&self, topic: &Topic, author: &User, text: &str) -> Reply {
        self.reply_at(topic, author, text, None).await
    }

    pub async fn reply_at(
        &self,
        topic: &Topic,
        author: &User,
        text: &str,
        at: Option<DateTime<Utc>>,
    ) -> Reply {
        lifecycle::add_reply(
            &self.store,
            &self.renderer,
            NewReply {
                topic_id: topic.id,
                user_id: author.id,
                markdown: text.to_string(),
                created_at: at,
            },
        )
        .await
        .expect("Failed to add reply")
    }

    /// Re-reads an entity from the store.
    pub async fn reload<E: nb_core::Entity>(&self, id: nb_core::Id) -> E {
        match self.store.require(id).await {
            Ok(entity) => entity,
            Err(AppError::NotFound(kind, id)) => panic!("{kind} {id} vanished"),
            Err(err) => panic!("reload failed: {err}"),
        }
    }
}
