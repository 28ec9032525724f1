//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the binary.

use crate::error::Result;
use crate::query::{Document, Filter, Query, WriteBatch};
use async_trait::async_trait;

/// Persistence contract: a document store addressed by collection name.
///
/// "No such document" is `Ok(None)` / an empty `Vec`. Errors are reserved for
/// the store itself failing, and adapters should map connectivity problems to
/// `AppError::Unavailable` so callers can tell them apart.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>>;
    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Document>>;
    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64>;

    /// Applies every mutation of the batch, or none of them.
    ///
    /// # Developer Note
    /// Counter maintenance relies on this: "insert reply" and "bump
    /// reply_count" travel in one batch, so a crash can't leave them apart.
    async fn apply(&self, batch: WriteBatch) -> Result<()>;
}

/// A freshly issued one-shot code: `code` goes to the user (e.g. by mail),
/// only `digest` is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneShotCode {
    pub code: String,
    pub digest: String,
}

/// Password hashing and one-shot code contract.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait CredentialProvider: Send + Sync {
    /// Returns a PHC-formatted hash of `password`.
    fn hash_password(&self, password: &str) -> Result<String>;

    /// Verifies a password against a stored PHC hash.
    fn verify_password(&self, password: &str, hash: &str) -> bool;

    /// Issues a random activation / reset code.
    fn issue_code(&self) -> Result<OneShotCode>;

    /// Digest under which `code` is stored.
    fn digest_code(&self, code: &str) -> String;
}

/// Turns user-authored markdown into HTML-safe markup.
pub trait MarkupRenderer: Send + Sync {
    fn render(&self, markdown: &str) -> String;
}
