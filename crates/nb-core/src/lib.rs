//! nodeboard/crates/nb-core/src/lib.rs
//!
//! The content model of Nodeboard: entities, the document-store port, the
//! relationship accessors resolved through it, and the lifecycle operations
//! that keep denormalized counters consistent.

pub mod error;
pub mod lifecycle;
pub mod models;
pub mod query;
pub mod relations;
pub mod render;
pub mod store;
pub mod traits;

// Re-exporting for easier access in other crates
pub use error::*;
pub use models::*;
pub use query::{Direction, Document, Filter, Mutation, Query, SortKey, WriteBatch};
pub use render::EscapingRenderer;
pub use store::{ForumStore, LATEST_LIMIT};
pub use traits::*;
