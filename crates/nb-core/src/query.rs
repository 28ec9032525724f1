//! # Query & Write-Batch Vocabulary
//!
//! The shapes exchanged across the `DocumentStore` port: equality filters,
//! sorted/limited queries, and atomic write batches. Adapters that keep
//! documents in memory reuse `matches`, `sort_documents` and `apply_update`
//! so every backend agrees on the same semantics.

use crate::error::{AppError, Result};
use crate::models::{fields, Entity, Id};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A stored document: a JSON object carrying a string `_id`.
pub type Document = Map<String, Value>;

/// Conjunction of field-equality clauses. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub clauses: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: Id) -> Self {
        Self::new().eq_id(fields::ID, id)
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.clauses.push((field.to_string(), value.into()));
        self
    }

    pub fn eq_id(self, field: &str, id: Id) -> Self {
        self.eq(field, id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: Direction,
}

/// Filter + ordered sort keys + optional limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Filter,
    pub sort: Vec<SortKey>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn asc(mut self, field: &str) -> Self {
        self.sort.push(SortKey {
            field: field.to_string(),
            direction: Direction::Ascending,
        });
        self
    }

    pub fn desc(mut self, field: &str) -> Self {
        self.sort.push(SortKey {
            field: field.to_string(),
            direction: Direction::Descending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A single document mutation inside a `WriteBatch`.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Insert a new document; an existing `_id` is a `Conflict`.
    Insert { collection: String, document: Document },
    /// Overwrite one field.
    Set { collection: String, id: Id, field: String, value: Value },
    /// Add `delta` to an integer field (missing counts as 0).
    Increment { collection: String, id: Id, field: String, delta: i64 },
    /// Append `value` to a string array unless already present.
    AddToSet { collection: String, id: Id, field: String, value: String },
    /// Remove every occurrence of `value` from a string array.
    Pull { collection: String, id: Id, field: String, value: String },
    Delete { collection: String, id: Id },
    /// Precondition: abort the whole batch with `Conflict` unless the field
    /// currently equals `value`.
    Expect { collection: String, id: Id, field: String, value: Value },
}

impl Mutation {
    pub fn collection(&self) -> &str {
        match self {
            Mutation::Insert { collection, .. }
            | Mutation::Set { collection, .. }
            | Mutation::Increment { collection, .. }
            | Mutation::AddToSet { collection, .. }
            | Mutation::Pull { collection, .. }
            | Mutation::Delete { collection, .. }
            | Mutation::Expect { collection, .. } => collection,
        }
    }
}

/// An ordered list of mutations that a `DocumentStore` applies atomically:
/// either every mutation lands or none does.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub ops: Vec<Mutation>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn insert<E: Entity>(mut self, entity: &E) -> Result<Self> {
        self.ops.push(Mutation::Insert {
            collection: E::COLLECTION.to_string(),
            document: to_document(entity)?,
        });
        Ok(self)
    }

    pub fn set(mut self, collection: &str, id: Id, field: &str, value: impl Into<Value>) -> Self {
        self.ops.push(Mutation::Set {
            collection: collection.to_string(),
            id,
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn increment(mut self, collection: &str, id: Id, field: &str, delta: i64) -> Self {
        self.ops.push(Mutation::Increment {
            collection: collection.to_string(),
            id,
            field: field.to_string(),
            delta,
        });
        self
    }

    pub fn add_to_set(mut self, collection: &str, id: Id, field: &str, value: &str) -> Self {
        self.ops.push(Mutation::AddToSet {
            collection: collection.to_string(),
            id,
            field: field.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub fn pull(mut self, collection: &str, id: Id, field: &str, value: &str) -> Self {
        self.ops.push(Mutation::Pull {
            collection: collection.to_string(),
            id,
            field: field.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub fn delete(mut self, collection: &str, id: Id) -> Self {
        self.ops.push(Mutation::Delete {
            collection: collection.to_string(),
            id,
        });
        self
    }

    pub fn expect(mut self, collection: &str, id: Id, field: &str, value: impl Into<Value>) -> Self {
        self.ops.push(Mutation::Expect {
            collection: collection.to_string(),
            id,
            field: field.to_string(),
            value: value.into(),
        });
        self
    }
}

/// JSON form of a timestamp as stored in documents (microseconds).
pub fn timestamp_value(at: DateTime<Utc>) -> Value {
    Value::from(at.timestamp_micros())
}

pub fn to_document<E: Serialize>(entity: &E) -> Result<Document> {
    match serde_json::to_value(entity)? {
        Value::Object(map) => Ok(map),
        other => Err(AppError::Internal(format!(
            "entity serialized to a non-object value: {other}"
        ))),
    }
}

pub fn from_document<E: DeserializeOwned>(document: Document) -> Result<E> {
    Ok(serde_json::from_value(Value::Object(document))?)
}

/// The `_id` of a document, as stored.
pub fn document_id(document: &Document) -> Result<&str> {
    document
        .get(fields::ID)
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Corrupt("document without a string _id".into()))
}

pub fn matches(document: &Document, filter: &Filter) -> bool {
    filter
        .clauses
        .iter()
        .all(|(field, value)| document.get(field).unwrap_or(&Value::Null) == value)
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: null < bool < number < string < others.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Stable sort by the given keys, in priority order.
pub fn sort_documents(documents: &mut [Document], keys: &[SortKey]) {
    documents.sort_by(|a, b| {
        for key in keys {
            let left = a.get(&key.field).unwrap_or(&Value::Null);
            let right = b.get(&key.field).unwrap_or(&Value::Null);
            let ord = match key.direction {
                Direction::Ascending => compare_values(left, right),
                Direction::Descending => compare_values(right, left),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Applies an in-place mutation (`Set`, `Increment`, `AddToSet`, `Pull`,
/// `Expect`) to an already-loaded document. `Insert` and `Delete` are
/// collection-level and are handled by the adapter itself.
pub fn apply_update(document: &mut Document, mutation: &Mutation) -> Result<()> {
    match mutation {
        Mutation::Set { field, value, .. } => {
            document.insert(field.clone(), value.clone());
        }
        Mutation::Increment { field, delta, id, .. } => {
            let current = match document.get(field) {
                None | Some(Value::Null) => 0,
                Some(value) => value.as_i64().ok_or_else(|| {
                    AppError::Corrupt(format!("{field} on {id} is not an integer"))
                })?,
            };
            document.insert(field.clone(), Value::from(current + delta));
        }
        Mutation::AddToSet { field, value, id, .. } => {
            let list = string_array(document, field, id)?;
            if !list.iter().any(|v| v.as_str() == Some(value.as_str())) {
                list.push(Value::String(value.clone()));
            }
        }
        Mutation::Pull { field, value, id, .. } => {
            let list = string_array(document, field, id)?;
            list.retain(|v| v.as_str() != Some(value.as_str()));
        }
        Mutation::Expect { field, value, id, collection } => {
            let current = document.get(field).unwrap_or(&Value::Null);
            if current != value {
                return Err(AppError::Conflict(format!(
                    "{collection}/{id}: expected {field} = {value}, found {current}"
                )));
            }
        }
        Mutation::Insert { .. } | Mutation::Delete { .. } => {
            return Err(AppError::Internal(
                "insert/delete are not in-place updates".into(),
            ));
        }
    }
    Ok(())
}

fn string_array<'a>(document: &'a mut Document, field: &str, id: &Id) -> Result<&'a mut Vec<Value>> {
    let slot = document
        .entry(field.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if slot.is_null() {
        *slot = Value::Array(Vec::new());
    }
    slot.as_array_mut()
        .ok_or_else(|| AppError::Corrupt(format!("{field} on {id} is not an array")))
}
