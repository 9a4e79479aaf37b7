//! Database layer for turnlog
//!
//! This module provides the document store the aggregates live in:
//! - [`DocumentStore`], the upsert/query contract the engine relies on
//! - [`Database`], its SQLite implementation
//! - Schema migrations (run once at startup, outside the ingest path)
//! - [`DocUpdate`] field operations applied atomically per document

pub mod repo;
pub mod schema;
pub mod update;

pub use repo::Database;
pub use update::{DocUpdate, UpdateOp};

use crate::error::Result;
use serde_json::{Map, Value};

/// A stored JSON document.
pub type Document = Map<String, Value>;

/// Aggregate collections, one per entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Students,
    Lessons,
    Classes,
    Sessions,
}

impl Collection {
    /// Returns the identifier used in database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Students => "students",
            Collection::Lessons => "lessons",
            Collection::Classes => "classes",
            Collection::Sessions => "sessions",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Document store contract.
///
/// Each call touches a single document or reads a collection; there are no
/// multi-document transactions. `upsert` must apply the whole [`DocUpdate`]
/// atomically, creating the document (with `_id` set) when it is missing.
pub trait DocumentStore {
    /// Apply `update` to the document `id`, creating it if needed
    fn upsert(&self, collection: Collection, id: &str, update: &DocUpdate) -> Result<()>;

    /// Overwrite the document `id` with `doc`
    fn replace(&self, collection: Collection, id: &str, doc: Document) -> Result<()>;

    /// All documents, optionally keeping only the named fields (plus `_id`)
    fn find_all(&self, collection: Collection, projection: Option<&[&str]>)
        -> Result<Vec<Document>>;

    /// One document by `_id`
    fn find_one(
        &self,
        collection: Collection,
        id: &str,
        projection: Option<&[&str]>,
    ) -> Result<Option<Document>>;

    /// Documents whose top-level string fields equal every `(field, value)` pair
    fn find_where(&self, collection: Collection, filters: &[(&str, &str)])
        -> Result<Vec<Document>>;
}

/// Keep only `_id` and the projected fields.
pub fn project(mut doc: Document, projection: Option<&[&str]>) -> Document {
    if let Some(fields) = projection {
        doc.retain(|key, _| key == "_id" || fields.contains(&key.as_str()));
    }
    doc
}
