//! SQLite document store
//!
//! Each collection is a table of `(id, body)` rows where `body` is the JSON
//! document. Upserts read, modify and write a single row inside one SQLite
//! transaction, so concurrent writers to the same key serialize on the row.

use super::{project, Collection, DocUpdate, Document, DocumentStore};
use crate::error::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Database handle with connection pooling (single connection for now)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA busy_timeout = 5000;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database.
    ///
    /// Call once at process startup; ingest never checks the schema.
    pub fn migrate(&self) -> Result<()> {
        let conn = self.connection()?;
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Store("database connection lock poisoned".to_string()))
    }

    /// Number of documents in a collection
    pub fn count(&self, collection: Collection) -> Result<i64> {
        let conn = self.connection()?;
        let count = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", collection.as_str()),
            [],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    fn parse_body(collection: Collection, id: &str, body: &str) -> Result<Document> {
        match serde_json::from_str::<Value>(body)? {
            Value::Object(doc) => Ok(doc),
            _ => Err(Error::Store(format!(
                "document {} in {} is not a JSON object",
                id, collection
            ))),
        }
    }

    fn collect_rows(
        collection: Collection,
        rows: Vec<(String, String)>,
        projection: Option<&[&str]>,
    ) -> Result<Vec<Document>> {
        rows.into_iter()
            .map(|(id, body)| Self::parse_body(collection, &id, &body).map(|d| project(d, projection)))
            .collect()
    }
}

impl DocumentStore for Database {
    fn upsert(&self, collection: Collection, id: &str, update: &DocUpdate) -> Result<()> {
        let mut conn = self.connection()?;
        // Take the write lock up front so a competing writer waits out busy_timeout.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<String> = tx
            .query_row(
                &format!("SELECT body FROM {} WHERE id = ?1", collection.as_str()),
                [id],
                |r| r.get(0),
            )
            .optional()?;

        let inserting = existing.is_none();
        let mut doc = match existing {
            Some(body) => Self::parse_body(collection, id, &body)?,
            None => {
                let mut doc = Document::new();
                doc.insert("_id".to_string(), Value::from(id));
                doc
            }
        };

        update.apply(&mut doc, inserting);

        tx.execute(
            &format!(
                "INSERT INTO {} (id, body) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET body = excluded.body",
                collection.as_str()
            ),
            params![id, Value::Object(doc).to_string()],
        )?;
        tx.commit()?;

        tracing::trace!(%collection, id, inserting, "Upserted document");
        Ok(())
    }

    fn replace(&self, collection: Collection, id: &str, mut doc: Document) -> Result<()> {
        doc.insert("_id".to_string(), Value::from(id));

        let conn = self.connection()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (id, body) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET body = excluded.body",
                collection.as_str()
            ),
            params![id, Value::Object(doc).to_string()],
        )?;
        Ok(())
    }

    fn find_all(
        &self,
        collection: Collection,
        projection: Option<&[&str]>,
    ) -> Result<Vec<Document>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, body FROM {} ORDER BY id",
            collection.as_str()
        ))?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<std::result::Result<Vec<(String, String)>, _>>()?;

        Self::collect_rows(collection, rows, projection)
    }

    fn find_one(
        &self,
        collection: Collection,
        id: &str,
        projection: Option<&[&str]>,
    ) -> Result<Option<Document>> {
        let conn = self.connection()?;
        let body: Option<String> = conn
            .query_row(
                &format!("SELECT body FROM {} WHERE id = ?1", collection.as_str()),
                [id],
                |r| r.get(0),
            )
            .optional()?;

        body.map(|b| Self::parse_body(collection, id, &b).map(|d| project(d, projection)))
            .transpose()
    }

    fn find_where(
        &self,
        collection: Collection,
        filters: &[(&str, &str)],
    ) -> Result<Vec<Document>> {
        let mut sql = format!("SELECT id, body FROM {} WHERE 1=1", collection.as_str());
        let mut values: Vec<&str> = Vec::with_capacity(filters.len());

        for (field, value) in filters {
            if field.is_empty()
                || !field
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(Error::Store(format!("invalid filter field: {:?}", field)));
            }
            // Inline the path so the expression indexes apply
            sql.push_str(&format!(
                " AND json_extract(body, '$.{}') = ?{}",
                field,
                values.len() + 1
            ));
            values.push(value);
        }
        sql.push_str(" ORDER BY id");

        let conn = self.connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(values.iter()), |r| {
                Ok((r.get(0)?, r.get(1)?))
            })?
            .collect::<std::result::Result<Vec<(String, String)>, _>>()?;

        Self::collect_rows(collection, rows, None)
    }
}
