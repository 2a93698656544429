//! Collection-oriented document database.
//!
//! JSON documents are grouped into named collections and stored in a
//! SQLite file; filters are top-level field equality matched through the
//! JSON1 functions. The client surface mirrors a document database
//! driver: `find_one`, `insert_one`, `update_one` (`$set` semantics),
//! `delete_one`, `delete_many`, `count_documents`.
//!
//! Ids are not generated by the store. [`Collection::next_id`] hands out
//! per-collection ids from an atomic counter that never falls below the
//! highest id already present, so externally seeded documents are safe.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::{Map, Value};

use super::sqlite::{open_database, open_memory_database, DOCUMENT_MIGRATIONS};
use super::DatabaseError;

pub type Document = Map<String, Value>;

/// Client handle to the document database.
pub struct DocumentDb {
    conn: Mutex<Connection>,
}

impl DocumentDb {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        let conn = open_database(path, DOCUMENT_MIGRATIONS)?;
        tracing::info!(path = %path.display(), "Document store opened");
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = open_memory_database(DOCUMENT_MIGRATIONS)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn collection<'a>(&'a self, name: &'a str) -> Collection<'a> {
        Collection { db: self, name }
    }

    /// Run `f` with the store locked inside one SQLite transaction.
    /// Everything `f` writes commits together, or not at all when it
    /// returns an error.
    pub fn transaction<T, F>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, DatabaseError>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let out = f(&Transaction { conn: &tx })?;
        tx.commit()?;
        Ok(out)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn
            .lock()
            .map_err(|_| DatabaseError::Unavailable("document store lock poisoned".into()))
    }
}

/// A named collection inside a [`DocumentDb`].
pub struct Collection<'a> {
    db: &'a DocumentDb,
    name: &'a str,
}

impl Collection<'_> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn find_one(&self, filter: &Value) -> Result<Option<Document>, DatabaseError> {
        let conn = self.db.lock()?;
        Ok(find_row(&conn, self.name, filter, None)?.map(|(_, doc)| doc))
    }

    /// First matching document ordered by `sort_field`.
    pub fn find_one_sorted(
        &self,
        filter: &Value,
        sort_field: &str,
        descending: bool,
    ) -> Result<Option<Document>, DatabaseError> {
        let conn = self.db.lock()?;
        let order = Sort { field: sort_field, descending };
        Ok(find_row(&conn, self.name, filter, Some(order))?.map(|(_, doc)| doc))
    }

    pub fn insert_one(&self, doc: Document) -> Result<(), DatabaseError> {
        let conn = self.db.lock()?;
        insert_row(&conn, self.name, &doc)
    }

    /// Merge `set` into the first matching document. Returns whether a
    /// document matched.
    pub fn update_one(&self, filter: &Value, set: Document) -> Result<bool, DatabaseError> {
        let conn = self.db.lock()?;
        update_row(&conn, self.name, filter, set)
    }

    pub fn delete_one(&self, filter: &Value) -> Result<bool, DatabaseError> {
        let conn = self.db.lock()?;
        delete_row(&conn, self.name, filter)
    }

    pub fn delete_many(&self, filter: &Value) -> Result<usize, DatabaseError> {
        let conn = self.db.lock()?;
        delete_rows(&conn, self.name, filter)
    }

    pub fn count_documents(&self, filter: &Value) -> Result<i64, DatabaseError> {
        let conn = self.db.lock()?;
        let (clause, args) = where_clause(self.name, filter)?;
        let count = conn.query_row(
            &format!("SELECT COUNT(*) FROM documents WHERE {clause}"),
            params_from_iter(args),
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Next id for `id_field` in this collection.
    pub fn next_id(&self, id_field: &str) -> Result<i64, DatabaseError> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        let id = next_counter(&tx, self.name, id_field)?;
        tx.commit()?;
        Ok(id)
    }

    /// Return the first document matching `filter`, or insert the one
    /// built from a fresh `id_field` id. Find and insert happen under one
    /// lock and one transaction.
    pub fn find_or_insert_with<F>(
        &self,
        filter: &Value,
        id_field: &str,
        build: F,
    ) -> Result<Document, DatabaseError>
    where
        F: FnOnce(i64) -> Document,
    {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        if let Some((_, doc)) = find_row(&tx, self.name, filter, None)? {
            return Ok(doc);
        }
        let id = next_counter(&tx, self.name, id_field)?;
        let doc = build(id);
        insert_row(&tx, self.name, &doc)?;
        tx.commit()?;
        Ok(doc)
    }
}

/// Multi-collection writes inside [`DocumentDb::transaction`].
pub struct Transaction<'a> {
    conn: &'a Connection,
}

impl Transaction<'_> {
    pub fn insert_one(&self, collection: &str, doc: Document) -> Result<(), DatabaseError> {
        insert_row(self.conn, collection, &doc)
    }

    pub fn update_one(&self, collection: &str, filter: &Value, set: Document) -> Result<bool, DatabaseError> {
        update_row(self.conn, collection, filter, set)
    }

    pub fn delete_one(&self, collection: &str, filter: &Value) -> Result<bool, DatabaseError> {
        delete_row(self.conn, collection, filter)
    }

    pub fn delete_many(&self, collection: &str, filter: &Value) -> Result<usize, DatabaseError> {
        delete_rows(self.conn, collection, filter)
    }

    pub fn next_id(&self, collection: &str, id_field: &str) -> Result<i64, DatabaseError> {
        next_counter(self.conn, collection, id_field)
    }
}

struct Sort<'a> {
    field: &'a str,
    descending: bool,
}

fn json_path(field: &str) -> String {
    format!("$.\"{}\"", field.replace('"', ""))
}

/// Build `collection = ? AND json_extract(body, ?) IS ? ...` for a flat
/// equality filter.
fn where_clause(collection: &str, filter: &Value) -> Result<(String, Vec<SqlValue>), DatabaseError> {
    let fields = match filter {
        Value::Object(map) => map,
        Value::Null => return Ok(("collection = ?1".into(), vec![SqlValue::Text(collection.into())])),
        _ => {
            return Err(DatabaseError::MalformedDocument {
                collection: collection.into(),
                reason: "filter must be a JSON object".into(),
            })
        }
    };

    let mut clause = String::from("collection = ?1");
    let mut args = vec![SqlValue::Text(collection.into())];
    for (field, expected) in fields {
        let path_idx = args.len() + 1;
        let value_idx = path_idx + 1;
        clause.push_str(&format!(" AND json_extract(body, ?{path_idx}) IS ?{value_idx}"));
        args.push(SqlValue::Text(json_path(field)));
        args.push(to_sql_value(collection, expected)?);
    }
    Ok((clause, args))
}

fn to_sql_value(collection: &str, value: &Value) -> Result<SqlValue, DatabaseError> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => {
            return Err(DatabaseError::MalformedDocument {
                collection: collection.into(),
                reason: "nested filter values are not supported".into(),
            })
        }
    })
}

fn find_row(
    conn: &Connection,
    collection: &str,
    filter: &Value,
    sort: Option<Sort<'_>>,
) -> Result<Option<(i64, Document)>, DatabaseError> {
    let (clause, mut args) = where_clause(collection, filter)?;
    let order = match sort {
        Some(sort) => {
            args.push(SqlValue::Text(json_path(sort.field)));
            let direction = if sort.descending { "DESC" } else { "ASC" };
            format!("ORDER BY json_extract(body, ?{}) {direction}, id {direction}", args.len())
        }
        None => "ORDER BY id ASC".into(),
    };

    let row: Option<(i64, String)> = conn
        .query_row(
            &format!("SELECT id, body FROM documents WHERE {clause} {order} LIMIT 1"),
            params_from_iter(args),
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    row.map(|(id, body)| parse_body(collection, &body).map(|doc| (id, doc)))
        .transpose()
}

fn parse_body(collection: &str, body: &str) -> Result<Document, DatabaseError> {
    match serde_json::from_str::<Value>(body)? {
        Value::Object(doc) => Ok(doc),
        _ => Err(DatabaseError::MalformedDocument {
            collection: collection.into(),
            reason: "stored body is not a JSON object".into(),
        }),
    }
}

fn insert_row(conn: &Connection, collection: &str, doc: &Document) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO documents (collection, body) VALUES (?1, ?2)",
        params![collection, serde_json::to_string(doc)?],
    )?;
    Ok(())
}

fn update_row(conn: &Connection, collection: &str, filter: &Value, set: Document) -> Result<bool, DatabaseError> {
    let Some((row_id, mut doc)) = find_row(conn, collection, filter, None)? else {
        return Ok(false);
    };
    doc.extend(set);
    conn.execute(
        "UPDATE documents SET body = ?1 WHERE id = ?2",
        params![serde_json::to_string(&doc)?, row_id],
    )?;
    Ok(true)
}

fn delete_row(conn: &Connection, collection: &str, filter: &Value) -> Result<bool, DatabaseError> {
    let Some((row_id, _)) = find_row(conn, collection, filter, None)? else {
        return Ok(false);
    };
    conn.execute("DELETE FROM documents WHERE id = ?1", params![row_id])?;
    Ok(true)
}

fn delete_rows(conn: &Connection, collection: &str, filter: &Value) -> Result<usize, DatabaseError> {
    let (clause, args) = where_clause(collection, filter)?;
    let deleted = conn.execute(
        &format!("DELETE FROM documents WHERE {clause}"),
        params_from_iter(args),
    )?;
    Ok(deleted)
}

fn next_counter(conn: &Connection, collection: &str, id_field: &str) -> Result<i64, DatabaseError> {
    let highest: i64 = conn.query_row(
        "SELECT COALESCE(MAX(CAST(json_extract(body, ?2) AS INTEGER)), 0)
         FROM documents WHERE collection = ?1",
        params![collection, json_path(id_field)],
        |row| row.get(0),
    )?;
    let next = conn.query_row(
        "INSERT INTO counters (name, value) VALUES (?1, ?2 + 1)
         ON CONFLICT(name) DO UPDATE SET value = MAX(value, ?2) + 1
         RETURNING value",
        params![format!("{collection}.{id_field}"), highest],
        |row| row.get(0),
    )?;
    Ok(next)
}
