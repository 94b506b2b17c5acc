//! SQLite-backed document store.
//!
//! # Responsibility
//! - Persist document collections in the migration-managed `documents` table.
//! - Notify in-process subscribers after every committed write.
//! - Detect commits from other connections via `PRAGMA data_version`.
//!
//! # Invariants
//! - Snapshots list documents in insertion order.
//! - A write and the snapshot it delivers are taken in one transaction: when
//!   the snapshot cannot be read the write is rolled back and reported, so an
//!   acknowledged write has always delivered its snapshot.
//! - Rows whose `fields_json` is not a JSON object are left out of snapshots
//!   with a warning; `get` reports such a row as `InvalidData`.
//! - The connection lock is never held while subscribers run.

use crate::db::{open_db, open_db_in_memory};
use crate::event::EventEmitter;
use crate::model::document::{Document, DocumentId, Fields, Snapshot};
use crate::store::{RemoteStore, SnapshotListener, StoreError, StoreResult, Subscription};
use log::{debug, warn};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Persistent document store over one SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    emitters: Mutex<HashMap<String, Arc<EventEmitter<Snapshot>>>>,
    data_version: Mutex<i64>,
}

impl SqliteStore {
    /// Opens (and migrates) a database file.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::from_connection(open_db(path)?)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(open_db_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        let data_version = read_data_version(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            emitters: Mutex::new(HashMap::new()),
            data_version: Mutex::new(data_version),
        })
    }

    /// Re-delivers snapshots when another connection committed since the last poll.
    ///
    /// Returns whether an external commit was observed.
    pub fn poll_external_changes(&self) -> StoreResult<bool> {
        let current = read_data_version(&self.conn.lock())?;
        {
            let mut known = self.data_version.lock();
            if *known == current {
                return Ok(false);
            }
            *known = current;
        }

        let collections: Vec<String> = self.emitters.lock().keys().cloned().collect();
        debug!(
            "event=store_external_change module=store status=ok backend=sqlite collections={}",
            collections.len()
        );
        for collection in collections {
            self.notify(&collection);
        }
        Ok(true)
    }

    fn listening_emitter(&self, collection: &str) -> Option<Arc<EventEmitter<Snapshot>>> {
        let emitter = self.emitters.lock().get(collection).cloned()?;
        (!emitter.is_empty()).then_some(emitter)
    }

    fn notify(&self, collection: &str) {
        let Some(emitter) = self.listening_emitter(collection) else {
            return;
        };
        let snapshot = read_collection(&self.conn.lock(), collection);
        match snapshot {
            Ok(snapshot) => emitter.emit(&snapshot),
            Err(err) => warn!(
                "event=store_notify module=store status=error backend=sqlite collection={collection} error={err}"
            ),
        }
    }

    /// Runs `write` and, when it changed a row, reads the resulting snapshot
    /// in the same transaction. Subscribers see the snapshot after commit.
    fn commit_write<T>(
        &self,
        collection: &str,
        write: impl FnOnce(&Transaction<'_>) -> StoreResult<(T, bool)>,
    ) -> StoreResult<(T, bool)> {
        let emitter = self.listening_emitter(collection);
        let (value, changed, snapshot) = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            let (value, changed) = write(&tx)?;
            let snapshot = match (&emitter, changed) {
                (Some(_), true) => Some(read_collection(&tx, collection).map_err(|err| {
                    warn!(
                        "event=store_write module=store status=error backend=sqlite collection={collection} error_code=snapshot_failed error={err}"
                    );
                    err
                })?),
                _ => None,
            };
            tx.commit()?;
            (value, changed, snapshot)
        };

        if let (Some(emitter), Some(snapshot)) = (emitter, snapshot) {
            emitter.emit(&snapshot);
        }
        Ok((value, changed))
    }
}

impl RemoteStore for SqliteStore {
    fn get(&self, collection: &str, id: &DocumentId) -> StoreResult<Option<Document>> {
        let conn = self.conn.lock();
        let fields_json: Option<String> = conn
            .query_row(
                "SELECT fields_json FROM documents WHERE collection = ?1 AND id = ?2;",
                params![collection, id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match fields_json {
            Some(text) => Ok(Some(Document::new(
                id.clone(),
                parse_fields(id.as_str(), &text)?,
            ))),
            None => Ok(None),
        }
    }

    fn read_all(&self, collection: &str) -> StoreResult<Vec<Document>> {
        read_collection(&self.conn.lock(), collection)
    }

    fn subscribe(
        &self,
        collection: &str,
        listener: SnapshotListener,
    ) -> StoreResult<Subscription> {
        let initial = read_collection(&self.conn.lock(), collection)?;
        let emitter = Arc::clone(
            self.emitters
                .lock()
                .entry(collection.to_string())
                .or_default(),
        );
        let forward = Arc::clone(&listener);
        let listener_id = emitter.on(move |snapshot: &Snapshot| forward(snapshot));
        let weak = Arc::downgrade(&emitter);

        debug!("event=store_subscribe module=store status=ok backend=sqlite collection={collection}");
        listener(&initial);
        Ok(Subscription::new(move || {
            if let Some(emitter) = weak.upgrade() {
                emitter.off(listener_id);
            }
        }))
    }

    fn insert(&self, collection: &str, fields: &Fields) -> StoreResult<DocumentId> {
        let id = DocumentId::generate();
        let fields_json = encode_fields(fields)?;
        let (id, _) = self.commit_write(collection, |tx| {
            tx.execute(
                "INSERT INTO documents (collection, id, fields_json) VALUES (?1, ?2, ?3);",
                params![collection, id.as_str(), fields_json],
            )?;
            Ok((id, true))
        })?;
        Ok(id)
    }

    fn update(&self, collection: &str, id: &DocumentId, fields: &Fields) -> StoreResult<()> {
        let fields_json = encode_fields(fields)?;
        self.commit_write(collection, |tx| {
            let changed = tx.execute(
                "UPDATE documents
                 SET
                    fields_json = ?1,
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE collection = ?2 AND id = ?3;",
                params![fields_json, collection, id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(id.clone()));
            }
            Ok(((), true))
        })?;
        Ok(())
    }

    fn delete(&self, collection: &str, id: &DocumentId) -> StoreResult<()> {
        let (_, changed) = self.commit_write(collection, |tx| {
            let changed = tx.execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2;",
                params![collection, id.as_str()],
            )?;
            Ok(((), changed > 0))
        })?;
        if !changed {
            // Usually removed by another connection; catch subscribers up.
            if let Err(err) = self.poll_external_changes() {
                warn!(
                    "event=store_poll module=store status=error backend=sqlite collection={collection} error={err}"
                );
            }
        }
        Ok(())
    }
}

fn read_collection(conn: &Connection, collection: &str) -> StoreResult<Vec<Document>> {
    let mut stmt = conn.prepare(
        "SELECT id, fields_json
         FROM documents
         WHERE collection = ?1
         ORDER BY rowid ASC;",
    )?;
    let mut rows = stmt.query([collection])?;
    let mut documents = Vec::new();
    while let Some(row) = rows.next()? {
        let id: String = row.get(0)?;
        let parsed = match row.get_ref(1)?.as_str() {
            Ok(text) => parse_fields(&id, text),
            Err(err) => Err(StoreError::InvalidData(format!(
                "fields_json of document `{id}` is not text: {err}"
            ))),
        };
        match parsed {
            Ok(fields) => documents.push(Document::new(id, fields)),
            Err(err) => warn!(
                "event=store_read module=store status=skipped backend=sqlite collection={collection} id={id} error={err}"
            ),
        }
    }
    Ok(documents)
}

fn read_data_version(conn: &Connection) -> StoreResult<i64> {
    Ok(conn.query_row("PRAGMA data_version;", [], |row| row.get(0))?)
}

fn parse_fields(id: &str, text: &str) -> StoreResult<Fields> {
    serde_json::from_str::<Fields>(text).map_err(|err| {
        StoreError::InvalidData(format!("fields_json of document `{id}` is not an object: {err}"))
    })
}

fn encode_fields(fields: &Fields) -> StoreResult<String> {
    serde_json::to_string(fields)
        .map_err(|err| StoreError::InvalidData(format!("fields cannot be encoded: {err}")))
}
