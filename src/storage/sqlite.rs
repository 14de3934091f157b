/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! SQLite-backed [`StorageAdapter`] (`rusqlite` with the `bundled` feature,
//! matching `remote_settings::storage::Storage`'s choice of storage engine).
//! Blocking calls run on `tokio`'s blocking pool so the async executor is
//! never stalled on disk I/O.

use super::StorageAdapter;
use crate::error::{Error, Result};
use crate::record::Record;
use async_trait::async_trait;
use camino::Utf8Path;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;

pub struct SqliteAdapter {
    conn: Arc<Mutex<Connection>>,
    bucket: String,
    collection: String,
}

const METADATA_KEY: &str = "lastModified";

impl SqliteAdapter {
    pub fn open(path: &Utf8Path, bucket: &str, collection: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, bucket, collection)
    }

    pub fn open_in_memory(bucket: &str, collection: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, bucket, collection)
    }

    fn from_connection(conn: Connection, bucket: &str, collection: &str) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                bucket TEXT NOT NULL,
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (bucket, collection, id)
            );
            CREATE TABLE IF NOT EXISTS collection_metadata (
                bucket TEXT NOT NULL,
                collection TEXT NOT NULL,
                key TEXT NOT NULL,
                value INTEGER,
                PRIMARY KEY (bucket, collection, key)
            );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            bucket: bucket.to_string(),
            collection: collection.to_string(),
        })
    }

    /// Run a blocking closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .map_err(|e| Error::adapter(op, e))?
        .map_err(Error::from)
    }
}

#[async_trait]
impl StorageAdapter for SqliteAdapter {
    async fn clear(&self) -> Result<()> {
        let bucket = self.bucket.clone();
        let collection = self.collection.clone();
        self.with_conn("clear", move |conn| {
            conn.execute(
                "DELETE FROM records WHERE bucket = ?1 AND collection = ?2",
                params![bucket, collection],
            )?;
            conn.execute(
                "DELETE FROM collection_metadata WHERE bucket = ?1 AND collection = ?2",
                params![bucket, collection],
            )?;
            Ok(())
        })
        .await
    }

    async fn create(&self, record: Record) -> Result<Record> {
        let id = record
            .id()
            .ok_or_else(|| Error::Validation("record has no id".into()))?
            .to_string();
        let bucket = self.bucket.clone();
        let collection = self.collection.clone();
        let data = serde_json::to_string(&record)?;
        self.with_conn("create", move |conn| {
            conn.execute(
                "INSERT INTO records (bucket, collection, id, data) VALUES (?1, ?2, ?3, ?4)",
                params![bucket, collection, id, data],
            )
        })
        .await?;
        Ok(record)
    }

    async fn update(&self, record: Record) -> Result<Record> {
        let id = record
            .id()
            .ok_or_else(|| Error::Validation("record has no id".into()))?
            .to_string();
        let bucket = self.bucket.clone();
        let collection = self.collection.clone();
        let data = serde_json::to_string(&record)?;
        self.with_conn("update", move |conn| {
            conn.execute(
                "INSERT INTO records (bucket, collection, id, data) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(bucket, collection, id) DO UPDATE SET data = excluded.data",
                params![bucket, collection, id, data],
            )
        })
        .await?;
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<Record>> {
        let bucket = self.bucket.clone();
        let collection = self.collection.clone();
        let id = id.to_string();
        let data: Option<String> = self
            .with_conn("get", move |conn| {
                conn.query_row(
                    "SELECT data FROM records WHERE bucket = ?1 AND collection = ?2 AND id = ?3",
                    params![bucket, collection, id],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;
        data.map(|s| serde_json::from_str(&s).map_err(Error::from))
            .transpose()
    }

    async fn delete(&self, id: &str) -> Result<String> {
        let bucket = self.bucket.clone();
        let collection = self.collection.clone();
        let id_owned = id.to_string();
        self.with_conn("delete", move |conn| {
            conn.execute(
                "DELETE FROM records WHERE bucket = ?1 AND collection = ?2 AND id = ?3",
                params![bucket, collection, id_owned],
            )
        })
        .await?;
        Ok(id.to_string())
    }

    async fn list(&self) -> Result<Vec<Record>> {
        let bucket = self.bucket.clone();
        let collection = self.collection.clone();
        let rows: Vec<String> = self
            .with_conn("list", move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT data FROM records WHERE bucket = ?1 AND collection = ?2",
                )?;
                let rows = stmt
                    .query_map(params![bucket, collection], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter()
            .map(|s| serde_json::from_str(&s).map_err(Error::from))
            .collect()
    }

    async fn save_last_modified(&self, value: Option<i64>) -> Result<Option<i64>> {
        let bucket = self.bucket.clone();
        let collection = self.collection.clone();
        self.with_conn("saveLastModified", move |conn| {
            match value {
                Some(v) => conn.execute(
                    "INSERT INTO collection_metadata (bucket, collection, key, value)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(bucket, collection, key) DO UPDATE SET value = excluded.value",
                    params![bucket, collection, METADATA_KEY, v],
                ),
                None => conn.execute(
                    "DELETE FROM collection_metadata WHERE bucket = ?1 AND collection = ?2 AND key = ?3",
                    params![bucket, collection, METADATA_KEY],
                ),
            }
        })
        .await?;
        Ok(value)
    }

    async fn get_last_modified(&self) -> Result<Option<i64>> {
        let bucket = self.bucket.clone();
        let collection = self.collection.clone();
        self.with_conn("getLastModified", move |conn| {
            conn.query_row(
                "SELECT value FROM collection_metadata WHERE bucket = ?1 AND collection = ?2 AND key = ?3",
                params![bucket, collection, METADATA_KEY],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }
}
