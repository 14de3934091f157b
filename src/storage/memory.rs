/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! An in-memory [`StorageAdapter`], mainly for tests and examples. Instances
//! bound to the same `(bucket, collection)` share a process-wide table, the
//! same guarantee the SQLite adapter gets for free from the filesystem.

use super::StorageAdapter;
use crate::error::{Error, Result};
use crate::record::Record;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

#[derive(Default)]
struct Shared {
    records: Mutex<HashMap<String, Record>>,
    last_modified: Mutex<Option<i64>>,
}

fn registry() -> &'static Mutex<HashMap<(String, String), Arc<Shared>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<(String, String), Arc<Shared>>>> = OnceLock::new();
    REGISTRY.get_or_init(Default::default)
}

pub struct InMemoryAdapter {
    shared: Arc<Shared>,
}

impl InMemoryAdapter {
    pub fn new(bucket: &str, collection: &str) -> Self {
        let shared = registry()
            .lock()
            .entry((bucket.to_string(), collection.to_string()))
            .or_insert_with(|| Arc::new(Shared::default()))
            .clone();
        Self { shared }
    }
}

#[async_trait]
impl StorageAdapter for InMemoryAdapter {
    async fn clear(&self) -> Result<()> {
        self.shared.records.lock().clear();
        *self.shared.last_modified.lock() = None;
        Ok(())
    }

    async fn create(&self, record: Record) -> Result<Record> {
        let id = record
            .id()
            .ok_or_else(|| Error::Validation("record has no id".into()))?
            .to_string();
        let mut records = self.shared.records.lock();
        if records.contains_key(&id) {
            return Err(Error::adapter(
                "create",
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, format!("id {id} exists")),
            ));
        }
        records.insert(id, record.clone());
        Ok(record)
    }

    async fn update(&self, record: Record) -> Result<Record> {
        let id = record
            .id()
            .ok_or_else(|| Error::Validation("record has no id".into()))?
            .to_string();
        self.shared.records.lock().insert(id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<Record>> {
        Ok(self.shared.records.lock().get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<String> {
        self.shared.records.lock().remove(id);
        Ok(id.to_string())
    }

    async fn list(&self) -> Result<Vec<Record>> {
        Ok(self.shared.records.lock().values().cloned().collect())
    }

    async fn save_last_modified(&self, value: Option<i64>) -> Result<Option<i64>> {
        *self.shared.last_modified.lock() = value;
        Ok(value)
    }

    async fn get_last_modified(&self) -> Result<Option<i64>> {
        Ok(*self.shared.last_modified.lock())
    }
}
