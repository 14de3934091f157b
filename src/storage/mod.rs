/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The storage adapter contract and two implementations: an in-memory
//! adapter for tests, and a SQLite-backed adapter (`rusqlite`, matching
//! `remote_settings::storage::Storage`'s choice of storage engine).

pub mod memory;
pub mod sqlite;

use crate::error::Result;
use crate::record::Record;
use async_trait::async_trait;

pub use memory::InMemoryAdapter;
pub use sqlite::SqliteAdapter;

/// Abstract key/value-per-record store scoped to one `(bucket, collection)`.
///
/// Each operation either completes atomically against the underlying store
/// or fails with [`crate::error::Error::Adapter`]. Two adapter instances
/// bound to the same collection identity must observe the same state.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Remove every record and the metadata slot.
    async fn clear(&self) -> Result<()>;

    /// Insert a new record. Fails if `id` is already present.
    async fn create(&self, record: Record) -> Result<Record>;

    /// Overwrite an existing record. Create semantics are not required.
    async fn update(&self, record: Record) -> Result<Record>;

    /// Exact-match lookup by id.
    async fn get(&self, id: &str) -> Result<Option<Record>>;

    /// Hard delete, resolving with the id.
    async fn delete(&self, id: &str) -> Result<String>;

    /// Full scan; order is unspecified.
    async fn list(&self) -> Result<Vec<Record>>;

    /// Persist the collection's `lastModified` metadata slot.
    async fn save_last_modified(&self, value: Option<i64>) -> Result<Option<i64>>;

    /// Read the collection's `lastModified` metadata slot.
    async fn get_last_modified(&self) -> Result<Option<i64>>;
}
