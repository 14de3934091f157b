/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The core orchestrator: local CRUD over the storage adapter, and the
//! pull→push→pull sync state machine.

use crate::clean::clean;
use crate::error::{Error, Result};
use crate::id::{IdSchema, UuidIdSchema};
use crate::record::{Record, Status};
use crate::remote::RemoteClient;
use crate::result::{Conflict, ConflictType, SyncError, SyncResult};
use crate::storage::StorageAdapter;
use crate::transformer::Pipeline;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// The conflict resolution strategy a `sync()` call uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Conflicts are surfaced to the caller; no automatic resolution.
    #[default]
    Manual,
    /// Conflicts are resolved by keeping local data.
    ClientWins,
    /// Conflicts are resolved by taking the remote.
    ServerWins,
}

/// Every local CRUD operation resolves to this envelope; `permissions` is
/// reserved for future use and always empty in the core.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordEnvelope {
    pub data: Record,
    pub permissions: Map<String, Value>,
}

impl RecordEnvelope {
    fn new(data: Record) -> Self {
        Self {
            data,
            permissions: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub synced: bool,
    pub use_record_id: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub synced: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    pub include_deleted: bool,
}

#[derive(Debug, Clone)]
pub struct DeleteOptions {
    pub virtual_delete: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            virtual_delete: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub filters: HashMap<String, Value>,
    /// `[-]field`: a leading `-` sorts descending.
    pub order: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub include_deleted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub strategy: Strategy,
    pub headers: HashMap<String, String>,
    pub ignore_backoff: bool,
}

/// Owns all records in its storage adapter and the collection's metadata
/// slot. Bound to exactly one `(bucket, name)` collection identity.
pub struct Collection {
    bucket: String,
    name: String,
    adapter: Arc<dyn StorageAdapter>,
    remote: Arc<RemoteClient>,
    id_schema: Arc<dyn IdSchema>,
    pipeline: Arc<Pipeline>,
}

impl Collection {
    pub fn new(
        bucket: impl Into<String>,
        name: impl Into<String>,
        adapter: Arc<dyn StorageAdapter>,
        remote: Arc<RemoteClient>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            name: name.into(),
            adapter,
            remote,
            id_schema: Arc::new(UuidIdSchema),
            pipeline: Arc::new(Pipeline::new()),
        }
    }

    pub fn with_id_schema(mut self, schema: Arc<dyn IdSchema>) -> Self {
        self.id_schema = schema;
        self
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Arc::new(pipeline);
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ---- Local CRUD -----------------------------------------------------

    pub async fn create(&self, mut record: Record, opts: CreateOptions) -> Result<RecordEnvelope> {
        let id_required = opts.synced || opts.use_record_id;
        match (id_required, record.id()) {
            (true, None) => {
                return Err(Error::Validation(
                    "id is required when synced or useRecordId is set".into(),
                ))
            }
            (false, Some(_)) => {
                return Err(Error::Validation(
                    "id must not be provided unless synced or useRecordId is set".into(),
                ))
            }
            (true, Some(id)) if !self.id_schema.validate(id) => {
                return Err(Error::Validation(format!("invalid id: {id}")))
            }
            _ => {}
        }
        if record.id().is_none() {
            record.set_id(self.id_schema.generate());
        }
        record.set_status(if opts.synced {
            Status::Synced
        } else {
            Status::Created
        });
        let stored = self.adapter.create(record).await?;
        Ok(RecordEnvelope::new(stored))
    }

    pub async fn update(&self, mut record: Record, opts: UpdateOptions) -> Result<RecordEnvelope> {
        let id = record
            .id()
            .ok_or_else(|| Error::Validation("id is required to update a record".into()))?
            .to_string();
        if self.adapter.get(&id).await?.is_none() {
            return Err(Error::RecordNotFound(id));
        }
        let status = if record.status() == Some(Status::Deleted) {
            Status::Deleted
        } else if opts.synced {
            Status::Synced
        } else {
            Status::Updated
        };
        record.set_status(status);
        let stored = self.adapter.update(record).await?;
        Ok(RecordEnvelope::new(stored))
    }

    pub async fn get(&self, id: &str, opts: GetOptions) -> Result<RecordEnvelope> {
        if !self.id_schema.validate(id) {
            return Err(Error::Validation(format!("invalid id: {id}")));
        }
        let record = self
            .adapter
            .get(id)
            .await?
            .ok_or_else(|| Error::RecordNotFound(id.to_string()))?;
        if record.is_virtually_deleted() && !opts.include_deleted {
            return Err(Error::RecordNotFound(id.to_string()));
        }
        Ok(RecordEnvelope::new(record))
    }

    pub async fn delete(&self, id: &str, opts: DeleteOptions) -> Result<RecordEnvelope> {
        if opts.virtual_delete {
            let existing = self
                .adapter
                .get(id)
                .await?
                .ok_or_else(|| Error::RecordNotFound(id.to_string()))?;
            if existing.status() == Some(Status::Deleted) {
                return Ok(RecordEnvelope::new(minimal_record(id)));
            }
            if existing.last_modified().is_some() {
                let mut tombstoned = existing;
                tombstoned.set_status(Status::Deleted);
                self.adapter.update(tombstoned).await?;
            } else {
                self.adapter.delete(id).await?;
            }
        } else {
            self.adapter.delete(id).await?;
        }
        Ok(RecordEnvelope::new(minimal_record(id)))
    }

    pub async fn list(&self, query: ListQuery, opts: ListOptions) -> Result<Vec<Record>> {
        let mut records: Vec<Record> = self
            .adapter
            .list()
            .await?
            .into_iter()
            .filter(|r| opts.include_deleted || !r.is_virtually_deleted())
            .filter(|r| {
                query
                    .filters
                    .iter()
                    .all(|(field, expected)| r.get(field) == Some(expected))
            })
            .collect();

        if let Some(order) = &query.order {
            let (field, descending) = match order.strip_prefix('-') {
                Some(field) => (field, true),
                None => (order.as_str(), false),
            };
            records.sort_by(|a, b| compare_field(a, b, field, descending));
        }
        Ok(records)
    }

    // ---- Sync state machine ----------------------------------------------

    pub async fn sync(&self, opts: SyncOptions) -> Result<SyncResult> {
        if !opts.ignore_backoff {
            let remaining_ms = self.remote.backoff();
            if remaining_ms > 0 {
                let remaining_secs = ((remaining_ms as f64) / 1000.0).ceil() as u64;
                return Err(Error::Backoff(remaining_secs));
            }
        }

        let last_modified = self.adapter.get_last_modified().await?;
        let mut result = SyncResult::new(last_modified);

        self.pull_changes(&mut result, opts.strategy, &opts.headers)
            .await?;
        self.push_changes(&mut result, opts.strategy, &opts.headers, false)
            .await?;
        if !result.published.is_empty() {
            self.pull_changes(&mut result, opts.strategy, &opts.headers)
                .await?;
        }
        Ok(result)
    }

    async fn pull_changes(
        &self,
        result: &mut SyncResult,
        strategy: Strategy,
        headers: &HashMap<String, String>,
    ) -> Result<()> {
        if !result.ok() {
            return Ok(());
        }

        let response = self
            .remote
            .fetch_changes_since(&self.bucket, &self.name, result.last_modified, headers)
            .await?;

        let outcomes = futures::future::join_all(
            response
                .changes
                .iter()
                .cloned()
                .map(|change| self.import_change(change)),
        )
        .await;

        for outcome in outcomes {
            match outcome? {
                ImportOutcome::Created(r) => result.created.push(r),
                ImportOutcome::Updated(r) => result.updated.push(r),
                ImportOutcome::Deleted(r) => result.deleted.push(r),
                ImportOutcome::Skipped(r) => result.skipped.push(r),
                ImportOutcome::Conflict(c) => result.conflicts.push(c),
                ImportOutcome::Error(e) => result.errors.push(e),
                ImportOutcome::Void => {}
            }
        }

        self.handle_conflicts(result, strategy).await?;
        if result.ok() {
            result.bump_last_modified(response.last_modified);
            self.adapter.save_last_modified(result.last_modified).await?;
        }
        Ok(())
    }

    /// Never returns `Err`: any failure specific to this one change (a
    /// missing id, a failed decode, a storage-adapter failure) is reported
    /// as an `ImportOutcome::Error` instead, so the rest of the batch still
    /// imports and `sync()` only fails on change-feed/adapter failures that
    /// apply to the whole pull.
    async fn import_change(&self, remote_raw: Record) -> Result<ImportOutcome> {
        let id = match remote_raw.id() {
            Some(id) => id.to_string(),
            None => {
                return Ok(ImportOutcome::Error(SyncError {
                    path: None,
                    sent: Some(remote_raw),
                    status: 0,
                    error: Value::String("change has no id".into()),
                }))
            }
        };
        let is_tombstone = remote_raw.is_tombstone();
        let decoded = if is_tombstone {
            remote_raw
        } else {
            match self.pipeline.decode(remote_raw.clone()).await {
                Ok(decoded) => decoded,
                Err(e) => {
                    return Ok(ImportOutcome::Error(SyncError {
                        path: None,
                        sent: Some(remote_raw),
                        status: 0,
                        error: Value::String(e.to_string()),
                    }))
                }
            }
        };

        let existing = match self.adapter.get(&id).await {
            Ok(existing) => existing,
            Err(e) => {
                return Ok(ImportOutcome::Error(SyncError {
                    path: None,
                    sent: Some(decoded),
                    status: 0,
                    error: Value::String(e.to_string()),
                }))
            }
        };

        match existing {
            None => {
                if is_tombstone {
                    Ok(ImportOutcome::Skipped(decoded))
                } else {
                    let mut to_create = decoded.clone();
                    to_create.set_status(Status::Synced);
                    match self.adapter.create(to_create).await {
                        Ok(created) => Ok(ImportOutcome::Created(created)),
                        Err(e) => Ok(ImportOutcome::Error(SyncError {
                            path: None,
                            sent: Some(decoded),
                            status: 0,
                            error: Value::String(e.to_string()),
                        })),
                    }
                }
            }
            Some(local) => self.process_change_import(local, decoded, is_tombstone).await,
        }
    }

    /// Same no-`Err` contract as `import_change`: adapter failures while
    /// applying this one record are reported, not propagated.
    async fn process_change_import(
        &self,
        local: Record,
        remote: Record,
        is_tombstone: bool,
    ) -> Result<ImportOutcome> {
        if local.status() != Some(Status::Synced) {
            return if local.status() == Some(Status::Deleted) {
                Ok(ImportOutcome::Skipped(local))
            } else if clean(&local) == clean(&remote) {
                let mut synced = remote;
                synced.set_status(Status::Synced);
                match self.adapter.update(synced.clone()).await {
                    Ok(stored) => Ok(ImportOutcome::Updated(stored)),
                    Err(e) => Ok(ImportOutcome::Error(SyncError {
                        path: None,
                        sent: Some(synced),
                        status: 0,
                        error: Value::String(e.to_string()),
                    })),
                }
            } else {
                Ok(ImportOutcome::Conflict(Conflict {
                    kind: ConflictType::Incoming,
                    local,
                    remote: Some(remote),
                }))
            };
        }

        if is_tombstone {
            let id = local.id().unwrap().to_string();
            match self.adapter.delete(&id).await {
                Ok(_) => Ok(ImportOutcome::Deleted(local)),
                Err(e) => Ok(ImportOutcome::Error(SyncError {
                    path: None,
                    sent: Some(local),
                    status: 0,
                    error: Value::String(e.to_string()),
                })),
            }
        } else if clean(&local) == clean(&remote) {
            Ok(ImportOutcome::Void)
        } else {
            let mut synced = remote;
            synced.set_status(Status::Synced);
            match self.adapter.update(synced.clone()).await {
                Ok(stored) => Ok(ImportOutcome::Updated(stored)),
                Err(e) => Ok(ImportOutcome::Error(SyncError {
                    path: None,
                    sent: Some(synced),
                    status: 0,
                    error: Value::String(e.to_string()),
                })),
            }
        }
    }

    async fn push_changes(
        &self,
        result: &mut SyncResult,
        strategy: Strategy,
        headers: &HashMap<String, String>,
        resolved_pass: bool,
    ) -> Result<()> {
        if !result.ok() {
            return Ok(());
        }

        let (to_delete, to_sync) = self.gather_local_changes().await?;

        let mut encoded = Vec::with_capacity(to_sync.len());
        for record in &to_sync {
            encoded.push(self.pipeline.encode(record.clone()).await?);
        }

        // manual always uses preconditions; server_wins never does; client_wins
        // only drops them on the follow-up push of records it just resolved
        // (their local last_modified was just forced to match the server's).
        let safe = match strategy {
            Strategy::Manual => true,
            Strategy::ServerWins => false,
            Strategy::ClientWins => !resolved_pass,
        };
        let delete_fut = async {
            for record in &to_delete {
                let id = record.id().unwrap_or_default();
                self.adapter.delete(id).await?;
            }
            Ok::<(), Error>(())
        };
        let batch_fut = self
            .remote
            .batch(&self.bucket, &self.name, &encoded, safe, headers);
        let (delete_result, batch_result) = tokio::join!(delete_fut, batch_fut);
        delete_result?;
        let batch_result = batch_result?;

        result.errors.extend(batch_result.errors);
        result.conflicts.extend(batch_result.conflicts);

        for published in batch_result.published {
            if published.is_tombstone() {
                if let Some(id) = published.id() {
                    self.adapter.delete(id).await?;
                }
                result.published.push(published);
            } else {
                let decoded = self.pipeline.decode(published).await?;
                let envelope = self.update(decoded, UpdateOptions { synced: true }).await?;
                result.published.push(envelope.data);
            }
        }

        let resolved_before = result.resolved.len();
        self.handle_conflicts(result, strategy).await?;
        let needs_followup: Vec<Record> = result.resolved[resolved_before..]
            .iter()
            .filter(|r| r.status() != Some(Status::Synced))
            .cloned()
            .collect();

        if !needs_followup.is_empty() && !resolved_pass {
            match strategy {
                Strategy::ClientWins => {
                    Box::pin(self.push_changes(result, strategy, headers, true)).await?;
                }
                Strategy::ServerWins => {
                    for mut record in needs_followup {
                        record.set_status(Status::Synced);
                        self.adapter.update(record).await?;
                    }
                }
                Strategy::Manual => {}
            }
        }
        Ok(())
    }

    async fn gather_local_changes(&self) -> Result<(Vec<Record>, Vec<Record>)> {
        let all = self.adapter.list().await?;
        let mut to_delete = Vec::new();
        let mut to_sync = Vec::new();
        for record in all {
            if record.status() == Some(Status::Deleted) && record.last_modified().is_none() {
                to_delete.push(record);
            } else if record.status() != Some(Status::Synced) {
                to_sync.push(record);
            }
        }
        Ok((to_delete, to_sync))
    }

    async fn handle_conflicts(&self, result: &mut SyncResult, strategy: Strategy) -> Result<()> {
        if strategy == Strategy::Manual || result.conflicts.is_empty() {
            return Ok(());
        }
        let conflicts = std::mem::take(&mut result.conflicts);
        for conflict in conflicts {
            let mut resolution = match strategy {
                Strategy::ClientWins => conflict.local.clone(),
                Strategy::ServerWins => conflict
                    .remote
                    .clone()
                    .unwrap_or_else(|| conflict.local.clone()),
                Strategy::Manual => unreachable!(),
            };
            if let Some(id) = conflict.local.id() {
                resolution.set_id(id);
            }
            if let Some(remote) = &conflict.remote {
                if let Some(last_modified) = remote.last_modified() {
                    resolution.set_last_modified(last_modified);
                }
            }
            resolution.set_status(match strategy {
                Strategy::ClientWins => Status::Updated,
                Strategy::ServerWins => Status::Synced,
                Strategy::Manual => unreachable!(),
            });
            let stored = self.adapter.update(resolution).await?;
            result.resolved.push(stored);
        }
        Ok(())
    }
}

fn minimal_record(id: &str) -> Record {
    let mut record = Record::new();
    record.set_id(id);
    record
}

/// A record missing `field` always sorts after one that has it, regardless
/// of `descending`; only the comparison between two present values flips.
fn compare_field(a: &Record, b: &Record, field: &str, descending: bool) -> Ordering {
    match (a.get(field), b.get(field)) {
        (Some(x), Some(y)) => {
            let ordering = compare_values(x, y);
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

enum ImportOutcome {
    Created(Record),
    Updated(Record),
    Deleted(Record),
    Skipped(Record),
    Conflict(Conflict),
    Error(SyncError),
    Void,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::http::mock::MockTransport;
    use serde_json::json;

    fn remote_with(transport: Arc<MockTransport>) -> Arc<RemoteClient> {
        let config = crate::config::ClientConfig::new("https://example.org/v1").unwrap();
        Arc::new(RemoteClient::with_transport(&config, transport))
    }

    /// Accepts any non-empty string, so tests can use readable literal ids
    /// instead of real UUIDs.
    #[derive(Default)]
    struct PermissiveIdSchema;

    impl IdSchema for PermissiveIdSchema {
        fn generate(&self) -> String {
            UuidIdSchema.generate()
        }

        fn validate(&self, id: &str) -> bool {
            !id.is_empty()
        }
    }

    fn collection(bucket: &str, name: &str, transport: Arc<MockTransport>) -> Collection {
        let adapter = Arc::new(crate::storage::InMemoryAdapter::new(bucket, name));
        Collection::new(bucket, name, adapter, remote_with(transport))
            .with_id_schema(Arc::new(PermissiveIdSchema))
    }

    fn json_response(
        status: u16,
        headers: &[(&str, &str)],
        body: Value,
    ) -> crate::http::HttpResponse {
        let mut h = std::collections::HashMap::new();
        for (k, v) in headers {
            h.insert(k.to_string(), v.to_string());
        }
        crate::http::HttpResponse::new(status, h, serde_json::to_vec(&body).unwrap())
    }

    #[tokio::test]
    async fn create_requires_no_id_by_default_and_generates_one() {
        let collection = collection("b", "first-sync", Arc::new(MockTransport::new()));
        let record = Record::new();
        let envelope = collection.create(record, CreateOptions::default()).await.unwrap();
        assert!(envelope.data.id().is_some());
        assert_eq!(envelope.data.status(), Some(Status::Created));
    }

    #[tokio::test]
    async fn create_rejects_explicit_id_without_use_record_id() {
        let collection = collection("b", "reject-id", Arc::new(MockTransport::new()));
        let mut record = Record::new();
        record.set_id("explicit");
        assert!(collection
            .create(record, CreateOptions::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn update_fails_if_record_does_not_exist() {
        let collection = collection("b", "update-missing", Arc::new(MockTransport::new()));
        let mut record = Record::new();
        record.set_id("ghost");
        assert!(matches!(
            collection
                .update(record, UpdateOptions::default())
                .await
                .unwrap_err(),
            Error::RecordNotFound(_)
        ));
    }

    #[tokio::test]
    async fn get_hides_virtual_deletes_unless_asked() {
        let collection = collection("b", "get-deleted", Arc::new(MockTransport::new()));
        let mut record = Record::new();
        record.set_id("a");
        let created = collection
            .create(record, CreateOptions { synced: true, use_record_id: true })
            .await
            .unwrap();
        let mut deleted = created.data.clone();
        deleted.set_last_modified(100);
        collection
            .update(deleted, UpdateOptions::default())
            .await
            .unwrap();
        collection.delete("a", DeleteOptions::default()).await.unwrap();

        assert!(collection.get("a", GetOptions::default()).await.is_err());
        assert!(collection
            .get("a", GetOptions { include_deleted: true })
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn delete_of_never_synced_record_hard_deletes_immediately() {
        let collection = collection("b", "delete-unsynced", Arc::new(MockTransport::new()));
        let record = Record::new();
        let created = collection
            .create(record, CreateOptions::default())
            .await
            .unwrap();
        let id = created.data.id().unwrap().to_string();
        collection.delete(&id, DeleteOptions::default()).await.unwrap();
        assert!(collection
            .get(&id, GetOptions { include_deleted: true })
            .await
            .is_err());
    }

    #[tokio::test]
    async fn delete_is_idempotent_once_virtually_deleted() {
        let collection = collection("b", "delete-idempotent", Arc::new(MockTransport::new()));
        let mut record = Record::new();
        record.set_id("a");
        collection
            .create(record, CreateOptions { synced: true, use_record_id: true })
            .await
            .unwrap();
        let mut synced = collection
            .get("a", GetOptions::default())
            .await
            .unwrap()
            .data;
        synced.set_last_modified(10);
        collection.update(synced, UpdateOptions::default()).await.unwrap();

        collection.delete("a", DeleteOptions::default()).await.unwrap();
        let second = collection.delete("a", DeleteOptions::default()).await.unwrap();
        assert_eq!(second.data.id(), Some("a"));
    }

    #[tokio::test]
    async fn list_applies_filters_and_order() {
        let collection = collection("b", "list-coll", Arc::new(MockTransport::new()));
        for (id, rank) in [("a", 3), ("b", 1), ("c", 2)] {
            let mut record = Record::new();
            record.set_id(id);
            record.0.insert("rank".into(), json!(rank));
            collection
                .create(
                    record,
                    CreateOptions {
                        synced: true,
                        use_record_id: true,
                    },
                )
                .await
                .unwrap();
        }
        let results = collection
            .list(
                ListQuery {
                    filters: HashMap::new(),
                    order: Some("rank".to_string()),
                },
                ListOptions::default(),
            )
            .await
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.id().unwrap()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn filters_on_nonexistent_field_match_nothing() {
        let collection = collection("b", "list-filter", Arc::new(MockTransport::new()));
        let mut record = Record::new();
        record.set_id("a");
        collection
            .create(
                record,
                CreateOptions {
                    synced: true,
                    use_record_id: true,
                },
            )
            .await
            .unwrap();
        let mut filters = HashMap::new();
        filters.insert("nope".to_string(), json!("anything"));
        let results = collection
            .list(
                ListQuery { filters, order: None },
                ListOptions::default(),
            )
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn records_missing_the_order_field_sort_last_in_both_directions() {
        let collection = collection("b", "list-missing-field", Arc::new(MockTransport::new()));
        let mut with_rank = Record::new();
        with_rank.set_id("has-rank");
        with_rank.0.insert("rank".into(), json!(1));
        collection
            .create(with_rank, CreateOptions { synced: true, use_record_id: true })
            .await
            .unwrap();
        let mut without_rank = Record::new();
        without_rank.set_id("no-rank");
        collection
            .create(without_rank, CreateOptions { synced: true, use_record_id: true })
            .await
            .unwrap();

        let ascending = collection
            .list(
                ListQuery { filters: HashMap::new(), order: Some("rank".to_string()) },
                ListOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(
            ascending.iter().map(|r| r.id().unwrap()).collect::<Vec<_>>(),
            vec!["has-rank", "no-rank"]
        );

        let descending = collection
            .list(
                ListQuery { filters: HashMap::new(), order: Some("-rank".to_string()) },
                ListOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(
            descending.iter().map(|r| r.id().unwrap()).collect::<Vec<_>>(),
            vec!["has-rank", "no-rank"]
        );
    }

    // --- End-to-end scenarios -----------------------------------------

    #[tokio::test]
    async fn first_time_sync_of_empty_local_store() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(json_response(
            200,
            &[("ETag", "\"100\"")],
            json!({ "data": [{ "id": "a", "v": 1, "last_modified": 100 }] }),
        ));
        // push: nothing local to sync.
        let collection = collection("b", "e2e-first-sync", transport);
        let result = collection.sync(SyncOptions::default()).await.unwrap();
        assert!(result.ok());
        assert_eq!(result.last_modified, Some(100));
        assert_eq!(result.created.len(), 1);
        let stored = collection.get("a", GetOptions::default()).await.unwrap();
        assert_eq!(stored.data.status(), Some(Status::Synced));
        assert_eq!(stored.data.last_modified(), Some(100));
    }

    #[tokio::test]
    async fn manual_strategy_surfaces_conflict_and_does_not_advance_timestamp() {
        let transport = Arc::new(MockTransport::new());
        let collection = collection("b", "e2e-manual-conflict", transport.clone());
        let mut local = Record::new();
        local.set_id("a");
        local.0.insert("v".into(), json!(2));
        local.set_last_modified(100);
        collection
            .create(local, CreateOptions { synced: true, use_record_id: true })
            .await
            .unwrap();
        let mut updated = collection.get("a", GetOptions::default()).await.unwrap().data;
        updated.0.insert("v".into(), json!(2));
        collection.update(updated, UpdateOptions::default()).await.unwrap();
        collection.adapter.save_last_modified(Some(100)).await.unwrap();

        transport.push_response(json_response(
            200,
            &[("ETag", "\"150\"")],
            json!({ "data": [{ "id": "a", "v": 3, "last_modified": 150 }] }),
        ));

        let result = collection
            .sync(SyncOptions {
                strategy: Strategy::Manual,
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(!result.ok());
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(
            collection.adapter.get_last_modified().await.unwrap(),
            Some(100)
        );
    }

    #[tokio::test]
    async fn server_wins_resolves_conflict_with_remote_data() {
        let transport = Arc::new(MockTransport::new());
        let collection = collection("b", "e2e-server-wins", transport.clone());
        let mut local = Record::new();
        local.set_id("a");
        collection
            .create(local.clone(), CreateOptions { synced: true, use_record_id: true })
            .await
            .unwrap();
        local.0.insert("v".into(), json!(2));
        collection.update(local, UpdateOptions::default()).await.unwrap();
        collection.adapter.save_last_modified(Some(100)).await.unwrap();

        transport.push_response(json_response(
            200,
            &[("ETag", "\"150\"")],
            json!({ "data": [{ "id": "a", "v": 3, "last_modified": 150 }] }),
        ));

        let result = collection
            .sync(SyncOptions {
                strategy: Strategy::ServerWins,
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(result.ok());
        assert_eq!(result.resolved.len(), 1);
        let stored = collection.get("a", GetOptions::default()).await.unwrap().data;
        assert_eq!(stored.get("v"), Some(&json!(3)));
        assert_eq!(stored.status(), Some(Status::Synced));
        assert_eq!(
            collection.adapter.get_last_modified().await.unwrap(),
            Some(150)
        );
    }

    #[tokio::test]
    async fn backoff_gate_blocks_sync_until_ignored() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(json_response(200, &[("Backoff", "60")], json!({ "data": [] })));
        let collection = collection("b", "e2e-backoff", transport.clone());
        let first = collection.sync(SyncOptions::default()).await;
        assert!(first.is_ok());

        let second = collection.sync(SyncOptions::default()).await;
        assert!(matches!(second, Err(Error::Backoff(_))));

        transport.push_response(json_response(200, &[], json!({ "data": [] })));
        let third = collection
            .sync(SyncOptions {
                ignore_backoff: true,
                ..Default::default()
            })
            .await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn client_wins_republishes_local_data_after_resolving() {
        let transport = Arc::new(MockTransport::new());
        let collection = collection("b", "e2e-client-wins", transport.clone());
        let mut local = Record::new();
        local.set_id("a");
        local.0.insert("v".into(), json!(2));
        collection
            .create(local.clone(), CreateOptions { synced: true, use_record_id: true })
            .await
            .unwrap();
        local.0.insert("v".into(), json!(2));
        collection.update(local, UpdateOptions::default()).await.unwrap();
        collection.adapter.save_last_modified(Some(100)).await.unwrap();

        // 1. pull sees the remote's v=3 and conflicts with our v=2.
        transport.push_response(json_response(
            200,
            &[("ETag", "\"150\"")],
            json!({ "data": [{ "id": "a", "v": 3, "last_modified": 150 }] }),
        ));
        // 2. push fetches server settings before batching.
        transport.push_response(json_response(200, &[], json!({ "settings": {} })));
        // 3. push republishes our (resolved) v=2 body; server accepts it.
        transport.push_response(json_response(
            200,
            &[],
            json!({ "responses": [
                { "status": 200, "body": { "data": { "id": "a", "v": 2, "last_modified": 150 } } }
            ] }),
        ));
        // 4. second pull: nothing new.
        transport.push_response(crate::http::HttpResponse::new(304, Default::default(), vec![]));

        let result = collection
            .sync(SyncOptions {
                strategy: Strategy::ClientWins,
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(result.ok());
        assert_eq!(result.published.len(), 1);
        let stored = collection.get("a", GetOptions::default()).await.unwrap().data;
        assert_eq!(stored.get("v"), Some(&json!(2)));
        assert_eq!(stored.status(), Some(Status::Synced));
        assert_eq!(stored.last_modified(), Some(150));
    }

    #[tokio::test]
    async fn virtual_deletion_of_unsynced_record_sends_no_subrequest() {
        let transport = Arc::new(MockTransport::new());
        let collection = collection("b", "e2e-virtual-delete", transport.clone());
        let mut record = Record::new();
        record.set_id("b");
        collection
            .create(record, CreateOptions { synced: false, use_record_id: true })
            .await
            .unwrap();

        collection.delete("b", DeleteOptions::default()).await.unwrap();
        assert!(collection
            .get("b", GetOptions { include_deleted: true })
            .await
            .is_err());

        transport.push_response(json_response(200, &[("ETag", "\"1\"")], json!({ "data": [] })));
        let result = collection.sync(SyncOptions::default()).await.unwrap();

        assert!(result.ok());
        assert!(result.published.is_empty());
        // Only the pull's change-feed request was issued; no batch for "b".
        assert_eq!(transport.requests.lock().len(), 1);
    }

    use crate::transformer::Transformer;
    use async_trait::async_trait;

    struct RejectId(&'static str);

    #[async_trait]
    impl Transformer for RejectId {
        async fn encode(&self, record: Record) -> Result<Record> {
            Ok(record)
        }

        async fn decode(&self, record: Record) -> Result<Record> {
            if record.id() == Some(self.0) {
                Err(Error::Validation(format!("rejected {}", self.0)))
            } else {
                Ok(record)
            }
        }
    }

    #[tokio::test]
    async fn one_record_failing_decode_does_not_abort_the_rest_of_the_pull() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(json_response(
            200,
            &[("ETag", "\"1\"")],
            json!({ "data": [
                { "id": "good", "v": 1, "last_modified": 1 },
                { "id": "bad", "v": 2, "last_modified": 1 },
            ] }),
        ));
        let mut pipeline = crate::transformer::Pipeline::new();
        pipeline.register(Box::new(RejectId("bad")));
        let collection = collection("b", "e2e-decode-failure", transport)
            .with_pipeline(pipeline);

        let result = collection.sync(SyncOptions::default()).await.unwrap();

        assert!(!result.ok());
        assert_eq!(result.created.len(), 1);
        assert_eq!(result.created[0].id(), Some("good"));
        assert_eq!(result.errors.len(), 1);
        assert_eq!(
            result.errors[0].sent.as_ref().and_then(|r| r.id()),
            Some("bad")
        );
        assert!(collection
            .get("good", GetOptions::default())
            .await
            .is_ok());
    }
}
