/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The record model: a JSON object with a handful of reserved fields, plus
//! whatever user data the caller put in it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Local-only lifecycle status of a record. Never sent to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Synced,
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Synced => "synced",
            Status::Created => "created",
            Status::Updated => "updated",
            Status::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// A record is a JSON object with reserved keys `id`, `_status`,
/// `last_modified` and (on incoming tombstones only) `deleted`. Every other
/// key is user data and is preserved verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record(pub Map<String, Value>);

pub const FIELD_ID: &str = "id";
pub const FIELD_STATUS: &str = "_status";
pub const FIELD_LAST_MODIFIED: &str = "last_modified";
pub const FIELD_DELETED: &str = "deleted";

impl Record {
    pub fn new() -> Self {
        Record(Map::new())
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get(FIELD_ID).and_then(Value::as_str)
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.0.insert(FIELD_ID.to_string(), Value::String(id.into()));
    }

    pub fn status(&self) -> Option<Status> {
        self.0
            .get(FIELD_STATUS)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set_status(&mut self, status: Status) {
        self.0.insert(
            FIELD_STATUS.to_string(),
            serde_json::to_value(status).expect("Status always serializes"),
        );
    }

    pub fn last_modified(&self) -> Option<i64> {
        self.0.get(FIELD_LAST_MODIFIED).and_then(Value::as_i64)
    }

    pub fn set_last_modified(&mut self, timestamp: i64) {
        self.0
            .insert(FIELD_LAST_MODIFIED.to_string(), Value::from(timestamp));
    }

    pub fn clear_last_modified(&mut self) {
        self.0.remove(FIELD_LAST_MODIFIED);
    }

    /// True iff this is a remote tombstone payload (`{ id, deleted: true, last_modified }`).
    pub fn is_tombstone(&self) -> bool {
        matches!(self.0.get(FIELD_DELETED), Some(Value::Bool(true)))
    }

    pub fn is_virtually_deleted(&self) -> bool {
        self.status() == Some(Status::Deleted)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Invariant 1: every persisted record has `id` and `_status`.
    pub fn has_required_fields(&self) -> bool {
        self.id().is_some() && self.status().is_some()
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}
