/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Aggregates per-sync outcomes.

use crate::error::{errno_label, KintoErrorBody};
use crate::record::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which side of a conflict is which.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictType {
    Incoming,
    Outgoing,
}

/// A tagged record pair surfaced when the core cannot reconcile a local and
/// remote edit automatically.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    pub kind: ConflictType,
    pub local: Record,
    pub remote: Option<Record>,
}

/// A single record-level failure observed while applying a batch subrequest
/// or importing a change.
#[derive(Debug, Clone)]
pub struct SyncError {
    pub path: Option<String>,
    pub sent: Option<Record>,
    pub status: u16,
    pub error: Value,
}

impl SyncError {
    /// A human description of `error`: the known label for its `errno` if
    /// the body decodes as a Kinto error shape, else the HTTP status.
    pub fn description(&self) -> String {
        match serde_json::from_value::<KintoErrorBody>(self.error.clone()) {
            Ok(body) => errno_label(body.errno)
                .map(str::to_string)
                .or(body.message)
                .unwrap_or_else(|| format!("HTTP {}", self.status)),
            Err(_) => format!("HTTP {}", self.status),
        }
    }
}

/// The outcome of one `sync()` invocation.
///
/// Invariant: `ok == (errors.is_empty() && conflicts.is_empty())`.
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    pub last_modified: Option<i64>,
    pub created: Vec<Record>,
    pub updated: Vec<Record>,
    pub deleted: Vec<Record>,
    pub published: Vec<Record>,
    pub conflicts: Vec<Conflict>,
    pub skipped: Vec<Record>,
    pub resolved: Vec<Record>,
    pub errors: Vec<SyncError>,
}

impl SyncResult {
    pub fn new(last_modified: Option<i64>) -> Self {
        Self {
            last_modified,
            ..Default::default()
        }
    }

    /// `ok == (errors.is_empty() && conflicts.is_empty())`, computed rather
    /// than stored so it can never drift from the lists it summarizes.
    pub fn ok(&self) -> bool {
        self.errors.is_empty() && self.conflicts.is_empty()
    }

    pub(crate) fn bump_last_modified(&mut self, candidate: i64) {
        self.last_modified = Some(match self.last_modified {
            Some(current) => current.max(candidate),
            None => candidate,
        });
    }
}
