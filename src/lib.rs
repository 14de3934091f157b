/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! An offline-first synchronization client for Kinto-style REST collections:
//! local records carry a lifecycle status, a [`Collection`] reconciles them
//! against a remote server's change feed and batch endpoint, and conflicts
//! are either surfaced or resolved per a chosen [`Strategy`].

pub mod clean;
pub mod collection;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod id;
pub mod record;
pub mod remote;
pub mod result;
pub mod storage;
pub mod transformer;

pub use clean::clean;
pub use collection::{
    Collection, CreateOptions, DeleteOptions, GetOptions, ListOptions, ListQuery, RecordEnvelope,
    Strategy, SyncOptions, UpdateOptions,
};
pub use config::{ClientConfig, Endpoints, SUPPORTED_VERSION};
pub use error::{errno_label, Error, KintoErrorBody, Result};
pub use events::{Deprecation, EventListener, NoopListener};
pub use http::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};
pub use id::{IdSchema, UuidIdSchema};
pub use record::{Record, Status};
pub use remote::{BatchResult, ChangesResponse, RemoteClient, ServerSettings};
pub use result::{Conflict, ConflictType, SyncError, SyncResult};
pub use storage::{InMemoryAdapter, SqliteAdapter, StorageAdapter};
pub use transformer::{Pipeline, Transformer};
