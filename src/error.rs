/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use serde::Deserialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The taxonomy of errors the core can raise.
///
/// Conflicts and per-record batch failures are never represented here: they
/// are data, carried in [`crate::result::SyncResult`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("no record with id {0:?}")]
    RecordNotFound(String),

    #[error("{op} failed: {source}")]
    Adapter {
        op: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("http error ({status}): {body}")]
    Http { status: u16, body: String },

    #[error("malformed server response: {0}")]
    Protocol(String),

    #[error("sync refused, server asked to back off for {0}s")]
    Backoff(u64),

    #[error("invalid client configuration: {0}")]
    Config(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    pub fn adapter(op: &'static str, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::Adapter {
            op,
            source: Box::new(source),
        }
    }
}

/// The minimal shape of a Kinto error body: `{ errno, message }`, plus
/// whatever else the server chose to include.
#[derive(Debug, Clone, Deserialize)]
pub struct KintoErrorBody {
    pub errno: i64,
    #[serde(default)]
    pub message: Option<String>,
}

/// Human description for a known Kinto `errno` code. Unknown codes return
/// `None`; callers fall back to the HTTP status.
pub fn errno_label(errno: i64) -> Option<&'static str> {
    Some(match errno {
        104 => "Missing Auth Token",
        107 => "Invalid Parameter",
        114 => "Resource Modified Meanwhile",
        115 => "Method Not Allowed",
        117 => "Too Many Requests",
        201 => "Service Unavailable",
        999 => "Internal Server Error",
        _ => return None,
    })
}
