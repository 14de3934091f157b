/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Server signalling: backoff windows and deprecation notices observed on
//! responses, delivered through a typed listener interface passed into the
//! remote client rather than a process-wide singleton.

use serde::{Deserialize, Serialize};

/// Deprecation notice parsed from an `Alert` response header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deprecation {
    pub message: String,
    pub url: String,
}

/// Receives backoff/deprecation signals observed on HTTP responses.
pub trait EventListener: Send + Sync {
    /// `release_at_ms` is the absolute epoch-millisecond timestamp at which
    /// the backoff lifts; 0 means "cleared".
    fn on_backoff(&self, _release_at_ms: i64) {}
    fn on_deprecated(&self, _notice: Deprecation) {}
}

/// A listener that ignores every signal. Used when a caller doesn't care.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl EventListener for NoopListener {}
