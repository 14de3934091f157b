/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Strips local-only fields before a record crosses the wire.

use crate::record::{Record, FIELD_LAST_MODIFIED, FIELD_STATUS};

/// Returns a copy of `record` with `_status` and `last_modified` removed.
/// `id` (and every other field) is preserved verbatim.
pub fn clean(record: &Record) -> Record {
    let mut copy = record.clone();
    copy.0.remove(FIELD_STATUS);
    copy.0.remove(FIELD_LAST_MODIFIED);
    copy
}
