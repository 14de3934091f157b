/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Pluggable identifier schema. Default is RFC 4122 version-4 UUIDs.

use uuid::Uuid;

/// Generates and validates record identifiers.
///
/// Implementations must be `Send + Sync`: the collection may call `validate`
/// concurrently from multiple in-flight imports.
pub trait IdSchema: Send + Sync {
    fn generate(&self) -> String;
    fn validate(&self, id: &str) -> bool;
}

/// Default schema: RFC 4122 version-4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIdSchema;

impl IdSchema for UuidIdSchema {
    fn generate(&self) -> String {
        Uuid::new_v4().to_string()
    }

    fn validate(&self, id: &str) -> bool {
        Uuid::parse_str(id).is_ok()
    }
}
