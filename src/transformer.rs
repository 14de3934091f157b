/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Ordered encode/decode pairs applied to records crossing the remote
//! boundary. Implemented as a sequential async fold: each step awaits the
//! previous step's result before starting, matching a chained `.then()`
//! combinator.

use crate::error::Result;
use crate::record::Record;
use async_trait::async_trait;

#[async_trait]
pub trait Transformer: Send + Sync {
    async fn encode(&self, record: Record) -> Result<Record>;
    async fn decode(&self, record: Record) -> Result<Record>;
}

/// Ordered list of transformers. Outgoing records run the list in
/// registration order; incoming records run it in reverse.
#[derive(Default)]
pub struct Pipeline {
    transformers: Vec<Box<dyn Transformer>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            transformers: Vec::new(),
        }
    }

    pub fn register(&mut self, transformer: Box<dyn Transformer>) {
        self.transformers.push(transformer);
    }

    /// Apply transformers in registration order (outgoing direction).
    pub async fn encode(&self, record: Record) -> Result<Record> {
        let mut current = record;
        for transformer in &self.transformers {
            current = transformer.encode(current).await?;
        }
        Ok(current)
    }

    /// Apply transformers in reverse registration order (incoming direction).
    /// Callers must bypass this entirely for deletion tombstones.
    pub async fn decode(&self, record: Record) -> Result<Record> {
        let mut current = record;
        for transformer in self.transformers.iter().rev() {
            current = transformer.decode(current).await?;
        }
        Ok(current)
    }
}
