/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Client configuration and the endpoint builder.

use crate::error::{Error, Result};
use url::Url;

/// The only protocol version this core speaks. Construction rejects any
/// other version tag found in the base URL's trailing path segment.
pub const SUPPORTED_VERSION: &str = "v1";

/// Configuration for a [`crate::remote::RemoteClient`]. The base URL must end
/// in the supported version segment, e.g. `https://example.org/v1`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    base_url: Url,
}

impl ClientConfig {
    pub fn new(server_url: &str) -> Result<Self> {
        if server_url.trim().is_empty() {
            return Err(Error::Config("server URL must not be empty".into()));
        }
        let mut base_url = Url::parse(server_url)?;
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }
        let version = base_url
            .path_segments()
            .and_then(|mut segments| segments.next_back().filter(|s| !s.is_empty()))
            .ok_or_else(|| Error::Config("server URL has no version segment".into()))?
            .to_string();
        if version != SUPPORTED_VERSION {
            return Err(Error::Config(format!(
                "unsupported protocol version {version:?}, expected {SUPPORTED_VERSION:?}"
            )));
        }
        Ok(Self { base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            base_url: self.base_url.clone(),
        }
    }
}

/// Builds request paths relative to `/vN`, or full URLs when `full_url` is
/// true (the default every caller should use unless composing a path for
/// display or logging).
#[derive(Debug, Clone)]
pub struct Endpoints {
    base_url: Url,
}

impl Endpoints {
    fn resolve(&self, relative: &str, full_url: bool) -> String {
        if full_url {
            self.base_url
                .join(relative.trim_start_matches('/'))
                .expect("endpoint paths are always valid relative URLs")
                .to_string()
        } else {
            format!("/{}/{}", SUPPORTED_VERSION, relative.trim_start_matches('/'))
        }
    }

    pub fn root(&self, full_url: bool) -> String {
        if full_url {
            self.base_url.to_string()
        } else {
            format!("/{SUPPORTED_VERSION}/")
        }
    }

    pub fn batch(&self, full_url: bool) -> String {
        self.resolve("batch", full_url)
    }

    pub fn bucket(&self, bucket: &str, full_url: bool) -> String {
        self.resolve(&format!("buckets/{bucket}"), full_url)
    }

    pub fn collection(&self, bucket: &str, collection: &str, full_url: bool) -> String {
        self.resolve(
            &format!("buckets/{bucket}/collections/{collection}"),
            full_url,
        )
    }

    pub fn records(&self, bucket: &str, collection: &str, full_url: bool) -> String {
        self.resolve(
            &format!("buckets/{bucket}/collections/{collection}/records"),
            full_url,
        )
    }

    pub fn record(&self, bucket: &str, collection: &str, id: &str, full_url: bool) -> String {
        self.resolve(
            &format!("buckets/{bucket}/collections/{collection}/records/{id}"),
            full_url,
        )
    }
}
