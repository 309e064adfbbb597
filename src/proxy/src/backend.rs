// Copyright 2025 the imds-proxy authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The container-identity backend contract.
//!
//! A backend maps a caller network address to the workload that owns it.
//! Container-manager integrations (docker, flynn, ...) implement
//! [ContainerBackend] out of tree; this module ships the contract plus
//! [StaticBackend], which serves identities from a mapping file and is what
//! the tests and small deployments use.

use crate::arn::RoleArn;
use crate::{Error, Result};
use std::collections::HashMap;
use std::path::Path;

/// A point-in-time snapshot of a workload's identity.
///
/// Backends own the live view (and any internal polling caches); the proxy
/// core only ever holds one of these immutable copies per lookup.
#[derive(Clone, Debug, PartialEq)]
pub struct ContainerInfo {
    /// Opaque container id, stable for the container's lifetime.
    pub id: String,
    /// Display name, used in logs only.
    pub name: String,
    /// The role the container declared for itself, if any. `None` means
    /// "use the proxy-wide default role".
    pub iam_role: Option<RoleArn>,
    /// An inline session policy the container declared for itself, if any.
    pub iam_policy: Option<String>,
}

/// Resolves live workloads by network address.
///
/// Implementations own their synchronization and may resync internal state
/// during a lookup. Lookups must fail with [Error::ContainerNotFound] when no
/// workload currently owns the address, distinct from transport failures.
#[async_trait::async_trait]
pub trait ContainerBackend: std::fmt::Debug + Send + Sync {
    /// Resolves the container that owns `address`.
    async fn container_for_ip(&self, address: &str) -> Result<ContainerInfo>;

    /// A stable identifier for this backend type, used only as the
    /// namespace prefix of role session names.
    fn type_name(&self) -> &str;
}

/// The JSON shape of one mapping-file entry.
#[derive(Debug, serde::Deserialize)]
struct RawContainer {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    iam_role: Option<String>,
    #[serde(default)]
    iam_policy: Option<String>,
}

/// A [ContainerBackend] backed by a static address map.
///
/// The mapping file is a JSON object keyed by container IP:
///
/// ```json
/// {
///   "172.17.0.2": {
///     "id": "8e33f2f0a4b1",
///     "name": "web-1",
///     "iam_role": "arn:aws:iam::123456789012:role/web"
///   }
/// }
/// ```
///
/// `iam_role` and `iam_policy` are optional; an empty string counts as
/// absent.
#[derive(Debug)]
pub struct StaticBackend {
    containers: HashMap<String, ContainerInfo>,
}

impl StaticBackend {
    /// Creates a backend from an already-built map.
    pub fn new(containers: HashMap<String, ContainerInfo>) -> Self {
        Self { containers }
    }

    /// Loads and validates a mapping file.
    ///
    /// Role ARNs are parsed eagerly so a bad mapping fails at startup, not
    /// on the first request.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read(path.as_ref()).map_err(|e| Error::Backend(e.into()))?;
        let raw: HashMap<String, RawContainer> =
            serde_json::from_slice(&contents).map_err(|e| Error::Backend(e.into()))?;

        let mut containers = HashMap::with_capacity(raw.len());
        for (address, entry) in raw {
            let iam_role = entry
                .iam_role
                .filter(|r| !r.is_empty())
                .map(|r| RoleArn::parse(&r))
                .transpose()?;
            containers.insert(
                address,
                ContainerInfo {
                    id: entry.id,
                    name: entry.name,
                    iam_role,
                    iam_policy: entry.iam_policy.filter(|p| !p.is_empty()),
                },
            );
        }
        Ok(Self::new(containers))
    }
}

#[async_trait::async_trait]
impl ContainerBackend for StaticBackend {
    async fn container_for_ip(&self, address: &str) -> Result<ContainerInfo> {
        self.containers
            .get(address)
            .cloned()
            .ok_or_else(|| Error::ContainerNotFound(address.to_string()))
    }

    fn type_name(&self) -> &str {
        "static"
    }
}
