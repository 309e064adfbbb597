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

//! The credential cache and issuance engine.

use crate::arn::RoleArn;
use crate::backend::{ContainerBackend, ContainerInfo};
use crate::credentials::Credentials;
use crate::session::session_name;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use time::OffsetDateTime;
use tokio::sync::Mutex;

/// STS caps chained sessions at one hour; we always ask for the maximum.
const ASSUME_ROLE_DURATION_SECS: i32 = 3600;

/// How long past its expiration a cached credential may still be served.
const CREDENTIAL_GRACE: Duration = Duration::from_secs(5 * 60);

/// Issues temporary credentials for a role.
///
/// The one production implementation is [StsIssuer]; the seam exists so the
/// cache logic can be tested without AWS.
#[async_trait::async_trait]
pub trait CredentialIssuer: std::fmt::Debug + Send + Sync {
    /// Exchanges a role (and optional inline session policy) for temporary
    /// credentials under the given session name.
    async fn assume_role(
        &self,
        role: RoleArn,
        policy: Option<String>,
        session_name: String,
    ) -> Result<Credentials>;
}

/// [CredentialIssuer] backed by STS `AssumeRole`.
#[derive(Debug)]
pub struct StsIssuer {
    client: aws_sdk_sts::Client,
}

impl StsIssuer {
    pub fn new(client: aws_sdk_sts::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl CredentialIssuer for StsIssuer {
    async fn assume_role(
        &self,
        role: RoleArn,
        policy: Option<String>,
        session_name: String,
    ) -> Result<Credentials> {
        let request = self
            .client
            .assume_role()
            .duration_seconds(ASSUME_ROLE_DURATION_SECS)
            .role_arn(role.to_string())
            .role_session_name(session_name)
            .set_policy(policy);

        let response = request
            .send()
            .await
            .map_err(|e| Error::AssumeRole(e.into()))?;
        let issued = response
            .credentials
            .ok_or_else(|| Error::AssumeRole("STS response carried no credentials".into()))?;
        let expiration = SystemTime::try_from(issued.expiration)
            .map_err(|e| Error::AssumeRole(e.into()))?;

        Ok(Credentials {
            access_key: issued.access_key_id,
            secret_key: issued.secret_access_key,
            token: issued.session_token,
            expiration: OffsetDateTime::from(expiration),
            generated_at: OffsetDateTime::now_utc(),
            role_arn: role,
        })
    }
}

/// One cache slot: the identity snapshot used for issuance plus the
/// credentials it produced. Replaced wholesale on refresh, never edited.
#[derive(Clone, Debug)]
struct CacheEntry {
    container: ContainerInfo,
    credentials: Credentials,
}

impl CacheEntry {
    /// An entry is usable only while the container still reports the same
    /// role and id, and the credentials have not been expired for longer
    /// than the grace window.
    fn is_valid(&self, current: &ContainerInfo) -> bool {
        self.container.iam_role == current.iam_role
            && self.container.id == current.id
            && !self.credentials.expires_in(CREDENTIAL_GRACE)
    }
}

/// Resolves caller addresses to valid temporary credentials.
///
/// All resolution is serialized behind one exclusive lock covering the
/// backend lookup, the cache check, and any upstream issuance call. That
/// bounds races on the cache at the cost of head-of-line blocking: a slow
/// `AssumeRole` stalls every other in-flight credential request. The
/// reference deployment makes the same tradeoff.
#[derive(Debug)]
pub struct CredentialsProvider {
    backend: Arc<dyn ContainerBackend>,
    issuer: Arc<dyn CredentialIssuer>,
    default_role: Option<RoleArn>,
    default_policy: Option<String>,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl CredentialsProvider {
    pub fn new(
        backend: Arc<dyn ContainerBackend>,
        issuer: Arc<dyn CredentialIssuer>,
        default_role: Option<RoleArn>,
        default_policy: Option<String>,
    ) -> Self {
        Self {
            backend,
            issuer,
            default_role,
            default_policy: default_policy.filter(|p| !p.is_empty()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns valid credentials for the container that owns `address`,
    /// issuing new ones only when the cached entry is missing or no longer
    /// usable. Lookup and issuance failures propagate without touching the
    /// cache, so a stale entry survives a failed refresh and the next call
    /// retries.
    pub async fn credentials_for_ip(&self, address: &str) -> Result<Credentials> {
        let mut cache = self.cache.lock().await;

        let container = self.backend.container_for_ip(address).await?;

        if let Some(entry) = cache.get(address) {
            if entry.is_valid(&container) {
                return Ok(entry.credentials.clone());
            }
        }

        let (role, policy) = self.effective_role_and_policy(&container)?;
        let name = session_name(self.backend.type_name(), &container.id);
        let credentials = self.issuer.assume_role(role, policy, name).await?;

        let entry = CacheEntry {
            container,
            credentials: credentials.clone(),
        };
        cache.insert(address.to_string(), entry);
        Ok(credentials)
    }

    /// Role precedence: the container's own role wins; otherwise the default
    /// role applies. The default policy is substituted only in that fallback
    /// case — a container-specified role with no policy of its own runs
    /// unrestricted, it never inherits the default policy.
    fn effective_role_and_policy(
        &self,
        container: &ContainerInfo,
    ) -> Result<(RoleArn, Option<String>)> {
        let container_policy = container.iam_policy.clone().filter(|p| !p.is_empty());
        let (role, policy) = match &container.iam_role {
            Some(role) => (Some(role.clone()), container_policy),
            None => (
                self.default_role.clone(),
                container_policy.or_else(|| self.default_policy.clone()),
            ),
        };
        let role = role.ok_or_else(|| Error::NoRoleForContainer(container.id.clone()))?;
        Ok((role, policy))
    }
}
