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

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The errors produced while resolving credentials or talking upstream.
///
/// Every error surfaces as a failure of the single request that triggered
/// it; there is no retry loop anywhere in this crate. The metadata client
/// inside the container is expected to retry per the usual SDK conventions.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The string does not match the role ARN grammar
    /// `arn:aws:iam::<account>:role/[<path>/]<name>`.
    #[error("invalid role ARN: {0:?}")]
    InvalidRoleArn(String),

    /// No running container currently owns the given address.
    #[error("no container found for IP {0}")]
    ContainerNotFound(String),

    /// The container backend failed while resolving an address.
    #[error("container backend lookup failed: {0}")]
    Backend(#[source] BoxError),

    /// Neither the container nor the proxy configuration names an IAM role.
    #[error("no IAM role for container {0} and no default role configured")]
    NoRoleForContainer(String),

    /// The upstream STS AssumeRole call failed.
    #[error("assume role failed: {0}")]
    AssumeRole(#[source] BoxError),

    /// The real metadata service could not be reached, or its session token
    /// could not be acquired.
    #[error("instance metadata service unreachable: {0}")]
    UpstreamProbe(#[source] BoxError),
}
