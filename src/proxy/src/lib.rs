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

//! A host-local proxy for the [EC2 instance metadata service].
//!
//! The proxy stands between containers and the real metadata endpoint. For
//! the one path that serves IAM credentials
//! (`/<api-version>/meta-data/iam/security-credentials/...`) it substitutes
//! short-lived, per-container credentials obtained via STS `AssumeRole`;
//! every other metadata path is forwarded to the real service untouched.
//!
//! Containers are identified by their network address through a pluggable
//! [`ContainerBackend`](backend::ContainerBackend). Each container may name
//! its own IAM role and an optional inline session policy; containers that
//! name neither fall back to the proxy-wide defaults. Because the responses
//! use the exact wire format of the real metadata service, unmodified AWS
//! SDK clients inside the containers keep working while only ever seeing
//! least-privilege credentials scoped to their workload.
//!
//! The building blocks, leaf to root:
//!
//! - [`arn::RoleArn`]: parsed, validated IAM role identifier.
//! - [`credentials::Credentials`]: one issued credential bundle with its
//!   expiry rules.
//! - [`provider::CredentialsProvider`]: the cache and issuance engine.
//! - [`proxy::MetadataProxy`]: the HTTP surface, served with
//!   [`proxy::router`].
//!
//! [EC2 instance metadata service]: https://docs.aws.amazon.com/AWSEC2/latest/UserGuide/ec2-instance-metadata.html

pub mod arn;
pub mod backend;
pub mod credentials;
mod errors;
pub mod provider;
pub mod proxy;
pub mod session;

pub use errors::Error;

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
