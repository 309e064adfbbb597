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

//! Temporary credential bundles and their expiry rules.

use crate::arn::RoleArn;
use std::time::Duration;
use time::OffsetDateTime;

/// One set of temporary credentials issued for a role.
///
/// Values are produced only by a successful `AssumeRole` call and are never
/// mutated afterwards; a refresh replaces the whole bundle.
#[derive(Clone, PartialEq)]
pub struct Credentials {
    /// The access key id.
    pub access_key: String,
    /// The secret access key.
    pub secret_key: String,
    /// The session token.
    pub token: String,
    /// The instant at which the credentials stop being accepted upstream.
    pub expiration: OffsetDateTime,
    /// When this bundle was issued.
    pub generated_at: OffsetDateTime,
    /// The role these credentials were issued for.
    pub role_arn: RoleArn,
}

impl Credentials {
    /// Reports whether the credentials are expired at `at`.
    pub fn expired_at(&self, at: OffsetDateTime) -> bool {
        at > self.expiration
    }

    /// Reports whether the credentials are expired right now.
    pub fn expired_now(&self) -> bool {
        self.expired_at(OffsetDateTime::now_utc())
    }

    /// Reports whether the credentials have already been expired for more
    /// than `d`.
    ///
    /// Note the direction: this is *not* "will expire within `d`". A
    /// credential one minute past its expiration still returns `false` for
    /// `expires_in(5 minutes)`. The cache validity check relies on exactly
    /// this reading; see the grace-window tests below.
    pub fn expires_in(&self, d: Duration) -> bool {
        self.expired_at(OffsetDateTime::now_utc() - d)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"[censored]")
            .field("token", &"[censored]")
            .field("expiration", &self.expiration)
            .field("generated_at", &self.generated_at)
            .field("role_arn", &self.role_arn)
            .finish()
    }
}
