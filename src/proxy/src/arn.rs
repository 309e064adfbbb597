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

//! The [RoleArn] value type.

use crate::{Error, Result};

const ARN_PREFIX: &str = "arn:aws:iam::";
const ROLE_SEPARATOR: &str = ":role/";

/// A parsed and validated IAM role ARN.
///
/// Only [RoleArn::parse] produces values of this type, so holding one is
/// proof that the string matched `arn:aws:iam::<account>:role/[<path>/]<name>`.
/// The value is immutable; equality is structural on the raw string.
///
/// An "unspecified" role (the container did not declare one) is represented
/// as `Option<RoleArn>` by the callers, not as a sentinel value.
#[derive(Clone, Debug, Eq)]
pub struct RoleArn {
    raw: String,
    path: String,
    name: String,
    account_id: String,
}

impl RoleArn {
    /// Parses a role ARN such as `arn:aws:iam::123456789012:role/my-role`.
    ///
    /// The role may carry a path (`...:role/team/sub/my-role`); the path
    /// defaults to `/` when absent. Fails with [Error::InvalidRoleArn] for
    /// anything that does not match the grammar.
    pub fn parse(value: &str) -> Result<Self> {
        let invalid = || Error::InvalidRoleArn(value.to_string());

        let rest = value.strip_prefix(ARN_PREFIX).ok_or_else(invalid)?;
        let (account_id, resource) = rest.split_once(ROLE_SEPARATOR).ok_or_else(invalid)?;
        if account_id.is_empty() || !account_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if resource.is_empty() || resource.contains(':') {
            return Err(invalid());
        }

        // Split the resource at its last slash: everything before it is the
        // role path (kept with a trailing slash, as IAM renders it), the rest
        // is the role name. A slash at position zero or at the very end
        // cannot delimit a path, so the whole resource is the name then.
        let (path, name) = match resource.rfind('/') {
            Some(i) if i > 0 && i + 1 < resource.len() => {
                (format!("/{}", &resource[..=i]), &resource[i + 1..])
            }
            _ => ("/".to_string(), resource),
        };

        Ok(RoleArn {
            raw: value.to_string(),
            path,
            name: name.to_string(),
            account_id: account_id.to_string(),
        })
    }

    /// The role name, without the path.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The role path, `/` when the ARN carries none.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The twelve-digit account id.
    pub fn account_id(&self) -> &str {
        &self.account_id
    }
}

impl std::fmt::Display for RoleArn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for RoleArn {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}
