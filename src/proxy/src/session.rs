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

//! Role session names for the `AssumeRole` call.

/// STS rejects session names longer than this.
const MAX_SESSION_NAME_LEN: usize = 32;

/// Derives the role session name for a container.
///
/// The name is `<backend-type>-<container-id>`, with every character outside
/// the STS charset `[A-Za-z0-9_+=,.@-]` replaced by `_`, cut to the first
/// 32 characters. The session name shows up in CloudTrail, which makes the
/// credential use traceable back to the container.
pub fn session_name(backend_type: &str, container_id: &str) -> String {
    format!("{backend_type}-{container_id}")
        .chars()
        .map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '_' | '+' | '=' | ',' | '.' | '@' | '-' => c,
            _ => '_',
        })
        .take(MAX_SESSION_NAME_LEN)
        .collect()
}
