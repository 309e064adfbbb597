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

//! The HTTP surface of the proxy.
//!
//! One fallback handler sees every request. Paths matching
//! `/<api-version>/meta-data/iam/security-credentials/<subpath>` are served
//! with per-container credentials in the metadata service's own wire format;
//! everything else is forwarded to the real service with the inbound
//! headers, method, path and body.

use crate::provider::CredentialsProvider;
use crate::{Error, Result};
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use time::OffsetDateTime;

const CREDENTIALS_MARKER: &str = "/meta-data/iam/security-credentials/";
const TOKEN_PATH: &str = "/latest/api/token";
const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_TTL_SECONDS: &str = "300";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";

/// The generic bodies sent to callers on internal failures. Detail is
/// logged server-side only; nothing about the error crosses the trust
/// boundary.
const CREDENTIALS_ERROR_BODY: &str = "An unexpected error getting container role\n";
const UPSTREAM_ERROR_BODY: &str =
    "An unexpected error occurred communicating with the instance metadata service\n";

/// The document served on the credentials subpath, shaped exactly like the
/// real metadata service's response.
#[derive(serde::Serialize)]
#[serde(rename_all = "PascalCase")]
struct MetadataCredentialsDoc<'a> {
    code: &'a str,
    #[serde(with = "time::serde::rfc3339")]
    last_updated: OffsetDateTime,
    r#type: &'a str,
    access_key_id: &'a str,
    secret_access_key: &'a str,
    token: &'a str,
    #[serde(with = "time::serde::rfc3339")]
    expiration: OffsetDateTime,
}

/// The proxy state shared across requests.
#[derive(Debug)]
pub struct MetadataProxy {
    provider: CredentialsProvider,
    metadata_url: String,
    http: reqwest::Client,
}

impl MetadataProxy {
    /// Creates a proxy in front of the real metadata service at
    /// `metadata_url` (no trailing slash required).
    pub fn new(provider: CredentialsProvider, metadata_url: impl Into<String>) -> Self {
        let metadata_url = metadata_url.into().trim_end_matches('/').to_string();
        Self {
            provider,
            metadata_url,
            http: reqwest::Client::new(),
        }
    }

    /// Acquires a short-lived IMDSv2 session token from the real service.
    ///
    /// A non-200 answer (an IMDSv1-only endpoint, say) yields an empty
    /// token and the upstream calls proceed without one; only transport
    /// failures are errors.
    async fn fetch_metadata_token(&self) -> Result<String> {
        let response = self
            .http
            .put(format!("{}{}", self.metadata_url, TOKEN_PATH))
            .header(TOKEN_TTL_HEADER, TOKEN_TTL_SECONDS)
            .send()
            .await
            .map_err(|e| Error::UpstreamProbe(e.into()))?;

        if response.status() != StatusCode::OK {
            return Ok(String::new());
        }
        response
            .text()
            .await
            .map_err(|e| Error::UpstreamProbe(e.into()))
    }
}

/// Builds the router. Serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()` so the handlers can
/// see the caller address.
pub fn router(proxy: MetadataProxy) -> axum::Router {
    axum::Router::new()
        .fallback(handle)
        .layer(middleware::from_fn(log_requests))
        .with_state(Arc::new(proxy))
}

/// Splits `/<api-version>/meta-data/iam/security-credentials/<subpath>` into
/// its api-version and subpath. The api-version is opaque and the subpath
/// may be empty; anything that does not match is a passthrough path.
fn match_credentials_path(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix('/')?;
    let i = rest.find(CREDENTIALS_MARKER)?;
    if i == 0 {
        return None;
    }
    Some((&rest[..i], &rest[i + CREDENTIALS_MARKER.len()..]))
}

/// The documented idiosyncrasy of the real service: a non-empty subpath is
/// accepted when it is exactly the role name, or the role name followed by
/// `/` and arbitrary trailing content (which is ignored).
fn subpath_matches_role(subpath: &str, role_name: &str) -> bool {
    match subpath.strip_prefix(role_name) {
        Some("") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

async fn handle(
    State(proxy): State<Arc<MetadataProxy>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let path = request.uri().path().to_string();
    match match_credentials_path(&path) {
        Some((api_version, subpath)) => {
            handle_credentials(&proxy, api_version, subpath, peer).await
        }
        None => passthrough(&proxy, request).await,
    }
}

async fn handle_credentials(
    proxy: &MetadataProxy,
    api_version: &str,
    subpath: &str,
    peer: SocketAddr,
) -> Response {
    // Probe the real service for this API version first, so versions it
    // does not support keep failing exactly as they would without the
    // proxy in between.
    let token = match proxy.fetch_metadata_token().await {
        Ok(token) => token,
        Err(e) => {
            tracing::error!(error = %e, "failed to fetch metadata session token");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let probe_url = format!(
        "{}/{}{}",
        proxy.metadata_url, api_version, CREDENTIALS_MARKER
    );
    let probe = proxy
        .http
        .get(probe_url)
        .header(TOKEN_HEADER, token.as_str())
        .send()
        .await;
    let probe = match probe {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(api_version, error = %e, "credentials probe failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if probe.status() != StatusCode::OK {
        return probe.status().into_response();
    }

    let client_ip = peer.ip().to_string();
    let credentials = match proxy.provider.credentials_for_ip(&client_ip).await {
        Ok(credentials) => credentials,
        Err(e) => {
            tracing::error!(client_ip = %client_ip, error = %e, "credential resolution failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, CREDENTIALS_ERROR_BODY).into_response();
        }
    };

    let role_name = credentials.role_arn.name();
    if subpath.is_empty() {
        return role_name.to_string().into_response();
    }
    if !subpath_matches_role(subpath, role_name) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let doc = MetadataCredentialsDoc {
        code: "Success",
        last_updated: credentials.generated_at,
        r#type: "AWS-HMAC",
        access_key_id: &credentials.access_key,
        secret_access_key: &credentials.secret_key,
        token: &credentials.token,
        expiration: credentials.expiration,
    };
    match serde_json::to_string(&doc) {
        Ok(body) => body.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize credentials document");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Replaces `dst` wholesale with `src`: every pre-existing value is
/// dropped first, nothing is merged.
fn copy_headers(dst: &mut HeaderMap, src: &HeaderMap) {
    dst.clear();
    for (name, value) in src {
        dst.append(name, value.clone());
    }
}

async fn passthrough(proxy: &MetadataProxy, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(error = %e, "failed to read passthrough request body");
            return (StatusCode::INTERNAL_SERVER_ERROR, UPSTREAM_ERROR_BODY).into_response();
        }
    };

    let url = format!("{}{}", proxy.metadata_url, parts.uri.path());
    let mut headers = HeaderMap::new();
    copy_headers(&mut headers, &parts.headers);
    // The client is talking to the real service now; its Host value comes
    // from the upstream URL.
    headers.remove(header::HOST);

    let upstream = proxy
        .http
        .request(parts.method, url)
        .headers(headers)
        .body(body)
        .send()
        .await;
    let upstream = match upstream {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(path = %parts.uri.path(), error = %e, "error forwarding to metadata service");
            return (StatusCode::INTERNAL_SERVER_ERROR, UPSTREAM_ERROR_BODY).into_response();
        }
    };

    let status = upstream.status();
    let upstream_headers = upstream.headers().clone();
    // The status and headers are already decided at this point; a body
    // relay failure is logged and the response goes out truncated.
    let body = match upstream.bytes().await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, "error relaying metadata service response body");
            Default::default()
        }
    };

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    copy_headers(response.headers_mut(), &upstream_headers);
    // Axum recomputes framing for the buffered body.
    response.headers_mut().remove(header::CONTENT_LENGTH);
    response.headers_mut().remove(header::TRANSFER_ENCODING);
    response
}

/// Access logging: caller, request line, status and timing on every
/// request, at the level of the original service's console log.
async fn log_requests(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = tokio::time::Instant::now();

    let response = next.run(request).await;

    tracing::info!(
        peer = %peer.ip(),
        %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed = ?start.elapsed(),
        "request"
    );
    response
}
