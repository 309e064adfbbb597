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

//! End-to-end tests: a real proxy server in front of a fake metadata
//! service, with a fake credential issuer behind it.

use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, put};
use imds_proxy::arn::RoleArn;
use imds_proxy::backend::{ContainerInfo, StaticBackend};
use imds_proxy::credentials::Credentials;
use imds_proxy::provider::{CredentialIssuer, CredentialsProvider};
use imds_proxy::proxy::{MetadataProxy, router};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use time::macros::datetime;
use tokio::task::JoinHandle;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

const TEST_ROLE: &str = "arn:aws:iam::123456789012:role/test-role-name";
const EXPIRATION: OffsetDateTime = datetime!(2030-01-01 00:00:00 UTC);

/// Issues a fixed credential bundle and counts how often it was asked.
#[derive(Clone, Debug)]
struct FakeIssuer {
    calls: Arc<AtomicUsize>,
}

impl FakeIssuer {
    fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CredentialIssuer for FakeIssuer {
    async fn assume_role(
        &self,
        role: RoleArn,
        _policy: Option<String>,
        _session_name: String,
    ) -> imds_proxy::Result<Credentials> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Credentials {
            access_key: "AKIAFAKE".to_string(),
            secret_key: "fake-secret".to_string(),
            token: "fake-token".to_string(),
            expiration: EXPIRATION,
            generated_at: EXPIRATION - Duration::from_secs(3600),
            role_arn: role,
        })
    }
}

/// A stand-in for the real metadata service: the IMDSv2 token endpoint, the
/// security-credentials listing (succeeding only with the token attached),
/// and a couple of plain metadata paths for the passthrough tests.
async fn start_upstream(probe_status: StatusCode) -> Result<(String, JoinHandle<()>)> {
    let app = axum::Router::new()
        .route("/latest/api/token", put(|| async { "test-mds-token" }))
        .route(
            "/{version}/meta-data/iam/security-credentials/",
            get(move |headers: HeaderMap| async move {
                let token = headers
                    .get("x-aws-ec2-metadata-token")
                    .and_then(|v| v.to_str().ok());
                if token != Some("test-mds-token") {
                    return StatusCode::UNAUTHORIZED;
                }
                probe_status
            }),
        )
        .route("/echo-headers", get(echo_headers))
        .route(
            "/missing",
            get(|| async { (StatusCode::NOT_FOUND, "nope") }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server = tokio::spawn(async {
        axum::serve(listener, app).await.unwrap();
    });
    Ok((format!("http://{addr}"), server))
}

/// A metadata service without IMDSv2: the token endpoint does not exist and
/// the security-credentials listing succeeds without a token.
async fn start_v1_upstream() -> Result<(String, JoinHandle<()>)> {
    let app = axum::Router::new()
        .route(
            "/latest/api/token",
            put(|| async { StatusCode::NOT_FOUND }),
        )
        .route(
            "/{version}/meta-data/iam/security-credentials/",
            get(|| async { StatusCode::OK }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server = tokio::spawn(async {
        axum::serve(listener, app).await.unwrap();
    });
    Ok((format!("http://{addr}"), server))
}

/// A base URL nothing listens on: the listener is bound to reserve a port
/// and dropped before the URL is used.
async fn unreachable_upstream() -> Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("http://{addr}"))
}

async fn echo_headers(headers: HeaderMap) -> impl axum::response::IntoResponse {
    let mut map = serde_json::Map::new();
    for name in headers.keys() {
        let values: Vec<serde_json::Value> = headers
            .get_all(name)
            .iter()
            .map(|v| v.to_str().unwrap_or_default().into())
            .collect();
        map.insert(name.to_string(), values.into());
    }
    (
        [("x-upstream", "yes")],
        axum::Json(serde_json::Value::Object(map)),
    )
}

async fn start_proxy(proxy: MetadataProxy) -> Result<(String, JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = router(proxy).into_make_service_with_connect_info::<SocketAddr>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Ok((format!("http://{addr}"), server))
}

fn backend_for_role(role: &str) -> StaticBackend {
    StaticBackend::new(HashMap::from([(
        "127.0.0.1".to_string(),
        ContainerInfo {
            id: "8e33f2f0a4b1".to_string(),
            name: "web-1".to_string(),
            iam_role: Some(RoleArn::parse(role).unwrap()),
            iam_policy: None,
        },
    )]))
}

fn proxy_for(upstream: &str, backend: StaticBackend, issuer: FakeIssuer) -> MetadataProxy {
    let provider =
        CredentialsProvider::new(Arc::new(backend), Arc::new(issuer), None, None);
    MetadataProxy::new(provider, upstream)
}

#[tokio::test]
async fn empty_subpath_serves_role_name() -> Result<()> {
    let (upstream, _upstream_server) = start_upstream(StatusCode::OK).await?;
    let issuer = FakeIssuer::new();
    let proxy = proxy_for(&upstream, backend_for_role(TEST_ROLE), issuer);
    let (base, _server) = start_proxy(proxy).await?;

    let response = reqwest::get(format!(
        "{base}/latest/meta-data/iam/security-credentials/"
    ))
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await?, "test-role-name");
    Ok(())
}

#[tokio::test]
async fn role_subpath_serves_credentials_document() -> Result<()> {
    // The role carries a path; only the role *name* participates in the
    // subpath check, and trailing segments after the name are ignored.
    let (upstream, _upstream_server) = start_upstream(StatusCode::OK).await?;
    let issuer = FakeIssuer::new();
    let proxy = proxy_for(
        &upstream,
        backend_for_role("arn:aws:iam::123456789012:role/p/test-role-name"),
        issuer,
    );
    let (base, _server) = start_proxy(proxy).await?;

    let response = reqwest::get(format!(
        "{base}/latest/meta-data/iam/security-credentials/test-role-name/anything"
    ))
    .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let doc: serde_json::Value = response.json().await?;
    assert_eq!(doc["Code"], "Success");
    assert_eq!(doc["Type"], "AWS-HMAC");
    assert_eq!(doc["AccessKeyId"], "AKIAFAKE");
    assert_eq!(doc["SecretAccessKey"], "fake-secret");
    assert_eq!(doc["Token"], "fake-token");
    assert_eq!(doc["Expiration"], "2030-01-01T00:00:00Z");
    assert_eq!(doc["LastUpdated"], "2029-12-31T23:00:00Z");
    Ok(())
}

#[tokio::test]
async fn wrong_subpath_is_not_found() -> Result<()> {
    let (upstream, _upstream_server) = start_upstream(StatusCode::OK).await?;
    let issuer = FakeIssuer::new();
    let proxy = proxy_for(&upstream, backend_for_role(TEST_ROLE), issuer);
    let (base, _server) = start_proxy(proxy).await?;

    let response = reqwest::get(format!(
        "{base}/latest/meta-data/iam/security-credentials/other-role"
    ))
    .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn repeated_requests_hit_the_cache() -> Result<()> {
    let (upstream, _upstream_server) = start_upstream(StatusCode::OK).await?;
    let issuer = FakeIssuer::new();
    let proxy = proxy_for(&upstream, backend_for_role(TEST_ROLE), issuer.clone());
    let (base, _server) = start_proxy(proxy).await?;

    let url = format!("{base}/latest/meta-data/iam/security-credentials/");
    assert_eq!(reqwest::get(&url).await?.status(), StatusCode::OK);
    assert_eq!(reqwest::get(&url).await?.status(), StatusCode::OK);
    assert_eq!(issuer.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn probe_status_is_mirrored_without_credential_lookup() -> Result<()> {
    let (upstream, _upstream_server) = start_upstream(StatusCode::FORBIDDEN).await?;
    let issuer = FakeIssuer::new();
    let proxy = proxy_for(&upstream, backend_for_role(TEST_ROLE), issuer.clone());
    let (base, _server) = start_proxy(proxy).await?;

    let response = reqwest::get(format!(
        "{base}/latest/meta-data/iam/security-credentials/"
    ))
    .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.text().await?, "");
    assert_eq!(issuer.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn unreachable_metadata_service_is_a_server_error() -> Result<()> {
    // A transport failure reaching the real service is not a mirrored
    // status; the request fails with 500 before any credential work.
    let upstream = unreachable_upstream().await?;
    let issuer = FakeIssuer::new();
    let proxy = proxy_for(&upstream, backend_for_role(TEST_ROLE), issuer.clone());
    let (base, _server) = start_proxy(proxy).await?;

    let response = reqwest::get(format!(
        "{base}/latest/meta-data/iam/security-credentials/"
    ))
    .await?;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(issuer.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn v1_only_metadata_service_still_serves_credentials() -> Result<()> {
    // An upstream without the IMDSv2 token endpoint answers the token PUT
    // with a non-200; the probe proceeds without a token and the request
    // succeeds.
    let (upstream, _upstream_server) = start_v1_upstream().await?;
    let issuer = FakeIssuer::new();
    let proxy = proxy_for(&upstream, backend_for_role(TEST_ROLE), issuer);
    let (base, _server) = start_proxy(proxy).await?;

    let response = reqwest::get(format!(
        "{base}/latest/meta-data/iam/security-credentials/"
    ))
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await?, "test-role-name");
    Ok(())
}

#[tokio::test]
async fn unknown_container_gets_generic_error() -> Result<()> {
    let (upstream, _upstream_server) = start_upstream(StatusCode::OK).await?;
    let issuer = FakeIssuer::new();
    let proxy = proxy_for(&upstream, StaticBackend::new(HashMap::new()), issuer);
    let (base, _server) = start_proxy(proxy).await?;

    let response = reqwest::get(format!(
        "{base}/latest/meta-data/iam/security-credentials/"
    ))
    .await?;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    // The body never carries internal error detail.
    assert_eq!(
        response.text().await?,
        "An unexpected error getting container role\n"
    );
    Ok(())
}

#[tokio::test]
async fn passthrough_forwards_headers_wholesale() -> Result<()> {
    let (upstream, _upstream_server) = start_upstream(StatusCode::OK).await?;
    let issuer = FakeIssuer::new();
    let proxy = proxy_for(&upstream, backend_for_role(TEST_ROLE), issuer);
    let (base, _server) = start_proxy(proxy).await?;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{base}/echo-headers"))
        .header("X-Custom", "a, b")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-upstream").map(|v| v.as_bytes()),
        Some(&b"yes"[..])
    );

    let headers: serde_json::Value = response.json().await?;
    // Exactly the inbound value, exactly once.
    assert_eq!(headers["x-custom"], serde_json::json!(["a, b"]));
    Ok(())
}

#[tokio::test]
async fn passthrough_relays_status_and_body_verbatim() -> Result<()> {
    let (upstream, _upstream_server) = start_upstream(StatusCode::OK).await?;
    let issuer = FakeIssuer::new();
    let proxy = proxy_for(&upstream, backend_for_role(TEST_ROLE), issuer);
    let (base, _server) = start_proxy(proxy).await?;

    let response = reqwest::get(format!("{base}/missing")).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.text().await?, "nope");
    Ok(())
}
