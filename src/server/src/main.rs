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

//! The imds-proxy daemon.
//!
//! Startup wires the pieces together: parse flags, configure logging,
//! construct the container backend named by the subcommand, build an STS
//! client from the ambient AWS configuration, and serve the proxy. All
//! startup failures propagate to the single fatal exit in [main]; request
//! handling never takes the process down.

use anyhow::Context;
use clap::{Parser, Subcommand};
use imds_proxy::arn::RoleArn;
use imds_proxy::backend::{ContainerBackend, StaticBackend};
use imds_proxy::provider::{CredentialsProvider, StsIssuer};
use imds_proxy::proxy::{MetadataProxy, router};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Per-container IAM credentials behind the EC2 instance metadata endpoint.
#[derive(Debug, Parser)]
#[command(name = "imds-proxy", version)]
struct Cli {
    /// ARN of the role to use if the container does not specify a role.
    #[arg(short = 'r', long, value_parser = RoleArn::parse)]
    default_iam_role: Option<RoleArn>,

    /// Default IAM policy to apply if the container does not provide a
    /// custom role or policy.
    #[arg(long)]
    default_iam_policy: Option<String>,

    /// URL of the real EC2 metadata service.
    #[arg(long, default_value = "http://169.254.169.254")]
    metadata_url: String,

    /// Interface and port to bind the server to.
    #[arg(short = 's', long = "server", default_value = "0.0.0.0:18000")]
    server_addr: SocketAddr,

    /// Enable verbose output.
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    backend: Backend,
}

#[derive(Debug, Subcommand)]
enum Backend {
    /// Serve container identities from a static mapping file.
    Static {
        /// Path to a JSON file mapping container IPs to identities.
        #[arg(long)]
        mapping_file: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "trace" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let backend: Arc<dyn ContainerBackend> = match &cli.backend {
        Backend::Static { mapping_file } => Arc::new(
            StaticBackend::from_file(mapping_file)
                .with_context(|| format!("loading mapping file {}", mapping_file.display()))?,
        ),
    };

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let issuer = Arc::new(StsIssuer::new(aws_sdk_sts::Client::new(&aws_config)));

    let provider = CredentialsProvider::new(
        backend,
        issuer,
        cli.default_iam_role,
        cli.default_iam_policy,
    );
    let proxy = MetadataProxy::new(provider, cli.metadata_url);

    let listener = tokio::net::TcpListener::bind(cli.server_addr)
        .await
        .with_context(|| format!("binding {}", cli.server_addr))?;
    tracing::info!(addr = %cli.server_addr, "listening");

    let app = router(proxy).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
