//! gmail-mcp-rs: Gmail MCP server over stdio or streamable HTTP
//!
//! This server provides read/write access to Gmail mailboxes via the Model
//! Context Protocol (MCP). It composes MIME messages with attachments and
//! inline images, forwards messages with their parts, and exposes labels,
//! threads, drafts, filters and vacation settings.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading, CLI parsing and serving
//! - [`config`]: Environment-driven configuration for accounts and server settings
//! - [`errors`]: Application error model with MCP error mapping
//! - [`gmail`]: Gmail REST client and the `MailTransport` seam
//! - [`server`]: MCP tool handlers with validation and business orchestration
//! - [`models`]: Tool input DTOs and response envelope
//! - [`resources`]: Typed Gmail API resources
//! - [`codec`]: Base64 and base64url encoding helpers
//! - [`mime`]: Payload tree traversal (bodies, attachments, inline images)
//! - [`compose`]: RFC 5322 / MIME message builder
//! - [`attachments`]: Attachment source resolution and MIME type lookup
//! - [`forward`]: Forward assembly from an existing message

mod attachments;
mod codec;
mod compose;
mod config;
mod errors;
mod forward;
mod gmail;
mod mime;
mod models;
mod resources;
mod server;

use std::net::SocketAddr;

use clap::{Parser, ValueEnum};
use config::ServerConfig;
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::{StreamableHttpServerConfig, StreamableHttpService};
use server::GmailMcpServer;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    /// Serve a single client over stdin/stdout
    Stdio,
    /// Serve the streamable HTTP transport at `/mcp`
    Http,
}

#[derive(Debug, Parser)]
#[command(name = "gmail-mcp-rs", version, about = "Gmail MCP server")]
struct Cli {
    /// MCP transport
    #[arg(long, value_enum, default_value_t = Transport::Stdio)]
    transport: Transport,
    /// Listen address for the HTTP transport
    #[arg(long, default_value = "127.0.0.1:8787")]
    bind: SocketAddr,
}

/// Application entry point
///
/// Initializes tracing from environment, loads config, and serves the MCP
/// server. With the default `stdio` transport the process expects to be
/// spawned by an MCP client.
///
/// # Environment Variables
///
/// See [`ServerConfig::load_from_env`] for full configuration options.
///
/// # Example
///
/// ```no_run
/// GMAIL_MCP_DEFAULT_ACCESS_TOKEN=ya29.... \
/// GMAIL_MCP_WRITE_ENABLED=true \
/// cargo run -- --transport http --bind 127.0.0.1:8787
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load_from_env()?;
    info!(
        accounts = config.accounts.len(),
        write_enabled = config.write_enabled,
        "configuration loaded"
    );
    let server = GmailMcpServer::new(config)?;

    match cli.transport {
        Transport::Stdio => {
            let service = server.serve(stdio()).await?;
            service.waiting().await?;
        }
        Transport::Http => serve_http(server, cli.bind).await?,
    }
    Ok(())
}

/// Serve the streamable HTTP transport until Ctrl-C
async fn serve_http(
    server: GmailMcpServer,
    bind: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = StreamableHttpService::new(
        move || Ok(server.clone()),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig::default(),
    );
    let router = axum::Router::new().nest_service("/mcp", service);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
        signal.cancel();
    });

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "listening on http://{bind}/mcp");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled_owned().await })
        .await?;
    Ok(())
}
