mod config;

use anyhow::Result;
use config::ServerConfig;
use sshmux_pool::Pool;
use sshmux_protocol::Dispatcher;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{self, EnvFilter};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("sshmux-mcp-server {VERSION}");
        return Ok(());
    }
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let mut config = ServerConfig::from_env();
    if let Some(idx) = args.iter().position(|a| a == "--config") {
        let path = args
            .get(idx + 1)
            .ok_or_else(|| anyhow::anyhow!("--config requires a file path"))?;
        config = config.merge_toml_file(path)?;
    }
    if args.iter().any(|a| a == "--debug") {
        config.debug = true;
    }

    // All logging goes to stderr — stdout is the MCP JSON-RPC transport.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!(
        max_connections = config.max_connections,
        health_check_interval_secs = config.health_check_interval_secs,
        debug = config.debug,
        "sshmux-mcp-server v{VERSION} starting"
    );

    let pool = Pool::new(
        config.max_connections,
        Duration::from_secs(config.health_check_interval_secs),
    );
    pool.start().await;

    let dispatcher = Dispatcher::new(pool.clone(), config.server_name.clone(), config.debug);

    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(stdin).lines();

    tracing::info!("sshmux-mcp-server running on stdio");

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = dispatcher.handle_line(&line).await;
        let mut text = serde_json::to_string(&response).unwrap_or_else(|_| "{}".to_string());
        text.push('\n');
        stdout.write_all(text.as_bytes()).await?;
        stdout.flush().await?;
    }

    tracing::info!(requests = dispatcher.request_count(), "sshmux-mcp-server shutting down");
    pool.stop().await;
    Ok(())
}

fn print_help() {
    println!("sshmux-mcp-server {VERSION}");
    println!("SSH connection-multiplexing MCP server\n");
    println!("USAGE: sshmux-mcp-server [OPTIONS]\n");
    println!("OPTIONS:");
    println!("  -h, --help             Print help");
    println!("  -V, --version          Print version");
    println!("  --config <file>        Load a TOML config file, overlaid on environment variables");
    println!("  --debug                Force verbose error messages in RPC responses");
    println!("\nENVIRONMENT:");
    println!("  SSH_MCP_MAX_CONNECTIONS           Connection pool capacity (default 10)");
    println!("  SSH_MCP_HEALTH_CHECK_INTERVAL     Monitor interval in seconds (default 60)");
    println!("  SSH_MCP_RECONNECT_ATTEMPTS        Max reconnect attempts (default 3)");
    println!("  SSH_MCP_RECONNECT_DELAY           Base reconnect delay in seconds (default 5)");
    println!("  SSH_MCP_DEBUG                     Force verbose error messages (true/false)");
    println!("  SSH_MCP_LOG_LEVEL                 tracing-subscriber filter (default info)");
    println!("  SSH_MCP_SERVER_NAME               Name reported to MCP clients");
    println!("  SSH_MCP_ALLOWED_AUTH_METHODS      Comma-separated subset of key,password,agent");
    println!("\nCommunicates via JSON-RPC over stdio (MCP transport).");
    println!("Configure in your MCP client as:");
    println!("  {{ \"command\": \"sshmux-mcp-server\", \"args\": [] }}");
}
