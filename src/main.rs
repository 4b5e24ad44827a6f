use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use taskrelay::config::LogLevel;
use taskrelay::{CommandClient, CommandServer, HandlerRegistry, ServerConfig, logging};
use tracing::info;

#[derive(Parser)]
#[command(name = "taskrelay")]
#[command(about = "TCP command relay for host-side operations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the command server with the built-in demo handlers
    Serve(ServeArgs),
    /// Send one command to a running server
    Send(SendArgs),
}

#[derive(Args, Serialize)]
struct ServeArgs {
    /// Configuration file (defaults to ./taskrelay.toml)
    #[serde(skip)]
    #[arg(long)]
    config: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    bind_address: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    json_logs: Option<bool>,
}

#[derive(Args)]
struct SendArgs {
    #[arg(long, default_value = "127.0.0.1:8052")]
    addr: SocketAddr,

    #[arg(long)]
    task: u64,

    /// 0 = fire-and-forget, 1 = input-only, 2 = request-reply
    #[arg(long)]
    task_type: i64,

    #[arg(long)]
    argument: Option<String>,

    /// Wait for one reply line and print it
    #[arg(long)]
    wait: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => run_server(args)
            .await
            .context("Failed to run command server")?,
        Commands::Send(args) => run_send(args).await.context("Failed to send command")?,
    }

    Ok(())
}

async fn run_server(args: ServeArgs) -> Result<()> {
    let config = ServerConfig::load(args.config.as_deref(), Some(&args))
        .context("Failed to load configuration")?;
    logging::init((&config).into()).context("Failed to initialize logging")?;

    let mut server = CommandServer::new(config, demo_registry());
    server.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");
    server.stop().await;

    Ok(())
}

async fn run_send(args: SendArgs) -> Result<()> {
    let mut client = CommandClient::connect(args.addr).await?;
    let line = serde_json::json!({
        "task": args.task,
        "taskType": args.task_type,
        "argument": args.argument,
    });
    client.send_raw(&line.to_string()).await?;

    if args.wait {
        match client.read_line().await? {
            Some(reply) => println!("{reply}"),
            None => println!("(connection closed without reply)"),
        }
    }
    client.shutdown().await?;

    Ok(())
}

/// Handlers exposed by `taskrelay serve`.
///
/// | kind | task | behaviour |
/// |------|------|-----------|
/// | 0    | 0    | log a ping |
/// | 1    | 0    | log the argument |
/// | 2    | 0    | echo the argument |
/// | 2    | 1    | uppercase the argument |
fn demo_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.push_action(|| info!("Ping"));
    registry.push_input_action(|text| info!(text, "Controller message"));
    registry.push_function(|arg| arg.to_string());
    registry.push_function(|arg| arg.to_uppercase());
    registry
}
