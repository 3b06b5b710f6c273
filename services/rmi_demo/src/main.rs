//! RMI demo service - exposes a file workspace and drives it with a scripted client
//!
//! Usage:
//!   rmi_demo
//!   rmi_demo --config config/demo.toml --log-level debug
//!   rmi_demo --serve

mod workspace;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rmi_codec::{EVENT_CONNECTED, EVENT_ERROR};
use rmi_network::{ClientSocket, MemoryConnector, MemoryTransport};
use rmi_server::{per_connection, RmiServer, ServerConfig};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::workspace::Workspace;

const DEFAULT_CONFIG: &str = include_str!("../config/demo.toml");
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "rmi_demo")]
#[command(about = "Remote method invocation demo service")]
#[command(version)]
struct Args {
    /// Path to configuration file (defaults to the bundled demo config)
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,

    /// Keep serving after the scripted session until Ctrl+C
    #[arg(long)]
    serve: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    let config = match &args.config {
        Some(path) => ServerConfig::from_file(path).map_err(|e| {
            error!("Failed to load configuration: {}", e);
            e
        })?,
        None => ServerConfig::from_toml_str(DEFAULT_CONFIG)?,
    };

    info!(
        "Loaded configuration for {} ({} root actions)",
        config.server.name,
        config.actions.len()
    );

    let server = RmiServer::from_config(&config, per_connection(Workspace::new));
    let (listener, connector) = MemoryTransport::bind();

    let serving = server.clone();
    let server_handle = tokio::spawn(async move { serving.serve(listener).await });

    run_session(&connector).await?;
    info!("Scripted session finished; {} connection(s) open", server.connection_count());

    if args.serve {
        info!("Serving until Ctrl+C");
        tokio::signal::ctrl_c()
            .await
            .context("Failed to install CTRL+C signal handler")?;
        info!("Received shutdown signal");
    }

    drop(connector);
    server_handle.await.context("Server task failed")?;

    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("Invalid log level")?;

    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    Ok(())
}

/// Walk through every kind of call the workspace supports
async fn run_session(connector: &MemoryConnector) -> Result<()> {
    let mut client = connector.connect()?;

    let root = next_event(&mut client, EVENT_CONNECTED).await?;
    info!("Connected: {}", root);

    client.call("/ping", vec![]).await?;
    report("echo", client.call("/echo", vec![json!({"hello": "world"})]).await?);
    report("add", client.call("/add", vec![json!(2), json!(3)]).await?);

    let watcher = json!({"type": "remote-handler", "namespace": "/watcher", "events": ["changed"]});
    client.call("/watch", vec![watcher]).await?;

    let document = client.call("/open", vec![json!("notes.txt")]).await?;
    report("open", document.clone());
    let namespace = document["namespace"]
        .as_str()
        .context("open did not return an instance")?
        .to_string();

    client
        .call(&format!("{namespace}/write"), vec![json!("remember the milk")])
        .await?;
    let changed = next_event(&mut client, "/watcher/changed").await?;
    info!("Watcher notified: {}", changed);
    report("read", client.call(&format!("{namespace}/read"), vec![]).await?);

    let callback = json!({"type": "callback", "namespace": "", "id": 1});
    report("list", client.call("/list", vec![callback]).await?);
    info!("Listed: {}", next_event(&mut client, "/callback:1").await?);

    report("reject", client.call("/reject", vec![json!("read only")]).await?);

    let (slow, fast) = tokio::join!(
        client.call("/delay", vec![json!(50), json!("slow")]),
        client.call("/delay", vec![json!(5), json!("fast")]),
    );
    let (slow, fast) = (slow?, fast?);
    report("delay", json!([slow, fast]));

    client.disconnect();
    Ok(())
}

fn report(action: &str, reply: Value) {
    match rmi_codec::RmiError::from_reply(&reply) {
        Some(error) => warn!("{} failed: {}", action, error),
        None => info!("{} -> {}", action, reply),
    }
}

/// Wait for `name`, logging anything else that arrives first
async fn next_event(client: &mut ClientSocket, name: &str) -> Result<Value> {
    loop {
        let event = match tokio::time::timeout(EVENT_TIMEOUT, client.next_event()).await {
            Ok(Some(event)) => event,
            Ok(None) => bail!("Connection closed while waiting for {}", name),
            Err(_) => bail!("Timed out waiting for {}", name),
        };

        if event.name == EVENT_ERROR {
            bail!("Server reported a fatal error: {:?}", event.args);
        }
        if event.name == name {
            return Ok(event.args.into_iter().next().unwrap_or(Value::Null));
        }
        info!("Ignoring event {}", event.name);
    }
}
