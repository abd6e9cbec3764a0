//! pubmarine-demo: drives a pubmarine server through the scripted sequence.
//!
//! Defines a schema, instantiates it, subscribes to the new instance and
//! mutates it, then prints pushed updates until Ctrl-C.
//!
//! ## Usage
//!
//! ```bash
//! # Connect to localhost (default)
//! pubmarine-demo
//!
//! # Connect to a remote server
//! pubmarine-demo --url ws://server.example.com:10209
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use pubmarine_client::telemetry::init_tracing;
use pubmarine_client::{Client, ClientConfig};

/// Pubmarine demo client
#[derive(Parser, Debug)]
#[command(name = "pubmarine-demo")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket endpoint URL (overrides PUBMARINE_URL)
    #[arg(long)]
    url: Option<String>,

    /// Schema id to define and instantiate
    #[arg(long, default_value = "test")]
    schema_id: String,

    /// Reply deadline in milliseconds (0 disables)
    #[arg(long)]
    request_timeout_ms: Option<u64>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,

    /// Exit after the scripted sequence instead of waiting for pushes
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ClientConfig::from_env();
    if let Some(url) = args.url {
        config.url = url;
    }
    if let Some(ms) = args.request_timeout_ms {
        config.request_timeout = (ms > 0).then(|| std::time::Duration::from_millis(ms));
    }
    config.telemetry.json_logs |= args.json_logs;
    config.validate().context("invalid configuration")?;

    init_tracing(&config.telemetry)?;

    info!(url = %config.url, "Connecting");
    let (client, task) = Client::connect(&config)
        .await
        .with_context(|| format!("failed to connect to {}", config.url))?;
    client.opened().await?;

    let mut pushes = client.unsolicited().await;
    run_sequence(&client, &args.schema_id).await?;

    if !args.once {
        info!("Waiting for updates (Ctrl-C to exit)");
        loop {
            tokio::select! {
                push = pushes.recv() => match push {
                    Ok(envelope) => {
                        println!("{}", serde_json::to_string(&envelope)?);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Fell behind on pushed updates");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }
    }

    client.close().await?;
    let _ = task.await;
    Ok(())
}

/// schema-set, then inst; once the instance exists, sub and mut.
async fn run_sequence(client: &Client, schema_id: &str) -> Result<()> {
    client
        .notify(
            "schema-set",
            json!({
                "SchemaId": schema_id,
                "Schema": { "Fields": { "A": 1, "B": 1 } }
            }),
        )
        .await?;

    let reply = client
        .call("inst", json!({ "SchemaId": schema_id }))
        .await
        .context("instantiate request failed")?;

    if reply.is_error() {
        bail!(
            "server rejected inst: {}",
            reply.error.as_deref().unwrap_or_default()
        );
    }

    let Some(instance_id) = reply.msg["InstanceId"].as_str() else {
        bail!("inst reply carried no InstanceId: {}", reply.msg);
    };
    info!(instance_id = instance_id, "Instance created");

    client.notify("sub", json!({ "Id": instance_id })).await?;
    client
        .notify(
            "mut",
            json!({
                "Id": instance_id,
                "Change": { "A": 40 }
            }),
        )
        .await?;

    Ok(())
}
