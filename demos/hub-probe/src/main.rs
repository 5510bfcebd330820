//! Command-line client that joins a group and logs everything the hub pushes.
//!
//!   cargo run -p hubline-demo-probe -- --hub ws://localhost:8001/spin --group ABCD --caller u1
//!
//! With `--drop-after 10` the probe kills its own transport after ten seconds
//! so the reconnection path can be watched in the logs.

mod config;

use clap::Parser;
use config::ProbeConfig;
use hubline_client::{HubClient, LeaveHandle, ReconnectIndicator, WsTransport};
use hubline_core::{channels, rpc};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Parser)]
#[command(name = "hub-probe", about = "Join a hubline group and watch it")]
struct Cli {
    /// TOML file with [client] and [websocket] sections.
    #[arg(short, long, env = "HUB_PROBE_CONFIG")]
    config: Option<PathBuf>,

    /// Hub name or full ws:// address.
    #[arg(long, default_value = "ws://localhost:8001/spin")]
    hub: String,

    #[arg(short, long, default_value = "ABCD")]
    group: String,

    #[arg(long, default_value = "probe")]
    caller: String,

    /// Rounds to add after joining.
    #[arg(long, default_value = "0")]
    rounds: u32,

    /// Start the game after adding rounds.
    #[arg(long)]
    start: bool,

    /// Force a transport drop after this many seconds.
    #[arg(long)]
    drop_after: Option<u64>,
}

/// Logs the "reconnecting" state instead of drawing anything.
struct LogIndicator;

impl ReconnectIndicator for LogIndicator {
    fn show(&self, _leave: LeaveHandle) {
        tracing::warn!("Connection lost, reconnecting...");
    }

    fn dismiss(&self) {
        tracing::info!("Reconnection finished");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hub_probe=info,hubline_client=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ProbeConfig::load(cli.config.as_deref())?;

    let client = HubClient::with_config(WsTransport::new(config.websocket), config.client);
    client.set_indicator(LogIndicator);

    let lost = Arc::new(Notify::new());
    let notify = lost.clone();
    client.on_connection_lost(move |event| {
        tracing::error!(
            "Gave up on {} after {} attempts: {}",
            event.address,
            event.attempts,
            event.reason
        );
        notify.notify_one();
    });

    let session = client.connect_hub(&cli.hub).await?;
    tracing::info!("Connected to {} ({})", session.address, session.id);

    client.subscribe(channels::ERROR, |message: String| {
        tracing::error!("Hub error: {}", message)
    })?;
    client.subscribe(channels::STATE, |state: String| {
        tracing::info!("Group state: {}", state)
    })?;
    client.subscribe(channels::ITERATIONS, |count: u32| {
        tracing::info!("Rounds so far: {}", count)
    })?;

    client.join_group(&cli.group, &cli.caller).await?;
    match client.membership() {
        Some(membership) => tracing::info!(
            "Joined {} with {} members (host: {})",
            membership.group_key,
            membership.members,
            membership.is_host
        ),
        None => tracing::info!("Joined {}", cli.group),
    }

    for _ in 0..cli.rounds {
        let count = client
            .invoke(rpc::ADD_ROUND, vec![Value::String(cli.group.clone())])
            .await?;
        tracing::debug!("AddRound -> {}", count);
    }
    if cli.start {
        client.start_game(&cli.group).await?;
    }

    if let Some(secs) = cli.drop_after {
        let client = client.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            client.debug_force_disconnect().await;
        });
    }

    let mut phases = client.watch_phase();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            _ = lost.notified() => break,
            changed = phases.changed() => {
                if changed.is_err() {
                    break;
                }
                let phase = *phases.borrow_and_update();
                tracing::debug!("Phase: {:?}", phase);
            }
        }
    }

    let summary = json!({ "group": cli.group, "membership": client.membership() });
    client.disconnect().await?;
    println!("{summary}");
    Ok(())
}
