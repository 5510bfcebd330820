//! Minimal game hub for trying out `hubline-client`.
//!
//! Speaks the JSON frames from `hubline-core` and answers `ConnectToGroup`,
//! `StartGame` and `AddRound`. The first caller to join a group becomes its
//! host and keeps that role when rejoining after a reconnect.
//!
//!   cargo run -p hubline-demo-server -- --port 8001 --name spin
//!
//! Pass `--drop-every 20` to close every connection after 20 seconds, which
//! exercises the client's reconnection path.

mod groups;
mod server;

use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hub_server=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let port = parse_arg(&args, "--port").unwrap_or(8001);
    let name = parse_arg_string(&args, "--name").unwrap_or_else(|| "spin".to_string());
    let drop_every =
        parse_arg(&args, "--drop-every").map(|secs| Duration::from_secs(u64::from(secs)));

    tracing::info!("Starting hub '{}' on port {}", name, port);

    server::run(port, name, drop_every).await
}

fn parse_arg(args: &[String], flag: &str) -> Option<u16> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}

fn parse_arg_string(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
