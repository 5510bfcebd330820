//! Hub server implementation.

use crate::groups::Groups;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use hubline_core::{ClientFrame, JoinRequest, ServerFrame, channels, rpc};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, broadcast};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

type SharedGroups = Arc<RwLock<Groups>>;
/// Pushes fanned out to every connection, filtered by group key.
type GroupPush = (String, ServerFrame);
type Sink = SplitSink<WebSocketStream<TcpStream>, Message>;

pub async fn run(port: u16, name: String, drop_every: Option<Duration>) -> anyhow::Result<()> {
    let groups = Arc::new(RwLock::new(Groups::new()));
    let (broadcast_tx, _) = broadcast::channel::<GroupPush>(64);

    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Hub '{}' listening on ws://{}/{}", name, addr, name);

    loop {
        let (stream, client_addr) = listener.accept().await?;
        let groups = groups.clone();
        let broadcast_tx = broadcast_tx.clone();

        tokio::spawn(async move {
            if let Err(e) =
                handle_connection(stream, client_addr, groups, broadcast_tx, drop_every).await
            {
                tracing::warn!("Connection error: {}", e);
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    groups: SharedGroups,
    broadcast_tx: broadcast::Sender<GroupPush>,
    drop_every: Option<Duration>,
) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut stream) = ws.split();
    let mut broadcast_rx = broadcast_tx.subscribe();
    let mut joined: Option<JoinRequest> = None;

    tracing::debug!("New connection from {}", addr);

    let drop_timer = async move {
        match drop_every {
            Some(after) => tokio::time::sleep(after).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(drop_timer);

    loop {
        tokio::select! {
            _ = &mut drop_timer => {
                tracing::info!("Dropping {} on schedule", addr);
                break;
            }

            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    _ => break,
                };
                let Message::Text(text) = msg else {
                    continue;
                };
                let frame: ClientFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::debug!("Ignoring bad frame from {}: {}", addr, e);
                        continue;
                    }
                };

                let ClientFrame::Invoke { invocation_id, target, arguments } = frame;
                let outcome =
                    invoke(&groups, &broadcast_tx, &mut joined, &target, &arguments).await;
                let reply = match outcome {
                    Ok(result) => ServerFrame::completed(invocation_id, result),
                    Err(e) => {
                        tracing::warn!("{} from {} failed: {}", target, addr, e);
                        ServerFrame::failed(invocation_id, e.to_string())
                    }
                };
                send(&mut sink, &reply).await?;
            }

            pushed = broadcast_rx.recv() => match pushed {
                Ok((group_key, frame)) => {
                    if joined.as_ref().is_some_and(|j| j.group_key == group_key) {
                        send(&mut sink, &frame).await?;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("{} missed {} pushes", addr, missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    if let Some(member) = joined {
        groups.write().await.leave(&member.group_key, &member.caller_id);
        tracing::info!("{} left {}", member.caller_id, member.group_key);
    }
    Ok(())
}

async fn invoke(
    groups: &SharedGroups,
    broadcast_tx: &broadcast::Sender<GroupPush>,
    joined: &mut Option<JoinRequest>,
    target: &str,
    args: &[Value],
) -> anyhow::Result<Value> {
    match target {
        rpc::CONNECT_TO_GROUP => {
            let request = JoinRequest::from_args(args)?;
            let reply = {
                let mut groups = groups.write().await;
                if let Some(previous) = joined.as_ref() {
                    groups.leave(&previous.group_key, &previous.caller_id);
                }
                groups.join(&request)?
            };
            tracing::info!(
                "{} {} {} (host: {})",
                request.caller_id,
                if request.is_reconnect { "rejoined" } else { "joined" },
                request.group_key,
                reply.is_host
            );
            *joined = Some(request);
            Ok(serde_json::to_value(reply)?)
        }

        rpc::START_GAME => {
            let key = group_arg(args)?;
            groups.write().await.start(&key)?;
            let _ = broadcast_tx.send((key, ServerFrame::push(channels::STATE, json!("started"))));
            Ok(Value::Null)
        }

        rpc::ADD_ROUND => {
            let key = group_arg(args)?;
            let rounds = groups.write().await.add_round(&key)?;
            let push = ServerFrame::push(channels::ITERATIONS, json!(rounds));
            let _ = broadcast_tx.send((key, push));
            Ok(json!(rounds))
        }

        other => anyhow::bail!("unknown method {}", other),
    }
}

fn group_arg(args: &[Value]) -> anyhow::Result<String> {
    args.first()
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("missing groupKey argument"))
}

async fn send(sink: &mut Sink, frame: &ServerFrame) -> anyhow::Result<()> {
    sink.send(Message::Text(serde_json::to_string(frame)?.into())).await?;
    Ok(())
}
