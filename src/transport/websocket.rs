//! WebSocket control server
//!
//! Accepts connections from the management layer and translates JSON
//! requests into gateway calls. Each connection gets:
//! - a send task draining an unbounded channel into the socket
//! - a receive loop that answers every request immediately
//! - follow-up tasks for dispatch outcomes and event streams, which push
//!   into the same channel
//!
//! A request that fails to parse gets an `error` response; the connection
//! stays open.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::gateway::Gateway;
use crate::transport::handler::{Followup, handle_request};
use crate::transport::message::{ControlRequest, ControlResponse};
use crate::utils::{GatewayError, Result};

type Outbox = mpsc::UnboundedSender<WsMessage>;

pub async fn bind(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| GatewayError::Transport(format!("cannot bind {addr}: {e}")))
}

pub async fn start_control_server(addr: &str, gateway: Arc<Gateway>) -> Result<()> {
    let listener = bind(addr).await?;
    serve(listener, gateway).await;
    Ok(())
}

pub async fn serve(listener: TcpListener, gateway: Arc<Gateway>) {
    if let Ok(local) = listener.local_addr() {
        info!("Control server listening on ws://{local}");
    }

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("Control connection from {peer}");
                spawn(serve_connection(stream, gateway.clone()));
            }
            Err(e) => {
                error!("Control server accept failed: {e}");
                break;
            }
        }
    }
}

fn send(outbox: &Outbox, response: &ControlResponse) -> bool {
    match serde_json::to_string(response) {
        Ok(text) => outbox.send(WsMessage::Text(text.into())).is_ok(),
        Err(e) => {
            error!("Failed to serialize control response: {e}");
            true
        }
    }
}

async fn serve_connection(stream: TcpStream, gateway: Arc<Gateway>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake error: {e}");
            return;
        }
    };
    let conn_id = uuid::Uuid::new_v4().simple().to_string();
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (outbox, mut rx) = mpsc::unbounded_channel::<WsMessage>();

    {
        let conn_id = conn_id.clone();
        spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    debug!("Failed to send to control connection {conn_id}: {e}");
                    break;
                }
            }
        });
    }

    while let Some(Ok(msg)) = ws_receiver.next().await {
        if msg.is_close() {
            break;
        }
        let Ok(text) = msg.to_text() else {
            continue;
        };
        if text.is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<ControlRequest>(text) {
            Ok(request) => request,
            Err(err) => {
                warn!(
                    "Invalid control request on {conn_id}: {err} | {}",
                    text.chars().take(100).collect::<String>()
                );
                send(
                    &outbox,
                    &ControlResponse::Error {
                        message: format!("invalid request: {err}"),
                    },
                );
                continue;
            }
        };

        let (response, followup) = handle_request(&gateway, request);
        if !send(&outbox, &response) {
            break;
        }
        match followup {
            Some(Followup::Outcome(handle)) => {
                let outbox = outbox.clone();
                spawn(async move {
                    let question_id = handle.question_id.clone();
                    let outcome = handle.outcome().await;
                    send(
                        &outbox,
                        &ControlResponse::Outcome {
                            question_id,
                            outcome,
                        },
                    );
                });
            }
            Some(Followup::Events(mut events)) => {
                let outbox = outbox.clone();
                spawn(async move {
                    loop {
                        match events.recv().await {
                            Ok(event) => {
                                if !send(&outbox, &ControlResponse::Event { event }) {
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!("Event watcher lagged, skipped {n} events");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                });
            }
            None => {}
        }
    }

    debug!("Control connection {conn_id} closed");
}
