//! # Subscriber Server
//!
//! WebSocket endpoint for downstream subscribers.
//!
//! This module handles:
//! - Accepting subscriber connections and registering them with the bridge
//! - Forwarding every broadcast frame to each subscriber
//! - Executing text commands from subscribers and reporting rejections
//!   to the sender only

use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::bridge::{parse_client_message, Bridge};
use crate::error::{PodBridgeError, Result};

/// Listens for subscribers and attaches them to a [`Bridge`]
pub struct SubscriberServer {
    listener: TcpListener,
    bridge: Arc<Bridge>,
}

impl SubscriberServer {
    /// Bind the listening socket
    ///
    /// # Arguments
    ///
    /// * `addr` - Address to listen on, e.g. `0.0.0.0:8080`
    /// * `bridge` - Bridge every subscriber is attached to
    ///
    /// # Errors
    ///
    /// Returns `Io` if the address cannot be bound (port in use, no permission)
    pub async fn bind(addr: &str, bridge: Arc<Bridge>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Subscriber server listening on ws://{}", listener.local_addr()?);
        Ok(Self { listener, bridge })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept subscribers until the task is cancelled
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept subscriber: {}", e);
                    continue;
                }
            };

            let bridge = Arc::clone(&self.bridge);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer, bridge).await {
                    debug!("Subscriber {} ended with error: {}", peer, e);
                }
            });
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, bridge: Arc<Bridge>) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut source) = ws.split();

    let mut subscription = bridge.subscribe().await;
    info!("Subscriber {} connected from {}", subscription.id, peer);

    let outcome = loop {
        tokio::select! {
            outbound = subscription.receiver.recv() => {
                let Some(message) = outbound else {
                    break Ok(());
                };
                if let Err(e) = sink.send(Message::Text(message.to_string())).await {
                    break Err(PodBridgeError::from(e));
                }
            }
            inbound = source.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = execute_commands(&bridge, &text, &mut sink).await {
                            break Err(e);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!("Subscriber {} closed: {:?}", subscription.id, frame);
                        break Ok(());
                    }
                    Some(Ok(_)) => {
                        // Ping/pong handled by tungstenite; binary ignored
                    }
                    Some(Err(e)) => break Err(PodBridgeError::from(e)),
                    None => break Ok(()),
                }
            }
        }
    };

    bridge.unsubscribe(subscription.id).await;
    outcome
}

/// Run each command in a subscriber message, replying to that subscriber
/// for every one that fails
async fn execute_commands<S>(bridge: &Bridge, text: &str, sink: &mut S) -> Result<()>
where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    for (raw, parsed) in parse_client_message(text) {
        let result = match parsed {
            Ok(command) => bridge.submit(command).await.map(|written| {
                debug!("Command {:?} sent upstream as {:?}", raw, written);
            }),
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!("Rejected subscriber command {:?}: {}", raw, e);
            sink.send(Message::Text(rejection(&raw, &e))).await?;
        }
    }
    Ok(())
}

/// `{"type":"commandRejected","command":..,"reason":..}`
fn rejection(command: &str, reason: &PodBridgeError) -> String {
    json!({
        "type": "commandRejected",
        "command": command,
        "reason": reason.to_string(),
    })
    .to_string()
}
