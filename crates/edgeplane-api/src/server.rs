//! WebSocket listener agents dial into.
//!
//! Each accepted connection goes through a short handshake (the agent's
//! first text frame must be an [`AgentHello`]), an admission check, and is
//! then registered with the [`ConnectionRegistry`]. From there a single
//! task pumps outbound request frames onto the socket and routes inbound
//! reply frames back to the registry until either side goes away.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::Error;
use crate::message::{AgentHello, ReplyFrame};
use crate::registry::{AgentSession, ConnectionRegistry};

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// ── Admission ────────────────────────────────────────────────────────

/// Decides whether a connecting agent may register a channel.
#[async_trait]
pub trait Admission: Send + Sync {
    /// Return `Err(reason)` to refuse the agent.
    async fn admit(&self, hello: &AgentHello) -> Result<(), String>;
}

/// Admits every agent.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdmitAll;

#[async_trait]
impl Admission for AdmitAll {
    async fn admit(&self, _hello: &AgentHello) -> Result<(), String> {
        Ok(())
    }
}

// ── AgentListener ────────────────────────────────────────────────────

/// Accepts agent WebSocket connections and feeds them to the registry.
pub struct AgentListener {
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    admission: Arc<dyn Admission>,
    handshake_timeout: Duration,
}

impl AgentListener {
    /// Bind the listening socket. Use port `0` to let the OS pick one.
    pub async fn bind(
        addr: SocketAddr,
        registry: Arc<ConnectionRegistry>,
        admission: Arc<dyn Admission>,
    ) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            registry,
            admission,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `cancel` fires.
    pub async fn serve(self, cancel: CancellationToken) {
        match self.listener.local_addr() {
            Ok(addr) => info!(%addr, "agent listener started"),
            Err(e) => warn!(error = %e, "agent listener started (address unknown)"),
        }

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let registry = Arc::clone(&self.registry);
                            let admission = Arc::clone(&self.admission);
                            let cancel = cancel.clone();
                            let handshake_timeout = self.handshake_timeout;
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(
                                    stream, registry, admission, handshake_timeout, cancel,
                                ).await {
                                    warn!(%peer, error = %e, "agent connection ended with error");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
            }
        }

        debug!("agent listener exiting");
    }
}

// ── Single connection lifecycle ──────────────────────────────────────

async fn handle_connection(
    stream: TcpStream,
    registry: Arc<ConnectionRegistry>,
    admission: Arc<dyn Admission>,
    handshake_timeout: Duration,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let mut ws = tokio_tungstenite::accept_async(stream).await?;

    let hello = tokio::time::timeout(handshake_timeout, read_hello(&mut ws))
        .await
        .map_err(|_| Error::Handshake {
            reason: "no hello frame before timeout".into(),
        })??;

    if let Err(reason) = admission.admit(&hello).await {
        let _ = ws.close(None).await;
        return Err(Error::Refused {
            machine_id: hello.machine_id.to_string(),
            reason,
        });
    }

    let session = registry.register(hello);
    let machine_id = session.machine_id.clone();
    let generation = session.generation;

    let result = pump(&mut ws, &registry, session, &cancel).await;
    registry.unregister(&machine_id, generation);
    let _ = ws.close(None).await;
    result
}

async fn read_hello(ws: &mut WebSocketStream<TcpStream>) -> Result<AgentHello, Error> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(text.as_str()).map_err(|e| Error::Deserialization {
                    message: e.to_string(),
                    body: text.as_str().to_owned(),
                });
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(_)) => {
                return Err(Error::Handshake {
                    reason: "expected a text hello frame".into(),
                });
            }
            Some(Err(e)) => return Err(e.into()),
            None => {
                return Err(Error::Handshake {
                    reason: "connection closed before hello".into(),
                });
            }
        }
    }
}

/// Move frames in both directions until the socket or the session ends.
async fn pump(
    ws: &mut WebSocketStream<TcpStream>,
    registry: &ConnectionRegistry,
    mut session: AgentSession,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            () = session.cancel.cancelled() => {
                debug!(machine_id = %session.machine_id, "session cancelled");
                return Ok(());
            }
            Some(frame) = session.outbound.recv() => {
                let text = serde_json::to_string(&frame).map_err(|e| Error::Deserialization {
                    message: e.to_string(),
                    body: String::new(),
                })?;
                ws.send(Message::text(text)).await?;
            }
            incoming = ws.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        route_reply(registry, &session, text.as_str());
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // tungstenite queues the pong itself
                        trace!(machine_id = %session.machine_id, "ping");
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(machine_id = %session.machine_id, "agent closed the connection");
                        return Ok(());
                    }
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(_)) => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

fn route_reply(registry: &ConnectionRegistry, session: &AgentSession, text: &str) {
    match serde_json::from_str::<ReplyFrame>(text) {
        Ok(frame) => {
            registry.deliver_reply(&session.machine_id, session.generation, frame);
        }
        Err(e) => {
            debug!(machine_id = %session.machine_id, error = %e, "skipping unparseable agent frame");
        }
    }
}
