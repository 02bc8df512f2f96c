//! Connection registry: one logical duplex channel per connected agent.
//!
//! The registry owns the outbound half of every agent channel and the
//! table of requests awaiting a reply. The listener (or any other
//! transport) registers a channel when an agent connects and feeds
//! replies back through [`ConnectionRegistry::deliver_reply`].
//!
//! Consumers only see the [`AgentTransport`] capability: liveness,
//! request/response with a timeout, forced disconnect, and connection
//! events. There is no global instance; the process root constructs one
//! and hands out `Arc` clones.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::Error;
use crate::message::{
    AgentHello, AgentReply, AgentVersions, DeviceRequest, MachineId, ReplyFrame, RequestFrame,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

// ── ConnectionEvent ─────────────────────────────────────────────────

/// Liveness change broadcast to registry subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected(MachineId),
    Disconnected(MachineId),
}

// ── AgentTransport ──────────────────────────────────────────────────

/// Request/response transport to connected agents.
///
/// Implemented by [`ConnectionRegistry`]; the control plane core depends
/// only on this trait so tests can inject their own transport.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Whether a live channel exists for the machine id.
    fn is_connected(&self, machine_id: &MachineId) -> bool;

    /// Send one request and wait for the reply.
    ///
    /// Fails with [`Error::NotConnected`], [`Error::ChannelClosed`] or
    /// [`Error::Timeout`]. An agent-reported failure is `Ok` with
    /// `reply.ok == false`.
    async fn send(
        &self,
        machine_id: &MachineId,
        request: DeviceRequest,
        timeout: Duration,
    ) -> Result<AgentReply, Error>;

    /// Forcibly close the channel. No-op if the device is not connected.
    fn disconnect(&self, machine_id: &MachineId);

    /// Versions the agent announced when it connected.
    fn agent_versions(&self, machine_id: &MachineId) -> Option<AgentVersions>;

    /// Subscribe to connect/disconnect notifications.
    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent>;
}

// ── AgentSession ────────────────────────────────────────────────────

/// Handle given to the owner of a freshly registered connection.
///
/// The owner drains `outbound` onto the wire, reports replies via
/// [`ConnectionRegistry::deliver_reply`], and must stop when `cancel`
/// fires (the channel was replaced or forcibly disconnected).
pub struct AgentSession {
    pub machine_id: MachineId,
    pub generation: u64,
    pub outbound: mpsc::Receiver<RequestFrame>,
    pub cancel: CancellationToken,
}

// ── ConnectionRegistry ──────────────────────────────────────────────

struct AgentChannel {
    generation: u64,
    versions: AgentVersions,
    outbound: mpsc::Sender<RequestFrame>,
    cancel: CancellationToken,
}

struct PendingRequest {
    machine_id: MachineId,
    generation: u64,
    reply_tx: oneshot::Sender<AgentReply>,
}

struct PendingGuard<'a> {
    pending: &'a DashMap<u64, PendingRequest>,
    seq: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.seq);
    }
}

/// Thread-safe registry of agent channels, keyed by machine id.
pub struct ConnectionRegistry {
    channels: DashMap<MachineId, AgentChannel>,
    pending: DashMap<u64, PendingRequest>,
    next_seq: AtomicU64,
    next_generation: AtomicU64,
    events: broadcast::Sender<ConnectionEvent>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            channels: DashMap::new(),
            pending: DashMap::new(),
            next_seq: AtomicU64::new(1),
            next_generation: AtomicU64::new(1),
            events,
        }
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel for the agent that sent `hello`.
    ///
    /// An existing channel for the same machine id is replaced: its
    /// session is cancelled and its in-flight requests fail with
    /// [`Error::ChannelClosed`].
    pub fn register(&self, hello: AgentHello) -> AgentSession {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let machine_id = hello.machine_id;

        let previous = self.channels.insert(
            machine_id.clone(),
            AgentChannel {
                generation,
                versions: hello.versions,
                outbound: outbound_tx,
                cancel: cancel.clone(),
            },
        );

        if let Some(old) = previous {
            info!(machine_id = %machine_id, "replacing existing agent channel");
            old.cancel.cancel();
            self.fail_pending(&machine_id, old.generation);
        } else {
            info!(machine_id = %machine_id, generation, "agent connected");
        }

        // No subscribers is fine.
        let _ = self.events.send(ConnectionEvent::Connected(machine_id.clone()));

        AgentSession {
            machine_id,
            generation,
            outbound: outbound_rx,
            cancel,
        }
    }

    /// Remove the channel if it still belongs to `generation`.
    ///
    /// Returns `false` when the channel was already replaced or removed,
    /// so a stale connection tearing down never evicts its successor.
    pub fn unregister(&self, machine_id: &MachineId, generation: u64) -> bool {
        let Some((_, channel)) = self
            .channels
            .remove_if(machine_id, |_, ch| ch.generation == generation)
        else {
            return false;
        };

        channel.cancel.cancel();
        self.fail_pending(machine_id, generation);
        info!(machine_id = %machine_id, generation, "agent disconnected");
        let _ = self
            .events
            .send(ConnectionEvent::Disconnected(machine_id.clone()));
        true
    }

    /// Route a reply frame to the request waiting on it.
    ///
    /// Returns `false` if nothing was waiting (late reply after a
    /// timeout, or a frame from a replaced connection).
    pub fn deliver_reply(&self, machine_id: &MachineId, generation: u64, frame: ReplyFrame) -> bool {
        let matched = self.pending.remove_if(&frame.seq, |_, p| {
            p.machine_id == *machine_id && p.generation == generation
        });

        match matched {
            Some((_, pending)) => {
                // The requester may have given up already.
                let _ = pending.reply_tx.send(frame.reply);
                true
            }
            None => {
                debug!(machine_id = %machine_id, seq = frame.seq, "dropping unmatched reply");
                false
            }
        }
    }

    /// Machine ids with a live channel.
    pub fn connected_devices(&self) -> Vec<MachineId> {
        self.channels.iter().map(|r| r.key().clone()).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of requests currently awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Send on a channel captured at `generation` and wait for the reply.
    async fn exchange(
        &self,
        machine_id: &MachineId,
        outbound: &mpsc::Sender<RequestFrame>,
        generation: u64,
        request: DeviceRequest,
        timeout: Duration,
    ) -> Result<AgentReply, Error> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(
            seq,
            PendingRequest {
                machine_id: machine_id.clone(),
                generation,
                reply_tx,
            },
        );
        // Clears the entry however this future ends (reply, timeout, or
        // the caller dropping us mid-flight).
        let _guard = PendingGuard {
            pending: &self.pending,
            seq,
        };

        let closed = || Error::ChannelClosed {
            machine_id: machine_id.to_string(),
        };
        // The channel may have been replaced or dropped after it was
        // captured, with its pending requests failed before ours existed.
        if !self.is_current(machine_id, generation) {
            debug!(machine_id = %machine_id, generation, "channel replaced before send");
            return Err(closed());
        }

        debug!(machine_id = %machine_id, seq, message = %request.message, "sending request");

        let exchange = async {
            outbound
                .send(RequestFrame { seq, request })
                .await
                .map_err(|_| closed())?;
            reply_rx.await.map_err(|_| closed())
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                machine_id: machine_id.to_string(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    fn is_current(&self, machine_id: &MachineId, generation: u64) -> bool {
        self.channels
            .get(machine_id)
            .is_some_and(|ch| ch.generation == generation)
    }

    /// Drop every pending request of one channel generation. Waiters see
    /// their oneshot sender vanish and report `ChannelClosed`.
    fn fail_pending(&self, machine_id: &MachineId, generation: u64) {
        self.pending
            .retain(|_, p| !(p.machine_id == *machine_id && p.generation == generation));
    }
}

#[async_trait]
impl AgentTransport for ConnectionRegistry {
    fn is_connected(&self, machine_id: &MachineId) -> bool {
        self.channels.contains_key(machine_id)
    }

    async fn send(
        &self,
        machine_id: &MachineId,
        request: DeviceRequest,
        timeout: Duration,
    ) -> Result<AgentReply, Error> {
        // Clone what we need and release the shard guard before awaiting.
        let (outbound, generation) = {
            let channel = self
                .channels
                .get(machine_id)
                .ok_or_else(|| Error::NotConnected {
                    machine_id: machine_id.to_string(),
                })?;
            (channel.outbound.clone(), channel.generation)
        };

        self.exchange(machine_id, &outbound, generation, request, timeout)
            .await
    }

    fn disconnect(&self, machine_id: &MachineId) {
        let Some((_, channel)) = self.channels.remove(machine_id) else {
            return;
        };

        info!(machine_id = %machine_id, "forcibly disconnecting agent");
        channel.cancel.cancel();
        self.fail_pending(machine_id, channel.generation);
        let _ = self
            .events
            .send(ConnectionEvent::Disconnected(machine_id.clone()));
    }

    fn agent_versions(&self, machine_id: &MachineId) -> Option<AgentVersions> {
        self.channels.get(machine_id).map(|ch| ch.versions.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
