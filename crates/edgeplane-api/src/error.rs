use thiserror::Error;

/// Top-level error type for the `edgeplane-api` crate.
///
/// Covers every failure mode of the agent transport: missing channels,
/// timeouts, WebSocket failures, and malformed frames. An agent that
/// answers `ok: false` is NOT an error at this layer -- that is a normal
/// [`AgentReply`](crate::AgentReply) the caller interprets.
#[derive(Debug, Error)]
pub enum Error {
    // ── Channel ─────────────────────────────────────────────────────
    /// No live channel is registered for the machine id.
    #[error("Device {machine_id} is not connected")]
    NotConnected { machine_id: String },

    /// The channel closed (or was replaced) while a request was in flight.
    #[error("Channel to device {machine_id} closed")]
    ChannelClosed { machine_id: String },

    /// The agent did not reply within the allotted time.
    #[error("Device {machine_id} did not reply within {timeout_ms}ms")]
    Timeout { machine_id: String, timeout_ms: u64 },

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket handshake or stream failure.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The agent never sent a valid hello frame.
    #[error("Agent handshake failed: {reason}")]
    Handshake { reason: String },

    /// The admission check refused the agent.
    #[error("Agent {machine_id} refused: {reason}")]
    Refused { machine_id: String, reason: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON (de)serialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── IO ──────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` for failures caused by the device being absent or
    /// going away, as opposed to a slow device.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::NotConnected { .. } | Self::ChannelClosed { .. })
    }

    /// Returns `true` if the request timed out waiting for the agent.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}
