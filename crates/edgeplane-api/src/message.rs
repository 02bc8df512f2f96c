// ── Device RPC wire types ──
//
// Everything that crosses the control-plane <-> agent channel.
// Requests carry `{entity, message, params}`, replies `{ok, message}`.
// Frames wrap both with a sequence number for correlation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── MachineId ───────────────────────────────────────────────────────

/// Stable device identity announced by the agent.
///
/// Normalized to uppercase with surrounding whitespace stripped, so
/// `"abc-123"` and `" ABC-123 "` address the same channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct MachineId(String);

impl MachineId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MachineId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for MachineId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for MachineId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<MachineId> for String {
    fn from(id: MachineId) -> Self {
        id.0
    }
}

// ── Request / reply ─────────────────────────────────────────────────

/// A single command addressed to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRequest {
    /// Subsystem on the agent, e.g. `"agent"`.
    pub entity: String,
    /// Command name, e.g. `"add-dhcp-config"`.
    pub message: String,
    /// Command parameters; `null` when the command takes none.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl DeviceRequest {
    pub fn new(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            message: message.into(),
            params: serde_json::Value::Null,
        }
    }

    /// Shorthand for an `entity: "agent"` command.
    pub fn agent(message: impl Into<String>) -> Self {
        Self::new("agent", message)
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

/// The agent's answer to a [`DeviceRequest`].
///
/// `message` is either a human-readable string or a structured payload
/// (an array of log lines, a hash report, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReply {
    pub ok: bool,
    #[serde(default)]
    pub message: serde_json::Value,
}

impl AgentReply {
    pub fn ok(message: impl Into<serde_json::Value>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<serde_json::Value>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }

    /// The reply message flattened to a single line for logs and status
    /// fields. Arrays are joined with `"; "`.
    pub fn message_text(&self) -> String {
        match &self.message {
            serde_json::Value::Null => String::new(),
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Array(items) => items
                .iter()
                .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_owned))
                .collect::<Vec<_>>()
                .join("; "),
            other => other.to_string(),
        }
    }
}

// ── Agent hello ─────────────────────────────────────────────────────

/// Software versions an agent reports when it connects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentVersions {
    pub agent: String,
    #[serde(default)]
    pub router: String,
    #[serde(default)]
    pub data_plane: String,
}

impl AgentVersions {
    /// Major component of the agent version, or `None` if unparseable.
    pub fn agent_major(&self) -> Option<u64> {
        self.agent.split('.').next()?.trim().parse().ok()
    }
}

/// First frame an agent sends after the WebSocket upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentHello {
    pub machine_id: MachineId,
    #[serde(default)]
    pub versions: AgentVersions,
}

// ── Frames ──────────────────────────────────────────────────────────

/// Control plane -> agent frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub seq: u64,
    pub request: DeviceRequest,
}

/// Agent -> control plane frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyFrame {
    pub seq: u64,
    pub reply: AgentReply,
}
