// edgeplane-api: agent connection registry and WebSocket RPC transport

pub mod error;
pub mod message;
pub mod registry;
pub mod server;

pub use error::Error;
pub use message::{
    AgentHello, AgentReply, AgentVersions, DeviceRequest, MachineId, ReplyFrame, RequestFrame,
};
pub use registry::{AgentSession, AgentTransport, ConnectionEvent, ConnectionRegistry};
pub use server::{AdmitAll, Admission, AgentListener};
