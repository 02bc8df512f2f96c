// Fixtures shared by unit tests across the crate.
#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use edgeplane_api::{
    AgentReply, AgentTransport, AgentVersions, ConnectionEvent, DeviceRequest, MachineId,
};
use tokio::sync::{Semaphore, broadcast};

use crate::model::{
    Device, DhcpServer, EncryptionMethod, EntityId, Interface, InterfaceType, ItemStatus, Job,
    JobId, JobState, Organization, RoutingProtocol, StaticRoute, SyncState, Tunnel, TunnelEnd,
};
use crate::queue::{JobOutcome, OutcomeHandler};

pub(crate) fn interface(
    id: &str,
    dev_id: &str,
    kind: Option<InterfaceType>,
    addr: Option<(Ipv4Addr, u8)>,
    gateway: Option<Ipv4Addr>,
) -> Interface {
    Interface {
        id: id.into(),
        dev_id: dev_id.into(),
        name: dev_id.into(),
        is_assigned: kind.is_some(),
        kind,
        ipv4: addr.map(|(ip, _)| ip),
        ipv4_mask: addr.map(|(_, mask)| mask),
        gateway,
        routing: RoutingProtocol::None,
        path_labels: Vec::new(),
        modified: false,
    }
}

/// Approved device in org `"org"` with WAN `eth0` (192.168.1.10/24),
/// LAN `eth1` (10.0.0.1/24) and an unassigned `eth2`. Agent 1.x.
pub(crate) fn lan_wan_device(id: &str, machine_id: &str) -> Device {
    Device {
        id: id.into(),
        org: "org".into(),
        machine_id: machine_id.into(),
        name: id.into(),
        is_approved: true,
        is_running: true,
        versions: AgentVersions {
            agent: "1.4.2".into(),
            router: "1.0.0".into(),
            data_plane: "21.01".into(),
        },
        interfaces: vec![
            interface(
                "wan0",
                "eth0",
                Some(InterfaceType::Wan),
                Some((Ipv4Addr::new(192, 168, 1, 10), 24)),
                Some(Ipv4Addr::new(192, 168, 1, 1)),
            ),
            interface(
                "lan0",
                "eth1",
                Some(InterfaceType::Lan),
                Some((Ipv4Addr::new(10, 0, 0, 1), 24)),
                None,
            ),
            interface("spare0", "eth2", None, None, None),
        ],
        static_routes: Vec::new(),
        dhcp: Vec::new(),
        sync: SyncState::default(),
    }
}

pub(crate) fn dhcp_server(id: &str, status: ItemStatus) -> DhcpServer {
    DhcpServer {
        id: id.into(),
        interface: "eth1".into(),
        range_start: Ipv4Addr::new(10, 0, 0, 100),
        range_end: Ipv4Addr::new(10, 0, 0, 200),
        dns: vec![Ipv4Addr::new(8, 8, 8, 8)],
        mac_assign: Vec::new(),
        status,
    }
}

pub(crate) fn static_route(id: &str, status: ItemStatus) -> StaticRoute {
    StaticRoute {
        id: id.into(),
        destination: "172.16.0.0/16".parse().unwrap(),
        gateway: Ipv4Addr::new(192, 168, 1, 254),
        interface: None,
        metric: None,
        status,
    }
}

pub(crate) fn organization(id: &str, device_count: u32) -> Organization {
    Organization {
        id: id.into(),
        name: id.into(),
        device_count,
        forbid_lan_overlap: false,
    }
}

/// Active tunnel between the `wan0` interfaces of two devices.
pub(crate) fn active_tunnel(id: &str, dev_a: &str, dev_b: &str) -> Tunnel {
    Tunnel {
        id: id.into(),
        org: "org".into(),
        num: 1,
        a: TunnelEnd {
            device: dev_a.into(),
            interface: EntityId::from("wan0"),
            status: ItemStatus::Complete,
            removed: false,
        },
        b: TunnelEnd {
            device: dev_b.into(),
            interface: EntityId::from("wan0"),
            status: ItemStatus::Complete,
            removed: false,
        },
        is_active: true,
        encryption: EncryptionMethod::Psk,
        path_label: None,
    }
}

// ── Test doubles ─────────────────────────────────────────────────────

/// In-memory transport. Replies `ok` unless a scripted reply is queued;
/// answers fingerprint queries from `set_hash`.
pub(crate) struct FakeTransport {
    connected: Mutex<HashSet<MachineId>>,
    replies: Mutex<VecDeque<Result<AgentReply, edgeplane_api::Error>>>,
    hashes: Mutex<HashMap<MachineId, String>>,
    sent: Mutex<Vec<(MachineId, DeviceRequest)>>,
    gates: Mutex<HashMap<MachineId, Arc<Semaphore>>>,
    delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    events: broadcast::Sender<ConnectionEvent>,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            connected: Mutex::new(HashSet::new()),
            replies: Mutex::new(VecDeque::new()),
            hashes: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            gates: Mutex::new(HashMap::new()),
            delay: Mutex::new(Duration::ZERO),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            events,
        })
    }

    pub(crate) fn connect(&self, machine_id: &str) {
        let id = MachineId::new(machine_id);
        self.connected.lock().unwrap().insert(id.clone());
        let _ = self.events.send(ConnectionEvent::Connected(id));
    }

    pub(crate) fn push_reply(&self, reply: Result<AgentReply, edgeplane_api::Error>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub(crate) fn set_hash(&self, machine_id: &str, hash: &str) {
        self.hashes
            .lock()
            .unwrap()
            .insert(MachineId::new(machine_id), hash.to_owned());
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Block sends to one device until `release` hands out permits.
    pub(crate) fn hold(&self, machine_id: &str) {
        self.gates
            .lock()
            .unwrap()
            .insert(MachineId::new(machine_id), Arc::new(Semaphore::new(0)));
    }

    pub(crate) fn release(&self, machine_id: &str, sends: usize) {
        if let Some(gate) = self.gates.lock().unwrap().get(&MachineId::new(machine_id)) {
            gate.add_permits(sends);
        }
    }

    /// `message` of every request sent, in order.
    pub(crate) fn sent_messages(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.message.clone())
            .collect()
    }

    pub(crate) fn sent_requests(&self) -> Vec<(MachineId, DeviceRequest)> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentTransport for FakeTransport {
    fn is_connected(&self, machine_id: &MachineId) -> bool {
        self.connected.lock().unwrap().contains(machine_id)
    }

    async fn send(
        &self,
        machine_id: &MachineId,
        request: DeviceRequest,
        _timeout: Duration,
    ) -> Result<AgentReply, edgeplane_api::Error> {
        if !self.is_connected(machine_id) {
            return Err(edgeplane_api::Error::NotConnected {
                machine_id: machine_id.to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((machine_id.clone(), request.clone()));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let gate = self.gates.lock().unwrap().get(machine_id).cloned();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if request.message == "get-device-config-hash" {
            let hash = self.hashes.lock().unwrap().get(machine_id).cloned();
            return Ok(AgentReply::ok(serde_json::json!({ "hash": hash })));
        }
        let scripted = self.replies.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(AgentReply::ok("ok")))
    }

    fn disconnect(&self, machine_id: &MachineId) {
        if self.connected.lock().unwrap().remove(machine_id) {
            let _ = self
                .events
                .send(ConnectionEvent::Disconnected(machine_id.clone()));
        }
    }

    fn agent_versions(&self, _machine_id: &MachineId) -> Option<AgentVersions> {
        None
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}

/// Records every outcome it is handed.
#[derive(Default)]
pub(crate) struct RecordingHandler {
    outcomes: Mutex<Vec<(JobId, JobState)>>,
}

impl RecordingHandler {
    pub(crate) fn outcomes(&self) -> Vec<(JobId, JobState)> {
        self.outcomes.lock().unwrap().clone()
    }
}

impl OutcomeHandler for RecordingHandler {
    fn on_outcome(&self, job: &Job, outcome: &JobOutcome) {
        self.outcomes.lock().unwrap().push((job.id, outcome.state()));
    }
}

/// Poll until `check` holds, advancing (possibly paused) time.
pub(crate) async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
