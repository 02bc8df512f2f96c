// ── Control plane lifecycle ──
//
// Wires the store, job queue, reconciler, dispatcher and sync engine
// together and owns their background tasks: the command processor,
// the periodic sync pass, the connection watcher and job retention.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use edgeplane_api::{Admission, AgentHello, AgentTransport, ConnectionEvent, MachineId};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::{Command, CommandEnvelope, CommandResult};
use crate::config::ControlPlaneConfig;
use crate::dispatch::{Actor, Dispatcher, OrgResolver, ReadOutcome, ReadRequest};
use crate::error::CoreError;
use crate::model::{EntityId, Job, JobId};
use crate::queue::{JobEvent, JobQueue, OutcomeHandler, QueueConfig};
use crate::reconcile::Reconciler;
use crate::store::DataStore;
use crate::sync::{SyncEngine, SyncReport};

const COMMAND_CHANNEL_SIZE: usize = 64;

// ── Controller ───────────────────────────────────────────────────

/// The main entry point for embedders.
///
/// Cheaply cloneable via `Arc<ControllerInner>`. Does nothing until
/// [`start()`](Self::start) spawns the background tasks.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: ControlPlaneConfig,
    store: Arc<DataStore>,
    transport: Arc<dyn AgentTransport>,
    queue: JobQueue,
    dispatcher: Arc<Dispatcher>,
    sync: Arc<SyncEngine>,
    running: watch::Sender<bool>,
    command_tx: mpsc::Sender<CommandEnvelope>,
    command_rx: Mutex<Option<mpsc::Receiver<CommandEnvelope>>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    pub fn new(
        store: Arc<DataStore>,
        transport: Arc<dyn AgentTransport>,
        orgs: Arc<dyn OrgResolver>,
        config: ControlPlaneConfig,
    ) -> Self {
        let reconciler: Arc<dyn OutcomeHandler> = Arc::new(Reconciler::new(Arc::clone(&store)));
        let queue = JobQueue::new(
            Arc::clone(&transport),
            reconciler,
            QueueConfig {
                job_timeout: config.job_timeout,
            },
        );
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            queue.clone(),
            Arc::clone(&transport),
            orgs,
            config.clone(),
        ));
        let sync = Arc::new(SyncEngine::new(
            Arc::clone(&store),
            Arc::clone(&transport),
            queue.clone(),
            Arc::clone(&dispatcher),
            config.sync.clone(),
        ));
        let (running, _) = watch::channel(false);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);

        Self {
            inner: Arc::new(ControllerInner {
                config,
                store,
                transport,
                queue,
                dispatcher,
                sync,
                running,
                command_tx,
                command_rx: Mutex::new(Some(command_rx)),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &ControlPlaneConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<DataStore> {
        &self.inner.store
    }

    pub fn queue(&self) -> &JobQueue {
        &self.inner.queue
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Spawn the background tasks. Calling it twice is an error.
    pub async fn start(&self) -> Result<(), CoreError> {
        let Some(rx) = self.inner.command_rx.lock().await.take() else {
            return Err(CoreError::Internal("control plane already started".into()));
        };
        // Subscribe before spawning so no connection event slips by.
        let events = self.inner.transport.subscribe();

        let mut handles = self.inner.task_handles.lock().await;
        handles.push(tokio::spawn(command_processor_task(self.clone(), rx)));
        handles.push(tokio::spawn(connection_task(
            self.clone(),
            events,
            self.inner.cancel.child_token(),
        )));

        let interval = self.inner.config.sync.interval;
        if !interval.is_zero() {
            handles.push(tokio::spawn(sync_task(
                Arc::clone(&self.inner.sync),
                interval,
                self.inner.cancel.child_token(),
            )));
        }

        let retention = self.inner.config.job_retention;
        if !retention.is_zero() {
            handles.push(tokio::spawn(retention_task(
                self.inner.queue.clone(),
                retention,
                self.inner.cancel.child_token(),
            )));
        }

        // Devices may have connected before the watcher existed.
        self.inner.queue.resume_all();
        let _ = self.inner.running.send(true);
        info!(tasks = handles.len(), "control plane started");
        Ok(())
    }

    /// Stop background tasks and job delivery, then wait for them.
    pub async fn shutdown(&self) {
        let _ = self.inner.running.send(false);
        self.inner.cancel.cancel();
        self.inner.queue.shutdown();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        debug!("control plane stopped");
    }

    pub fn is_running(&self) -> bool {
        *self.inner.running.borrow()
    }

    /// Subscribe to running-state changes.
    pub fn running(&self) -> watch::Receiver<bool> {
        self.inner.running.subscribe()
    }

    // ── Command execution ────────────────────────────────────────

    /// Execute a command. Commands run one at a time, in arrival order.
    pub async fn execute(&self, cmd: Command) -> Result<CommandResult, CoreError> {
        if !self.is_running() {
            return Err(CoreError::ControlPlaneStopped);
        }

        let (tx, rx) = oneshot::channel();
        self.inner
            .command_tx
            .send(CommandEnvelope {
                command: cmd,
                response_tx: tx,
            })
            .await
            .map_err(|_| CoreError::ControlPlaneStopped)?;

        rx.await.map_err(|_| CoreError::ControlPlaneStopped)?
    }

    /// Immediate read from a connected agent. Bypasses the command
    /// channel; reads change nothing.
    pub async fn fetch(
        &self,
        device_id: &EntityId,
        request: ReadRequest,
        actor: &Actor,
    ) -> Result<ReadOutcome, CoreError> {
        self.inner.dispatcher.fetch(device_id, request, actor).await
    }

    /// Run one sync pass now, outside the periodic schedule.
    pub async fn sync_now(&self) -> SyncReport {
        self.inner.sync.sync_pass().await
    }

    // ── Observation ──────────────────────────────────────────────

    pub fn job(&self, id: JobId) -> Option<Job> {
        self.inner.queue.job(id)
    }

    pub fn jobs_for_device(&self, machine_id: &MachineId) -> Vec<Job> {
        self.inner.queue.jobs_for_device(machine_id)
    }

    /// Lifecycle events of every job, as the queue emits them.
    pub fn job_events(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.queue.subscribe()
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Run commands from the channel one at a time.
async fn command_processor_task(controller: Controller, mut rx: mpsc::Receiver<CommandEnvelope>) {
    let cancel = controller.inner.cancel.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                let result = route_command(&controller.inner.dispatcher, envelope.command);
                let _ = envelope.response_tx.send(result);
            }
        }
    }
}

fn route_command(dispatcher: &Dispatcher, cmd: Command) -> Result<CommandResult, CoreError> {
    match cmd {
        Command::Apply {
            devices,
            intent,
            actor,
        } => dispatcher
            .apply(&devices, &intent, &actor)
            .map(CommandResult::Dispatched),
        Command::AddTunnels { requests, actor } => dispatcher
            .add_tunnels(&requests, &actor)
            .map(CommandResult::Dispatched),
        Command::RemoveTunnels { ids, actor } => dispatcher
            .remove_tunnels(&ids, &actor)
            .map(CommandResult::Dispatched),
        Command::Approve {
            device_id,
            approved,
            actor,
        } => dispatcher
            .approve(&device_id, approved, &actor)
            .map(|()| CommandResult::Ok),
        Command::DeleteDevice { device_id, actor } => dispatcher
            .delete_device(&device_id, &actor)
            .map(|()| CommandResult::Ok),
        Command::CancelJob { job_id, actor } => dispatcher
            .cancel_job(job_id, &actor)
            .map(|()| CommandResult::Ok),
    }
}

/// Resume delivery when agents reconnect and refresh the versions they
/// announce.
async fn connection_task(
    controller: Controller,
    mut events: broadcast::Receiver<ConnectionEvent>,
    cancel: CancellationToken,
) {
    let inner = &controller.inner;
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(ConnectionEvent::Connected(machine_id)) => {
                    record_versions(inner, &machine_id);
                    inner.queue.resume(&machine_id);
                }
                Ok(ConnectionEvent::Disconnected(machine_id)) => {
                    debug!(machine_id = %machine_id, "agent disconnected");
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "connection events lagged, resuming every lane");
                    inner.queue.resume_all();
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

fn record_versions(inner: &ControllerInner, machine_id: &MachineId) {
    let Some(device) = inner.store.device_by_machine(machine_id) else {
        debug!(machine_id = %machine_id, "connected agent has no device record");
        return;
    };
    if let Some(versions) = inner.transport.agent_versions(machine_id) {
        if versions != device.versions {
            info!(
                device_id = %device.id,
                agent = %versions.agent,
                "agent versions changed"
            );
            inner.store.update_device(&device.id, |d| d.versions = versions);
        }
    }
}

async fn sync_task(engine: Arc<SyncEngine>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                engine.sync_pass().await;
            }
        }
    }
}

async fn retention_task(queue: JobQueue, retention: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(retention.min(Duration::from_secs(60 * 60)));
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let purged = queue.purge_finished(retention);
                if purged > 0 {
                    debug!(purged, "finished jobs purged");
                }
            }
        }
    }
}

// ── Admission ────────────────────────────────────────────────────

/// Admits only agents whose machine id belongs to an approved device.
pub struct StoreAdmission {
    store: Arc<DataStore>,
}

impl StoreAdmission {
    pub fn new(store: Arc<DataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Admission for StoreAdmission {
    async fn admit(&self, hello: &AgentHello) -> Result<(), String> {
        match self.store.device_by_machine(&hello.machine_id) {
            Some(device) if device.is_approved => Ok(()),
            Some(device) => Err(format!("device {} is not approved", device.label())),
            None => Err(format!("unknown machine id {}", hello.machine_id)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::dispatch::{DispatchStatus, Intent, TrustedOrg};
    use crate::model::{ItemStatus, JobState};
    use crate::test_support::{FakeTransport, eventually, lan_wan_device, organization};

    fn controller(transport: &Arc<FakeTransport>) -> Controller {
        let store = Arc::new(DataStore::new());
        store.insert_organization(organization("org", 1));
        store.insert_device(lan_wan_device("dev-a", "m-a"));
        let mut config = ControlPlaneConfig::default();
        config.sync.interval = Duration::ZERO;
        Controller::new(
            store,
            Arc::clone(transport) as Arc<dyn AgentTransport>,
            Arc::new(TrustedOrg),
            config,
        )
    }

    fn stop_router() -> Command {
        Command::Apply {
            devices: vec!["dev-a".into()],
            intent: Intent::StopRouter,
            actor: Actor::new("ops", "org"),
        }
    }

    #[tokio::test]
    async fn commands_are_refused_before_start() {
        let ctrl = controller(&FakeTransport::new());
        let err = ctrl.execute(stop_router()).await.unwrap_err();
        assert!(matches!(err, CoreError::ControlPlaneStopped));
    }

    #[tokio::test]
    async fn start_twice_is_an_error() {
        let ctrl = controller(&FakeTransport::new());
        ctrl.start().await.unwrap();
        assert!(ctrl.start().await.is_err());
        ctrl.shutdown().await;
        assert!(!ctrl.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_resumes_queued_jobs() {
        let transport = FakeTransport::new();
        let ctrl = controller(&transport);
        ctrl.start().await.unwrap();

        let result = ctrl.execute(stop_router()).await.unwrap();
        let outcome = result.outcome().unwrap().clone();
        assert_eq!(outcome.status, DispatchStatus::Disconnected);
        let job_id = outcome.job_ids[0];
        assert_eq!(ctrl.job(job_id).unwrap().state, JobState::Queued);

        transport.connect("m-a");
        eventually(|| ctrl.job(job_id).unwrap().state == JobState::Complete).await;
        assert!(!ctrl.store().device(&"dev-a".into()).unwrap().is_running);
        ctrl.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn commands_run_in_arrival_order() {
        let transport = FakeTransport::new();
        transport.connect("m-a");
        let ctrl = controller(&transport);
        ctrl.start().await.unwrap();

        let add = Command::Apply {
            devices: vec!["dev-a".into()],
            intent: Intent::AddDhcp(crate::dispatch::DhcpRequest {
                interface: "eth1".into(),
                range_start: "10.0.0.100".parse().unwrap(),
                range_end: "10.0.0.150".parse().unwrap(),
                dns: Vec::new(),
                mac_assign: Vec::new(),
            }),
            actor: Actor::new("ops", "org"),
        };
        let (first, second) = tokio::join!(ctrl.execute(add.clone()), ctrl.execute(add));

        // Exactly one of two identical adds wins the interface.
        assert!(first.is_ok() != second.is_ok());
        let dev = ctrl.store().device(&"dev-a".into()).unwrap();
        assert_eq!(dev.dhcp.len(), 1);
        eventually(|| {
            ctrl.store().device(&"dev-a".into()).unwrap().dhcp[0].status == ItemStatus::Complete
        })
        .await;
        ctrl.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn job_events_follow_a_job_to_completion() {
        let transport = FakeTransport::new();
        transport.connect("m-a");
        let ctrl = controller(&transport);
        let mut events = ctrl.job_events();
        ctrl.start().await.unwrap();

        let result = ctrl.execute(stop_router()).await.unwrap();
        let job_id = result.outcome().unwrap().job_ids[0];

        let mut seen = Vec::new();
        while seen.len() < 3 {
            seen.push(events.recv().await.unwrap());
        }
        let machine_id = MachineId::new("m-a");
        assert_eq!(
            seen,
            vec![
                JobEvent::Queued {
                    id: job_id,
                    machine_id: machine_id.clone(),
                },
                JobEvent::Started {
                    id: job_id,
                    machine_id: machine_id.clone(),
                    attempt: 1,
                },
                JobEvent::Finished {
                    id: job_id,
                    machine_id,
                    state: JobState::Complete,
                },
            ]
        );
        ctrl.shutdown().await;
    }

    #[tokio::test]
    async fn admission_requires_an_approved_device() {
        let store = Arc::new(DataStore::new());
        let mut pending = lan_wan_device("dev-b", "m-b");
        pending.is_approved = false;
        store.insert_device(lan_wan_device("dev-a", "m-a"));
        store.insert_device(pending);
        let admission = StoreAdmission::new(store);

        let hello = |id: &str| AgentHello {
            machine_id: id.into(),
            versions: edgeplane_api::AgentVersions::default(),
        };
        assert!(admission.admit(&hello("m-a")).await.is_ok());
        assert!(admission.admit(&hello("m-b")).await.is_err());
        assert!(admission.admit(&hello("m-zz")).await.is_err());
    }
}
