// ── Device job queue ──
//
// One lane per device. A lane holds queued job ids ordered by priority
// (FIFO within a priority) and at most one active job. A lane's driver
// task delivers jobs one at a time while the device is connected, and
// stops when the lane drains or the device goes away; the controller
// resumes it on reconnect.
//
// Every job reaches exactly one terminal state, and the outcome handler
// runs exactly once, from `worker::finish`.

mod worker;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use edgeplane_api::{AgentReply, AgentTransport, MachineId};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::model::{Job, JobId, JobState, NewJob, Operation, Priority};

const EVENT_CHANNEL_SIZE: usize = 256;

// ── Outcomes ─────────────────────────────────────────────────────────

/// Why a delivery attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobFailure {
    /// The agent answered `ok: false`.
    Agent(String),
    /// No reply within the job timeout.
    Timeout { timeout_ms: u64 },
    /// The channel closed mid-delivery.
    Unreachable(String),
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent(message) => write!(f, "agent error: {message}"),
            Self::Timeout { timeout_ms } => write!(f, "no reply within {timeout_ms}ms"),
            Self::Unreachable(reason) => write!(f, "device unreachable: {reason}"),
        }
    }
}

/// Terminal result of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Complete(AgentReply),
    Failed(JobFailure),
    Removed,
}

impl JobOutcome {
    pub fn state(&self) -> JobState {
        match self {
            Self::Complete(_) => JobState::Complete,
            Self::Failed(_) => JobState::Failed,
            Self::Removed => JobState::Removed,
        }
    }
}

/// Receives each job's terminal outcome, exactly once per job.
pub trait OutcomeHandler: Send + Sync {
    fn on_outcome(&self, job: &Job, outcome: &JobOutcome);
}

/// Job lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Queued { id: JobId, machine_id: MachineId },
    Started { id: JobId, machine_id: MachineId, attempt: u32 },
    Finished { id: JobId, machine_id: MachineId, state: JobState },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Per-task reply timeout.
    pub job_timeout: Duration,
}

// ── Lanes ────────────────────────────────────────────────────────────

struct ActiveJob {
    id: JobId,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Lane {
    pending: VecDeque<(JobId, Priority)>,
    active: Option<ActiveJob>,
    /// A driver task currently owns this lane.
    driving: bool,
}

impl Lane {
    /// Insert behind every job of equal or higher priority.
    fn enqueue(&mut self, id: JobId, priority: Priority) {
        let pos = self
            .pending
            .iter()
            .position(|(_, p)| *p < priority)
            .unwrap_or(self.pending.len());
        self.pending.insert(pos, (id, priority));
    }

    /// Put a job back ahead of its own priority band, still behind any
    /// higher-priority job that arrived meanwhile.
    fn requeue(&mut self, id: JobId, priority: Priority) {
        let pos = self
            .pending
            .iter()
            .position(|(_, p)| *p <= priority)
            .unwrap_or(self.pending.len());
        self.pending.insert(pos, (id, priority));
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.active.is_none() && !self.driving
    }
}

// ── JobQueue ─────────────────────────────────────────────────────────

/// Cheaply cloneable handle to the queue.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    jobs: DashMap<JobId, Job>,
    /// Lock order: `lanes` before any `jobs` shard guard.
    lanes: Mutex<HashMap<MachineId, Lane>>,
    next_id: AtomicU64,
    transport: Arc<dyn AgentTransport>,
    handler: Arc<dyn OutcomeHandler>,
    config: QueueConfig,
    events: broadcast::Sender<JobEvent>,
    shutdown: CancellationToken,
}

impl QueueInner {
    fn lanes(&self) -> MutexGuard<'_, HashMap<MachineId, Lane>> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl JobQueue {
    pub fn new(
        transport: Arc<dyn AgentTransport>,
        handler: Arc<dyn OutcomeHandler>,
        config: QueueConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            inner: Arc::new(QueueInner {
                jobs: DashMap::new(),
                lanes: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                transport,
                handler,
                config,
                events,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Queue a job and start delivery if the device is connected and
    /// idle. Must be called from within a Tokio runtime.
    pub fn submit(&self, new: NewJob) -> JobId {
        let id = JobId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let job = Job::from_new(id, new, Utc::now());
        let machine_id = job.machine_id.clone();
        let priority = job.priority;

        debug!(
            job_id = %id,
            machine_id = %machine_id,
            operation = %job.operation(),
            tasks = job.tasks.len(),
            "job queued"
        );
        self.inner.jobs.insert(id, job);
        self.inner
            .lanes()
            .entry(machine_id.clone())
            .or_default()
            .enqueue(id, priority);

        let _ = self.inner.events.send(JobEvent::Queued {
            id,
            machine_id: machine_id.clone(),
        });
        worker::kick(&self.inner, &machine_id);
        id
    }

    /// Administratively cancel a job.
    ///
    /// A queued job is removed at once. An active job has its delivery
    /// cancelled and becomes `removed` as soon as the lane notices.
    pub fn remove(&self, id: JobId) -> Result<(), CoreError> {
        let (machine_id, state) = self
            .inner
            .jobs
            .get(&id)
            .map(|j| (j.machine_id.clone(), j.state))
            .ok_or_else(|| CoreError::not_found("job", id))?;
        if state.is_terminal() {
            return Err(CoreError::conflict(format!("job {id} is already {state}")));
        }

        let dequeued = {
            let mut lanes = self.inner.lanes();
            let Some(lane) = lanes.get_mut(&machine_id) else {
                return Err(CoreError::conflict(format!("job {id} is not pending")));
            };
            if let Some(pos) = lane.pending.iter().position(|(j, _)| *j == id) {
                lane.pending.remove(pos);
                if lane.is_idle() {
                    lanes.remove(&machine_id);
                }
                true
            } else if let Some(active) = lane.active.as_ref().filter(|a| a.id == id) {
                active.cancel.cancel();
                false
            } else {
                return Err(CoreError::conflict(format!("job {id} is not pending")));
            }
        };

        info!(job_id = %id, machine_id = %machine_id, active = !dequeued, "removing job");
        if dequeued {
            worker::finish(&self.inner, id, JobOutcome::Removed);
        }
        Ok(())
    }

    /// Cancel every unfinished job of one device. Returns how many were
    /// cancelled.
    pub fn remove_device_jobs(&self, machine_id: &MachineId) -> usize {
        let mut removed = 0;
        for job in self.jobs_for_device(machine_id) {
            if !job.state.is_terminal() && self.remove(job.id).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    pub fn job(&self, id: JobId) -> Option<Job> {
        self.inner.jobs.get(&id).map(|j| j.clone())
    }

    /// Every known job of one device, oldest first.
    pub fn jobs_for_device(&self, machine_id: &MachineId) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .inner
            .jobs
            .iter()
            .filter(|j| j.machine_id == *machine_id)
            .map(|j| j.clone())
            .collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    /// Whether the device has an unfinished job, optionally of one
    /// operation type.
    pub fn has_outstanding(&self, machine_id: &MachineId, operation: Option<Operation>) -> bool {
        self.inner.jobs.iter().any(|j| {
            j.machine_id == *machine_id
                && !j.state.is_terminal()
                && operation.is_none_or(|op| j.operation() == op)
        })
    }

    /// Restart delivery for a device, e.g. after it reconnects.
    pub fn resume(&self, machine_id: &MachineId) {
        worker::kick(&self.inner, machine_id);
    }

    /// Restart delivery for every lane with queued work.
    pub fn resume_all(&self) {
        let machines: Vec<MachineId> = self.inner.lanes().keys().cloned().collect();
        for machine_id in machines {
            worker::kick(&self.inner, &machine_id);
        }
    }

    /// Forget finished jobs last updated more than `older_than` ago.
    pub fn purge_finished(&self, older_than: Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(older_than) else {
            return 0;
        };
        let cutoff = Utc::now() - age;
        let before = self.inner.jobs.len();
        self.inner
            .jobs
            .retain(|_, j| !(j.state.is_terminal() && j.updated_at < cutoff));
        before - self.inner.jobs.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Stop all lanes. Active jobs go back to `queued` and no outcome
    /// handler runs for them.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests;
