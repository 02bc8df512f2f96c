// Lane driver: pops jobs off one device's lane and delivers them.

use std::sync::Arc;

use chrono::Utc;
use edgeplane_api::{AgentReply, DeviceRequest, MachineId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ActiveJob, JobEvent, JobFailure, JobOutcome, QueueInner};
use crate::model::{JobId, JobState};

/// Result of pushing a job's task list to the agent once.
enum Delivery {
    Done(AgentReply),
    Failed(JobFailure),
    /// No channel before the first task went out; nothing was applied.
    NotConnected,
    Cancelled,
}

/// Spawn a driver for the lane unless one is running, the lane is
/// empty, or the device is offline.
pub(super) fn kick(inner: &Arc<QueueInner>, machine_id: &MachineId) {
    let spawn = {
        let mut lanes = inner.lanes();
        let Some(lane) = lanes.get_mut(machine_id) else {
            return;
        };
        if lane.driving || lane.pending.is_empty() || inner.shutdown.is_cancelled() {
            false
        } else if inner.transport.is_connected(machine_id) {
            lane.driving = true;
            true
        } else {
            debug!(machine_id = %machine_id, queued = lane.pending.len(), "device offline, holding jobs");
            false
        }
    };

    if spawn {
        tokio::spawn(drive(Arc::clone(inner), machine_id.clone()));
    }
}

/// Deliver the lane's jobs one at a time until it drains, the device
/// disconnects, or the queue shuts down.
async fn drive(inner: Arc<QueueInner>, machine_id: MachineId) {
    loop {
        let (id, cancel) = {
            let mut lanes = inner.lanes();
            let Some(lane) = lanes.get_mut(&machine_id) else {
                return;
            };
            // Checked under the lanes lock so a concurrent `kick` after a
            // reconnect either sees `driving` or finds us gone.
            let next = if inner.shutdown.is_cancelled()
                || !inner.transport.is_connected(&machine_id)
            {
                None
            } else {
                lane.pending.pop_front()
            };
            let Some((id, _)) = next else {
                lane.driving = false;
                if lane.is_idle() {
                    lanes.remove(&machine_id);
                }
                return;
            };
            let cancel = inner.shutdown.child_token();
            lane.active = Some(ActiveJob {
                id,
                cancel: cancel.clone(),
            });
            (id, cancel)
        };

        let mut requeue = run_job(&inner, id, &cancel).await;
        if requeue && cancel.is_cancelled() && !inner.shutdown.is_cancelled() {
            // Removed while the device was dropping off.
            finish(&inner, id, JobOutcome::Removed);
            requeue = false;
        }

        let mut lanes = inner.lanes();
        if let Some(lane) = lanes.get_mut(&machine_id) {
            lane.active = None;
            if requeue {
                lane.requeue(id, inner.job_priority(id));
            }
        }
    }
}

/// Run one job to a terminal state. Returns `true` if it must go back
/// to the head of its priority band untouched.
async fn run_job(inner: &QueueInner, id: JobId, cancel: &CancellationToken) -> bool {
    let Some((machine_id, tasks)) = begin_attempt(inner, id) else {
        return false;
    };

    loop {
        let delivery = tokio::select! {
            biased;
            () = cancel.cancelled() => Delivery::Cancelled,
            delivery = deliver(inner, &machine_id, &tasks) => delivery,
        };

        match delivery {
            Delivery::Done(reply) => {
                finish(inner, id, JobOutcome::Complete(reply));
                return false;
            }
            Delivery::Cancelled if inner.shutdown.is_cancelled() => {
                set_state(inner, id, JobState::Queued, true);
                return false;
            }
            Delivery::Cancelled => {
                finish(inner, id, JobOutcome::Removed);
                return false;
            }
            Delivery::NotConnected => {
                debug!(job_id = %id, machine_id = %machine_id, "device went away before delivery");
                set_state(inner, id, JobState::Queued, true);
                return true;
            }
            Delivery::Failed(failure) => {
                if retry_allowed(inner, id, &failure) {
                    warn!(job_id = %id, machine_id = %machine_id, error = %failure, "attempt failed, retrying");
                    continue;
                }
                finish(inner, id, JobOutcome::Failed(failure));
                return false;
            }
        }
    }
}

/// Mark the job active and count an attempt. `None` if the job is gone
/// or already finished.
fn begin_attempt(inner: &QueueInner, id: JobId) -> Option<(MachineId, Vec<DeviceRequest>)> {
    let (machine_id, tasks, attempt) = {
        let mut job = inner.jobs.get_mut(&id)?;
        if job.state.is_terminal() {
            return None;
        }
        job.state = JobState::Active;
        job.attempts_made += 1;
        job.updated_at = Utc::now();
        (job.machine_id.clone(), job.tasks.clone(), job.attempts_made)
    };

    debug!(job_id = %id, machine_id = %machine_id, attempt, "job active");
    let _ = inner.events.send(JobEvent::Started {
        id,
        machine_id: machine_id.clone(),
        attempt,
    });
    Some((machine_id, tasks))
}

/// Count another attempt if the job has any left.
fn retry_allowed(inner: &QueueInner, id: JobId, failure: &JobFailure) -> bool {
    let Some(mut job) = inner.jobs.get_mut(&id) else {
        return false;
    };
    if job.attempts_made >= job.attempts {
        return false;
    }
    job.attempts_made += 1;
    job.error = Some(failure.to_string());
    job.updated_at = Utc::now();
    true
}

/// Non-terminal state change; `undo_attempt` gives back the attempt the
/// interrupted delivery counted.
fn set_state(inner: &QueueInner, id: JobId, state: JobState, undo_attempt: bool) {
    if let Some(mut job) = inner.jobs.get_mut(&id) {
        if job.state.is_terminal() {
            return;
        }
        job.state = state;
        if undo_attempt {
            job.attempts_made = job.attempts_made.saturating_sub(1);
        }
        job.updated_at = Utc::now();
    }
}

async fn deliver(inner: &QueueInner, machine_id: &MachineId, tasks: &[DeviceRequest]) -> Delivery {
    let mut last = AgentReply::ok(serde_json::Value::Null);
    for (idx, task) in tasks.iter().enumerate() {
        match inner
            .transport
            .send(machine_id, task.clone(), inner.config.job_timeout)
            .await
        {
            Ok(reply) if reply.ok => last = reply,
            Ok(reply) => return Delivery::Failed(JobFailure::Agent(reply.message_text())),
            Err(edgeplane_api::Error::NotConnected { .. }) if idx == 0 => {
                return Delivery::NotConnected;
            }
            Err(edgeplane_api::Error::Timeout { timeout_ms, .. }) => {
                return Delivery::Failed(JobFailure::Timeout { timeout_ms });
            }
            Err(e) => return Delivery::Failed(JobFailure::Unreachable(e.to_string())),
        }
    }
    Delivery::Done(last)
}

/// Move a job to its terminal state and run the outcome handler.
///
/// The terminal check and the state write happen under the job's map
/// entry lock, so a second call for the same job is a no-op.
pub(super) fn finish(inner: &QueueInner, id: JobId, outcome: JobOutcome) -> bool {
    let job = {
        let Some(mut job) = inner.jobs.get_mut(&id) else {
            return false;
        };
        if job.state.is_terminal() {
            return false;
        }
        job.state = outcome.state();
        if let JobOutcome::Failed(failure) = &outcome {
            job.error = Some(failure.to_string());
        }
        job.updated_at = Utc::now();
        job.clone()
    };

    match &outcome {
        JobOutcome::Complete(_) => {
            info!(job_id = %id, machine_id = %job.machine_id, operation = %job.operation(), "job complete");
        }
        JobOutcome::Failed(failure) => {
            warn!(job_id = %id, machine_id = %job.machine_id, operation = %job.operation(), error = %failure, "job failed");
        }
        JobOutcome::Removed => {
            info!(job_id = %id, machine_id = %job.machine_id, operation = %job.operation(), "job removed");
        }
    }

    inner.handler.on_outcome(&job, &outcome);
    let _ = inner.events.send(JobEvent::Finished {
        id,
        machine_id: job.machine_id,
        state: job.state,
    });
    true
}

impl QueueInner {
    fn job_priority(&self, id: JobId) -> crate::model::Priority {
        self.jobs.get(&id).map(|j| j.priority).unwrap_or_default()
    }
}
