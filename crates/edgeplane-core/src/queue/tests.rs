#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use edgeplane_api::{AgentReply, DeviceRequest};
use pretty_assertions::assert_eq;

use super::*;
use crate::model::{JobResponse, NewJob, Priority};
use crate::test_support::{FakeTransport, RecordingHandler, eventually};

fn queue(transport: &Arc<FakeTransport>) -> (JobQueue, Arc<RecordingHandler>) {
    let handler = Arc::new(RecordingHandler::default());
    let queue = JobQueue::new(
        Arc::clone(transport) as Arc<dyn AgentTransport>,
        Arc::clone(&handler) as Arc<dyn OutcomeHandler>,
        QueueConfig {
            job_timeout: Duration::from_secs(5),
        },
    );
    (queue, handler)
}

fn job(machine: &str, message: &str, priority: Priority, attempts: u32) -> NewJob {
    NewJob {
        machine_id: machine.into(),
        org: "org".into(),
        priority,
        attempts,
        tasks: vec![DeviceRequest::agent(message)],
        response: JobResponse::Sync {
            device_id: "dev".into(),
        },
        actor: "tester".into(),
    }
}

fn state(queue: &JobQueue, id: JobId) -> JobState {
    queue.job(id).unwrap().state
}

#[tokio::test(start_paused = true)]
async fn jobs_for_one_device_are_delivered_one_at_a_time_in_order() {
    let transport = FakeTransport::new();
    transport.connect("m1");
    transport.set_delay(Duration::from_millis(20));
    let (queue, handler) = queue(&transport);

    let ids: Vec<JobId> = (0..6)
        .map(|n| queue.submit(job("m1", &format!("task-{n}"), Priority::Normal, 1)))
        .collect();

    eventually(|| handler.outcomes().len() == ids.len()).await;

    assert_eq!(transport.max_in_flight(), 1);
    let expected: Vec<String> = (0..6).map(|n| format!("task-{n}")).collect();
    assert_eq!(transport.sent_messages(), expected);
    assert!(ids.iter().all(|id| state(&queue, *id) == JobState::Complete));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submits_for_one_device_still_run_one_at_a_time() {
    const SUBMITTERS: usize = 8;
    let transport = FakeTransport::new();
    transport.connect("m1");
    transport.set_delay(Duration::from_millis(5));
    let (queue, handler) = queue(&transport);
    let mut events = queue.subscribe();

    let barrier = Arc::new(tokio::sync::Barrier::new(SUBMITTERS));
    let submitters: Vec<_> = (0..SUBMITTERS)
        .map(|n| {
            let queue = queue.clone();
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                queue.submit(job("m1", &format!("task-{n}"), Priority::Normal, 1))
            })
        })
        .collect();
    let mut ids = Vec::with_capacity(SUBMITTERS);
    for submitter in submitters {
        ids.push(submitter.await.unwrap());
    }

    eventually(|| handler.outcomes().len() == SUBMITTERS).await;
    assert_eq!(transport.max_in_flight(), 1);
    assert!(ids.iter().all(|id| state(&queue, *id) == JobState::Complete));

    // Each job finishes before the next one starts.
    let mut running: Option<JobId> = None;
    let mut started = 0;
    while started < SUBMITTERS || running.is_some() {
        match events.recv().await.unwrap() {
            JobEvent::Queued { .. } => {}
            JobEvent::Started { id, .. } => {
                assert_eq!(running, None, "job {id} started while another was active");
                running = Some(id);
                started += 1;
            }
            JobEvent::Finished { id, .. } => {
                assert_eq!(running, Some(id));
                running = None;
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn a_stuck_device_does_not_block_another() {
    let transport = FakeTransport::new();
    transport.connect("slow");
    transport.connect("fast");
    transport.hold("slow");
    let (queue, _handler) = queue(&transport);

    let slow = queue.submit(job("slow", "slow-task", Priority::Normal, 1));
    eventually(|| state(&queue, slow) == JobState::Active).await;

    let fast = queue.submit(job("fast", "fast-task", Priority::Normal, 1));
    eventually(|| state(&queue, fast) == JobState::Complete).await;
    assert_eq!(state(&queue, slow), JobState::Active);
}

#[tokio::test(start_paused = true)]
async fn higher_priority_jumps_ahead_fifo_within_priority() {
    let transport = FakeTransport::new();
    transport.connect("m1");
    transport.hold("m1");
    let (queue, handler) = queue(&transport);

    let first = queue.submit(job("m1", "first", Priority::Normal, 1));
    eventually(|| state(&queue, first) == JobState::Active).await;

    queue.submit(job("m1", "low", Priority::Low, 1));
    queue.submit(job("m1", "normal-1", Priority::Normal, 1));
    queue.submit(job("m1", "high", Priority::High, 1));
    queue.submit(job("m1", "normal-2", Priority::Normal, 1));

    transport.release("m1", 5);
    eventually(|| handler.outcomes().len() == 5).await;
    assert_eq!(
        transport.sent_messages(),
        vec!["first", "high", "normal-1", "normal-2", "low"]
    );
}

#[tokio::test(start_paused = true)]
async fn removing_a_queued_job_runs_the_removed_handler_once() {
    let transport = FakeTransport::new();
    transport.connect("m1");
    transport.hold("m1");
    let (queue, handler) = queue(&transport);

    let active = queue.submit(job("m1", "active", Priority::Normal, 1));
    let queued = queue.submit(job("m1", "queued", Priority::Normal, 1));
    eventually(|| state(&queue, active) == JobState::Active).await;

    queue.remove(queued).unwrap();
    assert_eq!(state(&queue, queued), JobState::Removed);
    assert!(matches!(queue.remove(queued), Err(CoreError::Conflict { .. })));

    transport.release("m1", 1);
    eventually(|| state(&queue, active) == JobState::Complete).await;

    assert_eq!(
        handler.outcomes(),
        vec![(queued, JobState::Removed), (active, JobState::Complete)]
    );
    assert_eq!(transport.sent_messages(), vec!["active"]);
}

#[tokio::test]
async fn removing_the_last_queued_job_of_an_offline_device_drops_its_lane() {
    let transport = FakeTransport::new();
    let (queue, _handler) = queue(&transport);

    let id = queue.submit(job("m1", "config", Priority::Normal, 1));
    assert!(queue.inner.lanes().contains_key(&MachineId::from("m1")));

    queue.remove(id).unwrap();
    assert_eq!(state(&queue, id), JobState::Removed);
    assert!(queue.inner.lanes().is_empty());
}

#[test]
fn requeued_job_keeps_its_place_in_the_priority_order() {
    let mut lane = Lane::default();
    lane.enqueue(JobId(2), Priority::High);
    lane.enqueue(JobId(3), Priority::Normal);
    lane.enqueue(JobId(4), Priority::Low);

    lane.requeue(JobId(1), Priority::Normal);

    let order: Vec<JobId> = lane.pending.iter().map(|(id, _)| *id).collect();
    assert_eq!(order, vec![JobId(2), JobId(1), JobId(3), JobId(4)]);

    lane.requeue(JobId(5), Priority::High);
    assert_eq!(lane.pending.front(), Some(&(JobId(5), Priority::High)));
}

#[tokio::test(start_paused = true)]
async fn removing_the_active_job_cancels_its_delivery() {
    let transport = FakeTransport::new();
    transport.connect("m1");
    transport.hold("m1");
    let (queue, handler) = queue(&transport);

    let id = queue.submit(job("m1", "long", Priority::Normal, 1));
    eventually(|| state(&queue, id) == JobState::Active).await;

    queue.remove(id).unwrap();
    eventually(|| state(&queue, id) == JobState::Removed).await;
    assert_eq!(handler.outcomes(), vec![(id, JobState::Removed)]);
}

#[tokio::test(start_paused = true)]
async fn offline_device_holds_jobs_until_resumed() {
    let transport = FakeTransport::new();
    let (queue, handler) = queue(&transport);

    let id = queue.submit(job("m1", "config", Priority::Normal, 1));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(state(&queue, id), JobState::Queued);
    assert!(queue.has_outstanding(&"m1".into(), None));
    assert!(transport.sent_messages().is_empty());

    transport.connect("m1");
    queue.resume(&"m1".into());
    eventually(|| state(&queue, id) == JobState::Complete).await;
    assert_eq!(handler.outcomes().len(), 1);
    assert!(!queue.has_outstanding(&"m1".into(), None));
}

#[tokio::test(start_paused = true)]
async fn agent_error_consumes_attempts_then_fails() {
    let transport = FakeTransport::new();
    transport.connect("m1");
    transport.push_reply(Ok(AgentReply::failed("bad gateway")));
    transport.push_reply(Ok(AgentReply::failed("still bad")));
    let (queue, handler) = queue(&transport);

    let id = queue.submit(job("m1", "route", Priority::Normal, 2));
    eventually(|| state(&queue, id) == JobState::Failed).await;

    let job = queue.job(id).unwrap();
    assert_eq!(job.attempts_made, 2);
    assert_eq!(job.error.as_deref(), Some("agent error: still bad"));
    assert_eq!(handler.outcomes(), vec![(id, JobState::Failed)]);
}

#[tokio::test(start_paused = true)]
async fn retry_can_still_succeed() {
    let transport = FakeTransport::new();
    transport.connect("m1");
    transport.push_reply(Ok(AgentReply::failed("transient")));
    let (queue, _handler) = queue(&transport);

    let id = queue.submit(job("m1", "route", Priority::Normal, 3));
    eventually(|| state(&queue, id) == JobState::Complete).await;
    assert_eq!(queue.job(id).unwrap().attempts_made, 2);
}

#[tokio::test(start_paused = true)]
async fn timeout_fails_the_job() {
    let transport = FakeTransport::new();
    transport.connect("m1");
    transport.push_reply(Err(edgeplane_api::Error::Timeout {
        machine_id: "M1".into(),
        timeout_ms: 5000,
    }));
    let (queue, _handler) = queue(&transport);

    let id = queue.submit(job("m1", "route", Priority::Normal, 1));
    eventually(|| state(&queue, id) == JobState::Failed).await;
    assert_eq!(
        queue.job(id).unwrap().error.as_deref(),
        Some("no reply within 5000ms")
    );
}

#[tokio::test(start_paused = true)]
async fn remove_device_jobs_cancels_everything_pending() {
    let transport = FakeTransport::new();
    let (queue, handler) = queue(&transport);

    queue.submit(job("m1", "a", Priority::Normal, 1));
    queue.submit(job("m1", "b", Priority::Normal, 1));
    queue.submit(job("m2", "c", Priority::Normal, 1));

    assert_eq!(queue.remove_device_jobs(&"m1".into()), 2);
    assert_eq!(handler.outcomes().len(), 2);
    assert!(queue.has_outstanding(&"m2".into(), None));
    assert!(!queue.has_outstanding(&"m1".into(), None));
}

#[tokio::test]
async fn purge_finished_keeps_unfinished_jobs() {
    let transport = FakeTransport::new();
    transport.connect("m1");
    let (queue, _handler) = queue(&transport);

    let done = queue.submit(job("m1", "a", Priority::Normal, 1));
    eventually(|| state(&queue, done) == JobState::Complete).await;
    let waiting = queue.submit(job("offline", "b", Priority::Normal, 1));

    std::thread::sleep(Duration::from_millis(5));
    assert_eq!(queue.purge_finished(Duration::ZERO), 1);
    assert!(queue.job(done).is_none());
    assert!(queue.job(waiting).is_some());
}

#[tokio::test(start_paused = true)]
async fn events_follow_the_lifecycle() {
    let transport = FakeTransport::new();
    transport.connect("m1");
    let (queue, _handler) = queue(&transport);
    let mut events = queue.subscribe();

    let id = queue.submit(job("m1", "a", Priority::Normal, 1));
    let machine_id: MachineId = "m1".into();

    assert_eq!(
        events.recv().await.unwrap(),
        JobEvent::Queued {
            id,
            machine_id: machine_id.clone()
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        JobEvent::Started {
            id,
            machine_id: machine_id.clone(),
            attempt: 1
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        JobEvent::Finished {
            id,
            machine_id,
            state: JobState::Complete
        }
    );
}
