use std::{
    str::FromStr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use assert_matches::assert_matches;
use chrono::TimeDelta;
use jobqueue::prelude::*;
use serde_json::json;
use tokio_stream::StreamExt;

const TIMEOUT: Duration = Duration::from_secs(5);

fn queue(concurrency: usize) -> JobQueue {
    JobQueue::new(
        QueueConfig::default()
            .with_concurrency(concurrency)
            .with_poll_interval(Duration::from_millis(10)),
    )
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition was not met in time");
}

async fn wait_for_status(queue: &JobQueue, id: JobId, status: JobStatus) -> Job {
    wait_for(|| queue.get_job(id).is_some_and(|job| job.status == status)).await;
    queue.get_job(id).unwrap()
}

async fn echo(ctx: JobContext) -> HandlerResult {
    Ok(ctx.job().payload.clone())
}

async fn fail(_ctx: JobContext) -> HandlerResult {
    Err(HandlerError::msg("boom"))
}

async fn slow(_ctx: JobContext) -> HandlerResult {
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(json!(null))
}

async fn until_cancelled(ctx: JobContext) -> HandlerResult {
    ctx.cancelled().await;
    ctx.ensure_not_cancelled()?;
    Ok(json!(null))
}

async fn ignores_cancellation(ctx: JobContext) -> HandlerResult {
    while !ctx.is_cancelled() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(json!("finished anyway"))
}

async fn explode(_ctx: JobContext) -> HandlerResult {
    panic!("handler exploded")
}

#[tokio::test]
async fn ids_are_distinct() {
    let queue = queue(1);

    let ids: Vec<JobId> = (0..10)
        .map(|i| {
            queue
                .add("email", json!(i), JobOptions::default())
                .unwrap()
                .id
        })
        .collect();

    let mut deduped = ids.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(deduped.len(), 10);
    assert_eq!(queue.len(), 10);
}

#[tokio::test]
async fn unique_key_returns_existing_job() {
    let queue = queue(1);
    let added = Arc::new(AtomicUsize::new(0));
    let _subscription = queue.on(JobEventKind::Added, {
        let added = added.clone();
        move |_: &JobEvent| {
            added.fetch_add(1, Ordering::SeqCst);
        }
    });

    let first = queue
        .add("email", json!(1), JobOptions::default().unique("welcome:42"))
        .unwrap();
    let second = queue
        .add("email", json!(2), JobOptions::default().unique("welcome:42"))
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.payload, json!(1));
    assert_eq!(queue.len(), 1);
    assert_eq!(added.load(Ordering::SeqCst), 1);
    assert_eq!(queue.stats().total_added, 1);
}

#[tokio::test]
async fn unique_key_is_reusable_once_finished() {
    let queue = queue(1);
    queue.register("email", echo);
    queue.start();

    let first = queue
        .add("email", json!(1), JobOptions::default().unique("welcome:42"))
        .unwrap();
    wait_for_status(&queue, first.id, JobStatus::Completed).await;
    let second = queue
        .add("email", json!(2), JobOptions::default().unique("welcome:42"))
        .unwrap();

    assert_ne!(first.id, second.id);
    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn job_completes_with_handler_result() {
    let queue = queue(1);
    queue.register("email", echo);
    queue.start();

    let job = queue
        .add("email", json!({"to": "a@example.com"}), JobOptions::default())
        .unwrap();
    let job = wait_for_status(&queue, job.id, JobStatus::Completed).await;

    assert_eq!(job.result, Some(json!({"to": "a@example.com"})));
    assert_eq!(job.progress, 0);
    assert!(job.attempts >= 1 && job.attempts <= job.max_attempts);
    assert!(job.error.is_none());
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());
    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn exhausted_attempts_fail_the_job() {
    let queue = queue(1);
    let failed_events = Arc::new(AtomicUsize::new(0));
    let _subscription = queue.on(JobEventKind::Failed, {
        let failed_events = failed_events.clone();
        move |_: &JobEvent| {
            failed_events.fetch_add(1, Ordering::SeqCst);
        }
    });
    queue.register("email", fail);
    queue.start();

    let job = queue
        .add(
            "email",
            json!(null),
            JobOptions::default()
                .with_max_attempts(3)
                .with_retry_delay(TimeDelta::milliseconds(10)),
        )
        .unwrap();
    let job = wait_for_status(&queue, job.id, JobStatus::Failed).await;

    assert_eq!(job.attempts, 3);
    assert_eq!(job.error.as_deref(), Some("boom"));
    assert_eq!(job.errors.len(), 3);
    assert!(job.result.is_none());
    assert_eq!(failed_events.load(Ordering::SeqCst), 1);
    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_attempt_is_retried_after_delay() {
    let queue = queue(1);
    let calls = Arc::new(AtomicUsize::new(0));
    queue.register("flaky", {
        let calls = calls.clone();
        move |_ctx: JobContext| {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(HandlerError::msg("first attempt fails"))
                } else {
                    Ok(json!("ok"))
                }
            }
        }
    });
    queue.start();

    let job = queue
        .add(
            "flaky",
            json!(null),
            JobOptions::default()
                .with_max_attempts(3)
                .with_retry_delay(TimeDelta::milliseconds(50)),
        )
        .unwrap();
    let job = wait_for_status(&queue, job.id, JobStatus::Completed).await;

    assert_eq!(job.attempts, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_matches!(&job.errors[..], [error] if error.attempt == 1);
    assert!(job.errors[0].recorded_at + TimeDelta::milliseconds(50) <= job.started_at.unwrap());
    assert!(job.error.is_none());
    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn panicking_handler_fails_the_attempt() {
    let queue = queue(1);
    queue.register("explode", explode);
    queue.register("email", echo);
    queue.start();

    let exploded = queue
        .add("explode", json!(null), JobOptions::default().with_max_attempts(1))
        .unwrap();
    let exploded = wait_for_status(&queue, exploded.id, JobStatus::Failed).await;
    assert_eq!(exploded.error.as_deref(), Some("handler exploded"));

    // The scheduler keeps dispatching.
    let job = queue.add("email", json!(1), JobOptions::default()).unwrap();
    wait_for_status(&queue, job.id, JobStatus::Completed).await;
    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn highest_priority_runs_first() {
    let queue = queue(1);
    let order = Arc::new(Mutex::new(vec![]));
    queue.register("work", {
        let order = order.clone();
        move |ctx: JobContext| {
            let order = order.clone();
            async move {
                order.lock().unwrap().push(ctx.job().priority);
                Ok::<_, HandlerError>(json!(null))
            }
        }
    });

    for priority in [Priority::Low, Priority::Critical, Priority::Normal] {
        queue
            .add("work", json!(null), JobOptions::default().with_priority(priority))
            .unwrap();
    }
    queue.start();
    wait_for(|| queue.get_jobs_by_status(JobStatus::Completed).len() == 3).await;

    assert_eq!(
        *order.lock().unwrap(),
        [Priority::Critical, Priority::Normal, Priority::Low]
    );
    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn same_priority_runs_in_insertion_order() {
    let queue = queue(1);
    let order = Arc::new(Mutex::new(vec![]));
    queue.register("work", {
        let order = order.clone();
        move |ctx: JobContext| {
            let order = order.clone();
            async move {
                order.lock().unwrap().push(ctx.id());
                Ok::<_, HandlerError>(json!(null))
            }
        }
    });

    let ids: Vec<JobId> = (0..5)
        .map(|i| queue.add("work", json!(i), JobOptions::default()).unwrap().id)
        .collect();
    queue.start();
    wait_for(|| queue.get_jobs_by_status(JobStatus::Completed).len() == 5).await;

    assert_eq!(*order.lock().unwrap(), ids);
    queue.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_is_never_exceeded() {
    let queue = queue(2);
    let running = Arc::new(AtomicUsize::new(0));
    let max_running = Arc::new(AtomicUsize::new(0));
    queue.register("slow", {
        let running = running.clone();
        let max_running = max_running.clone();
        move |_ctx: JobContext| {
            let running = running.clone();
            let max_running = max_running.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_running.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, HandlerError>(json!(null))
            }
        }
    });
    let sampled_max = Arc::new(AtomicUsize::new(0));
    let _subscription = queue.on(JobEventKind::Started, {
        let queue = queue.clone();
        let sampled_max = sampled_max.clone();
        move |_: &JobEvent| {
            let running = queue.get_jobs_by_status(JobStatus::Running).len();
            sampled_max.fetch_max(running, Ordering::SeqCst);
        }
    });
    queue.start();

    for i in 0..5 {
        queue.add("slow", json!(i), JobOptions::default()).unwrap();
    }
    wait_for(|| queue.get_jobs_by_status(JobStatus::Completed).len() == 5).await;

    assert!(max_running.load(Ordering::SeqCst) <= 2);
    assert!(sampled_max.load(Ordering::SeqCst) <= 2);
    assert_eq!(queue.stats().active, 0);
    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn progress_is_clamped_and_reported() {
    let queue = queue(1);
    let reported = Arc::new(Mutex::new(vec![]));
    let _subscription = queue.on(JobEventKind::Progress, {
        let reported = reported.clone();
        move |event: &JobEvent| reported.lock().unwrap().push(event.job.progress)
    });
    queue.register("report", |ctx: JobContext| async move {
        ctx.update_progress(-5);
        ctx.update_progress(150);
        ctx.update_progress(42);
        Ok::<_, HandlerError>(json!(null))
    });
    queue.start();

    let job = queue.add("report", json!(null), JobOptions::default()).unwrap();
    let job = wait_for_status(&queue, job.id, JobStatus::Completed).await;

    assert_eq!(*reported.lock().unwrap(), [0, 100, 42]);
    assert_eq!(job.progress, 42);
    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn stats_success_rate() {
    let queue = queue(2);
    assert_eq!(queue.stats().success_rate, 0.0);
    queue.register("email", echo);
    queue.register("broken", fail);
    queue.start();

    for i in 0..3 {
        queue.add("email", json!(i), JobOptions::default()).unwrap();
    }
    queue
        .add("broken", json!(null), JobOptions::default().with_max_attempts(1))
        .unwrap();
    wait_for(|| queue.stats().total_completed + queue.stats().total_failed == 4).await;

    let stats = queue.stats();
    assert_eq!(stats.total_added, 4);
    assert_eq!(stats.total_completed, 3);
    assert_eq!(stats.total_failed, 1);
    assert_eq!(stats.active, 0);
    assert_eq!(stats.success_rate, 75.0);
    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn jobs_without_handler_fail() {
    let queue = queue(1);
    queue.start();

    let ids: Vec<JobId> = (0..3)
        .map(|i| queue.add("email", json!(i), JobOptions::default()).unwrap().id)
        .collect();

    for id in ids {
        let job = wait_for_status(&queue, id, JobStatus::Failed).await;
        assert!(job
            .error
            .unwrap()
            .contains("No handler registered for type: email"));
    }
    assert_eq!(queue.stats().total_failed, 3);
    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn cancel_and_retry_pending_job() {
    let queue = queue(1);
    let job = queue
        .add("email", json!(null), JobOptions::default())
        .unwrap();

    assert!(queue.cancel(job.id));
    assert!(!queue.cancel(job.id));
    let cancelled = queue.get_job(job.id).unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());

    assert!(queue.retry(job.id));
    let retried = queue.get_job(job.id).unwrap();
    assert_eq!(retried.status, JobStatus::Pending);
    assert_eq!(retried.attempts, 0);
    assert!(retried.error.is_none());

    assert!(!queue.retry(job.id));
}

#[tokio::test]
async fn cancel_is_rejected_for_finished_jobs() {
    let queue = queue(1);
    queue.register("email", echo);
    queue.start();

    let job = queue.add("email", json!(null), JobOptions::default()).unwrap();
    wait_for_status(&queue, job.id, JobStatus::Completed).await;

    assert!(!queue.cancel(job.id));
    assert!(!queue.retry(job.id));
    assert_eq!(
        queue.get_job(job.id).unwrap().status,
        JobStatus::Completed
    );
    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn running_job_observes_cancellation() {
    let queue = queue(1);
    let cancelled_events = Arc::new(AtomicUsize::new(0));
    let _subscription = queue.on(JobEventKind::Cancelled, {
        let cancelled_events = cancelled_events.clone();
        move |_: &JobEvent| {
            cancelled_events.fetch_add(1, Ordering::SeqCst);
        }
    });
    queue.register("long", until_cancelled);
    queue.start();

    let job = queue.add("long", json!(null), JobOptions::default()).unwrap();
    wait_for_status(&queue, job.id, JobStatus::Running).await;

    assert!(queue.cancel(job.id));
    let job = wait_for_status(&queue, job.id, JobStatus::Cancelled).await;

    assert!(job.cancelled_at.is_some());
    assert_eq!(cancelled_events.load(Ordering::SeqCst), 1);
    assert_eq!(queue.stats().total_failed, 0);
    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn cancellation_is_cooperative() {
    let queue = queue(1);
    queue.register("stubborn", ignores_cancellation);
    queue.start();

    let job = queue
        .add("stubborn", json!(null), JobOptions::default())
        .unwrap();
    wait_for_status(&queue, job.id, JobStatus::Running).await;

    assert!(queue.cancel(job.id));
    let job = wait_for_status(&queue, job.id, JobStatus::Completed).await;

    assert_eq!(job.result, Some(json!("finished anyway")));
    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn removed_running_job_is_not_resurrected() {
    let queue = queue(1);
    queue.register("long", until_cancelled);
    queue.register("email", echo);
    queue.start();

    let job = queue.add("long", json!(null), JobOptions::default()).unwrap();
    wait_for_status(&queue, job.id, JobStatus::Running).await;
    assert!(queue.remove(job.id));
    assert!(!queue.remove(job.id));

    // The slot is freed once the handler stops.
    let next = queue.add("email", json!(null), JobOptions::default()).unwrap();
    wait_for_status(&queue, next.id, JobStatus::Completed).await;
    assert!(queue.get_job(job.id).is_none());
    queue.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn removed_running_jobs_keep_their_slot() {
    let queue = queue(1);
    let running = Arc::new(AtomicUsize::new(0));
    let max_running = Arc::new(AtomicUsize::new(0));
    queue.register("stubborn", {
        let running = running.clone();
        let max_running = max_running.clone();
        move |_ctx: JobContext| {
            let running = running.clone();
            let max_running = max_running.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_running.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(200)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, HandlerError>(json!(null))
            }
        }
    });
    queue.start();

    let removed = queue
        .add("stubborn", json!(0), JobOptions::default())
        .unwrap();
    wait_for_status(&queue, removed.id, JobStatus::Running).await;
    assert!(queue.remove(removed.id));

    let cleared = queue
        .add("stubborn", json!(1), JobOptions::default())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(queue.get_job(cleared.id).unwrap().status, JobStatus::Pending);
    wait_for_status(&queue, cleared.id, JobStatus::Running).await;
    assert_eq!(queue.clear(Some(JobStatus::Running)), 1);

    let rest: Vec<JobId> = (2..4)
        .map(|i| {
            queue
                .add("stubborn", json!(i), JobOptions::default())
                .unwrap()
                .id
        })
        .collect();
    for id in rest {
        wait_for_status(&queue, id, JobStatus::Completed).await;
    }

    assert_eq!(max_running.load(Ordering::SeqCst), 1);
    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_job_can_be_retried_once_a_handler_exists() {
    let queue = queue(1);
    queue.start();

    let job = queue.add("email", json!("hi"), JobOptions::default()).unwrap();
    let failed = wait_for_status(&queue, job.id, JobStatus::Failed).await;
    assert_eq!(failed.attempts, 0);
    assert!(failed.error.is_some());

    queue.register("email", echo);
    queue.stop();
    assert!(queue.retry(job.id));
    let pending = queue.get_job(job.id).unwrap();
    assert_eq!(pending.status, JobStatus::Pending);
    assert_eq!(pending.attempts, 0);
    assert_eq!(pending.error, None);
    assert!(!queue.retry(job.id));

    queue.start();
    let completed = wait_for_status(&queue, job.id, JobStatus::Completed).await;
    assert_eq!(completed.result, Some(json!("hi")));
    assert_eq!(completed.attempts, 1);
    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn retry_is_rejected_for_running_job() {
    let queue = queue(1);
    queue.register("long", until_cancelled);
    queue.start();

    let job = queue.add("long", json!(null), JobOptions::default()).unwrap();
    wait_for_status(&queue, job.id, JobStatus::Running).await;

    assert!(!queue.retry(job.id));
    assert_eq!(queue.get_job(job.id).unwrap().attempts, 1);
    assert!(queue.cancel(job.id));
    wait_for_status(&queue, job.id, JobStatus::Cancelled).await;
    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn delayed_job_waits_until_scheduled() {
    let queue = queue(1);
    queue.register("email", echo);
    queue.start();

    let job = queue
        .add(
            "email",
            json!(null),
            JobOptions::default().schedule_in(TimeDelta::milliseconds(100)),
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(queue.get_job(job.id).unwrap().status, JobStatus::Pending);

    let completed = wait_for_status(&queue, job.id, JobStatus::Completed).await;
    assert!(completed.started_at.unwrap() >= job.scheduled_at);
    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn clear_by_status() {
    let queue = queue(1);
    let pending = queue.add("email", json!(1), JobOptions::default()).unwrap();
    let cancelled = queue.add("email", json!(2), JobOptions::default()).unwrap();
    queue.cancel(cancelled.id);

    assert_eq!(queue.clear(Some(JobStatus::Cancelled)), 1);
    assert!(queue.get_job(cancelled.id).is_none());
    assert!(queue.get_job(pending.id).is_some());

    assert_eq!(queue.clear(None), 1);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn queries_preserve_insertion_order() {
    let queue = queue(1);
    let a = queue.add("email", json!(1), JobOptions::default()).unwrap();
    let b = queue.add("sms", json!(2), JobOptions::default()).unwrap();
    let c = queue.add("email", json!(3), JobOptions::default()).unwrap();
    queue.cancel(b.id);

    let ids = |jobs: Vec<Job>| jobs.into_iter().map(|job| job.id).collect::<Vec<_>>();
    assert_eq!(ids(queue.get_jobs_by_type("email")), [a.id, c.id]);
    assert_eq!(ids(queue.get_jobs_by_status(JobStatus::Pending)), [a.id, c.id]);
    assert_eq!(ids(queue.get_jobs_by_status(JobStatus::Cancelled)), [b.id]);
    assert_eq!(ids(queue.jobs()), [a.id, b.id, c.id]);
}

#[tokio::test]
async fn events_follow_the_lifecycle() {
    let queue = queue(1);
    let received = Arc::new(Mutex::new(vec![]));
    let _subscription = queue.on_any({
        let received = received.clone();
        move |event: &JobEvent| received.lock().unwrap().push(event.kind)
    });
    queue.register("email", echo);
    queue.start();

    let job = queue.add("email", json!(null), JobOptions::default()).unwrap();
    wait_for_status(&queue, job.id, JobStatus::Completed).await;

    assert_eq!(
        *received.lock().unwrap(),
        [
            JobEventKind::Added,
            JobEventKind::Started,
            JobEventKind::Completed
        ]
    );
    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn panicking_listener_is_isolated() {
    let queue = queue(1);
    let received = Arc::new(AtomicUsize::new(0));
    let _panicking = queue.on(JobEventKind::Added, |_: &JobEvent| panic!("listener exploded"));
    let _counting = queue.on(JobEventKind::Added, {
        let received = received.clone();
        move |_: &JobEvent| {
            received.fetch_add(1, Ordering::SeqCst);
        }
    });
    queue.register("email", echo);
    queue.start();

    let job = queue.add("email", json!(null), JobOptions::default()).unwrap();
    wait_for_status(&queue, job.id, JobStatus::Completed).await;

    assert_eq!(received.load(Ordering::SeqCst), 1);
    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn unsubscribe_removes_only_that_listener() {
    let queue = queue(1);
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let subscription = queue.on(JobEventKind::Added, {
        let first = first.clone();
        move |_: &JobEvent| {
            first.fetch_add(1, Ordering::SeqCst);
        }
    });
    let _other = queue.on(JobEventKind::from_str("job:added").unwrap(), {
        let second = second.clone();
        move |_: &JobEvent| {
            second.fetch_add(1, Ordering::SeqCst);
        }
    });

    queue.add("email", json!(1), JobOptions::default()).unwrap();
    subscription.unsubscribe();
    subscription.unsubscribe();
    queue.add("email", json!(2), JobOptions::default()).unwrap();

    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn subscribe_streams_events() {
    let queue = queue(1);
    let mut completed = Box::pin(queue.subscribe(JobEventKind::Completed));
    queue.register("email", echo);
    queue.start();

    let job = queue.add("email", json!("hi"), JobOptions::default()).unwrap();
    let event = tokio::time::timeout(TIMEOUT, completed.next())
        .await
        .expect("no event received")
        .expect("stream ended");

    assert_eq!(event.kind, JobEventKind::Completed);
    assert_eq!(event.job.id, job.id);
    assert_eq!(event.job.result, Some(json!("hi")));
    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn stopped_queue_does_not_dispatch() {
    let queue = queue(1);
    queue.register("email", echo);
    queue.start();
    queue.stop();

    let job = queue.add("email", json!(null), JobOptions::default()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(queue.get_job(job.id).unwrap().status, JobStatus::Pending);

    queue.start();
    wait_for_status(&queue, job.id, JobStatus::Completed).await;
    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_waits_for_running_jobs() {
    let queue = queue(2);
    queue.register("slow", slow);
    queue.start();

    let job = queue.add("slow", json!(null), JobOptions::default()).unwrap();
    wait_for_status(&queue, job.id, JobStatus::Running).await;
    queue.shutdown().await.unwrap();

    assert!(!queue.is_running());
    assert_eq!(
        queue.get_job(job.id).unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn pruner_removes_finished_jobs() {
    let queue = JobQueue::new(
        QueueConfig::default()
            .with_poll_interval(Duration::from_millis(10))
            .with_job_pruner(
                PrunerConfig::new(cron::Schedule::from_str("* * * * * *").unwrap())
                    .with_pruner(Pruner::max_length(0, JobStatus::Completed)),
            ),
    );
    queue.register("email", echo);
    queue.start();

    let job = queue.add("email", json!(null), JobOptions::default()).unwrap();
    let pending = queue
        .add(
            "email",
            json!(null),
            JobOptions::default().schedule_in(TimeDelta::hours(1)),
        )
        .unwrap();
    wait_for(|| queue.get_job(job.id).is_none()).await;

    assert_eq!(
        queue.get_job(pending.id).map(|job| job.status),
        Some(JobStatus::Pending)
    );
    queue.shutdown().await.unwrap();
}
