use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use chrono::TimeDelta;
use jobqueue::prelude::*;
use serde::Deserialize;
use serde_json::json;

#[tokio::main]
pub async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let queue = JobQueue::new(
        QueueConfig::default()
            .with_concurrency(2)
            .with_job_pruner(
                PrunerConfig::new(cron::Schedule::from_str("*/2 * * * * *").unwrap())
                    .with_pruner(Pruner::max_length(1, JobStatus::Completed).only("email")),
            ),
    );
    queue.register("email", EmailSender { from: "noreply@example.com".to_owned() });
    queue.register("report", build_report);

    let _subscription = queue.on_any(|event: &JobEvent| {
        println!("{} {} ({})", event.kind, event.job.id, event.job.job_type);
    });
    queue.start();

    let job = queue
        .add(
            "email",
            json!({ "to": "first@example.com" }),
            JobOptions::default()
                .with_max_attempts(2)
                .with_tags(vec!["initial_job"])
                .schedule_in(TimeDelta::seconds(2)),
        )
        .unwrap();
    println!("Inserted job {}", job.id);

    let job = queue
        .add(
            "email",
            json!({ "to": "second@example.com" }),
            JobOptions::default()
                .with_priority(Priority::High)
                .unique("welcome:second@example.com"),
        )
        .unwrap();
    println!("Inserted job {}", job.id);

    let report = queue
        .add(
            "report",
            json!(null),
            JobOptions::default()
                .with_retry_delay(TimeDelta::milliseconds(500))
                .with_backoff(Backoff::exponential().with_max(TimeDelta::seconds(2))),
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    queue.cancel(report.id);

    tokio::time::sleep(Duration::from_secs(5)).await;
    queue.shutdown().await.unwrap();
    println!("{:?}", queue.stats());
}

#[derive(Deserialize)]
struct Email {
    to: String,
}

struct EmailSender {
    from: String,
}

#[async_trait]
impl JobHandler for EmailSender {
    async fn handle(&self, ctx: JobContext) -> HandlerResult {
        let email: Email = ctx.payload_as()?;
        println!("Sending email from {} to {}", self.from, email.to);
        Ok(json!({ "sent_to": email.to }))
    }
}

async fn build_report(ctx: JobContext) -> HandlerResult {
    for step in 1..=10 {
        ctx.ensure_not_cancelled()?;
        ctx.update_progress(step * 10);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Ok(json!("report.pdf"))
}
