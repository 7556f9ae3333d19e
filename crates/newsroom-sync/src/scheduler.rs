use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use crate::service::FetchService;

/// Periodic fetches on `cron`, plus one check right away. Each firing runs
/// only if the minimum interval since the last success has passed.
pub async fn start_scheduler(service: Arc<FetchService>, cron: &str) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;

    let job_service = Arc::clone(&service);
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let service = Arc::clone(&job_service);
        Box::pin(async move {
            service.run_if_due().await;
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    sched.start().await.context("starting scheduler")?;
    info!(cron = %cron, "scheduler started");

    tokio::spawn(async move {
        service.run_if_due().await;
    });
    Ok(sched)
}
