use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use cardgen_contracts::jobs::{JobKind, JobRecord, JobRepository, JobStatus, QueueStatus};
use cardgen_contracts::request::GenerationRequest;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::batch::{panic_message, BatchItem, BatchOptions, BatchProcessor};
use crate::concurrency::WorkQueue;

pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 2;

type JobWork = Box<dyn FnOnce(&BatchProcessor, &mut dyn FnMut(f64)) -> JobResult + Send>;

struct PendingJob {
    id: String,
    kind: JobKind,
    work: JobWork,
}

/// Runs single and batch requests in the background and tracks each one
/// through an injected [`JobRepository`].
///
/// At most `max_concurrent_jobs` runner threads exist. They are started on
/// demand and pull jobs in submission order; extra jobs stay `queued`.
pub struct JobManager {
    processor: BatchProcessor,
    repository: Arc<dyn JobRepository>,
    queue: Arc<WorkQueue<PendingJob>>,
    max_runners: usize,
    runners: Mutex<Vec<JoinHandle<()>>>,
}

impl JobManager {
    pub fn new(processor: BatchProcessor, repository: Arc<dyn JobRepository>) -> Self {
        Self::with_max_concurrent(processor, repository, DEFAULT_MAX_CONCURRENT_JOBS)
    }

    pub fn with_max_concurrent(
        processor: BatchProcessor,
        repository: Arc<dyn JobRepository>,
        max_concurrent_jobs: usize,
    ) -> Self {
        Self {
            processor,
            repository,
            queue: Arc::new(WorkQueue::new()),
            max_runners: max_concurrent_jobs.max(1),
            runners: Mutex::new(Vec::new()),
        }
    }

    pub fn repository(&self) -> &Arc<dyn JobRepository> {
        &self.repository
    }

    pub fn submit_single(&self, request: GenerationRequest) -> Result<String> {
        self.submit(JobKind::Single, move |processor, _| {
            let outcome = processor.engine().generate(&request);
            let result = serde_json::to_value(&outcome).unwrap_or(Value::Null);
            if outcome.success {
                JobResult::Completed(result)
            } else {
                let message = outcome
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "generation failed".to_string());
                JobResult::Failed(message, Some(result))
            }
        })
    }

    pub fn submit_batch(&self, items: Vec<BatchItem>, options: BatchOptions) -> Result<String> {
        self.submit(JobKind::Batch, move |processor, progress| {
            let summary = processor.run_batch(items, options, progress);
            let mut result = serde_json::to_value(&summary).unwrap_or(Value::Null);
            if let Some(map) = result.as_object_mut() {
                map.insert("total".to_string(), json!(summary.total()));
            }
            JobResult::Completed(result)
        })
    }

    /// Cancels a job that has not started. Returns false once it is running
    /// or finished, or when the id is unknown.
    pub fn cancel(&self, id: &str) -> bool {
        let mut cancelled = false;
        self.repository.update(id, &mut |job| {
            if job.status == JobStatus::Queued {
                job.status = JobStatus::Cancelled;
                cancelled = true;
            }
        });
        if cancelled {
            info!(job_id = id, "job cancelled");
        }
        cancelled
    }

    pub fn status(&self, id: &str) -> Option<JobRecord> {
        self.repository.get(id)
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.repository.queue_status()
    }

    /// Number of runner threads started so far.
    pub fn runner_count(&self) -> usize {
        self.lock_runners().len()
    }

    /// Blocks until every submitted job has finished or been skipped.
    pub fn wait_all(&self) {
        self.queue.wait_idle();
    }

    fn submit<F>(&self, kind: JobKind, work: F) -> Result<String>
    where
        F: FnOnce(&BatchProcessor, &mut dyn FnMut(f64)) -> JobResult + Send + 'static,
    {
        let record = JobRecord::queued(kind);
        let id = record.id.clone();
        self.repository.create(record)?;

        if let Err(err) = self.ensure_runner() {
            if self.runner_count() == 0 {
                self.repository.update(&id, &mut |job| {
                    job.status = JobStatus::Failed;
                    job.error = Some(format!("job runner spawn failed: {err:#}"));
                });
                return Err(err);
            }
            warn!(error = %err, "extra job runner unavailable");
        }
        self.queue.push(PendingJob {
            id: id.clone(),
            kind,
            work: Box::new(work),
        });
        Ok(id)
    }

    fn ensure_runner(&self) -> Result<()> {
        let mut runners = self.lock_runners();
        if runners.len() >= self.max_runners {
            return Ok(());
        }
        let processor = self.processor.clone();
        let repository = Arc::clone(&self.repository);
        let queue = Arc::clone(&self.queue);
        let handle = thread::Builder::new()
            .name(format!("cardgen-job-runner-{}", runners.len()))
            .spawn(move || {
                while let Some(job) = queue.next() {
                    run_job(&processor, repository.as_ref(), job);
                    queue.finish();
                }
            })
            .context("failed to spawn job runner")?;
        runners.push(handle);
        Ok(())
    }

    fn lock_runners(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.runners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        self.queue.close();
        let runners: Vec<JoinHandle<()>> = self.lock_runners().drain(..).collect();
        for runner in runners {
            if runner.join().is_err() {
                warn!("job runner panicked");
            }
        }
    }
}

enum JobResult {
    Completed(Value),
    Failed(String, Option<Value>),
}

fn run_job(processor: &BatchProcessor, repository: &dyn JobRepository, job: PendingJob) {
    let PendingJob { id, kind, work } = job;
    if !start_job(repository, &id) {
        return;
    }
    info!(job_id = %id, ?kind, "job started");

    let mut progress = |percent: f64| {
        repository.update(&id, &mut |job| job.progress = percent);
    };
    let result = panic::catch_unwind(AssertUnwindSafe(|| work(processor, &mut progress)))
        .unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            warn!(job_id = %id, %message, "job panicked");
            JobResult::Failed(format!("job panicked: {message}"), None)
        });
    finish_job(repository, &id, result);
}

/// Moves a queued job to processing. False when it was cancelled meanwhile.
fn start_job(repository: &dyn JobRepository, id: &str) -> bool {
    let mut started = false;
    repository.update(id, &mut |job| {
        if job.status == JobStatus::Queued {
            job.status = JobStatus::Processing;
            started = true;
        }
    });
    started
}

fn finish_job(repository: &dyn JobRepository, id: &str, result: JobResult) {
    let mut result = Some(result);
    let updated = repository.update(id, &mut |job| match result.take() {
        Some(JobResult::Completed(value)) => {
            job.status = JobStatus::Completed;
            job.progress = 100.0;
            job.result = Some(value);
        }
        Some(JobResult::Failed(message, value)) => {
            job.status = JobStatus::Failed;
            job.error = Some(message);
            job.result = value;
        }
        None => {}
    });
    if let Some(job) = updated {
        info!(job_id = id, status = ?job.status, "job finished");
    }
}
