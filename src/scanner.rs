//! Scan coordinator: the public entry point of the scanning subsystem.
//!
//! Owns the job table and the per-port worker registry. Workers are created
//! lazily, one per distinct port path, and persist until
//! [`ScanCoordinator::shutdown`] so a port's connection stays warm across
//! scans of the same bus.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

use crate::transport::{BusOpener, SerialOpener};
use crate::types::{JobHandle, JobSummary, ScanParams};
use crate::worker::{self, WorkerHandle};

/// Default per-transaction timeout when a request does not supply one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(200);

pub struct ScanCoordinator {
    opener: Arc<dyn BusOpener>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, JobHandle>,
    workers: HashMap<String, WorkerHandle>,
}

impl ScanCoordinator {
    /// Coordinator with an injected bus opener (tests use a simulated one).
    pub fn new(opener: Arc<dyn BusOpener>) -> Self {
        Self {
            opener,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Coordinator scanning real serial ports.
    pub fn with_serial() -> Self {
        Self::new(Arc::new(SerialOpener))
    }

    /// Create a job for `params` and enqueue it on the port's worker.
    ///
    /// Returns immediately with the queued job's summary; callers poll
    /// [`Self::get_job`] for progress. Range ordering is not validated
    /// here: an inverted range simply yields an empty sweep.
    pub fn start_scan(&self, params: ScanParams) -> JobSummary {
        let job = JobHandle::new(params);
        let summary = job.snapshot();
        let mut inner = self.inner.lock();
        inner.jobs.insert(job.id.clone(), job.clone());
        let port = job.params.port.clone();
        let handle = inner
            .workers
            .entry(port.clone())
            .or_insert_with(|| worker::spawn(port, Arc::clone(&self.opener)));
        handle.enqueue(job.clone());
        info!(job = %job.id, port = %job.params.port, total = summary.total, "scan queued");
        summary
    }

    pub fn get_job(&self, job_id: &str) -> Option<JobSummary> {
        self.inner.lock().jobs.get(job_id).map(JobHandle::snapshot)
    }

    pub fn list_jobs(&self) -> Vec<JobSummary> {
        self.inner
            .lock()
            .jobs
            .values()
            .map(JobHandle::snapshot)
            .collect()
    }

    /// Request cooperative cancellation of a job.
    ///
    /// Advisory only: an in-flight sweep observes the request at its next
    /// address-iteration boundary. Returns the job's current summary, or
    /// `None` for an unknown id.
    pub fn cancel_job(&self, job_id: &str) -> Option<JobSummary> {
        let job = self.inner.lock().jobs.get(job_id).cloned()?;
        job.cancel.cancel();
        info!(job = %job.id, "cancellation requested");
        Some(job.snapshot())
    }

    /// Stop every port worker, wait for their connections to be released,
    /// and discard all job state.
    pub async fn shutdown(&self) {
        let workers: Vec<WorkerHandle> = {
            let mut inner = self.inner.lock();
            inner.workers.drain().map(|(_, handle)| handle).collect()
        };
        for handle in workers {
            handle.stop().await;
        }
        self.inner.lock().jobs.clear();
        info!("scan coordinator stopped");
    }
}
