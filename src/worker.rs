//! Per-port serial worker.
//!
//! A shared RS-485 bus cannot tolerate concurrent transactions, so every
//! physical port gets exactly one worker task that executes its queued jobs
//! strictly in submission order. The worker owns the port's only open
//! [`BusLink`] and keeps it warm across jobs, reopening only when the
//! requested baud rate differs or after an I/O failure forced it closed.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec;
use crate::transport::{BusLink, BusOpener, ScanError};
use crate::types::{JobHandle, JobStatus, ScanResultEntry, to_hex};

/// Coordinator-side handle to a spawned worker.
pub struct WorkerHandle {
    queue: mpsc::UnboundedSender<JobHandle>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Enqueue a job. Jobs run in FIFO order; this never blocks.
    pub fn enqueue(&self, job: JobHandle) {
        // The receiver lives as long as the worker task; a send failure
        // only happens during shutdown, when the job is discarded anyway.
        let _ = self.queue.send(job);
    }

    /// Stop the worker and wait for the serial connection to be released.
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

/// Spawn the worker task for `port`. One call per distinct port.
pub fn spawn(port: String, opener: Arc<dyn BusOpener>) -> WorkerHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let worker = PortWorker {
        port,
        opener,
        link: None,
        current_baud: None,
    };
    let task = tokio::spawn(worker.run(rx));
    WorkerHandle { queue: tx, task }
}

struct PortWorker {
    port: String,
    opener: Arc<dyn BusOpener>,
    /// The at-most-one open connection for this port.
    link: Option<Box<dyn BusLink>>,
    current_baud: Option<u32>,
}

impl PortWorker {
    async fn run(mut self, mut queue: mpsc::UnboundedReceiver<JobHandle>) {
        debug!(port = %self.port, "port worker started");
        while let Some(job) = queue.recv().await {
            self.execute(job).await;
        }
        self.close_link();
        debug!(port = %self.port, "port worker stopped");
    }

    /// Run one job to a terminal status. Failures land in the job record;
    /// the worker itself always survives to serve the next job.
    async fn execute(&mut self, job: JobHandle) {
        job.set_status(JobStatus::Running);
        debug!(port = %self.port, job = %job.id, "starting scan job");

        if let Err(e) = self.ensure_link(&job).await {
            warn!(port = %self.port, job = %job.id, error = %e, "connection failed");
            job.fail(e.to_string());
            return;
        }
        let Some(link) = self.link.as_mut() else {
            return;
        };

        match sweep(link.as_mut(), &job).await {
            Ok(()) => {
                debug!(port = %self.port, job = %job.id, status = ?job.status(), "scan job finished");
            }
            Err(e) => {
                warn!(port = %self.port, job = %job.id, error = %e, "scan aborted");
                job.fail(e.to_string());
                // Force a clean reopen for the next job.
                self.close_link();
            }
        }
    }

    /// Make sure a connection is open at the job's baud rate, closing and
    /// reopening if the rate changed or the link was lost.
    async fn ensure_link(&mut self, job: &JobHandle) -> Result<(), ScanError> {
        let params = &job.params;
        if self.link.is_some() && self.current_baud == Some(params.baud_rate) {
            return Ok(());
        }
        self.close_link();
        let link = self
            .opener
            .open(&params.port, params.baud_rate, params.timeout)
            .await?;
        info!(port = %self.port, baud = params.baud_rate, "serial connection opened");
        self.link = Some(link);
        self.current_baud = Some(params.baud_rate);
        Ok(())
    }

    fn close_link(&mut self) {
        if self.link.take().is_some() {
            info!(port = %self.port, "serial connection closed");
        }
        self.current_baud = None;
    }
}

/// Sweep the job's address range over `link`.
///
/// Sets `Cancelled` or `Completed` itself and returns `Ok`; returns `Err`
/// only for I/O failures, which the caller turns into the job's error and
/// a forced connection close.
async fn sweep(link: &mut dyn BusLink, job: &JobHandle) -> Result<(), ScanError> {
    let params = &job.params;
    let expected_len = 5 + params.count as usize * 2;
    for address in params.start_address..=params.end_address {
        if job.cancel.is_cancelled() {
            job.set_status(JobStatus::Cancelled);
            return Ok(());
        }
        let request =
            codec::build_request(address, params.function, params.register, params.count);
        link.clear_input().await?;
        link.write_frame(&request).await?;
        let response = link.read_response(expected_len, params.timeout).await?;
        job.bump_progress();
        if !codec::validate_response(&response, address, params.function, params.count) {
            // No device (or a garbled frame) at this address; keep sweeping.
            continue;
        }
        let value = codec::parse_value(&response, params.count);
        debug!(port = %params.port, address, value, "device responded");
        job.push_result(ScanResultEntry {
            address,
            register: params.register,
            function: params.function,
            raw: to_hex(&response),
            value,
        });
    }
    job.set_status(JobStatus::Completed);
    Ok(())
}
