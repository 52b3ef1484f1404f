use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::{format_description::well_known, OffsetDateTime};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Immutable parameters of one address sweep.
#[derive(Debug, Clone)]
pub struct ScanParams {
    /// Serial device path, e.g. `/dev/ttyUSB0`.
    pub port: String,
    pub baud_rate: u32,
    /// Inclusive device address range. An inverted range sweeps nothing.
    pub start_address: u8,
    pub end_address: u8,
    pub register: u16,
    pub function: u8,
    /// Registers read per probe.
    pub count: u16,
    /// Per-transaction read timeout.
    pub timeout: Duration,
    /// Opaque passthrough for display; the scanner never interprets these.
    pub device_id: Option<i64>,
    pub device_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses are final; no job field changes after one is set.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }
}

/// One validated probe response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResultEntry {
    pub address: u8,
    pub register: u16,
    pub function: u8,
    /// Lowercase hex of the full response buffer as read.
    pub raw: String,
    pub value: u64,
}

/// Snapshot of a job, as handed to callers and serialized over HTTP.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: String,
    pub status: JobStatus,
    pub progress: u32,
    pub total: u32,
    pub results: Vec<ScanResultEntry>,
    pub error: Option<String>,
    pub started_at: String,
    pub device_id: Option<i64>,
    pub device_name: Option<String>,
    pub port: String,
}

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    progress: u32,
    results: Vec<ScanResultEntry>,
    error: Option<String>,
}

/// Shared handle to one scan job.
///
/// The coordinator keeps a clone for lookup; the owning port worker is the
/// only writer of the mutable state. Cancellation is advisory via the
/// token, observed by the worker at address-iteration boundaries.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub id: String,
    pub params: Arc<ScanParams>,
    pub cancel: CancellationToken,
    started_at: String,
    total: u32,
    state: Arc<Mutex<JobState>>,
}

impl JobHandle {
    pub fn new(params: ScanParams) -> Self {
        let total = if params.end_address >= params.start_address {
            u32::from(params.end_address) - u32::from(params.start_address) + 1
        } else {
            0
        };
        Self {
            id: Uuid::new_v4().simple().to_string(),
            params: Arc::new(params),
            cancel: CancellationToken::new(),
            started_at: now_rfc3339(),
            total,
            state: Arc::new(Mutex::new(JobState {
                status: JobStatus::Queued,
                progress: 0,
                results: Vec::new(),
                error: None,
            })),
        }
    }

    pub fn status(&self) -> JobStatus {
        self.state.lock().status
    }

    /// Ignored once a terminal status has been recorded.
    pub fn set_status(&self, status: JobStatus) {
        let mut state = self.state.lock();
        if !state.status.is_terminal() {
            state.status = status;
        }
    }

    /// Mark the job failed with `message`. Ignored after a terminal status.
    pub fn fail(&self, message: String) {
        let mut state = self.state.lock();
        if !state.status.is_terminal() {
            state.status = JobStatus::Error;
            state.error = Some(message);
        }
    }

    pub fn bump_progress(&self) {
        let mut state = self.state.lock();
        if !state.status.is_terminal() {
            state.progress += 1;
        }
    }

    pub fn push_result(&self, entry: ScanResultEntry) {
        let mut state = self.state.lock();
        if !state.status.is_terminal() {
            state.results.push(entry);
        }
    }

    pub fn snapshot(&self) -> JobSummary {
        let state = self.state.lock();
        JobSummary {
            id: self.id.clone(),
            status: state.status,
            progress: state.progress,
            total: self.total,
            results: state.results.clone(),
            error: state.error.clone(),
            started_at: self.started_at.clone(),
            device_id: self.params.device_id,
            device_name: self.params.device_name.clone(),
            port: self.params.port.clone(),
        }
    }
}

/// RFC3339 UTC timestamp; falls back to the epoch string on format failure.
fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

/// Lowercase hex rendering of a raw frame.
pub fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ScanParams {
        ScanParams {
            port: "/dev/ttyUSB0".into(),
            baud_rate: 9600,
            start_address: 1,
            end_address: 5,
            register: 10,
            function: 3,
            count: 1,
            timeout: Duration::from_millis(200),
            device_id: Some(7),
            device_name: Some("pump".into()),
        }
    }

    #[test]
    fn total_is_inclusive_and_clamped() {
        let job = JobHandle::new(params());
        assert_eq!(job.snapshot().total, 5);

        let mut inverted = params();
        inverted.start_address = 5;
        inverted.end_address = 1;
        assert_eq!(JobHandle::new(inverted).snapshot().total, 0);
    }

    #[test]
    fn terminal_status_is_final() {
        let job = JobHandle::new(params());
        job.set_status(JobStatus::Running);
        job.bump_progress();
        job.set_status(JobStatus::Cancelled);
        // None of these may take effect any more.
        job.set_status(JobStatus::Completed);
        job.fail("late failure".into());
        job.bump_progress();
        let snap = job.snapshot();
        assert_eq!(snap.status, JobStatus::Cancelled);
        assert_eq!(snap.progress, 1);
        assert!(snap.error.is_none());
    }

    #[test]
    fn summary_serializes_expected_keys() {
        let job = JobHandle::new(params());
        let json = serde_json::to_value(job.snapshot()).unwrap();
        assert_eq!(json["status"], "queued");
        assert_eq!(json["progress"], 0);
        assert_eq!(json["total"], 5);
        assert_eq!(json["port"], "/dev/ttyUSB0");
        assert_eq!(json["device_id"], 7);
        assert_eq!(json["device_name"], "pump");
        assert!(json["error"].is_null());
        assert!(json["started_at"].is_string());
        assert!(json["results"].as_array().unwrap().is_empty());
    }

    #[test]
    fn hex_is_lowercase() {
        assert_eq!(to_hex(&[0x01, 0xAB, 0xFF]), "01abff");
        assert_eq!(to_hex(&[]), "");
    }
}
