//! Thin HTTP wrapper around the scan coordinator.
//!
//! Routes mirror the device-management service this scanner slots into:
//! `POST /api/rs485/scan` starts a sweep, `GET` polls it. All validation of
//! request bounds lives here; the coordinator itself accepts anything.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::scanner::{ScanCoordinator, DEFAULT_TIMEOUT};
use crate::types::ScanParams;

#[derive(Clone)]
pub struct AppState {
    coordinator: Arc<ScanCoordinator>,
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub port: String,
    pub baudrate: u32,
    pub start_address: u8,
    pub end_address: u8,
    #[serde(alias = "register_address")]
    pub register: u16,
    #[serde(default = "default_function")]
    pub function: u8,
    #[serde(default = "default_count")]
    pub count: u16,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub device_id: Option<i64>,
    #[serde(default)]
    pub device_name: Option<String>,
}

fn default_function() -> u8 {
    3
}

fn default_count() -> u16 {
    1
}

impl ScanRequest {
    /// Bounds-check the request and convert it into scan parameters.
    fn into_params(self) -> Result<ScanParams, String> {
        if self.port.is_empty() {
            return Err("port is required".into());
        }
        if self.baudrate == 0 {
            return Err("baudrate is required".into());
        }
        for (name, value) in [
            ("start_address", self.start_address),
            ("end_address", self.end_address),
        ] {
            if !(1..=247).contains(&value) {
                return Err(format!("{name} must be within 1..=247"));
            }
        }
        if self.start_address > self.end_address {
            return Err("start_address must be <= end_address".into());
        }
        if !(1..=4).contains(&self.function) {
            return Err("function must be within 1..=4".into());
        }
        if !(1..=4).contains(&self.count) {
            return Err("count must be within 1..=4".into());
        }
        let timeout = match self.timeout_ms {
            Some(ms) if (1..5000).contains(&ms) => Duration::from_millis(ms),
            Some(_) => return Err("timeout_ms must be within 1..5000".into()),
            None => DEFAULT_TIMEOUT,
        };
        Ok(ScanParams {
            port: self.port,
            baud_rate: self.baudrate,
            start_address: self.start_address,
            end_address: self.end_address,
            register: self.register,
            function: self.function,
            count: self.count,
            timeout,
            device_id: self.device_id,
            device_name: self.device_name,
        })
    }
}

/// Build the API router over a shared coordinator.
pub fn router(coordinator: Arc<ScanCoordinator>) -> Router {
    let state = AppState { coordinator };
    Router::new()
        .route("/api/rs485/scan", post(start_scan).get(list_scans))
        .route("/api/rs485/scan/{job_id}", get(get_scan))
        .route("/api/rs485/scan/{job_id}/cancel", post(cancel_scan))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API on `bind` until the listener fails or the task is dropped.
pub async fn serve(bind: &str, coordinator: Arc<ScanCoordinator>) -> Result<()> {
    let app = router(coordinator);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "scan API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn start_scan(
    State(app): State<AppState>,
    Json(req): Json<ScanRequest>,
) -> impl IntoResponse {
    match req.into_params() {
        Ok(params) => {
            let summary = app.coordinator.start_scan(params);
            (StatusCode::CREATED, Json(summary)).into_response()
        }
        Err(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
    }
}

async fn list_scans(State(app): State<AppState>) -> impl IntoResponse {
    Json(app.coordinator.list_jobs())
}

async fn get_scan(State(app): State<AppState>, Path(job_id): Path<String>) -> impl IntoResponse {
    match app.coordinator.get_job(&job_id) {
        Some(summary) => (StatusCode::OK, Json(summary)).into_response(),
        None => (StatusCode::NOT_FOUND, "Scan job not found").into_response(),
    }
}

async fn cancel_scan(State(app): State<AppState>, Path(job_id): Path<String>) -> impl IntoResponse {
    match app.coordinator.cancel_job(&job_id) {
        Some(summary) => (StatusCode::OK, Json(summary)).into_response(),
        None => (StatusCode::NOT_FOUND, "Scan job not found").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(body: serde_json::Value) -> ScanRequest {
        serde_json::from_value(body).expect("payload deserializes")
    }

    #[test]
    fn defaults_applied() {
        let req = request(json!({
            "port": "/dev/ttyUSB0",
            "baudrate": 9600,
            "start_address": 1,
            "end_address": 5,
            "register": 10,
        }));
        let params = req.into_params().expect("valid");
        assert_eq!(params.function, 3);
        assert_eq!(params.count, 1);
        assert_eq!(params.timeout, DEFAULT_TIMEOUT);
        assert!(params.device_id.is_none());
    }

    #[test]
    fn register_address_alias_accepted() {
        let req = request(json!({
            "port": "/dev/ttyUSB0",
            "baudrate": 9600,
            "start_address": 1,
            "end_address": 5,
            "register_address": 42,
        }));
        assert_eq!(req.into_params().expect("valid").register, 42);
    }

    #[test]
    fn rejects_inverted_range() {
        let req = request(json!({
            "port": "/dev/ttyUSB0",
            "baudrate": 9600,
            "start_address": 5,
            "end_address": 1,
            "register": 0,
        }));
        let err = req.into_params().unwrap_err();
        assert!(err.contains("start_address"));
    }

    #[test]
    fn rejects_out_of_bounds_fields() {
        let cases = [
            json!({"port": "p", "baudrate": 9600, "start_address": 0, "end_address": 5, "register": 0}),
            json!({"port": "p", "baudrate": 9600, "start_address": 1, "end_address": 248, "register": 0}),
            json!({"port": "p", "baudrate": 9600, "start_address": 1, "end_address": 5, "register": 0, "function": 5}),
            json!({"port": "p", "baudrate": 9600, "start_address": 1, "end_address": 5, "register": 0, "count": 9}),
            json!({"port": "p", "baudrate": 9600, "start_address": 1, "end_address": 5, "register": 0, "timeout_ms": 6000}),
            json!({"port": "", "baudrate": 9600, "start_address": 1, "end_address": 5, "register": 0}),
            json!({"port": "p", "baudrate": 0, "start_address": 1, "end_address": 5, "register": 0}),
        ];
        for body in cases {
            assert!(request(body.clone()).into_params().is_err(), "accepted: {body}");
        }
    }

    #[test]
    fn timeout_ms_is_carried() {
        let req = request(json!({
            "port": "/dev/ttyUSB0",
            "baudrate": 9600,
            "start_address": 1,
            "end_address": 5,
            "register": 0,
            "timeout_ms": 750,
        }));
        let params = req.into_params().expect("valid");
        assert_eq!(params.timeout, Duration::from_millis(750));
    }
}
