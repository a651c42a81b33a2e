//! Test utilities for fwlink-client
//!
//! Provides a mock device that speaks the upload and health endpoints.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::config::UpdateConfig;
use crate::error::Result;

/// How the mock device answers an upload
#[derive(Debug, Clone)]
pub enum UploadReply {
    /// `200 {"status":"ok"}`
    Accept,
    /// `200 {"error": <message>}`
    Reject(String),
    /// Arbitrary status and raw body
    Raw { status: u16, body: String },
    /// Wait before answering `Accept`
    Stall(Duration),
}

/// Mock device behaviour
#[derive(Debug, Clone)]
pub struct DeviceBehavior {
    pub upload: UploadReply,
    /// Health answers 200 from this probe on (never if `None`)
    pub alive_after: Option<u32>,
}

impl Default for DeviceBehavior {
    fn default() -> Self {
        Self {
            upload: UploadReply::Accept,
            alive_after: Some(1),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    uploads: AtomicU32,
    uploaded_bytes: AtomicUsize,
    health_probes: AtomicU32,
}

#[derive(Clone)]
struct DeviceState {
    behavior: DeviceBehavior,
    counters: Arc<Counters>,
}

/// A mock device that automatically shuts down when dropped
pub struct MockDevice {
    pub addr: SocketAddr,
    counters: Arc<Counters>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl MockDevice {
    /// Start a mock device on an ephemeral port
    ///
    /// # Example
    ///
    /// ```ignore
    /// use fwlink_client::testing::{DeviceBehavior, MockDevice};
    ///
    /// let device = MockDevice::start(DeviceBehavior::default()).await?;
    /// let controller = UpdateController::from_config(&device.config())?;
    /// ```
    pub async fn start(behavior: DeviceBehavior) -> Result<Self> {
        // Bind to any available port
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let counters = Arc::new(Counters::default());
        let state = DeviceState {
            behavior,
            counters: counters.clone(),
        };

        let router = Router::new()
            .route("/api/firmware/upload", post(upload))
            .route("/api/health/status", get(health))
            .layer(DefaultBodyLimit::max(16 * 1024 * 1024))
            .with_state(state);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        // Spawn the server
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        // Give server a moment to start
        tokio::time::sleep(Duration::from_millis(10)).await;

        Ok(Self {
            addr,
            counters,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Get the base URL of the mock device
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Configuration pointing at this device with fast reconnect pacing
    pub fn config(&self) -> UpdateConfig {
        UpdateConfig::builder(self.base_url())
            .reconnect_interval_ms(5)
            .reconnect_attempt_timeout_ms(500)
            .build()
    }

    pub fn uploads(&self) -> u32 {
        self.counters.uploads.load(Ordering::SeqCst)
    }

    pub fn uploaded_bytes(&self) -> usize {
        self.counters.uploaded_bytes.load(Ordering::SeqCst)
    }

    pub fn health_probes(&self) -> u32 {
        self.counters.health_probes.load(Ordering::SeqCst)
    }

    /// Shutdown the device gracefully
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        // Send shutdown signal if not already done
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        // Abort the task if still running
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn upload(State(state): State<DeviceState>, body: Bytes) -> (StatusCode, String) {
    state.counters.uploads.fetch_add(1, Ordering::SeqCst);
    state
        .counters
        .uploaded_bytes
        .fetch_add(body.len(), Ordering::SeqCst);

    match &state.behavior.upload {
        UploadReply::Accept => (StatusCode::OK, json!({ "status": "ok" }).to_string()),
        UploadReply::Reject(message) => (StatusCode::OK, json!({ "error": message }).to_string()),
        UploadReply::Raw { status, body } => (
            StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body.clone(),
        ),
        UploadReply::Stall(delay) => {
            tokio::time::sleep(*delay).await;
            (StatusCode::OK, json!({ "status": "ok" }).to_string())
        }
    }
}

async fn health(State(state): State<DeviceState>) -> (StatusCode, Json<Value>) {
    let probe = state.counters.health_probes.fetch_add(1, Ordering::SeqCst) + 1;
    match state.behavior.alive_after {
        Some(n) if probe >= n => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        _ => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "booting" })),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_behavior() {
        let behavior = DeviceBehavior::default();
        assert!(matches!(behavior.upload, UploadReply::Accept));
        assert_eq!(behavior.alive_after, Some(1));
    }
}
