//! Firmware Update Client Library
//!
//! Drives a firmware update against an embedded device over an unreliable
//! link: validates the image, uploads it with progress tracking, decides
//! whether the device took it, then waits for the device to come back from
//! its reboot.
//!
//! # Example
//!
//! ```rust,no_run
//! use fwlink_client::{UpdateConfig, UpdateController, UpdateEvent, UpdateImage};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = UpdateConfig::builder("http://192.168.4.1").build();
//!     let controller = UpdateController::from_config(&config)?;
//!
//!     let image = UpdateImage::from_file("firmware.bin")?;
//!     let mut transaction = controller.start(image)?;
//!
//!     while let Some(event) = transaction.next_event().await {
//!         match event {
//!             UpdateEvent::Progress(p) => println!("{}%", p.percent),
//!             UpdateEvent::ReconnectAttempt(a) => {
//!                 println!("waiting for device ({}/{})", a.number, a.max_attempts)
//!             }
//!             UpdateEvent::Finished(report) => println!("{}", report.message()),
//!             _ => {}
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Testing
//!
//! The `testing` module provides [`testing::MockDevice`], an in-process
//! device emulating the upload and health endpoints.

pub mod config;
pub mod error;
pub mod image;
pub mod orchestrator;
pub mod outcome;
pub mod progress;
pub mod reconnect;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, UpdateConfig, UpdateConfigBuilder};
pub use error::{Result, UpdateError};
pub use image::{format_size, ImageRejection, ImageValidator, UpdateImage};
pub use orchestrator::{
    Caveat, NavigationGuard, NoopGuard, Transaction, TransactionReport, TransactionState,
    UpdateController, UpdateEvent,
};
pub use outcome::{classify, Outcome, Severity};
pub use progress::{ProgressTracker, TransferProgress};
pub use reconnect::{
    AttemptResult, HttpLivenessProbe, LivenessProbe, PollEvent, PollResult, ProbeError,
    ReconnectAttempt, ReconnectPoller, ReconnectPolicy,
};
pub use transport::{HttpTransport, TerminalEvent, Transport, TransportEvent, UploadResponse};
