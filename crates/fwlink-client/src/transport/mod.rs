//! Transport layer for image upload
//!
//! A transport pushes an [`UpdateImage`] to the device and reports what
//! happened as an ordered stream of [`TransportEvent`]s: zero or more
//! non-decreasing progress updates, then exactly one
//! [`TransportEvent::Finished`].
//!
//! - [`HttpTransport`]: multipart POST over reqwest
//!
//! # Example
//!
//! ```ignore
//! use futures::StreamExt;
//! use fwlink_client::transport::{HttpTransport, Transport, TransportEvent};
//!
//! let transport = HttpTransport::from_config(&config)?;
//! let mut events = transport.send(image, CancellationToken::new());
//! while let Some(event) = events.next().await {
//!     if let TransportEvent::Finished { event, last_progress } = event {
//!         println!("{:?} at {}%", event, last_progress.percent);
//!     }
//! }
//! ```

mod http;

pub use http::HttpTransport;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::image::UpdateImage;
use crate::progress::TransferProgress;

/// Stream of events for one upload
pub type TransportStream = BoxStream<'static, TransportEvent>;

/// Event emitted while an upload is in flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// More of the payload went out
    Progress(TransferProgress),

    /// The upload ended; always the last event of the stream
    Finished {
        event: TerminalEvent,
        /// Progress at the moment the upload ended
        last_progress: TransferProgress,
    },
}

/// How an upload ended, from the transport's point of view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminalEvent {
    /// The device answered
    Completed(UploadResponse),

    /// The connection failed or closed before a full response arrived
    NetworkError { message: String },

    /// The overall transfer budget ran out
    TimedOut,

    /// Cancelled by the caller
    Aborted,
}

/// Raw response to the upload request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// HTTP status code
    pub status: u16,

    /// Response body as text
    pub body: String,
}

impl UploadResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Something that can push an image to the device
///
/// Implementations must release any in-flight network resources once
/// `cancel` fires and report [`TerminalEvent::Aborted`].
pub trait Transport: Send + Sync {
    /// Start uploading `image`
    ///
    /// Must be called from within a tokio runtime.
    fn send(&self, image: UpdateImage, cancel: CancellationToken) -> TransportStream;
}
