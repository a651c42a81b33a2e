//! Outcome classification
//!
//! Turns the transport's terminal event into the transaction [`Outcome`].
//! The device reboots as soon as it has flashed the image, often before the
//! HTTP response makes it out, so a dropped connection after the whole
//! payload was sent counts as success.

use serde::{Deserialize, Serialize};

use crate::transport::{TerminalEvent, UploadResponse};

/// Result of the upload phase of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    /// The device accepted the image
    Success,

    /// The image was refused, locally or by the device
    ValidationFailure(String),

    /// The connection failed before the payload was fully sent
    ConnectionFailure(String),

    /// The overall transfer budget ran out
    Timeout,

    /// Cancelled by the caller
    Aborted,
}

/// How loudly a failure should be presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Human-readable description
    pub fn message(&self) -> String {
        match self {
            Self::Success => "firmware accepted, device is rebooting".to_string(),
            Self::ValidationFailure(reason) => reason.clone(),
            Self::ConnectionFailure(reason) => format!("connection error during upload: {}", reason),
            Self::Timeout => "upload timed out".to_string(),
            Self::Aborted => "upload aborted".to_string(),
        }
    }

    /// Corrupt or wrong-target images are critical, everything else is a
    /// warning the user can simply retry.
    pub fn severity(&self) -> Severity {
        match self {
            Self::Success => Severity::Info,
            Self::ValidationFailure(reason) => {
                let reason = reason.to_ascii_lowercase();
                if reason.contains("invalid") || reason.contains("magic byte") {
                    Severity::Critical
                } else {
                    Severity::Warning
                }
            }
            _ => Severity::Warning,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message())
    }
}

/// Body returned by the upload endpoint
#[derive(Debug, Deserialize)]
struct UploadReply {
    #[serde(default)]
    error: Option<String>,
}

impl UploadReply {
    fn parse(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }

    /// A null or empty error field means no error
    fn error(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }
}

/// Decide the outcome of an upload
///
/// `last_percent` is the last progress the transport observed before the
/// terminal event.
pub fn classify(event: &TerminalEvent, last_percent: u8) -> Outcome {
    match event {
        TerminalEvent::Completed(response) => classify_response(response),
        TerminalEvent::NetworkError { message } => {
            if last_percent >= 100 {
                Outcome::Success
            } else {
                Outcome::ConnectionFailure(message.clone())
            }
        }
        TerminalEvent::TimedOut => Outcome::Timeout,
        TerminalEvent::Aborted => Outcome::Aborted,
    }
}

fn classify_response(response: &UploadResponse) -> Outcome {
    let reply = UploadReply::parse(&response.body);

    if response.is_success() {
        match reply {
            Some(reply) => match reply.error() {
                Some(error) => Outcome::ValidationFailure(error.to_string()),
                None => Outcome::Success,
            },
            None => Outcome::ValidationFailure("unparseable response".to_string()),
        }
    } else {
        let reason = reply
            .as_ref()
            .and_then(UploadReply::error)
            .map(String::from)
            .unwrap_or_else(|| format!("upload failed: HTTP {}", response.status));
        Outcome::ValidationFailure(reason)
    }
}
