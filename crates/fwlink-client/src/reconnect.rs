//! Post-update reconnect polling
//!
//! After a successful upload the device reboots into the new image. The
//! [`ReconnectPoller`] probes a lightweight liveness endpoint a bounded
//! number of times until the device answers again.

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::CACHE_CONTROL;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};
use url::Url;

use crate::config::{ReconnectConfig, UpdateConfig};
use crate::error::Result;

/// Why a single probe did not find the device alive
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unhealthy status {0}")]
    Status(u16),
}

/// Checks whether the device is reachable
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// `Ok(())` when the device answered with a success status
    async fn probe(&self, timeout: Duration) -> std::result::Result<(), ProbeError>;
}

/// `GET` on the device health endpoint
#[derive(Debug, Clone)]
pub struct HttpLivenessProbe {
    client: Client,
    url: Url,
    auth: Option<(String, String)>,
}

impl HttpLivenessProbe {
    pub fn from_config(config: &UpdateConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.timeouts.connect())
            .build()?;
        Self::with_client(client, config)
    }

    pub fn with_client(client: Client, config: &UpdateConfig) -> Result<Self> {
        let url = Url::parse(&config.connection.base_url)?.join(&config.endpoints.health)?;
        let auth = config
            .connection
            .api_key
            .as_ref()
            .map(|key| (config.connection.api_key_header.clone(), key.clone()));
        Ok(Self { client, url, auth })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl LivenessProbe for HttpLivenessProbe {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn probe(&self, timeout: Duration) -> std::result::Result<(), ProbeError> {
        let mut request = self
            .client
            .get(self.url.clone())
            .header(CACHE_CONTROL, "no-cache")
            .timeout(timeout);
        if let Some((header, key)) = &self.auth {
            request = request.header(header.as_str(), key.as_str());
        }

        let response = request.send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status(response.status().as_u16()))
        }
    }
}

/// Attempt budget and pacing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub interval: Duration,
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            attempt_timeout: config.attempt_timeout(),
            interval: config.interval(),
        }
    }
}

/// Result of one liveness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptResult {
    Alive,
    NotYetAlive,
    TimedOut,
}

/// One liveness probe and its result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectAttempt {
    /// 1-based attempt number
    pub number: u32,
    pub max_attempts: u32,
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    pub result: AttemptResult,
}

impl ReconnectAttempt {
    /// Attempts still available after this one
    pub fn remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.number)
    }
}

/// How polling ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PollResult {
    Alive { attempts: u32 },
    ExhaustedAttempts { attempts: u32 },
}

impl PollResult {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Alive { attempts } | Self::ExhaustedAttempts { attempts } => *attempts,
        }
    }

    pub fn is_alive(&self) -> bool {
        matches!(self, Self::Alive { .. })
    }
}

/// Event emitted while polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvent {
    Attempt(ReconnectAttempt),
    /// Always the last event
    Finished(PollResult),
}

/// Repeatedly probes the device until it answers or the budget runs out
#[derive(Clone)]
pub struct ReconnectPoller {
    probe: Arc<dyn LivenessProbe>,
    policy: ReconnectPolicy,
}

impl ReconnectPoller {
    pub fn new(probe: Arc<dyn LivenessProbe>, policy: ReconnectPolicy) -> Self {
        Self { probe, policy }
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Stream attempts as they happen, ending with [`PollEvent::Finished`]
    ///
    /// Each attempt waits one interval first. Dropping the stream stops
    /// polling and releases its timer.
    pub fn poll(&self) -> BoxStream<'static, PollEvent> {
        let probe = self.probe.clone();
        let policy = self.policy;

        stream! {
            let mut alive_at = None;
            for number in 1..=policy.max_attempts {
                tokio::time::sleep(policy.interval).await;

                let result = probe_once(probe.as_ref(), policy.attempt_timeout).await;
                debug!(number, max = policy.max_attempts, ?result, "Reconnect attempt");

                yield PollEvent::Attempt(ReconnectAttempt {
                    number,
                    max_attempts: policy.max_attempts,
                    timeout: policy.attempt_timeout,
                    result,
                });

                if result == AttemptResult::Alive {
                    alive_at = Some(number);
                    break;
                }
            }

            let finished = match alive_at {
                Some(attempts) => PollResult::Alive { attempts },
                None => PollResult::ExhaustedAttempts { attempts: policy.max_attempts },
            };
            yield PollEvent::Finished(finished);
        }
        .boxed()
    }

    /// Poll to completion, calling `on_attempt` after every probe
    #[instrument(skip(self, on_attempt), fields(max_attempts = self.policy.max_attempts))]
    pub async fn run<F>(&self, mut on_attempt: F) -> PollResult
    where
        F: FnMut(&ReconnectAttempt),
    {
        let mut events = self.poll();
        while let Some(event) = events.next().await {
            match event {
                PollEvent::Attempt(attempt) => on_attempt(&attempt),
                PollEvent::Finished(result) => {
                    info!("Reconnect polling finished: {:?}", result);
                    return result;
                }
            }
        }
        PollResult::ExhaustedAttempts {
            attempts: self.policy.max_attempts,
        }
    }
}

/// Probe once; the timeout applies regardless of what the probe does internally
async fn probe_once(probe: &dyn LivenessProbe, timeout: Duration) -> AttemptResult {
    match tokio::time::timeout(timeout, probe.probe(timeout)).await {
        Ok(Ok(())) => AttemptResult::Alive,
        Ok(Err(ProbeError::Http(e))) if e.is_timeout() => AttemptResult::TimedOut,
        Ok(Err(e)) => {
            debug!("Device not available yet: {}", e);
            AttemptResult::NotYetAlive
        }
        Err(_) => AttemptResult::TimedOut,
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
