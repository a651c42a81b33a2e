//! Firmware update transactions
//!
//! [`UpdateController`] runs one transaction at a time through
//! validate → upload → classify → reconnect and reports everything that
//! happens on a per-transaction event stream. Exactly one
//! [`UpdateEvent::Finished`] is emitted per transaction.
//!
//! ```text
//! Idle ─▶ Validating ─▶ Uploading ─▶ AwaitingOutcome ─▶ Reconnecting ─▶ Succeeded
//!              │                           │
//!              └───────────────────────────┴──────────────────────────▶ Failed
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::UpdateConfig;
use crate::error::{Result, UpdateError};
use crate::image::{ImageValidator, UpdateImage};
use crate::outcome::{classify, Outcome};
use crate::progress::TransferProgress;
use crate::reconnect::{
    HttpLivenessProbe, LivenessProbe, PollEvent, PollResult, ReconnectAttempt, ReconnectPoller,
    ReconnectPolicy,
};
use crate::transport::{HttpTransport, TerminalEvent, Transport, TransportEvent};

/// Where the controller is in the transaction lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    #[default]
    Idle,
    Validating,
    Uploading,
    AwaitingOutcome,
    Reconnecting,
    Succeeded,
    Failed,
}

impl TransactionState {
    /// States during which a new transaction is refused
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Validating | Self::Uploading | Self::AwaitingOutcome | Self::Reconnecting
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Validating => write!(f, "Validating"),
            Self::Uploading => write!(f, "Uploading"),
            Self::AwaitingOutcome => write!(f, "Awaiting outcome"),
            Self::Reconnecting => write!(f, "Reconnecting"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Non-fatal remark attached to a successful transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Caveat {
    /// The image was accepted but the device never answered afterwards
    DeviceUnresponsivePostUpdate,
}

/// Final record of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReport {
    pub id: Uuid,
    pub image_name: String,
    pub image_size: u64,
    /// `Succeeded` or `Failed`
    pub state: TransactionState,
    pub outcome: Outcome,
    #[serde(default)]
    pub reconnect: Option<PollResult>,
    #[serde(default)]
    pub caveat: Option<Caveat>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TransactionReport {
    pub fn is_success(&self) -> bool {
        self.state == TransactionState::Succeeded
    }

    /// Human-readable summary
    pub fn message(&self) -> String {
        match (self.state, self.caveat, self.reconnect) {
            (TransactionState::Succeeded, Some(Caveat::DeviceUnresponsivePostUpdate), poll) => {
                format!(
                    "firmware written, but the device did not come back online after {} attempts",
                    poll.map(|p| p.attempts()).unwrap_or(0)
                )
            }
            (TransactionState::Succeeded, None, Some(poll)) => format!(
                "firmware updated, device back online after {} attempt(s)",
                poll.attempts()
            ),
            (TransactionState::Succeeded, None, None) => "firmware updated".to_string(),
            _ => self.outcome.message(),
        }
    }
}

/// Notification emitted during a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    StateChanged(TransactionState),
    Progress(TransferProgress),
    Outcome(Outcome),
    ReconnectAttempt(ReconnectAttempt),
    /// Always the last event of a transaction
    Finished(TransactionReport),
}

/// Keeps the user from leaving while an upload is on the wire
///
/// Armed on entering `Uploading`, disarmed when leaving it.
pub trait NavigationGuard: Send + Sync {
    fn arm(&self);
    fn disarm(&self);
}

/// Guard that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopGuard;

impl NavigationGuard for NoopGuard {
    fn arm(&self) {}
    fn disarm(&self) {}
}

/// Runs firmware update transactions against one device
///
/// At most one transaction is active at a time; [`UpdateController::start`]
/// returns [`UpdateError::TransactionInProgress`] otherwise.
#[derive(Clone)]
pub struct UpdateController {
    validator: ImageValidator,
    transport: Arc<dyn Transport>,
    poller: ReconnectPoller,
    guard: Arc<dyn NavigationGuard>,
    state: Arc<watch::Sender<TransactionState>>,
}

impl UpdateController {
    /// Create a controller with custom transport and probe
    pub fn new(
        config: &UpdateConfig,
        transport: Arc<dyn Transport>,
        probe: Arc<dyn LivenessProbe>,
    ) -> Self {
        let (state, _) = watch::channel(TransactionState::Idle);
        Self {
            validator: ImageValidator::from_config(config),
            transport,
            poller: ReconnectPoller::new(probe, ReconnectPolicy::from(&config.reconnect)),
            guard: Arc::new(NoopGuard),
            state: Arc::new(state),
        }
    }

    /// Create a controller talking HTTP to the configured device
    pub fn from_config(config: &UpdateConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.timeouts.connect())
            .build()?;
        let transport = HttpTransport::with_client(client.clone(), config)?;
        let probe = HttpLivenessProbe::with_client(client, config)?;

        info!("Update controller created for {}", config.connection.base_url);
        Ok(Self::new(config, Arc::new(transport), Arc::new(probe)))
    }

    /// Install the guard to arm around uploads
    pub fn with_guard(mut self, guard: Arc<dyn NavigationGuard>) -> Self {
        self.guard = guard;
        self
    }

    pub fn validator(&self) -> &ImageValidator {
        &self.validator
    }

    /// The reconnect poller, for waiting on a device outside a transaction
    pub fn poller(&self) -> &ReconnectPoller {
        &self.poller
    }

    pub fn state(&self) -> TransactionState {
        *self.state.borrow()
    }

    /// Watch state changes across transactions
    pub fn subscribe(&self) -> watch::Receiver<TransactionState> {
        self.state.subscribe()
    }

    /// Start a transaction for `image`
    ///
    /// Must be called from within a tokio runtime. Validation failures are
    /// not errors here: they end the returned transaction as `Failed`.
    pub fn start(&self, image: UpdateImage) -> Result<Transaction> {
        let mut current = TransactionState::Idle;
        let claimed = self.state.send_if_modified(|state| {
            current = *state;
            if state.is_active() {
                false
            } else {
                *state = TransactionState::Validating;
                true
            }
        });
        if !claimed {
            warn!("Refusing {}: transaction in progress ({})", image.name(), current);
            return Err(UpdateError::TransactionInProgress { state: current });
        }

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let run = TransactionRun {
            id,
            image,
            validator: self.validator.clone(),
            transport: self.transport.clone(),
            poller: self.poller.clone(),
            guard: self.guard.clone(),
            state: self.state.clone(),
            events: events_tx,
            cancel: cancel.clone(),
            started_at: Utc::now(),
        };
        let handle = tokio::spawn(run.execute());

        Ok(Transaction {
            id,
            events: events_rx,
            cancel,
            handle,
        })
    }
}

/// Handle to a running transaction
pub struct Transaction {
    id: Uuid,
    events: mpsc::UnboundedReceiver<UpdateEvent>,
    cancel: CancellationToken,
    handle: JoinHandle<TransactionReport>,
}

impl Transaction {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next event, `None` once [`UpdateEvent::Finished`] has been delivered
    pub async fn next_event(&mut self) -> Option<UpdateEvent> {
        self.events.recv().await
    }

    /// Abort the upload
    ///
    /// Only effective until the upload has ended; the device-side effect
    /// cannot be undone once the outcome is being decided.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this transaction, for use from other tasks
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the transaction to finish, discarding remaining events
    pub async fn wait(self) -> Result<TransactionReport> {
        self.handle
            .await
            .map_err(|e| UpdateError::TaskFailed(e.to_string()))
    }
}

/// Everything a spawned transaction owns
struct TransactionRun {
    id: Uuid,
    image: UpdateImage,
    validator: ImageValidator,
    transport: Arc<dyn Transport>,
    poller: ReconnectPoller,
    guard: Arc<dyn NavigationGuard>,
    state: Arc<watch::Sender<TransactionState>>,
    events: mpsc::UnboundedSender<UpdateEvent>,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
}

impl TransactionRun {
    async fn execute(self) -> TransactionReport {
        info!(id = %self.id, image = %self.image.name(), size = self.image.size(), "Transaction started");
        self.emit(UpdateEvent::StateChanged(TransactionState::Validating));

        if let Err(rejection) = self.validator.validate(&self.image) {
            info!(id = %self.id, reason = rejection.code(), "Image rejected");
            return self.finish(Outcome::ValidationFailure(rejection.to_string()), None);
        }

        self.transition(TransactionState::Uploading);
        self.guard.arm();
        let (terminal, last_progress) = self.upload().await;
        self.guard.disarm();

        self.transition(TransactionState::AwaitingOutcome);
        let outcome = classify(&terminal, last_progress.percent);
        info!(id = %self.id, ?outcome, percent = last_progress.percent, "Upload finished");
        self.emit(UpdateEvent::Outcome(outcome.clone()));

        if !outcome.is_success() {
            return self.finish(outcome, None);
        }

        self.transition(TransactionState::Reconnecting);
        let poll = self.reconnect().await;
        self.finish(outcome, Some(poll))
    }

    /// Drive the transport to its terminal event, forwarding progress
    #[instrument(skip(self), fields(id = %self.id, size = self.image.size()))]
    async fn upload(&self) -> (TerminalEvent, TransferProgress) {
        let mut stream = self.transport.send(self.image.clone(), self.cancel.clone());
        let mut last = TransferProgress::default();
        let mut seen_progress = false;

        while let Some(event) = stream.next().await {
            match event {
                TransportEvent::Progress(progress) => {
                    if seen_progress && (progress.percent < last.percent || progress == last) {
                        continue;
                    }
                    seen_progress = true;
                    last = TransferProgress {
                        percent: progress.percent.min(100),
                        data_fully_sent: last.data_fully_sent || progress.data_fully_sent,
                    };
                    self.emit(UpdateEvent::Progress(last));
                }
                TransportEvent::Finished {
                    event,
                    last_progress,
                } => {
                    if last_progress.percent > last.percent {
                        last = last_progress;
                    }
                    return (event, last);
                }
            }
        }

        // Stream closed without a terminal event: treat as an abrupt close
        debug!(id = %self.id, "Transport closed without terminal event");
        (
            TerminalEvent::NetworkError {
                message: "connection closed".to_string(),
            },
            last,
        )
    }

    async fn reconnect(&self) -> PollResult {
        let mut events = self.poller.poll();
        while let Some(event) = events.next().await {
            match event {
                PollEvent::Attempt(attempt) => {
                    self.emit(UpdateEvent::ReconnectAttempt(attempt));
                }
                PollEvent::Finished(result) => return result,
            }
        }
        PollResult::ExhaustedAttempts {
            attempts: self.poller.policy().max_attempts,
        }
    }

    fn finish(self, outcome: Outcome, poll: Option<PollResult>) -> TransactionReport {
        let state = if outcome.is_success() {
            TransactionState::Succeeded
        } else {
            TransactionState::Failed
        };
        let caveat = match poll {
            Some(PollResult::ExhaustedAttempts { .. }) => {
                Some(Caveat::DeviceUnresponsivePostUpdate)
            }
            _ => None,
        };

        let report = TransactionReport {
            id: self.id,
            image_name: self.image.name().to_string(),
            image_size: self.image.size(),
            state,
            outcome,
            reconnect: poll,
            caveat,
            started_at: self.started_at,
            finished_at: Utc::now(),
        };

        if report.is_success() {
            info!(id = %self.id, "Transaction succeeded: {}", report.message());
        } else {
            warn!(id = %self.id, "Transaction failed: {}", report.message());
        }

        self.transition(state);
        self.emit(UpdateEvent::Finished(report.clone()));
        report
    }

    fn transition(&self, next: TransactionState) {
        debug!(id = %self.id, "State -> {}", next);
        self.state.send_replace(next);
        self.emit(UpdateEvent::StateChanged(next));
    }

    fn emit(&self, event: UpdateEvent) {
        // The caller may have dropped the handle; the transaction still runs
        let _ = self.events.send(event);
    }
}
