//! Out-of-band push notification dispatch.
//!
//! Coordinators coalesce pending notifications per party, then drop
//! [`PushJob`]s onto a deduplicating queue. Worker tasks pick jobs up,
//! consult the durable log so each (session, party, kind) notification is
//! sent at most once, and hand the payload to the configured
//! [`PushTransport`]. Nothing here sits on the mutation hot path; a failed
//! push never fails a queue operation.

use std::sync::Arc;

use async_trait::async_trait;
use fila_core::{PartyId, SessionId, Timestamp};
use fila_db::{Database, EventKind, EventRecord, PushSubscriptionRecord};
use fila_util_error::{BoxedError, FmtCompact as _};
use serde::Serialize;
use snafu::Snafu;
use tracing::{debug, info, warn};

use crate::config::Config;

const LOG_TARGET: &str = "fila::push";

/// How many jobs may sit in the dispatcher queue before producers start
/// dropping.
pub const DISPATCH_QUEUE_CAPACITY: usize = 1024;

pub const DISPATCH_WORKERS: usize = 2;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PushKind {
    Called,
    Pos2,
    Pos5,
    JoinConfirm,
    Test,
}

impl PushKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PushKind::Called => "called",
            PushKind::Pos2 => "pos_2",
            PushKind::Pos5 => "pos_5",
            PushKind::JoinConfirm => "join_confirm",
            PushKind::Test => "test",
        }
    }

    /// Coalescing priority: when several notifications are pending for one
    /// party only the highest survives.
    pub fn priority(self) -> u8 {
        match self {
            PushKind::Called => 3,
            PushKind::Pos2 => 2,
            PushKind::Pos5 => 1,
            PushKind::JoinConfirm | PushKind::Test => 0,
        }
    }
}

/// One unit of dispatcher work. Identity is the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PushJob {
    pub session: SessionId,
    pub party: PartyId,
    pub kind: PushKind,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub url: String,
    pub kind: PushKind,
}

#[derive(Debug, Snafu)]
pub enum PushDeliverError {
    /// The push service reports the endpoint gone (404/410); the stored
    /// subscription must be deleted.
    Gone,
    #[snafu(display("Push transport failure"))]
    Transport { source: BoxedError },
}

/// The actual Web Push protocol lives behind this; the dispatcher only
/// decides *what* to send and *whether* it still needs sending.
#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    async fn deliver(
        &self,
        subscription: &PushSubscriptionRecord,
        endpoint: &str,
        payload: &PushPayload,
    ) -> Result<(), PushDeliverError>;
}

/// Transport that only records deliveries in the log output.
pub struct LogPushTransport;

#[async_trait]
impl PushTransport for LogPushTransport {
    async fn deliver(
        &self,
        _subscription: &PushSubscriptionRecord,
        endpoint: &str,
        payload: &PushPayload,
    ) -> Result<(), PushDeliverError> {
        info!(
            target: LOG_TARGET,
            endpoint,
            kind = payload.kind.as_str(),
            title = %payload.title,
            "Push delivery"
        );
        Ok(())
    }
}

pub struct PushDispatcher {
    db: Arc<Database>,
    config: Arc<Config>,
    transport: Arc<dyn PushTransport>,
}

impl PushDispatcher {
    pub fn new(db: Arc<Database>, config: Arc<Config>, transport: Arc<dyn PushTransport>) -> Self {
        Self {
            db,
            config,
            transport,
        }
    }

    /// Spawn the worker pool consuming `rx`.
    pub fn spawn(self, rx: dedup_chan::Receiver<PushJob>) {
        let this = Arc::new(self);
        for worker in 0..DISPATCH_WORKERS {
            let this = this.clone();
            let rx = rx.clone();
            tokio::spawn(this.run(worker, rx));
        }
    }

    async fn run(self: Arc<Self>, worker: usize, mut rx: dedup_chan::Receiver<PushJob>) {
        debug!(target: LOG_TARGET, worker, "Push dispatch worker started");
        loop {
            match rx.recv().await {
                Ok(job) => {
                    if let Err(err) = self.handle_job(&job).await {
                        warn!(
                            target: LOG_TARGET,
                            err = %err.fmt_compact(),
                            kind = job.kind.as_str(),
                            "Push dispatch failed"
                        );
                    }
                }
                Err(dedup_chan::RecvError::Lagging) => {
                    warn!(target: LOG_TARGET, "Push queue overflowed; notifications were dropped");
                }
                Err(dedup_chan::RecvError::Closed) => break,
            }
        }
        debug!(target: LOG_TARGET, worker, "Push dispatch worker stopped");
    }

    async fn handle_job(&self, job: &PushJob) -> Result<(), BoxedError> {
        // Test pushes are host-triggered and repeatable; everything else is
        // once per (session, party, kind).
        if job.kind != PushKind::Test
            && self
                .db
                .has_push_sent(job.session, job.party, job.kind.as_str())
                .await?
        {
            debug!(
                target: LOG_TARGET,
                kind = job.kind.as_str(),
                "Skipping already-sent push"
            );
            return Ok(());
        }

        let subscriptions = self
            .db
            .party_push_subscriptions(job.session, job.party)
            .await?;
        if subscriptions.is_empty() {
            return Ok(());
        }

        let payload = self.build_payload(job).await?;

        let mut sent_any = false;
        for (endpoint, subscription) in subscriptions {
            match self
                .transport
                .deliver(&subscription, &endpoint, &payload)
                .await
            {
                Ok(()) => sent_any = true,
                Err(PushDeliverError::Gone) => {
                    debug!(target: LOG_TARGET, endpoint, "Deleting gone push endpoint");
                    self.db.delete_push_subscription(endpoint).await?;
                    self.db
                        .append_event(
                            job.session,
                            EventRecord::new(EventKind::PushUnsubscribed, job.party),
                        )
                        .await?;
                }
                Err(err @ PushDeliverError::Transport { .. }) => {
                    warn!(
                        target: LOG_TARGET,
                        err = %err.fmt_compact(),
                        endpoint,
                        "Push delivery failed"
                    );
                }
            }
        }

        if sent_any && job.kind != PushKind::Test {
            self.db
                .append_event(
                    job.session,
                    EventRecord::new(EventKind::PushSent, job.party)
                        .with_detail("kind", job.kind.as_str()),
                )
                .await?;
        }
        Ok(())
    }

    async fn build_payload(&self, job: &PushJob) -> Result<PushPayload, BoxedError> {
        let url = match self.db.load_session(job.session).await? {
            Some(record) => match &self.config.app_base_url {
                Some(base) => format!("{base}/queue/{}", record.short_code),
                None => format!("/queue/{}", record.short_code),
            },
            None => "/".to_string(),
        };

        let (title, body) = match job.kind {
            PushKind::Called => {
                let minutes = self
                    .db
                    .load_snapshot(job.session)
                    .await?
                    .and_then(|snap| snap.call_deadline)
                    .and_then(|deadline| deadline.remaining_from(Timestamp::now()))
                    .map(|remaining| remaining.as_secs().div_ceil(60))
                    .unwrap_or(0)
                    .max(1);
                (
                    "It's your turn".to_string(),
                    format!("You have {minutes} min to check in"),
                )
            }
            PushKind::Pos2 => (
                "Almost there — you're #2".to_string(),
                "Start heading over".to_string(),
            ),
            PushKind::Pos5 => (
                "Getting close — you're #5".to_string(),
                "Keep an eye on the queue".to_string(),
            ),
            PushKind::JoinConfirm => (
                "You're in line".to_string(),
                "We'll notify you when it's your turn".to_string(),
            ),
            PushKind::Test => (
                "Test notification".to_string(),
                "Push notifications are working".to_string(),
            ),
        };

        Ok(PushPayload {
            title,
            body,
            url,
            kind: job.kind,
        })
    }
}

