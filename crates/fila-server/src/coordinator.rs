//! Per-session coordinator: the authoritative owner of one session's live
//! queue.
//!
//! Every operation runs inside the session's single critical section (one
//! `tokio::sync::Mutex`); the only awaits taken while holding it are
//! bounded database writes. Different sessions run fully in parallel.
//!
//! A mutation goes through the same stations every time: validate, mutate
//! the in-memory state, persist (party rows + event log append + snapshot
//! in one transaction), fan out to subscribers, coalesce push
//! notifications, re-arm the alarm.

mod alarm;

use std::collections::HashMap;
use std::sync::Arc;

use fila_core::{PartyId, PartyStatus, SessionId, SessionStatus, ShortCode, Timestamp, consts};
use fila_db::{
    Database, DbResult, EventKind, EventRecord, PartyRecord, PartySnapshot, SessionRecord,
    SnapshotRecord,
};
use fila_util_error::FmtCompact as _;
use snafu::OptionExt as _;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, error, warn};

use self::alarm::AlarmSchedule;
use crate::config::Config;
use crate::error::{
    ApiResult, NotFoundSnafu, QueueFullSnafu, SessionClosedSnafu, ValidationSnafu,
};
use crate::messages::SubscriberMessage;
use crate::push::{PushJob, PushKind};
use crate::subscribers::{SubscriberId, SubscriberRegistry};

const LOG_TARGET: &str = "fila::coordinator";

pub struct Coordinator {
    session_id: SessionId,
    code: ShortCode,
    config: Arc<Config>,
    db: Arc<Database>,
    push_tx: dedup_chan::Sender<PushJob>,
    state: Mutex<SessionState>,
    alarm_tx: watch::Sender<AlarmSchedule>,
}

/// Role requested on a subscriber connection.
#[derive(Debug, Copy, Clone)]
pub enum SubscribeRole {
    Host,
    Guest(PartyId),
}

/// An open subscription: the connection task reads messages off `rx` and
/// must call [`Coordinator::unsubscribe`] on every exit path.
pub struct Subscription {
    pub id: SubscriberId,
    pub rx: mpsc::Receiver<SubscriberMessage>,
}

#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub party_id: PartyId,
    pub position: u32,
    pub queue_length: u32,
    pub estimated_wait_ms: u64,
}

struct SessionState {
    meta: SessionRecord,
    /// Waiting parties, oldest joined first. Insertion order is the
    /// tie-break for identical join timestamps.
    queue: Vec<PartySnapshot>,
    serving: Option<PartySnapshot>,
    call_deadline: Option<Timestamp>,
    /// When the serving party was called; persisted so deadlines survive a
    /// log-only restore.
    serving_called_at: Option<Timestamp>,
    closed: bool,
    last_activity: Timestamp,
    subscribers: SubscriberRegistry,
    /// Push notifications coalesced per party until the next flush.
    pending_pushes: HashMap<PartyId, PushKind>,
    push_flush_at: Option<Timestamp>,
    /// Last position delivered per waiting party, to send `position`
    /// messages only on change.
    last_positions: HashMap<PartyId, u32>,
    last_pos2: Option<PartyId>,
    last_pos5: Option<PartyId>,
}

impl SessionState {
    fn new(meta: SessionRecord) -> Self {
        let closed = meta.status == SessionStatus::Closed;
        let mut state = Self {
            meta,
            queue: vec![],
            serving: None,
            call_deadline: None,
            serving_called_at: None,
            closed,
            last_activity: Timestamp::now(),
            subscribers: SubscriberRegistry::default(),
            pending_pushes: HashMap::new(),
            push_flush_at: None,
            last_positions: HashMap::new(),
            last_pos2: None,
            last_pos5: None,
        };
        state.reset_position_tracking();
        state
    }

    fn from_snapshot(meta: SessionRecord, snapshot: SnapshotRecord) -> Self {
        let serving_called_at = snapshot.call_deadline.map(|deadline| {
            Timestamp::from_millis(
                deadline
                    .as_millis()
                    .saturating_sub(consts::CALL_WINDOW.as_millis() as u64),
            )
        });
        let mut state = Self {
            closed: snapshot.closed || meta.status == SessionStatus::Closed,
            meta,
            queue: snapshot.queue,
            serving: snapshot.now_serving,
            call_deadline: snapshot.call_deadline,
            serving_called_at,
            last_activity: Timestamp::now(),
            subscribers: SubscriberRegistry::default(),
            pending_pushes: HashMap::new(),
            push_flush_at: None,
            last_positions: HashMap::new(),
            last_pos2: None,
            last_pos5: None,
        };
        state.reset_position_tracking();
        state
    }

    /// Rebuild from party rows alone, for when the snapshot store came up
    /// empty. `live` is ordered by joined-at already.
    fn from_log(meta: SessionRecord, live: Vec<(PartyId, PartyRecord)>) -> Self {
        let mut queue = vec![];
        let mut serving = None;
        let mut serving_called_at = None;

        for (id, record) in live {
            let mut party = PartySnapshot::from_record(id, &record);
            if party.status == PartyStatus::Called && serving.is_none() {
                serving_called_at = record.called_at;
                serving = Some(party);
            } else {
                party.status = PartyStatus::Waiting;
                queue.push(party);
            }
        }

        let call_deadline = serving
            .is_some()
            .then(|| {
                serving_called_at
                    .unwrap_or_else(Timestamp::now)
                    .saturating_add(consts::CALL_WINDOW)
            });

        let mut state = Self {
            closed: meta.status == SessionStatus::Closed,
            meta,
            queue,
            serving,
            call_deadline,
            serving_called_at,
            last_activity: Timestamp::now(),
            subscribers: SubscriberRegistry::default(),
            pending_pushes: HashMap::new(),
            push_flush_at: None,
            last_positions: HashMap::new(),
            last_pos2: None,
            last_pos5: None,
        };
        state.reset_position_tracking();
        state
    }

    fn serving_present(&self) -> usize {
        usize::from(self.serving.is_some())
    }

    fn roster_is_empty(&self) -> bool {
        self.queue.is_empty() && self.serving.is_none()
    }

    /// Total guest count across the live roster.
    fn live_guest_count(&self) -> u32 {
        self.queue
            .iter()
            .chain(self.serving.as_ref())
            .map(|p| p.size)
            .sum()
    }

    fn queue_length(&self) -> u32 {
        (self.queue.len() + self.serving_present()) as u32
    }

    /// View numbers for the waiting party at `idx`.
    fn position_view(&self, idx: usize) -> SubscriberMessage {
        let ahead = idx + self.serving_present();
        SubscriberMessage::Position {
            position: (ahead + 1) as u32,
            ahead_count: ahead as u32,
            queue_length: self.queue_length(),
            estimated_wait_ms: ahead as u64 * consts::AVG_SERVICE_TIME.as_millis() as u64,
        }
    }

    fn queue_update(&self) -> SubscriberMessage {
        SubscriberMessage::QueueUpdate {
            queue: self.queue.clone(),
            now_serving: self.serving.clone(),
            max_guests: self.meta.max_guests,
            call_deadline: self.call_deadline,
        }
    }

    fn to_snapshot(&self) -> SnapshotRecord {
        SnapshotRecord {
            queue: self.queue.clone(),
            now_serving: self.serving.clone(),
            closed: self.closed,
            max_guests: self.meta.max_guests,
            call_deadline: self.call_deadline,
            updated_at: Timestamp::now(),
        }
    }

    /// Occupants of the waiting slots that map to positions 2 and 5 when a
    /// serving party exists; push triggers fire when these change.
    fn threshold_occupants(&self) -> (Option<PartyId>, Option<PartyId>) {
        if self.serving.is_none() {
            return (None, None);
        }
        (
            self.queue.first().map(|p| p.id),
            self.queue.get(3).map(|p| p.id),
        )
    }

    fn reset_position_tracking(&mut self) {
        self.last_positions = self
            .queue
            .iter()
            .enumerate()
            .map(|(idx, party)| (party.id, (idx + self.serving_present() + 1) as u32))
            .collect();
        (self.last_pos2, self.last_pos5) = self.threshold_occupants();
    }

    /// Cheap structural sanity check, run after every mutation. A failure
    /// here is a bug, not a recoverable condition.
    fn invariants_hold(&self) -> bool {
        let fifo_ordered = self
            .queue
            .windows(2)
            .all(|w| w[0].joined_at <= w[1].joined_at);
        let statuses_ok = self.queue.iter().all(|p| p.status == PartyStatus::Waiting)
            && self
                .serving
                .as_ref()
                .is_none_or(|p| p.status == PartyStatus::Called);
        let deadline_ok = self.serving.is_some() == self.call_deadline.is_some();
        let capacity_ok = self.live_guest_count() <= self.meta.max_guests;
        let closed_ok = !self.closed || (self.roster_is_empty() && self.call_deadline.is_none());

        fifo_ordered && statuses_ok && deadline_ok && capacity_ok && closed_ok
    }
}

impl Coordinator {
    /// Coordinator for a freshly created session; the session record is
    /// already durable.
    pub(crate) fn create(
        db: Arc<Database>,
        config: Arc<Config>,
        push_tx: dedup_chan::Sender<PushJob>,
        session_id: SessionId,
        meta: SessionRecord,
    ) -> Arc<Self> {
        Self::spawn(db, config, push_tx, session_id, SessionState::new(meta))
    }

    /// Restore a coordinator for an existing session, preferring the
    /// snapshot and falling back to the party log.
    pub(crate) async fn open(
        db: Arc<Database>,
        config: Arc<Config>,
        push_tx: dedup_chan::Sender<PushJob>,
        session_id: SessionId,
    ) -> ApiResult<Arc<Self>> {
        let meta = db.load_session(session_id).await?.context(NotFoundSnafu)?;

        let state = match db.load_snapshot(session_id).await? {
            Some(snapshot) => SessionState::from_snapshot(meta, snapshot),
            None => {
                let live = db.load_live_parties(session_id).await?;
                SessionState::from_log(meta, live)
            }
        };
        debug!(
            target: LOG_TARGET,
            session = %session_id,
            queue_len = state.queue.len(),
            serving = state.serving.is_some(),
            "Restored session state"
        );

        Ok(Self::spawn(db, config, push_tx, session_id, state))
    }

    fn spawn(
        db: Arc<Database>,
        config: Arc<Config>,
        push_tx: dedup_chan::Sender<PushJob>,
        session_id: SessionId,
        state: SessionState,
    ) -> Arc<Self> {
        let closed = state.closed;
        let initial = if closed {
            AlarmSchedule::Shutdown
        } else {
            AlarmSchedule::Wake(state.call_deadline)
        };
        let (alarm_tx, alarm_rx) = watch::channel(initial);

        let this = Arc::new(Self {
            session_id,
            code: state.meta.short_code,
            config,
            db,
            push_tx,
            state: Mutex::new(state),
            alarm_tx,
        });

        if !closed {
            alarm::spawn_alarm(&this, alarm_rx);
        }
        this
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn short_code(&self) -> ShortCode {
        self.code
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    pub async fn join(&self, name: Option<String>, size: u32) -> ApiResult<JoinOutcome> {
        let mut state = self.state.lock().await;
        if state.closed {
            return SessionClosedSnafu.fail();
        }
        if state.meta.max_guests < state.live_guest_count() + size {
            return QueueFullSnafu.fail();
        }

        let now = Timestamp::now();
        let party = PartySnapshot {
            id: PartyId::generate(),
            name,
            size,
            status: PartyStatus::Waiting,
            nearby: false,
            joined_at: now,
        };
        state.queue.push(party.clone());

        // The join append is the one durable write whose failure wins over
        // memory: roll back and surface it.
        let mut event = EventRecord::new(EventKind::Joined, party.id).with_detail("size", size.to_string());
        if let Some(name) = &party.name {
            event = event.with_detail("name", name.clone());
        }
        if let Err(err) = self
            .persist_locked(&state, vec![(party.id, party.to_record(None))], vec![event])
            .await
        {
            state.queue.pop();
            return Err(err.into());
        }

        state.last_activity = now;
        let idx = state.queue.len() - 1;
        let outcome = match state.position_view(idx) {
            SubscriberMessage::Position {
                position,
                queue_length,
                estimated_wait_ms,
                ..
            } => JoinOutcome {
                party_id: party.id,
                position,
                queue_length,
                estimated_wait_ms,
            },
            _ => unreachable!("position_view always returns Position"),
        };

        self.after_mutation(&mut state);
        self.reschedule_alarm_locked(&state);
        Ok(outcome)
    }

    /// Idempotent nearby flag; affects nothing but the host's display.
    pub async fn declare_nearby(&self, party_id: PartyId) -> ApiResult<()> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let party = state
            .queue
            .iter_mut()
            .chain(state.serving.as_mut())
            .find(|p| p.id == party_id)
            .context(NotFoundSnafu)?;
        party.nearby = true;
        let record_party = party.clone();

        let called_at = state
            .serving_called_at
            .filter(|_| state.serving.as_ref().is_some_and(|p| p.id == party_id));
        state.last_activity = Timestamp::now();

        self.persist_logging_locked(
            state,
            vec![(party_id, record_party.to_record(called_at))],
            vec![EventRecord::new(EventKind::NudgeAck, party_id)],
        )
        .await;

        self.after_mutation(state);
        Ok(())
    }

    pub async fn leave(&self, party_id: PartyId) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        self.remove_party_locked(&mut state, party_id, PartyStatus::Left, "guest_left")
            .await
    }

    pub async fn kick(&self, party_id: PartyId) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        self.remove_party_locked(&mut state, party_id, PartyStatus::Kicked, "kicked")
            .await
    }

    async fn remove_party_locked(
        &self,
        state: &mut SessionState,
        party_id: PartyId,
        status: PartyStatus,
        reason: &str,
    ) -> ApiResult<()> {
        let mut party = if let Some(idx) = state.queue.iter().position(|p| p.id == party_id) {
            state.queue.remove(idx)
        } else if state.serving.as_ref().is_some_and(|p| p.id == party_id) {
            state.call_deadline = None;
            state.serving_called_at = None;
            state.serving.take().expect("Just checked")
        } else {
            return NotFoundSnafu.fail();
        };
        party.status = status;
        state.last_activity = Timestamp::now();

        self.persist_logging_locked(
            state,
            vec![(party_id, party.to_record(None))],
            vec![EventRecord::new(EventKind::Left, party_id).with_detail("reason", reason)],
        )
        .await;

        state.subscribers.send_guest(
            party_id,
            &SubscriberMessage::Removed {
                reason: status.as_reason().to_string(),
            },
        );
        state.subscribers.disconnect_guest(party_id);
        state.last_positions.remove(&party_id);

        self.after_mutation(state);
        self.reschedule_alarm_locked(state);
        Ok(())
    }

    /// Resolve the serving slot and/or call the next party.
    ///
    /// With `served` set it must name the current serving party, which gets
    /// marked served. Promotion only happens into an empty slot; calling a
    /// specific `next` while someone is still being served is an error,
    /// while a plain advance is a no-op returning the current occupant.
    pub async fn advance(
        &self,
        served: Option<PartyId>,
        next: Option<PartyId>,
    ) -> ApiResult<Option<PartySnapshot>> {
        let mut state = self.state.lock().await;
        if state.closed {
            return SessionClosedSnafu.fail();
        }
        let now = Timestamp::now();

        let mut db_parties = vec![];
        let mut db_events = vec![];

        if let Some(served_id) = served {
            if !state.serving.as_ref().is_some_and(|p| p.id == served_id) {
                return ValidationSnafu {
                    msg: "servedParty does not match the party being served",
                }
                .fail();
            }
            let mut served_party = state.serving.take().expect("Just checked");
            let called_at = state.serving_called_at.take();
            state.call_deadline = None;

            served_party.status = PartyStatus::Served;
            db_parties.push((served_party.id, served_party.to_record(called_at)));
            db_events.push(EventRecord::new(EventKind::Served, served_party.id));

            state.subscribers.send_guest(
                served_party.id,
                &SubscriberMessage::Removed {
                    reason: PartyStatus::Served.as_reason().to_string(),
                },
            );
            state.subscribers.disconnect_guest(served_party.id);
            state.last_positions.remove(&served_party.id);
        } else if state.serving.is_some() {
            if next.is_some() {
                return ValidationSnafu {
                    msg: "Serving slot is occupied; resolve it before calling another party",
                }
                .fail();
            }
            return Ok(state.serving.clone());
        }

        self.promote_locked(&mut state, next, now, &mut db_parties, &mut db_events)?;

        state.last_activity = now;
        self.persist_logging_locked(&state, db_parties, db_events).await;
        self.after_mutation(&mut state);
        self.reschedule_alarm_locked(&state);
        Ok(state.serving.clone())
    }

    /// Move the explicit `next` party, or the queue head, into the serving
    /// slot and start its call window.
    fn promote_locked(
        &self,
        state: &mut SessionState,
        next: Option<PartyId>,
        now: Timestamp,
        db_parties: &mut Vec<(PartyId, PartyRecord)>,
        db_events: &mut Vec<EventRecord>,
    ) -> ApiResult<()> {
        let idx = match next {
            Some(id) => Some(
                state
                    .queue
                    .iter()
                    .position(|p| p.id == id)
                    .context(NotFoundSnafu)?,
            ),
            None if state.queue.is_empty() => None,
            None => Some(0),
        };
        let Some(idx) = idx else {
            return Ok(());
        };

        let mut party = state.queue.remove(idx);
        party.status = PartyStatus::Called;
        let deadline = now.saturating_add(consts::CALL_WINDOW);

        state.serving = Some(party.clone());
        state.call_deadline = Some(deadline);
        state.serving_called_at = Some(now);
        state.last_positions.remove(&party.id);

        db_parties.push((party.id, party.to_record(Some(now))));
        db_events.push(EventRecord::new(EventKind::Called, party.id));

        state.subscribers.send_guest(
            party.id,
            &SubscriberMessage::Called {
                deadline: Some(deadline),
            },
        );
        self.enqueue_push_locked(state, party.id, PushKind::Called);
        Ok(())
    }

    /// Idempotent close; drops the roster, tells everyone, stops the alarm.
    pub async fn close(&self, reason: &str) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        self.close_locked(&mut state, reason).await;
        Ok(())
    }

    async fn close_locked(&self, state: &mut SessionState, reason: &str) {
        if state.closed {
            return;
        }
        state.closed = true;
        state.meta.status = SessionStatus::Closed;
        state.call_deadline = None;
        state.serving_called_at = None;
        state.pending_pushes.clear();
        state.push_flush_at = None;

        let mut db_parties = vec![];
        for mut party in state
            .queue
            .drain(..)
            .chain(state.serving.take())
            .collect::<Vec<_>>()
        {
            party.status = PartyStatus::Closed;
            db_parties.push((party.id, party.to_record(None)));
        }

        self.persist_session_status_locked(
            state,
            db_parties,
            vec![EventRecord::new(EventKind::Closed, None).with_detail("reason", reason)],
        )
        .await;

        state.subscribers.send_all(&SubscriberMessage::Closed);
        state.subscribers.disconnect_all();
        state.reset_position_tracking();

        debug!(target: LOG_TARGET, session = %self.session_id, reason, "Session closed");
        self.alarm_tx.send_replace(AlarmSchedule::Shutdown);
    }

    /// Latest view of the session: the full queue for the host, or one
    /// party's slice of it.
    pub async fn snapshot_view(&self, party: Option<PartyId>) -> ApiResult<SubscriberMessage> {
        let state = self.state.lock().await;
        match party {
            None => {
                if state.closed {
                    Ok(SubscriberMessage::Closed)
                } else {
                    Ok(state.queue_update())
                }
            }
            Some(party_id) => self.guest_view_locked(&state, party_id).await,
        }
    }

    async fn guest_view_locked(
        &self,
        state: &SessionState,
        party_id: PartyId,
    ) -> ApiResult<SubscriberMessage> {
        if state.closed {
            return Ok(SubscriberMessage::Closed);
        }
        if state.serving.as_ref().is_some_and(|p| p.id == party_id) {
            return Ok(SubscriberMessage::Called {
                deadline: state.call_deadline,
            });
        }
        if let Some(idx) = state.queue.iter().position(|p| p.id == party_id) {
            return Ok(state.position_view(idx));
        }
        // Not live: report the terminal status if the party ever existed.
        let record = self
            .db
            .load_party(self.session_id, party_id)
            .await?
            .context(NotFoundSnafu)?;
        Ok(SubscriberMessage::Removed {
            reason: record.status.as_reason().to_string(),
        })
    }

    /// Register a subscriber and queue its initial view.
    ///
    /// A subscriber whose initial view is terminal (`closed`, `removed`)
    /// gets the message and an immediately-closed channel.
    pub async fn subscribe(&self, role: SubscribeRole) -> ApiResult<Subscription> {
        let mut state = self.state.lock().await;

        match role {
            SubscribeRole::Host => {
                let initial = if state.closed {
                    SubscriberMessage::Closed
                } else {
                    state.queue_update()
                };
                let (id, rx) = state.subscribers.subscribe_host();
                let terminal = initial.close_reason().is_some();
                state.subscribers.send_to(id, initial);
                if terminal {
                    state.subscribers.remove(id);
                }
                Ok(Subscription { id, rx })
            }
            SubscribeRole::Guest(party_id) => {
                let initial = self.guest_view_locked(&state, party_id).await?;
                let (id, rx) = state.subscribers.subscribe_guest(party_id);
                let terminal = initial.close_reason().is_some();
                state.subscribers.send_to(id, initial);
                if terminal {
                    state.subscribers.remove(id);
                }
                Ok(Subscription { id, rx })
            }
        }
    }

    /// Confirm a push opt-in for a live party and queue its confirmation
    /// notification.
    pub async fn push_opt_in(&self, party_id: PartyId) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        let live = state.queue.iter().any(|p| p.id == party_id)
            || state.serving.as_ref().is_some_and(|p| p.id == party_id);
        if !live {
            return NotFoundSnafu.fail();
        }
        self.enqueue_push_locked(&mut state, party_id, PushKind::JoinConfirm);
        self.reschedule_alarm_locked(&state);
        Ok(())
    }

    pub async fn unsubscribe(&self, id: SubscriberId) {
        let mut state = self.state.lock().await;
        state.subscribers.remove(id);
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    async fn persist_locked(
        &self,
        state: &SessionState,
        parties: Vec<(PartyId, PartyRecord)>,
        events: Vec<EventRecord>,
    ) -> DbResult<()> {
        self.persist_inner(state, parties, events, false).await
    }

    /// Persist where memory remains the source of truth: failures are
    /// logged and the operation proceeds.
    async fn persist_logging_locked(
        &self,
        state: &SessionState,
        parties: Vec<(PartyId, PartyRecord)>,
        events: Vec<EventRecord>,
    ) {
        if let Err(err) = self.persist_inner(state, parties, events, false).await {
            warn!(
                target: LOG_TARGET,
                session = %self.session_id,
                err = %err.fmt_compact(),
                "Durable write failed; in-memory state is ahead of the log"
            );
        }
    }

    async fn persist_session_status_locked(
        &self,
        state: &SessionState,
        parties: Vec<(PartyId, PartyRecord)>,
        events: Vec<EventRecord>,
    ) {
        if let Err(err) = self.persist_inner(state, parties, events, true).await {
            warn!(
                target: LOG_TARGET,
                session = %self.session_id,
                err = %err.fmt_compact(),
                "Durable write failed; in-memory state is ahead of the log"
            );
        }
    }

    async fn persist_inner(
        &self,
        state: &SessionState,
        parties: Vec<(PartyId, PartyRecord)>,
        events: Vec<EventRecord>,
        update_session_status: bool,
    ) -> DbResult<()> {
        let snapshot = state.to_snapshot();
        let session_status = update_session_status.then_some(state.meta.status);

        self.db
            .write_with(|tx| {
                {
                    let mut parties_t = tx.open_table(&fila_db::parties::TABLE)?;
                    for (id, record) in &parties {
                        Database::write_party_tx(self.session_id, *id, record, &mut parties_t)?;
                    }
                }
                {
                    let mut events_t = tx.open_table(&fila_db::events::TABLE)?;
                    for event in &events {
                        self.db.append_event_tx(self.session_id, event, &mut events_t)?;
                    }
                }
                if let Some(status) = session_status {
                    Database::update_session_status_tx(
                        self.session_id,
                        status,
                        &mut tx.open_table(&fila_db::sessions::TABLE)?,
                    )?;
                }
                // Snapshot rides along in the same commit; a stale snapshot
                // is fixed by the next mutation.
                Database::write_snapshot_tx(
                    self.session_id,
                    &snapshot,
                    &mut tx.open_table(&fila_db::snapshots::TABLE)?,
                )?;
                Ok(())
            })
            .await
    }

    // ------------------------------------------------------------------
    // Fan-out and push coalescing
    // ------------------------------------------------------------------

    /// Post-mutation fan-out: host view, changed guest positions, and the
    /// position-2/position-5 push triggers.
    fn after_mutation(&self, state: &mut SessionState) {
        if !state.invariants_hold() {
            error!(
                target: LOG_TARGET,
                session = %self.session_id,
                "Session invariants violated; state is corrupt"
            );
        }

        if !state.closed {
            let update = state.queue_update();
            state.subscribers.send_hosts(&update);
        }

        let mut position_updates = vec![];
        let mut new_positions = HashMap::new();
        for (idx, party) in state.queue.iter().enumerate() {
            let view = state.position_view(idx);
            let SubscriberMessage::Position { position, .. } = &view else {
                unreachable!("position_view always returns Position");
            };
            let position = *position;
            new_positions.insert(party.id, position);
            if state.last_positions.get(&party.id) != Some(&position) {
                position_updates.push((party.id, view));
            }
        }
        state.last_positions = new_positions;
        for (party_id, view) in position_updates {
            state.subscribers.send_guest(party_id, &view);
        }

        let (occ2, occ5) = state.threshold_occupants();
        if occ2 != state.last_pos2 {
            state.last_pos2 = occ2;
            if let Some(party) = occ2 {
                self.enqueue_push_locked(state, party, PushKind::Pos2);
            }
        }
        if occ5 != state.last_pos5 {
            state.last_pos5 = occ5;
            if let Some(party) = occ5 {
                self.enqueue_push_locked(state, party, PushKind::Pos5);
            }
        }
    }

    fn enqueue_push_locked(&self, state: &mut SessionState, party: PartyId, kind: PushKind) {
        if !self.config.push_enabled() {
            return;
        }
        state
            .pending_pushes
            .entry(party)
            .and_modify(|pending| {
                if pending.priority() < kind.priority() {
                    *pending = kind;
                }
            })
            .or_insert(kind);
        if state.push_flush_at.is_none() {
            state.push_flush_at = Some(Timestamp::now().saturating_add(consts::PUSH_BATCH_DELAY));
        }
    }

    fn flush_pushes_locked(&self, state: &mut SessionState) {
        state.push_flush_at = None;
        for (party, kind) in state.pending_pushes.drain() {
            let job = PushJob {
                session: self.session_id,
                party,
                kind,
            };
            match self.push_tx.send(job) {
                Ok(()) => {}
                Err(dedup_chan::SendError::Lagging(job)) => {
                    warn!(
                        target: LOG_TARGET,
                        kind = job.kind.as_str(),
                        "Push queue full; notification dropped"
                    );
                }
                Err(dedup_chan::SendError::Closed(_)) => {
                    debug!(target: LOG_TARGET, "Push dispatcher not running");
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Alarm
    // ------------------------------------------------------------------

    fn reschedule_alarm_locked(&self, state: &SessionState) {
        if state.closed {
            return;
        }
        let wake = match (state.call_deadline, state.push_flush_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.alarm_tx.send_replace(AlarmSchedule::Wake(wake));
    }

    /// Alarm body: overdue call first, then pending pushes,
    /// then lifecycle. Firing against moved-on state is a no-op.
    pub(crate) async fn handle_alarm(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        let now = Timestamp::now();

        let deadline_reached = state
            .call_deadline
            .is_some_and(|deadline| self.config.test_mode || deadline <= now);
        if deadline_reached {
            let mut party = state.serving.take().expect("Deadline implies a serving party");
            let called_at = state.serving_called_at.take();
            state.call_deadline = None;
            party.status = PartyStatus::NoShow;
            debug!(target: LOG_TARGET, session = %self.session_id, party = %party.id, "Call window elapsed");

            let mut db_parties = vec![(party.id, party.to_record(called_at))];
            let mut db_events = vec![EventRecord::new(EventKind::NoShow, party.id)];

            state.subscribers.send_guest(
                party.id,
                &SubscriberMessage::Removed {
                    reason: PartyStatus::NoShow.as_reason().to_string(),
                },
            );
            state.subscribers.disconnect_guest(party.id);
            state.last_positions.remove(&party.id);

            // Auto-advance: same path as an explicit advance without a
            // served party.
            if let Err(err) = self.promote_locked(&mut state, None, now, &mut db_parties, &mut db_events) {
                error!(target: LOG_TARGET, err = %err, "Auto-advance failed");
            }

            self.persist_logging_locked(&state, db_parties, db_events).await;
            self.after_mutation(&mut state);
        }

        self.flush_pushes_locked(&mut state);

        if consts::MAX_LIFETIME <= now.saturating_since(state.meta.created_at) {
            self.close_locked(&mut state, "max_lifetime_exceeded").await;
            return;
        }
        if state.roster_is_empty()
            && consts::INACTIVE_TIMEOUT <= now.saturating_since(state.last_activity)
        {
            self.close_locked(&mut state, "inactivity").await;
            return;
        }

        self.reschedule_alarm_locked(&state);
    }
}

#[cfg(test)]
impl Coordinator {
    pub(crate) async fn test_state(
        &self,
    ) -> (
        Vec<PartySnapshot>,
        Option<PartySnapshot>,
        Option<Timestamp>,
    ) {
        let state = self.state.lock().await;
        (
            state.queue.clone(),
            state.serving.clone(),
            state.call_deadline,
        )
    }

    pub(crate) async fn assert_invariants(&self) {
        let state = self.state.lock().await;
        assert!(state.invariants_hold(), "Session invariants violated");
    }
}
