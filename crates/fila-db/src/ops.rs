use fila_core::{PartyId, SessionId, SessionStatus, ShortCode, Timestamp};

use crate::tables::{
    EventKind, EventRecord, PartyRecord, PushSubscriptionRecord, SessionRecord, SnapshotRecord,
};
use crate::{
    AppendedEvent, CodeTakenSnafu, Database, DbResult, events, parties, push_subscriptions,
    push_subscriptions_rev, sessions, sessions_by_code, snapshots,
};

impl Database {
    // ------------------------------------------------------------------
    // Sessions and the short-code directory
    // ------------------------------------------------------------------

    pub fn insert_session_tx(
        id: SessionId,
        record: &SessionRecord,
        sessions_t: &mut sessions::Table,
        by_code_t: &mut sessions_by_code::Table,
    ) -> DbResult<()> {
        if by_code_t.get(&record.short_code)?.is_some() {
            return CodeTakenSnafu.fail();
        }
        sessions_t.insert(&id, record)?;
        by_code_t.insert(&record.short_code, &id)?;
        Ok(())
    }

    pub fn read_session_tx(
        id: SessionId,
        sessions_t: &impl sessions::ReadableTable,
    ) -> DbResult<Option<SessionRecord>> {
        Ok(sessions_t.get(&id)?.map(|g| g.value()))
    }

    pub fn resolve_code_tx(
        code: ShortCode,
        by_code_t: &impl sessions_by_code::ReadableTable,
    ) -> DbResult<Option<SessionId>> {
        Ok(by_code_t.get(&code)?.map(|g| g.value()))
    }

    pub fn update_session_status_tx(
        id: SessionId,
        status: SessionStatus,
        sessions_t: &mut sessions::Table,
    ) -> DbResult<()> {
        let existing = sessions_t.get(&id)?.map(|g| g.value());
        if let Some(mut record) = existing {
            record.status = status;
            sessions_t.insert(&id, &record)?;
        }
        Ok(())
    }

    pub async fn create_session(&self, id: SessionId, record: SessionRecord) -> DbResult<()> {
        self.write_with(|tx| {
            Self::insert_session_tx(
                id,
                &record,
                &mut tx.open_table(&sessions::TABLE)?,
                &mut tx.open_table(&sessions_by_code::TABLE)?,
            )
        })
        .await
    }

    pub async fn resolve_code(&self, code: ShortCode) -> DbResult<Option<SessionId>> {
        self.read_with(|tx| Self::resolve_code_tx(code, &tx.open_table(&sessions_by_code::TABLE)?))
            .await
    }

    pub async fn load_session(&self, id: SessionId) -> DbResult<Option<SessionRecord>> {
        self.read_with(|tx| Self::read_session_tx(id, &tx.open_table(&sessions::TABLE)?))
            .await
    }

    // ------------------------------------------------------------------
    // Parties
    // ------------------------------------------------------------------

    pub fn write_party_tx(
        session: SessionId,
        party: PartyId,
        record: &PartyRecord,
        parties_t: &mut parties::Table,
    ) -> DbResult<()> {
        parties_t.insert(&(session, party), record)?;
        Ok(())
    }

    pub fn read_party_tx(
        session: SessionId,
        party: PartyId,
        parties_t: &impl parties::ReadableTable,
    ) -> DbResult<Option<PartyRecord>> {
        Ok(parties_t.get(&(session, party))?.map(|g| g.value()))
    }

    /// Live (`waiting`/`called`) parties of a session, oldest joined first.
    pub fn read_live_parties_tx(
        session: SessionId,
        parties_t: &impl parties::ReadableTable,
    ) -> DbResult<Vec<(PartyId, PartyRecord)>> {
        let mut live = vec![];
        for record in parties_t.range((session, PartyId::ZERO)..=(session, PartyId::MAX))? {
            let (k, v) = record?;
            let v = v.value();
            if v.status.is_live() {
                live.push((k.value().1, v));
            }
        }
        live.sort_by_key(|(_, record)| record.joined_at);
        Ok(live)
    }

    pub async fn load_live_parties(
        &self,
        session: SessionId,
    ) -> DbResult<Vec<(PartyId, PartyRecord)>> {
        self.read_with(|tx| Self::read_live_parties_tx(session, &tx.open_table(&parties::TABLE)?))
            .await
    }

    pub async fn load_party(
        &self,
        session: SessionId,
        party: PartyId,
    ) -> DbResult<Option<PartyRecord>> {
        self.read_with(|tx| Self::read_party_tx(session, party, &tx.open_table(&parties::TABLE)?))
            .await
    }

    // ------------------------------------------------------------------
    // Event log
    // ------------------------------------------------------------------

    pub fn append_event_tx(
        &self,
        session: SessionId,
        record: &EventRecord,
        events_t: &mut events::Table,
    ) -> DbResult<AppendedEvent> {
        let order = self.next_event_order();
        events_t.insert(&(session, record.ts, order), record)?;
        Ok(AppendedEvent {
            ts: record.ts,
            order,
        })
    }

    pub fn read_events_tx(
        session: SessionId,
        events_t: &impl events::ReadableTable,
    ) -> DbResult<Vec<EventRecord>> {
        let mut out = vec![];
        for record in events_t.range((session, Timestamp::ZERO, 0)..)? {
            let (k, v) = record?;
            if k.value().0 != session {
                break;
            }
            out.push(v.value());
        }
        Ok(out)
    }

    /// Whether a `push_sent` event for (session, party, push kind) is
    /// already on record. The dispatcher's dedup probe.
    pub fn has_push_sent_tx(
        session: SessionId,
        party: PartyId,
        push_kind: &str,
        events_t: &impl events::ReadableTable,
    ) -> DbResult<bool> {
        for record in events_t.range((session, Timestamp::ZERO, 0)..)? {
            let (k, v) = record?;
            if k.value().0 != session {
                break;
            }
            let v = v.value();
            if v.kind == EventKind::PushSent
                && v.party == Some(party)
                && v.details.get("kind").is_some_and(|k| k == push_kind)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn append_event(&self, session: SessionId, record: EventRecord) -> DbResult<AppendedEvent> {
        self.write_with(|tx| {
            self.append_event_tx(session, &record, &mut tx.open_table(&events::TABLE)?)
        })
        .await
    }

    pub async fn load_events(&self, session: SessionId) -> DbResult<Vec<EventRecord>> {
        self.read_with(|tx| Self::read_events_tx(session, &tx.open_table(&events::TABLE)?))
            .await
    }

    pub async fn has_push_sent(
        &self,
        session: SessionId,
        party: PartyId,
        push_kind: &str,
    ) -> DbResult<bool> {
        self.read_with(|tx| {
            Self::has_push_sent_tx(session, party, push_kind, &tx.open_table(&events::TABLE)?)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub fn write_snapshot_tx(
        session: SessionId,
        snapshot: &SnapshotRecord,
        snapshots_t: &mut snapshots::Table,
    ) -> DbResult<()> {
        snapshots_t.insert(&session, snapshot)?;
        Ok(())
    }

    pub fn read_snapshot_tx(
        session: SessionId,
        snapshots_t: &impl snapshots::ReadableTable,
    ) -> DbResult<Option<SnapshotRecord>> {
        Ok(snapshots_t.get(&session)?.map(|g| g.value()))
    }

    pub async fn write_snapshot(&self, session: SessionId, snapshot: SnapshotRecord) -> DbResult<()> {
        self.write_with(|tx| {
            Self::write_snapshot_tx(session, &snapshot, &mut tx.open_table(&snapshots::TABLE)?)
        })
        .await
    }

    pub async fn load_snapshot(&self, session: SessionId) -> DbResult<Option<SnapshotRecord>> {
        self.read_with(|tx| Self::read_snapshot_tx(session, &tx.open_table(&snapshots::TABLE)?))
            .await
    }

    // ------------------------------------------------------------------
    // Push subscriptions
    // ------------------------------------------------------------------

    /// Insert or replace a subscription. Replacing an endpoint that moved
    /// to a different party also moves its reverse-index entry.
    pub fn upsert_push_subscription_tx(
        endpoint: &str,
        record: &PushSubscriptionRecord,
        subs_t: &mut push_subscriptions::Table,
        rev_t: &mut push_subscriptions_rev::Table,
    ) -> DbResult<()> {
        if let Some(prev) = subs_t.get(&endpoint.to_string())?.map(|g| g.value()) {
            rev_t.remove(&(prev.session, prev.party, endpoint.to_string()))?;
        }
        subs_t.insert(&endpoint.to_string(), record)?;
        rev_t.insert(&(record.session, record.party, endpoint.to_string()), &())?;
        Ok(())
    }

    pub fn delete_push_subscription_tx(
        endpoint: &str,
        subs_t: &mut push_subscriptions::Table,
        rev_t: &mut push_subscriptions_rev::Table,
    ) -> DbResult<Option<PushSubscriptionRecord>> {
        let prev = subs_t.remove(&endpoint.to_string())?.map(|g| g.value());
        if let Some(prev) = &prev {
            rev_t.remove(&(prev.session, prev.party, endpoint.to_string()))?;
        }
        Ok(prev)
    }

    pub fn read_party_push_subscriptions_tx(
        session: SessionId,
        party: PartyId,
        rev_t: &impl push_subscriptions_rev::ReadableTable,
        subs_t: &impl push_subscriptions::ReadableTable,
    ) -> DbResult<Vec<(String, PushSubscriptionRecord)>> {
        let mut out = vec![];
        for record in rev_t.range((session, party, String::new())..)? {
            let (k, _) = record?;
            let (k_session, k_party, endpoint) = k.value();
            if k_session != session || k_party != party {
                break;
            }
            if let Some(sub) = subs_t.get(&endpoint)?.map(|g| g.value()) {
                out.push((endpoint, sub));
            }
        }
        Ok(out)
    }

    pub fn read_session_push_subscriptions_tx(
        session: SessionId,
        rev_t: &impl push_subscriptions_rev::ReadableTable,
        subs_t: &impl push_subscriptions::ReadableTable,
    ) -> DbResult<Vec<(String, PushSubscriptionRecord)>> {
        let mut out = vec![];
        for record in rev_t.range((session, PartyId::ZERO, String::new())..)? {
            let (k, _) = record?;
            let (k_session, _, endpoint) = k.value();
            if k_session != session {
                break;
            }
            if let Some(sub) = subs_t.get(&endpoint)?.map(|g| g.value()) {
                out.push((endpoint, sub));
            }
        }
        Ok(out)
    }

    pub async fn upsert_push_subscription(
        &self,
        endpoint: String,
        record: PushSubscriptionRecord,
    ) -> DbResult<()> {
        self.write_with(|tx| {
            Self::upsert_push_subscription_tx(
                &endpoint,
                &record,
                &mut tx.open_table(&push_subscriptions::TABLE)?,
                &mut tx.open_table(&push_subscriptions_rev::TABLE)?,
            )
        })
        .await
    }

    pub async fn delete_push_subscription(
        &self,
        endpoint: String,
    ) -> DbResult<Option<PushSubscriptionRecord>> {
        self.write_with(|tx| {
            Self::delete_push_subscription_tx(
                &endpoint,
                &mut tx.open_table(&push_subscriptions::TABLE)?,
                &mut tx.open_table(&push_subscriptions_rev::TABLE)?,
            )
        })
        .await
    }

    pub async fn party_push_subscriptions(
        &self,
        session: SessionId,
        party: PartyId,
    ) -> DbResult<Vec<(String, PushSubscriptionRecord)>> {
        self.read_with(|tx| {
            Self::read_party_push_subscriptions_tx(
                session,
                party,
                &tx.open_table(&push_subscriptions_rev::TABLE)?,
                &tx.open_table(&push_subscriptions::TABLE)?,
            )
        })
        .await
    }

    pub async fn session_push_subscriptions(
        &self,
        session: SessionId,
    ) -> DbResult<Vec<(String, PushSubscriptionRecord)>> {
        self.read_with(|tx| {
            Self::read_session_push_subscriptions_tx(
                session,
                &tx.open_table(&push_subscriptions_rev::TABLE)?,
                &tx.open_table(&push_subscriptions::TABLE)?,
            )
        })
        .await
    }
}
