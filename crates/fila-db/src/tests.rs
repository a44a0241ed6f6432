use fila_core::{PartyId, PartyStatus, SessionId, SessionStatus, ShortCode, Timestamp};
use fila_util_error::BoxedErrorResult;
use tempfile::{TempDir, tempdir};

use crate::{
    Database, DbError, EventKind, EventRecord, PartyRecord, PartySnapshot,
    PushSubscriptionRecord, SessionRecord, SnapshotRecord,
};

async fn temp_db() -> BoxedErrorResult<(TempDir, Database)> {
    let dir = tempdir()?;
    let db = Database::open(dir.path().join("db.redb")).await?;

    Ok((dir, db))
}

fn test_session_record(code: &str) -> SessionRecord {
    SessionRecord {
        short_code: code.parse().expect("Valid code"),
        status: SessionStatus::Active,
        event_name: "Friday tasting".to_string(),
        max_guests: 10,
        location: None,
        contact_info: None,
        open_time: None,
        close_time: None,
        created_at: Timestamp::from_millis(1_000),
    }
}

fn test_party_record(joined_at: u64) -> PartyRecord {
    PartyRecord {
        name: Some("alice".to_string()),
        size: 2,
        joined_at: Timestamp::from_millis(joined_at),
        called_at: None,
        status: PartyStatus::Waiting,
        nearby: false,
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn session_directory_is_injective() -> BoxedErrorResult<()> {
    let (_dir, db) = temp_db().await?;

    let id_a = SessionId::generate();
    let id_b = SessionId::generate();

    db.create_session(id_a, test_session_record("ABCDEF")).await?;

    let err = db
        .create_session(id_b, test_session_record("ABCDEF"))
        .await
        .expect_err("Duplicate code must be rejected");
    assert!(matches!(err, DbError::CodeTaken { .. }));

    assert_eq!(
        db.resolve_code("ABCDEF".parse::<ShortCode>()?).await?,
        Some(id_a)
    );
    assert_eq!(db.resolve_code("AAAAAA".parse::<ShortCode>()?).await?, None);
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn live_parties_ordered_by_joined_at() -> BoxedErrorResult<()> {
    let (_dir, db) = temp_db().await?;
    let session = SessionId::generate();

    let early = PartyId::generate();
    let late = PartyId::generate();
    let gone = PartyId::generate();

    db.write_with(|tx| {
        let mut parties_t = tx.open_table(&crate::parties::TABLE)?;
        Database::write_party_tx(session, late, &test_party_record(2_000), &mut parties_t)?;
        Database::write_party_tx(session, early, &test_party_record(1_000), &mut parties_t)?;

        let mut left = test_party_record(500);
        left.status = PartyStatus::Left;
        Database::write_party_tx(session, gone, &left, &mut parties_t)?;
        Ok(())
    })
    .await?;

    let live = db.load_live_parties(session).await?;
    let ids: Vec<PartyId> = live.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![early, late]);
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn events_append_in_order() -> BoxedErrorResult<()> {
    let (_dir, db) = temp_db().await?;
    let session = SessionId::generate();
    let party = PartyId::generate();

    db.append_event(session, EventRecord::new(EventKind::SessionCreated, None))
        .await?;
    db.append_event(
        session,
        EventRecord::new(EventKind::Joined, party).with_detail("size", "2"),
    )
    .await?;
    db.append_event(
        session,
        EventRecord::new(EventKind::Left, party).with_detail("reason", "guest_left"),
    )
    .await?;

    // A different session's log must not leak in.
    db.append_event(
        SessionId::generate(),
        EventRecord::new(EventKind::SessionCreated, None),
    )
    .await?;

    let events = db.load_events(session).await?;
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![EventKind::SessionCreated, EventKind::Joined, EventKind::Left]
    );
    assert_eq!(
        events[2].details.get("reason").map(String::as_str),
        Some("guest_left")
    );
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn push_sent_dedup_probe() -> BoxedErrorResult<()> {
    let (_dir, db) = temp_db().await?;
    let session = SessionId::generate();
    let party = PartyId::generate();

    assert!(!db.has_push_sent(session, party, "called").await?);

    db.append_event(
        session,
        EventRecord::new(EventKind::PushSent, party).with_detail("kind", "called"),
    )
    .await?;

    assert!(db.has_push_sent(session, party, "called").await?);
    assert!(!db.has_push_sent(session, party, "pos_2").await?);
    assert!(!db.has_push_sent(session, PartyId::generate(), "called").await?);
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn snapshot_roundtrip() -> BoxedErrorResult<()> {
    let (_dir, db) = temp_db().await?;
    let session = SessionId::generate();

    assert!(db.load_snapshot(session).await?.is_none());

    let serving = PartySnapshot {
        id: PartyId::generate(),
        name: Some("bob".to_string()),
        size: 1,
        status: PartyStatus::Called,
        nearby: true,
        joined_at: Timestamp::from_millis(1_000),
    };
    let snapshot = SnapshotRecord {
        queue: vec![],
        now_serving: Some(serving.clone()),
        closed: false,
        max_guests: 5,
        call_deadline: Some(Timestamp::from_millis(121_000)),
        updated_at: Timestamp::from_millis(2_000),
    };
    db.write_snapshot(session, snapshot).await?;

    let loaded = db.load_snapshot(session).await?.expect("Snapshot present");
    assert_eq!(loaded.now_serving, Some(serving));
    assert_eq!(loaded.call_deadline, Some(Timestamp::from_millis(121_000)));
    assert!(!loaded.closed);
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn push_subscription_upsert_and_delete() -> BoxedErrorResult<()> {
    let (_dir, db) = temp_db().await?;
    let session = SessionId::generate();
    let party_a = PartyId::generate();
    let party_b = PartyId::generate();

    let endpoint = "https://push.example/ep1".to_string();
    let record = |party| PushSubscriptionRecord {
        session,
        party,
        p256dh: "key".to_string(),
        auth: "auth".to_string(),
        created_at: Timestamp::from_millis(1_000),
    };

    db.upsert_push_subscription(endpoint.clone(), record(party_a))
        .await?;
    assert_eq!(db.party_push_subscriptions(session, party_a).await?.len(), 1);

    // Re-opt-in with the same endpoint under another party replaces, not
    // duplicates.
    db.upsert_push_subscription(endpoint.clone(), record(party_b))
        .await?;
    assert!(db.party_push_subscriptions(session, party_a).await?.is_empty());
    assert_eq!(db.party_push_subscriptions(session, party_b).await?.len(), 1);
    assert_eq!(db.session_push_subscriptions(session).await?.len(), 1);

    let deleted = db.delete_push_subscription(endpoint.clone()).await?;
    assert_eq!(deleted.map(|r| r.party), Some(party_b));
    assert!(db.session_push_subscriptions(session).await?.is_empty());
    assert!(db.delete_push_subscription(endpoint).await?.is_none());
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn session_status_update() -> BoxedErrorResult<()> {
    let (_dir, db) = temp_db().await?;
    let id = SessionId::generate();

    db.create_session(id, test_session_record("QWERTY")).await?;

    db.write_with(|tx| {
        Database::update_session_status_tx(
            id,
            SessionStatus::Closed,
            &mut tx.open_table(&crate::sessions::TABLE)?,
        )
    })
    .await?;

    let record = db.load_session(id).await?.expect("Session present");
    assert_eq!(record.status, SessionStatus::Closed);
    Ok(())
}
