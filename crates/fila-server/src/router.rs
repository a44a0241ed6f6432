//! Session router: short code → coordinator.
//!
//! Coordinators load lazily and stay resident once loaded; the code
//! directory reads through an in-memory cache to the durable
//! `sessions_by_code` table.

use std::collections::HashMap;
use std::sync::Arc;

use fila_core::{SessionId, SessionStatus, ShortCode, Timestamp, consts};
use fila_db::{Database, DbError, EventKind, EventRecord, SessionRecord};
use snafu::OptionExt as _;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::error::{ApiResult, CodesExhaustedSnafu, NotFoundSnafu};
use crate::push::PushJob;

const LOG_TARGET: &str = "fila::router";

/// Validated inputs for session creation.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub event_name: String,
    pub max_guests: u32,
    pub location: Option<String>,
    pub contact_info: Option<String>,
    pub open_time: Option<String>,
    pub close_time: Option<String>,
}

pub struct SessionRouter {
    db: Arc<Database>,
    config: Arc<Config>,
    push_tx: dedup_chan::Sender<PushJob>,
    codes: RwLock<HashMap<ShortCode, SessionId>>,
    coordinators: RwLock<HashMap<SessionId, Arc<Coordinator>>>,
}

impl SessionRouter {
    pub fn new(
        db: Arc<Database>,
        config: Arc<Config>,
        push_tx: dedup_chan::Sender<PushJob>,
    ) -> Self {
        Self {
            db,
            config,
            push_tx,
            codes: RwLock::new(Default::default()),
            coordinators: RwLock::new(Default::default()),
        }
    }

    /// Allocate a unique short code, persist the session, and hand back a
    /// live coordinator.
    pub async fn create_session(&self, new: NewSession) -> ApiResult<Arc<Coordinator>> {
        let session_id = SessionId::generate();

        let mut record = SessionRecord {
            short_code: ShortCode::generate(),
            status: SessionStatus::Active,
            event_name: new.event_name,
            max_guests: new.max_guests,
            location: new.location,
            contact_info: new.contact_info,
            open_time: new.open_time,
            close_time: new.close_time,
            created_at: Timestamp::now(),
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = self
                .db
                .write_with(|tx| {
                    Database::insert_session_tx(
                        session_id,
                        &record,
                        &mut tx.open_table(&fila_db::sessions::TABLE)?,
                        &mut tx.open_table(&fila_db::sessions_by_code::TABLE)?,
                    )?;
                    self.db.append_event_tx(
                        session_id,
                        &EventRecord::new(EventKind::SessionCreated, None),
                        &mut tx.open_table(&fila_db::events::TABLE)?,
                    )?;
                    Ok(())
                })
                .await;

            match result {
                Ok(()) => break,
                Err(DbError::CodeTaken { .. }) if attempts < consts::SHORT_CODE_DRAW_ATTEMPTS => {
                    record.short_code = ShortCode::generate();
                }
                Err(DbError::CodeTaken { .. }) => {
                    warn!(
                        target: LOG_TARGET,
                        attempts, "Exhausted short code draws; directory too dense?"
                    );
                    return CodesExhaustedSnafu.fail();
                }
                Err(err) => return Err(err.into()),
            }
        }

        debug!(
            target: LOG_TARGET,
            session = %session_id,
            code = %record.short_code,
            "Created session"
        );

        let code = record.short_code;
        let coordinator = Coordinator::create(
            self.db.clone(),
            self.config.clone(),
            self.push_tx.clone(),
            session_id,
            record,
        );

        self.codes.write().await.insert(code, session_id);
        self.coordinators
            .write()
            .await
            .insert(session_id, coordinator.clone());
        Ok(coordinator)
    }

    /// Resolve a short code and return the session's coordinator, loading
    /// it from durable state if this process has not seen it yet.
    pub async fn lookup(&self, code: ShortCode) -> ApiResult<Arc<Coordinator>> {
        let session_id = match self.codes.read().await.get(&code) {
            Some(id) => *id,
            None => {
                let id = self
                    .db
                    .resolve_code(code)
                    .await?
                    .context(NotFoundSnafu)?;
                self.codes.write().await.insert(code, id);
                id
            }
        };

        if let Some(coordinator) = self.coordinators.read().await.get(&session_id) {
            return Ok(coordinator.clone());
        }

        let mut write = self.coordinators.write().await;
        // Lost the race with another loader?
        if let Some(coordinator) = write.get(&session_id) {
            return Ok(coordinator.clone());
        }

        let coordinator = Coordinator::open(
            self.db.clone(),
            self.config.clone(),
            self.push_tx.clone(),
            session_id,
        )
        .await?;
        write.insert(session_id, coordinator.clone());
        Ok(coordinator)
    }
}
