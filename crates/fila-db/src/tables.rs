//! Database table definitions.
//!
//! One redb database holds every session: the durable log (sessions,
//! parties, events), the push subscription store, and the per-session
//! snapshot used for fast restart and polling clients.
//!
//! The log is append-mostly: party records are updated in place on status
//! transitions (a party is one row, not an event stream), while the
//! `events` table is strictly append-only and is what audit and cold-start
//! reconstruction read.

use std::collections::BTreeMap;

use bincode::{Decode, Encode};
use fila_core::{PartyId, PartyStatus, SessionId, SessionStatus, ShortCode, Timestamp};
use serde::{Deserialize, Serialize};

#[macro_export]
macro_rules! def_table {
    ($(#[$outer:meta])*
        $name:ident : $k:ty => $v:ty) => {
        #[allow(unused)]
        $(#[$outer])*
        pub mod $name {
            use super::*;
            pub type Key = $k;
            pub type Value = $v;
            pub type Definition<'a> = redb_bincode::TableDefinition<'a, Key, Value>;
            pub trait ReadableTable: redb_bincode::ReadableTable<Key, Value> {}
            impl<RT> ReadableTable for RT where RT: redb_bincode::ReadableTable<Key, Value> {}
            pub type Table<'a> = redb_bincode::Table<'a, Key, Value>;
            pub const TABLE: Definition = redb_bincode::TableDefinition::new(stringify!($name));
        }
    };
}

def_table! {
    /// Tracks database/schema version for migrations.
    db_version: () => u64
}

def_table! {
    /// One row per session ever created.
    sessions: SessionId => SessionRecord
}

def_table! {
    /// Short code directory.
    ///
    /// Injective: a code maps to exactly one session for as long as the
    /// session record exists.
    sessions_by_code: ShortCode => SessionId
}

def_table! {
    /// One row per party; updated in place on status transitions.
    ///
    /// Live parties (`waiting`/`called`) are what cold-start reconstruction
    /// loads when no snapshot is available.
    parties: (SessionId, PartyId) => PartyRecord
}

def_table! {
    /// Append-only event log, ordered per session by (timestamp, counter).
    ///
    /// The counter disambiguates events landing in the same millisecond; it
    /// is a process-wide monotonic value, not persisted, which is fine
    /// because a restart cannot happen within one millisecond.
    events: (SessionId, Timestamp, u64) => EventRecord
}

def_table! {
    /// Push subscriptions, keyed by endpoint (unique per the push service).
    push_subscriptions: String => PushSubscriptionRecord
}

def_table! {
    /// Reverse index of `push_subscriptions` for per-party lookups.
    push_subscriptions_rev: (SessionId, PartyId, String) => ()
}

def_table! {
    /// Latest serialized queue state per session.
    snapshots: SessionId => SnapshotRecord
}

#[derive(Debug, Encode, Decode, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub short_code: ShortCode,
    pub status: SessionStatus,
    pub event_name: String,
    pub max_guests: u32,
    pub location: Option<String>,
    pub contact_info: Option<String>,
    /// 24h "HH:MM", validated at the API boundary.
    pub open_time: Option<String>,
    pub close_time: Option<String>,
    pub created_at: Timestamp,
}

#[derive(Debug, Encode, Decode, Clone, Serialize, Deserialize)]
pub struct PartyRecord {
    pub name: Option<String>,
    pub size: u32,
    pub joined_at: Timestamp,
    /// Set when the party is promoted to the serving slot; backs deadline
    /// reconstruction when restoring from the log alone.
    pub called_at: Option<Timestamp>,
    pub status: PartyStatus,
    pub nearby: bool,
}

/// Type of a durable log event.
#[derive(Debug, Encode, Decode, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionCreated,
    Joined,
    NudgeAck,
    Left,
    Called,
    Served,
    NoShow,
    Closed,
    PushSent,
    PushSubscribed,
    PushUnsubscribed,
}

#[derive(Debug, Encode, Decode, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub party: Option<PartyId>,
    pub kind: EventKind,
    pub ts: Timestamp,
    /// Free-form detail map (`reason`, push `kind`, ...).
    pub details: BTreeMap<String, String>,
}

impl EventRecord {
    pub fn new(kind: EventKind, party: impl Into<Option<PartyId>>) -> Self {
        Self {
            party: party.into(),
            kind,
            ts: Timestamp::now(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<String>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Encode, Decode, Clone, Serialize, Deserialize)]
pub struct PushSubscriptionRecord {
    pub session: SessionId,
    pub party: PartyId,
    pub p256dh: String,
    pub auth: String,
    pub created_at: Timestamp,
}

/// A party as it appears in queue snapshots and host-facing views.
#[derive(Debug, Encode, Decode, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartySnapshot {
    pub id: PartyId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub size: u32,
    pub status: PartyStatus,
    pub nearby: bool,
    pub joined_at: Timestamp,
}

impl PartySnapshot {
    pub fn to_record(&self, called_at: Option<Timestamp>) -> PartyRecord {
        PartyRecord {
            name: self.name.clone(),
            size: self.size,
            joined_at: self.joined_at,
            called_at,
            status: self.status,
            nearby: self.nearby,
        }
    }

    pub fn from_record(id: PartyId, record: &PartyRecord) -> Self {
        Self {
            id,
            name: record.name.clone(),
            size: record.size,
            status: record.status,
            nearby: record.nearby,
            joined_at: record.joined_at,
        }
    }
}

#[derive(Debug, Encode, Decode, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    pub queue: Vec<PartySnapshot>,
    pub now_serving: Option<PartySnapshot>,
    pub closed: bool,
    pub max_guests: u32,
    pub call_deadline: Option<Timestamp>,
    pub updated_at: Timestamp,
}
