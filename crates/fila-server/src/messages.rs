//! Messages delivered to host and guest subscribers.
//!
//! These are the JSON text frames of the subscriber protocol; the HTTP
//! snapshot endpoint reuses them so polling and streaming clients parse
//! one schema.

use fila_core::Timestamp;
use fila_db::PartySnapshot;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SubscriberMessage {
    /// Host view: the full ordered queue plus the serving slot.
    QueueUpdate {
        queue: Vec<PartySnapshot>,
        now_serving: Option<PartySnapshot>,
        max_guests: u32,
        call_deadline: Option<Timestamp>,
    },
    /// Guest view while waiting.
    Position {
        position: u32,
        ahead_count: u32,
        queue_length: u32,
        estimated_wait_ms: u64,
    },
    /// Guest has been promoted to the serving slot.
    Called { deadline: Option<Timestamp> },
    /// Terminal transition for this guest.
    Removed { reason: String },
    /// Session terminated.
    Closed,
    Ping,
    Pong,
}

impl SubscriberMessage {
    /// Reason string for the WS close frame implied by this message, if it
    /// is terminal for the subscriber.
    pub fn close_reason(&self) -> Option<&str> {
        match self {
            SubscriberMessage::Removed { reason } => Some(reason),
            SubscriberMessage::Closed => Some("closed"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use fila_core::{PartyId, PartyStatus};

    use super::*;

    #[test]
    fn wire_shapes() {
        let msg = SubscriberMessage::Position {
            position: 2,
            ahead_count: 1,
            queue_length: 2,
            estimated_wait_ms: 180_000,
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            serde_json::json!({
                "type": "position",
                "position": 2,
                "aheadCount": 1,
                "queueLength": 2,
                "estimatedWaitMs": 180_000u64,
            })
        );

        let msg = SubscriberMessage::QueueUpdate {
            queue: vec![PartySnapshot {
                id: PartyId::from_bytes([1; 16]),
                name: None,
                size: 1,
                status: PartyStatus::Waiting,
                nearby: false,
                joined_at: Timestamp::from_millis(5),
            }],
            now_serving: None,
            max_guests: 4,
            call_deadline: None,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "queue_update");
        assert_eq!(value["maxGuests"], 4);
        assert_eq!(value["queue"][0]["status"], "waiting");
        assert_eq!(value["queue"][0]["joinedAt"], 5);
        // Optional name is omitted, not null
        assert!(value["queue"][0].get("name").is_none());

        assert_eq!(
            serde_json::to_value(SubscriberMessage::Closed).unwrap(),
            serde_json::json!({"type": "closed"})
        );
    }
}
