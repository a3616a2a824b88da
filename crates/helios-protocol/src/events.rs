//! Realtime wire types.
//!
//! The service pushes JSON envelopes `{ "event": NAME, "payload": {...} }`.
//! The task-scoped endpoint additionally replays conversation history as bare
//! records without an envelope. Clients send `{ "event": "PING" }` as a
//! heartbeat and `{ "event": NAME, "payload": {...} }` for everything else.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{AgentMessage, AgentMessagePayload, PlanUpdate, TaskStatus};

// ============================================================================
// Event kinds
// ============================================================================

/// Inbound event kinds recognised by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PlanUpdated,
    AgentMessage,
    StatusChange,
    TaskStatusChanged,
    FeedbackProcessed,
    ConnectionEstablished,
    Pong,
    /// Echo acknowledgement the service sends for every client message.
    Received,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::PlanUpdated,
        EventKind::AgentMessage,
        EventKind::StatusChange,
        EventKind::TaskStatusChanged,
        EventKind::FeedbackProcessed,
        EventKind::ConnectionEstablished,
        EventKind::Pong,
        EventKind::Received,
    ];

    /// Wire name of the event.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::PlanUpdated => "PLAN_UPDATED",
            EventKind::AgentMessage => "AGENT_MESSAGE",
            EventKind::StatusChange => "STATUS_CHANGE",
            EventKind::TaskStatusChanged => "TASK_STATUS_CHANGED",
            EventKind::FeedbackProcessed => "FEEDBACK_PROCESSED",
            EventKind::ConnectionEstablished => "CONNECTION_ESTABLISHED",
            EventKind::Pong => "PONG",
            EventKind::Received => "RECEIVED",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanUpdated {
    pub plan: PlanUpdate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: String,
    #[serde(default)]
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusChanged {
    pub task_id: String,
    pub status: TaskStatus,
}

/// Notification that the service finished processing user feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackProcessed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEstablished {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Conversation history record replayed by the task-scoped endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Numeric or string id, depending on the service's storage backend.
    /// Live messages broadcast after the replay carry no id.
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub sequence_order: i64,
    pub speaker: String,
    pub message: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl HistoryRecord {
    /// Convert to a transcript entry for `task_id`.
    ///
    /// `created_at` may be RFC 3339 or a naive ISO timestamp (taken as UTC);
    /// anything else falls back to `now`.
    pub fn into_message(self, task_id: Option<String>, now: DateTime<Utc>) -> AgentMessage {
        let id = match self.id {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        let timestamp = self
            .created_at
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(now);

        AgentMessage {
            id: (!id.is_empty()).then_some(id),
            agent_role: None,
            agent_name: Some(self.speaker),
            kind: None,
            content: self.message,
            timestamp,
            task_id,
            metadata: None,
        }
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

// ============================================================================
// Inbound events
// ============================================================================

/// Errors decoding an inbound frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("frame has no event name")]
    MissingEvent,

    #[error("invalid {kind} payload: {source}")]
    Payload {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    PlanUpdated(PlanUpdated),
    AgentMessage(AgentMessagePayload),
    StatusChange(StatusChange),
    TaskStatusChanged(TaskStatusChanged),
    FeedbackProcessed(FeedbackProcessed),
    ConnectionEstablished(ConnectionEstablished),
    Pong,
    Received(Value),
    /// Conversation history replayed by the task-scoped endpoint.
    History(HistoryRecord),
    /// Well-formed envelope with an event name this client does not know.
    Unknown { event: String },
}

impl InboundEvent {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(mut object) = value else {
            return Err(DecodeError::NotAnObject);
        };

        let event = match object.remove("event") {
            Some(Value::String(event)) => event,
            Some(_) => return Err(DecodeError::MissingEvent),
            None if is_history_record(&object) => {
                let record = serde_json::from_value(Value::Object(object))?;
                return Ok(InboundEvent::History(record));
            }
            None => return Err(DecodeError::MissingEvent),
        };
        let payload = object.remove("payload").unwrap_or(Value::Null);

        let Some(kind) = EventKind::from_wire(&event) else {
            return Ok(InboundEvent::Unknown { event });
        };

        let decoded = match kind {
            EventKind::PlanUpdated => InboundEvent::PlanUpdated(decode_payload(kind, payload)?),
            EventKind::AgentMessage => InboundEvent::AgentMessage(decode_payload(kind, payload)?),
            EventKind::StatusChange => InboundEvent::StatusChange(decode_payload(kind, payload)?),
            EventKind::TaskStatusChanged => {
                InboundEvent::TaskStatusChanged(decode_payload(kind, payload)?)
            }
            EventKind::FeedbackProcessed => {
                InboundEvent::FeedbackProcessed(decode_payload(kind, payload)?)
            }
            EventKind::ConnectionEstablished => {
                if payload.is_null() {
                    InboundEvent::ConnectionEstablished(ConnectionEstablished::default())
                } else {
                    InboundEvent::ConnectionEstablished(decode_payload(kind, payload)?)
                }
            }
            EventKind::Pong => InboundEvent::Pong,
            EventKind::Received => InboundEvent::Received(payload),
        };
        Ok(decoded)
    }

    /// Name used when logging the event.
    pub fn name(&self) -> &str {
        match self {
            InboundEvent::PlanUpdated(_) => EventKind::PlanUpdated.as_str(),
            InboundEvent::AgentMessage(_) => EventKind::AgentMessage.as_str(),
            InboundEvent::StatusChange(_) => EventKind::StatusChange.as_str(),
            InboundEvent::TaskStatusChanged(_) => EventKind::TaskStatusChanged.as_str(),
            InboundEvent::FeedbackProcessed(_) => EventKind::FeedbackProcessed.as_str(),
            InboundEvent::ConnectionEstablished(_) => EventKind::ConnectionEstablished.as_str(),
            InboundEvent::Pong => EventKind::Pong.as_str(),
            InboundEvent::Received(_) => EventKind::Received.as_str(),
            InboundEvent::History(_) => "HISTORY",
            InboundEvent::Unknown { event } => event,
        }
    }
}

fn is_history_record(object: &Map<String, Value>) -> bool {
    object.contains_key("speaker") && object.contains_key("message")
}

fn decode_payload<T: DeserializeOwned>(kind: EventKind, payload: Value) -> Result<T, DecodeError> {
    serde_json::from_value(payload).map_err(|source| DecodeError::Payload { kind, source })
}

// ============================================================================
// Outbound messages
// ============================================================================

/// A message sent from the client to the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl OutboundMessage {
    pub const PING: &'static str = "PING";

    /// Heartbeat message.
    pub fn ping() -> Self {
        Self {
            event: Self::PING.to_string(),
            payload: None,
        }
    }

    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload: Some(payload),
        }
    }

    pub fn is_ping(&self) -> bool {
        self.event == Self::PING
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_agent_message() {
        let text = json!({
            "event": "AGENT_MESSAGE",
            "payload": { "agentName": "engineer", "message": "Compiling", "timestamp": null }
        })
        .to_string();

        match InboundEvent::decode(&text).unwrap() {
            InboundEvent::AgentMessage(payload) => {
                assert_eq!(payload.content, "Compiling");
                assert_eq!(payload.agent_name.as_deref(), Some("engineer"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_decode_plan_updated() {
        let text = r#"{"event":"PLAN_UPDATED","payload":{"plan":{"id":"p1","progress":55}}}"#;
        let event = InboundEvent::decode(text).unwrap();
        let InboundEvent::PlanUpdated(PlanUpdated { plan }) = event else {
            panic!("expected plan update");
        };
        assert_eq!(plan.id, "p1");
        assert_eq!(plan.patch.progress, Some(55.0));
    }

    #[test]
    fn test_decode_status_change_without_details() {
        let text = r#"{"event":"STATUS_CHANGE","payload":{"status":"busy"}}"#;
        assert_eq!(
            InboundEvent::decode(text).unwrap(),
            InboundEvent::StatusChange(StatusChange {
                status: "busy".to_string(),
                details: None,
            })
        );
    }

    #[test]
    fn test_decode_task_status_changed() {
        let text =
            r#"{"event":"TASK_STATUS_CHANGED","payload":{"taskId":"t9","status":"COMPLETED"}}"#;
        assert_eq!(
            InboundEvent::decode(text).unwrap(),
            InboundEvent::TaskStatusChanged(TaskStatusChanged {
                task_id: "t9".to_string(),
                status: TaskStatus::Completed,
            })
        );
    }

    #[test]
    fn test_decode_pong_without_payload() {
        assert_eq!(
            InboundEvent::decode(r#"{"event":"PONG"}"#).unwrap(),
            InboundEvent::Pong
        );
    }

    #[test]
    fn test_decode_connection_established() {
        let text = r#"{"event":"CONNECTION_ESTABLISHED","payload":{"message":"hi","userId":"u1"}}"#;
        let InboundEvent::ConnectionEstablished(info) = InboundEvent::decode(text).unwrap() else {
            panic!("expected connection event");
        };
        assert_eq!(info.user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn test_unknown_event_is_not_an_error() {
        let event = InboundEvent::decode(r#"{"event":"CONFETTI","payload":{}}"#).unwrap();
        assert_eq!(
            event,
            InboundEvent::Unknown {
                event: "CONFETTI".to_string()
            }
        );
        assert_eq!(event.name(), "CONFETTI");
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(
            InboundEvent::decode("not json"),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            InboundEvent::decode("[1,2,3]"),
            Err(DecodeError::NotAnObject)
        ));
        assert!(matches!(
            InboundEvent::decode(r#"{"payload":{}}"#),
            Err(DecodeError::MissingEvent)
        ));
        assert!(matches!(
            InboundEvent::decode(r#"{"event":42}"#),
            Err(DecodeError::MissingEvent)
        ));
    }

    #[test]
    fn test_bad_payload_for_known_kind() {
        let err = InboundEvent::decode(r#"{"event":"TASK_STATUS_CHANGED","payload":{"taskId":1}}"#)
            .unwrap_err();
        match err {
            DecodeError::Payload { kind, .. } => assert_eq!(kind, EventKind::TaskStatusChanged),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_decode_history_record() {
        let text = json!({
            "id": 7,
            "sequence_order": 2,
            "speaker": "Engineer",
            "message": "Tests pass",
            "created_at": "2024-05-01T10:00:00.250000"
        })
        .to_string();

        let InboundEvent::History(record) = InboundEvent::decode(&text).unwrap() else {
            panic!("expected history record");
        };
        let message = record.into_message(Some("t1".to_string()), Utc::now());
        assert_eq!(message.id.as_deref(), Some("7"));
        assert_eq!(message.agent_name.as_deref(), Some("Engineer"));
        assert_eq!(message.task_id.as_deref(), Some("t1"));
        assert_eq!(
            message.timestamp.to_rfc3339(),
            "2024-05-01T10:00:00.250+00:00"
        );
    }

    #[test]
    fn test_decode_live_task_message_without_id() {
        let text = r#"{"speaker":"Engineer","message":"build is green"}"#;
        let InboundEvent::History(record) = InboundEvent::decode(text).unwrap() else {
            panic!("expected history record");
        };
        assert_eq!(record.id, Value::Null);

        let now = Utc::now();
        let message = record.into_message(Some("t1".to_string()), now);
        assert_eq!(message.id, None);
        assert_eq!(message.content, "build is green");
        assert_eq!(message.task_id.as_deref(), Some("t1"));
        assert_eq!(message.timestamp, now);
    }

    #[test]
    fn test_ping_serialization() {
        let json = OutboundMessage::ping().to_json().unwrap();
        assert_eq!(json, r#"{"event":"PING"}"#);
    }

    #[test]
    fn test_outbound_with_payload() {
        let message = OutboundMessage::new("SUBMIT_FEEDBACK", json!({"taskId": "t1"}));
        let value: Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "SUBMIT_FEEDBACK");
        assert_eq!(value["payload"]["taskId"], "t1");
        assert!(!message.is_ping());
    }

    #[test]
    fn test_event_kind_round_trips_wire_names() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_wire(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::from_wire("plan_updated"), None);
    }
}
