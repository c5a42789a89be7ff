//! Event envelope - the common wrapper for all events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use yarnscale_id::EventId;

use crate::{ContainerEvent, EventError};

/// The event envelope - common metadata for all events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Time-ordered event identifier.
    pub event_id: EventId,

    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,

    /// The event type (e.g., "container.failed").
    pub event_type: String,

    /// Schema version for this event type.
    pub event_version: i32,

    /// Application whose controller emitted the event.
    pub source: String,

    /// Event-specific payload.
    pub payload: ContainerEvent,
}

impl EventEnvelope {
    /// Wraps a payload with fresh metadata.
    pub fn new(source: impl Into<String>, payload: ContainerEvent) -> Self {
        Self {
            event_id: EventId::new(),
            occurred_at: Utc::now(),
            event_type: payload.event_type().to_string(),
            event_version: 1,
            source: source.into(),
            payload,
        }
    }

    /// Serializes the envelope to JSON.
    pub fn to_json(&self) -> Result<String, EventError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CountChangeCause;

    fn count_changed() -> ContainerEvent {
        ContainerEvent::CountChanged {
            target: 10,
            current: 10,
            running: 4,
            cause: CountChangeCause::Requested,
        }
    }

    #[test]
    fn test_envelope_sets_event_type_from_payload() {
        let envelope = EventEnvelope::new("testApp", count_changed());
        assert_eq!(envelope.event_type, "container.count_changed");
        assert_eq!(envelope.event_version, 1);
        assert_eq!(envelope.source, "testApp");
    }

    #[test]
    fn test_envelope_json_carries_type_and_payload() {
        let envelope = EventEnvelope::new("testApp", count_changed());
        let json = envelope.to_json().unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["event_type"], "container.count_changed");
        assert_eq!(value["source"], "testApp");
        assert_eq!(value["payload"]["target"], 10);
    }
}
