//! Event shapes on the bus and on the wire

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event published on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusEvent {
    /// Event type, e.g. `task_completed`
    #[serde(rename = "type")]
    pub event_type: String,
    /// Orchestration the event belongs to
    pub task_id: String,
    /// When it was emitted
    pub timestamp: DateTime<Utc>,
    /// Payload
    #[serde(default)]
    pub data: serde_json::Value,
}

impl BusEvent {
    /// Create new event stamped now
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        task_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            task_id: task_id.into(),
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Envelope sent to stream clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Emitting component
    pub source: String,
    /// Event type
    pub event_type: String,
    /// Orchestration id
    pub task_id: String,
    /// When it was emitted
    pub timestamp: DateTime<Utc>,
    /// Payload
    pub data: serde_json::Value,
}

impl EventEnvelope {
    /// Wrap a bus event
    #[must_use]
    pub fn from_bus(source: impl Into<String>, event: BusEvent) -> Self {
        Self {
            source: source.into(),
            event_type: event.event_type,
            task_id: event.task_id,
            timestamp: event.timestamp,
            data: event.data,
        }
    }

    /// One server-sent-events frame: `data: <json>` and a blank line
    ///
    /// # Errors
    /// Fails only if the payload cannot be serialized.
    pub fn to_sse_frame(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn bus_event_wire_names() {
        let event = BusEvent::new("wave_started", "o1", json!({"wave": 0}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "wave_started");
        assert_eq!(value["taskId"], "o1");
        assert_eq!(value["data"]["wave"], 0);
    }

    #[test]
    fn sse_frame_is_single_data_line() {
        let envelope = EventEnvelope::from_bus("orchestrator", BusEvent::new("log", "o1", json!("hi")));
        let frame = envelope.to_sse_frame().unwrap();

        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("}\n\n"));
        assert_eq!(frame.matches('\n').count(), 2);

        let parsed: serde_json::Value =
            serde_json::from_str(frame.trim_start_matches("data: ").trim_end()).unwrap();
        assert_eq!(parsed["eventType"], "log");
        assert_eq!(parsed["source"], "orchestrator");
    }
}
