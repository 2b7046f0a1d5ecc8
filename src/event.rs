//! Detection events emitted at the external boundary.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Emitted once per accepted detection. A value handed outward and not
/// retained internally.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionEvent {
    /// Unique event id.
    pub id: Uuid,
    /// Name of the detector entry that fired.
    pub entry_id: String,
    /// Detection timestamp.
    pub detected_at: DateTime<Utc>,
}

impl DetectionEvent {
    pub fn new(entry_id: String, detected_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            entry_id,
            detected_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = DetectionEvent::new("porch-beacon".to_string(), Utc::now());
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["entry_id"], "porch-beacon");
        // chrono's serde emits an ISO-8601 / RFC 3339 timestamp.
        let ts = json["detected_at"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
        assert!(json["id"].as_str().is_some());
    }

    #[test]
    fn test_event_ids_are_unique() {
        let now = Utc::now();
        let a = DetectionEvent::new("x".to_string(), now);
        let b = DetectionEvent::new("x".to_string(), now);
        assert_ne!(a.id, b.id);
    }
}
