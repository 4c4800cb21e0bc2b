use serde::{Deserialize, Serialize};

/// A registered stream and the schema it was registered with.
/// The schema is opaque to the cache; it is forwarded to the remote on creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub name: String,
    pub schema: String,
}

/// A data point waiting in the local queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueuedEvent {
    /// Storage row id. Preserves insertion identity and breaks timestamp ties.
    pub id: i64,
    pub stream: String,
    /// Seconds since the Unix epoch, sub-second precision preserved.
    pub timestamp: f64,
    pub payload: String,
}

/// One element of an outgoing batch: `{"t": <seconds>, "d": <payload>}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub t: f64,
    pub d: serde_json::Value,
}

impl DataPoint {
    /// Build a point from a queued payload. Payloads that parse as JSON are
    /// sent as-is, anything else is sent as a JSON string.
    pub fn from_payload(t: f64, payload: &str) -> Self {
        let d = serde_json::from_str(payload)
            .unwrap_or_else(|_| serde_json::Value::String(payload.to_string()));
        Self { t, d }
    }
}

impl From<&QueuedEvent> for DataPoint {
    fn from(event: &QueuedEvent) -> Self {
        Self::from_payload(event.timestamp, &event.payload)
    }
}

/// Convert a millisecond producer timestamp to queue seconds.
pub fn millis_to_seconds(millis: i64) -> f64 {
    millis as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_payload_kept_verbatim() {
        let point = DataPoint::from_payload(1.5, r#"{"lat": 1.25, "lon": -3.5}"#);
        assert_eq!(point.d["lat"], 1.25);
        assert_eq!(point.d["lon"], -3.5);
    }

    #[test]
    fn non_json_payload_becomes_string() {
        let point = DataPoint::from_payload(1.0, "a");
        assert_eq!(point.d, serde_json::Value::String("a".into()));
    }

    #[test]
    fn data_point_wire_shape() {
        let points = vec![
            DataPoint::from_payload(1.0, "\"a\""),
            DataPoint::from_payload(1.5, "42"),
        ];
        let json = serde_json::to_string(&points).unwrap();
        assert_eq!(json, r#"[{"t":1.0,"d":"a"},{"t":1.5,"d":42}]"#);
    }

    #[test]
    fn single_point_batch_is_well_formed() {
        let json = serde_json::to_string(&vec![DataPoint::from_payload(2.0, "true")]).unwrap();
        assert_eq!(json, r#"[{"t":2.0,"d":true}]"#);
        let parsed: Vec<DataPoint> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn millis_conversion_keeps_subsecond() {
        assert_eq!(millis_to_seconds(1_500), 1.5);
        assert_eq!(millis_to_seconds(1_700_000_000_123), 1_700_000_000.123);
    }
}
