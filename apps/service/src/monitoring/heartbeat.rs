use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Visible status of a monitor after one check execution.
///
/// The integer values are wire-stable and must never be renumbered:
/// they are stored in the database and sent to clients as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Down = 0,
    Up = 1,
    Pending = 2,
    Maintenance = 3,
}

impl Status {
    pub fn from_repr(value: u8) -> Option<Self> {
        match value {
            0 => Some(Status::Down),
            1 => Some(Status::Up),
            2 => Some(Status::Pending),
            3 => Some(Status::Maintenance),
            _ => None,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Down => write!(f, "down"),
            Status::Up => write!(f, "up"),
            Status::Pending => write!(f, "pending"),
            Status::Maintenance => write!(f, "maintenance"),
        }
    }
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u8::deserialize(deserializer)?;
        Status::from_repr(value)
            .ok_or_else(|| de::Error::custom(format!("unknown status value {value}")))
    }
}

/// One immutable health record produced by a single check execution.
///
/// A checker invocation either fully populates the heartbeat for the
/// UP case or leaves it untouched and signals a failure instead; the
/// caller constructs the PENDING/DOWN record from the failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub monitor_id: i64,
    pub status: Status,
    pub time: DateTime<Utc>,
    pub msg: String,
    /// Round-trip latency in milliseconds, set only when a successful
    /// measurement exists.
    pub ping: Option<u64>,
    /// Marks a status transition worth surfacing.
    pub important: bool,
    /// Seconds since the previous heartbeat of the same monitor.
    pub duration: i64,
}

impl Heartbeat {
    /// Fresh heartbeat handed to a checker, timestamped now.
    pub fn pending(monitor_id: i64) -> Self {
        Self {
            monitor_id,
            status: Status::Pending,
            time: Utc::now(),
            msg: String::new(),
            ping: None,
            important: false,
            duration: 0,
        }
    }

    /// Full (authenticated) JSON view.
    pub fn to_json(&self) -> Value {
        json!({
            "monitorID": self.monitor_id,
            "status": self.status as u8,
            "time": self.time.to_rfc3339_opts(SecondsFormat::Millis, true),
            "msg": self.msg,
            "ping": self.ping,
            "important": self.important,
            "duration": self.duration,
        })
    }

    /// Public JSON view: identical to the full view except the message
    /// is always blanked, keeping hostnames and internal error text
    /// away from unauthenticated viewers.
    #[allow(dead_code)] // Consumed by the public status surface
    pub fn to_public_json(&self) -> Value {
        let mut value = self.to_json();
        value["msg"] = Value::String(String::new());
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_values_are_wire_stable() {
        assert_eq!(Status::Down as u8, 0);
        assert_eq!(Status::Up as u8, 1);
        assert_eq!(Status::Pending as u8, 2);
        assert_eq!(Status::Maintenance as u8, 3);
        assert_eq!(Status::from_repr(3), Some(Status::Maintenance));
        assert_eq!(Status::from_repr(4), None);
    }

    #[test]
    fn status_serializes_as_integer() {
        assert_eq!(serde_json::to_value(Status::Up).unwrap(), json!(1));
        let parsed: Status = serde_json::from_value(json!(0)).unwrap();
        assert_eq!(parsed, Status::Down);
    }

    #[test]
    fn full_view_preserves_message() {
        let mut heartbeat = Heartbeat::pending(7);
        heartbeat.status = Status::Up;
        heartbeat.msg = "pong from host-a (100.64.0.7) via DERP(fra) in 23ms".to_string();
        heartbeat.ping = Some(23);

        let value = heartbeat.to_json();
        assert_eq!(value["monitorID"], json!(7));
        assert_eq!(value["status"], json!(1));
        assert_eq!(value["ping"], json!(23));
        assert_eq!(value["msg"], json!("pong from host-a (100.64.0.7) via DERP(fra) in 23ms"));
    }

    #[test]
    fn public_view_always_blanks_message() {
        let mut heartbeat = Heartbeat::pending(7);
        heartbeat.msg = "internal-host.example failed".to_string();

        let public = heartbeat.to_public_json();
        assert_eq!(public["msg"], json!(""));
        // Everything else matches the full view.
        assert_eq!(public["monitorID"], heartbeat.to_json()["monitorID"]);
        assert_eq!(public["status"], heartbeat.to_json()["status"]);
    }
}
