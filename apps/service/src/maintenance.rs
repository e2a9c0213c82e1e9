use std::collections::HashSet;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde_json::{Value, json};
use tracing::info;

/// A scheduled interval during which affected monitors' visible status
/// is forced to MAINTENANCE regardless of checker output.
///
/// Windows are loaded in bulk at startup into the orchestrator's
/// registry and `start()`ed there; they are removed only on
/// reload/restart.
#[derive(Debug, Clone)]
pub struct MaintenanceWindow {
    pub id: i64,
    pub title: String,
    /// Cron expression marking the start of each window occurrence.
    pub cron: String,
    pub duration_minutes: u64,
    /// IANA timezone the cron expression is evaluated in; the server
    /// default applies when unset.
    pub timezone: Option<String>,
    /// Hard end date after which the window never activates again.
    pub ends_at: Option<DateTime<Utc>>,
    monitor_ids: HashSet<i64>,
    schedule: Option<Schedule>,
    tz: Tz,
}

/// Convert a standard 5-field Unix cron expression to the 7-field
/// format expected by the `cron` crate (seconds prepended, year
/// appended). Expressions already carrying 6+ fields pass through.
fn normalize_cron(expression: &str) -> String {
    let field_count = expression.split_whitespace().count();
    if field_count == 5 {
        format!("0 {expression} *")
    } else {
        expression.to_string()
    }
}

impl MaintenanceWindow {
    pub fn new(
        id: i64,
        title: String,
        cron: String,
        duration_minutes: u64,
        timezone: Option<String>,
        ends_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            title,
            cron,
            duration_minutes,
            timezone,
            ends_at,
            monitor_ids: HashSet::new(),
            schedule: None,
            tz: Tz::UTC,
        }
    }

    pub fn set_monitors(&mut self, ids: Vec<i64>) {
        self.monitor_ids = ids.into_iter().collect();
    }

    pub fn monitor_ids(&self) -> impl Iterator<Item = &i64> {
        self.monitor_ids.iter()
    }

    pub fn applies_to(&self, monitor_id: i64) -> bool {
        self.monitor_ids.contains(&monitor_id)
    }

    /// Parse and validate the schedule. Called once when the window is
    /// loaded into the registry; a window that was never started is
    /// never active.
    pub fn start(&mut self, default_tz: Tz) -> Result<()> {
        self.tz = match &self.timezone {
            Some(name) => Tz::from_str(name)
                .map_err(|_| anyhow::anyhow!("invalid timezone {name:?} on maintenance {}", self.id))?,
            None => default_tz,
        };

        let normalized = normalize_cron(&self.cron);
        self.schedule = Some(
            Schedule::from_str(&normalized)
                .with_context(|| format!("invalid cron {:?} on maintenance {}", self.cron, self.id))?,
        );

        info!(id = self.id, title = %self.title, tz = %self.tz, "Started maintenance window");
        Ok(())
    }

    /// Whether a scheduled occurrence covers `now`: the window is not
    /// past its end date and some occurrence started within the last
    /// `duration_minutes`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        if let Some(ends_at) = self.ends_at {
            if now > ends_at {
                return false;
            }
        }

        let Some(schedule) = &self.schedule else {
            return false;
        };

        let window = Duration::minutes(self.duration_minutes as i64);
        let since = (now - window).with_timezone(&self.tz);

        schedule.after(&since).take(16).any(|start| {
            let start = start.with_timezone(&Utc);
            start <= now && now < start + window
        })
    }

    /// JSON view used by the maintenance list snapshot.
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "title": self.title,
            "cron": self.cron,
            "durationMinutes": self.duration_minutes,
            "timezone": self.timezone,
            "endDate": self
                .ends_at
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)),
            "active": self.is_active_at(Utc::now()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window(cron: &str, duration_minutes: u64) -> MaintenanceWindow {
        let mut w = MaintenanceWindow::new(
            1,
            "weekly patching".to_string(),
            cron.to_string(),
            duration_minutes,
            None,
            None,
        );
        w.start(Tz::UTC).unwrap();
        w
    }

    #[test]
    fn five_field_cron_is_normalized() {
        assert_eq!(normalize_cron("0 12 * * *"), "0 0 12 * * * *");
        assert_eq!(normalize_cron("0 0 12 * * *"), "0 0 12 * * *");
    }

    #[test]
    fn window_is_active_inside_occurrence() {
        let w = window("0 12 * * *", 60);
        let inside = Utc.with_ymd_and_hms(2026, 1, 5, 12, 30, 0).unwrap();
        let outside = Utc.with_ymd_and_hms(2026, 1, 5, 14, 0, 0).unwrap();
        assert!(w.is_active_at(inside));
        assert!(!w.is_active_at(outside));
    }

    #[test]
    fn expired_window_is_never_active() {
        let mut w = window("* * * * *", 60);
        w.ends_at = Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 12, 30, 0).unwrap();
        assert!(!w.is_active_at(now));
    }

    #[test]
    fn unstarted_window_is_inactive() {
        let w = MaintenanceWindow::new(2, "t".into(), "* * * * *".into(), 60, None, None);
        assert!(!w.is_active_at(Utc::now()));
    }

    #[test]
    fn invalid_cron_fails_start() {
        let mut w =
            MaintenanceWindow::new(3, "t".into(), "not a cron".into(), 60, None, None);
        assert!(w.start(Tz::UTC).is_err());
    }

    #[test]
    fn monitor_linkage() {
        let mut w = window("0 12 * * *", 60);
        w.set_monitors(vec![4, 9]);
        assert!(w.applies_to(4));
        assert!(!w.applies_to(5));
    }

    #[test]
    fn json_view_carries_schedule_fields() {
        let w = window("0 12 * * *", 45);
        let value = w.to_json();
        assert_eq!(value["title"], "weekly patching");
        assert_eq!(value["durationMinutes"], 45);
        assert_eq!(value["endDate"], serde_json::Value::Null);
    }
}
