use std::collections::HashMap;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params;

use super::models::Monitor;
use crate::maintenance::MaintenanceWindow;
use crate::monitoring::heartbeat::{Heartbeat, Status};
use crate::pool::{LibsqlManager, LibsqlPool};

/// Repository trait for abstracting database operations.
///
/// The service core never owns persistence logic; it consumes and
/// produces the in-memory record shapes through this seam.
#[async_trait]
pub trait Database: Send + Sync {
    /// All monitors that should be scheduled.
    async fn get_active_monitors(&self) -> Result<Vec<Monitor>>;

    /// A user's monitors, ordered by weight descending then name.
    async fn get_monitors_by_user(&self, user_id: i64) -> Result<Vec<Monitor>>;

    /// Get a monitor by id
    async fn get_monitor(&self, id: i64) -> Result<Option<Monitor>>;

    /// Save a monitor (insert when id is 0, update otherwise)
    async fn save_monitor(&self, monitor: &Monitor) -> Result<i64>;

    /// Append a heartbeat record
    async fn save_heartbeat(&self, heartbeat: &Heartbeat) -> Result<i64>;

    /// Most recent heartbeat for a monitor
    async fn get_last_heartbeat(&self, monitor_id: i64) -> Result<Option<Heartbeat>>;

    /// All maintenance windows, with their affected monitor ids
    async fn get_maintenances(&self) -> Result<Vec<MaintenanceWindow>>;

    /// Save a maintenance window and its monitor links
    async fn save_maintenance(&self, window: &MaintenanceWindow) -> Result<i64>;

    /// Read a persisted setting value
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    /// Write a persisted setting value
    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;
}

fn time_to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn millis_to_time(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default()
}

/// LibSQL repository implementation
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

impl DatabaseImpl {
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        Ok(self.pool.get().await?)
    }

    fn monitor_from_row(row: &libsql::Row) -> Result<Monitor> {
        Ok(Monitor {
            id: row.get(0)?,
            name: row.get(1)?,
            hostname: row.get(2)?,
            check_type: row.get(3)?,
            interval_seconds: row.get::<i64>(4)? as u64,
            max_retries: row.get::<i64>(5)? as u64,
            weight: row.get(6)?,
            user_id: row.get(7)?,
            active: row.get::<i64>(8)? != 0,
        })
    }
}

const MONITOR_COLUMNS: &str =
    "id, name, hostname, check_type, interval_seconds, max_retries, weight, user_id, active";

#[async_trait]
impl Database for DatabaseImpl {
    async fn get_active_monitors(&self) -> Result<Vec<Monitor>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE active = 1"))
            .await?;

        let mut rows = stmt.query(()).await?;
        let mut monitors = Vec::new();
        while let Some(row) = rows.next().await? {
            monitors.push(Self::monitor_from_row(&row)?);
        }
        Ok(monitors)
    }

    async fn get_monitors_by_user(&self, user_id: i64) -> Result<Vec<Monitor>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MONITOR_COLUMNS} FROM monitors
                 WHERE user_id = ? ORDER BY weight DESC, name ASC"
            ))
            .await?;

        let mut rows = stmt.query(params![user_id]).await?;
        let mut monitors = Vec::new();
        while let Some(row) = rows.next().await? {
            monitors.push(Self::monitor_from_row(&row)?);
        }
        Ok(monitors)
    }

    async fn get_monitor(&self, id: i64) -> Result<Option<Monitor>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE id = ?"))
            .await?;

        let mut rows = stmt.query(params![id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::monitor_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn save_monitor(&self, monitor: &Monitor) -> Result<i64> {
        let conn = self.get_conn().await?;

        if monitor.id > 0 {
            conn.execute(
                "UPDATE monitors SET name = ?, hostname = ?, check_type = ?,
                 interval_seconds = ?, max_retries = ?, weight = ?, user_id = ?, active = ?
                 WHERE id = ?",
                params![
                    monitor.name.clone(),
                    monitor.hostname.clone(),
                    monitor.check_type.clone(),
                    monitor.interval_seconds as i64,
                    monitor.max_retries as i64,
                    monitor.weight,
                    monitor.user_id,
                    if monitor.active { 1 } else { 0 },
                    monitor.id
                ],
            )
            .await?;
            Ok(monitor.id)
        } else {
            conn.execute(
                "INSERT INTO monitors (name, hostname, check_type, interval_seconds,
                 max_retries, weight, user_id, active) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    monitor.name.clone(),
                    monitor.hostname.clone(),
                    monitor.check_type.clone(),
                    monitor.interval_seconds as i64,
                    monitor.max_retries as i64,
                    monitor.weight,
                    monitor.user_id,
                    if monitor.active { 1 } else { 0 }
                ],
            )
            .await?;
            Ok(conn.last_insert_rowid())
        }
    }

    async fn save_heartbeat(&self, heartbeat: &Heartbeat) -> Result<i64> {
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO heartbeats (monitor_id, status, time, msg, ping, important, duration)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                heartbeat.monitor_id,
                heartbeat.status as u8 as i64,
                time_to_millis(heartbeat.time),
                heartbeat.msg.clone(),
                heartbeat.ping.map(|v| v as i64),
                if heartbeat.important { 1 } else { 0 },
                heartbeat.duration
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn get_last_heartbeat(&self, monitor_id: i64) -> Result<Option<Heartbeat>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(
                "SELECT monitor_id, status, time, msg, ping, important, duration
                 FROM heartbeats WHERE monitor_id = ? ORDER BY time DESC, id DESC LIMIT 1",
            )
            .await?;

        let mut rows = stmt.query(params![monitor_id]).await?;
        match rows.next().await? {
            Some(row) => {
                let status_repr: i64 = row.get(1)?;
                let status = Status::from_repr(status_repr as u8)
                    .ok_or_else(|| anyhow!("corrupt heartbeat status value {status_repr}"))?;

                Ok(Some(Heartbeat {
                    monitor_id: row.get(0)?,
                    status,
                    time: millis_to_time(row.get(2)?),
                    msg: row.get(3)?,
                    ping: row.get::<Option<i64>>(4)?.map(|v| v as u64),
                    important: row.get::<i64>(5)? != 0,
                    duration: row.get(6)?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn get_maintenances(&self) -> Result<Vec<MaintenanceWindow>> {
        let conn = self.get_conn().await?;

        // Affected monitor ids, grouped by window.
        let mut link_rows = conn
            .query("SELECT maintenance_id, monitor_id FROM maintenance_monitor", ())
            .await?;
        let mut links: HashMap<i64, Vec<i64>> = HashMap::new();
        while let Some(row) = link_rows.next().await? {
            links.entry(row.get(0)?).or_default().push(row.get(1)?);
        }

        let mut stmt = conn
            .prepare("SELECT id, title, cron, duration_minutes, timezone, ends_at FROM maintenance")
            .await?;
        let mut rows = stmt.query(()).await?;
        let mut windows = Vec::new();

        while let Some(row) = rows.next().await? {
            let id: i64 = row.get(0)?;
            let mut window = MaintenanceWindow::new(
                id,
                row.get(1)?,
                row.get(2)?,
                row.get::<i64>(3)? as u64,
                row.get::<Option<String>>(4)?,
                row.get::<Option<i64>>(5)?.map(millis_to_time),
            );
            if let Some(ids) = links.remove(&id) {
                window.set_monitors(ids);
            }
            windows.push(window);
        }

        Ok(windows)
    }

    async fn save_maintenance(&self, window: &MaintenanceWindow) -> Result<i64> {
        let conn = self.get_conn().await?;

        let id = if window.id > 0 {
            conn.execute(
                "UPDATE maintenance SET title = ?, cron = ?, duration_minutes = ?,
                 timezone = ?, ends_at = ? WHERE id = ?",
                params![
                    window.title.clone(),
                    window.cron.clone(),
                    window.duration_minutes as i64,
                    window.timezone.clone(),
                    window.ends_at.map(time_to_millis),
                    window.id
                ],
            )
            .await?;
            window.id
        } else {
            conn.execute(
                "INSERT INTO maintenance (title, cron, duration_minutes, timezone, ends_at)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    window.title.clone(),
                    window.cron.clone(),
                    window.duration_minutes as i64,
                    window.timezone.clone(),
                    window.ends_at.map(time_to_millis)
                ],
            )
            .await?;
            conn.last_insert_rowid()
        };

        conn.execute("DELETE FROM maintenance_monitor WHERE maintenance_id = ?", params![id])
            .await?;
        for monitor_id in window.monitor_ids() {
            conn.execute(
                "INSERT INTO maintenance_monitor (maintenance_id, monitor_id) VALUES (?, ?)",
                params![id, *monitor_id],
            )
            .await?;
        }

        Ok(id)
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query("SELECT value FROM settings WHERE key = ?", params![key])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.get_conn().await?;
        let now = Utc::now().timestamp();

        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value,
             updated_at = excluded.updated_at",
            params![key, value, now],
        )
        .await?;
        Ok(())
    }
}
