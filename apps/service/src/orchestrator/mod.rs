/// Orchestrator module - the process core
///
/// Owns the checker registry, the maintenance-window registry, and the
/// multi-tenant broadcast fan-out. Constructed once at startup and
/// passed by reference; there is no ambient singleton. Also resolves
/// the server timezone, manages the auxiliary cache service, resolves
/// client addresses, and keeps the durable error sink.


use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};

use crate::broadcast::{Broadcaster, Event, MAINTENANCE_ROOM, user_room};
use crate::config::Config;
use crate::database::models::Monitor;
use crate::database::{Database, DatabaseImpl, initialize_database};
use crate::maintenance::MaintenanceWindow;
use crate::monitoring::checker::CheckerRegistry;
use crate::monitoring::heartbeat::{Heartbeat, Status};
use crate::monitoring::{CheckExecutor, CheckOutcome, CheckScheduler};
use crate::pool::LibsqlPool;
use crate::timezone;

/// Persisted boolean gating the auxiliary cache service. Tri-state:
/// "false" disables, anything else (including unset) enables.
pub const NSCD_SETTING: &str = "nscd";

/// Persisted boolean: honor x-forwarded-for / x-real-ip headers.
pub const TRUST_PROXY_SETTING: &str = "trustProxy";

/// Main orchestrator for the pulse service
pub struct Orchestrator {
    config: Arc<Config>,
    database: Arc<dyn Database>,
    executor: Arc<CheckExecutor>,
    broadcaster: Arc<Broadcaster>,
    /// Maintenance-window registry keyed by id. Read-mostly; mutated
    /// only by the bulk load step.
    maintenance: RwLock<HashMap<i64, MaintenanceWindow>>,
    /// Resolved server timezone, the process-wide default.
    timezone: std::sync::RwLock<Tz>,
    /// Consecutive checker failures per monitor, for the retry policy.
    fail_counts: std::sync::Mutex<HashMap<i64, u64>>,
    /// One check task per scheduled monitor, keyed by monitor id and
    /// paired with the monitor definition the task was spawned from.
    task_handles: HashMap<i64, (Monitor, tokio::task::JoinHandle<()>)>,
}

impl Orchestrator {
    /// Create and run an orchestrator until shutdown.
    pub async fn start(config: Config, pool: LibsqlPool) -> Result<()> {
        let mut orchestrator = Self::new(config, pool).await?;
        orchestrator.load_maintenance_list().await?;
        orchestrator.start_services().await;
        orchestrator.run().await
    }

    /// Create a new orchestrator instance
    pub async fn new(config: Config, pool: LibsqlPool) -> Result<Self> {
        let config = Arc::new(config);

        let conn = pool.get().await?;
        info!("Initializing database schema...");
        initialize_database(&conn).await?;
        drop(conn);

        let database: Arc<dyn Database> = Arc::new(DatabaseImpl::new_from_pool(pool));

        let registry = Arc::new(CheckerRegistry::builtin());
        let executor = Arc::new(CheckExecutor::new(registry));

        let persisted = database.get_setting(timezone::SETTING_KEY).await?;
        let env_override = std::env::var(timezone::ENV_OVERRIDE).ok();
        let tz = timezone::resolve(
            env_override.as_deref(),
            persisted.as_deref(),
            timezone::system_guess().as_deref(),
        );
        info!("Server timezone resolved to {}", tz.name());

        Ok(Self {
            config,
            database,
            executor,
            broadcaster: Arc::new(Broadcaster::new()),
            maintenance: RwLock::new(HashMap::new()),
            timezone: std::sync::RwLock::new(tz),
            fail_counts: std::sync::Mutex::new(HashMap::new()),
            task_handles: HashMap::new(),
        })
    }

    #[allow(dead_code)] // Connection handlers subscribe through this
    pub fn broadcaster(&self) -> Arc<Broadcaster> {
        self.broadcaster.clone()
    }

    pub fn timezone(&self) -> Tz {
        *self.timezone.read().expect("timezone lock poisoned")
    }

    /// Bulk-load maintenance windows into the registry, starting each
    /// entry's schedule. Single writer; entries whose schedule fails
    /// to parse are logged and skipped.
    pub async fn load_maintenance_list(&self) -> Result<()> {
        let windows = self.database.get_maintenances().await?;
        let default_tz = self.timezone();

        let mut registry = self.maintenance.write().await;
        registry.clear();
        for mut window in windows {
            if let Err(err) = window.start(default_tz) {
                warn!(id = window.id, %err, "Skipping maintenance window");
                self.write_error_log("maintenance load", &format!("{err:#}"));
                continue;
            }
            registry.insert(window.id, window);
        }
        info!("Loaded {} maintenance windows", registry.len());
        Ok(())
    }

    /// Build a user's ordered monitor snapshot, push it to exactly
    /// that user's room, and return it to the caller.
    pub async fn send_monitor_list(&self, user_id: i64) -> Result<HashMap<String, Value>> {
        let monitors = self.database.get_monitors_by_user(user_id).await?;

        let mut list = HashMap::new();
        for monitor in &monitors {
            list.insert(monitor.id.to_string(), monitor.to_json()?);
        }

        self.broadcaster.publish(&user_room(user_id), Event::MonitorList(list.clone()));
        Ok(list)
    }

    /// Build the global maintenance snapshot from the in-memory
    /// registry, push it to the maintenance room, and return it.
    #[allow(dead_code)] // Invoked by the connection surface
    pub async fn send_maintenance_list(&self) -> HashMap<String, Value> {
        let registry = self.maintenance.read().await;

        let mut list = HashMap::new();
        for (id, window) in registry.iter() {
            list.insert(id.to_string(), window.to_json());
        }

        self.broadcaster.publish(MAINTENANCE_ROOM, Event::MaintenanceList(list.clone()));
        list
    }

    async fn under_maintenance(&self, monitor_id: i64) -> bool {
        let now = Utc::now();
        let registry = self.maintenance.read().await;
        registry.values().any(|w| w.applies_to(monitor_id) && w.is_active_at(now))
    }

    /// Caller-side policy the checker contract defers: retries, the
    /// terminal DOWN record, the important flag, the duration since
    /// the previous heartbeat, and the maintenance override. Persists
    /// the finalized heartbeat and broadcasts it to the owner.
    pub async fn finalize_heartbeat(&self, outcome: CheckOutcome) -> Result<Heartbeat> {
        let CheckOutcome { monitor, mut heartbeat, error } = outcome;

        match error {
            Some(err) => {
                let failures = {
                    let mut counts = self.fail_counts.lock().expect("fail counts poisoned");
                    let entry = counts.entry(monitor.id).or_insert(0);
                    *entry += 1;
                    *entry
                };
                heartbeat.status =
                    if failures <= monitor.max_retries { Status::Pending } else { Status::Down };
                heartbeat.msg = err.to_string();
                heartbeat.ping = None;
            }
            None => {
                self.fail_counts.lock().expect("fail counts poisoned").remove(&monitor.id);
            }
        }

        // Override sits between checker result and visible state; the
        // checker contract is untouched.
        if self.under_maintenance(monitor.id).await {
            heartbeat.status = Status::Maintenance;
        }

        let previous = self.database.get_last_heartbeat(monitor.id).await?;
        heartbeat.important =
            previous.as_ref().map(|p| p.status != heartbeat.status).unwrap_or(true);
        heartbeat.duration =
            previous.map(|p| (heartbeat.time - p.time).num_seconds()).unwrap_or(0);

        self.database.save_heartbeat(&heartbeat).await?;
        self.broadcaster
            .publish(&user_room(monitor.user_id), Event::Heartbeat(heartbeat.to_json()));

        if heartbeat.important {
            info!(
                monitor = monitor.id,
                status = %heartbeat.status,
                msg = %heartbeat.msg,
                "Status transition"
            );
            if let Err(err) = self.send_monitor_list(monitor.user_id).await {
                warn!(%err, "Failed to push monitor list after transition");
            }
        }

        Ok(heartbeat)
    }

    /// Set and persist the server timezone. Validation failures are
    /// surfaced to the caller, unlike during startup resolution.
    #[allow(dead_code)] // Invoked by the connection surface
    pub async fn set_timezone(&self, name: &str) -> Result<Tz> {
        let tz = timezone::validate(name)?;
        self.database.set_setting(timezone::SETTING_KEY, name).await?;
        *self.timezone.write().expect("timezone lock poisoned") = tz;
        info!("Server timezone set to {}", tz.name());
        Ok(tz)
    }

    pub(crate) async fn nscd_enabled(&self) -> bool {
        match self.database.get_setting(NSCD_SETTING).await {
            Ok(Some(value)) => value.trim() != "false",
            Ok(None) => true,
            Err(err) => {
                warn!(%err, "Failed to read nscd setting, assuming enabled");
                true
            }
        }
    }

    /// Conditionally launch the OS-level cache service. A performance
    /// optimization, not a correctness dependency: every failure here
    /// is logged and swallowed.
    pub async fn start_services(&self) {
        if !in_container() {
            debug!("Not a containerized deployment, skipping nscd start");
            return;
        }
        if !self.nscd_enabled().await {
            info!("nscd disabled by setting");
            return;
        }
        self.run_nscd("start").await;
    }

    /// Halt the auxiliary cache service; same gating and error policy
    /// as `start_services`.
    pub async fn stop_services(&self) {
        if !in_container() {
            return;
        }
        if !self.nscd_enabled().await {
            return;
        }
        self.run_nscd("stop").await;
    }

    async fn run_nscd(&self, action: &str) {
        let result = tokio::process::Command::new("service")
            .args(["nscd", action])
            .output()
            .await;

        match result {
            Ok(output) if output.status.success() => {
                info!("nscd {action}ed");
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(action, status = %output.status, stderr = %stderr.trim(), "nscd command failed");
            }
            Err(err) => {
                warn!(action, %err, "Failed to run nscd command");
            }
        }
    }

    /// Resolve the client IP for an inbound connection, honoring proxy
    /// headers only when the trust-proxy setting is enabled.
    #[allow(dead_code)] // Invoked by the connection surface
    pub async fn resolve_client_ip(
        &self,
        remote_addr: &str,
        forwarded_for: Option<&str>,
        real_ip: Option<&str>,
    ) -> String {
        let trust_proxy = matches!(
            self.database.get_setting(TRUST_PROXY_SETTING).await,
            Ok(Some(value)) if value.trim() == "true"
        );
        client_ip(remote_addr, forwarded_for, real_ip, trust_proxy)
    }

    /// Append an unhandled error to the process-local error log, in
    /// addition to (not instead of) the structured console logger.
    /// Sink failures are logged and swallowed.
    pub fn write_error_log(&self, context: &str, err: &dyn std::fmt::Display) {
        let line = format!(
            "[{}] {}: {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            context,
            err
        );

        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.service.error_log)
            .and_then(|mut file| file.write_all(line.as_bytes()));

        if let Err(io_err) = result {
            warn!(%io_err, "Failed to append to error log");
        }
    }

    /// Reconcile the running check tasks with the given monitor set.
    ///
    /// Unchanged monitors keep their task and its timer; added or
    /// edited monitors are (re)spawned, removed ones aborted. New
    /// tasks are spawned before anything is aborted, and an error
    /// spawns nothing, so the previous schedule stays installed.
    fn apply_schedule(&mut self, scheduler: &CheckScheduler, monitors: Vec<Monitor>) -> Result<()> {
        let incoming: HashMap<i64, Monitor> =
            monitors.into_iter().map(|monitor| (monitor.id, monitor)).collect();

        let keep: HashSet<i64> = self
            .task_handles
            .iter()
            .filter(|&(id, (monitor, _))| incoming.get(id) == Some(monitor))
            .map(|(id, _)| *id)
            .collect();

        let to_spawn: Vec<Monitor> =
            incoming.into_values().filter(|monitor| !keep.contains(&monitor.id)).collect();
        let spawned = scheduler.schedule_monitors(to_spawn.clone())?;

        self.task_handles.retain(|id, (_, handle)| {
            if keep.contains(id) {
                true
            } else {
                handle.abort();
                false
            }
        });
        for (monitor, handle) in to_spawn.into_iter().zip(spawned) {
            self.task_handles.insert(monitor.id, (monitor, handle));
        }
        Ok(())
    }

    /// Run the orchestrator: schedule the active monitors and process
    /// check outcomes until shutdown.
    async fn run(&mut self) -> Result<()> {
        info!("Starting pulse orchestrator...");

        let (outcome_tx, mut outcome_rx) = mpsc::channel::<CheckOutcome>(100);
        let scheduler = CheckScheduler::new(self.executor.clone(), outcome_tx.clone());

        info!("Loading monitors from database...");
        let monitors = self.database.get_active_monitors().await?;
        info!("Found {} active monitors", monitors.len());

        // Unknown check types are fatal here: the process must not run
        // against an invalid registry.
        self.apply_schedule(&scheduler, monitors)?;

        let reload_interval =
            Duration::from_secs(self.config.service.monitor_reload_seconds.max(1));
        let mut reload_timer = tokio::time::interval(reload_interval);
        reload_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        reload_timer.tick().await; // first tick fires immediately

        info!("Orchestrator started successfully - processing check outcomes");

        loop {
            tokio::select! {
                Some(outcome) = outcome_rx.recv() => {
                    let monitor_id = outcome.monitor.id;
                    match self.finalize_heartbeat(outcome).await {
                        Ok(heartbeat) => {
                            debug!(
                                monitor = monitor_id,
                                status = %heartbeat.status,
                                ping = ?heartbeat.ping,
                                "Heartbeat recorded"
                            );
                        }
                        Err(err) => {
                            error!(monitor = monitor_id, err = %format!("{err:#}"), "Failed to finalize heartbeat");
                            self.write_error_log("finalize heartbeat", &format!("{err:#}"));
                        }
                    }
                }

                _ = reload_timer.tick() => {
                    debug!("Checking for new or updated monitors...");
                    match self.database.get_active_monitors().await {
                        Ok(monitors) => {
                            let count = monitors.len();
                            match self.apply_schedule(&scheduler, monitors) {
                                Ok(()) => debug!("Reloaded monitors: {} active", count),
                                Err(err) => {
                                    error!(err = %format!("{err:#}"), "Monitor reload failed, keeping previous schedule");
                                    self.write_error_log("monitor reload", &format!("{err:#}"));
                                }
                            }
                        }
                        Err(err) => {
                            error!(err = %format!("{err:#}"), "Failed to reload monitors");
                            self.write_error_log("monitor reload", &format!("{err:#}"));
                        }
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }

                else => {
                    info!("All channels closed, shutting down orchestrator");
                    break;
                }
            }
        }

        self.stop().await;
        Ok(())
    }

    async fn stop(&mut self) {
        for (_, (_, handle)) in self.task_handles.drain() {
            handle.abort();
        }
        self.stop_services().await;
        info!("Orchestrator stopped");
    }
}

/// Whether this process runs inside a containerized deployment; the
/// auxiliary cache service only applies there.
fn in_container() -> bool {
    std::path::Path::new("/.dockerenv").exists()
        || std::env::var("PULSE_IN_CONTAINER").map(|v| v == "1").unwrap_or(false)
}

/// Pure client-address resolution: proxy headers are only consulted
/// when trusted, and the IPv4-mapped-IPv6 prefix is stripped in all
/// cases. `x-forwarded-for` may carry a comma-separated chain; the
/// first hop is the client.
pub fn client_ip(
    remote_addr: &str,
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    trust_proxy: bool,
) -> String {
    let candidate = if trust_proxy {
        forwarded_for
            .and_then(|chain| chain.split(',').next())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or(real_ip)
            .unwrap_or(remote_addr)
    } else {
        remote_addr
    };

    candidate.strip_prefix("::ffff:").unwrap_or(candidate).to_string()
}
