use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use super::checker::Checker;
use super::executor::{CheckExecutor, CheckOutcome};
use crate::database::models::Monitor;

/// Schedules one tokio task per monitor, ticking at the monitor's
/// interval. Each task owns its checker handle, so at most one check
/// per monitor is ever in flight; the 80% timeout inside the checkers
/// guarantees a check finishes before the next tick.
pub struct CheckScheduler {
    executor: Arc<CheckExecutor>,
    outcome_tx: mpsc::Sender<CheckOutcome>,
}

impl CheckScheduler {
    pub fn new(executor: Arc<CheckExecutor>, outcome_tx: mpsc::Sender<CheckOutcome>) -> Self {
        Self { executor, outcome_tx }
    }

    /// Schedule a single monitor for periodic checking.
    ///
    /// The checker is resolved here, not at tick time, so an unknown
    /// check type fails scheduling immediately.
    pub fn schedule_monitor(&self, monitor: Monitor) -> Result<tokio::task::JoinHandle<()>> {
        let checker = self.resolve(&monitor)?;
        Ok(self.spawn_check_task(checker, monitor))
    }

    /// Schedule multiple monitors; fails if any monitor's check type
    /// has no registered checker.
    ///
    /// Resolution runs for the whole list before any task is spawned.
    /// An error therefore spawns nothing; a partial schedule would
    /// leave earlier monitors running with no handle to abort them.
    pub fn schedule_monitors(
        &self,
        monitors: Vec<Monitor>,
    ) -> Result<Vec<tokio::task::JoinHandle<()>>> {
        let resolved = monitors
            .into_iter()
            .map(|monitor| Ok((self.resolve(&monitor)?, monitor)))
            .collect::<Result<Vec<_>>>()?;

        Ok(resolved
            .into_iter()
            .map(|(checker, monitor)| self.spawn_check_task(checker, monitor))
            .collect())
    }

    fn resolve(&self, monitor: &Monitor) -> Result<Arc<dyn Checker>> {
        self.executor
            .resolve(&monitor.check_type)
            .with_context(|| format!("cannot schedule monitor {} ({})", monitor.id, monitor.name))
    }

    fn spawn_check_task(
        &self,
        checker: Arc<dyn Checker>,
        monitor: Monitor,
    ) -> tokio::task::JoinHandle<()> {
        let executor = self.executor.clone();
        let outcome_tx = self.outcome_tx.clone();

        tokio::spawn(async move {
            if !monitor.active {
                return;
            }

            // First tick lands one full interval out, so rescheduling a
            // monitor does not re-check it immediately.
            let period = Duration::from_secs(monitor.interval_seconds.max(1));
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                timer.tick().await;

                let outcome = executor.execute(checker.as_ref(), monitor.clone()).await;

                if let Err(e) = outcome_tx.send(outcome).await {
                    tracing::error!("Failed to send check outcome: {}", e);
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::checker::CheckerRegistry;
    use crate::monitoring::heartbeat::Status;

    fn tcp_monitor(hostname: String) -> Monitor {
        Monitor {
            id: 9,
            name: "loopback".to_string(),
            hostname,
            check_type: "tcp".to_string(),
            interval_seconds: 1,
            max_retries: 0,
            weight: 1000,
            user_id: 1,
            active: true,
        }
    }

    #[tokio::test]
    async fn scheduled_monitor_produces_outcomes() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let executor = Arc::new(CheckExecutor::new(Arc::new(CheckerRegistry::builtin())));
        let (tx, mut rx) = mpsc::channel(10);
        let scheduler = CheckScheduler::new(executor, tx);

        let handle = scheduler.schedule_monitor(tcp_monitor(addr.to_string())).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("timed out waiting for outcome")
            .expect("channel closed");

        assert_eq!(outcome.monitor.id, 9);
        assert!(outcome.error.is_none());
        assert_eq!(outcome.heartbeat.status, Status::Up);

        handle.abort();
    }

    #[tokio::test]
    async fn unknown_check_type_fails_at_schedule_time() {
        let executor = Arc::new(CheckExecutor::new(Arc::new(CheckerRegistry::builtin())));
        let (tx, _rx) = mpsc::channel(1);
        let scheduler = CheckScheduler::new(executor, tx);

        let mut monitor = tcp_monitor("127.0.0.1:1".to_string());
        monitor.check_type = "carrier-pigeon".to_string();

        let err = scheduler.schedule_monitor(monitor).unwrap_err();
        assert!(format!("{err:#}").contains("carrier-pigeon"));
    }

    #[tokio::test]
    async fn failed_bulk_schedule_spawns_no_tasks() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let executor = Arc::new(CheckExecutor::new(Arc::new(CheckerRegistry::builtin())));
        let (tx, mut rx) = mpsc::channel(10);
        let scheduler = CheckScheduler::new(executor, tx);

        let valid = tcp_monitor(addr.to_string());
        let mut unknown = tcp_monitor(addr.to_string());
        unknown.id = 10;
        unknown.check_type = "carrier-pigeon".to_string();

        // The valid monitor comes first; a partial schedule would leave
        // its task running with no handle to abort it.
        assert!(scheduler.schedule_monitors(vec![valid, unknown]).is_err());

        let received = tokio::time::timeout(Duration::from_millis(2500), rx.recv()).await;
        assert!(received.is_err(), "no task may survive a failed bulk schedule");
    }

    #[tokio::test]
    async fn first_check_waits_one_full_interval() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let executor = Arc::new(CheckExecutor::new(Arc::new(CheckerRegistry::builtin())));
        let (tx, mut rx) = mpsc::channel(10);
        let scheduler = CheckScheduler::new(executor, tx);

        let handle = scheduler.schedule_monitor(tcp_monitor(addr.to_string())).unwrap();

        let early = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
        assert!(early.is_err(), "check must not run before the first interval elapses");

        let outcome = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("timed out waiting for outcome")
            .expect("channel closed");
        assert_eq!(outcome.monitor.id, 9);

        handle.abort();
    }

    #[tokio::test]
    async fn inactive_monitor_is_not_checked() {
        let executor = Arc::new(CheckExecutor::new(Arc::new(CheckerRegistry::builtin())));
        let (tx, mut rx) = mpsc::channel(1);
        let scheduler = CheckScheduler::new(executor, tx);

        let mut monitor = tcp_monitor("127.0.0.1:1".to_string());
        monitor.active = false;

        let _handle = scheduler.schedule_monitor(monitor).unwrap();

        let received = tokio::time::timeout(Duration::from_millis(1500), rx.recv()).await;
        assert!(received.is_err(), "inactive monitor must not produce outcomes");
    }
}
