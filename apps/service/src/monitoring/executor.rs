use std::sync::Arc;

use anyhow::Result;

use super::checker::{Checker, CheckerRegistry};
use super::heartbeat::Heartbeat;
use crate::database::models::Monitor;
use crate::error::CheckError;

/// Result of one check execution, handed to the orchestrator for
/// retry policy, maintenance override, persistence, and broadcast.
#[derive(Debug)]
pub struct CheckOutcome {
    pub monitor: Monitor,
    /// Fully populated for the UP case, otherwise still the pending
    /// heartbeat the checker was handed.
    pub heartbeat: Heartbeat,
    pub error: Option<CheckError>,
}

/// Executes individual checks against the long-lived checker
/// instances in the registry.
pub struct CheckExecutor {
    registry: Arc<CheckerRegistry>,
}

impl CheckExecutor {
    pub fn new(registry: Arc<CheckerRegistry>) -> Self {
        Self { registry }
    }

    /// Resolve the checker for a check type. Unknown identifiers are a
    /// fatal configuration error; scheduling must not proceed past one.
    pub fn resolve(&self, check_type: &str) -> Result<Arc<dyn Checker>> {
        self.registry.get(check_type)
    }

    /// Run one check. The checker either populates the heartbeat (UP)
    /// or the outcome carries its failure; no DOWN verdict is produced
    /// here.
    pub async fn execute(&self, checker: &dyn Checker, monitor: Monitor) -> CheckOutcome {
        let mut heartbeat = Heartbeat::pending(monitor.id);
        let error = checker.check(&monitor, &mut heartbeat).await.err();
        CheckOutcome { monitor, heartbeat, error }
    }
}
